use crate::consts::MAX_STAGES;
use crate::error::Bug;

use shadowfp_ir::Addr;

use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Default)]
struct StageVal {
    value: f64,
    rel_error: f64,
}

#[derive(Debug, Clone, Default)]
struct Stage {
    active: bool,
    iteration: u64,
    old_vals: HashMap<Addr, StageVal>,
    new_vals: HashMap<Addr, StageVal>,
    limits: HashMap<Addr, f64>,
}

/// A divergence record for one address inside one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageReport {
    /// Number of iterations that exceeded the limit.
    pub count: u64,
    /// First iteration that diverged.
    pub iter_min: u64,
    /// Latest iteration that diverged.
    pub iter_max: u64,
    /// Largest |Δ relative error| seen; the limit after the last report.
    pub limit: f64,
    /// Guest value stored at the diverging iteration.
    pub value: f64,
}

/// The stage tracker: user-bracketed code regions across whose iterations
/// per-address relative-error divergence is watched.
#[derive(Debug, Clone)]
pub struct Stages {
    stages: Vec<Stage>,
    reports: BTreeMap<(usize, Addr), StageReport>,
    active_count: usize,
}

impl Default for Stages {
    fn default() -> Self {
        Self {
            stages: vec![Stage::default(); MAX_STAGES],
            reports: BTreeMap::new(),
            active_count: 0,
        }
    }
}

impl Stages {
    fn index(i: u64) -> Result<usize, Bug> {
        if (i as usize) < MAX_STAGES {
            Ok(i as usize)
        } else {
            Err(Bug::StageOutOfRange(i))
        }
    }

    /// Begin one iteration of stage `i`.
    pub fn start(&mut self, i: u64) -> Result<(), Bug> {
        let idx = Self::index(i)?;

        if !self.stages[idx].active {
            self.active_count += 1;
        }
        let stage = &mut self.stages[idx];
        stage.active = true;
        stage.iteration += 1;
        stage.new_vals = HashMap::new();

        Ok(())
    }

    /// End one iteration of stage `i`, pairing this iteration's values with
    /// the previous one's and reporting every address whose relative-error
    /// delta exceeds its limit. The limit is lifted to each new delta.
    pub fn end(&mut self, i: u64) -> Result<(), Bug> {
        let idx = Self::index(i)?;

        if self.stages[idx].active {
            self.active_count -= 1;
        }

        let stage = &mut self.stages[idx];
        let iteration = stage.iteration;
        let new_vals = std::mem::take(&mut stage.new_vals);
        let mut hits = Vec::new();

        for (addr, new) in &new_vals {
            let Some(old) = stage.old_vals.get(addr) else {
                continue;
            };
            let diff = (old.rel_error - new.rel_error).abs();
            let limit = stage.limits.get(addr).copied().unwrap_or_default();
            if diff > limit {
                stage.limits.insert(*addr, diff);
                hits.push((*addr, diff, new.value));
            }
        }

        stage.old_vals = new_vals;
        stage.active = false;

        for (addr, diff, value) in hits {
            self.reports
                .entry((idx, addr))
                .and_modify(|report| {
                    report.count += 1;
                    report.iter_max = iteration;
                    report.limit = diff;
                    report.value = value;
                })
                .or_insert(StageReport {
                    count: 1,
                    iter_min: iteration,
                    iter_max: iteration,
                    limit: diff,
                    value,
                });
        }

        Ok(())
    }

    /// Forget everything stage `i` accumulated.
    pub fn clear(&mut self, i: u64) -> Result<(), Bug> {
        let idx = Self::index(i)?;

        if self.stages[idx].active {
            self.active_count -= 1;
        }
        self.stages[idx] = Stage::default();

        Ok(())
    }

    /// Whether any stage is currently inside an iteration.
    pub fn any_active(&self) -> bool {
        self.active_count > 0
    }

    /// Feed a tracked store into every active stage, keeping the largest
    /// relative error per address since the iteration started.
    pub fn record_store(&mut self, addr: Addr, value: f64, rel_error: f64) {
        if self.active_count == 0 {
            return;
        }

        for stage in self.stages.iter_mut().filter(|s| s.active) {
            stage
                .new_vals
                .entry(addr)
                .and_modify(|val| {
                    if rel_error > val.rel_error {
                        *val = StageVal { value, rel_error };
                    }
                })
                .or_insert(StageVal { value, rel_error });
        }
    }

    /// All divergence records, keyed by stage index and address.
    pub fn reports(&self) -> impl Iterator<Item = (&(usize, Addr), &StageReport)> {
        self.reports.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_divergence_reports_with_matching_iterations() {
        let mut stages = Stages::default();

        stages.start(0).unwrap();
        stages.record_store(0x1000, 1.0 / 3.0, 1e-17);
        stages.end(0).unwrap();

        stages.start(0).unwrap();
        stages.record_store(0x1000, 1.0 / 3.0 + 2f64.powi(-40), 2f64.powi(-40));
        stages.end(0).unwrap();

        let ((stage, addr), report) = stages.reports().next().unwrap();
        assert_eq!((*stage, *addr), (0, 0x1000));
        assert_eq!(report.count, 1);
        assert_eq!(report.iter_min, 2);
        assert_eq!(report.iter_max, 2);
        assert!((report.limit - 2f64.powi(-40)).abs() < 2f64.powi(-50));
    }

    #[test]
    fn limit_suppresses_smaller_deltas() {
        let mut stages = Stages::default();

        for rel in [0.0, 1e-6, 2e-6, 1.5e-6] {
            stages.start(0).unwrap();
            stages.record_store(0x8, 1.0, rel);
            stages.end(0).unwrap();
        }

        // Deltas: 1e-6 (report, limit 1e-6), 1e-6 (not above limit),
        // 0.5e-6 (below limit).
        let report = stages.reports().next().unwrap().1;
        assert_eq!(report.count, 1);
        assert_eq!(report.iter_min, 2);
    }

    #[test]
    fn stores_keep_largest_relative_error_per_iteration() {
        let mut stages = Stages::default();

        stages.start(0).unwrap();
        stages.record_store(0x8, 1.0, 1e-9);
        stages.record_store(0x8, 2.0, 5e-9);
        stages.record_store(0x8, 3.0, 2e-9);
        stages.end(0).unwrap();

        stages.start(0).unwrap();
        stages.record_store(0x8, 4.0, 1e-3);
        stages.end(0).unwrap();

        let report = stages.reports().next().unwrap().1;
        assert!((report.limit - (1e-3 - 5e-9)).abs() < 1e-12);
    }

    #[test]
    fn clear_discards_history() {
        let mut stages = Stages::default();

        stages.start(0).unwrap();
        stages.record_store(0x8, 1.0, 1e-6);
        stages.end(0).unwrap();
        stages.clear(0).unwrap();

        stages.start(0).unwrap();
        stages.record_store(0x8, 1.0, 5e-6);
        stages.end(0).unwrap();

        // History gone: first iteration after clear has nothing to pair.
        assert_eq!(stages.reports().count(), 0);
    }

    #[test]
    fn out_of_range_stage_is_a_bug() {
        let mut stages = Stages::default();
        assert!(stages.start(MAX_STAGES as u64).is_err());
    }

    #[test]
    fn stores_outside_iterations_are_ignored() {
        let mut stages = Stages::default();
        stages.record_store(0x8, 1.0, 1e-6);

        stages.start(0).unwrap();
        stages.end(0).unwrap();
        stages.start(0).unwrap();
        stages.end(0).unwrap();

        assert_eq!(stages.reports().count(), 0);
    }
}
