use crate::consts::{
    PSO_ERR_RATIO, PSO_INFLATION, PSO_OVERFLOW_RATIO, PSO_TINY_ORIGINAL, PSO_TINY_SHADOW,
};

use shadowfp_ir::Addr;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default)]
struct PsoStat {
    err_cnt: u64,
    ov_cnt: u64,
    total_cnt: u64,
}

/// A detected precision-specific operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsoEntry {
    /// The inflation usually occurred on effectively-zero values; the site
    /// is kept on record but never substituted.
    pub false_positive: bool,
}

/// Detector for precision-specific operations: origins whose relative
/// error inflates consistently across executions.
///
/// Detections persist across program runs in a plain-text file beside the
/// guest executable, so a later run can substitute the middle channel at
/// the detected sites.
#[derive(Debug, Clone, Default)]
pub struct PsoDetector {
    error_map: HashMap<Addr, PsoStat>,
    detected: HashMap<Addr, PsoEntry>,
    latched: HashSet<Addr>,
    path: Option<PathBuf>,
    runs: u64,
    last_run_new: bool,
}

impl PsoDetector {
    /// New detector persisting to `path`, loading any prior detections.
    pub fn with_persistence(path: PathBuf) -> io::Result<Self> {
        let mut detector = Self {
            path: Some(path.clone()),
            ..Self::default()
        };

        if path.exists() {
            let reader = BufReader::new(fs::File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                let mut fields = line.split_whitespace();
                let origin = fields
                    .next()
                    .and_then(|s| s.strip_prefix("0x"))
                    .and_then(|s| Addr::from_str_radix(s, 16).ok());
                let false_positive = fields.next().map(|s| s == "1");

                if let (Some(origin), Some(false_positive)) = (origin, false_positive) {
                    detector.detected.insert(origin, PsoEntry { false_positive });
                }
            }
        }

        Ok(detector)
    }

    /// Begin one detection run.
    pub fn begin_run(&mut self) {
        self.error_map.clear();
        self.latched.clear();
        self.runs += 1;
    }

    /// Begin one guest instance inside a run, releasing the per-instance
    /// latches.
    pub fn begin_instance(&mut self) {
        self.latched.clear();
    }

    /// Whether `origin` was detected and should have its middle channel
    /// substituted.
    pub fn is_detected(&self, origin: Addr) -> bool {
        self.detected
            .get(&origin)
            .is_some_and(|entry| !entry.false_positive)
    }

    /// Number of completed runs.
    pub const fn runs(&self) -> u64 {
        self.runs
    }

    /// Whether detection has converged: at least one run completed and the
    /// latest one detected nothing new.
    pub fn is_finished(&self) -> bool {
        self.runs > 0 && !self.last_run_new
    }

    /// All persisted detections.
    pub fn detected(&self) -> impl Iterator<Item = (Addr, &PsoEntry)> {
        self.detected.iter().map(|(addr, entry)| (*addr, entry))
    }

    /// Feed one evaluation: the worst operand input error against the
    /// output error and magnitudes.
    ///
    /// An inflation of `output / input` at or above the threshold counts as
    /// an erroneous execution, at most once per origin per guest instance.
    /// Inflations on effectively-zero values are counted separately; an
    /// origin dominated by them is a false positive.
    pub fn analyze(&mut self, origin: Addr, input_rel: f64, output_rel: f64, original: f64, shadow: f64) {
        let stat = self.error_map.entry(origin).or_default();
        stat.total_cnt += 1;

        let inflation = if input_rel == 0.0 {
            output_rel.abs()
        } else {
            (output_rel / input_rel).abs()
        };
        if inflation < PSO_INFLATION {
            return;
        }

        if self.latched.insert(origin) {
            stat.err_cnt += 1;
            if original.abs() < PSO_TINY_ORIGINAL && shadow.abs() < PSO_TINY_SHADOW {
                stat.ov_cnt += 1;
            }
        }
    }

    /// End the current detection run: qualify candidates, flag false
    /// positives, persist the detections.
    pub fn end_run(&mut self) -> io::Result<()> {
        self.last_run_new = false;

        for (origin, stat) in &self.error_map {
            if stat.total_cnt == 0 {
                continue;
            }
            if (stat.err_cnt as f64) <= stat.total_cnt as f64 * PSO_ERR_RATIO {
                continue;
            }

            let false_positive =
                stat.ov_cnt as f64 / stat.total_cnt as f64 > PSO_OVERFLOW_RATIO;
            let entry = PsoEntry { false_positive };

            if self.detected.insert(*origin, entry) != Some(entry) && !false_positive {
                self.last_run_new = true;
            }
        }
        self.error_map.clear();

        self.persist()
    }

    fn persist(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut file = fs::File::create(path)?;
        for (origin, entry) in &self.detected {
            writeln!(file, "{origin:#x} {}", entry.false_positive as u8)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(detector: &mut PsoDetector, origin: Addr, erroneous: usize, clean: usize) {
        for _ in 0..erroneous {
            detector.begin_instance();
            detector.analyze(origin, 1e-16, 1e-8, 1.0, 1.0);
        }
        for _ in 0..clean {
            detector.begin_instance();
            detector.analyze(origin, 1e-16, 1e-15, 1.0, 1.0);
        }
    }

    #[test]
    fn consistent_inflation_is_detected() {
        let mut detector = PsoDetector::default();

        detector.begin_run();
        feed(&mut detector, 0x400a2c, 8, 2);
        detector.end_run().unwrap();

        assert!(detector.is_detected(0x400a2c));
        assert!(!detector.is_finished());

        detector.begin_run();
        feed(&mut detector, 0x400a2c, 8, 2);
        detector.end_run().unwrap();
        assert!(detector.is_finished());
    }

    #[test]
    fn rare_inflation_is_not_detected() {
        let mut detector = PsoDetector::default();

        detector.begin_run();
        feed(&mut detector, 0x400a2c, 5, 5);
        detector.end_run().unwrap();

        assert!(!detector.is_detected(0x400a2c));
    }

    #[test]
    fn near_zero_inflations_mark_false_positive() {
        let mut detector = PsoDetector::default();

        detector.begin_run();
        for _ in 0..10 {
            detector.begin_instance();
            detector.analyze(0x10, 1e-16, 1e-8, 1e-12, 1e-20);
        }
        detector.end_run().unwrap();

        assert!(!detector.is_detected(0x10));
        assert_eq!(
            detector.detected().next(),
            Some((0x10, &PsoEntry { false_positive: true }))
        );
    }

    #[test]
    fn latch_counts_one_error_per_instance() {
        let mut detector = PsoDetector::default();

        detector.begin_run();
        detector.begin_instance();
        // Many inflated executions in one instance count once, so the
        // ratio test fails against the total.
        for _ in 0..10 {
            detector.analyze(0x10, 1e-16, 1e-8, 1.0, 1.0);
        }
        detector.end_run().unwrap();

        assert!(!detector.is_detected(0x10));
    }

    #[test]
    fn detections_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guest_detected_pso");

        let mut detector = PsoDetector::with_persistence(path.clone()).unwrap();
        detector.begin_run();
        feed(&mut detector, 0x400a2c, 9, 1);
        detector.end_run().unwrap();

        let reloaded = PsoDetector::with_persistence(path).unwrap();
        assert!(reloaded.is_detected(0x400a2c));
    }
}
