use crate::error::Bug;

use shadowfp_ir::Addr;

use std::collections::HashMap;

/// Per-origin error statistics.
#[derive(Debug, Clone, Default)]
pub struct MeanValue {
    /// Number of evaluations at this origin.
    pub count: u64,
    /// Running sum of relative error.
    pub err_sum: f64,
    /// Largest relative error observed.
    pub err_max: f64,
    /// Running sum of cancelled bits.
    pub canceled_sum: u64,
    /// Largest cancellation observed.
    pub canceled_max: u64,
    /// The cancelled-bits sum wrapped.
    pub canceled_overflow: bool,
    /// Running sum of cancellation badness.
    pub badness_sum: u64,
    /// Largest cancellation badness observed.
    pub badness_max: u64,
    /// First operand's origin during the max-error run.
    pub arg1_origin: Addr,
    /// Second operand's origin during the max-error run.
    pub arg2_origin: Addr,
    /// Scratch flag for the dependency-graph walk.
    pub visited: bool,
}

impl MeanValue {
    /// Mean relative error over all evaluations.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.err_sum / self.count as f64
        }
    }
}

/// Per-origin accumulator table.
#[derive(Debug, Clone, Default)]
pub struct MeanValues {
    map: HashMap<Addr, MeanValue>,
}

impl MeanValues {
    /// Record one evaluation at `origin`.
    ///
    /// Operand origins are captured only for the run that sets a new error
    /// maximum, so the recorded parents always belong to the max path.
    pub fn record(
        &mut self,
        origin: Addr,
        rel_error: f64,
        canceled: u64,
        badness: u64,
        parents: (Addr, Addr),
    ) {
        let entry = self.map.entry(origin).or_default();

        entry.count += 1;
        entry.err_sum += rel_error;
        if rel_error >= entry.err_max {
            entry.err_max = rel_error;
            entry.arg1_origin = parents.0;
            entry.arg2_origin = parents.1;
        }

        match entry.canceled_sum.checked_add(canceled) {
            Some(sum) => entry.canceled_sum = sum,
            None => entry.canceled_overflow = true,
        }
        entry.canceled_max = entry.canceled_max.max(canceled);

        entry.badness_sum = entry.badness_sum.saturating_add(badness);
        entry.badness_max = entry.badness_max.max(badness);
    }

    /// Accumulator entry at `origin`.
    pub fn get(&self, origin: Addr) -> Option<&MeanValue> {
        self.map.get(&origin)
    }

    /// Mutable accumulator entry at `origin`.
    pub(crate) fn get_mut(&mut self, origin: Addr) -> Option<&mut MeanValue> {
        self.map.get_mut(&origin)
    }

    /// All entries.
    pub fn iter(&self) -> impl Iterator<Item = (Addr, &MeanValue)> {
        self.map.iter().map(|(addr, entry)| (*addr, entry))
    }

    /// Number of distinct origins recorded.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Clear the graph-walk scratch flags.
    pub(crate) fn clear_visited(&mut self) {
        for entry in self.map.values_mut() {
            entry.visited = false;
        }
    }

    /// Error newly introduced at `origin`, as the residual of its maximum
    /// over its max-path parents' maxima. Negative residuals mean the
    /// operation introduced no error of its own.
    pub fn introduced_error(&self, origin: Addr) -> Result<f64, Bug> {
        let entry = self
            .map
            .get(&origin)
            .ok_or(Bug::MissingMeanValue(origin))?;

        let parent_max = |parent: Addr| -> Result<f64, Bug> {
            self.map
                .get(&parent)
                .map(|e| e.err_max)
                .ok_or(Bug::MissingMeanValue(parent))
        };

        let (p1, p2) = (entry.arg1_origin, entry.arg2_origin);
        let residual = match (p1, p2) {
            // Recursion through self: the maximum already is the residual.
            _ if p1 == origin || p2 == origin => entry.err_max,
            (0, 0) => entry.err_max,
            (p, 0) | (0, p) => entry.err_max - parent_max(p)?,
            (p1, p2) => entry.err_max - parent_max(p1)?.max(parent_max(p2)?),
        };

        Ok(residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_run_captures_parents() {
        let mut values = MeanValues::default();

        values.record(0x10, 1e-9, 0, 0, (0x1, 0x2));
        values.record(0x10, 1e-6, 4, 1, (0x3, 0x4));
        values.record(0x10, 1e-8, 2, 0, (0x5, 0x6));

        let entry = values.get(0x10).unwrap();
        assert_eq!(entry.count, 3);
        assert_eq!(entry.err_max, 1e-6);
        assert_eq!((entry.arg1_origin, entry.arg2_origin), (0x3, 0x4));
        assert_eq!(entry.canceled_max, 4);
        assert_eq!(entry.canceled_sum, 6);
        assert_eq!(entry.badness_max, 1);
    }

    #[test]
    fn canceled_sum_overflow_sets_flag() {
        let mut values = MeanValues::default();

        values.record(0x10, 0.0, u64::MAX, 0, (0, 0));
        values.record(0x10, 0.0, 1, 0, (0, 0));

        let entry = values.get(0x10).unwrap();
        assert!(entry.canceled_overflow);
        assert_eq!(entry.canceled_sum, u64::MAX);
    }

    #[test]
    fn introduced_error_subtracts_larger_parent() {
        let mut values = MeanValues::default();

        values.record(0x1, 1e-8, 0, 0, (0, 0));
        values.record(0x2, 4e-8, 0, 0, (0, 0));
        values.record(0x10, 1e-6, 0, 0, (0x1, 0x2));

        let residual = values.introduced_error(0x10).unwrap();
        assert!((residual - (1e-6 - 4e-8)).abs() < 1e-20);
    }

    #[test]
    fn introduced_error_self_recursion_uses_own_max() {
        let mut values = MeanValues::default();
        values.record(0x10, 1e-6, 0, 0, (0x10, 0));

        assert_eq!(values.introduced_error(0x10).unwrap(), 1e-6);
    }

    #[test]
    fn introduced_error_single_parent() {
        let mut values = MeanValues::default();
        values.record(0x1, 1e-7, 0, 0, (0, 0));
        values.record(0x10, 3e-7, 0, 0, (0x1, 0));

        let residual = values.introduced_error(0x10).unwrap();
        assert!((residual - 2e-7).abs() < 1e-20);
    }

    #[test]
    fn introduced_error_missing_entry_is_a_bug() {
        let values = MeanValues::default();
        assert!(matches!(
            values.introduced_error(0x10),
            Err(Bug::MissingMeanValue(0x10))
        ));
    }
}
