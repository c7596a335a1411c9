use shadowfp_ir::{Addr, CmpResult};

use std::collections::HashMap;

/// Sites where the high-precision comparison disagreed with the guest's.
#[derive(Debug, Clone, Default)]
pub struct BranchDivergence {
    sites: HashMap<Addr, u64>,
}

impl BranchDivergence {
    /// Record a divergence at `origin`. Only the first hit per site is
    /// noticed in the log; every hit is counted.
    pub fn record(
        &mut self,
        origin: Addr,
        guest: CmpResult,
        shadow: CmpResult,
        location: Option<&str>,
    ) {
        let count = self.sites.entry(origin).or_default();
        *count += 1;

        if *count == 1 {
            tracing::warn!(
                origin = %format_args!("{origin:#x}"),
                location = location.unwrap_or("?"),
                guest = ?guest,
                shadow = ?shadow,
                "branch comparison diverged; shadow ordering wins"
            );
        }
    }

    /// Divergent sites with their hit counts.
    pub fn iter(&self) -> impl Iterator<Item = (Addr, u64)> + '_ {
        self.sites.iter().map(|(addr, count)| (*addr, *count))
    }

    /// Number of divergent sites.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Whether no site diverged.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_hits_per_site() {
        let mut divergence = BranchDivergence::default();

        divergence.record(0x10, CmpResult::Lt, CmpResult::Gt, None);
        divergence.record(0x10, CmpResult::Lt, CmpResult::Gt, None);
        divergence.record(0x20, CmpResult::Eq, CmpResult::Lt, Some("main.c:3"));

        assert_eq!(divergence.len(), 2);
        let counts: HashMap<_, _> = divergence.iter().collect();
        assert_eq!(counts[&0x10], 2);
        assert_eq!(counts[&0x20], 1);
    }
}
