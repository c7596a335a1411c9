//! Diagnostic accumulators
//!
//! Everything the engine learns while shadowing: per-origin error
//! statistics, stage-iteration divergence, precision-specific operation
//! detection, and branch divergence.

mod branch;
mod mean;
mod pso;
mod stage;

pub use branch::BranchDivergence;
pub use mean::{MeanValue, MeanValues};
pub use pso::{PsoDetector, PsoEntry};
pub use stage::{StageReport, Stages};
