//! Shadow-value floating-point accuracy engine.
//!
//! Runs alongside an unmodified guest program under a dynamic binary
//! instrumentation host and maintains, for every FP operation the guest
//! executes, a parallel high-precision shadow value in three channels:
//! the configurable-precision shadow, a guest-precision middle channel,
//! and a simulated original with IEEE-754 range emulation. Comparing the
//! channels against the guest's native computation detects and localizes
//! large relative errors, catastrophic cancellations, error inflation at
//! precision-specific operations, and divergent control flow.
//!
//! The host framework (block translation, dispatch, symbol resolution) is
//! an external collaborator reached through [`host::GuestHost`]; the
//! multi-precision arithmetic is MPFR via `rug`.

pub mod args;
pub mod consts;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod host;
pub mod options;
pub mod shadow;

mod numeric;
mod report;

#[cfg(any(test, feature = "test-helpers"))]
pub mod harness;

pub mod prelude {
    //! Convenience re-exports for embedders and tests.

    #[doc(no_inline)]
    pub use shadowfp_ir::{
        Addr, BinFpOp, Block, CircDescr, CmpResult, CvtOp, Expr, Operand, PassOp, RegOffset,
        Stmt, TempId, ThreadId, TriFpOp, Ty, UnFpOp, Value, Word,
    };

    pub use crate::args::{
        BinOpArgs, CmpArgs, CvtArgs, GetArgs, GetIArgs, LoadArgs, MuxArgs, OperandSlot, PutArgs,
        PutIArgs, StoreArgs, TriOpArgs, UnOpArgs, WidenArgs,
    };
    pub use crate::diagnostics::{
        BranchDivergence, MeanValue, MeanValues, PsoDetector, PsoEntry, StageReport, Stages,
    };
    pub use crate::engine::{
        tags, ClientRequest, Engine, Hook, InstrumentedBlock, InstrumentedStmt, OperandRef,
    };
    pub use crate::error::{Bug, EngineError};
    pub use crate::host::{GuestHost, MemHost};
    pub use crate::options::Options;
    pub use crate::shadow::{IeeeValue, ShadowStore, ShadowValue};

    #[cfg(any(test, feature = "test-helpers"))]
    pub use crate::harness::BlockRunner;
}
