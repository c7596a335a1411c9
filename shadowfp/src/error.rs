//! Engine error implementation

use shadowfp_ir::Addr;

use std::io;
use thiserror::Error;

/// Engine error variants.
#[derive(Debug, Error)]
pub enum EngineError {
    /// I/O failure while writing reports or persisted state.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A structural invariant of the shadow state is broken. The host is
    /// expected to abort on this.
    #[error("shadow state bug: {0}")]
    Bug(#[from] Bug),

    /// Requested precision is outside the library-supported range.
    #[error("precision {requested} outside supported range {min}..={max}")]
    PrecisionOutOfRange {
        /// Requested precision in bits
        requested: u32,
        /// Library minimum
        min: u32,
        /// Library maximum
        max: u32,
    },

    /// A client request tag outside the recognized namespace.
    #[error("unrecognized client request {0:#x}")]
    UnknownClientRequest(u64),

    /// A guest memory access handed to the host failed.
    #[error("guest access fault at {0:#x}")]
    GuestAccessFault(Addr),
}

/// Broken structural invariants. These are not recoverable; reaching one
/// means the engine can no longer honor its shadow-state guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Bug {
    /// A shadow value's captured origin type disagrees with the width at
    /// which its carrier is being consumed.
    #[error("inconsistent origin type for shadow value produced at {0:#x}")]
    InconsistentOrgType(Addr),

    /// The introduced-error computation found no accumulator entry for an
    /// origin that is structurally required to have one.
    #[error("missing mean-value entry for origin {0:#x}")]
    MissingMeanValue(Addr),

    /// A stage index outside the stage table.
    #[error("stage index {0} out of range")]
    StageOutOfRange(u64),

    /// The allocation counters no longer account for the live entries.
    #[error(
        "shadow allocation counters out of balance: {allocs} allocated, {frees} freed, {live} live"
    )]
    CountersOutOfBalance {
        /// Activations counted since creation
        allocs: u64,
        /// Deactivations counted since creation
        frees: u64,
        /// Entries currently active
        live: u64,
    },
}
