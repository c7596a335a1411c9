//! Shadow engine implementation
//!
//! [`Engine`] is the context object behind every callback: it owns the
//! carrier tables, the diagnostic accumulators, the PSO state and the
//! per-process counters, and it is handed through the instrumenter and
//! every runtime hook instead of living as ambient module state.

use crate::consts::MAX_DUMPED_GRAPHS;
use crate::diagnostics::{BranchDivergence, MeanValues, PsoDetector, Stages};
use crate::error::{Bug, EngineError};
use crate::host::GuestHost;
use crate::options::Options;
use crate::report;
use crate::shadow::ShadowStore;

use std::collections::BTreeSet;
use std::path::PathBuf;

mod client;
mod dataflow;
mod eval;
mod instrument;
mod transfer;

pub use client::{tags, ClientRequest};
pub use instrument::{
    BinOpSite, CmpSite, CvtSite, GetISite, GetSite, Hook, InstrumentedBlock, InstrumentedStmt,
    LoadSite, MuxSite, OperandRef, PutISite, PutSite, StoreSite, TriOpSite, UnOpSite, WidenSite,
};

/// The shadow-value propagation engine.
///
/// One instance exists per analyzed process. The host calls
/// [`Engine::instrument_block`] once per freshly translated guest block and
/// the `process_*` callbacks on every guest FP event; the guest itself
/// talks to the engine through [`Engine::client_request`].
#[derive(Debug)]
pub struct Engine<H> {
    options: Options,
    host: H,
    store: ShadowStore,
    mean_values: MeanValues,
    stages: Stages,
    pso: PsoDetector,
    branches: BranchDivergence,
    unsupported: BTreeSet<String>,
    block_count: u64,
    enabled: bool,
    graphs_dumped: u32,
    finished: bool,
}

impl<H> Engine<H>
where
    H: GuestHost,
{
    /// New engine over `host`, loading persisted PSO detections when
    /// detection is enabled.
    ///
    /// The precision is validated here as well as at option parsing, since
    /// embedders can build [`Options`] directly.
    pub fn new(options: Options, host: H) -> Result<Self, EngineError> {
        let min = rug::float::prec_min();
        let max = rug::float::prec_max();
        if !(min..=max).contains(&options.precision) {
            return Err(EngineError::PrecisionOutOfRange {
                requested: options.precision,
                min,
                max,
            });
        }

        let pso = if options.detect_pso {
            PsoDetector::with_persistence(report::pso_persistence_path(&host.object_path()))?
        } else {
            PsoDetector::default()
        };

        Ok(Self {
            enabled: options.analyze_all,
            store: ShadowStore::new(options.precision),
            mean_values: MeanValues::default(),
            stages: Stages::default(),
            pso,
            branches: BranchDivergence::default(),
            unsupported: BTreeSet::new(),
            block_count: 0,
            graphs_dumped: 0,
            finished: false,
            options,
            host,
        })
    }

    /// Called at the head of every executed guest block; drives the
    /// temporary-shadow versioning.
    pub fn on_block_entry(&mut self) {
        self.block_count += 1;
    }

    /// Number of blocks executed so far.
    pub const fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Engine configuration.
    pub const fn options(&self) -> &Options {
        &self.options
    }

    /// Whether analysis is currently enabled.
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The shadow store.
    pub const fn store(&self) -> &ShadowStore {
        &self.store
    }

    /// Per-origin error accumulators.
    pub const fn mean_values(&self) -> &MeanValues {
        &self.mean_values
    }

    pub(crate) fn mean_values_mut(&mut self) -> &mut MeanValues {
        &mut self.mean_values
    }

    /// The stage tracker.
    pub const fn stages(&self) -> &Stages {
        &self.stages
    }

    /// The PSO detector.
    pub const fn pso(&self) -> &PsoDetector {
        &self.pso
    }

    /// Branch-divergence sites.
    pub const fn branches(&self) -> &BranchDivergence {
        &self.branches
    }

    /// Opcodes encountered but not shadowed.
    pub const fn unsupported_ops(&self) -> &BTreeSet<String> {
        &self.unsupported
    }

    /// Host access.
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Mutable host access.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Precision of the `value` channel for an operation of `guest_prec`
    /// nominal bits. In simulate-original mode the high-precision channel
    /// collapses onto the guest precision.
    pub(crate) fn value_precision(&self, guest_prec: u32) -> u32 {
        if self.options.sim_original {
            guest_prec
        } else {
            self.options.precision
        }
    }

    pub(crate) fn note_graph_dump(&mut self) -> bool {
        if self.graphs_dumped >= MAX_DUMPED_GRAPHS {
            return false;
        }
        self.graphs_dumped += 1;
        true
    }

    pub(crate) const fn graphs_dumped(&self) -> u32 {
        self.graphs_dumped
    }

    /// Write every report file and check the allocation invariant.
    ///
    /// A counter imbalance at termination means shadow entries leaked past
    /// their carrier's deactivation path; that is fatal and the host is
    /// expected to abort on the returned error.
    ///
    /// Idempotent: the second call does nothing and returns no paths.
    pub fn finish(&mut self) -> Result<Vec<PathBuf>, EngineError> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.finished = true;

        for op in &self.unsupported {
            tracing::warn!(op = op.as_str(), "unsupported FP opcode was not shadowed");
        }

        let paths = report::write_reports(self)?;

        let live = self.store.live_count();
        let allocs = self.store.allocs();
        let frees = self.store.frees();
        if allocs - frees != live {
            return Err(Bug::CountersOutOfBalance {
                allocs,
                frees,
                live,
            }
            .into());
        }

        tracing::info!(
            blocks = self.block_count,
            origins = self.mean_values.len(),
            live_shadows = live,
            "shadow analysis finished"
        );

        Ok(paths)
    }
}

impl<H> AsRef<H> for Engine<H> {
    fn as_ref(&self) -> &H {
        &self.host
    }
}

impl<H> AsMut<H> for Engine<H> {
    fn as_mut(&mut self) -> &mut H {
        &mut self.host
    }
}
