//! Client-request interface
//!
//! The in-process command channel: the guest program plants inline marker
//! sequences that the host surfaces as `(tag, args)` pairs, and the engine
//! queries or manipulates shadow state on its behalf.

use super::Engine;
use crate::error::EngineError;
use crate::host::GuestHost;
use crate::report;
use crate::shadow::IeeeValue;

use rug::Assign;
use shadowfp_ir::{Addr, Word};

/// Request tag namespace.
pub mod tags {
    use shadowfp_ir::Word;

    /// Base of the tool's tag namespace.
    pub const BASE: Word = (b'S' as Word) << 24 | (b'F' as Word) << 16;

    /// Print full diagnostics for a memory-keyed shadow value.
    pub const PRINT_ERROR: Word = BASE;
    /// As [`PRINT_ERROR`], only when the relative error is nonzero.
    pub const COND_PRINT_ERROR: Word = BASE + 1;
    /// Dump the dependency graph of a memory-keyed shadow value.
    pub const DUMP_ERROR_GRAPH: Word = BASE + 2;
    /// As [`DUMP_ERROR_GRAPH`], only when the relative error is nonzero.
    pub const COND_DUMP_ERROR_GRAPH: Word = BASE + 3;
    /// Begin one iteration of a stage.
    pub const BEGIN_STAGE: Word = BASE + 4;
    /// End one iteration of a stage.
    pub const END_STAGE: Word = BASE + 5;
    /// Discard a stage's history.
    pub const CLEAR_STAGE: Word = BASE + 6;
    /// Compare a shadow's relative error against a bound.
    pub const ERROR_GREATER: Word = BASE + 7;
    /// Deactivate every shadow value.
    pub const RESET: Word = BASE + 8;
    /// Copy the shadow channel into the middle channel.
    pub const INSERT_SHADOW: Word = BASE + 9;
    /// Copy the middle channel into the shadow channel.
    pub const SET_SHADOW: Word = BASE + 10;
    /// Reset the shadow to the guest's IEEE value.
    pub const ORIGINAL_TO_SHADOW: Word = BASE + 11;
    /// Write the shadow back over the guest's IEEE value.
    pub const SHADOW_TO_ORIGINAL: Word = BASE + 12;
    /// Overwrite the guest IEEE value with given bytes.
    pub const SET_ORIGINAL: Word = BASE + 13;
    /// Copy shadow and middle channels between memory shadows.
    pub const SET_SHADOW_BY: Word = BASE + 14;
    /// Write the textual relative error into a guest buffer.
    pub const GET_RELATIVE_ERROR: Word = BASE + 15;
    /// Write the textual shadow value into a guest buffer.
    pub const GET_SHADOW: Word = BASE + 16;
    /// Print paired original and shadow values.
    pub const PRINT_VALUES: Word = BASE + 17;
    /// Enable analysis.
    pub const BEGIN: Word = BASE + 18;
    /// Disable analysis.
    pub const END: Word = BASE + 19;
    /// Begin a PSO detection run.
    pub const PSO_BEGIN_RUN: Word = BASE + 20;
    /// End a PSO detection run.
    pub const PSO_END_RUN: Word = BASE + 21;
    /// Begin a guest instance inside a PSO run.
    pub const PSO_BEGIN_INSTANCE: Word = BASE + 22;
    /// Query whether PSO detection converged.
    pub const IS_PSO_FINISHED: Word = BASE + 23;
}

/// A decoded client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequest {
    /// Print diagnostics for the shadow at `addr`, labeled by the guest
    /// string at `name`.
    PrintError {
        /// Guest pointer to a label string
        name: Addr,
        /// Queried address
        addr: Addr,
        /// Only print when the relative error is nonzero
        only_errors: bool,
    },
    /// Dump the dependency graph of the shadow at `addr` into files named
    /// after the guest string at `file`.
    DumpErrorGraph {
        /// Guest pointer to the file-name base
        file: Addr,
        /// Queried address
        addr: Addr,
        /// Only dump when the relative error is nonzero
        only_errors: bool,
    },
    /// Begin one iteration of stage `0`'s argument.
    BeginStage(u64),
    /// End one iteration.
    EndStage(u64),
    /// Discard a stage's history.
    ClearStage(u64),
    /// Is the relative error at `addr` at least the double at `bound`?
    ErrorGreater {
        /// Queried address
        addr: Addr,
        /// Guest pointer to the bound
        bound: Addr,
    },
    /// Deactivate every shadow value.
    Reset,
    /// Copy the shadow channel into the middle channel at guest precision.
    InsertShadow(Addr),
    /// Copy the middle channel into the shadow channel.
    SetShadow(Addr),
    /// Reset the shadow channels to the guest's IEEE value.
    OriginalToShadow(Addr),
    /// Round the shadow into the guest's IEEE value.
    ShadowToOriginal(Addr),
    /// Overwrite the guest IEEE value at `addr` with the bytes at `src`.
    SetOriginal {
        /// Target address
        addr: Addr,
        /// Guest pointer to replacement bytes
        src: Addr,
    },
    /// Copy shadow and middle channels from `src` to `dst`.
    SetShadowBy {
        /// Target address
        dst: Addr,
        /// Source address
        src: Addr,
    },
    /// Write the textual relative error of `addr` into the buffer at `buf`.
    GetRelativeError {
        /// Queried address
        addr: Addr,
        /// Guest output buffer
        buf: Addr,
    },
    /// Write the textual shadow value of `addr` into the buffer at `buf`.
    GetShadow {
        /// Queried address
        addr: Addr,
        /// Guest output buffer
        buf: Addr,
    },
    /// Print paired original and shadow values.
    PrintValues {
        /// Guest pointer to a label string
        name: Addr,
        /// Byte width of each element (4 or 8)
        width: u64,
        /// Queried address
        addr: Addr,
    },
    /// Enable analysis.
    Begin,
    /// Disable analysis.
    End,
    /// Begin a PSO detection run.
    PsoBeginRun,
    /// End a PSO detection run.
    PsoEndRun,
    /// Begin a guest instance inside a PSO run.
    PsoBeginInstance,
    /// Query whether PSO detection converged.
    IsPsoFinished,
}

impl ClientRequest {
    /// Decode a raw `(tag, args)` pair from the host's user-request
    /// mechanism.
    pub fn decode(tag: Word, args: [Word; 4]) -> Result<Self, EngineError> {
        let request = match tag {
            tags::PRINT_ERROR => Self::PrintError {
                name: args[0],
                addr: args[1],
                only_errors: false,
            },
            tags::COND_PRINT_ERROR => Self::PrintError {
                name: args[0],
                addr: args[1],
                only_errors: true,
            },
            tags::DUMP_ERROR_GRAPH => Self::DumpErrorGraph {
                file: args[0],
                addr: args[1],
                only_errors: false,
            },
            tags::COND_DUMP_ERROR_GRAPH => Self::DumpErrorGraph {
                file: args[0],
                addr: args[1],
                only_errors: true,
            },
            tags::BEGIN_STAGE => Self::BeginStage(args[0]),
            tags::END_STAGE => Self::EndStage(args[0]),
            tags::CLEAR_STAGE => Self::ClearStage(args[0]),
            tags::ERROR_GREATER => Self::ErrorGreater {
                addr: args[0],
                bound: args[1],
            },
            tags::RESET => Self::Reset,
            tags::INSERT_SHADOW => Self::InsertShadow(args[0]),
            tags::SET_SHADOW => Self::SetShadow(args[0]),
            tags::ORIGINAL_TO_SHADOW => Self::OriginalToShadow(args[0]),
            tags::SHADOW_TO_ORIGINAL => Self::ShadowToOriginal(args[0]),
            tags::SET_ORIGINAL => Self::SetOriginal {
                addr: args[0],
                src: args[1],
            },
            tags::SET_SHADOW_BY => Self::SetShadowBy {
                dst: args[0],
                src: args[1],
            },
            tags::GET_RELATIVE_ERROR => Self::GetRelativeError {
                addr: args[0],
                buf: args[1],
            },
            tags::GET_SHADOW => Self::GetShadow {
                addr: args[0],
                buf: args[1],
            },
            tags::PRINT_VALUES => Self::PrintValues {
                name: args[0],
                width: args[1],
                addr: args[2],
            },
            tags::BEGIN => Self::Begin,
            tags::END => Self::End,
            tags::PSO_BEGIN_RUN => Self::PsoBeginRun,
            tags::PSO_END_RUN => Self::PsoEndRun,
            tags::PSO_BEGIN_INSTANCE => Self::PsoBeginInstance,
            tags::IS_PSO_FINISHED => Self::IsPsoFinished,
            other => return Err(EngineError::UnknownClientRequest(other)),
        };

        Ok(request)
    }
}

impl<H> Engine<H>
where
    H: GuestHost,
{
    /// Handle one client request; some requests return a word.
    pub fn client_request(&mut self, request: ClientRequest) -> Result<Option<Word>, EngineError> {
        match request {
            ClientRequest::PrintError {
                name,
                addr,
                only_errors,
            } => {
                let label = self.host.read_str(name)?;
                self.print_error(&label, addr, only_errors);
                Ok(None)
            }

            ClientRequest::DumpErrorGraph {
                file,
                addr,
                only_errors,
            } => {
                if !self.options.error_localization {
                    return Ok(None);
                }
                let rel = self.relative_error_at(addr);
                if only_errors && rel == 0.0 {
                    return Ok(None);
                }
                let base = self.host.read_str(file)?;
                report::dump_error_graph(self, &base, addr)?;
                Ok(None)
            }

            ClientRequest::BeginStage(i) => {
                self.stages.start(i)?;
                Ok(None)
            }
            ClientRequest::EndStage(i) => {
                self.stages.end(i)?;
                Ok(None)
            }
            ClientRequest::ClearStage(i) => {
                self.stages.clear(i)?;
                Ok(None)
            }

            ClientRequest::ErrorGreater { addr, bound } => {
                let bound = self.host.read_f64(bound)?;
                let rel = self.relative_error_at(addr);
                Ok(Some(Word::from(rel.abs() >= bound)))
            }

            ClientRequest::Reset => {
                self.store.reset();
                Ok(None)
            }

            ClientRequest::InsertShadow(addr) => {
                if let Some(sv) = self.store.get_mem_mut(addr) {
                    let prec = sv.org.precision().unwrap_or(53);
                    sv.mid_value.set_prec(prec);
                    sv.mid_value.assign(&sv.value);
                }
                Ok(None)
            }

            ClientRequest::SetShadow(addr) => {
                if let Some(sv) = self.store.get_mem_mut(addr) {
                    sv.value.assign(&sv.mid_value);
                }
                Ok(None)
            }

            ClientRequest::OriginalToShadow(addr) => {
                let width = self
                    .store
                    .get_mem(addr)
                    .and_then(|sv| sv.org().precision())
                    .unwrap_or(53);
                let org = self.read_guest_ieee(addr, width)?;
                self.store.set_mem(addr).resync(org);
                Ok(None)
            }

            ClientRequest::ShadowToOriginal(addr) => {
                let Some(sv) = self.store.get_mem(addr) else {
                    return Ok(None);
                };
                let bytes = match sv.org() {
                    IeeeValue::F32(_) => sv.value().to_f32().to_le_bytes().to_vec(),
                    _ => sv.value().to_f64().to_le_bytes().to_vec(),
                };
                let width = if bytes.len() == 4 { 24 } else { 53 };
                self.host.write_bytes(addr, &bytes)?;
                let org = self.read_guest_ieee(addr, width)?;
                if let Some(sv) = self.store.get_mem_mut(addr) {
                    sv.org = org;
                }
                Ok(None)
            }

            ClientRequest::SetOriginal { addr, src } => {
                let width = self
                    .store
                    .get_mem(addr)
                    .and_then(|sv| sv.org().precision())
                    .unwrap_or(53);
                let len = if width == 24 { 4 } else { 8 };
                let mut bytes = vec![0u8; len];
                self.host.read_bytes(src, &mut bytes)?;
                self.host.write_bytes(addr, &bytes)?;
                let org = self.read_guest_ieee(addr, width)?;
                if let Some(sv) = self.store.get_mem_mut(addr) {
                    sv.org = org;
                }
                Ok(None)
            }

            ClientRequest::SetShadowBy { dst, src } => {
                let Some(source) = self.store.get_mem(src).cloned() else {
                    return Ok(None);
                };
                let sv = self.store.set_mem(dst);
                sv.value.set_prec(source.value().prec());
                sv.value.assign(source.value());
                sv.mid_value.set_prec(source.mid_value().prec());
                sv.mid_value.assign(source.mid_value());
                Ok(None)
            }

            ClientRequest::GetRelativeError { addr, buf } => {
                let rel = self.relative_error_at(addr);
                let text = format!("{rel:.10e}");
                self.host.write_str(buf, &text)?;
                Ok(None)
            }

            ClientRequest::GetShadow { addr, buf } => {
                let text = match self.store.get_mem(addr) {
                    Some(sv) => sv.value().to_string_radix(10, Some(30)),
                    None => "-".to_string(),
                };
                self.host.write_str(buf, &text)?;
                Ok(None)
            }

            ClientRequest::PrintValues { name, width, addr } => {
                let label = self.host.read_str(name)?;
                let original = if width == 4 {
                    f64::from(self.host.read_f32(addr)?)
                } else {
                    self.host.read_f64(addr)?
                };
                match self.store.get_mem(addr) {
                    Some(sv) => println!(
                        "{label}: original={original:e} shadow={}",
                        sv.value().to_string_radix(10, Some(30))
                    ),
                    None => println!("{label}: original={original:e} shadow=-"),
                }
                Ok(None)
            }

            ClientRequest::Begin => {
                self.enabled = true;
                Ok(None)
            }
            ClientRequest::End => {
                if !self.options.ignore_end {
                    self.enabled = false;
                }
                Ok(None)
            }

            ClientRequest::PsoBeginRun => {
                self.pso.begin_run();
                Ok(None)
            }
            ClientRequest::PsoEndRun => {
                self.pso.end_run()?;
                Ok(None)
            }
            ClientRequest::PsoBeginInstance => {
                self.pso.begin_instance();
                Ok(None)
            }
            ClientRequest::IsPsoFinished => Ok(Some(Word::from(self.pso.is_finished()))),
        }
    }

    fn relative_error_at(&self, addr: Addr) -> f64 {
        self.store
            .get_mem(addr)
            .map(|sv| sv.relative_error())
            .unwrap_or_default()
    }

    fn read_guest_ieee(&self, addr: Addr, width: u32) -> Result<IeeeValue, EngineError> {
        Ok(match width {
            24 => IeeeValue::F32(self.host.read_f32(addr)?),
            _ => IeeeValue::F64(self.host.read_f64(addr)?),
        })
    }

    fn print_error(&self, label: &str, addr: Addr, only_errors: bool) {
        let Some(sv) = self.store.get_mem(addr) else {
            if !only_errors {
                println!("{label} ({addr:#x}): no shadow value");
            }
            return;
        };

        let rel = sv.relative_error();
        if only_errors && rel == 0.0 {
            return;
        }

        let original = sv
            .org()
            .to_f64()
            .map(|v| format!("{v:e}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{label} ({addr:#x}): relative error {rel:.10e}, original {original}, \
             shadow {}, {} ops, {} bits canceled (max at {:#x}), origin {:#x}",
            sv.value().to_string_radix(10, Some(30)),
            sv.op_count(),
            sv.canceled(),
            sv.cancel_origin(),
            sv.origin(),
        );
        if let Some(location) = self.host.describe_origin(sv.origin()) {
            println!("  produced at {location}");
        }
    }
}
