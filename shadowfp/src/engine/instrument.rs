//! Block instrumenter
//!
//! Walks each translated guest superblock once, runs the dataflow passes,
//! and emits hook records next to the statements that affect shadow state.
//! The host appends the original IR verbatim and invokes the matching
//! callback with the dynamic operand values right after each statement
//! executes.

use super::dataflow::{self, resolve};
use super::Engine;
use crate::consts::{MAX_REGISTERS, REG_OFFSET_IP};
use crate::host::GuestHost;

use shadowfp_ir::{
    Addr, BinFpOp, Block, CircDescr, CvtOp, Expr, Operand, PassOp, RegOffset, Stmt, TempId,
    TriFpOp, Ty, UnFpOp,
};

/// One operand as the instrumenter resolved it: the original operand (the
/// host reads its runtime value from here) plus the temporary that carries
/// its shadow value after pass-through substitution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperandRef {
    /// Original IR operand.
    pub src: Operand,
    /// Shadow-carrying temporary, post substitution.
    pub sv_tmp: Option<TempId>,
}

/// Static half of a unary-operation callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnOpSite {
    /// Operation
    pub op: UnFpOp,
    /// Guest instruction address
    pub origin: Addr,
    /// Result temporary
    pub dst: TempId,
    /// Operand
    pub x: OperandRef,
}

/// Static half of a binary-operation callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinOpSite {
    /// Operation
    pub op: BinFpOp,
    /// Guest instruction address
    pub origin: Addr,
    /// Result temporary
    pub dst: TempId,
    /// First operand
    pub a: OperandRef,
    /// Second operand
    pub b: OperandRef,
}

/// Static half of a ternary-operation callback; the rounding-mode operand
/// is already dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriOpSite {
    /// Operation
    pub op: TriFpOp,
    /// Guest instruction address
    pub origin: Addr,
    /// Result temporary
    pub dst: TempId,
    /// First data operand
    pub a: OperandRef,
    /// Second data operand
    pub b: OperandRef,
}

/// Static half of a `CmpF64` callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CmpSite {
    /// Guest instruction address
    pub origin: Addr,
    /// Result temporary
    pub dst: TempId,
    /// First operand
    pub a: OperandRef,
    /// Second operand
    pub b: OperandRef,
}

/// Static half of a float-width pass-through callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WidenSite {
    /// Conversion
    pub op: PassOp,
    /// Guest instruction address
    pub origin: Addr,
    /// Result temporary
    pub dst: TempId,
    /// Value operand
    pub x: OperandRef,
}

/// Static half of a conversion callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CvtSite {
    /// Conversion
    pub op: CvtOp,
    /// Guest instruction address
    pub origin: Addr,
    /// Result temporary
    pub dst: TempId,
    /// Value operand
    pub x: OperandRef,
}

/// Static half of a load callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSite {
    /// Guest instruction address
    pub origin: Addr,
    /// Destination temporary
    pub dst: TempId,
    /// Width of the load
    pub ty: Ty,
    /// Address operand
    pub addr: Operand,
}

/// Static half of a store callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreSite {
    /// Guest instruction address
    pub origin: Addr,
    /// Address operand
    pub addr: Operand,
    /// Width of the store
    pub ty: Ty,
    /// Stored operand
    pub data: OperandRef,
}

/// Static half of a register-read callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GetSite {
    /// Guest instruction address
    pub origin: Addr,
    /// Destination temporary
    pub dst: TempId,
    /// Register byte offset
    pub offset: RegOffset,
    /// Width of the read
    pub ty: Ty,
}

/// Static half of a register-write callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PutSite {
    /// Guest instruction address
    pub origin: Addr,
    /// Register byte offset
    pub offset: RegOffset,
    /// Width of the write
    pub ty: Ty,
    /// Stored operand
    pub data: OperandRef,
}

/// Static half of a circular-read callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GetISite {
    /// Guest instruction address
    pub origin: Addr,
    /// Destination temporary
    pub dst: TempId,
    /// Array descriptor
    pub descr: CircDescr,
    /// Constant index bias
    pub bias: i64,
    /// Runtime index operand
    pub ix: Operand,
}

/// Static half of a circular-write callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PutISite {
    /// Guest instruction address
    pub origin: Addr,
    /// Array descriptor
    pub descr: CircDescr,
    /// Constant index bias
    pub bias: i64,
    /// Runtime index operand
    pub ix: Operand,
    /// Stored operand
    pub data: OperandRef,
}

/// Static half of a conditional-select callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MuxSite {
    /// Guest instruction address
    pub origin: Addr,
    /// Destination temporary
    pub dst: TempId,
    /// Condition operand
    pub cond: Operand,
    /// Value when the condition is zero
    pub zero: OperandRef,
    /// Value otherwise
    pub other: OperandRef,
}

/// A callback the host must invoke after the carrying statement executes.
#[derive(Debug, Clone, PartialEq)]
pub enum Hook {
    /// Increment the block counter; emitted at every block head.
    BlockEntry,
    /// Unary FP evaluation
    UnOp(UnOpSite),
    /// Binary FP evaluation
    BinOp(BinOpSite),
    /// Ternary FP evaluation
    TriOp(TriOpSite),
    /// Comparison; the returned encoding replaces the result temporary
    Cmp(CmpSite),
    /// Conversion; a returned word replaces the result temporary
    Cvt(CvtSite),
    /// Float-width pass-through transfer
    Widen(WidenSite),
    /// Memory-load transfer
    Load(LoadSite),
    /// Memory-store transfer
    Store(StoreSite),
    /// Register-read transfer
    Get(GetSite),
    /// Register-write transfer
    Put(PutSite),
    /// Circular register read
    GetI(GetISite),
    /// Circular register write
    PutI(PutISite),
    /// Conditional select
    Mux(MuxSite),
}

/// One original statement with the hooks to run after it.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentedStmt {
    /// The original statement, appended verbatim.
    pub stmt: Stmt,
    /// Hooks to invoke after the statement.
    pub hooks: Vec<Hook>,
}

/// The instrumenter's output for one guest superblock.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentedBlock {
    /// Hooks to run before the first statement.
    pub head: Vec<Hook>,
    /// Statements with their trailing hooks.
    pub stmts: Vec<InstrumentedStmt>,
}

impl<H> Engine<H>
where
    H: GuestHost,
{
    /// Instrument one freshly translated guest superblock.
    pub fn instrument_block(&mut self, block: &Block) -> InstrumentedBlock {
        let head = vec![Hook::BlockEntry];

        if self.options.ignore_libraries {
            if let Some(addr) = block.entry_addr() {
                if self.host.is_library_code(addr) {
                    let stmts = block
                        .stmts
                        .iter()
                        .cloned()
                        .map(|stmt| InstrumentedStmt {
                            stmt,
                            hooks: Vec::new(),
                        })
                        .collect();
                    return InstrumentedBlock { head, stmts };
                }
            }
        }

        let flow = dataflow::importance(block);
        let mut instead: Vec<Option<TempId>> = vec![None; block.tyenv.len()];
        let mut tmp_in_reg: Vec<Option<TempId>> = vec![None; MAX_REGISTERS];
        let mut origin: Addr = block.entry_addr().unwrap_or_default();
        let mut stmts = Vec::with_capacity(block.stmts.len());

        for (i, stmt) in block.stmts.iter().enumerate() {
            let mut hooks = Vec::new();

            match stmt {
                Stmt::IMark { addr, .. } => origin = *addr,

                Stmt::WrTmp { dst, rhs } => match rhs {
                    Expr::Unop { op, x } => {
                        if op.is_shadowed() {
                            hooks.push(Hook::UnOp(UnOpSite {
                                op: *op,
                                origin,
                                dst: *dst,
                                x: operand_ref(x, &instead),
                            }));
                        } else {
                            self.unsupported.insert(op.to_string());
                        }
                    }
                    Expr::Binop { op, a, b } => {
                        if *op == BinFpOp::CmpF64 {
                            hooks.push(Hook::Cmp(CmpSite {
                                origin,
                                dst: *dst,
                                a: operand_ref(a, &instead),
                                b: operand_ref(b, &instead),
                            }));
                        } else {
                            hooks.push(Hook::BinOp(BinOpSite {
                                op: *op,
                                origin,
                                dst: *dst,
                                a: operand_ref(a, &instead),
                                b: operand_ref(b, &instead),
                            }));
                        }
                    }
                    Expr::Triop { op, rm: _, a, b } => {
                        if op.is_shadowed() {
                            hooks.push(Hook::TriOp(TriOpSite {
                                op: *op,
                                origin,
                                dst: *dst,
                                a: operand_ref(a, &instead),
                                b: operand_ref(b, &instead),
                            }));
                        } else {
                            self.unsupported.insert(op.to_string());
                        }
                    }
                    Expr::Cvt { op, rm: _, x } => {
                        if self.options.track_int {
                            hooks.push(Hook::Cvt(CvtSite {
                                op: *op,
                                origin,
                                dst: *dst,
                                x: operand_ref(x, &instead),
                            }));
                        }
                    }
                    Expr::Pass { op, x, y } => {
                        if op.converts_width() {
                            // Width conversions re-home the shadow at the
                            // new width; the captured guest result cannot
                            // keep its old type.
                            if flow.imp_tmp[*dst] == 1 {
                                hooks.push(Hook::Widen(WidenSite {
                                    op: *op,
                                    origin,
                                    dst: *dst,
                                    x: operand_ref(x, &instead),
                                }));
                            }
                        } else {
                            // Shadow identity follows the value-carrying
                            // half: the low lane for the HL packing forms.
                            let followed = if op.is_binary() {
                                y.as_ref().and_then(Operand::tmp)
                            } else {
                                x.tmp()
                            };
                            instead[*dst] = followed.map(|t| resolve(&instead, t));
                        }
                    }
                    Expr::Tmp(t) => instead[*dst] = Some(resolve(&instead, *t)),
                    Expr::Get { offset, ty } => {
                        if let Some(t) = tmp_in_reg[*offset] {
                            instead[*dst] = Some(t);
                        } else if ty.is_float() && flow.imp_tmp[*dst] == 1 {
                            hooks.push(Hook::Get(GetSite {
                                origin,
                                dst: *dst,
                                offset: *offset,
                                ty: *ty,
                            }));
                        }
                    }
                    Expr::GetI { descr, ix, bias } => {
                        if descr.elem_ty.is_float() && flow.imp_tmp[*dst] == 1 {
                            hooks.push(Hook::GetI(GetISite {
                                origin,
                                dst: *dst,
                                descr: *descr,
                                bias: *bias,
                                ix: *ix,
                            }));
                        }
                    }
                    Expr::Load { addr, ty } => {
                        // Constant-address loads never carry program data
                        // the shadow could follow.
                        if addr.tmp().is_some() && ty.is_float() && flow.imp_tmp[*dst] == 1 {
                            hooks.push(Hook::Load(LoadSite {
                                origin,
                                dst: *dst,
                                ty: *ty,
                                addr: *addr,
                            }));
                        }
                    }
                    Expr::Mux0X { cond, zero, other } => {
                        if flow.imp_tmp[*dst] == 1 {
                            hooks.push(Hook::Mux(MuxSite {
                                origin,
                                dst: *dst,
                                cond: *cond,
                                zero: operand_ref(zero, &instead),
                                other: operand_ref(other, &instead),
                            }));
                        }
                    }
                    Expr::Const(_) => {}
                },

                Stmt::Put { offset, src } => {
                    if *offset != REG_OFFSET_IP && flow.live_put[i] {
                        hooks.push(Hook::Put(PutSite {
                            origin,
                            offset: *offset,
                            ty: block.ty_of(src),
                            data: operand_ref(src, &instead),
                        }));
                    }
                    tmp_in_reg[*offset] = src.tmp().map(|t| resolve(&instead, t));
                }

                Stmt::PutI {
                    descr,
                    ix,
                    bias,
                    src,
                } => {
                    hooks.push(Hook::PutI(PutISite {
                        origin,
                        descr: *descr,
                        bias: *bias,
                        ix: *ix,
                        data: operand_ref(src, &instead),
                    }));
                    for k in 0..descr.n_elems {
                        let offset = descr.base + k * descr.elem_ty.size();
                        if offset < MAX_REGISTERS {
                            tmp_in_reg[offset] = None;
                        }
                    }
                }

                Stmt::Store { addr, src } => {
                    hooks.push(Hook::Store(StoreSite {
                        origin,
                        addr: *addr,
                        ty: block.ty_of(src),
                        data: operand_ref(src, &instead),
                    }));
                }

                Stmt::NoOp => {}
            }

            stmts.push(InstrumentedStmt {
                stmt: stmt.clone(),
                hooks,
            });
        }

        InstrumentedBlock { head, stmts }
    }
}

fn operand_ref(operand: &Operand, instead: &[Option<TempId>]) -> OperandRef {
    OperandRef {
        src: *operand,
        sv_tmp: operand.tmp().map(|t| resolve(instead, t)),
    }
}
