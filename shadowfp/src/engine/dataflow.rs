//! Per-block dataflow
//!
//! Two static passes decide which intermediates need shadow tracking. The
//! backward pass propagates importance: a temporary matters only if some
//! downstream consumer (an FP operation, a store, a live register write)
//! can observe its shadow. The forward pass, interleaved with emission in
//! the instrumenter, resolves pass-through chains so operand lookups reach
//! the temporary that actually carries the shadow value.

use crate::consts::MAX_REGISTERS;

use shadowfp_ir::{Block, Expr, Operand, Stmt, TempId};

/// Importance of a temporary: `1` needed for shadow, `-1` known unused,
/// `0` never consulted.
pub(crate) type Importance = i8;

#[derive(Debug)]
pub(crate) struct BlockFlow {
    /// Per-temporary importance.
    pub imp_tmp: Vec<Importance>,
    /// Per-statement flag for `Put`: false when a later write to the same
    /// offset makes the register state unobservable.
    pub live_put: Vec<bool>,
}

/// Backward importance pass.
pub(crate) fn importance(block: &Block) -> BlockFlow {
    let mut imp_reg = [true; MAX_REGISTERS];
    let mut imp_tmp = vec![0i8; block.tyenv.len()];
    let mut live_put = vec![true; block.stmts.len()];

    let need = |imp_tmp: &mut Vec<i8>, operand: &Operand| {
        if let Some(t) = operand.tmp() {
            imp_tmp[t] = 1;
        }
    };
    let weak = |imp_tmp: &mut Vec<i8>, operand: &Operand| {
        if let Some(t) = operand.tmp() {
            if imp_tmp[t] == 0 {
                imp_tmp[t] = -1;
            }
        }
    };

    for (i, stmt) in block.stmts.iter().enumerate().rev() {
        match stmt {
            Stmt::Put { offset, src } => {
                live_put[i] = imp_reg[*offset];
                imp_reg[*offset] = false;
                need(&mut imp_tmp, src);
            }
            Stmt::PutI { src, ix, .. } => {
                need(&mut imp_tmp, src);
                weak(&mut imp_tmp, ix);
            }
            Stmt::Store { addr, src } => {
                need(&mut imp_tmp, src);
                weak(&mut imp_tmp, addr);
            }
            Stmt::WrTmp { rhs, .. } => match rhs {
                Expr::Unop { x, .. } => need(&mut imp_tmp, x),
                Expr::Binop { a, b, .. } => {
                    need(&mut imp_tmp, a);
                    need(&mut imp_tmp, b);
                }
                Expr::Triop { rm, a, b, .. } => {
                    weak(&mut imp_tmp, rm);
                    need(&mut imp_tmp, a);
                    need(&mut imp_tmp, b);
                }
                Expr::Cvt { rm, x, .. } => {
                    weak(&mut imp_tmp, rm);
                    need(&mut imp_tmp, x);
                }
                Expr::Pass { x, y, .. } => {
                    need(&mut imp_tmp, x);
                    if let Some(y) = y {
                        need(&mut imp_tmp, y);
                    }
                }
                Expr::Mux0X { cond, zero, other } => {
                    weak(&mut imp_tmp, cond);
                    need(&mut imp_tmp, zero);
                    need(&mut imp_tmp, other);
                }
                Expr::Tmp(t) => imp_tmp[*t] = 1,
                Expr::Get { offset, .. } => imp_reg[*offset] = true,
                Expr::GetI { descr, ix, .. } => {
                    weak(&mut imp_tmp, ix);
                    // The rotating index is dynamic; every element of the
                    // array may be read.
                    for k in 0..descr.n_elems {
                        let offset = descr.base + k * descr.elem_ty.size();
                        if offset < MAX_REGISTERS {
                            imp_reg[offset] = true;
                        }
                    }
                }
                Expr::Load { addr, .. } => weak(&mut imp_tmp, addr),
                Expr::Const(_) => {}
            },
            Stmt::IMark { .. } | Stmt::NoOp => {}
        }
    }

    BlockFlow { imp_tmp, live_put }
}

/// Resolve a temporary through the substitution chain.
pub(crate) fn resolve(instead: &[Option<TempId>], t: TempId) -> TempId {
    instead[t].unwrap_or(t)
}
