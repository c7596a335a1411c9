//! Operation evaluator
//!
//! Every intercepted FP operation is lifted into three parallel
//! evaluations: the high-precision shadow, the guest-precision middle
//! channel, and the simulated original with IEEE range emulation. Operand
//! shadows are drift-checked before consumption; results carry dependency
//! metadata (operation count, max-propagated cancellation) and feed the
//! diagnostic accumulators.

use super::Engine;
use crate::args::{BinOpArgs, CmpArgs, CvtArgs, OperandSlot, TriOpArgs, UnOpArgs};
use crate::error::{Bug, EngineError};
use crate::host::GuestHost;
use crate::numeric::{self, BinPrim, UnPrim};
use crate::shadow::IeeeValue;

use rug::float::Round;
use rug::{Assign, Float};
use shadowfp_ir::{Addr, BinFpOp, CmpResult, CvtOp, TempId, TriFpOp, UnFpOp, Word};

/// One operand after resolution: the three channel seeds plus the
/// metadata inherited from its shadow value.
struct Resolved {
    value: Float,
    mid: Float,
    ori: Float,
    op_count: u64,
    canceled: u64,
    cancel_origin: Addr,
    origin: Addr,
    rel_error: f64,
    guest: f64,
}

fn guest_value(prec: u32, bits: u64) -> f64 {
    match prec {
        24 => f64::from(f32::from_bits(bits as u32)),
        _ => f64::from_bits(bits),
    }
}

const fn un_prim(op: UnFpOp) -> Option<UnPrim> {
    match op {
        UnFpOp::NegF32 | UnFpOp::NegF64 => Some(UnPrim::Neg),
        UnFpOp::AbsF32 | UnFpOp::AbsF64 => Some(UnPrim::Abs),
        UnFpOp::SqrtF32 | UnFpOp::SqrtF64 => Some(UnPrim::Sqrt),
        _ => None,
    }
}

const fn bin_prim(op: BinFpOp) -> Option<BinPrim> {
    match op {
        BinFpOp::AddF32 | BinFpOp::AddF64 => Some(BinPrim::Add),
        BinFpOp::SubF32 | BinFpOp::SubF64 => Some(BinPrim::Sub),
        BinFpOp::MulF32 | BinFpOp::MulF64 => Some(BinPrim::Mul),
        BinFpOp::DivF32 | BinFpOp::DivF64 => Some(BinPrim::Div),
        BinFpOp::MinF32 | BinFpOp::MinF64 => Some(BinPrim::Min),
        BinFpOp::MaxF32 | BinFpOp::MaxF64 => Some(BinPrim::Max),
        BinFpOp::CmpF64 => None,
    }
}

const fn tri_prim(op: TriFpOp) -> Option<BinPrim> {
    match op {
        TriFpOp::AddF32 | TriFpOp::AddF64 => Some(BinPrim::Add),
        TriFpOp::SubF32 | TriFpOp::SubF64 => Some(BinPrim::Sub),
        TriFpOp::MulF32 | TriFpOp::MulF64 => Some(BinPrim::Mul),
        TriFpOp::DivF32 | TriFpOp::DivF64 => Some(BinPrim::Div),
        TriFpOp::Atan2F64 | TriFpOp::ScaleBF64 => None,
    }
}

impl<H> Engine<H>
where
    H: GuestHost,
{
    /// Resolve one operand to its three channel seeds.
    ///
    /// A present shadow entry is drift-checked first: when the captured
    /// guest result no longer matches the operand's current bits, an
    /// untracked operation mutated the carrier and every channel resyncs
    /// to the guest value before it is consumed. A captured origin type
    /// whose width disagrees with the consuming operation is a broken
    /// invariant and fatal. Untracked operands seed all channels from the
    /// guest value.
    fn resolve_operand(&mut self, slot: &OperandSlot, prec: u32) -> Result<Resolved, Bug> {
        let guest = guest_value(prec, slot.bits);
        let block = self.block_count;

        let sv = slot.tmp.and_then(|t| self.store.get_temp_mut(t, block));
        if let Some(sv) = sv {
            if let Some(width) = sv.org.precision() {
                if width != prec {
                    return Err(Bug::InconsistentOrgType(sv.origin));
                }
                if !sv.org.matches_bits(slot.bits) {
                    tracing::debug!(
                        origin = %format_args!("{:#x}", sv.origin),
                        guest,
                        "shadow drifted from guest state; resynchronized"
                    );
                    sv.resync(IeeeValue::from_precision(prec, slot.bits));
                }
            }

            return Ok(Resolved {
                value: sv.value.clone(),
                mid: sv.mid_value.clone(),
                ori: sv.ori_value.clone(),
                op_count: sv.op_count,
                canceled: sv.canceled,
                cancel_origin: sv.cancel_origin,
                origin: sv.origin,
                rel_error: sv.relative_error(),
                guest,
            });
        }

        Ok(Resolved {
            value: Float::with_val(self.value_precision(prec), guest),
            mid: Float::with_val(prec, guest),
            ori: Float::with_val(prec, guest),
            op_count: 0,
            canceled: 0,
            cancel_origin: 0,
            origin: 0,
            rel_error: 0.0,
            guest,
        })
    }

    /// Whether the middle channel must be substituted at `origin`.
    fn pso_fix_at(&self, origin: Addr) -> bool {
        self.options.detect_pso && self.pso.is_detected(origin)
    }

    /// Unary FP operation callback.
    pub fn process_un_op(&mut self, args: &UnOpArgs) -> Result<(), EngineError> {
        if !self.enabled {
            return Ok(());
        }
        let Some(prim) = un_prim(args.op) else {
            return Ok(());
        };
        let prec = args.op.precision();
        let pso_fix = self.pso_fix_at(args.origin);

        let mut x = self.resolve_operand(&args.x, prec)?;
        if pso_fix {
            x.mid = Float::with_val_round(prec, &x.value, Round::Nearest).0;
        }

        let mut value = numeric::eval_un(prim, self.value_precision(prec), false, &x.value);
        let mid = numeric::eval_un(prim, prec, false, &x.mid);
        let ori = numeric::eval_un(prim, prec, true, &x.ori);
        if pso_fix {
            value = Float::with_val(self.value_precision(prec), &mid);
        }

        let org = IeeeValue::from_precision(prec, args.out);
        let rel_out = numeric::relative_error(&value, org.to_f64().unwrap_or_default());

        if self.options.mean_error {
            self.mean_values
                .record(args.origin, rel_out, 0, 0, (x.origin, 0));
        }
        if self.options.detect_pso {
            let original = org.to_f64().unwrap_or_default();
            let shadow = value.to_f64();
            self.pso
                .analyze(args.origin, x.rel_error, rel_out, original, shadow);
        }
        self.note_error(args.origin, rel_out);

        let op_count = x.op_count + 1;
        let sv = self.store.set_temp(args.dst, self.block_count);
        sv.value = value;
        sv.mid_value = mid;
        sv.ori_value = ori;
        sv.op_count = op_count;
        sv.origin = args.origin;
        sv.canceled = x.canceled;
        sv.cancel_origin = x.cancel_origin;
        sv.org = org;

        Ok(())
    }

    /// Binary FP operation callback.
    pub fn process_bin_op(&mut self, args: &BinOpArgs) -> Result<(), EngineError> {
        if !self.enabled {
            return Ok(());
        }
        let Some(prim) = bin_prim(args.op) else {
            return Ok(());
        };

        self.process_arith(
            prim,
            args.op.precision(),
            args.op.cancels(),
            args.origin,
            args.dst,
            &args.a,
            &args.b,
            args.out,
        )
    }

    /// Ternary (rounded-form) FP operation callback.
    pub fn process_tri_op(&mut self, args: &TriOpArgs) -> Result<(), EngineError> {
        if !self.enabled {
            return Ok(());
        }
        let Some(prim) = tri_prim(args.op) else {
            return Ok(());
        };

        self.process_arith(
            prim,
            args.op.precision(),
            args.op.cancels(),
            args.origin,
            args.dst,
            &args.a,
            &args.b,
            args.out,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn process_arith(
        &mut self,
        prim: BinPrim,
        prec: u32,
        cancels: bool,
        origin: Addr,
        dst: TempId,
        a_slot: &OperandSlot,
        b_slot: &OperandSlot,
        out: u64,
    ) -> Result<(), EngineError> {
        let pso_fix = self.pso_fix_at(origin);

        let mut a = self.resolve_operand(a_slot, prec)?;
        let mut b = self.resolve_operand(b_slot, prec)?;
        if pso_fix {
            a.mid = Float::with_val_round(prec, &a.value, Round::Nearest).0;
            b.mid = Float::with_val_round(prec, &b.value, Round::Nearest).0;
        }

        let vprec = self.value_precision(prec);
        let mut value = numeric::eval_bin(prim, vprec, false, &a.value, &b.value);
        let mid = numeric::eval_bin(prim, prec, false, &a.mid, &b.mid);
        let ori = numeric::eval_bin(prim, prec, true, &a.ori, &b.ori);

        // Cancellation is measured on the shadow channel and max-propagated
        // with the operands' dependency metadata.
        let local_cancel = if cancels {
            numeric::cancellation_bits(&a.value, &b.value, &value)
        } else {
            0
        };
        let badness = if local_cancel > 0 {
            let exact_a = numeric::exact_bits(&a.value, a.guest, prec);
            let exact_b = numeric::exact_bits(&b.value, b.guest, prec);
            local_cancel.saturating_sub(exact_a.min(exact_b))
        } else {
            0
        };

        let mut canceled = local_cancel;
        let mut cancel_origin = if local_cancel > 0 { origin } else { 0 };
        if a.canceled > canceled {
            canceled = a.canceled;
            cancel_origin = a.cancel_origin;
        }
        if b.canceled > canceled {
            canceled = b.canceled;
            cancel_origin = b.cancel_origin;
        }

        // The runtime fix for a detected PSO site: the middle channel,
        // computed from high-precision seeds, replaces the shadow.
        if pso_fix {
            value = Float::with_val(vprec, &mid);
        }

        let org = IeeeValue::from_precision(prec, out);
        let rel_out = numeric::relative_error(&value, org.to_f64().unwrap_or_default());

        if self.options.mean_error {
            self.mean_values
                .record(origin, rel_out, local_cancel, badness, (a.origin, b.origin));
        }
        if self.options.detect_pso {
            let original = org.to_f64().unwrap_or_default();
            let shadow = value.to_f64();
            self.pso.analyze(
                origin,
                a.rel_error.max(b.rel_error),
                rel_out,
                original,
                shadow,
            );
        }
        self.note_error(origin, rel_out);

        let op_count = a.op_count.max(b.op_count) + 1;
        let sv = self.store.set_temp(dst, self.block_count);
        sv.value = value;
        sv.mid_value = mid;
        sv.ori_value = ori;
        sv.op_count = op_count;
        sv.origin = origin;
        sv.canceled = canceled;
        sv.cancel_origin = cancel_origin;
        sv.org = org;

        Ok(())
    }

    /// `CmpF64` callback. Always returns one of the comparison encodings;
    /// the host writes the returned word into the result temporary, so a
    /// divergent shadow ordering steers the guest's subsequent branches
    /// when that mode is on.
    pub fn process_cmp(&mut self, args: &CmpArgs) -> Result<CmpResult, EngineError> {
        let guest = CmpResult::from_word(args.out);
        if !self.enabled {
            return Ok(guest);
        }

        let a = self.resolve_operand(&args.a, 53)?;
        let b = self.resolve_operand(&args.b, 53)?;
        let shadow = CmpResult::from_ordering(a.value.partial_cmp(&b.value));

        if shadow != guest && self.options.goto_shadow_branch {
            let location = self.host.describe_origin(args.origin);
            self.branches
                .record(args.origin, guest, shadow, location.as_deref());
            return Ok(shadow);
        }

        Ok(guest)
    }

    /// Float-to-integer conversion callback. In track-int mode the
    /// returned word, derived from the shadow, replaces the guest result:
    /// the shadow is read as a double (round-nearest-even) and truncated
    /// toward zero with saturation at the target bounds.
    pub fn process_cvt(&mut self, args: &CvtArgs) -> Result<Option<Word>, EngineError> {
        if !self.enabled || !self.options.track_int {
            return Ok(None);
        }

        let x = self.resolve_operand(&args.x, 53)?;
        let d = x.value.to_f64();
        let (word, converted) = convert(args.op, d);
        let vprec = self.value_precision(53);

        let sv = self.store.set_temp(args.dst, self.block_count);
        sv.value.set_prec(vprec);
        sv.value.assign(converted);
        sv.mid_value.set_prec(53);
        sv.mid_value.assign(converted);
        sv.ori_value.set_prec(53);
        sv.ori_value.assign(converted);
        sv.op_count = x.op_count + 1;
        sv.origin = args.origin;
        sv.canceled = x.canceled;
        sv.cancel_origin = x.cancel_origin;
        sv.org = IeeeValue::Invalid;

        Ok(Some(word))
    }

    fn note_error(&self, origin: Addr, rel_error: f64) {
        if self.options.print_every_error && rel_error > 0.0 {
            tracing::info!(
                origin = %format_args!("{origin:#x}"),
                relative_error = rel_error,
                "relative error observed"
            );
        }
    }
}

fn convert(op: CvtOp, d: f64) -> (Word, f64) {
    match op {
        CvtOp::F64toI16S => {
            let v = d as i16;
            (v as u16 as Word, f64::from(v))
        }
        CvtOp::F64toI32S => {
            let v = d as i32;
            (v as u32 as Word, f64::from(v))
        }
        CvtOp::F64toI64S => {
            let v = d as i64;
            (v as Word, v as f64)
        }
        CvtOp::F64toI16U => {
            let v = d as u16;
            (Word::from(v), f64::from(v))
        }
        CvtOp::F64toI32U => {
            let v = d as u32;
            (Word::from(v), f64::from(v))
        }
        CvtOp::F64toI64U => {
            let v = d as u64;
            (v, v as f64)
        }
    }
}
