//! State-transfer handlers
//!
//! Shadow propagation between temporaries, guest registers and guest
//! memory. Any write to a carrier kills the shadow living there unless the
//! written value carries a tracked shadow itself; reads drift-check the
//! carrier against the bits the guest actually observed.

use super::Engine;
use crate::args::{
    GetArgs, GetIArgs, LoadArgs, MuxArgs, PutArgs, PutIArgs, StoreArgs, WidenArgs,
};
use crate::error::{Bug, EngineError};
use crate::host::GuestHost;
use crate::shadow::{IeeeValue, ShadowValue};

use rug::float::Round;
use shadowfp_ir::{PassOp, ThreadId};

/// Drift-check a carrier's shadow entry against the bits the guest just
/// observed there, resynchronizing on mismatch. A captured origin type
/// whose width disagrees with the width being read is a broken invariant
/// and fatal.
fn check_and_recover(sv: &mut ShadowValue, current: IeeeValue) -> Result<(), Bug> {
    let (Some(cur), Some(org)) = (current.bits(), sv.org.bits()) else {
        return Ok(());
    };
    if current.precision() != sv.org.precision() {
        return Err(Bug::InconsistentOrgType(sv.origin));
    }
    if cur != org {
        tracing::debug!(
            origin = %format_args!("{:#x}", sv.origin),
            "shadow drifted from guest state; resynchronized"
        );
        sv.resync(current);
    }
    Ok(())
}

impl<H> Engine<H>
where
    H: GuestHost,
{
    /// Load transfer: `tmp <- mem[addr]`.
    pub fn process_load(&mut self, args: &LoadArgs) -> Result<(), EngineError> {
        if !self.enabled {
            return Ok(());
        }

        let block = self.block_count;
        if let Some(sv) = self.store.get_mem_mut(args.addr) {
            let current = IeeeValue::from_ty_bits(args.ty, args.out, args.out_hi);
            check_and_recover(sv, current)?;
            self.store.copy_mem_to_temp(args.addr, args.dst, block);
        }
        Ok(())
    }

    /// Store transfer: `mem[addr] <- tmp`.
    ///
    /// A tracked source copies its shadow into the memory entry and
    /// captures the stored guest value; an untracked source deactivates
    /// whatever shadow lived at the address. Tracked stores feed every
    /// active stage.
    pub fn process_store(&mut self, args: &StoreArgs) {
        if !self.enabled {
            return;
        }

        let block = self.block_count;
        let tracked = args
            .data
            .tmp
            .is_some_and(|t| self.store.copy_temp_to_mem(t, block, args.addr));

        if !tracked {
            self.store.deactivate_mem(args.addr);
            return;
        }

        let org = IeeeValue::from_ty_bits(args.ty, args.data.bits, args.data_hi);
        if let Some(sv) = self.store.get_mem_mut(args.addr) {
            sv.org = org;
            let rel_error = sv.relative_error();
            let value = org.to_f64().unwrap_or_default();
            self.stages.record_store(args.addr, value, rel_error);
        }
    }

    /// Register-read transfer: `tmp <- reg[offset]`.
    pub fn process_get(&mut self, tid: ThreadId, args: &GetArgs) -> Result<(), EngineError> {
        if !self.enabled {
            return Ok(());
        }

        let block = self.block_count;
        if let Some(sv) = self.store.get_reg_mut(tid, args.offset) {
            let current = IeeeValue::from_ty_bits(args.ty, args.out, args.out_hi);
            check_and_recover(sv, current)?;
            self.store.copy_reg_to_temp(tid, args.offset, args.dst, block);
        }
        Ok(())
    }

    /// Register-write transfer: `reg[offset] <- tmp`.
    pub fn process_put(&mut self, tid: ThreadId, args: &PutArgs) {
        if !self.enabled {
            return;
        }

        let block = self.block_count;
        let tracked = args
            .data
            .tmp
            .is_some_and(|t| self.store.copy_temp_to_reg(t, block, tid, args.offset));

        if !tracked {
            self.store.deactivate_reg(tid, args.offset);
            return;
        }

        if let Some(sv) = self.store.get_reg_mut(tid, args.offset) {
            sv.org = IeeeValue::from_ty_bits(args.ty, args.data.bits, args.data_hi);
        }
    }

    /// Circular register read, resolved to a flat offset.
    pub fn process_get_i(&mut self, tid: ThreadId, args: &GetIArgs) -> Result<(), EngineError> {
        if !self.enabled {
            return Ok(());
        }

        let offset = args.descr.offset(args.ix, args.bias);
        let block = self.block_count;
        if let Some(sv) = self.store.get_reg_mut(tid, offset) {
            let current = IeeeValue::from_ty_bits(args.descr.elem_ty, args.out, 0);
            check_and_recover(sv, current)?;
            self.store.copy_reg_to_temp(tid, offset, args.dst, block);
        }
        Ok(())
    }

    /// Circular register write, resolved to a flat offset.
    pub fn process_put_i(&mut self, tid: ThreadId, args: &PutIArgs) {
        if !self.enabled {
            return;
        }

        let offset = args.descr.offset(args.ix, args.bias);
        let block = self.block_count;
        let tracked = args
            .data
            .tmp
            .is_some_and(|t| self.store.copy_temp_to_reg(t, block, tid, offset));

        if !tracked {
            self.store.deactivate_reg(tid, offset);
            return;
        }

        if let Some(sv) = self.store.get_reg_mut(tid, offset) {
            sv.org = IeeeValue::from_ty_bits(args.descr.elem_ty, args.data.bits, 0);
        }
    }

    /// Float-width pass-through: the shadow follows the value across the
    /// width change, with the guest capture and the guest-precision
    /// channels re-homed at the destination width.
    pub fn process_widen(&mut self, args: &WidenArgs) -> Result<(), EngineError> {
        if !self.enabled {
            return Ok(());
        }
        let (src_prec, dst_prec) = match args.op {
            PassOp::F32toF64 => (24, 53),
            PassOp::F64toF32 => (53, 24),
            _ => return Ok(()),
        };

        let block = self.block_count;
        let Some(t) = args.x.tmp else {
            return Ok(());
        };
        let Some(sv) = self.store.get_temp_mut(t, block) else {
            return Ok(());
        };

        let current = IeeeValue::from_precision(src_prec, args.x.bits);
        check_and_recover(sv, current)?;
        self.store.copy_temp_to_temp(t, args.dst, block);

        if let Some(sv) = self.store.get_temp_mut(args.dst, block) {
            let _ = sv.mid_value.set_prec_round(dst_prec, Round::Nearest);
            let _ = sv.ori_value.set_prec_round(dst_prec, Round::Nearest);
            sv.org = IeeeValue::from_precision(dst_prec, args.out);
        }
        Ok(())
    }

    /// Conditional select: the shadow follows whichever side the guest
    /// condition picked; a side without a shadow leaves the destination
    /// untracked.
    pub fn process_mux(&mut self, args: &MuxArgs) {
        if !self.enabled {
            return;
        }

        let selected = if args.cond == 0 { &args.zero } else { &args.other };
        if let Some(t) = selected.tmp {
            let block = self.block_count;
            self.store.copy_temp_to_temp(t, args.dst, block);
        }
    }
}
