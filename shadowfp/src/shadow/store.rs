use crate::consts::{MAX_REGISTERS, MAX_TEMPS};
use crate::shadow::ShadowValue;

use shadowfp_ir::{Addr, RegOffset, TempId, ThreadId};

use std::collections::HashMap;

#[derive(Debug, Clone)]
struct TempSlot {
    version: u64,
    active: bool,
    sv: ShadowValue,
}

#[derive(Debug, Clone)]
struct Slot {
    active: bool,
    sv: ShadowValue,
}

/// Carrier tables for shadow values.
///
/// Temporaries are versioned by the process-wide block counter: an entry is
/// present only while its version equals the current count. Register slots
/// are per guest thread. Memory entries are allocated on the first tracked
/// store and never removed; deactivation toggles the `active` flag.
///
/// Activation transitions are counted; at clean termination
/// `allocs - frees` must equal the number of live entries.
#[derive(Debug, Clone)]
pub struct ShadowStore {
    precision: u32,
    temps: Vec<Option<TempSlot>>,
    registers: HashMap<ThreadId, Vec<Option<Slot>>>,
    memory: HashMap<Addr, Slot>,
    allocs: u64,
    frees: u64,
}

impl ShadowStore {
    /// New store whose `value` channels use `precision` bits.
    pub fn new(precision: u32) -> Self {
        Self {
            precision,
            temps: (0..MAX_TEMPS).map(|_| None).collect(),
            registers: HashMap::new(),
            memory: HashMap::new(),
            allocs: 0,
            frees: 0,
        }
    }

    /// Precision of newly allocated `value` channels.
    pub const fn precision(&self) -> u32 {
        self.precision
    }

    /// Shadow value of temporary `t`, present only at the current block.
    pub fn get_temp(&self, t: TempId, block: u64) -> Option<&ShadowValue> {
        self.temps[t]
            .as_ref()
            .filter(|slot| slot.active && slot.version == block)
            .map(|slot| &slot.sv)
    }

    /// Mutable variant of [`ShadowStore::get_temp`].
    pub fn get_temp_mut(&mut self, t: TempId, block: u64) -> Option<&mut ShadowValue> {
        self.temps[t]
            .as_mut()
            .filter(|slot| slot.active && slot.version == block)
            .map(|slot| &mut slot.sv)
    }

    /// Revive or allocate the shadow entry for temporary `t`, stamping the
    /// current block as its version.
    pub fn set_temp(&mut self, t: TempId, block: u64) -> &mut ShadowValue {
        let precision = self.precision;
        let slot = self.temps[t].get_or_insert_with(|| {
            TempSlot {
                version: block,
                active: false,
                sv: ShadowValue::new(precision),
            }
        });

        if !slot.active {
            self.allocs += 1;
        }
        slot.active = true;
        slot.version = block;
        &mut slot.sv
    }

    /// Shadow value at register byte offset `offset` of thread `tid`.
    pub fn get_reg(&self, tid: ThreadId, offset: RegOffset) -> Option<&ShadowValue> {
        self.registers
            .get(&tid)
            .and_then(|file| file[offset].as_ref())
            .filter(|slot| slot.active)
            .map(|slot| &slot.sv)
    }

    /// Mutable variant of [`ShadowStore::get_reg`].
    pub fn get_reg_mut(&mut self, tid: ThreadId, offset: RegOffset) -> Option<&mut ShadowValue> {
        self.registers
            .get_mut(&tid)
            .and_then(|file| file[offset].as_mut())
            .filter(|slot| slot.active)
            .map(|slot| &mut slot.sv)
    }

    /// Activate and return the register shadow entry for `(tid, offset)`.
    pub fn set_reg(&mut self, tid: ThreadId, offset: RegOffset) -> &mut ShadowValue {
        let precision = self.precision;
        let file = self
            .registers
            .entry(tid)
            .or_insert_with(|| (0..MAX_REGISTERS).map(|_| None).collect());
        let slot = file[offset].get_or_insert_with(|| Slot {
            active: false,
            sv: ShadowValue::new(precision),
        });

        if !slot.active {
            self.allocs += 1;
        }
        slot.active = true;
        &mut slot.sv
    }

    /// Deactivate the register shadow entry at `(tid, offset)`, if any.
    pub fn deactivate_reg(&mut self, tid: ThreadId, offset: RegOffset) {
        if let Some(slot) = self
            .registers
            .get_mut(&tid)
            .and_then(|file| file[offset].as_mut())
        {
            if slot.active {
                slot.active = false;
                self.frees += 1;
            }
        }
    }

    /// Shadow value at guest address `addr`.
    pub fn get_mem(&self, addr: Addr) -> Option<&ShadowValue> {
        self.memory
            .get(&addr)
            .filter(|slot| slot.active)
            .map(|slot| &slot.sv)
    }

    /// Mutable variant of [`ShadowStore::get_mem`].
    pub fn get_mem_mut(&mut self, addr: Addr) -> Option<&mut ShadowValue> {
        self.memory
            .get_mut(&addr)
            .filter(|slot| slot.active)
            .map(|slot| &mut slot.sv)
    }

    /// Activate and return the memory shadow entry at `addr`, allocating it
    /// on the first tracked store.
    pub fn set_mem(&mut self, addr: Addr) -> &mut ShadowValue {
        let precision = self.precision;
        let slot = self.memory.entry(addr).or_insert_with(|| Slot {
            active: false,
            sv: ShadowValue::new(precision),
        });

        if !slot.active {
            self.allocs += 1;
        }
        slot.active = true;
        &mut slot.sv
    }

    /// Deactivate the memory shadow entry at `addr`, if any.
    pub fn deactivate_mem(&mut self, addr: Addr) {
        if let Some(slot) = self.memory.get_mut(&addr) {
            if slot.active {
                slot.active = false;
                self.frees += 1;
            }
        }
    }

    /// Copy the memory entry at `addr` into temporary `t`.
    pub fn copy_mem_to_temp(&mut self, addr: Addr, t: TempId, block: u64) -> bool {
        let Some(src) = self.get_mem(addr).cloned() else {
            return false;
        };
        self.set_temp(t, block).copy_from(&src);
        true
    }

    /// Copy the present entry of temporary `t` into memory at `addr`.
    pub fn copy_temp_to_mem(&mut self, t: TempId, block: u64, addr: Addr) -> bool {
        let Some(src) = self.get_temp(t, block).cloned() else {
            return false;
        };
        self.set_mem(addr).copy_from(&src);
        true
    }

    /// Copy the register entry at `(tid, offset)` into temporary `t`.
    pub fn copy_reg_to_temp(
        &mut self,
        tid: ThreadId,
        offset: RegOffset,
        t: TempId,
        block: u64,
    ) -> bool {
        let Some(src) = self.get_reg(tid, offset).cloned() else {
            return false;
        };
        self.set_temp(t, block).copy_from(&src);
        true
    }

    /// Copy the present entry of temporary `t` into `(tid, offset)`.
    pub fn copy_temp_to_reg(
        &mut self,
        t: TempId,
        block: u64,
        tid: ThreadId,
        offset: RegOffset,
    ) -> bool {
        let Some(src) = self.get_temp(t, block).cloned() else {
            return false;
        };
        self.set_reg(tid, offset).copy_from(&src);
        true
    }

    /// Copy between temporaries.
    pub fn copy_temp_to_temp(&mut self, src: TempId, dst: TempId, block: u64) -> bool {
        let Some(sv) = self.get_temp(src, block).cloned() else {
            return false;
        };
        self.set_temp(dst, block).copy_from(&sv);
        true
    }

    /// Deactivate every carrier. Idempotent.
    pub fn reset(&mut self) {
        for slot in self.temps.iter_mut().flatten() {
            if slot.active {
                slot.active = false;
                self.frees += 1;
            }
        }
        for file in self.registers.values_mut() {
            for slot in file.iter_mut().flatten() {
                if slot.active {
                    slot.active = false;
                    self.frees += 1;
                }
            }
        }
        for slot in self.memory.values_mut() {
            if slot.active {
                slot.active = false;
                self.frees += 1;
            }
        }
    }

    /// Active memory entries, for reports and client queries.
    pub fn active_memory(&self) -> impl Iterator<Item = (Addr, &ShadowValue)> {
        self.memory
            .iter()
            .filter(|(_, slot)| slot.active)
            .map(|(addr, slot)| (*addr, &slot.sv))
    }

    /// Activation count since creation.
    pub const fn allocs(&self) -> u64 {
        self.allocs
    }

    /// Deactivation count since creation.
    pub const fn frees(&self) -> u64 {
        self.frees
    }

    /// Number of currently active entries across all carriers.
    pub fn live_count(&self) -> u64 {
        let temps = self.temps.iter().flatten().filter(|s| s.active).count();
        let regs = self
            .registers
            .values()
            .flat_map(|file| file.iter().flatten())
            .filter(|s| s.active)
            .count();
        let mem = self.memory.values().filter(|s| s.active).count();

        (temps + regs + mem) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use rug::Assign;

    #[test]
    fn temp_presence_follows_block_version() {
        let mut store = ShadowStore::new(120);

        store.set_temp(3, 7).value.assign(0.5f64);
        assert!(store.get_temp(3, 7).is_some());
        // A new block makes the entry unobservable without deactivation.
        assert!(store.get_temp(3, 8).is_none());
        // Re-stamping revives it.
        store.set_temp(3, 8);
        assert!(store.get_temp(3, 8).is_some());
    }

    #[test]
    fn untracked_write_deactivates_until_tracked_write() {
        let mut store = ShadowStore::new(120);

        store.set_mem(0x1000).value.assign(1.0f64);
        assert!(store.get_mem(0x1000).is_some());

        store.deactivate_mem(0x1000);
        assert!(store.get_mem(0x1000).is_none());

        store.set_mem(0x1000);
        assert!(store.get_mem(0x1000).is_some());
    }

    #[test]
    fn register_files_are_per_thread() {
        let mut store = ShadowStore::new(120);

        store.set_reg(1, 64).value.assign(2.0f64);
        assert!(store.get_reg(1, 64).is_some());
        assert!(store.get_reg(2, 64).is_none());
    }

    #[test]
    fn alloc_counters_track_live_entries() {
        let mut store = ShadowStore::new(120);

        store.set_temp(0, 1);
        store.set_mem(0x10);
        store.set_mem(0x18);
        store.set_reg(0, 8);
        assert_eq!(store.allocs() - store.frees(), store.live_count());

        store.deactivate_mem(0x10);
        store.deactivate_reg(0, 8);
        assert_eq!(store.allocs() - store.frees(), store.live_count());

        // Re-activation of an existing slot counts as an allocation again.
        store.set_mem(0x10);
        assert_eq!(store.allocs() - store.frees(), store.live_count());
    }

    #[test]
    fn reset_is_idempotent() {
        let mut store = ShadowStore::new(120);
        store.set_temp(0, 1);
        store.set_mem(0x10);
        store.set_reg(0, 8);

        store.reset();
        let after_first = (store.allocs(), store.frees(), store.live_count());
        store.reset();

        assert_eq!(
            (store.allocs(), store.frees(), store.live_count()),
            after_first
        );
        assert_eq!(store.live_count(), 0);
    }

    #[quickcheck]
    fn counter_invariant_holds_under_arbitrary_toggles(ops: Vec<(u8, u8)>) -> bool {
        let mut store = ShadowStore::new(64);

        for (kind, k) in ops {
            let addr = Addr::from(k % 16) * 8;
            match kind % 4 {
                0 => {
                    store.set_mem(addr);
                }
                1 => store.deactivate_mem(addr),
                2 => {
                    store.set_reg(0, (k % 16) as RegOffset * 8);
                }
                _ => store.deactivate_reg(0, (k % 16) as RegOffset * 8),
            }
        }

        store.allocs() - store.frees() == store.live_count()
    }
}
