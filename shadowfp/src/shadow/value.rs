use crate::numeric;

use rug::{Assign, Float};
use shadowfp_ir::{Addr, Ty};

/// The guest's own IEEE result, captured when a shadow value is produced.
///
/// Comparisons are bitwise so NaN payloads and signed zeros are preserved;
/// a mismatch against the carrier's current guest bits means an untracked
/// operation mutated the carrier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IeeeValue {
    /// Captured single-precision result
    F32(f32),
    /// Captured double-precision result
    F64(f64),
    /// No IEEE capture (integer-width carrier or never produced)
    Invalid,
}

impl IeeeValue {
    /// Capture from a single-precision bit pattern.
    pub const fn f32_from_bits(bits: u64) -> Self {
        Self::F32(f32::from_bits(bits as u32))
    }

    /// Capture from a double-precision bit pattern.
    pub const fn f64_from_bits(bits: u64) -> Self {
        Self::F64(f64::from_bits(bits))
    }

    /// Capture from a guest precision (24 or 53 bits) and a bit pattern.
    pub const fn from_precision(precision: u32, bits: u64) -> Self {
        match precision {
            24 => Self::f32_from_bits(bits),
            53 => Self::f64_from_bits(bits),
            _ => Self::Invalid,
        }
    }

    /// Capture from a stored width and bit lanes. A 128-bit vector with a
    /// zero high lane is classified as a scalar double in its low lane;
    /// integer widths yield no capture.
    pub const fn from_ty_bits(ty: Ty, lo: u64, hi: u64) -> Self {
        match ty {
            Ty::F32 => Self::f32_from_bits(lo),
            Ty::F64 => Self::f64_from_bits(lo),
            Ty::V128 => {
                if hi == 0 {
                    Self::f64_from_bits(lo)
                } else {
                    Self::Invalid
                }
            }
            _ => Self::Invalid,
        }
    }

    /// The captured value widened to a double.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Self::F32(v) => Some(f64::from(*v)),
            Self::F64(v) => Some(*v),
            Self::Invalid => None,
        }
    }

    /// The captured bit pattern.
    pub fn bits(&self) -> Option<u64> {
        match self {
            Self::F32(v) => Some(u64::from(v.to_bits())),
            Self::F64(v) => Some(v.to_bits()),
            Self::Invalid => None,
        }
    }

    /// Nominal precision of the captured value, in mantissa bits.
    pub const fn precision(&self) -> Option<u32> {
        match self {
            Self::F32(_) => Some(24),
            Self::F64(_) => Some(53),
            Self::Invalid => None,
        }
    }

    /// Bitwise equality against a current guest bit pattern.
    pub fn matches_bits(&self, bits: u64) -> bool {
        match self {
            Self::F32(v) => u64::from(v.to_bits()) == bits & 0xffff_ffff,
            Self::F64(v) => v.to_bits() == bits,
            Self::Invalid => false,
        }
    }
}

/// A shadow value: the three parallel channels plus dependency metadata.
#[derive(Debug, Clone)]
pub struct ShadowValue {
    pub(crate) value: Float,
    pub(crate) mid_value: Float,
    pub(crate) ori_value: Float,
    pub(crate) op_count: u64,
    pub(crate) origin: Addr,
    pub(crate) canceled: u64,
    pub(crate) cancel_origin: Addr,
    pub(crate) org: IeeeValue,
}

impl ShadowValue {
    /// Fresh inactive shadow entry with a `value` channel at `precision`.
    pub(crate) fn new(precision: u32) -> Self {
        Self {
            value: Float::new(precision),
            mid_value: Float::new(53),
            ori_value: Float::new(53),
            op_count: 0,
            origin: 0,
            canceled: 0,
            cancel_origin: 0,
            org: IeeeValue::Invalid,
        }
    }

    /// High-precision shadow channel.
    pub fn value(&self) -> &Float {
        &self.value
    }

    /// Guest-precision middle channel.
    pub fn mid_value(&self) -> &Float {
        &self.mid_value
    }

    /// Simulated-original channel.
    pub fn ori_value(&self) -> &Float {
        &self.ori_value
    }

    /// Length of the longest FP dependency path producing this value.
    pub const fn op_count(&self) -> u64 {
        self.op_count
    }

    /// Guest address of the producing operation.
    pub const fn origin(&self) -> Addr {
        self.origin
    }

    /// Maximum bits cancelled anywhere along the dependency path.
    pub const fn canceled(&self) -> u64 {
        self.canceled
    }

    /// Address at which the cancellation maximum was reached.
    pub const fn cancel_origin(&self) -> Addr {
        self.cancel_origin
    }

    /// The guest IEEE result captured at creation.
    pub const fn org(&self) -> IeeeValue {
        self.org
    }

    /// Relative deviation of the captured guest result from the shadow.
    pub fn relative_error(&self) -> f64 {
        match self.org.to_f64() {
            Some(org) => numeric::relative_error(&self.value, org),
            None => 0.0,
        }
    }

    /// Deep copy of numeric and metadata fields. Carrier state (`active`,
    /// `version`) lives in the slot tables and is never touched here.
    pub(crate) fn copy_from(&mut self, other: &ShadowValue) {
        self.value.set_prec(other.value.prec());
        self.value.assign(&other.value);
        self.mid_value.set_prec(other.mid_value.prec());
        self.mid_value.assign(&other.mid_value);
        self.ori_value.set_prec(other.ori_value.prec());
        self.ori_value.assign(&other.ori_value);
        self.op_count = other.op_count;
        self.origin = other.origin;
        self.canceled = other.canceled;
        self.cancel_origin = other.cancel_origin;
        self.org = other.org;
    }

    /// Reset every channel to the guest's current IEEE value. This is the
    /// drift-repair step: the carrier was mutated outside the tracked op
    /// set, so the shadow has nothing better to offer than the guest bits.
    pub(crate) fn resync(&mut self, org: IeeeValue) {
        let guest = org.to_f64().unwrap_or_default();
        let prec = org.precision().unwrap_or(53);

        self.value.assign(guest);
        self.mid_value.set_prec(prec);
        self.mid_value.assign(guest);
        self.ori_value.set_prec(prec);
        self.ori_value.assign(guest);
        self.org = org;
    }
}
