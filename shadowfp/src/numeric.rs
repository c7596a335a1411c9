//! Precision-aware floating-point primitives
//!
//! The three shadow channels differ only in precision and in whether the
//! IEEE-754 double exponent range is emulated around the primitive, so the
//! primitives are factored here and take both as parameters. Emulation
//! clamps the MPFR exponent to `(EMU_EXP_MIN, EMU_EXP_MAX)` and
//! subnormalizes results that fall below the normal range, which reproduces
//! the IEEE behavior (including gradual underflow) that an unbounded
//! multi-precision computation would otherwise hide.

use crate::consts::{EMU_EXP_MAX, EMU_EXP_MIN};

use rug::float::{Round, Special};
use rug::ops::NegAssign;
use rug::{Assign, Float};

use std::cmp::Ordering;

/// Unary primitive selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnPrim {
    Sqrt,
    Neg,
    Abs,
}

/// Binary primitive selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinPrim {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

/// Evaluate a unary primitive at `prec` bits, round-to-nearest.
pub(crate) fn eval_un(prim: UnPrim, prec: u32, emulate: bool, x: &Float) -> Float {
    let mut r = match prim {
        UnPrim::Sqrt => Float::with_val_round(prec, x.sqrt_ref(), Round::Nearest).0,
        UnPrim::Neg => {
            let mut r = Float::with_val_round(prec, x, Round::Nearest).0;
            r.neg_assign();
            r
        }
        UnPrim::Abs => {
            let mut r = Float::with_val_round(prec, x, Round::Nearest).0;
            r.abs_mut();
            r
        }
    };

    if emulate {
        emulate_ieee_range(&mut r);
    }
    r
}

/// Evaluate a binary primitive at `prec` bits, round-to-nearest.
///
/// `Min`/`Max` pick the second operand on unordered comparisons, matching
/// the SSE scalar min/max semantics the guest opcodes encode.
pub(crate) fn eval_bin(prim: BinPrim, prec: u32, emulate: bool, a: &Float, b: &Float) -> Float {
    let mut r = match prim {
        BinPrim::Add => Float::with_val_round(prec, a + b, Round::Nearest).0,
        BinPrim::Sub => Float::with_val_round(prec, a - b, Round::Nearest).0,
        BinPrim::Mul => Float::with_val_round(prec, a * b, Round::Nearest).0,
        BinPrim::Div => Float::with_val_round(prec, a / b, Round::Nearest).0,
        BinPrim::Min => {
            let pick = match a.partial_cmp(b) {
                Some(Ordering::Less) | Some(Ordering::Equal) => a,
                _ => b,
            };
            Float::with_val_round(prec, pick, Round::Nearest).0
        }
        BinPrim::Max => {
            let pick = match a.partial_cmp(b) {
                Some(Ordering::Greater) | Some(Ordering::Equal) => a,
                _ => b,
            };
            Float::with_val_round(prec, pick, Round::Nearest).0
        }
    };

    if emulate {
        emulate_ieee_range(&mut r);
    }
    r
}

/// Clamp `x` to the emulated IEEE-754 double exponent range.
///
/// Values above the range overflow to signed infinity; values below the
/// normal range are re-rounded to the surviving mantissa bits
/// (`mpfr_subnormalize` semantics), flushing to signed zero below the
/// smallest subnormal.
pub(crate) fn emulate_ieee_range(x: &mut Float) {
    if !x.is_finite() || x.is_zero() {
        return;
    }

    let e = match x.get_exp() {
        Some(e) => i64::from(e),
        None => return,
    };
    let negative = x.is_sign_negative();

    if e > EMU_EXP_MAX {
        x.assign(if negative {
            Special::NegInfinity
        } else {
            Special::Infinity
        });
        return;
    }

    let prec = i64::from(x.prec());
    if e >= EMU_EXP_MIN + prec - 1 {
        return;
    }

    let avail = e - EMU_EXP_MIN + 1;
    if avail >= 1 {
        let full = x.prec();
        let _ = x.set_prec_round(avail as u32, Round::Nearest);
        x.set_prec(full);
        return;
    }

    // Below the smallest subnormal: round against the half-step midpoint.
    let mut result = Float::with_val(x.prec(), Special::Zero);
    if e == EMU_EXP_MIN - 1 {
        let mut midpoint = Float::with_val(2, 1u32);
        midpoint >>= (2 - EMU_EXP_MIN) as u32;
        let mut mag = x.clone();
        mag.abs_mut();
        if mag > midpoint {
            result.assign(1u32);
            result >>= (1 - EMU_EXP_MIN) as u32;
        }
    }
    if negative {
        result.neg_assign();
    }
    x.assign(result);
}

/// Bits cancelled by an addition or subtraction: when both operands and
/// the result are regular, `max(0, max(exp a, exp b) - exp r)`; zero
/// otherwise.
pub(crate) fn cancellation_bits(a: &Float, b: &Float, r: &Float) -> u64 {
    let (ea, eb, er) = match (a.get_exp(), b.get_exp(), r.get_exp()) {
        (Some(ea), Some(eb), Some(er)) => (i64::from(ea), i64::from(eb), i64::from(er)),
        _ => return 0,
    };
    if !a.is_finite() || !b.is_finite() || !r.is_finite() {
        return 0;
    }

    (ea.max(eb) - er).max(0) as u64
}

/// Bits of the shadow still known to agree with the guest's IEEE value.
///
/// Only meaningful when shadow and IEEE value share an exponent; the bit
/// count is taken from the exponent gap between the value and its
/// deviation, less a two-bit guard, clamped to the nominal mantissa.
pub(crate) fn exact_bits(shadow: &Float, ieee: f64, mantissa: u32) -> u64 {
    let se = match shadow.get_exp() {
        Some(e) => e,
        None => return 0,
    };
    let ie = match Float::with_val(53, ieee).get_exp() {
        Some(e) => e,
        None => return 0,
    };
    if se != ie {
        return 0;
    }

    let diff = Float::with_val(shadow.prec(), shadow - ieee);
    let de = match diff.get_exp() {
        Some(e) => e,
        // Exact agreement.
        None => return u64::from(mantissa),
    };

    let d = i64::from((se - de).abs()) - 2;
    d.clamp(0, i64::from(mantissa)) as u64
}

/// Relative deviation of the guest's IEEE result from the shadow,
/// `|(shadow - org) / shadow|`.
///
/// Non-finite inputs yield zero (specials are diagnosed separately); a
/// zero shadow against a nonzero original yields `|org|`.
pub(crate) fn relative_error(shadow: &Float, org: f64) -> f64 {
    if !shadow.is_finite() || !org.is_finite() {
        return 0.0;
    }
    if shadow.is_zero() {
        return org.abs();
    }

    let mut d = Float::with_val(shadow.prec(), shadow - org);
    d /= shadow;
    d.abs_mut();
    d.to_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn binary_primitives_round_to_requested_precision() {
        let a = Float::with_val(120, 1u32);
        let b = Float::with_val(120, 1u32) / 10u32;

        let wide = eval_bin(BinPrim::Add, 120, false, &a, &b);
        let narrow = eval_bin(BinPrim::Add, 24, false, &a, &b);

        assert_eq!(narrow.to_f32(), 1.1f32);
        assert!(wide.to_f64() != narrow.to_f64());
    }

    #[test]
    fn min_max_unordered_pick_second_operand() {
        let nan = Float::with_val(53, Special::Nan);
        let one = Float::with_val(53, 1u32);

        assert_eq!(eval_bin(BinPrim::Min, 53, false, &nan, &one), 1u32);
        assert!(eval_bin(BinPrim::Min, 53, false, &one, &nan).is_nan());
        assert_eq!(eval_bin(BinPrim::Max, 53, false, &nan, &one), 1u32);
    }

    #[test]
    fn emulation_overflows_to_infinity() {
        let big = Float::with_val(53, 2u32);
        let mut x = Float::with_val(53, &big << 1100u32);
        emulate_ieee_range(&mut x);
        assert!(x.is_infinite());
        assert!(!x.is_sign_negative());
    }

    #[test]
    fn emulation_subnormalizes_like_f64() {
        // (1 + 2^-30) * 2^-1000 times 2^-52 underflows into the subnormal
        // range; the f64 multiplication loses the same mantissa bits the
        // emulation drops.
        let mut a = Float::with_val(53, 1u32);
        a += Float::with_val(53, 1u32) >> 30u32;
        let a = a >> 1000u32;
        let b = Float::with_val(53, 1u32) >> 52u32;

        let emulated = eval_bin(BinPrim::Mul, 53, true, &a, &b);
        let native = a.to_f64() * b.to_f64();

        assert_eq!(emulated.to_f64(), native);
        assert!(native != 0.0 && native < f64::MIN_POSITIVE);
    }

    #[test]
    fn emulation_flushes_below_smallest_subnormal() {
        let mut x = Float::with_val(53, 1u32) >> 1200u32;
        emulate_ieee_range(&mut x);
        assert!(x.is_zero());

        let mut x = -(Float::with_val(53, 1u32) >> 1200u32);
        emulate_ieee_range(&mut x);
        assert!(x.is_zero() && x.is_sign_negative());
    }

    #[test]
    fn catastrophic_cancellation_counts_bits() {
        let mut a = Float::with_val(120, 1u32);
        a += Float::with_val(120, 1u32) >> 30u32;
        let b = Float::with_val(120, 1u32);
        let r = eval_bin(BinPrim::Sub, 120, false, &a, &b);

        assert_eq!(cancellation_bits(&a, &b, &r), 30);
    }

    #[test]
    fn exact_bits_full_on_agreement() {
        let x = Float::with_val(120, 0.5f64);
        assert_eq!(exact_bits(&x, 0.5, 53), 53);
        // Different exponents: no exactness credit.
        assert_eq!(exact_bits(&x, 0.25, 53), 0);
    }

    #[test]
    fn relative_error_basics() {
        let x = Float::with_val(120, 1u32);
        assert_eq!(relative_error(&x, 1.0), 0.0);

        let r = relative_error(&x, 1.0 + 2f64.powi(-40));
        assert!(r > 2f64.powi(-41) && r < 2f64.powi(-39));

        let zero = Float::with_val(120, 0u32);
        assert_eq!(relative_error(&zero, 0.5), 0.5);
        assert_eq!(relative_error(&x, f64::INFINITY), 0.0);
    }

    #[quickcheck]
    fn cancellation_matches_f64_exponents(a: f64, b: f64) -> bool {
        let regular = |x: f64| x.is_finite() && x != 0.0;
        let r = a - b;
        if !regular(a) || !regular(b) || !regular(r) {
            return true;
        }

        let fa = Float::with_val(53, a);
        let fb = Float::with_val(53, b);
        let fr = eval_bin(BinPrim::Sub, 53, false, &fa, &fb);
        if !fr.is_finite() || fr.is_zero() {
            return true;
        }

        let exp = |x: f64| x.abs().log2().floor() as i64 + 1;
        let expected = (exp(a).max(exp(b)) - exp(r)).max(0) as u64;

        // log2-derived exponents are off by one at exact powers of two;
        // accept the neighborhood.
        cancellation_bits(&fa, &fb, &fr).abs_diff(expected) <= 1
    }
}
