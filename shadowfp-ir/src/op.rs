use crate::types::Word;

/// Unary floating-point operations.
///
/// `Sin`/`Cos`/`Tan` are recognized so the instrumenter can report them,
/// but the engine does not shadow them; their results stay untracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum UnFpOp {
    /// Negate, single precision
    NegF32,
    /// Negate, double precision
    NegF64,
    /// Absolute value, single precision
    AbsF32,
    /// Absolute value, double precision
    AbsF64,
    /// Square root, single precision
    SqrtF32,
    /// Square root, double precision
    SqrtF64,
    /// Sine, double precision (not shadowed)
    SinF64,
    /// Cosine, double precision (not shadowed)
    CosF64,
    /// Tangent, double precision (not shadowed)
    TanF64,
}

impl UnFpOp {
    /// Nominal guest precision of the operation, in mantissa bits.
    pub const fn precision(&self) -> u32 {
        match self {
            Self::NegF32 | Self::AbsF32 | Self::SqrtF32 => 24,
            _ => 53,
        }
    }

    /// Whether the engine propagates shadow values through this operation.
    pub const fn is_shadowed(&self) -> bool {
        !matches!(self, Self::SinF64 | Self::CosF64 | Self::TanF64)
    }
}

/// Binary floating-point operations (round-to-nearest forms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BinFpOp {
    /// Addition, single precision
    AddF32,
    /// Subtraction, single precision
    SubF32,
    /// Multiplication, single precision
    MulF32,
    /// Division, single precision
    DivF32,
    /// Minimum, single precision
    MinF32,
    /// Maximum, single precision
    MaxF32,
    /// Addition, double precision
    AddF64,
    /// Subtraction, double precision
    SubF64,
    /// Multiplication, double precision
    MulF64,
    /// Division, double precision
    DivF64,
    /// Minimum, double precision
    MinF64,
    /// Maximum, double precision
    MaxF64,
    /// Ordered comparison producing a [`CmpResult`] encoding
    CmpF64,
}

impl BinFpOp {
    /// Nominal guest precision of the operation, in mantissa bits.
    pub const fn precision(&self) -> u32 {
        match self {
            Self::AddF32
            | Self::SubF32
            | Self::MulF32
            | Self::DivF32
            | Self::MinF32
            | Self::MaxF32 => 24,
            _ => 53,
        }
    }

    /// Whether this is an addition or subtraction (the cancellation sites).
    pub const fn cancels(&self) -> bool {
        matches!(
            self,
            Self::AddF32 | Self::SubF32 | Self::AddF64 | Self::SubF64
        )
    }
}

/// Ternary floating-point operations: explicitly rounded forms whose first
/// operand is a rounding mode. The engine ignores the rounding-mode operand
/// and evaluates round-to-nearest.
///
/// `Atan2F64`/`ScaleBF64` are recognized but not shadowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum TriFpOp {
    /// Rounded addition, single precision
    AddF32,
    /// Rounded subtraction, single precision
    SubF32,
    /// Rounded multiplication, single precision
    MulF32,
    /// Rounded division, single precision
    DivF32,
    /// Rounded addition, double precision
    AddF64,
    /// Rounded subtraction, double precision
    SubF64,
    /// Rounded multiplication, double precision
    MulF64,
    /// Rounded division, double precision
    DivF64,
    /// Arc tangent of two variables (not shadowed)
    Atan2F64,
    /// Scale by a power of two (not shadowed)
    ScaleBF64,
}

impl TriFpOp {
    /// Nominal guest precision of the operation, in mantissa bits.
    pub const fn precision(&self) -> u32 {
        match self {
            Self::AddF32 | Self::SubF32 | Self::MulF32 | Self::DivF32 => 24,
            _ => 53,
        }
    }

    /// Whether the engine propagates shadow values through this operation.
    pub const fn is_shadowed(&self) -> bool {
        !matches!(self, Self::Atan2F64 | Self::ScaleBF64)
    }

    /// Whether this is an addition or subtraction (the cancellation sites).
    pub const fn cancels(&self) -> bool {
        matches!(
            self,
            Self::AddF32 | Self::SubF32 | Self::AddF64 | Self::SubF64
        )
    }
}

/// Float-to-integer conversions. Binary shape: the first operand is a
/// rounding mode, the second the double to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CvtOp {
    /// Double to signed 16-bit
    F64toI16S,
    /// Double to signed 32-bit
    F64toI32S,
    /// Double to signed 64-bit
    F64toI64S,
    /// Double to unsigned 16-bit
    F64toI16U,
    /// Double to unsigned 32-bit
    F64toI32U,
    /// Double to unsigned 64-bit
    F64toI64U,
}

impl CvtOp {
    /// Result width in bits.
    pub const fn result_bits(&self) -> u32 {
        match self {
            Self::F64toI16S | Self::F64toI16U => 16,
            Self::F64toI32S | Self::F64toI32U => 32,
            Self::F64toI64S | Self::F64toI64U => 64,
        }
    }

    /// Whether the result is signed.
    pub const fn signed(&self) -> bool {
        matches!(self, Self::F64toI16S | Self::F64toI32S | Self::F64toI64S)
    }
}

/// Pass-through operations: bit reinterpretations, narrowings and lane
/// shuffles that never compute an FP result. The instrumenter forwards
/// shadow identity through them instead of emitting evaluator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum PassOp {
    /// Widen single to double
    F32toF64,
    /// Narrow double to single
    F64toF32,
    /// Double bits viewed as a 64-bit integer
    ReinterpF64asI64,
    /// 64-bit integer bits viewed as a double
    ReinterpI64asF64,
    /// 32-bit zero-extended into a 128-bit vector
    I32UtoV128,
    /// Low 64-bit lane of a 128-bit vector
    V128toI64Lo,
    /// High 64-bit lane of a 128-bit vector
    V128toI64Hi,
    /// Low half of a 64-bit value
    I64toI32Lo,
    /// High half of a 64-bit value
    I64toI32Hi,
    /// 64-bit zero-extended into a 128-bit vector
    I64UtoV128,
    /// 32-bit zero-extended to 64 bits
    I32Uto64,
    /// Two 64-bit halves packed into a 128-bit vector (binary: hi, lo)
    I64HLtoV128,
    /// Two 32-bit halves packed into a 64-bit value (binary: hi, lo)
    I32HLto64,
}

impl PassOp {
    /// Whether the operation consumes two operands (the HL packing forms).
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::I64HLtoV128 | Self::I32HLto64)
    }

    /// Whether the operation converts between float widths. These forward
    /// the shadow by value through an explicit transfer (the captured
    /// guest result changes width); the bit shuffles forward identity.
    pub const fn converts_width(&self) -> bool {
        matches!(self, Self::F32toF64 | Self::F64toF32)
    }
}

/// Result encodings of [`BinFpOp::CmpF64`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CmpResult {
    /// First operand greater
    Gt = 0x00,
    /// First operand less
    Lt = 0x01,
    /// Operands equal
    Eq = 0x40,
    /// Unordered (at least one NaN)
    Un = 0x45,
}

impl CmpResult {
    /// The encoding as a guest machine word.
    pub const fn word(&self) -> Word {
        *self as u32 as Word
    }

    /// Encode the ordering of two doubles.
    pub fn of(a: f64, b: f64) -> Self {
        match a.partial_cmp(&b) {
            Some(core::cmp::Ordering::Less) => Self::Lt,
            Some(core::cmp::Ordering::Greater) => Self::Gt,
            Some(core::cmp::Ordering::Equal) => Self::Eq,
            None => Self::Un,
        }
    }

    /// Encode an ordering, treating incomparable operands as unordered.
    pub const fn from_ordering(ordering: Option<core::cmp::Ordering>) -> Self {
        match ordering {
            Some(core::cmp::Ordering::Less) => Self::Lt,
            Some(core::cmp::Ordering::Greater) => Self::Gt,
            Some(core::cmp::Ordering::Equal) => Self::Eq,
            None => Self::Un,
        }
    }

    /// Decode a guest machine word; anything unrecognized is unordered.
    pub const fn from_word(word: Word) -> Self {
        match word {
            0x00 => Self::Gt,
            0x01 => Self::Lt,
            0x40 => Self::Eq,
            _ => Self::Un,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_classification() {
        assert_eq!(UnFpOp::SqrtF32.precision(), 24);
        assert_eq!(UnFpOp::NegF64.precision(), 53);
        assert_eq!(BinFpOp::MulF32.precision(), 24);
        assert_eq!(BinFpOp::CmpF64.precision(), 53);
        assert_eq!(TriFpOp::DivF32.precision(), 24);
        assert_eq!(TriFpOp::AddF64.precision(), 53);
    }

    #[test]
    fn cancellation_sites_are_add_sub_only() {
        assert!(BinFpOp::AddF32.cancels());
        assert!(BinFpOp::SubF64.cancels());
        assert!(!BinFpOp::MulF64.cancels());
        assert!(!BinFpOp::MinF32.cancels());
        assert!(TriFpOp::SubF32.cancels());
        assert!(!TriFpOp::DivF64.cancels());
    }

    #[test]
    fn cmp_encodings() {
        assert_eq!(CmpResult::of(1.0, 2.0), CmpResult::Lt);
        assert_eq!(CmpResult::of(2.0, 1.0), CmpResult::Gt);
        assert_eq!(CmpResult::of(1.0, 1.0), CmpResult::Eq);
        assert_eq!(CmpResult::of(f64::NAN, 1.0), CmpResult::Un);
        assert_eq!(CmpResult::Eq.word(), 0x40);
        assert_eq!(CmpResult::Un.word(), 0x45);
    }
}
