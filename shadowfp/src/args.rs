//! Callback ABI records
//!
//! One fixed-layout record per operation shape. The instrumenter fills the
//! static half of a record (operation, origin, destination, resolved
//! operand temporaries, inline constants) when a block is translated; the
//! instrumented pre-call stores fill the dynamic half (operand and result
//! bit patterns, addresses, indices, conditions) immediately before each
//! callback. The pre-call stores and the callback form an indivisible
//! sequence at the IR level, which the host guarantees. Records are
//! written by field, never as opaque blobs: the layout is the contract
//! between the instrumented IR and the evaluator.

use shadowfp_ir::{
    Addr, BinFpOp, CircDescr, CvtOp, PassOp, RegOffset, TempId, TriFpOp, Ty, UnFpOp,
};

/// One resolved operand: the temporary carrying its shadow value (if the
/// substitution chain found one) plus its current guest bit pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperandSlot {
    /// Shadow-carrying temporary, post substitution.
    pub tmp: Option<TempId>,
    /// Guest IEEE bit pattern of the operand (low lane).
    pub bits: u64,
}

/// Unary FP operation record.
#[derive(Debug, Clone, Copy)]
pub struct UnOpArgs {
    /// Operation
    pub op: UnFpOp,
    /// Guest instruction address
    pub origin: Addr,
    /// Result temporary
    pub dst: TempId,
    /// Operand
    pub x: OperandSlot,
    /// Guest result bit pattern
    pub out: u64,
}

/// Binary FP operation record.
#[derive(Debug, Clone, Copy)]
pub struct BinOpArgs {
    /// Operation
    pub op: BinFpOp,
    /// Guest instruction address
    pub origin: Addr,
    /// Result temporary
    pub dst: TempId,
    /// First operand
    pub a: OperandSlot,
    /// Second operand
    pub b: OperandSlot,
    /// Guest result bit pattern
    pub out: u64,
}

/// Ternary (explicitly rounded) FP operation record. The rounding-mode
/// operand is dropped at instrumentation time.
#[derive(Debug, Clone, Copy)]
pub struct TriOpArgs {
    /// Operation
    pub op: TriFpOp,
    /// Guest instruction address
    pub origin: Addr,
    /// Result temporary
    pub dst: TempId,
    /// First data operand
    pub a: OperandSlot,
    /// Second data operand
    pub b: OperandSlot,
    /// Guest result bit pattern
    pub out: u64,
}

/// `CmpF64` record.
#[derive(Debug, Clone, Copy)]
pub struct CmpArgs {
    /// Guest instruction address
    pub origin: Addr,
    /// Result temporary
    pub dst: TempId,
    /// First operand
    pub a: OperandSlot,
    /// Second operand
    pub b: OperandSlot,
    /// Guest comparison-result encoding
    pub out: u64,
}

/// Float-to-integer conversion record.
#[derive(Debug, Clone, Copy)]
pub struct CvtArgs {
    /// Conversion
    pub op: CvtOp,
    /// Guest instruction address
    pub origin: Addr,
    /// Result temporary
    pub dst: TempId,
    /// Value operand
    pub x: OperandSlot,
    /// Guest integer result
    pub out: u64,
}

/// Float-width pass-through record (`F32toF64`/`F64toF32`).
#[derive(Debug, Clone, Copy)]
pub struct WidenArgs {
    /// Conversion
    pub op: PassOp,
    /// Guest instruction address
    pub origin: Addr,
    /// Result temporary
    pub dst: TempId,
    /// Value operand
    pub x: OperandSlot,
    /// Guest result bit pattern
    pub out: u64,
}

/// Memory load record.
#[derive(Debug, Clone, Copy)]
pub struct LoadArgs {
    /// Guest instruction address
    pub origin: Addr,
    /// Destination temporary
    pub dst: TempId,
    /// Width of the load
    pub ty: Ty,
    /// Loaded address
    pub addr: Addr,
    /// Loaded bit pattern, low lane
    pub out: u64,
    /// Loaded bit pattern, high lane (vectors only)
    pub out_hi: u64,
}

/// Memory store record.
#[derive(Debug, Clone, Copy)]
pub struct StoreArgs {
    /// Guest instruction address
    pub origin: Addr,
    /// Stored address
    pub addr: Addr,
    /// Width of the store
    pub ty: Ty,
    /// Stored operand
    pub data: OperandSlot,
    /// Stored bit pattern, high lane (vectors only)
    pub data_hi: u64,
}

/// Register read record.
#[derive(Debug, Clone, Copy)]
pub struct GetArgs {
    /// Guest instruction address
    pub origin: Addr,
    /// Destination temporary
    pub dst: TempId,
    /// Register byte offset
    pub offset: RegOffset,
    /// Width of the read
    pub ty: Ty,
    /// Read bit pattern, low lane
    pub out: u64,
    /// Read bit pattern, high lane (vectors only)
    pub out_hi: u64,
}

/// Register write record.
#[derive(Debug, Clone, Copy)]
pub struct PutArgs {
    /// Guest instruction address
    pub origin: Addr,
    /// Register byte offset
    pub offset: RegOffset,
    /// Width of the write
    pub ty: Ty,
    /// Stored operand
    pub data: OperandSlot,
    /// Stored bit pattern, high lane (vectors only)
    pub data_hi: u64,
}

/// Circular register read record.
#[derive(Debug, Clone, Copy)]
pub struct GetIArgs {
    /// Guest instruction address
    pub origin: Addr,
    /// Destination temporary
    pub dst: TempId,
    /// Array descriptor
    pub descr: CircDescr,
    /// Constant index bias
    pub bias: i64,
    /// Runtime index
    pub ix: i64,
    /// Read bit pattern
    pub out: u64,
}

/// Circular register write record.
#[derive(Debug, Clone, Copy)]
pub struct PutIArgs {
    /// Guest instruction address
    pub origin: Addr,
    /// Array descriptor
    pub descr: CircDescr,
    /// Constant index bias
    pub bias: i64,
    /// Runtime index
    pub ix: i64,
    /// Stored operand
    pub data: OperandSlot,
}

/// Conditional-select record.
#[derive(Debug, Clone, Copy)]
pub struct MuxArgs {
    /// Guest instruction address
    pub origin: Addr,
    /// Destination temporary
    pub dst: TempId,
    /// Runtime condition; zero selects `zero`
    pub cond: u64,
    /// Value when the condition is zero
    pub zero: OperandSlot,
    /// Value otherwise
    pub other: OperandSlot,
}
