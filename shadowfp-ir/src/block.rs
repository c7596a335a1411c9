use crate::op::{BinFpOp, CvtOp, PassOp, TriFpOp, UnFpOp};
use crate::types::{Addr, CircDescr, RegOffset, TempId, Ty, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
/// A flattened operation operand: a temporary or an inline constant.
pub enum Operand {
    /// Value of an IR temporary
    Tmp(TempId),
    /// Inline constant
    Const(Value),
}

impl Operand {
    /// The temporary index, if this operand is one.
    pub const fn tmp(&self) -> Option<TempId> {
        match self {
            Self::Tmp(t) => Some(*t),
            Self::Const(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Right-hand side of a [`Stmt::WrTmp`].
pub enum Expr {
    /// Inline constant
    Const(Value),
    /// Copy of another temporary
    Tmp(TempId),
    /// Read of a guest register slice
    Get {
        /// Register byte offset
        offset: RegOffset,
        /// Width of the read
        ty: Ty,
    },
    /// Read of a circular register array element
    GetI {
        /// Array descriptor
        descr: CircDescr,
        /// Runtime index operand
        ix: Operand,
        /// Constant index bias
        bias: i64,
    },
    /// Memory load
    Load {
        /// Address operand
        addr: Operand,
        /// Width of the load
        ty: Ty,
    },
    /// Unary FP operation
    Unop {
        /// Operation
        op: UnFpOp,
        /// Operand
        x: Operand,
    },
    /// Binary FP operation
    Binop {
        /// Operation
        op: BinFpOp,
        /// First operand
        a: Operand,
        /// Second operand
        b: Operand,
    },
    /// Ternary (explicitly rounded) FP operation
    Triop {
        /// Operation
        op: TriFpOp,
        /// Rounding-mode operand (ignored by the engine)
        rm: Operand,
        /// First operand
        a: Operand,
        /// Second operand
        b: Operand,
    },
    /// Float-to-integer conversion
    Cvt {
        /// Conversion
        op: CvtOp,
        /// Rounding-mode operand (ignored by the engine)
        rm: Operand,
        /// Value to convert
        x: Operand,
    },
    /// Pass-through bit shuffle; `y` is present for the binary HL forms
    /// and carries the low half.
    Pass {
        /// Operation
        op: PassOp,
        /// Sole operand, or the high half for HL forms
        x: Operand,
        /// Low half for HL forms
        y: Option<Operand>,
    },
    /// Conditional select: `cond == 0` picks `zero`, anything else `other`.
    Mux0X {
        /// Condition operand
        cond: Operand,
        /// Value when the condition is zero
        zero: Operand,
        /// Value otherwise
        other: Operand,
    },
}

#[derive(Debug, Clone, PartialEq)]
/// A statement of a translated guest superblock.
pub enum Stmt {
    /// Guest-instruction boundary marker
    IMark {
        /// Guest address of the instruction
        addr: Addr,
        /// Encoded length in bytes
        len: u32,
    },
    /// Write a temporary
    WrTmp {
        /// Destination temporary
        dst: TempId,
        /// Value expression
        rhs: Expr,
    },
    /// Write a guest register slice
    Put {
        /// Register byte offset
        offset: RegOffset,
        /// Stored operand
        src: Operand,
    },
    /// Write a circular register array element
    PutI {
        /// Array descriptor
        descr: CircDescr,
        /// Runtime index operand
        ix: Operand,
        /// Constant index bias
        bias: i64,
        /// Stored operand
        src: Operand,
    },
    /// Memory store
    Store {
        /// Address operand
        addr: Operand,
        /// Stored operand
        src: Operand,
    },
    /// No operation
    NoOp,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// A translated guest superblock: a type environment for its temporaries
/// plus the statement sequence.
pub struct Block {
    /// Types of temporaries, indexed by [`TempId`].
    pub tyenv: Vec<Ty>,
    /// Statement sequence.
    pub stmts: Vec<Stmt>,
}

impl Block {
    /// New block over the given temporary types.
    pub fn new(tyenv: Vec<Ty>) -> Self {
        Self {
            tyenv,
            stmts: Vec::new(),
        }
    }

    /// Append a statement, builder style.
    pub fn push(&mut self, stmt: Stmt) -> &mut Self {
        self.stmts.push(stmt);
        self
    }

    /// Type of an operand under this block's environment.
    pub fn ty_of(&self, operand: &Operand) -> Ty {
        match operand {
            Operand::Tmp(t) => self.tyenv[*t],
            Operand::Const(v) => v.ty(),
        }
    }

    /// Guest address of the first instruction marker, if any.
    pub fn entry_addr(&self) -> Option<Addr> {
        self.stmts.iter().find_map(|s| match s {
            Stmt::IMark { addr, .. } => Some(*addr),
            _ => None,
        })
    }
}
