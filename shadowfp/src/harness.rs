//! Block runner
//!
//! Executes guest IR natively (IEEE f32/f64 semantics, a byte-addressed
//! register file per thread, guest memory through [`MemHost`]) and invokes
//! the instrumented hooks exactly where the emission pass placed them.
//! It stands in for the out-of-scope instrumentation framework so the
//! engine can be driven end-to-end.

use crate::args::{
    BinOpArgs, CmpArgs, CvtArgs, GetArgs, GetIArgs, LoadArgs, MuxArgs, OperandSlot, PutArgs,
    PutIArgs, StoreArgs, TriOpArgs, UnOpArgs, WidenArgs,
};
use crate::consts::MAX_REGISTERS;
use crate::engine::{ClientRequest, Engine, Hook, OperandRef};
use crate::error::EngineError;
use crate::host::{GuestHost, MemHost};
use crate::options::Options;

use shadowfp_ir::{
    Addr, BinFpOp, Block, CmpResult, CvtOp, Expr, Operand, PassOp, RegOffset, Stmt, TempId,
    ThreadId, TriFpOp, Ty, UnFpOp, Value, Word,
};

use std::collections::HashMap;

/// Executes instrumented guest blocks against a [`MemHost`]-backed guest.
#[derive(Debug)]
pub struct BlockRunner {
    engine: Engine<MemHost>,
    temps: Vec<Option<Value>>,
    registers: HashMap<ThreadId, Vec<u8>>,
    tid: ThreadId,
}

impl BlockRunner {
    /// New runner over an empty guest.
    pub fn new(options: Options) -> Result<Self, EngineError> {
        Self::with_host(options, MemHost::default())
    }

    /// New runner over a prepared guest.
    pub fn with_host(options: Options, host: MemHost) -> Result<Self, EngineError> {
        Ok(Self {
            engine: Engine::new(options, host)?,
            temps: Vec::new(),
            registers: HashMap::new(),
            tid: 0,
        })
    }

    /// The engine under test.
    pub fn engine(&self) -> &Engine<MemHost> {
        &self.engine
    }

    /// Mutable engine access.
    pub fn engine_mut(&mut self) -> &mut Engine<MemHost> {
        &mut self.engine
    }

    /// Guest memory access.
    pub fn host(&self) -> &MemHost {
        self.engine.host()
    }

    /// Mutable guest memory access; writes through here are untracked, the
    /// way an uninstrumented `memcpy` would be.
    pub fn host_mut(&mut self) -> &mut MemHost {
        self.engine.host_mut()
    }

    /// Current guest thread.
    pub const fn thread(&self) -> ThreadId {
        self.tid
    }

    /// Switch the current guest thread.
    pub fn set_thread(&mut self, tid: ThreadId) {
        self.tid = tid;
    }

    /// Forward a client request to the engine.
    pub fn client_request(&mut self, request: ClientRequest) -> Result<Option<Word>, EngineError> {
        self.engine.client_request(request)
    }

    /// Value of a temporary after the last executed block.
    pub fn temp(&self, t: TempId) -> Option<Value> {
        self.temps.get(t).copied().flatten()
    }

    /// Read a guest register slice of the current thread.
    pub fn read_register(&self, offset: RegOffset, ty: Ty) -> Value {
        let mut lanes = [0u64; 2];
        if let Some(file) = self.registers.get(&self.tid) {
            let mut bytes = [0u8; 16];
            bytes[..ty.size()].copy_from_slice(&file[offset..offset + ty.size()]);
            lanes[0] = u64::from_le_bytes(bytes[..8].try_into().unwrap());
            lanes[1] = u64::from_le_bytes(bytes[8..].try_into().unwrap());
        }
        Value::from_bits(ty, lanes[0], lanes[1])
    }

    /// Instrument and execute one block, exactly as a freshly translated
    /// superblock would run under the host.
    pub fn run_block(&mut self, block: &Block) -> Result<(), EngineError> {
        let instrumented = self.engine.instrument_block(block);

        self.temps = vec![None; block.tyenv.len()];
        for hook in &instrumented.head {
            self.dispatch(hook)?;
        }
        for item in &instrumented.stmts {
            self.exec_stmt(&item.stmt)?;
            for hook in &item.hooks {
                self.dispatch(hook)?;
            }
        }

        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<(), EngineError> {
        match stmt {
            Stmt::IMark { .. } | Stmt::NoOp => {}
            Stmt::WrTmp { dst, rhs } => {
                let value = self.eval_expr(rhs)?;
                self.temps[*dst] = Some(value);
            }
            Stmt::Put { offset, src } => {
                let value = self.operand_value(src);
                self.write_register(*offset, value);
            }
            Stmt::PutI {
                descr,
                ix,
                bias,
                src,
            } => {
                let ix = self.operand_value(ix).bits() as i64;
                let value = self.operand_value(src);
                self.write_register(descr.offset(ix, *bias), value);
            }
            Stmt::Store { addr, src } => {
                let addr = self.operand_value(addr).bits();
                let value = self.operand_value(src);
                self.write_memory(addr, value)?;
            }
        }
        Ok(())
    }

    fn eval_expr(&mut self, rhs: &Expr) -> Result<Value, EngineError> {
        Ok(match rhs {
            Expr::Const(v) => *v,
            Expr::Tmp(t) => self.temp_value(*t),
            Expr::Get { offset, ty } => self.read_register(*offset, *ty),
            Expr::GetI { descr, ix, bias } => {
                let ix = self.operand_value(ix).bits() as i64;
                self.read_register(descr.offset(ix, *bias), descr.elem_ty)
            }
            Expr::Load { addr, ty } => {
                let addr = self.operand_value(addr).bits();
                self.read_memory(addr, *ty)?
            }
            Expr::Unop { op, x } => eval_unop(*op, self.operand_value(x)),
            Expr::Binop { op, a, b } => {
                eval_binop(*op, self.operand_value(a), self.operand_value(b))
            }
            Expr::Triop { op, rm: _, a, b } => {
                eval_triop(*op, self.operand_value(a), self.operand_value(b))
            }
            Expr::Cvt { op, rm: _, x } => eval_cvt(*op, self.operand_value(x)),
            Expr::Pass { op, x, y } => {
                let y = y.as_ref().map(|o| self.operand_value(o));
                eval_pass(*op, self.operand_value(x), y)
            }
            Expr::Mux0X { cond, zero, other } => {
                if self.operand_value(cond).bits() == 0 {
                    self.operand_value(zero)
                } else {
                    self.operand_value(other)
                }
            }
        })
    }

    fn dispatch(&mut self, hook: &Hook) -> Result<(), EngineError> {
        match hook {
            Hook::BlockEntry => self.engine.on_block_entry(),

            Hook::UnOp(site) => {
                let args = UnOpArgs {
                    op: site.op,
                    origin: site.origin,
                    dst: site.dst,
                    x: self.slot(&site.x),
                    out: self.temp_bits(site.dst),
                };
                self.engine.process_un_op(&args)?;
            }
            Hook::BinOp(site) => {
                let args = BinOpArgs {
                    op: site.op,
                    origin: site.origin,
                    dst: site.dst,
                    a: self.slot(&site.a),
                    b: self.slot(&site.b),
                    out: self.temp_bits(site.dst),
                };
                self.engine.process_bin_op(&args)?;
            }
            Hook::TriOp(site) => {
                let args = TriOpArgs {
                    op: site.op,
                    origin: site.origin,
                    dst: site.dst,
                    a: self.slot(&site.a),
                    b: self.slot(&site.b),
                    out: self.temp_bits(site.dst),
                };
                self.engine.process_tri_op(&args)?;
            }
            Hook::Cmp(site) => {
                let args = CmpArgs {
                    origin: site.origin,
                    dst: site.dst,
                    a: self.slot(&site.a),
                    b: self.slot(&site.b),
                    out: self.temp_bits(site.dst),
                };
                let encoding = self.engine.process_cmp(&args)?;
                self.temps[site.dst] = Some(Value::I32(encoding.word() as u32));
            }
            Hook::Cvt(site) => {
                let args = CvtArgs {
                    op: site.op,
                    origin: site.origin,
                    dst: site.dst,
                    x: self.slot(&site.x),
                    out: self.temp_bits(site.dst),
                };
                if let Some(word) = self.engine.process_cvt(&args)? {
                    self.temps[site.dst] = Some(int_value(site.op, word));
                }
            }
            Hook::Widen(site) => {
                let args = WidenArgs {
                    op: site.op,
                    origin: site.origin,
                    dst: site.dst,
                    x: self.slot(&site.x),
                    out: self.temp_bits(site.dst),
                };
                self.engine.process_widen(&args)?;
            }
            Hook::Load(site) => {
                let out = self.temp_value(site.dst);
                let args = LoadArgs {
                    origin: site.origin,
                    dst: site.dst,
                    ty: site.ty,
                    addr: self.operand_value(&site.addr).bits(),
                    out: out.bits(),
                    out_hi: out.high_bits(),
                };
                self.engine.process_load(&args)?;
            }
            Hook::Store(site) => {
                let data = self.operand_value(&site.data.src);
                let args = StoreArgs {
                    origin: site.origin,
                    addr: self.operand_value(&site.addr).bits(),
                    ty: site.ty,
                    data: OperandSlot {
                        tmp: site.data.sv_tmp,
                        bits: data.bits(),
                    },
                    data_hi: data.high_bits(),
                };
                self.engine.process_store(&args);
            }
            Hook::Get(site) => {
                let out = self.temp_value(site.dst);
                let args = GetArgs {
                    origin: site.origin,
                    dst: site.dst,
                    offset: site.offset,
                    ty: site.ty,
                    out: out.bits(),
                    out_hi: out.high_bits(),
                };
                let tid = self.tid;
                self.engine.process_get(tid, &args)?;
            }
            Hook::Put(site) => {
                let data = self.operand_value(&site.data.src);
                let args = PutArgs {
                    origin: site.origin,
                    offset: site.offset,
                    ty: site.ty,
                    data: OperandSlot {
                        tmp: site.data.sv_tmp,
                        bits: data.bits(),
                    },
                    data_hi: data.high_bits(),
                };
                let tid = self.tid;
                self.engine.process_put(tid, &args);
            }
            Hook::GetI(site) => {
                let args = GetIArgs {
                    origin: site.origin,
                    dst: site.dst,
                    descr: site.descr,
                    bias: site.bias,
                    ix: self.operand_value(&site.ix).bits() as i64,
                    out: self.temp_bits(site.dst),
                };
                let tid = self.tid;
                self.engine.process_get_i(tid, &args)?;
            }
            Hook::PutI(site) => {
                let data = self.operand_value(&site.data.src);
                let args = PutIArgs {
                    origin: site.origin,
                    descr: site.descr,
                    bias: site.bias,
                    ix: self.operand_value(&site.ix).bits() as i64,
                    data: OperandSlot {
                        tmp: site.data.sv_tmp,
                        bits: data.bits(),
                    },
                };
                let tid = self.tid;
                self.engine.process_put_i(tid, &args);
            }
            Hook::Mux(site) => {
                let args = MuxArgs {
                    origin: site.origin,
                    dst: site.dst,
                    cond: self.operand_value(&site.cond).bits(),
                    zero: self.slot(&site.zero),
                    other: self.slot(&site.other),
                };
                self.engine.process_mux(&args);
            }
        }
        Ok(())
    }

    fn slot(&self, operand: &OperandRef) -> OperandSlot {
        OperandSlot {
            tmp: operand.sv_tmp,
            bits: self.operand_value(&operand.src).bits(),
        }
    }

    fn operand_value(&self, operand: &Operand) -> Value {
        match operand {
            Operand::Tmp(t) => self.temp_value(*t),
            Operand::Const(v) => *v,
        }
    }

    fn temp_value(&self, t: TempId) -> Value {
        self.temps[t].expect("temporary read before write")
    }

    fn temp_bits(&self, t: TempId) -> u64 {
        self.temp_value(t).bits()
    }

    fn write_register(&mut self, offset: RegOffset, value: Value) {
        let file = self
            .registers
            .entry(self.tid)
            .or_insert_with(|| vec![0u8; MAX_REGISTERS + 16]);

        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&value.bits().to_le_bytes());
        bytes[8..].copy_from_slice(&value.high_bits().to_le_bytes());
        file[offset..offset + value.ty().size()].copy_from_slice(&bytes[..value.ty().size()]);
    }

    fn read_memory(&self, addr: Addr, ty: Ty) -> Result<Value, EngineError> {
        let mut bytes = [0u8; 16];
        self.engine.host().read_bytes(addr, &mut bytes[..ty.size()])?;
        let lo = u64::from_le_bytes(bytes[..8].try_into().unwrap());
        let hi = u64::from_le_bytes(bytes[8..].try_into().unwrap());
        Ok(Value::from_bits(ty, lo, hi))
    }

    fn write_memory(&mut self, addr: Addr, value: Value) -> Result<(), EngineError> {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&value.bits().to_le_bytes());
        bytes[8..].copy_from_slice(&value.high_bits().to_le_bytes());
        self.engine
            .host_mut()
            .write_bytes(addr, &bytes[..value.ty().size()])
    }
}

fn f32_of(value: Value) -> f32 {
    match value {
        Value::F32(x) => x,
        other => panic!("expected F32 operand, got {other:?}"),
    }
}

fn f64_of(value: Value) -> f64 {
    match value {
        Value::F64(x) => x,
        other => panic!("expected F64 operand, got {other:?}"),
    }
}

fn u32_of(value: Value) -> u32 {
    match value {
        Value::I32(x) => x,
        other => panic!("expected I32 operand, got {other:?}"),
    }
}

fn u64_of(value: Value) -> u64 {
    match value {
        Value::I64(x) => x,
        other => panic!("expected I64 operand, got {other:?}"),
    }
}

fn v128_of(value: Value) -> [u64; 2] {
    match value {
        Value::V128(l) => l,
        other => panic!("expected V128 operand, got {other:?}"),
    }
}

fn eval_unop(op: UnFpOp, x: Value) -> Value {
    match op {
        UnFpOp::NegF32 => Value::F32(-f32_of(x)),
        UnFpOp::NegF64 => Value::F64(-f64_of(x)),
        UnFpOp::AbsF32 => Value::F32(f32_of(x).abs()),
        UnFpOp::AbsF64 => Value::F64(f64_of(x).abs()),
        UnFpOp::SqrtF32 => Value::F32(f32_of(x).sqrt()),
        UnFpOp::SqrtF64 => Value::F64(f64_of(x).sqrt()),
        UnFpOp::SinF64 => Value::F64(f64_of(x).sin()),
        UnFpOp::CosF64 => Value::F64(f64_of(x).cos()),
        UnFpOp::TanF64 => Value::F64(f64_of(x).tan()),
    }
}

// Scalar SSE min/max semantics: the second operand wins when the
// comparison is unordered or equal.
fn min_f64(a: f64, b: f64) -> f64 {
    if a < b {
        a
    } else {
        b
    }
}

fn max_f64(a: f64, b: f64) -> f64 {
    if a > b {
        a
    } else {
        b
    }
}

fn eval_binop(op: BinFpOp, a: Value, b: Value) -> Value {
    match op {
        BinFpOp::AddF32 => Value::F32(f32_of(a) + f32_of(b)),
        BinFpOp::SubF32 => Value::F32(f32_of(a) - f32_of(b)),
        BinFpOp::MulF32 => Value::F32(f32_of(a) * f32_of(b)),
        BinFpOp::DivF32 => Value::F32(f32_of(a) / f32_of(b)),
        BinFpOp::MinF32 => Value::F32(min_f64(f64::from(f32_of(a)), f64::from(f32_of(b))) as f32),
        BinFpOp::MaxF32 => Value::F32(max_f64(f64::from(f32_of(a)), f64::from(f32_of(b))) as f32),
        BinFpOp::AddF64 => Value::F64(f64_of(a) + f64_of(b)),
        BinFpOp::SubF64 => Value::F64(f64_of(a) - f64_of(b)),
        BinFpOp::MulF64 => Value::F64(f64_of(a) * f64_of(b)),
        BinFpOp::DivF64 => Value::F64(f64_of(a) / f64_of(b)),
        BinFpOp::MinF64 => Value::F64(min_f64(f64_of(a), f64_of(b))),
        BinFpOp::MaxF64 => Value::F64(max_f64(f64_of(a), f64_of(b))),
        BinFpOp::CmpF64 => Value::I32(CmpResult::of(f64_of(a), f64_of(b)).word() as u32),
    }
}

fn eval_triop(op: TriFpOp, a: Value, b: Value) -> Value {
    match op {
        TriFpOp::AddF32 => Value::F32(f32_of(a) + f32_of(b)),
        TriFpOp::SubF32 => Value::F32(f32_of(a) - f32_of(b)),
        TriFpOp::MulF32 => Value::F32(f32_of(a) * f32_of(b)),
        TriFpOp::DivF32 => Value::F32(f32_of(a) / f32_of(b)),
        TriFpOp::AddF64 => Value::F64(f64_of(a) + f64_of(b)),
        TriFpOp::SubF64 => Value::F64(f64_of(a) - f64_of(b)),
        TriFpOp::MulF64 => Value::F64(f64_of(a) * f64_of(b)),
        TriFpOp::DivF64 => Value::F64(f64_of(a) / f64_of(b)),
        TriFpOp::Atan2F64 => Value::F64(f64_of(a).atan2(f64_of(b))),
        TriFpOp::ScaleBF64 => Value::F64(f64_of(a) * 2f64.powi(f64_of(b) as i32)),
    }
}

fn eval_cvt(op: CvtOp, x: Value) -> Value {
    let rounded = f64_of(x).round_ties_even();
    int_value(op, match op {
        CvtOp::F64toI16S => rounded as i16 as u16 as Word,
        CvtOp::F64toI32S => rounded as i32 as u32 as Word,
        CvtOp::F64toI64S => rounded as i64 as Word,
        CvtOp::F64toI16U => Word::from(rounded as u16),
        CvtOp::F64toI32U => Word::from(rounded as u32),
        CvtOp::F64toI64U => rounded as u64,
    })
}

fn int_value(op: CvtOp, word: Word) -> Value {
    match op.result_bits() {
        16 => Value::I16(word as u16),
        32 => Value::I32(word as u32),
        _ => Value::I64(word),
    }
}

fn eval_pass(op: PassOp, x: Value, y: Option<Value>) -> Value {
    match op {
        PassOp::F32toF64 => Value::F64(f64::from(f32_of(x))),
        PassOp::F64toF32 => Value::F32(f64_of(x) as f32),
        PassOp::ReinterpF64asI64 => Value::I64(f64_of(x).to_bits()),
        PassOp::ReinterpI64asF64 => Value::F64(f64::from_bits(u64_of(x))),
        PassOp::I32UtoV128 => Value::V128([u64::from(u32_of(x)), 0]),
        PassOp::V128toI64Lo => Value::I64(v128_of(x)[0]),
        PassOp::V128toI64Hi => Value::I64(v128_of(x)[1]),
        PassOp::I64toI32Lo => Value::I32(u64_of(x) as u32),
        PassOp::I64toI32Hi => Value::I32((u64_of(x) >> 32) as u32),
        PassOp::I64UtoV128 => Value::V128([u64_of(x), 0]),
        PassOp::I32Uto64 => Value::I64(u64::from(u32_of(x))),
        PassOp::I64HLtoV128 => {
            let lo = u64_of(y.expect("HL pack needs a low half"));
            Value::V128([lo, u64_of(x)])
        }
        PassOp::I32HLto64 => {
            let lo = u32_of(y.expect("HL pack needs a low half"));
            Value::I64(u64::from(u32_of(x)) << 32 | u64::from(lo))
        }
    }
}
