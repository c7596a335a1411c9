use shadowfp::prelude::*;

fn runner() -> BlockRunner {
    BlockRunner::new(Options::default()).expect("engine creation")
}

/// `a = 1.0e8 + 1.0e-8; b = a - 1.0e8` in single precision: the small
/// addend is absorbed by the guest and fully cancelled out of the shadow.
fn cancellation_block() -> Block {
    let mut block = Block::new(vec![Ty::F32, Ty::F32]);
    block
        .push(Stmt::IMark { addr: 0x1000, len: 4 })
        .push(Stmt::WrTmp {
            dst: 0,
            rhs: Expr::Binop {
                op: BinFpOp::AddF32,
                a: Operand::Const(Value::F32(1.0e8)),
                b: Operand::Const(Value::F32(1.0e-8)),
            },
        })
        .push(Stmt::IMark { addr: 0x1004, len: 4 })
        .push(Stmt::WrTmp {
            dst: 1,
            rhs: Expr::Binop {
                op: BinFpOp::SubF32,
                a: Operand::Tmp(0),
                b: Operand::Const(Value::F32(1.0e8)),
            },
        })
        .push(Stmt::Store {
            addr: Operand::Const(Value::I64(0x100)),
            src: Operand::Tmp(1),
        });
    block
}

#[test]
fn catastrophic_cancellation_is_detected() {
    let mut runner = runner();
    runner.run_block(&cancellation_block()).unwrap();

    let engine = runner.engine();
    let sv = engine
        .store()
        .get_temp(1, engine.block_count())
        .expect("shadow for the difference");

    assert!(sv.canceled() > 20, "canceled = {}", sv.canceled());
    assert_eq!(sv.cancel_origin(), 0x1004);
    assert!(sv.relative_error() > 1e-7);

    // The guest computed exactly zero; the shadow kept the small addend.
    assert_eq!(runner.temp(1), Some(Value::F32(0.0)));
}

#[test]
fn mean_values_record_the_cancellation_site() {
    let mut runner = runner();
    runner.run_block(&cancellation_block()).unwrap();

    let entry = runner
        .engine()
        .mean_values()
        .get(0x1004)
        .expect("mean entry for the subtraction");

    assert_eq!(entry.count, 1);
    assert!(entry.canceled_max >= 20);
    assert_eq!(entry.arg1_origin, 0x1000);
    assert_eq!(entry.arg2_origin, 0);
}

#[test]
fn cancellation_propagates_max_wise_downstream() {
    let mut block = cancellation_block();
    block.tyenv.push(Ty::F32);
    block
        .push(Stmt::IMark { addr: 0x1008, len: 4 })
        .push(Stmt::WrTmp {
            dst: 2,
            rhs: Expr::Binop {
                op: BinFpOp::MulF32,
                a: Operand::Tmp(1),
                b: Operand::Const(Value::F32(2.0)),
            },
        });

    let mut runner = runner();
    runner.run_block(&block).unwrap();

    let engine = runner.engine();
    let product = engine.store().get_temp(2, engine.block_count()).unwrap();
    let difference = engine.store().get_temp(1, engine.block_count()).unwrap();

    assert_eq!(product.canceled(), difference.canceled());
    assert_eq!(product.cancel_origin(), 0x1004);
    assert_eq!(product.op_count(), difference.op_count() + 1);
}

#[test]
fn guest_precision_channels_follow_the_operation_width() {
    let mut runner = runner();
    runner.run_block(&cancellation_block()).unwrap();

    let engine = runner.engine();
    let sv = engine.store().get_temp(1, engine.block_count()).unwrap();

    assert_eq!(sv.mid_value().prec(), 24);
    assert_eq!(sv.ori_value().prec(), 24);
    assert_eq!(sv.value().prec(), 120);
}

#[test]
fn memory_entry_mirrors_the_stored_shadow() {
    let mut runner = runner();
    runner.run_block(&cancellation_block()).unwrap();

    let sv = runner
        .engine()
        .store()
        .get_mem(0x100)
        .expect("tracked store allocated a memory shadow");

    assert!(sv.relative_error() > 1e-7);
    assert_eq!(sv.org(), IeeeValue::F32(0.0));
}
