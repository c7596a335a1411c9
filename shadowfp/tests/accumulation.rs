use rug::Float;
use shadowfp::prelude::*;

/// Accumulate the single-precision rendering of 1/5 five times. Each guest
/// addition rounds; the shadow holds the exact sum of the same constants.
fn accumulation_block() -> Block {
    let addend = 1.0f32 / 5.0f32;
    let mut block = Block::new(vec![Ty::F32; 5]);

    block.push(Stmt::IMark { addr: 0x2000, len: 4 });
    for i in 0..5 {
        let acc = if i == 0 {
            Operand::Const(Value::F32(0.0))
        } else {
            Operand::Tmp(i - 1)
        };
        block.push(Stmt::WrTmp {
            dst: i,
            rhs: Expr::Binop {
                op: BinFpOp::AddF32,
                a: acc,
                b: Operand::Const(Value::F32(addend)),
            },
        });
    }
    block.push(Stmt::Store {
        addr: Operand::Const(Value::I64(0x100)),
        src: Operand::Tmp(4),
    });

    block
}

#[test]
fn rounding_accumulates_in_the_guest_but_not_the_shadow() {
    let mut runner = BlockRunner::new(Options::default()).unwrap();
    runner.run_block(&accumulation_block()).unwrap();

    let engine = runner.engine();
    let sv = engine.store().get_temp(4, engine.block_count()).unwrap();

    // The shadow sums the f32 constants exactly.
    let exact = 5.0 * f64::from(1.0f32 / 5.0f32);
    let deviation = Float::with_val(120, sv.value() - exact);
    assert!(deviation.clone().abs() < Float::with_val(120, 1u32) >> 100u32);

    assert_eq!(sv.op_count(), 5);
    assert!(sv.relative_error() > 1e-9);
    assert!(sv.relative_error() < 1e-6);
}

#[test]
fn error_greater_answers_against_a_guest_bound() {
    let mut runner = BlockRunner::new(Options::default()).unwrap();
    runner.run_block(&accumulation_block()).unwrap();

    runner.host_mut().poke_f64(0x200, 1e-12);
    let above = runner
        .client_request(ClientRequest::ErrorGreater {
            addr: 0x100,
            bound: 0x200,
        })
        .unwrap();
    assert_eq!(above, Some(1));

    runner.host_mut().poke_f64(0x200, 1.0);
    let below = runner
        .client_request(ClientRequest::ErrorGreater {
            addr: 0x100,
            bound: 0x200,
        })
        .unwrap();
    assert_eq!(below, Some(0));
}

#[test]
fn mean_entry_counts_every_evaluation_at_the_origin() {
    let mut runner = BlockRunner::new(Options::default()).unwrap();
    let block = accumulation_block();

    for _ in 0..3 {
        runner.run_block(&block).unwrap();
    }

    // All five additions share one instruction marker.
    let entry = runner.engine().mean_values().get(0x2000).unwrap();
    assert_eq!(entry.count, 15);
}
