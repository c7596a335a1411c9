use shadowfp::prelude::*;

const X: Addr = 0x100;

/// Iteration 1 writes `x = 1/3`; the shadow matches to within an ulp.
fn first_iteration() -> Block {
    let mut block = Block::new(vec![Ty::F64]);
    block
        .push(Stmt::IMark { addr: 0x6000, len: 4 })
        .push(Stmt::WrTmp {
            dst: 0,
            rhs: Expr::Binop {
                op: BinFpOp::DivF64,
                a: Operand::Const(Value::F64(1.0)),
                b: Operand::Const(Value::F64(3.0)),
            },
        })
        .push(Stmt::Store {
            addr: Operand::Const(Value::I64(X)),
            src: Operand::Tmp(0),
        });
    block
}

/// Iteration 2 writes `x = (2^12 + 1/3) - 2^12`: the guest sheds the bits
/// of 1/3 below 2^-40 while the shadow cancels exactly, so the written
/// value diverges from its shadow by about 2^-40.
fn second_iteration() -> Block {
    let mut block = Block::new(vec![Ty::F64, Ty::F64, Ty::F64]);
    block
        .push(Stmt::IMark { addr: 0x6010, len: 4 })
        .push(Stmt::WrTmp {
            dst: 0,
            rhs: Expr::Binop {
                op: BinFpOp::DivF64,
                a: Operand::Const(Value::F64(1.0)),
                b: Operand::Const(Value::F64(3.0)),
            },
        })
        .push(Stmt::WrTmp {
            dst: 1,
            rhs: Expr::Binop {
                op: BinFpOp::AddF64,
                a: Operand::Const(Value::F64(4096.0)),
                b: Operand::Tmp(0),
            },
        })
        .push(Stmt::WrTmp {
            dst: 2,
            rhs: Expr::Binop {
                op: BinFpOp::SubF64,
                a: Operand::Tmp(1),
                b: Operand::Const(Value::F64(4096.0)),
            },
        })
        .push(Stmt::Store {
            addr: Operand::Const(Value::I64(X)),
            src: Operand::Tmp(2),
        });
    block
}

#[test]
fn divergence_across_iterations_is_reported() {
    let mut runner = BlockRunner::new(Options::default()).unwrap();

    runner.client_request(ClientRequest::BeginStage(0)).unwrap();
    runner.run_block(&first_iteration()).unwrap();
    runner.client_request(ClientRequest::EndStage(0)).unwrap();

    runner.client_request(ClientRequest::BeginStage(0)).unwrap();
    runner.run_block(&second_iteration()).unwrap();
    runner.client_request(ClientRequest::EndStage(0)).unwrap();

    let reports: Vec<_> = runner.engine().stages().reports().collect();
    assert_eq!(reports.len(), 1);

    let ((stage, addr), report) = reports[0];
    assert_eq!((*stage, *addr), (0, X));
    assert_eq!(report.count, 1);
    assert_eq!(report.iter_min, 2);
    assert_eq!(report.iter_max, 2);
    assert!(report.limit > 2f64.powi(-45) && report.limit < 2f64.powi(-38));
}

#[test]
fn identical_iterations_stay_quiet() {
    let mut runner = BlockRunner::new(Options::default()).unwrap();

    for _ in 0..3 {
        runner.client_request(ClientRequest::BeginStage(0)).unwrap();
        runner.run_block(&first_iteration()).unwrap();
        runner.client_request(ClientRequest::EndStage(0)).unwrap();
    }

    assert_eq!(runner.engine().stages().reports().count(), 0);
}

#[test]
fn cleared_stages_forget_their_history() {
    let mut runner = BlockRunner::new(Options::default()).unwrap();

    runner.client_request(ClientRequest::BeginStage(0)).unwrap();
    runner.run_block(&first_iteration()).unwrap();
    runner.client_request(ClientRequest::EndStage(0)).unwrap();
    runner.client_request(ClientRequest::ClearStage(0)).unwrap();

    runner.client_request(ClientRequest::BeginStage(0)).unwrap();
    runner.run_block(&second_iteration()).unwrap();
    runner.client_request(ClientRequest::EndStage(0)).unwrap();

    assert_eq!(runner.engine().stages().reports().count(), 0);
}

#[test]
fn stores_outside_a_stage_iteration_are_not_tracked() {
    let mut runner = BlockRunner::new(Options::default()).unwrap();

    runner.run_block(&first_iteration()).unwrap();

    runner.client_request(ClientRequest::BeginStage(0)).unwrap();
    runner.run_block(&second_iteration()).unwrap();
    runner.client_request(ClientRequest::EndStage(0)).unwrap();

    // Only one iteration saw stores; there is nothing to pair against.
    assert_eq!(runner.engine().stages().reports().count(), 0);
}
