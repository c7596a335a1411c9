use shadowfp::prelude::*;

const P: Addr = 0x100;

fn tracked_value_at_p() -> BlockRunner {
    let mut runner = BlockRunner::new(Options::default()).unwrap();

    // x = (0.1 + 0.2) stored to P; the shadow differs from the guest by
    // the usual representation error.
    let mut block = Block::new(vec![Ty::F64]);
    block
        .push(Stmt::IMark { addr: 0x7000, len: 4 })
        .push(Stmt::WrTmp {
            dst: 0,
            rhs: Expr::Binop {
                op: BinFpOp::AddF64,
                a: Operand::Const(Value::F64(0.1)),
                b: Operand::Const(Value::F64(0.2)),
            },
        })
        .push(Stmt::Store {
            addr: Operand::Const(Value::I64(P)),
            src: Operand::Tmp(0),
        });

    runner.run_block(&block).unwrap();
    runner
}

#[test]
fn original_to_shadow_round_trip_is_identity() {
    let mut runner = tracked_value_at_p();
    let before = runner.host().read_f64(P).unwrap();

    runner
        .client_request(ClientRequest::OriginalToShadow(P))
        .unwrap();
    runner
        .client_request(ClientRequest::ShadowToOriginal(P))
        .unwrap();

    let after = runner.host().read_f64(P).unwrap();
    assert_eq!(before.to_bits(), after.to_bits());

    let sv = runner.engine().store().get_mem(P).unwrap();
    assert_eq!(sv.value().to_f64(), before);
    assert_eq!(sv.relative_error(), 0.0);
}

#[test]
fn insert_then_set_shadow_collapses_onto_guest_precision() {
    let mut runner = tracked_value_at_p();

    runner
        .client_request(ClientRequest::InsertShadow(P))
        .unwrap();
    runner.client_request(ClientRequest::SetShadow(P)).unwrap();

    let sv = runner.engine().store().get_mem(P).unwrap();
    assert_eq!(sv.value().to_f64(), sv.mid_value().to_f64());
}

#[test]
fn set_shadow_by_copies_between_memory_entries() {
    let mut runner = tracked_value_at_p();

    runner
        .client_request(ClientRequest::SetShadowBy { dst: 0x200, src: P })
        .unwrap();

    let src = runner.engine().store().get_mem(P).unwrap().value().clone();
    let dst = runner.engine().store().get_mem(0x200).unwrap();
    assert_eq!(dst.value(), &src);
}

#[test]
fn get_relative_error_writes_readable_text() {
    let mut runner = tracked_value_at_p();

    runner
        .client_request(ClientRequest::GetRelativeError { addr: P, buf: 0x400 })
        .unwrap();

    let text = runner.host().read_str(0x400).unwrap();
    let rel: f64 = text.parse().expect("parsable relative error");
    assert!(rel >= 0.0 && rel < 1e-10);
}

#[test]
fn get_shadow_writes_the_value_text() {
    let mut runner = tracked_value_at_p();

    runner
        .client_request(ClientRequest::GetShadow { addr: P, buf: 0x400 })
        .unwrap();

    let text = runner.host().read_str(0x400).unwrap();
    assert!(text.contains('3'), "unexpected shadow rendering: {text}");
}

#[test]
fn reset_deactivates_everything_and_is_idempotent() {
    let mut runner = tracked_value_at_p();
    assert!(runner.engine().store().get_mem(P).is_some());

    runner.client_request(ClientRequest::Reset).unwrap();
    assert!(runner.engine().store().get_mem(P).is_none());
    let live = runner.engine().store().live_count();
    assert_eq!(live, 0);

    runner.client_request(ClientRequest::Reset).unwrap();
    assert_eq!(runner.engine().store().live_count(), live);
}

#[test]
fn begin_end_gate_the_analysis() {
    let mut runner = tracked_value_at_p();

    runner.client_request(ClientRequest::End).unwrap();
    assert!(!runner.engine().is_enabled());

    // With analysis off, tracked state is not extended.
    runner.client_request(ClientRequest::Reset).unwrap();
    let mut block = Block::new(vec![Ty::F64]);
    block.push(Stmt::WrTmp {
        dst: 0,
        rhs: Expr::Binop {
            op: BinFpOp::AddF64,
            a: Operand::Const(Value::F64(1.0)),
            b: Operand::Const(Value::F64(2.0)),
        },
    });
    runner.run_block(&block).unwrap();
    assert_eq!(runner.engine().store().live_count(), 0);

    runner.client_request(ClientRequest::Begin).unwrap();
    runner.run_block(&block).unwrap();
    assert!(runner.engine().store().live_count() > 0);
}

#[test]
fn end_is_ignored_when_configured() {
    use clap::Parser;
    let options = Options::try_parse_from(["shadowfp", "--ignore-end=yes"]).unwrap();
    let mut runner = BlockRunner::new(options).unwrap();

    runner.client_request(ClientRequest::End).unwrap();
    assert!(runner.engine().is_enabled());
}

#[test]
fn raw_tags_decode_and_unknown_tags_fail() {
    let request = ClientRequest::decode(tags::BEGIN_STAGE, [3, 0, 0, 0]).unwrap();
    assert_eq!(request, ClientRequest::BeginStage(3));

    let request = ClientRequest::decode(tags::ERROR_GREATER, [P, 0x200, 0, 0]).unwrap();
    assert_eq!(
        request,
        ClientRequest::ErrorGreater {
            addr: P,
            bound: 0x200
        }
    );

    assert!(matches!(
        ClientRequest::decode(0xdead_beef, [0; 4]),
        Err(EngineError::UnknownClientRequest(0xdead_beef))
    ));
}
