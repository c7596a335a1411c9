use clap::Parser;
use shadowfp::prelude::*;

use std::fs;
use std::path::Path;

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

fn run_and_finish(object: &Path) -> Vec<std::path::PathBuf> {
    let mut runner =
        BlockRunner::with_host(Options::default(), MemHost::new(object)).unwrap();
    runner.run_block(&cancellation_block()).unwrap();
    runner.engine_mut().finish().unwrap()
}

#[test]
fn reports_land_beside_the_object_with_fresh_numbers() {
    let dir = tempfile::tempdir().unwrap();
    let object = dir.path().join("guest");

    let paths = run_and_finish(&object);
    assert_eq!(paths.len(), 8);
    for path in &paths {
        assert!(path.exists(), "{path:?} missing");
        assert!(path.to_string_lossy().ends_with('1'));
    }

    // A second run picks the next free number.
    let paths = run_and_finish(&object);
    assert!(paths.iter().all(|p| p.to_string_lossy().ends_with('2')));
}

#[test]
fn relative_error_report_lists_the_bad_address() {
    let dir = tempfile::tempdir().unwrap();
    let object = dir.path().join("guest");

    let paths = run_and_finish(&object);
    let report = paths
        .iter()
        .find(|p| p.to_string_lossy().contains("relative_error"))
        .unwrap();
    let contents = fs::read_to_string(report).unwrap();

    assert!(contents.contains("single-lane"));
    assert!(contents.contains("0x100"));
}

#[test]
fn mean_error_reports_name_the_origins() {
    let dir = tempfile::tempdir().unwrap();
    let object = dir.path().join("guest");

    let paths = run_and_finish(&object);
    let addr_report = paths
        .iter()
        .find(|p| p.to_string_lossy().contains("mean_errors_addr"))
        .unwrap();
    let contents = fs::read_to_string(addr_report).unwrap();
    assert!(contents.contains("0x1004"));

    let canceled_report = paths
        .iter()
        .find(|p| p.to_string_lossy().contains("mean_errors_canceled"))
        .unwrap();
    let contents = fs::read_to_string(canceled_report).unwrap();
    assert!(contents.contains("0x1004"));

    let intro_report = paths
        .iter()
        .find(|p| p.to_string_lossy().contains("mean_errors_intro"))
        .unwrap();
    let contents = fs::read_to_string(intro_report).unwrap();
    assert!(contents.contains("introduced"));
}

#[test]
fn finish_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let object = dir.path().join("guest");

    let mut runner =
        BlockRunner::with_host(Options::default(), MemHost::new(&object)).unwrap();
    runner.run_block(&cancellation_block()).unwrap();

    let first = runner.engine_mut().finish().unwrap();
    assert_eq!(first.len(), 8);
    let second = runner.engine_mut().finish().unwrap();
    assert!(second.is_empty());
}

#[test]
fn accurate_values_are_suppressed_unless_asked() {
    let dir = tempfile::tempdir().unwrap();
    let object = dir.path().join("guest");

    // An accurate store: no representation error at all.
    let mut block = Block::new(vec![Ty::F64]);
    block
        .push(Stmt::IMark { addr: 0x1100, len: 4 })
        .push(Stmt::WrTmp {
            dst: 0,
            rhs: Expr::Binop {
                op: BinFpOp::AddF64,
                a: Operand::Const(Value::F64(1.0)),
                b: Operand::Const(Value::F64(2.0)),
            },
        })
        .push(Stmt::Store {
            addr: Operand::Const(Value::I64(0x200)),
            src: Operand::Tmp(0),
        });

    let mut runner =
        BlockRunner::with_host(Options::default(), MemHost::new(&object)).unwrap();
    runner.run_block(&block).unwrap();
    let paths = runner.engine_mut().finish().unwrap();
    let report = paths
        .iter()
        .find(|p| p.to_string_lossy().contains("relative_error"))
        .unwrap();
    assert!(!fs::read_to_string(report).unwrap().contains("0x200"));

    let options = Options::try_parse_from(["shadowfp", "--ignore-accurate=no"]).unwrap();
    let object = dir.path().join("guest2");
    let mut runner = BlockRunner::with_host(options, MemHost::new(&object)).unwrap();
    runner.run_block(&block).unwrap();
    let paths = runner.engine_mut().finish().unwrap();
    let report = paths
        .iter()
        .find(|p| p.to_string_lossy().contains("relative_error"))
        .unwrap();
    assert!(fs::read_to_string(report).unwrap().contains("0x200"));
}

#[test]
fn error_graphs_dump_in_vcg_format() {
    let dir = tempfile::tempdir().unwrap();
    let object = dir.path().join("guest");
    let options = Options::try_parse_from(["shadowfp", "--error-localization=yes"]).unwrap();

    let mut runner = BlockRunner::with_host(options, MemHost::new(&object)).unwrap();
    runner.run_block(&cancellation_block()).unwrap();

    let base = dir.path().join("graph");
    runner
        .host_mut()
        .write_str(0x900, base.to_str().unwrap())
        .unwrap();
    runner
        .client_request(ClientRequest::DumpErrorGraph {
            file: 0x900,
            addr: 0x100,
            only_errors: false,
        })
        .unwrap();

    let dumped: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "vcg"))
        .collect();
    assert_eq!(dumped.len(), 1);

    let contents = fs::read_to_string(&dumped[0]).unwrap();
    assert!(contents.starts_with("graph: {"));
    assert!(contents.contains("node: { title: \"0x1004\""));
    assert!(contents.contains("edge: { sourcename: \"0x1004\" targetname: \"0x1000\" }"));
}
