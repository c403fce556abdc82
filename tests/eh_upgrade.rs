mod common;

use bitcode30::ir::{ClauseKind, InstKind, Value};
use bitcode30::{parse_bitcode, BitcodeReader};
use common::{blocks, BitWriter};

/// A module in the pre-landingpad exception style: an invoke whose unwind
/// destination calls `llvm.eh.exception` and `llvm.eh.selector` with one
/// catch-all clause.
fn legacy_eh_module() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);

    w.enter_block(blocks::TYPE_NEW, 3);
    w.unabbrev_record(1, &[12]);
    w.unabbrev_record(2, &[]); // 0: void
    w.unabbrev_record(7, &[8]); // 1: i8
    w.unabbrev_record(8, &[1]); // 2: i8*
    w.unabbrev_record(7, &[32]); // 3: i32
    w.unabbrev_record(21, &[0, 0]); // 4: void ()
    w.unabbrev_record(8, &[4]); // 5: void ()*
    w.unabbrev_record(21, &[0, 2]); // 6: i8* ()
    w.unabbrev_record(8, &[6]); // 7: i8* ()*
    w.unabbrev_record(21, &[1, 3, 2, 2]); // 8: i32 (i8*, i8*, ...)
    w.unabbrev_record(8, &[8]); // 9: pointer to 8
    w.unabbrev_record(21, &[1, 3]); // 10: i32 (...)
    w.unabbrev_record(8, &[10]); // 11: pointer to 10
    w.end_block();

    w.unabbrev_record(8, &[5, 0, 0, 0, 0, 0, 0, 0]); // v0: define main
    w.unabbrev_record(8, &[5, 0, 1, 0, 0, 0, 0, 0]); // v1: declare foo
    w.unabbrev_record(8, &[7, 0, 1, 0, 0, 0, 0, 0]); // v2: eh.exception
    w.unabbrev_record(8, &[9, 0, 1, 0, 0, 0, 0, 0]); // v3: eh.selector
    w.unabbrev_record(8, &[11, 0, 1, 0, 0, 0, 0, 0]); // v4: personality

    w.enter_block(blocks::CONSTANTS, 3);
    w.unabbrev_record(1, &[2]); // SETTYPE i8*
    w.unabbrev_record(2, &[]); // v5: null i8* (the catch-all)
    w.end_block();

    w.enter_block(blocks::VALUE_SYMTAB, 3);
    w.string_record(1, &[0], "main");
    w.string_record(1, &[2], "llvm.eh.exception");
    w.string_record(1, &[3], "llvm.eh.selector");
    w.string_record(1, &[4], "__gxx_personality_v0");
    w.end_block();

    w.enter_block(blocks::FUNCTION, 4);
    w.unabbrev_record(1, &[3]); // entry, cont, lpad
    // entry: invoke void @foo() to cont unwind lpad
    w.unabbrev_record(13, &[0, 0, 1, 2, 1]);
    // cont: ret void
    w.unabbrev_record(10, &[]);
    // lpad: %exn = call i8* @llvm.eh.exception()
    w.unabbrev_record(34, &[0, 0, 2]);
    //       %sel = call i32 @llvm.eh.selector(%exn, @pers, null)
    w.unabbrev_record(34, &[0, 0, 3, 6, 4, 5]);
    //       ret void
    w.unabbrev_record(10, &[]);
    w.end_block();

    w.end_block();
    w.finish()
}

#[test]
fn intrinsic_exception_handling_becomes_a_landing_pad() {
    let data = legacy_eh_module();
    let module = parse_bitcode(&data).expect("legacy EH module");

    let main = module.function_by_name("main").expect("main");
    let func = module.function(main);
    let personality_fid = module
        .function_by_name("__gxx_personality_v0")
        .expect("personality");
    let exn_fid = module.function_by_name("llvm.eh.exception").expect("exn");
    let sel_fid = module.function_by_name("llvm.eh.selector").expect("sel");

    // Slots for the exception object and selector live in the entry
    // block, in front of the invoke.
    let entry_kinds: Vec<_> = func.blocks[0]
        .insts
        .iter()
        .map(|&i| &func.inst(i).kind)
        .collect();
    assert!(matches!(entry_kinds[0], InstKind::Alloca { .. }));
    assert!(matches!(entry_kinds[1], InstKind::Alloca { .. }));
    assert!(matches!(entry_kinds[2], InstKind::Invoke { .. }));

    // The unwind destination now opens with a landing pad carrying the
    // translated catch clause.
    let lpad_block = &func.blocks[2];
    let first = func.inst(lpad_block.insts[0]);
    let InstKind::LandingPad {
        personality,
        cleanup,
        clauses,
    } = &first.kind
    else {
        panic!("unwind destination does not start with a landingpad");
    };
    assert!(!*cleanup, "catch-all selector is not a cleanup");
    assert_eq!(clauses.len(), 1);
    assert_eq!(clauses[0].0, ClauseKind::Catch);
    assert!(matches!(
        module.value(*personality),
        Value::Function(f) if *f == personality_fid
    ));

    // Both intrinsic calls are gone from the function.
    for block in &func.blocks {
        for &inst in &block.insts {
            if let InstKind::Call { callee, .. } = &func.inst(inst).kind {
                let target = module.value(*callee);
                assert!(
                    !matches!(target, Value::Function(f) if *f == exn_fid || *f == sel_fid),
                    "an intrinsic call survived the upgrade"
                );
            }
        }
    }
}

/// Running the upgrade a second time changes nothing: destinations that
/// already open with a landing pad are left alone.
#[test]
fn exception_upgrade_is_idempotent() {
    let data = legacy_eh_module();
    let mut reader = BitcodeReader::new(&data).expect("reader");
    reader.parse().expect("parse");
    reader.materialize_all().expect("first materialization");

    let main = reader.module().function_by_name("main").expect("main");
    let shape = |reader: &BitcodeReader| -> Vec<usize> {
        reader
            .module()
            .function(main)
            .blocks
            .iter()
            .map(|b| b.insts.len())
            .collect()
    };
    let before = shape(&reader);
    reader.materialize_all().expect("second materialization");
    assert_eq!(shape(&reader), before);
}

/// The removed `unwind` terminator reads back as a cleanup landing pad
/// and a resume of its aggregate.
#[test]
fn unwind_terminator_is_rewritten() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.enter_block(blocks::TYPE_NEW, 3);
    w.unabbrev_record(1, &[3]);
    w.unabbrev_record(2, &[]); // void
    w.unabbrev_record(21, &[0, 0]); // void ()
    w.unabbrev_record(8, &[1]); // void ()*
    w.end_block();
    w.unabbrev_record(8, &[2, 0, 0, 0, 0, 0, 0, 0]);
    w.enter_block(blocks::FUNCTION, 4);
    w.unabbrev_record(1, &[1]);
    w.unabbrev_record(14, &[]); // the old unwind terminator
    w.end_block();
    w.end_block();

    let module = parse_bitcode(&w.finish()).expect("unwind module");
    let func = &module.functions[0];
    assert_eq!(func.blocks[0].insts.len(), 2);

    let lp = func.inst(func.blocks[0].insts[0]);
    let InstKind::LandingPad {
        personality,
        cleanup,
        clauses,
    } = &lp.kind
    else {
        panic!("expected a landingpad, got {:?}", lp.kind);
    };
    assert!(*cleanup);
    assert!(clauses.is_empty());

    let pers_fid = module
        .function_by_name("__gcc_personality_v0")
        .expect("gcc personality was created");
    assert!(matches!(
        module.value(*personality),
        Value::Function(f) if *f == pers_fid
    ));

    let resume = func.inst(func.blocks[0].insts[1]);
    let InstKind::Resume { value } = &resume.kind else {
        panic!("expected a resume, got {:?}", resume.kind);
    };
    assert!(matches!(module.value(*value), Value::Inst { .. }));
}
