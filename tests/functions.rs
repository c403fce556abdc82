mod common;

use bitcode30::ir::{InstKind, MdOperand, Metadata, Value};
use bitcode30::{parse_bitcode, BitcodeReader, Error};
use common::{blocks, sign_rotate, BitWriter};

/// Emit the shared prefix for a module with void-function machinery:
/// void (slot0), void() (slot1), void()* (slot2).
fn void_fn_types(w: &mut BitWriter) {
    w.enter_block(blocks::TYPE_NEW, 3);
    w.unabbrev_record(1, &[3]);
    w.unabbrev_record(2, &[]); // void
    w.unabbrev_record(21, &[0, 0]); // void ()
    w.unabbrev_record(8, &[1]); // void ()*
    w.end_block();
}

fn empty_body(w: &mut BitWriter) {
    w.enter_block(blocks::FUNCTION, 4);
    w.unabbrev_record(1, &[1]); // DECLAREBLOCKS 1
    w.unabbrev_record(10, &[]); // RET void
    w.end_block();
}

#[test]
fn lazy_materialization_round_trip() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    void_fn_types(&mut w);
    w.unabbrev_record(8, &[2, 0, 0, 0, 0, 0, 0, 0]); // define foo
    w.unabbrev_record(8, &[2, 0, 0, 0, 0, 0, 0, 0]); // define bar
    w.enter_block(blocks::VALUE_SYMTAB, 3);
    w.string_record(1, &[0], "foo");
    w.string_record(1, &[1], "bar");
    w.end_block();
    empty_body(&mut w); // foo's body
    empty_body(&mut w); // bar's body
    w.end_block();
    let data = w.finish();

    let mut reader = BitcodeReader::new(&data).expect("reader");
    reader.parse().expect("module parse");

    let foo = reader.module().function_by_name("foo").expect("foo");
    let bar = reader.module().function_by_name("bar").expect("bar");
    assert!(reader.is_materializable(foo));
    assert!(reader.is_materializable(bar));
    assert!(reader.module().function(foo).is_declaration());
    assert!(reader.module().function(bar).is_declaration());

    // Materialize only the second function.
    reader.materialize(bar).expect("materialize bar");
    assert!(reader.module().function(foo).is_declaration());
    assert!(!reader.module().function(bar).is_declaration());
    assert_eq!(reader.module().function(bar).blocks.len(), 1);

    reader.materialize(foo).expect("materialize foo");
    assert!(!reader.module().function(foo).is_declaration());
    assert!(!reader.module().function(bar).is_declaration());

    // Dematerialize the first; it reads back on demand.
    reader.dematerialize(foo);
    assert!(reader.module().function(foo).is_declaration());
    assert!(reader.is_materializable(foo));
    reader.materialize(foo).expect("re-materialize foo");
    assert!(!reader.module().function(foo).is_declaration());
}

#[test]
fn a_body_without_a_prototype_is_rejected() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    void_fn_types(&mut w);
    empty_body(&mut w);
    w.end_block();

    match parse_bitcode(&w.finish()) {
        Err(Error::InsufficientFunctionProtos) => {}
        other => panic!("expected missing-proto rejection, got {other:?}"),
    }
}

/// Decode a small arithmetic body: add, store-like ret of the result, and
/// check operand wiring plus debug locations.
#[test]
fn instruction_bodies_decode() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.enter_block(blocks::TYPE_NEW, 3);
    w.unabbrev_record(1, &[3]);
    w.unabbrev_record(7, &[32]); // slot0: i32
    w.unabbrev_record(21, &[0, 0, 0, 0]); // slot1: i32 (i32, i32)
    w.unabbrev_record(8, &[1]); // slot2: pointer
    w.end_block();
    w.unabbrev_record(8, &[2, 0, 0, 0, 0, 0, 0, 0]); // define add2
    w.enter_block(blocks::VALUE_SYMTAB, 3);
    w.string_record(1, &[0], "add2");
    w.end_block();

    w.enter_block(blocks::FUNCTION, 4);
    w.unabbrev_record(1, &[1]); // DECLAREBLOCKS 1
    // Function value is 0; arguments are values 1 and 2.
    // BINOP add: lhs=1 (backward ref), rhs=2, opcode 0, nsw flag.
    w.unabbrev_record(2, &[1, 2, 0, 1 << 1]);
    // DEBUG_LOC line 14 col 3, no scope.
    w.unabbrev_record(35, &[14, 3, 0, 0]);
    // RET the sum (value 3).
    w.unabbrev_record(10, &[3]);
    // DEBUG_LOC_AGAIN re-applies to the ret.
    w.unabbrev_record(33, &[]);
    w.end_block();
    w.end_block();

    let module = parse_bitcode(&w.finish()).expect("arithmetic body");
    let fid = module.function_by_name("add2").expect("function");
    let func = module.function(fid);
    assert_eq!(func.blocks.len(), 1);
    assert_eq!(func.blocks[0].insts.len(), 2);

    let add = func.inst(func.blocks[0].insts[0]);
    let InstKind::Binop { op, lhs, rhs, flags } = &add.kind else {
        panic!("expected a binop, got {:?}", add.kind);
    };
    assert_eq!(format!("{op:?}"), "Add");
    assert!(flags.no_signed_wrap);
    assert!(!flags.no_unsigned_wrap);
    assert!(matches!(
        module.value(*lhs),
        Value::Argument { index: 0, .. }
    ));
    assert!(matches!(
        module.value(*rhs),
        Value::Argument { index: 1, .. }
    ));
    assert_eq!(add.debug_loc.map(|l| (l.line, l.col)), Some((14, 3)));

    let ret = func.inst(func.blocks[0].insts[1]);
    let InstKind::Ret { value: Some(v) } = &ret.kind else {
        panic!("expected ret of a value");
    };
    assert!(matches!(module.value(*v), Value::Inst { .. }));
    assert_eq!(ret.debug_loc.map(|l| (l.line, l.col)), Some((14, 3)));
}

/// A conditional branch and a phi that forward-references a value defined
/// in a later block.
#[test]
fn phi_forward_references_resolve() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.enter_block(blocks::TYPE_NEW, 3);
    w.unabbrev_record(1, &[4]);
    w.unabbrev_record(7, &[32]); // slot0: i32
    w.unabbrev_record(7, &[1]); // slot1: i1
    w.unabbrev_record(21, &[0, 0, 1]); // slot2: i32 (i1)
    w.unabbrev_record(8, &[2]); // slot3: pointer
    w.end_block();
    w.unabbrev_record(8, &[3, 0, 0, 0, 0, 0, 0, 0]); // define pick
    w.enter_block(blocks::VALUE_SYMTAB, 3);
    w.string_record(1, &[0], "pick");
    w.end_block();

    w.enter_block(blocks::FUNCTION, 4);
    w.unabbrev_record(1, &[3]); // blocks: entry, compute, join
    // Module constants occupy value 0 (function); arg i1 is value 1.
    // entry: br i1 %arg, compute (bb1), join (bb2)
    w.unabbrev_record(11, &[1, 2, 1]);
    // A function-local constants block defines i32 7 as value 2.
    w.enter_block(blocks::CONSTANTS, 4);
    w.unabbrev_record(1, &[0]);
    w.unabbrev_record(4, &[sign_rotate(7)]);
    w.end_block();
    // compute: %sum = add i32 7, %phi -- the phi (value 4) does not exist
    // yet, so the operand carries its type.
    w.unabbrev_record(2, &[4, 0, 2, 0]);
    w.unabbrev_record(11, &[2]); // br join
    // join: phi i32 [7 from entry (bb0), %sum from compute (bb1)]
    w.unabbrev_record(16, &[0, 2, 0, 3, 1]);
    w.unabbrev_record(10, &[4]); // ret the phi
    w.end_block();
    w.end_block();

    let module = parse_bitcode(&w.finish()).expect("phi body");
    let fid = module.function_by_name("pick").expect("function");
    let func = module.function(fid);
    assert_eq!(func.blocks.len(), 3);
    let phi_inst = func.blocks[2].insts[0];
    let phi = func.inst(phi_inst);
    let InstKind::Phi { incoming } = &phi.kind else {
        panic!("expected a phi");
    };
    assert_eq!(incoming.len(), 2);
    assert_eq!(incoming[0].1, 0);
    assert_eq!(incoming[1].1, 1);
    assert_eq!(module.const_u64(incoming[0].0), Some(7));
    assert!(matches!(module.value(incoming[1].0), Value::Inst { .. }));

    // The add's forward reference now reads as the phi itself, not a
    // placeholder.
    let add = func.inst(func.blocks[1].insts[0]);
    let InstKind::Binop { lhs, .. } = &add.kind else {
        panic!("expected the add");
    };
    assert!(
        matches!(module.value(*lhs), Value::Inst { inst, .. } if *inst == phi_inst),
        "forward reference did not resolve to the phi"
    );
}

#[test]
fn metadata_nodes_and_attachments() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    void_fn_types(&mut w);
    w.unabbrev_record(8, &[2, 0, 0, 0, 0, 0, 0, 0]); // define f
    w.enter_block(blocks::METADATA, 3);
    w.string_record(1, &[], "some note"); // md0: string
    w.unabbrev_record(8, &[0, 0]); // md1: node with one null operand
    w.string_record(4, &[], "notes"); // NAME ...
    w.unabbrev_record(10, &[1]); // ... NAMED_NODE [md1]
    w.string_record(6, &[0], "annot"); // KIND 0 = "annot"
    w.end_block();

    w.enter_block(blocks::FUNCTION, 4);
    w.unabbrev_record(1, &[1]);
    w.unabbrev_record(10, &[]); // ret void (instruction 0)
    w.enter_block(blocks::METADATA_ATTACHMENT, 4);
    w.unabbrev_record(11, &[0, 0, 1]); // inst 0, kind 0 -> md1
    w.end_block();
    w.end_block();
    w.end_block();

    let module = parse_bitcode(&w.finish()).expect("metadata module");
    assert_eq!(module.named_metadata.len(), 1);
    let (name, nodes) = &module.named_metadata[0];
    assert_eq!(name, "notes");
    assert_eq!(nodes.len(), 1);
    let Metadata::Node { operands, .. } = module.metadata(nodes[0]) else {
        panic!("named metadata element is not a node");
    };
    assert_eq!(operands.as_slice(), [MdOperand::Null].as_slice());

    let func = &module.functions[0];
    let ret = func.inst(func.blocks[0].insts[0]);
    assert_eq!(ret.metadata.len(), 1);
    let Metadata::Node { operands, .. } = module.metadata(ret.metadata[0].1) else {
        panic!("attachment is not a node");
    };
    assert_eq!(operands.as_slice(), [MdOperand::Null].as_slice());
}

/// Declarations of count intrinsics with the one-argument signature are
/// shelved and every call gains the `is_zero_undef` argument.
#[test]
fn count_intrinsic_signatures_upgrade() {
    use bitcode30::ir::Value;

    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.enter_block(blocks::TYPE_NEW, 3);
    w.unabbrev_record(1, &[3]);
    w.unabbrev_record(7, &[32]); // i32
    w.unabbrev_record(21, &[0, 0, 0]); // i32 (i32)
    w.unabbrev_record(8, &[1]); // pointer
    w.end_block();
    w.unabbrev_record(8, &[2, 0, 0, 0, 0, 0, 0, 0]); // v0: define main
    w.unabbrev_record(8, &[2, 0, 1, 0, 0, 0, 0, 0]); // v1: declare ctlz
    w.enter_block(blocks::VALUE_SYMTAB, 3);
    w.string_record(1, &[0], "main");
    w.string_record(1, &[1], "llvm.ctlz.i32");
    w.end_block();
    w.enter_block(blocks::FUNCTION, 4);
    w.unabbrev_record(1, &[1]);
    // %r = call i32 @llvm.ctlz.i32(i32 %arg)
    w.unabbrev_record(34, &[0, 0, 1, 2]);
    w.unabbrev_record(10, &[3]); // ret %r
    w.end_block();
    w.end_block();

    let module = parse_bitcode(&w.finish()).expect("intrinsic module");
    let new_fid = module
        .function_by_name("llvm.ctlz.i32")
        .expect("upgraded declaration");
    let (_, _, params) = module
        .types
        .function_parts(module.function(new_fid).ty)
        .expect("function type");
    assert_eq!(params.len(), 2);
    assert_eq!(module.types.int_width(params[1]), Some(1));

    let main = module.function_by_name("main").expect("main");
    let func = module.function(main);
    let call = func.inst(func.blocks[0].insts[0]);
    let InstKind::Call { callee, args, .. } = &call.kind else {
        panic!("expected the call, got {:?}", call.kind);
    };
    assert!(matches!(
        module.value(*callee),
        Value::Function(f) if *f == new_fid
    ));
    assert_eq!(args.len(), 2, "the is_zero_undef argument was appended");
    assert_eq!(module.const_u64(args[1]), Some(0));
}

/// An in-function reference nothing ever defines fails the body.
#[test]
fn unresolved_function_forward_reference_is_rejected() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.enter_block(blocks::TYPE_NEW, 3);
    w.unabbrev_record(1, &[4]);
    w.unabbrev_record(2, &[]); // void
    w.unabbrev_record(7, &[32]); // i32
    w.unabbrev_record(21, &[0, 0]); // void ()
    w.unabbrev_record(8, &[2]); // void ()*
    w.end_block();
    w.unabbrev_record(8, &[3, 0, 0, 0, 0, 0, 0, 0]);
    w.enter_block(blocks::FUNCTION, 4);
    w.unabbrev_record(1, &[1]);
    // RET of value 5 with explicit type i32: a forward reference that is
    // never defined.
    w.unabbrev_record(10, &[5, 1]);
    w.end_block();
    w.end_block();

    match parse_bitcode(&w.finish()) {
        Err(Error::NeverResolvedValueFoundInFunction) => {}
        other => panic!("expected unresolved-value rejection, got {other:?}"),
    }
}
