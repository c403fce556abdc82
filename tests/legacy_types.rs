mod common;

use bitcode30::ir::Type;
use bitcode30::{parse_bitcode, Error};
use common::{blocks, BitWriter};

/// The old type table may reference slots in any order; here the struct
/// comes first and its field type resolves two passes later.
#[test]
fn legacy_type_table_resolves_backward_references() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.enter_block(blocks::TYPE_OLD, 3);
    w.unabbrev_record(1, &[4]); // NUMENTRY 4
    w.unabbrev_record(10, &[0, 1]); // slot0: struct { slot1 }
    w.unabbrev_record(8, &[2]); // slot1: slot2*
    w.unabbrev_record(7, &[32]); // slot2: i32
    w.unabbrev_record(8, &[0]); // slot3: slot0*
    w.end_block();
    w.enter_block(blocks::TYPE_SYMTAB_OLD, 3);
    w.string_record(1, &[0], "Wrapper");
    w.end_block();
    // GLOBALVAR of type slot3 so the struct is reachable from the module.
    w.unabbrev_record(7, &[3, 0, 0, 0, 0, 0]);
    w.end_block();

    let module = parse_bitcode(&w.finish()).expect("legacy type table");
    let g = &module.globals[0];
    assert_eq!(module.types.struct_name(g.value_ty), Some("Wrapper"));

    let fields = module
        .types
        .struct_fields(g.value_ty)
        .expect("struct body was resolved");
    assert_eq!(fields.len(), 1);
    let pointee = module.types.pointee(fields[0]).expect("field is a pointer");
    assert!(matches!(
        module.types.get(pointee),
        Type::Integer { bits: 32 }
    ));
}

/// A pass that resolves nothing means the table can never complete.
#[test]
fn legacy_type_table_without_progress_is_rejected() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.enter_block(blocks::TYPE_OLD, 3);
    w.unabbrev_record(1, &[2]); // NUMENTRY 2
    w.unabbrev_record(8, &[1]); // slot0: slot1*
    w.unabbrev_record(8, &[0]); // slot1: slot0*
    w.end_block();
    w.end_block();

    match parse_bitcode(&w.finish()) {
        Err(Error::InvalidTypeTable) => {}
        other => panic!("expected type-table rejection, got {other:?}"),
    }
}

/// Mutually recursive structs do resolve: the placeholder struct gives
/// every other slot something to point at while bodies trickle in.
#[test]
fn legacy_type_table_handles_recursive_structs() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.enter_block(blocks::TYPE_OLD, 3);
    w.unabbrev_record(1, &[3]); // NUMENTRY 3
    w.unabbrev_record(10, &[0, 1]); // slot0: struct { slot1 }
    w.unabbrev_record(8, &[0]); // slot1: slot0* (back edge)
    w.unabbrev_record(8, &[0]); // slot2: slot0*
    w.end_block();
    w.unabbrev_record(7, &[2, 0, 0, 0, 0, 0]); // GLOBALVAR of slot2
    w.end_block();

    let module = parse_bitcode(&w.finish()).expect("recursive struct table");
    let g = &module.globals[0];
    let fields = module.types.struct_fields(g.value_ty).expect("body set");
    // The struct's single field points back at the struct itself.
    assert_eq!(module.types.pointee(fields[0]), Some(g.value_ty));
}

/// The modern table fills named-struct forward references in one pass.
#[test]
fn modern_type_table_forward_references() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.enter_block(blocks::TYPE_NEW, 3);
    w.unabbrev_record(1, &[3]); // NUMENTRY 3
    w.unabbrev_record(8, &[1]); // slot0: pointer to slot1 (forward)
    w.string_record(19, &[], "node"); // STRUCT_NAME
    w.unabbrev_record(20, &[0, 0]); // slot1: struct node { slot0 }
    w.unabbrev_record(7, &[8]); // slot2: i8
    w.end_block();
    w.unabbrev_record(7, &[0, 0, 0, 0, 0, 0]); // GLOBALVAR of slot0
    w.end_block();

    let module = parse_bitcode(&w.finish()).expect("modern type table");
    let g = &module.globals[0];
    // value_ty is the struct; its field is a pointer back to it.
    assert_eq!(module.types.struct_name(g.value_ty), Some("node"));
    let fields = module.types.struct_fields(g.value_ty).expect("body");
    assert_eq!(module.types.pointee(fields[0]), Some(g.value_ty));
}

/// A table that promises more entries than it defines is malformed.
#[test]
fn modern_type_table_with_missing_entries_is_rejected() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.enter_block(blocks::TYPE_NEW, 3);
    w.unabbrev_record(1, &[2]); // NUMENTRY 2
    w.unabbrev_record(7, &[32]);
    w.end_block();
    w.end_block();

    match parse_bitcode(&w.finish()) {
        Err(Error::MalformedBlock) => {}
        other => panic!("expected malformed-table rejection, got {other:?}"),
    }
}
