mod common;

use bitcode30::{parse_bitcode, read_bitcode_triple, Error};
use common::{blocks, BitWriter};

#[test]
fn empty_module_parses() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]); // VERSION 0
    w.end_block();

    let module = parse_bitcode(&w.finish()).expect("empty module");
    assert!(module.functions.is_empty());
    assert!(module.globals.is_empty());
    assert!(module.aliases.is_empty());
    assert_eq!(module.triple, "");
}

#[test]
fn bad_signature_is_rejected() {
    let data = [b'X', b'C', 0xC0, 0xDE];
    match parse_bitcode(&data) {
        Err(Error::InvalidBitcodeSignature) => {}
        other => panic!("expected signature rejection, got {other:?}"),
    }
}

#[test]
fn unsupported_version_is_rejected() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[1]); // VERSION 1
    w.end_block();

    match parse_bitcode(&w.finish()) {
        Err(Error::InvalidValue) => {}
        other => panic!("expected version rejection, got {other:?}"),
    }
}

#[test]
fn module_strings_are_read() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.string_record(2, &[], "armv7-none-linux-gnueabi"); // TRIPLE
    w.string_record(3, &[], "e-p:32:32"); // DATALAYOUT
    w.end_block();

    let data = w.finish();
    let module = parse_bitcode(&data).expect("module with strings");
    assert_eq!(module.triple, "armv7-none-linux-gnueabi");
    assert_eq!(module.data_layout, "e-p:32:32");

    assert_eq!(
        read_bitcode_triple(&data).expect("triple probe"),
        "armv7-none-linux-gnueabi"
    );
}

#[test]
fn unknown_blocks_and_records_are_skipped() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    // A record code this reader has never heard of.
    w.unabbrev_record(61, &[1, 2, 3]);
    // A whole subblock with an unknown ID.
    w.enter_block(42, 3);
    w.unabbrev_record(9, &[7]);
    w.end_block();
    w.end_block();

    parse_bitcode(&w.finish()).expect("unknown content is ignored");
}

#[test]
fn second_module_block_is_rejected() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.end_block();
    w.enter_block(blocks::MODULE, 3);
    w.end_block();

    match parse_bitcode(&w.finish()) {
        Err(Error::InvalidMultipleBlocks) => {}
        other => panic!("expected duplicate-module rejection, got {other:?}"),
    }
}

#[test]
fn global_variable_fields_decode() {
    use bitcode30::ir::{Linkage, ThreadLocalMode, Type, Visibility};

    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.string_record(5, &[], ".rodata"); // SECTIONNAME
    w.enter_block(blocks::TYPE_NEW, 3);
    w.unabbrev_record(1, &[2]); // NUMENTRY 2
    w.unabbrev_record(7, &[32]); // i32
    w.unabbrev_record(8, &[0]); // i32*
    w.end_block();
    // GLOBALVAR: ptrty=1, const, no init, internal linkage, align 4
    // (encoded 3), section 1, hidden, initial-exec TLS, unnamed_addr
    w.unabbrev_record(7, &[1, 1, 0, 3, 3, 1, 1, 3, 1]);
    w.enter_block(blocks::VALUE_SYMTAB, 3);
    w.string_record(1, &[0], "table");
    w.end_block();
    w.end_block();

    let module = parse_bitcode(&w.finish()).expect("module with global");
    assert_eq!(module.globals.len(), 1);
    let g = &module.globals[0];
    assert_eq!(g.name, "table");
    assert!(g.is_const);
    assert_eq!(g.linkage, Linkage::Internal);
    assert_eq!(g.visibility, Visibility::Hidden);
    assert_eq!(g.thread_local, ThreadLocalMode::InitialExec);
    assert!(g.unnamed_addr);
    assert_eq!(g.alignment, 4);
    assert_eq!(g.section.as_deref(), Some(".rodata"));
    assert!(matches!(
        module.types.get(g.value_ty),
        Type::Integer { bits: 32 }
    ));
}

#[test]
fn param_attributes_decode() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.enter_block(blocks::PARAMATTR, 3);
    // One entry: return slot with alignment 8 (encoded in bits 16..31)
    // plus a low attribute bit.
    w.unabbrev_record(1, &[0, (8 << 16) | 0x1]);
    w.end_block();
    w.end_block();

    let module = parse_bitcode(&w.finish()).expect("module with attributes");
    assert_eq!(module.attribute_sets.len(), 1);
    let entry = &module.attribute_sets[0].entries[0];
    assert_eq!(entry.slot, 0);
    assert_eq!(entry.alignment, 8);
    assert_eq!(entry.bits, 0x1);
}

#[test]
fn alias_targets_resolve_to_the_underlying_global() {
    use bitcode30::ir::Value;

    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.enter_block(blocks::TYPE_NEW, 3);
    w.unabbrev_record(1, &[2]);
    w.unabbrev_record(7, &[32]); // i32
    w.unabbrev_record(8, &[0]); // i32*
    w.end_block();
    w.unabbrev_record(7, &[1, 0, 0, 0, 0, 0]); // v0: global
    w.unabbrev_record(9, &[1, 0, 3, 0]); // v1: alias to value 0, internal
    w.enter_block(blocks::VALUE_SYMTAB, 3);
    w.string_record(1, &[0], "base");
    w.string_record(1, &[1], "alias");
    w.end_block();
    w.end_block();

    let module = parse_bitcode(&w.finish()).expect("module with alias");
    assert_eq!(module.aliases.len(), 1);
    let alias = &module.aliases[0];
    assert_eq!(alias.name, "alias");
    let aliasee = alias.aliasee.expect("aliasee resolved");
    assert!(matches!(module.value(aliasee), Value::Global(_)));
}

#[test]
fn trailing_archive_padding_is_tolerated() {
    let mut w = BitWriter::new();
    w.signature();
    w.enter_block(blocks::MODULE, 3);
    w.unabbrev_record(1, &[0]);
    w.end_block();
    let mut data = w.finish();
    // ranlib pads archive members with newlines.
    data.extend_from_slice(&[0x0a, 0x0a, 0x0a, 0x0a]);

    parse_bitcode(&data).expect("padding after the module is ignored");
}
