mod common;

use bitcode30::stream::{BitstreamCursor, Entry};
use common::BitWriter;

/// Write the operand specs for `[Literal(7), VBR(6), Array(Char6)]`.
fn define_test_abbrev(w: &mut BitWriter) {
    w.abbrev_id(common::DEFINE_ABBREV);
    w.vbr(4, 5); // four operand specs, the array element included
    w.push_bits(1, 1); // literal...
    w.vbr(7, 8); // ...7
    w.push_bits(0, 1);
    w.push_bits(2, 3); // vbr...
    w.vbr(6, 5); // ...of width 6
    w.push_bits(0, 1);
    w.push_bits(3, 3); // array of...
    w.push_bits(0, 1);
    w.push_bits(4, 3); // ...char6
}

/// Emit a record through that abbreviation: field 42, then "hi".
fn emit_test_record(w: &mut BitWriter) {
    w.abbrev_id(4);
    w.vbr(42, 6);
    w.vbr(2, 6); // array length
    w.push_bits(7, 6); // 'h'
    w.push_bits(8, 6); // 'i'
}

#[test]
fn block_local_abbreviations_decode() {
    let mut w = BitWriter::new();
    w.enter_block(20, 4);
    define_test_abbrev(&mut w);
    emit_test_record(&mut w);
    w.end_block();
    let data = w.finish();

    let mut cursor = BitstreamCursor::new(&data);
    let Entry::SubBlock(20) = cursor.advance().expect("subblock entry") else {
        panic!("expected the subblock");
    };
    cursor.enter_block(20).expect("enter");

    // advance() consumes the DEFINE_ABBREV and lands on the record.
    let Entry::Record(abbrev_id) = cursor.advance().expect("record entry") else {
        panic!("expected the abbreviated record");
    };
    assert_eq!(abbrev_id, 4);
    let record = cursor.read_record(abbrev_id).expect("record");
    assert_eq!(record.code, 7);
    assert_eq!(&record.fields[..], &[42, u64::from(b'h'), u64::from(b'i')]);

    assert_eq!(cursor.advance().expect("end"), Entry::EndBlock);
}

#[test]
fn blockinfo_abbreviations_apply_to_the_described_block() {
    let mut w = BitWriter::new();
    // BLOCKINFO registering the abbreviation for block 20.
    w.enter_block(0, 2);
    w.unabbrev_record(1, &[20]); // SETBID 20
    define_test_abbrev(&mut w);
    w.end_block();
    // The described block uses it as abbreviation 4.
    w.enter_block(20, 4);
    emit_test_record(&mut w);
    w.end_block();
    let data = w.finish();

    let mut cursor = BitstreamCursor::new(&data);
    let Entry::SubBlock(0) = cursor.advance().expect("blockinfo entry") else {
        panic!("expected the blockinfo block");
    };
    cursor.read_blockinfo_block().expect("blockinfo");

    let Entry::SubBlock(20) = cursor.advance().expect("subblock entry") else {
        panic!("expected the described block");
    };
    cursor.enter_block(20).expect("enter");
    let Entry::Record(abbrev_id) = cursor.advance().expect("record entry") else {
        panic!("expected the abbreviated record");
    };
    let record = cursor.read_record(abbrev_id).expect("record");
    assert_eq!(record.code, 7);
    assert_eq!(&record.fields[..], &[42, u64::from(b'h'), u64::from(b'i')]);
}

#[test]
fn nested_unknown_blocks_skip_cleanly() {
    let mut w = BitWriter::new();
    w.enter_block(30, 3);
    w.enter_block(31, 5);
    w.unabbrev_record(9, &[1, 2, 3]);
    w.end_block();
    w.unabbrev_record(5, &[8]);
    w.end_block();
    let data = w.finish();

    let mut cursor = BitstreamCursor::new(&data);
    assert_eq!(cursor.advance().expect("outer"), Entry::SubBlock(30));
    cursor.enter_block(30).expect("enter outer");
    assert_eq!(cursor.advance().expect("inner"), Entry::SubBlock(31));
    cursor.skip_block().expect("skip inner");
    let Entry::Record(abbrev_id) = cursor.advance().expect("record") else {
        panic!("expected the trailing record");
    };
    let record = cursor.read_record(abbrev_id).expect("record");
    assert_eq!(record.code, 5);
    assert_eq!(&record.fields[..], &[8]);
    assert_eq!(cursor.advance().expect("end"), Entry::EndBlock);
}
