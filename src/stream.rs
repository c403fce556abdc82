use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::trace;

use crate::bits::{Bits, BitsError, Cursor};

/// Errors raised by the bitstream layer.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("invalid abbreviation definition")]
    InvalidAbbrev,
    #[error("no such abbreviation `{abbrev_id}` in block `{block_id}`")]
    NoSuchAbbrev { block_id: u64, abbrev_id: u64 },
    #[error("abbreviation width `{0}` is too small")]
    AbbrevWidthTooSmall(u64),
    #[error("nested block in blockinfo block")]
    NestedBlockInBlockInfo,
    #[error("blockinfo record before SETBID")]
    MissingSetBid,
    #[error("invalid blockinfo record `{0}`")]
    InvalidBlockInfoRecord(u64),
    #[error("end of block outside any block")]
    UnbalancedBlockEnd,
    #[error(transparent)]
    Bits(#[from] BitsError),
}

/// Builtin abbreviation IDs reserved by the container format.
pub const END_BLOCK: u64 = 0;
pub const ENTER_SUBBLOCK: u64 = 1;
pub const DEFINE_ABBREV: u64 = 2;
pub const UNABBREV_RECORD: u64 = 3;
pub const FIRST_APPLICATION_ABBREV: u64 = 4;

/// The block ID reserved for abbreviation metadata.
pub const BLOCKINFO_BLOCK_ID: u64 = 0;

const SETBID: u64 = 1;
const BLOCKNAME: u64 = 2;
const SETRECORDNAME: u64 = 3;

/// One operand of an abbreviation definition.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A literal value, present in the definition but not the record.
    Literal(u64),
    /// A fixed-width field.
    Fixed(u8),
    /// A VBR-encoded field with the given chunk width.
    Vbr(u8),
    /// A vbr6 length followed by that many elements of the inner operand.
    Array(Box<Operand>),
    /// A char6-encoded ASCII character.
    Char6,
    /// A vbr6 length, 32-bit alignment, raw bytes, 32-bit alignment.
    Blob,
}

/// The encoding of one user-defined record form.
#[derive(Debug, Clone)]
pub struct Abbreviation {
    pub operands: Vec<Operand>,
}

/// A decoded record: its code plus unsigned-integer payload. Blob bytes
/// are appended to `fields` one byte per slot, matching how unabbreviated
/// records carry strings.
#[derive(Debug, Clone)]
pub struct Record {
    pub code: u64,
    pub fields: SmallVec<[u64; 16]>,
}

impl Record {
    /// Collect fields starting at `from` as a byte string.
    pub fn string(&self, from: usize) -> String {
        self.fields[from..]
            .iter()
            .map(|&b| b as u8 as char)
            .collect()
    }
}

/// What the cursor found at the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// A subblock header; the ID has been read, the rest of the header has
    /// not. Follow with `enter_block` or `skip_block`.
    SubBlock(u64),
    /// The enclosing block ended; the cursor already realigned and popped
    /// back to the parent scope.
    EndBlock,
    /// A record with the given abbreviation ID. Follow with `read_record`.
    Record(u64),
}

#[derive(Debug, Clone)]
struct Scope {
    abbrev_width: usize,
    block_id: u64,
    abbrevs: Vec<Abbreviation>,
}

/// Pseudo block ID reported for the outermost scope.
pub const TOP_LEVEL_BLOCK_ID: u64 = u64::MAX;

fn decode_char6(v: u64) -> u64 {
    match v {
        0..=25 => b'a' as u64 + v,
        26..=51 => b'A' as u64 + (v - 26),
        52..=61 => b'0' as u64 + (v - 52),
        62 => b'.' as u64,
        _ => b'_' as u64,
    }
}

/// A pull-based cursor over the block/record structure of a bitstream.
///
/// Cloning snapshots the full decode state (position, scope stack,
/// blockinfo abbreviations); assigning a clone back restores it, which is
/// how the legacy type table re-scans its block.
#[derive(Debug, Clone)]
pub struct BitstreamCursor<'a> {
    cursor: Cursor<'a>,
    scopes: Vec<Scope>,
    block_info: FxHashMap<u64, Vec<Abbreviation>>,
}

impl<'a> BitstreamCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(Bits::new(data)),
            scopes: vec![Scope {
                abbrev_width: 2,
                block_id: TOP_LEVEL_BLOCK_ID,
                abbrevs: Vec::new(),
            }],
            block_info: FxHashMap::default(),
        }
    }

    pub fn at_end(&self) -> bool {
        self.cursor.at_end()
    }

    /// Absolute bit position, the stream token used for deferred bodies.
    pub fn bit_pos(&self) -> u64 {
        self.cursor.bit_pos()
    }

    /// Re-target an absolute bit offset recorded earlier. The scope stack
    /// collapses to the top level; the target must be a subblock header
    /// position (the parse direction is forward-only otherwise).
    pub fn jump_to(&mut self, bit: u64) -> Result<(), StreamError> {
        self.cursor.jump_to(bit)?;
        self.scopes.truncate(1);
        Ok(())
    }

    pub fn read(&mut self, count: usize) -> Result<u64, StreamError> {
        Ok(self.cursor.read(count)?)
    }

    pub fn read_vbr(&mut self, width: usize) -> Result<u64, StreamError> {
        Ok(self.cursor.read_vbr(width)?)
    }

    fn scope(&self) -> &Scope {
        self.scopes.last().expect("scope stack never empties")
    }

    /// Read the next abbreviation ID in the current scope's width.
    pub fn read_abbrev_id(&mut self) -> Result<u64, StreamError> {
        let width = self.scope().abbrev_width;
        Ok(self.cursor.read(width)?)
    }

    /// Advance to the next entry, defining abbreviations along the way.
    pub fn advance(&mut self) -> Result<Entry, StreamError> {
        loop {
            let abbrev_id = self.read_abbrev_id()?;
            match abbrev_id {
                END_BLOCK => {
                    self.cursor.align(32)?;
                    if self.scopes.len() == 1 {
                        return Err(StreamError::UnbalancedBlockEnd);
                    }
                    self.scopes.pop();
                    return Ok(Entry::EndBlock);
                }
                ENTER_SUBBLOCK => {
                    let block_id = self.cursor.read_vbr(8)?;
                    return Ok(Entry::SubBlock(block_id));
                }
                DEFINE_ABBREV => {
                    let abbrev = self.read_abbrev_def()?;
                    self.scopes
                        .last_mut()
                        .expect("scope stack never empties")
                        .abbrevs
                        .push(abbrev);
                }
                _ => return Ok(Entry::Record(abbrev_id)),
            }
        }
    }

    /// Like `advance`, but transparently skips subblocks.
    pub fn advance_skipping_subblocks(&mut self) -> Result<Entry, StreamError> {
        loop {
            match self.advance()? {
                Entry::SubBlock(_) => self.skip_block()?,
                entry => return Ok(entry),
            }
        }
    }

    /// Consume the remainder of a subblock header and push its scope.
    pub fn enter_block(&mut self, block_id: u64) -> Result<(), StreamError> {
        let width = self.cursor.read_vbr(4)?;
        if width < 1 {
            return Err(StreamError::AbbrevWidthTooSmall(width));
        }
        self.cursor.align(32)?;
        let _block_len = self.cursor.read(32)?;
        let abbrevs = self.block_info.get(&block_id).cloned().unwrap_or_default();
        self.scopes.push(Scope {
            abbrev_width: width as usize,
            block_id,
            abbrevs,
        });
        Ok(())
    }

    /// Consume the remainder of a subblock header and its whole body.
    pub fn skip_block(&mut self) -> Result<(), StreamError> {
        let _width = self.cursor.read_vbr(4)?;
        self.cursor.align(32)?;
        let block_len = self.cursor.read(32)? as usize;
        self.cursor.skip_bytes(block_len * 4)?;
        Ok(())
    }

    fn read_abbrev_op(&mut self, ops_left: &mut usize) -> Result<Operand, StreamError> {
        if *ops_left == 0 {
            return Err(StreamError::InvalidAbbrev);
        }
        *ops_left -= 1;

        let is_literal = self.cursor.read(1)?;
        if is_literal == 1 {
            return Ok(Operand::Literal(self.cursor.read_vbr(8)?));
        }
        let encoding = self.cursor.read(3)?;
        Ok(match encoding {
            1 => Operand::Fixed(self.cursor.read_vbr(5)? as u8),
            2 => Operand::Vbr(self.cursor.read_vbr(5)? as u8),
            3 if *ops_left == 1 => Operand::Array(Box::new(self.read_abbrev_op(ops_left)?)),
            4 => Operand::Char6,
            5 if *ops_left == 0 => Operand::Blob,
            _ => return Err(StreamError::InvalidAbbrev),
        })
    }

    fn read_abbrev_def(&mut self) -> Result<Abbreviation, StreamError> {
        let mut num_ops = self.cursor.read_vbr(5)? as usize;
        if num_ops == 0 {
            return Err(StreamError::InvalidAbbrev);
        }
        let mut operands = Vec::new();
        while num_ops > 0 {
            operands.push(self.read_abbrev_op(&mut num_ops)?);
        }
        Ok(Abbreviation { operands })
    }

    fn read_abbreviated_field(&mut self, op: &Operand) -> Result<u64, StreamError> {
        Ok(match op {
            Operand::Literal(v) => *v,
            Operand::Fixed(w) => self.cursor.read(*w as usize)?,
            Operand::Vbr(w) => self.cursor.read_vbr(*w as usize)?,
            Operand::Char6 => decode_char6(self.cursor.read(6)?),
            Operand::Array(_) | Operand::Blob => return Err(StreamError::InvalidAbbrev),
        })
    }

    /// Read the record introduced by `abbrev_id`.
    pub fn read_record(&mut self, abbrev_id: u64) -> Result<Record, StreamError> {
        if abbrev_id == UNABBREV_RECORD {
            let code = self.cursor.read_vbr(6)?;
            let num_ops = self.cursor.read_vbr(6)? as usize;
            // The count is attacker-controlled; let the reads hit the end
            // of the buffer rather than pre-sizing.
            let mut fields = SmallVec::new();
            for _ in 0..num_ops {
                fields.push(self.cursor.read_vbr(6)?);
            }
            return Ok(Record { code, fields });
        }

        let index = (abbrev_id - FIRST_APPLICATION_ABBREV) as usize;
        let abbrev = self
            .scope()
            .abbrevs
            .get(index)
            .cloned()
            .ok_or(StreamError::NoSuchAbbrev {
                block_id: self.scope().block_id,
                abbrev_id,
            })?;

        let mut values: SmallVec<[u64; 16]> = SmallVec::new();
        let mut ops = abbrev.operands.iter();
        while let Some(op) = ops.next() {
            match op {
                Operand::Array(elt) => {
                    let len = self.cursor.read_vbr(6)? as usize;
                    for _ in 0..len {
                        values.push(self.read_abbreviated_field(elt)?);
                    }
                }
                Operand::Blob => {
                    let len = self.cursor.read_vbr(6)? as usize;
                    self.cursor.align(32)?;
                    for byte in self.cursor.read_bytes(len)? {
                        values.push(u64::from(byte));
                    }
                    self.cursor.align(32)?;
                }
                op => values.push(self.read_abbreviated_field(op)?),
            }
        }

        if values.is_empty() {
            return Err(StreamError::InvalidAbbrev);
        }
        let code = values[0];
        let fields = values.drain(1..).collect();
        Ok(Record { code, fields })
    }

    /// Parse a BLOCKINFO block, registering abbreviations for other blocks.
    /// Call after `advance` returned its subblock entry.
    pub fn read_blockinfo_block(&mut self) -> Result<(), StreamError> {
        self.enter_block(BLOCKINFO_BLOCK_ID)?;

        let mut current_bid: Option<u64> = None;
        loop {
            let abbrev_id = self.read_abbrev_id()?;
            match abbrev_id {
                END_BLOCK => {
                    self.cursor.align(32)?;
                    self.scopes.pop();
                    return Ok(());
                }
                ENTER_SUBBLOCK => return Err(StreamError::NestedBlockInBlockInfo),
                DEFINE_ABBREV => {
                    // Abbreviations defined here belong to the block being
                    // described, not to the blockinfo block itself.
                    let bid = current_bid.ok_or(StreamError::MissingSetBid)?;
                    let abbrev = self.read_abbrev_def()?;
                    self.block_info.entry(bid).or_default().push(abbrev);
                }
                _ => {
                    let record = self.read_record(abbrev_id)?;
                    match record.code {
                        SETBID => {
                            let &[bid] = &record.fields[..] else {
                                return Err(StreamError::InvalidBlockInfoRecord(record.code));
                            };
                            current_bid = Some(bid);
                        }
                        BLOCKNAME | SETRECORDNAME => {
                            trace!(code = record.code, "ignoring blockinfo name record");
                        }
                        other => return Err(StreamError::InvalidBlockInfoRecord(other)),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char6_alphabet() {
        assert_eq!(decode_char6(0), b'a' as u64);
        assert_eq!(decode_char6(25), b'z' as u64);
        assert_eq!(decode_char6(26), b'A' as u64);
        assert_eq!(decode_char6(52), b'0' as u64);
        assert_eq!(decode_char6(62), b'.' as u64);
        assert_eq!(decode_char6(63), b'_' as u64);
    }
}
