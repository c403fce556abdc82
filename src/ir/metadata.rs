use crate::ir::values::ValueId;

/// Index of a metadata entry in the module's metadata arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MdId(u32);

impl MdId {
    pub fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One operand of a metadata node. Nodes reference other nodes, plain IR
/// values, or nothing (a void-typed slot in the record).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdOperand {
    Metadata(MdId),
    Value(ValueId),
    Null,
}

#[derive(Debug, Clone)]
pub enum Metadata {
    String(String),
    Node {
        operands: Vec<MdOperand>,
        function_local: bool,
    },
    /// Placeholder for a node referenced before its defining record.
    Temporary,
    /// A resolved placeholder: every holder of the old id now reads the
    /// target entry.
    Forward(MdId),
}
