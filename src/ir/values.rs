use crate::ir::instruction::{BinOp, CastOp, InstId, OpFlags};
use crate::ir::module::{AliasId, FuncId, GlobalId};
use crate::ir::types::TypeId;

/// Index of a value in the module's value arena. Operands address values
/// by id, so resolving a forward reference in place rewrites every user at
/// once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

impl ValueId {
    pub fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A value: either a concrete IR entity or a placeholder installed for a
/// forward reference and later redirected via [`Value::Forward`].
#[derive(Debug, Clone)]
pub enum Value {
    Global(GlobalId),
    Function(FuncId),
    Alias(AliasId),
    Argument {
        func: FuncId,
        index: u32,
        ty: TypeId,
    },
    Inst {
        func: FuncId,
        inst: InstId,
    },
    Constant(Constant),
    InlineAsm {
        /// Pointer-to-function type of the asm callee.
        ty: TypeId,
        asm: String,
        constraints: String,
        side_effects: bool,
        align_stack: bool,
    },
    /// A basic-block reference passed where a label-typed parameter is
    /// expected (legacy intrinsic calls).
    Block {
        func: FuncId,
        block: u32,
        ty: TypeId,
    },
    /// A resolved placeholder: readers chase this link to the real value.
    Forward(ValueId),
    /// Stand-in for a constant referenced before its defining record.
    ConstantPlaceholder {
        ty: TypeId,
    },
    /// Stand-in for a non-constant referenced before its defining record
    /// (an argument-shaped value with no parent function).
    SyntheticArg {
        ty: TypeId,
    },
}

impl Value {
    /// Constants, global values and placeholders for constants all satisfy
    /// constant contexts (initializers, aggregate elements).
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Value::Constant(_)
                | Value::Global(_)
                | Value::Function(_)
                | Value::Alias(_)
                | Value::ConstantPlaceholder { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub enum Constant {
    Null {
        ty: TypeId,
    },
    Undef {
        ty: TypeId,
    },
    Int {
        ty: TypeId,
        value: i64,
    },
    /// Arbitrary-precision integer, little-endian 64-bit words.
    WideInt {
        ty: TypeId,
        words: Vec<u64>,
    },
    /// Raw payload bits in the layout of the type's FP semantics; wider
    /// formats use both words.
    Float {
        ty: TypeId,
        words: [u64; 2],
    },
    /// Struct, array or vector constant.
    Aggregate {
        ty: TypeId,
        elems: Vec<ValueId>,
    },
    BlockAddress {
        ty: TypeId,
        func: FuncId,
        block: u32,
    },
    Expr(ConstExpr),
}

impl Constant {
    pub fn ty(&self) -> TypeId {
        match self {
            Constant::Null { ty }
            | Constant::Undef { ty }
            | Constant::Int { ty, .. }
            | Constant::WideInt { ty, .. }
            | Constant::Float { ty, .. }
            | Constant::Aggregate { ty, .. }
            | Constant::BlockAddress { ty, .. } => *ty,
            Constant::Expr(e) => e.ty(),
        }
    }

    /// The u64 value of a small integer constant, if this is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Constant::Int { value, .. } => Some(*value as u64),
            Constant::Null { .. } => Some(0),
            _ => None,
        }
    }
}

/// A constant expression. Every variant records its result type, computed
/// when the expression is built.
#[derive(Debug, Clone)]
pub enum ConstExpr {
    Binop {
        ty: TypeId,
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
        flags: OpFlags,
    },
    Cast {
        ty: TypeId,
        op: CastOp,
        value: ValueId,
    },
    Gep {
        ty: TypeId,
        inbounds: bool,
        base: ValueId,
        indices: Vec<ValueId>,
    },
    Select {
        ty: TypeId,
        cond: ValueId,
        on_true: ValueId,
        on_false: ValueId,
    },
    ExtractElement {
        ty: TypeId,
        vec: ValueId,
        index: ValueId,
    },
    InsertElement {
        ty: TypeId,
        vec: ValueId,
        elem: ValueId,
        index: ValueId,
    },
    ShuffleVector {
        ty: TypeId,
        v1: ValueId,
        v2: ValueId,
        mask: ValueId,
    },
    Cmp {
        ty: TypeId,
        fp: bool,
        pred: u32,
        lhs: ValueId,
        rhs: ValueId,
    },
}

impl ConstExpr {
    pub fn ty(&self) -> TypeId {
        match self {
            ConstExpr::Binop { ty, .. }
            | ConstExpr::Cast { ty, .. }
            | ConstExpr::Gep { ty, .. }
            | ConstExpr::Select { ty, .. }
            | ConstExpr::ExtractElement { ty, .. }
            | ConstExpr::InsertElement { ty, .. }
            | ConstExpr::ShuffleVector { ty, .. }
            | ConstExpr::Cmp { ty, .. } => *ty,
        }
    }

    /// Operands of the expression, in record order.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            ConstExpr::Binop { lhs, rhs, .. } => vec![*lhs, *rhs],
            ConstExpr::Cast { value, .. } => vec![*value],
            ConstExpr::Gep { base, indices, .. } => {
                let mut ops = vec![*base];
                ops.extend_from_slice(indices);
                ops
            }
            ConstExpr::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![*cond, *on_true, *on_false],
            ConstExpr::ExtractElement { vec, index, .. } => vec![*vec, *index],
            ConstExpr::InsertElement {
                vec, elem, index, ..
            } => vec![*vec, *elem, *index],
            ConstExpr::ShuffleVector { v1, v2, mask, .. } => vec![*v1, *v2, *mask],
            ConstExpr::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
        }
    }
}
