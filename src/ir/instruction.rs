use smallvec::SmallVec;

use crate::ir::metadata::MdId;
use crate::ir::types::TypeId;
use crate::ir::values::ValueId;

/// Index of an instruction in its function's instruction arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(u32);

impl InstId {
    pub fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A basic block: a name (from the value symbol table, if any) and an
/// ordered list of instructions ending with a terminator.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub name: String,
    pub insts: Vec<InstId>,
}

/// Binary opcodes after type-based disambiguation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    FAdd,
    Sub,
    FSub,
    Mul,
    FMul,
    UDiv,
    SDiv,
    FDiv,
    URem,
    SRem,
    FRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn may_overflow(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Shl)
    }

    pub fn may_be_exact(self) -> bool {
        matches!(
            self,
            BinOp::SDiv | BinOp::UDiv | BinOp::LShr | BinOp::AShr
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    FpTrunc,
    FpExt,
    PtrToInt,
    IntToPtr,
    BitCast,
}

/// Wrap/exactness flags carried by overflowing and possibly-exact
/// operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpFlags {
    pub no_unsigned_wrap: bool,
    pub no_signed_wrap: bool,
    pub exact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOrdering {
    NotAtomic,
    Unordered,
    Monotonic,
    Acquire,
    Release,
    AcquireRelease,
    SequentiallyConsistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    SingleThread,
    CrossThread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Nand,
    Or,
    Xor,
    Max,
    Min,
    UMax,
    UMin,
}

/// Landing-pad clause kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    Catch,
    Filter,
}

/// A source location attached to an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugLoc {
    pub line: u32,
    pub col: u32,
    pub scope: Option<MdId>,
    pub inlined_at: Option<MdId>,
}

/// One instruction: operation, result type (`void` for non-producing
/// instructions), optional debug location and metadata attachments.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub kind: InstKind,
    pub ty: TypeId,
    pub debug_loc: Option<DebugLoc>,
    pub metadata: Vec<(u32, MdId)>,
}

impl Instruction {
    pub fn new(kind: InstKind, ty: TypeId) -> Self {
        Self {
            kind,
            ty,
            debug_loc: None,
            metadata: Vec::new(),
        }
    }
}

/// Basic-block references are indices into the owning function's block
/// list, exactly as records encode them.
#[derive(Debug, Clone)]
pub enum InstKind {
    Binop {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
        flags: OpFlags,
    },
    Cast {
        op: CastOp,
        value: ValueId,
    },
    Gep {
        inbounds: bool,
        base: ValueId,
        indices: Vec<ValueId>,
    },
    ExtractValue {
        agg: ValueId,
        indices: Vec<u32>,
    },
    InsertValue {
        agg: ValueId,
        value: ValueId,
        indices: Vec<u32>,
    },
    Select {
        cond: ValueId,
        on_true: ValueId,
        on_false: ValueId,
    },
    ExtractElement {
        vec: ValueId,
        index: ValueId,
    },
    InsertElement {
        vec: ValueId,
        elem: ValueId,
        index: ValueId,
    },
    ShuffleVector {
        v1: ValueId,
        v2: ValueId,
        mask: ValueId,
    },
    Cmp {
        fp: bool,
        pred: u32,
        lhs: ValueId,
        rhs: ValueId,
    },
    Ret {
        value: Option<ValueId>,
    },
    Br {
        dest: u32,
    },
    CondBr {
        cond: ValueId,
        then_dest: u32,
        else_dest: u32,
    },
    Switch {
        cond: ValueId,
        default: u32,
        cases: Vec<(ValueId, u32)>,
    },
    IndirectBr {
        address: ValueId,
        dests: Vec<u32>,
    },
    Invoke {
        callee: ValueId,
        args: Vec<ValueId>,
        normal_dest: u32,
        unwind_dest: u32,
        cc: u32,
        attrs: u32,
    },
    Resume {
        value: ValueId,
    },
    Phi {
        incoming: Vec<(ValueId, u32)>,
    },
    LandingPad {
        personality: ValueId,
        cleanup: bool,
        clauses: Vec<(ClauseKind, ValueId)>,
    },
    Alloca {
        size: ValueId,
        align: u32,
    },
    Load {
        ptr: ValueId,
        align: u32,
        volatile: bool,
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
        align: u32,
        volatile: bool,
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    CmpXchg {
        ptr: ValueId,
        expected: ValueId,
        replacement: ValueId,
        volatile: bool,
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    AtomicRmw {
        op: RmwOp,
        ptr: ValueId,
        value: ValueId,
        volatile: bool,
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    Fence {
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    Call {
        callee: ValueId,
        args: Vec<ValueId>,
        cc: u32,
        tail: bool,
        attrs: u32,
    },
    VaArg {
        list: ValueId,
    },
    Unreachable,
}

impl InstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Ret { .. }
                | InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Switch { .. }
                | InstKind::IndirectBr { .. }
                | InstKind::Invoke { .. }
                | InstKind::Resume { .. }
                | InstKind::Unreachable
        )
    }

    /// Successor block indices of a terminator.
    pub fn successors(&self) -> SmallVec<[u32; 2]> {
        match self {
            InstKind::Br { dest } => SmallVec::from_slice(&[*dest]),
            InstKind::CondBr {
                then_dest,
                else_dest,
                ..
            } => SmallVec::from_slice(&[*then_dest, *else_dest]),
            InstKind::Switch { default, cases, .. } => {
                let mut succs = SmallVec::from_slice(&[*default]);
                succs.extend(cases.iter().map(|&(_, bb)| bb));
                succs
            }
            InstKind::IndirectBr { dests, .. } => SmallVec::from_slice(dests),
            InstKind::Invoke {
                normal_dest,
                unwind_dest,
                ..
            } => SmallVec::from_slice(&[*normal_dest, *unwind_dest]),
            _ => SmallVec::new(),
        }
    }
}
