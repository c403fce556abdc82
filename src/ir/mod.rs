//! The in-memory IR the reader produces: an arena-indexed module of types,
//! values, functions, basic blocks, instructions and metadata.

pub mod instruction;
pub mod metadata;
pub mod module;
pub mod types;
pub mod values;

pub use self::instruction::{
    AtomicOrdering, BasicBlock, BinOp, CastOp, ClauseKind, DebugLoc, InstId, InstKind,
    Instruction, OpFlags, RmwOp, SyncScope,
};
pub use self::metadata::{MdId, MdOperand, Metadata};
pub use self::module::{
    AliasId, AttributeEntry, AttributeSet, FuncId, Function, GlobalAlias, GlobalId,
    GlobalVariable, Linkage, Module, ThreadLocalMode, Visibility,
};
pub use self::types::{Type, TypeContext, TypeId};
pub use self::values::{ConstExpr, Constant, Value, ValueId};
