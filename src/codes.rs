//! Block IDs and record codes for generation-3.0 bitcode.
//!
//! The numeric values are stable identifiers in the stream; changing them
//! breaks compatibility with old files.

use num_enum::TryFromPrimitive;

/// First block ID available to applications; lower IDs are reserved.
pub const FIRST_APPLICATION_BLOCK_ID: u8 = 8;

/// Block identifiers understood by this reader. Two legacy IDs overlap the
/// modern numbering: a stream contains either the legacy pair or the modern
/// blocks, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum BlockId {
    Module = FIRST_APPLICATION_BLOCK_ID,
    ParamAttr = 9,
    /// Legacy type table emitted by pre-3.0 writers.
    TypeOld = 10,
    Constants = 11,
    Function = 12,
    /// Legacy type symbol table; pairs with `TypeOld`.
    TypeSymtabOld = 13,
    ValueSymtab = 14,
    Metadata = 15,
    MetadataAttachment = 16,
    Type = 17,
}

/// MODULE block record codes.
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum ModuleCode {
    /// `VERSION`: [version#]
    Version = 1,
    /// `TRIPLE`: [strchr x N]
    Triple = 2,
    /// `DATALAYOUT`: [strchr x N]
    DataLayout = 3,
    /// `ASM`: [strchr x N]
    Asm = 4,
    /// `SECTIONNAME`: [strchr x N]
    SectionName = 5,
    /// Deprecated; parsed and dropped.
    DepLib = 6,
    /// `GLOBALVAR`: [pointer type, isconst, initid, linkage, alignment,
    /// section, visibility, threadlocal, unnamed_addr]
    GlobalVar = 7,
    /// `FUNCTION`: [type, callingconv, isproto, linkage, paramattr,
    /// alignment, section, visibility, gc, unnamed_addr]
    Function = 8,
    /// `ALIAS`: [alias type, aliasee val#, linkage, visibility]
    Alias = 9,
    /// `PURGEVALS`: [numvals]
    PurgeVals = 10,
    /// `GCNAME`: [strchr x N]
    GcName = 11,
}

/// TYPE block record codes (both table generations draw from this set).
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum TypeCode {
    /// `NUMENTRY`: [numentries]
    NumEntry = 1,
    Void = 2,
    Float = 3,
    Double = 4,
    Label = 5,
    Opaque = 6,
    /// `INTEGER`: [width]
    Integer = 7,
    /// `POINTER`: [pointee type, address space?]
    Pointer = 8,
    /// `FUNCTION_OLD`: [vararg, attrid, retty, paramty x N]
    FunctionOld = 9,
    /// Legacy struct code in the old table; `HALF` in the new one.
    /// The old table has no half type, so the overlap is benign.
    StructOld = 10,
    /// `ARRAY`: [numelts, eltty]
    Array = 11,
    /// `VECTOR`: [numelts, eltty]
    Vector = 12,
    X86Fp80 = 13,
    Fp128 = 14,
    PpcFp128 = 15,
    Metadata = 16,
    X86Mmx = 17,
    /// `STRUCT_ANON`: [ispacked, eltty x N]
    StructAnon = 18,
    /// `STRUCT_NAME`: [strchr x N]
    StructName = 19,
    /// `STRUCT_NAMED`: [ispacked, eltty x N]
    StructNamed = 20,
    /// `FUNCTION`: [vararg, retty, paramty x N]
    Function = 21,
}

/// `HALF` in the modern type table shares the legacy struct code.
pub const TYPE_CODE_HALF: u64 = 10;

/// TYPE_SYMTAB block record codes (legacy).
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum TypeSymtabCode {
    /// `TST_ENTRY`: [typeid, namechar x N]
    Entry = 1,
}

/// VALUE_SYMTAB block record codes.
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum ValueSymtabCode {
    /// `VST_ENTRY`: [valueid, namechar x N]
    Entry = 1,
    /// `VST_BBENTRY`: [bbid, namechar x N]
    BbEntry = 2,
}

/// PARAMATTR block record codes.
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum AttributeCode {
    /// `ENTRY`: [paramidx0, attr0, paramidx1, attr1, ...]
    Entry = 1,
}

/// CONSTANTS block record codes.
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum ConstantsCode {
    /// `SETTYPE`: [typeid]
    SetType = 1,
    Null = 2,
    Undef = 3,
    /// `INTEGER`: [intval]
    Integer = 4,
    /// `WIDE_INTEGER`: [n x intval]
    WideInteger = 5,
    /// `FLOAT`: [fpval]
    Float = 6,
    /// `AGGREGATE`: [n x value number]
    Aggregate = 7,
    /// `STRING`: [values]
    String = 8,
    /// `CSTRING`: [values]
    CString = 9,
    /// `CE_BINOP`: [opcode, opval, opval, flags?]
    CeBinOp = 10,
    /// `CE_CAST`: [opcode, opty, opval]
    CeCast = 11,
    /// `CE_GEP`: [n x (opty, opval)]
    CeGep = 12,
    /// `CE_SELECT`: [opval, opval, opval]
    CeSelect = 13,
    /// `CE_EXTRACTELT`: [opty, opval, opval]
    CeExtractElt = 14,
    /// `CE_INSERTELT`: [opval, opval, opval]
    CeInsertElt = 15,
    /// `CE_SHUFFLEVEC`: [opval, opval, opval]
    CeShuffleVec = 16,
    /// `CE_CMP`: [opty, opval, opval, pred]
    CeCmp = 17,
    /// `INLINEASM`: [sideeffect|alignstack, asmlen, asm..., constlen, const...]
    InlineAsm = 18,
    /// `CE_SHUFVEC_EX`: [opty, opval, opval, opval]
    CeShufVecEx = 19,
    /// `CE_INBOUNDS_GEP`: [n x (opty, opval)]
    CeInboundsGep = 20,
    /// `BLOCKADDRESS`: [fnty, fnval, bb#]
    BlockAddress = 21,
}

/// FUNCTION block record codes, including the removed `unwind` terminator
/// still emitted by 2.7-era writers.
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum FunctionCode {
    /// `DECLAREBLOCKS`: [nblocks]
    DeclareBlocks = 1,
    /// `BINOP`: [opval, ty, opval, opcode, flags?]
    Binop = 2,
    /// `CAST`: [opval, opty, destty, castopc]
    Cast = 3,
    /// `GEP`: [n x operands]
    Gep = 4,
    /// `SELECT`: [opval, ty, opval, opval] (old i1-only form)
    Select = 5,
    /// `EXTRACTELT`: [opty, opval, opval]
    ExtractElt = 6,
    /// `INSERTELT`: [ty, opval, opval, opval]
    InsertElt = 7,
    /// `SHUFFLEVEC`: [opval, ty, opval, opval]
    ShuffleVec = 8,
    /// `CMP`: [opty, opval, opval, pred] (old bool-only form)
    Cmp = 9,
    /// `RET`: [opty, opval] (both optional)
    Ret = 10,
    /// `BR`: [bb#, bb#, opval] or [bb#]
    Br = 11,
    /// `SWITCH`: [opty, op0, op1, ...]
    Switch = 12,
    /// `INVOKE`: [attrs, cc, normBB, unwindBB, fnty, op0, op1, ...]
    Invoke = 13,
    /// Removed `unwind` terminator; rewritten to landingpad + resume.
    Unwind27 = 14,
    Unreachable = 15,
    /// `PHI`: [ty, val0, bb0, ...]
    Phi = 16,
    /// `ALLOCA`: [instty, opty, op, align]
    Alloca = 19,
    /// `LOAD`: [opty, op, align, vol]
    Load = 20,
    /// `VAARG`: [valistty, valist, instty]
    VaArg = 23,
    /// `STORE`: [ptrty, ptr, val, align, vol]
    Store = 24,
    /// `EXTRACTVAL`: [opty, opval, n x indices]
    ExtractVal = 26,
    /// `INSERTVAL`: [opty, opval, opty, opval, n x indices]
    InsertVal = 27,
    /// `CMP2`: [opty, opval, opval, pred]
    Cmp2 = 28,
    /// `VSELECT`: [ty, opval, opval, predty, pred]
    VSelect = 29,
    /// `INBOUNDS_GEP`: [n x operands]
    InboundsGep = 30,
    /// `INDIRECTBR`: [opty, op0, op1, ...]
    IndirectBr = 31,
    DebugLocAgain = 33,
    /// `CALL`: [paramattrs, cc, fnid, arg0, arg1, ...]
    Call = 34,
    /// `DEBUG_LOC`: [line, col, scope, ia]
    DebugLoc = 35,
    /// `FENCE`: [ordering, synchscope]
    Fence = 36,
    /// `CMPXCHG`: [ptrty, ptr, cmp, new, vol, ordering, synchscope]
    CmpXchg = 37,
    /// `ATOMICRMW`: [ptrty, ptr, val, op, vol, ordering, synchscope]
    AtomicRmw = 38,
    /// `RESUME`: [opval]
    Resume = 39,
    /// `LANDINGPAD`: [ty, persfn, iscleanup, numclauses, (kind, clause)*]
    LandingPad = 40,
    /// `LOADATOMIC`: [opty, op, align, vol, ordering, synchscope]
    LoadAtomic = 41,
    /// `STOREATOMIC`: [ptrty, ptr, val, align, vol, ordering, synchscope]
    StoreAtomic = 42,
}

/// METADATA block record codes. Later generations renumbered the node
/// records; these are the values 3.0-era writers emit.
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum MetadataCode {
    /// `STRING`: [values]
    String = 1,
    /// `NAME`: [values]
    Name = 4,
    /// `KIND`: [id, name...]
    Kind = 6,
    /// `NODE`: [n x (type num, value num)]
    Node = 8,
    /// `FN_NODE`: [n x (type num, value num)], function-local
    FnNode = 9,
    /// `NAMED_NODE`: [n x mdnodes]
    NamedNode = 10,
}

/// METADATA_ATTACHMENT block record codes.
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
#[non_exhaustive]
pub enum MetadataAttachmentCode {
    /// `ATTACHMENT`: [inst#, (kind, md#)*]
    Attachment = 11,
}

/// Cast opcodes as stored in the stream.
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum CastCode {
    Trunc = 0,
    ZExt = 1,
    SExt = 2,
    FpToUi = 3,
    FpToSi = 4,
    UiToFp = 5,
    SiToFp = 6,
    FpTrunc = 7,
    FpExt = 8,
    PtrToInt = 9,
    IntToPtr = 10,
    BitCast = 11,
}

/// Binary opcodes as stored in the stream. ADD/SUB/MUL/SDIV/SREM double as
/// their floating-point forms when the operand type is FP.
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum BinopCode {
    Add = 0,
    Sub = 1,
    Mul = 2,
    UDiv = 3,
    SDiv = 4,
    URem = 5,
    SRem = 6,
    Shl = 7,
    LShr = 8,
    AShr = 9,
    And = 10,
    Or = 11,
    Xor = 12,
}

/// Atomic read-modify-write operations as stored in the stream.
#[derive(Debug, Clone, Copy, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum RmwCode {
    Xchg = 0,
    Add = 1,
    Sub = 2,
    And = 3,
    Nand = 4,
    Or = 5,
    Xor = 6,
    Max = 7,
    Min = 8,
    UMax = 9,
    UMin = 10,
}

/// Encoded atomic orderings.
pub mod ordering {
    pub const NOTATOMIC: u64 = 0;
    pub const UNORDERED: u64 = 1;
    pub const MONOTONIC: u64 = 2;
    pub const ACQUIRE: u64 = 3;
    pub const RELEASE: u64 = 4;
    pub const ACQREL: u64 = 5;
    pub const SEQCST: u64 = 6;
}

/// Encoded synchronization scopes.
pub mod sync_scope {
    pub const SINGLE_THREAD: u64 = 0;
    pub const CROSS_THREAD: u64 = 1;
}

/// Overflowing-binary-operator flag bits carried by BINOP records.
pub const OBO_NO_UNSIGNED_WRAP: u64 = 0;
pub const OBO_NO_SIGNED_WRAP: u64 = 1;
/// Possibly-exact-operator flag bit.
pub const PEO_EXACT: u64 = 0;
