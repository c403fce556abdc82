use crate::ir::instruction::{BasicBlock, InstId, Instruction};
use crate::ir::metadata::{MdId, Metadata};
use crate::ir::types::{TypeContext, TypeId};
use crate::ir::values::{Constant, Value, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AliasId(u32);

macro_rules! arena_id {
    ($name:ident) => {
        impl $name {
            pub fn new(index: usize) -> Self {
                Self(index as u32)
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(GlobalId);
arena_id!(FuncId);
arena_id!(AliasId);

/// Decoded linkage kinds. Legacy codes remap during decoding; this enum
/// only carries the current set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Linkage {
    #[default]
    External,
    WeakAny,
    Appending,
    Internal,
    LinkOnceAny,
    ExternalWeak,
    Common,
    Private,
    WeakOdr,
    LinkOnceOdr,
    AvailableExternally,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Default,
    Hidden,
    Protected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadLocalMode {
    #[default]
    NotThreadLocal,
    GeneralDynamic,
    LocalDynamic,
    InitialExec,
    LocalExec,
}

/// Attributes for one slot of an attribute set: raw bits plus alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttributeEntry {
    /// 0 = return slot, `u32::MAX` = function slot, otherwise parameter N.
    pub slot: u32,
    pub bits: u64,
    pub alignment: u32,
}

/// Slot for function attributes in an [`AttributeEntry`].
pub const FUNCTION_ATTR_SLOT: u32 = u32::MAX;

#[derive(Debug, Clone, Default)]
pub struct AttributeSet {
    pub entries: Vec<AttributeEntry>,
}

#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub name: String,
    /// Pointer type of the global value itself.
    pub ptr_ty: TypeId,
    /// Type of the stored contents.
    pub value_ty: TypeId,
    pub address_space: u32,
    pub is_const: bool,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub thread_local: ThreadLocalMode,
    pub unnamed_addr: bool,
    pub alignment: u32,
    pub section: Option<String>,
    pub init: Option<ValueId>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// The function type.
    pub ty: TypeId,
    /// Pointer-to-function type, as the module record encodes it.
    pub ptr_ty: TypeId,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub calling_conv: u32,
    /// 1-based index into the module attribute table; 0 = none.
    pub attrs: u32,
    pub alignment: u32,
    pub section: Option<String>,
    pub gc: Option<String>,
    pub unnamed_addr: bool,
    /// Whether the module record declared this a prototype.
    pub is_proto: bool,
    pub blocks: Vec<BasicBlock>,
    pub insts: Vec<Instruction>,
    /// Argument values, populated when a body is materialized.
    pub args: Vec<ValueId>,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn add_inst(&mut self, inst: Instruction) -> InstId {
        let id = InstId::new(self.insts.len());
        self.insts.push(inst);
        id
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.index()]
    }

    /// Drop the body; the stream still holds it for re-materialization.
    pub fn discard_body(&mut self) {
        self.blocks.clear();
        self.insts.clear();
        self.args.clear();
    }
}

#[derive(Debug, Clone)]
pub struct GlobalAlias {
    pub name: String,
    /// Pointer type of the alias.
    pub ty: TypeId,
    pub address_space: u32,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub aliasee: Option<ValueId>,
}

/// The produced module: owner of types, global values, the value arena and
/// metadata. Ownership of everything the reader builds transfers here as it
/// is inserted.
#[derive(Debug, Default)]
pub struct Module {
    pub triple: String,
    pub data_layout: String,
    pub inline_asm: String,
    pub types: TypeContext,
    pub globals: Vec<GlobalVariable>,
    pub functions: Vec<Function>,
    pub aliases: Vec<GlobalAlias>,
    pub attribute_sets: Vec<AttributeSet>,
    pub named_metadata: Vec<(String, Vec<MdId>)>,
    values: Vec<Value>,
    metadata: Vec<Metadata>,
    md_kind_names: Vec<String>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_value(&mut self, value: Value) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(value);
        id
    }

    /// Raw slot access; most callers want [`Module::value`].
    pub fn value_slot(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    pub fn value_slot_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id.index()]
    }

    /// Chase forward links to the canonical id.
    pub fn resolve(&self, mut id: ValueId) -> ValueId {
        while let Value::Forward(next) = &self.values[id.index()] {
            id = *next;
        }
        id
    }

    /// The value behind `id`, forward links resolved.
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[self.resolve(id).index()]
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn is_constant_value(&self, id: ValueId) -> bool {
        self.value(id).is_constant()
    }

    /// The constant behind `id`, if it is one.
    pub fn as_constant(&self, id: ValueId) -> Option<&Constant> {
        match self.value(id) {
            Value::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Small-integer constant value, used by switch cases and struct
    /// indexing.
    pub fn const_u64(&self, id: ValueId) -> Option<u64> {
        self.as_constant(id).and_then(Constant::as_u64)
    }

    pub fn value_type(&self, id: ValueId) -> TypeId {
        match self.value(id) {
            Value::Global(g) => self.globals[g.index()].ptr_ty,
            Value::Function(f) => self.functions[f.index()].ptr_ty,
            Value::Alias(a) => self.aliases[a.index()].ty,
            Value::Argument { ty, .. } => *ty,
            Value::Inst { func, inst } => self.functions[func.index()].inst(*inst).ty,
            Value::Constant(c) => c.ty(),
            Value::InlineAsm { ty, .. } => *ty,
            Value::Block { ty, .. } => *ty,
            Value::ConstantPlaceholder { ty } | Value::SyntheticArg { ty } => *ty,
            Value::Forward(_) => unreachable!("resolved before match"),
        }
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.index()]
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(FuncId::new)
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVariable {
        &self.globals[id.index()]
    }

    pub fn global_by_name(&self, name: &str) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|g| g.name == name)
            .map(GlobalId::new)
    }

    pub fn alias(&self, id: AliasId) -> &GlobalAlias {
        &self.aliases[id.index()]
    }

    pub fn push_metadata(&mut self, md: Metadata) -> MdId {
        let id = MdId::new(self.metadata.len());
        self.metadata.push(md);
        id
    }

    pub fn resolve_metadata(&self, mut id: MdId) -> MdId {
        while let Metadata::Forward(next) = &self.metadata[id.index()] {
            id = *next;
        }
        id
    }

    pub fn metadata(&self, id: MdId) -> &Metadata {
        &self.metadata[self.resolve_metadata(id).index()]
    }

    pub fn metadata_slot_mut(&mut self, id: MdId) -> &mut Metadata {
        &mut self.metadata[id.index()]
    }

    pub fn metadata_count(&self) -> usize {
        self.metadata.len()
    }

    /// Rewrite value slots in place: every slot for which `f` returns a
    /// replacement is overwritten, redirecting all of its users at once.
    pub fn redirect_values(&mut self, mut f: impl FnMut(&Value) -> Option<Value>) {
        for slot in &mut self.values {
            if let Some(replacement) = f(slot) {
                *slot = replacement;
            }
        }
    }

    /// Get-or-insert the module-level id for a metadata kind name.
    pub fn md_kind_id(&mut self, name: &str) -> u32 {
        if let Some(pos) = self.md_kind_names.iter().position(|n| n == name) {
            return pos as u32;
        }
        self.md_kind_names.push(name.to_owned());
        (self.md_kind_names.len() - 1) as u32
    }
}
