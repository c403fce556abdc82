use rustc_hash::FxHashMap;

/// Index of a type in the [`TypeContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Body of a non-opaque named struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructBody {
    pub fields: Vec<TypeId>,
    pub packed: bool,
}

/// A type. Literal types are interned by content; named structs have slot
/// identity and may exist opaque (no body) until their defining record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Half,
    Float,
    Double,
    X86Fp80,
    Fp128,
    PpcFp128,
    Label,
    Metadata,
    X86Mmx,
    Integer {
        bits: u32,
    },
    Pointer {
        pointee: TypeId,
        address_space: u32,
    },
    Function {
        vararg: bool,
        ret: TypeId,
        params: Vec<TypeId>,
    },
    Array {
        len: u64,
        elem: TypeId,
    },
    Vector {
        len: u64,
        elem: TypeId,
    },
    /// Anonymous (literal) struct.
    Struct {
        fields: Vec<TypeId>,
        packed: bool,
    },
    /// Named struct; `body == None` means opaque.
    NamedStruct {
        name: String,
        body: Option<StructBody>,
    },
}

/// Owner of all types in a module.
#[derive(Debug, Default)]
pub struct TypeContext {
    entries: Vec<Type>,
    interned: FxHashMap<Type, TypeId>,
}

impl TypeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.entries[id.index()]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &Type)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, t)| (TypeId(i as u32), t))
    }

    /// Intern a literal type. Named structs must go through
    /// [`TypeContext::named_struct`] instead, since they have identity.
    pub fn intern(&mut self, ty: Type) -> TypeId {
        debug_assert!(!matches!(ty, Type::NamedStruct { .. }));
        if let Some(&id) = self.interned.get(&ty) {
            return id;
        }
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(ty.clone());
        self.interned.insert(ty, id);
        id
    }

    /// Create a fresh named struct with no body.
    pub fn named_struct(&mut self, name: impl Into<String>) -> TypeId {
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(Type::NamedStruct {
            name: name.into(),
            body: None,
        });
        id
    }

    pub fn set_struct_name(&mut self, id: TypeId, name: impl Into<String>) {
        if let Type::NamedStruct { name: n, .. } = &mut self.entries[id.index()] {
            *n = name.into();
        }
    }

    pub fn set_struct_body(&mut self, id: TypeId, fields: Vec<TypeId>, packed: bool) {
        if let Type::NamedStruct { body, .. } = &mut self.entries[id.index()] {
            *body = Some(StructBody { fields, packed });
        }
    }

    pub fn void(&mut self) -> TypeId {
        self.intern(Type::Void)
    }

    pub fn int(&mut self, bits: u32) -> TypeId {
        self.intern(Type::Integer { bits })
    }

    pub fn int1(&mut self) -> TypeId {
        self.int(1)
    }

    pub fn int8(&mut self) -> TypeId {
        self.int(8)
    }

    pub fn int32(&mut self) -> TypeId {
        self.int(32)
    }

    pub fn pointer(&mut self, pointee: TypeId, address_space: u32) -> TypeId {
        self.intern(Type::Pointer {
            pointee,
            address_space,
        })
    }

    pub fn int8_ptr(&mut self) -> TypeId {
        let i8 = self.int8();
        self.pointer(i8, 0)
    }

    pub fn function(&mut self, vararg: bool, ret: TypeId, params: Vec<TypeId>) -> TypeId {
        self.intern(Type::Function {
            vararg,
            ret,
            params,
        })
    }

    pub fn array(&mut self, len: u64, elem: TypeId) -> TypeId {
        self.intern(Type::Array { len, elem })
    }

    pub fn vector(&mut self, len: u64, elem: TypeId) -> TypeId {
        self.intern(Type::Vector { len, elem })
    }

    pub fn anon_struct(&mut self, fields: Vec<TypeId>, packed: bool) -> TypeId {
        self.intern(Type::Struct { fields, packed })
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Void)
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Integer { .. })
    }

    pub fn is_label(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Label)
    }

    pub fn is_metadata(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Metadata)
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Pointer { .. })
    }

    pub fn is_vector(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Vector { .. })
    }

    pub fn is_float_kind(&self, id: TypeId) -> bool {
        matches!(
            self.get(id),
            Type::Half | Type::Float | Type::Double | Type::X86Fp80 | Type::Fp128 | Type::PpcFp128
        )
    }

    /// FP scalar or vector of FP, the distinction that picks the
    /// floating-point form of overloaded opcodes.
    pub fn is_fp_or_fp_vector(&self, id: TypeId) -> bool {
        match self.get(id) {
            Type::Vector { elem, .. } => self.is_float_kind(*elem),
            _ => self.is_float_kind(id),
        }
    }

    pub fn int_width(&self, id: TypeId) -> Option<u32> {
        match self.get(id) {
            Type::Integer { bits } => Some(*bits),
            _ => None,
        }
    }

    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            Type::Pointer { pointee, .. } => Some(*pointee),
            _ => None,
        }
    }

    pub fn address_space(&self, id: TypeId) -> Option<u32> {
        match self.get(id) {
            Type::Pointer { address_space, .. } => Some(*address_space),
            _ => None,
        }
    }

    /// Element type of an array, vector or pointer.
    pub fn element_type(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            Type::Array { elem, .. } | Type::Vector { elem, .. } => Some(*elem),
            Type::Pointer { pointee, .. } => Some(*pointee),
            _ => None,
        }
    }

    pub fn vector_len(&self, id: TypeId) -> Option<u64> {
        match self.get(id) {
            Type::Vector { len, .. } => Some(*len),
            _ => None,
        }
    }

    pub fn struct_fields(&self, id: TypeId) -> Option<&[TypeId]> {
        match self.get(id) {
            Type::Struct { fields, .. } => Some(fields),
            Type::NamedStruct {
                body: Some(body), ..
            } => Some(&body.fields),
            _ => None,
        }
    }

    pub fn is_opaque_struct(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::NamedStruct { body: None, .. })
    }

    pub fn is_named_struct(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::NamedStruct { .. })
    }

    pub fn struct_name(&self, id: TypeId) -> Option<&str> {
        match self.get(id) {
            Type::NamedStruct { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn function_parts(&self, id: TypeId) -> Option<(bool, TypeId, &[TypeId])> {
        match self.get(id) {
            Type::Function {
                vararg,
                ret,
                params,
            } => Some((*vararg, *ret, params)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_types_are_interned() {
        let mut ctx = TypeContext::new();
        let a = ctx.int(32);
        let b = ctx.int(32);
        assert_eq!(a, b);
        let p1 = ctx.pointer(a, 0);
        let p2 = ctx.pointer(b, 0);
        assert_eq!(p1, p2);
        assert_ne!(p1, ctx.pointer(a, 1));
    }

    #[test]
    fn named_structs_have_identity() {
        let mut ctx = TypeContext::new();
        let s1 = ctx.named_struct("pair");
        let s2 = ctx.named_struct("pair");
        assert_ne!(s1, s2);
        assert!(ctx.is_opaque_struct(s1));
        let int32 = ctx.int(32);
        ctx.set_struct_body(s1, vec![int32, int32], false);
        assert!(!ctx.is_opaque_struct(s1));
        assert_eq!(ctx.struct_fields(s1), Some(&[int32, int32][..]));
    }

    #[test]
    fn fp_vector_classification() {
        let mut ctx = TypeContext::new();
        let f = ctx.intern(Type::Float);
        let vf = ctx.vector(4, f);
        let i = ctx.int(32);
        let vi = ctx.vector(4, i);
        assert!(ctx.is_fp_or_fp_vector(f));
        assert!(ctx.is_fp_or_fp_vector(vf));
        assert!(!ctx.is_fp_or_fp_vector(i));
        assert!(!ctx.is_fp_or_fp_vector(vi));
    }
}
