//! The bitcode deserializer: a state machine over the block/record stream
//! that materializes a module, deferring function bodies until asked.

mod attrs;
mod constants;
mod function;
mod types;
mod upgrade;
mod values;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::codes::{BlockId, ModuleCode};
use crate::ir::{
    AliasId, FuncId, Function, GlobalAlias, GlobalId, GlobalVariable, Linkage, Module,
    ThreadLocalMode, TypeId, Value, ValueId, Visibility,
};
use crate::stream::{
    BitstreamCursor, Entry, DEFINE_ABBREV, END_BLOCK, ENTER_SUBBLOCK,
};
use crate::{Error, Result};

pub use self::values::{MetadataTable, ValueTable};

/// Wrapper header magic, little-endian on disk.
const WRAPPER_MAGIC: u32 = 0x0B17_C0DE;

/// Classify a subblock ID, treating out-of-range IDs as unknown.
fn known_block(id: u64) -> Option<BlockId> {
    u8::try_from(id).ok().and_then(|b| BlockId::try_from(b).ok())
}

/// Classify a record code, treating out-of-range codes as unknown rather
/// than letting them alias a real code.
pub(super) fn record_code<T: TryFrom<u8>>(code: u64) -> Option<T> {
    u8::try_from(code).ok().and_then(|c| T::try_from(c).ok())
}

/// Decode a linkage code; legacy codes remap, unknown codes read as
/// external.
pub fn decode_linkage(value: u64) -> Linkage {
    match value {
        1 => Linkage::WeakAny,
        2 => Linkage::Appending,
        3 => Linkage::Internal,
        4 => Linkage::LinkOnceAny,
        5 | 6 => Linkage::External, // was dllimport / dllexport
        7 => Linkage::ExternalWeak,
        8 => Linkage::Common,
        9 => Linkage::Private,
        10 => Linkage::WeakOdr,
        11 => Linkage::LinkOnceOdr,
        12 => Linkage::AvailableExternally,
        13 => Linkage::Private,      // was linker-private
        14 => Linkage::ExternalWeak, // was linker-private-weak
        15 => Linkage::LinkOnceOdr,  // was linkonce-odr-autohide
        _ => Linkage::External,
    }
}

/// Decode a visibility code; unknown codes read as default.
pub fn decode_visibility(value: u64) -> Visibility {
    match value {
        1 => Visibility::Hidden,
        2 => Visibility::Protected,
        _ => Visibility::Default,
    }
}

/// Decode a thread-local mode; unknown non-zero codes read as
/// general-dynamic.
pub fn decode_thread_local_mode(value: u64) -> ThreadLocalMode {
    match value {
        0 => ThreadLocalMode::NotThreadLocal,
        2 => ThreadLocalMode::LocalDynamic,
        3 => ThreadLocalMode::InitialExec,
        4 => ThreadLocalMode::LocalExec,
        _ => ThreadLocalMode::GeneralDynamic,
    }
}

/// Alignment fields store `log2(alignment) + 1`; zero means unspecified.
/// Out-of-range exponents read as unspecified rather than shifting past
/// the word.
pub fn decode_alignment(value: u64) -> u32 {
    if value == 0 || value > 32 {
        return 0;
    }
    1u32 << (value - 1)
}

/// Collect record fields from `from` onward as a string; fails when the
/// start index is past the record end.
fn record_string(fields: &[u64], from: usize) -> Result<String> {
    if from > fields.len() {
        return Err(Error::InvalidRecord);
    }
    Ok(fields[from..].iter().map(|&b| b as u8 as char).collect())
}

/// Strip an optional wrapper header, returning the inner bitcode slice.
fn strip_wrapper(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 4 {
        return Err(Error::InvalidBitcodeSignature);
    }
    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if magic != WRAPPER_MAGIC {
        return Ok(data);
    }
    if data.len() < 20 {
        return Err(Error::InvalidBitcodeWrapperHeader);
    }
    let offset = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
    let size = u32::from_le_bytes([data[12], data[13], data[14], data[15]]) as usize;
    let end = offset.checked_add(size).ok_or(Error::InvalidBitcodeWrapperHeader)?;
    if offset < 20 || end > data.len() {
        return Err(Error::InvalidBitcodeWrapperHeader);
    }
    Ok(&data[offset..end])
}

/// Reader over one in-memory bitcode buffer. The lifecycle is
/// `new` → `parse` → `materialize*` → drop (or [`BitcodeReader::into_module`]
/// once everything needed has been materialized).
pub struct BitcodeReader<'a> {
    pub(super) stream: BitstreamCursor<'a>,
    pub(super) module: Module,
    pub(super) type_list: Vec<Option<TypeId>>,
    pub(super) values: ValueTable,
    pub(super) md_values: MetadataTable,
    pub(super) md_kind_map: FxHashMap<u64, u32>,
    pub(super) functions_with_bodies: Vec<FuncId>,
    pub(super) deferred_function_info: FxHashMap<FuncId, u64>,
    pub(super) global_inits: Vec<(GlobalId, usize)>,
    pub(super) alias_inits: Vec<(AliasId, usize)>,
    pub(super) block_addr_fwd_refs: FxHashMap<FuncId, Vec<(u64, ValueId)>>,
    pub(super) upgraded_intrinsics: Vec<(FuncId, FuncId)>,
    seen_module: bool,
    seen_first_function_body: bool,
}

impl<'a> BitcodeReader<'a> {
    /// Wrap a resident buffer, stripping the optional wrapper header.
    /// The buffer is borrowed, never owned; on error the caller keeps it.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let inner = strip_wrapper(data)?;
        if inner.len() & 3 != 0 {
            return Err(Error::InvalidBitcodeSignature);
        }
        Ok(Self {
            stream: BitstreamCursor::new(inner),
            module: Module::new(),
            type_list: Vec::new(),
            values: ValueTable::new(),
            md_values: MetadataTable::new(),
            md_kind_map: FxHashMap::default(),
            functions_with_bodies: Vec::new(),
            deferred_function_info: FxHashMap::default(),
            global_inits: Vec::new(),
            alias_inits: Vec::new(),
            block_addr_fwd_refs: FxHashMap::default(),
            upgraded_intrinsics: Vec::new(),
            seen_module: false,
            seen_first_function_body: false,
        })
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    /// Give up the reader and keep the module. Unmaterialized functions
    /// stay declarations.
    pub fn into_module(self) -> Module {
        self.module
    }

    /// Validate the signature and parse everything up to (but not
    /// including) deferred function bodies.
    pub fn parse(&mut self) -> Result<()> {
        if self.stream.read(8)? != u64::from(b'B')
            || self.stream.read(8)? != u64::from(b'C')
            || self.stream.read(4)? != 0x0
            || self.stream.read(4)? != 0xC
            || self.stream.read(4)? != 0xE
            || self.stream.read(4)? != 0xD
        {
            return Err(Error::InvalidBitcodeSignature);
        }

        loop {
            if self.stream.at_end() {
                return Ok(());
            }

            let abbrev_id = self.stream.read_abbrev_id()?;
            match abbrev_id {
                ENTER_SUBBLOCK => {
                    let block_id = self.stream.read_vbr(8)?;
                    match known_block(block_id) {
                        Some(BlockId::Module) => {
                            if self.seen_module {
                                return Err(Error::InvalidMultipleBlocks);
                            }
                            self.seen_module = true;
                            self.stream.enter_block(block_id)?;
                            self.parse_module_block()?;
                        }
                        _ if block_id == crate::stream::BLOCKINFO_BLOCK_ID => {
                            self.stream.read_blockinfo_block()?;
                        }
                        _ => {
                            trace!(block_id, "skipping unknown top-level block");
                            self.stream.skip_block()?;
                        }
                    }
                }
                END_BLOCK => return Err(Error::MalformedBlock),
                DEFINE_ABBREV => {
                    // Archive tools pad members with newlines; a trailing
                    // 32-bit 0x0a0a0a0a run is accepted at end of stream.
                    if self.stream.read(6)? == 2
                        && self.stream.read(24)? == 0x0a0a0a
                        && self.stream.at_end()
                    {
                        return Ok(());
                    }
                    return Err(Error::InvalidRecord);
                }
                _ => return Err(Error::InvalidRecord),
            }
        }
    }

    fn parse_module_block(&mut self) -> Result<()> {
        let mut section_table: Vec<String> = Vec::new();
        let mut gc_table: Vec<String> = Vec::new();

        loop {
            match self.stream.advance()? {
                Entry::EndBlock => return self.global_cleanup(),
                Entry::SubBlock(block_id) => {
                    if block_id == crate::stream::BLOCKINFO_BLOCK_ID {
                        self.stream.read_blockinfo_block()?;
                        continue;
                    }
                    match known_block(block_id) {
                        Some(BlockId::ParamAttr) => self.parse_attribute_block()?,
                        Some(BlockId::Type) => self.parse_type_table()?,
                        Some(BlockId::TypeOld) => self.parse_old_type_table()?,
                        Some(BlockId::TypeSymtabOld) => self.parse_old_type_symbol_table()?,
                        Some(BlockId::ValueSymtab) => self.parse_value_symbol_table(None)?,
                        Some(BlockId::Constants) => {
                            self.parse_constants_block()?;
                            self.resolve_global_and_alias_inits()?;
                        }
                        Some(BlockId::Metadata) => self.parse_metadata_block()?,
                        Some(BlockId::Function) => {
                            if !self.seen_first_function_body {
                                self.functions_with_bodies.reverse();
                                self.global_cleanup()?;
                                self.seen_first_function_body = true;
                            }
                            self.remember_and_skip_function_body()?;
                        }
                        _ => {
                            trace!(block_id, "skipping unknown module subblock");
                            self.stream.skip_block()?;
                        }
                    }
                }
                Entry::Record(abbrev_id) => {
                    let record = self.stream.read_record(abbrev_id)?;
                    match record_code::<ModuleCode>(record.code) {
                        Some(ModuleCode::Version) => {
                            let &[version, ..] = &record.fields[..] else {
                                return Err(Error::InvalidRecord);
                            };
                            if version != 0 {
                                return Err(Error::InvalidValue);
                            }
                        }
                        Some(ModuleCode::Triple) => {
                            self.module.triple = record_string(&record.fields, 0)?;
                        }
                        Some(ModuleCode::DataLayout) => {
                            self.module.data_layout = record_string(&record.fields, 0)?;
                        }
                        Some(ModuleCode::Asm) => {
                            self.module.inline_asm = record_string(&record.fields, 0)?;
                        }
                        Some(ModuleCode::DepLib) => {
                            // Dependent libraries were never consumed; the
                            // record is validated and dropped.
                            let _ = record_string(&record.fields, 0)?;
                        }
                        Some(ModuleCode::SectionName) => {
                            section_table.push(record_string(&record.fields, 0)?);
                        }
                        Some(ModuleCode::GcName) => {
                            gc_table.push(record_string(&record.fields, 0)?);
                        }
                        Some(ModuleCode::GlobalVar) => {
                            self.parse_global_var_record(&record.fields, &section_table)?;
                        }
                        Some(ModuleCode::Function) => {
                            self.parse_function_record(&record.fields, &section_table, &gc_table)?;
                        }
                        Some(ModuleCode::Alias) => {
                            self.parse_alias_record(&record.fields)?;
                        }
                        Some(ModuleCode::PurgeVals) => {
                            let &[count, ..] = &record.fields[..] else {
                                return Err(Error::InvalidRecord);
                            };
                            if count as usize > self.values.size() {
                                return Err(Error::InvalidRecord);
                            }
                            self.values.shrink_to(count as usize);
                        }
                        None => {
                            trace!(code = record.code, "ignoring unknown module record");
                        }
                    }
                }
            }
        }
    }

    /// GLOBALVAR: [pointer type, isconst, initid, linkage, alignment,
    /// section, visibility, threadlocal, unnamed_addr]
    fn parse_global_var_record(&mut self, fields: &[u64], sections: &[String]) -> Result<()> {
        if fields.len() < 6 {
            return Err(Error::InvalidRecord);
        }
        let ptr_ty = self
            .get_type_by_id(fields[0])
            .ok_or(Error::InvalidRecord)?;
        let value_ty = self
            .module
            .types
            .pointee(ptr_ty)
            .ok_or(Error::InvalidTypeForValue)?;
        let address_space = self.module.types.address_space(ptr_ty).unwrap_or(0);

        let section = match fields[5] {
            0 => None,
            n => Some(
                sections
                    .get(n as usize - 1)
                    .ok_or(Error::InvalidId)?
                    .clone(),
            ),
        };

        let global = GlobalVariable {
            name: String::new(),
            ptr_ty,
            value_ty,
            address_space,
            is_const: fields[1] != 0,
            linkage: decode_linkage(fields[3]),
            visibility: fields.get(6).copied().map(decode_visibility).unwrap_or_default(),
            thread_local: fields
                .get(7)
                .copied()
                .map(decode_thread_local_mode)
                .unwrap_or_default(),
            unnamed_addr: fields.get(8).is_some_and(|&v| v != 0),
            alignment: decode_alignment(fields[4]),
            section,
            init: None,
        };

        let gid = GlobalId::new(self.module.globals.len());
        self.module.globals.push(global);
        let vid = self.module.push_value(Value::Global(gid));
        self.values.push(vid);

        if fields[2] != 0 {
            self.global_inits.push((gid, fields[2] as usize - 1));
        }
        Ok(())
    }

    /// FUNCTION: [type, callingconv, isproto, linkage, paramattr,
    /// alignment, section, visibility, gc, unnamed_addr]
    fn parse_function_record(
        &mut self,
        fields: &[u64],
        sections: &[String],
        gc_table: &[String],
    ) -> Result<()> {
        if fields.len() < 8 {
            return Err(Error::InvalidRecord);
        }
        let ptr_ty = self
            .get_type_by_id(fields[0])
            .ok_or(Error::InvalidRecord)?;
        let fn_ty = self
            .module
            .types
            .pointee(ptr_ty)
            .ok_or(Error::InvalidTypeForValue)?;
        if self.module.types.function_parts(fn_ty).is_none() {
            return Err(Error::InvalidTypeForValue);
        }

        let section = match fields[6] {
            0 => None,
            n => Some(
                sections
                    .get(n as usize - 1)
                    .ok_or(Error::InvalidId)?
                    .clone(),
            ),
        };
        let gc = match fields.get(8).copied().unwrap_or(0) {
            0 => None,
            n => Some(
                gc_table
                    .get(n as usize - 1)
                    .ok_or(Error::InvalidId)?
                    .clone(),
            ),
        };

        let is_proto = fields[2] != 0;
        let function = Function {
            name: String::new(),
            ty: fn_ty,
            ptr_ty,
            linkage: decode_linkage(fields[3]),
            visibility: decode_visibility(fields[7]),
            calling_conv: fields[1] as u32,
            attrs: fields[4] as u32,
            alignment: decode_alignment(fields[5]),
            section,
            gc,
            unnamed_addr: fields.get(9).is_some_and(|&v| v != 0),
            is_proto,
            blocks: Vec::new(),
            insts: Vec::new(),
            args: Vec::new(),
        };

        let fid = FuncId::new(self.module.functions.len());
        self.module.functions.push(function);
        let vid = self.module.push_value(Value::Function(fid));
        self.values.push(vid);

        // Bodies match up with prototypes in source order later.
        if !is_proto {
            self.functions_with_bodies.push(fid);
        }
        Ok(())
    }

    /// ALIAS: [alias type, aliasee val#, linkage, visibility?]
    fn parse_alias_record(&mut self, fields: &[u64]) -> Result<()> {
        if fields.len() < 3 {
            return Err(Error::InvalidRecord);
        }
        let ty = self
            .get_type_by_id(fields[0])
            .ok_or(Error::InvalidRecord)?;
        if !self.module.types.is_pointer(ty) {
            return Err(Error::InvalidTypeForValue);
        }
        let address_space = self.module.types.address_space(ty).unwrap_or(0);

        let alias = GlobalAlias {
            name: String::new(),
            ty,
            address_space,
            linkage: decode_linkage(fields[2]),
            visibility: fields.get(3).copied().map(decode_visibility).unwrap_or_default(),
            aliasee: None,
        };
        let aid = AliasId::new(self.module.aliases.len());
        self.module.aliases.push(alias);
        let vid = self.module.push_value(Value::Alias(aid));
        self.values.push(vid);
        self.alias_inits.push((aid, fields[1] as usize));
        Ok(())
    }

    /// Record where a function body lives and skip it; materialization
    /// jumps back later.
    fn remember_and_skip_function_body(&mut self) -> Result<()> {
        let Some(fid) = self.functions_with_bodies.pop() else {
            return Err(Error::InsufficientFunctionProtos);
        };
        let position = self.stream.bit_pos();
        debug!(function = fid.index(), position, "deferring function body");
        self.deferred_function_info.insert(fid, position);
        self.stream.skip_block()?;
        Ok(())
    }

    /// Resolve whatever global and alias initializers are resolvable now;
    /// the rest stay pending for a later constants block.
    pub(super) fn resolve_global_and_alias_inits(&mut self) -> Result<()> {
        let mut global_worklist = std::mem::take(&mut self.global_inits);
        let mut alias_worklist = std::mem::take(&mut self.alias_inits);

        while let Some((gid, val_id)) = global_worklist.pop() {
            if val_id >= self.values.size() {
                self.global_inits.push((gid, val_id));
                continue;
            }
            let v = self.values.get(val_id).ok_or(Error::ExpectedConstant)?;
            if !self.module.is_constant_value(v) {
                return Err(Error::ExpectedConstant);
            }
            self.module.globals[gid.index()].init = Some(v);
        }

        // Aliases may point at other aliases; collect first, then chase
        // each expression to the underlying global object.
        let mut alias_init: FxHashMap<AliasId, ValueId> = FxHashMap::default();
        while let Some((aid, val_id)) = alias_worklist.pop() {
            if val_id >= self.values.size() {
                self.alias_inits.push((aid, val_id));
                continue;
            }
            let v = self.values.get(val_id).ok_or(Error::ExpectedConstant)?;
            if !self.module.is_constant_value(v) {
                return Err(Error::ExpectedConstant);
            }
            alias_init.insert(aid, v);
        }

        for (&aid, &init) in &alias_init {
            let object = self
                .global_object_in_expr(&alias_init, init, 0)
                .ok_or(Error::InvalidValue)?;
            self.module.aliases[aid.index()].aliasee = Some(object);
        }
        Ok(())
    }

    /// Walk through aliases and bitcast / all-zero-GEP expressions down to
    /// the global object an alias ultimately names.
    fn global_object_in_expr(
        &self,
        map: &FxHashMap<AliasId, ValueId>,
        v: ValueId,
        depth: usize,
    ) -> Option<ValueId> {
        use crate::ir::{CastOp, ConstExpr, Constant};

        if depth > self.module.aliases.len() + 64 {
            return None;
        }
        match self.module.value(v) {
            Value::Global(_) | Value::Function(_) => Some(self.module.resolve(v)),
            Value::Alias(aid) => {
                let next = *map.get(aid)?;
                self.global_object_in_expr(map, next, depth + 1)
            }
            Value::Constant(Constant::Expr(expr)) => match expr {
                ConstExpr::Cast {
                    op: CastOp::BitCast,
                    value,
                    ..
                } => self.global_object_in_expr(map, *value, depth + 1),
                ConstExpr::Gep { base, indices, .. }
                    if indices
                        .iter()
                        .all(|&ix| self.module.const_u64(ix) == Some(0)) =>
                {
                    self.global_object_in_expr(map, *base, depth + 1)
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Patch global and alias initializers, then discover legacy
    /// constructs that need renaming or signature upgrades. Runs at the
    /// first function body and again at end of module: old files name
    /// their values only after the bodies, so discovery must be
    /// re-runnable.
    fn global_cleanup(&mut self) -> Result<()> {
        self.resolve_global_and_alias_inits()?;
        if !self.global_inits.is_empty() || !self.alias_inits.is_empty() {
            return Err(Error::MalformedGlobalInitializerSet);
        }
        self.discover_intrinsic_upgrades();
        self.upgrade_global_variables();
        Ok(())
    }

    /// Fetch a type by table slot, installing a named-struct placeholder
    /// for a forward reference.
    pub(super) fn get_type_by_id(&mut self, id: u64) -> Option<TypeId> {
        let id = id as usize;
        if id >= self.type_list.len() {
            return None;
        }
        if let Some(ty) = self.type_list[id] {
            return Some(ty);
        }
        // A forward type reference can only name a struct.
        let ty = self.module.types.named_struct("");
        self.type_list[id] = Some(ty);
        Some(ty)
    }

    /// Fetch a type slot without creating placeholders; the legacy table
    /// iterates until every slot fills.
    pub(super) fn get_type_by_id_or_none(&mut self, id: u64) -> Option<TypeId> {
        let id = id as usize;
        if id >= self.type_list.len() {
            self.type_list.resize(id + 1, None);
        }
        self.type_list[id]
    }

    /// Find or create a declaration for a named function.
    pub(super) fn get_or_insert_function(&mut self, name: &str, fn_ty: TypeId) -> FuncId {
        if let Some(fid) = self.module.function_by_name(name) {
            return fid;
        }
        let ptr_ty = self.module.types.pointer(fn_ty, 0);
        let fid = FuncId::new(self.module.functions.len());
        self.module.functions.push(Function {
            name: name.to_owned(),
            ty: fn_ty,
            ptr_ty,
            linkage: Linkage::External,
            visibility: Visibility::Default,
            calling_conv: 0,
            attrs: 0,
            alignment: 0,
            section: None,
            gc: None,
            unnamed_addr: false,
            is_proto: true,
            blocks: Vec::new(),
            insts: Vec::new(),
            args: Vec::new(),
        });
        fid
    }

    /// The value id of a function, minting one if the function was created
    /// outside the module records.
    pub(super) fn function_value(&mut self, fid: FuncId) -> ValueId {
        self.module.push_value(Value::Function(fid))
    }

    // ------------------------------------------------------------------
    // Materializer facade
    // ------------------------------------------------------------------

    /// Whether `fid` is a declaration whose body waits in the stream.
    pub fn is_materializable(&self, fid: FuncId) -> bool {
        self.module.function(fid).is_declaration() && self.deferred_function_info.contains_key(&fid)
    }

    /// Whether `fid` has a body that could be dropped and re-read.
    pub fn is_dematerializable(&self, fid: FuncId) -> bool {
        !self.module.function(fid).is_declaration()
            && self.deferred_function_info.contains_key(&fid)
    }

    /// Read one deferred function body. A request for a function that is
    /// not materializable is a no-op.
    pub fn materialize(&mut self, fid: FuncId) -> Result<()> {
        if !self.is_materializable(fid) {
            return Ok(());
        }
        let position = *self
            .deferred_function_info
            .get(&fid)
            .ok_or(Error::CouldNotFindFunctionInStream)?;
        debug!(function = fid.index(), position, "materializing function body");
        self.stream.jump_to(position)?;
        self.parse_function_body(fid)?;
        self.upgrade_intrinsic_calls_in(fid);
        Ok(())
    }

    /// Materialize every deferred body, then finish the legacy upgrades
    /// that need the whole module: erase upgraded intrinsics, rewrite the
    /// old exception-handling constructs, strip stale debug intrinsics.
    pub fn materialize_all(&mut self) -> Result<()> {
        for index in 0..self.module.functions.len() {
            let fid = FuncId::new(index);
            if self.is_materializable(fid) {
                self.materialize(fid)?;
            }
        }
        self.finish_intrinsic_upgrades();
        self.upgrade_exception_handling()?;
        self.check_debug_info_intrinsics();
        Ok(())
    }

    /// Drop a materialized body; the recorded stream position still allows
    /// reading it again.
    pub fn dematerialize(&mut self, fid: FuncId) {
        if !self.is_dematerializable(fid) {
            return;
        }
        self.module.function_mut(fid).discard_body();
    }
}

/// Read a whole module eagerly: parse, materialize every function body and
/// run the legacy upgrades.
pub fn parse_bitcode(data: &[u8]) -> Result<Module> {
    let mut reader = BitcodeReader::new(data)?;
    reader.parse()?;
    reader.materialize_all()?;
    Ok(reader.into_module())
}

/// Probe a buffer for its target triple without building a module.
pub fn read_bitcode_triple(data: &[u8]) -> Result<String> {
    let inner = strip_wrapper(data)?;
    let mut stream = BitstreamCursor::new(inner);
    if stream.read(8)? != u64::from(b'B')
        || stream.read(8)? != u64::from(b'C')
        || stream.read(4)? != 0x0
        || stream.read(4)? != 0xC
        || stream.read(4)? != 0xE
        || stream.read(4)? != 0xD
    {
        return Err(Error::InvalidBitcodeSignature);
    }

    loop {
        if stream.at_end() {
            return Ok(String::new());
        }
        match stream.advance()? {
            Entry::SubBlock(id) if id == BlockId::Module as u64 => {
                stream.enter_block(id)?;
                loop {
                    match stream.advance_skipping_subblocks()? {
                        Entry::EndBlock => return Ok(String::new()),
                        Entry::Record(abbrev_id) => {
                            let record = stream.read_record(abbrev_id)?;
                            if record.code == ModuleCode::Triple as u64 {
                                return record_string(&record.fields, 0);
                            }
                        }
                        Entry::SubBlock(_) => unreachable!("subblocks are skipped"),
                    }
                }
            }
            Entry::SubBlock(_) => stream.skip_block()?,
            Entry::EndBlock => return Err(Error::MalformedBlock),
            Entry::Record(abbrev_id) => {
                let _ = stream.read_record(abbrev_id)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linkage_remap_table() {
        assert_eq!(decode_linkage(0), Linkage::External);
        assert_eq!(decode_linkage(1), Linkage::WeakAny);
        assert_eq!(decode_linkage(2), Linkage::Appending);
        assert_eq!(decode_linkage(3), Linkage::Internal);
        assert_eq!(decode_linkage(4), Linkage::LinkOnceAny);
        assert_eq!(decode_linkage(5), Linkage::External);
        assert_eq!(decode_linkage(6), Linkage::External);
        assert_eq!(decode_linkage(7), Linkage::ExternalWeak);
        assert_eq!(decode_linkage(8), Linkage::Common);
        assert_eq!(decode_linkage(9), Linkage::Private);
        assert_eq!(decode_linkage(10), Linkage::WeakOdr);
        assert_eq!(decode_linkage(11), Linkage::LinkOnceOdr);
        assert_eq!(decode_linkage(12), Linkage::AvailableExternally);
        assert_eq!(decode_linkage(13), Linkage::Private);
        assert_eq!(decode_linkage(14), Linkage::ExternalWeak);
        assert_eq!(decode_linkage(15), Linkage::LinkOnceOdr);
        assert_eq!(decode_linkage(99), Linkage::External);
    }

    #[test]
    fn alignment_round_trip() {
        for align in [0u32, 1, 2, 4, 8, 16, 1 << 20] {
            let encoded = if align == 0 {
                0
            } else {
                u64::from(align.trailing_zeros()) + 1
            };
            assert_eq!(decode_alignment(encoded), align);
        }
    }

    #[test]
    fn wrapper_header_is_stripped() {
        // 20-byte wrapper in front of 4 signature bytes.
        let mut data = Vec::new();
        data.extend_from_slice(&WRAPPER_MAGIC.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes()); // version
        data.extend_from_slice(&20u32.to_le_bytes()); // offset
        data.extend_from_slice(&4u32.to_le_bytes()); // size
        data.extend_from_slice(&0u32.to_le_bytes()); // cputype
        data.extend_from_slice(b"BC\xC0\xDE");
        let inner = strip_wrapper(&data).unwrap();
        assert_eq!(inner, b"BC\xC0\xDE");

        let truncated = &data[..8];
        assert!(strip_wrapper(truncated).is_err());
    }
}
