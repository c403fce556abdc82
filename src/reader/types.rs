use tracing::trace;

use crate::codes::{TypeCode, TypeSymtabCode};
use crate::ir::{Type, TypeId};
use crate::stream::{Entry, Record};
use crate::{Error, Result};

use super::BitcodeReader;

impl<'a> BitcodeReader<'a> {
    /// Parse the modern type table: one forward pass, named-struct forward
    /// references filled through placeholder structs.
    pub(super) fn parse_type_table(&mut self) -> Result<()> {
        self.stream.enter_block(crate::codes::BlockId::Type as u64)?;
        if !self.type_list.is_empty() {
            return Err(Error::InvalidMultipleBlocks);
        }

        let mut num_records = 0usize;
        let mut pending_name = String::new();

        loop {
            match self.stream.advance_skipping_subblocks()? {
                Entry::EndBlock => {
                    if num_records != self.type_list.len() {
                        return Err(Error::MalformedBlock);
                    }
                    return Ok(());
                }
                Entry::SubBlock(_) => unreachable!("subblocks are skipped"),
                Entry::Record(abbrev_id) => {
                    let record = self.stream.read_record(abbrev_id)?;
                    let fields = &record.fields;

                    let code = super::record_code::<TypeCode>(record.code)
                        .ok_or(Error::InvalidValue)?;
                    let result = match code {
                        TypeCode::NumEntry => {
                            let &[count, ..] = &fields[..] else {
                                return Err(Error::InvalidRecord);
                            };
                            self.type_list.resize(count as usize, None);
                            continue;
                        }
                        TypeCode::Void => self.module.types.intern(Type::Void),
                        // Code 10 is the legacy struct code in the old
                        // table and HALF here.
                        TypeCode::StructOld => self.module.types.intern(Type::Half),
                        TypeCode::Float => self.module.types.intern(Type::Float),
                        TypeCode::Double => self.module.types.intern(Type::Double),
                        TypeCode::X86Fp80 => self.module.types.intern(Type::X86Fp80),
                        TypeCode::Fp128 => self.module.types.intern(Type::Fp128),
                        TypeCode::PpcFp128 => self.module.types.intern(Type::PpcFp128),
                        TypeCode::Label => self.module.types.intern(Type::Label),
                        TypeCode::Metadata => self.module.types.intern(Type::Metadata),
                        TypeCode::X86Mmx => self.module.types.intern(Type::X86Mmx),
                        TypeCode::Integer => {
                            let &[width, ..] = &fields[..] else {
                                return Err(Error::InvalidRecord);
                            };
                            self.module.types.int(width as u32)
                        }
                        TypeCode::Pointer => {
                            if fields.is_empty() {
                                return Err(Error::InvalidRecord);
                            }
                            let address_space =
                                if fields.len() == 2 { fields[1] as u32 } else { 0 };
                            let pointee =
                                self.get_type_by_id(fields[0]).ok_or(Error::InvalidType)?;
                            self.module.types.pointer(pointee, address_space)
                        }
                        TypeCode::FunctionOld => {
                            // The attribute id in slot 1 is dead weight.
                            if fields.len() < 3 {
                                return Err(Error::InvalidRecord);
                            }
                            let params = self.collect_types(&fields[3..])?;
                            let ret = self.get_type_by_id(fields[2]).ok_or(Error::InvalidType)?;
                            self.module.types.function(fields[0] != 0, ret, params)
                        }
                        TypeCode::Function => {
                            if fields.len() < 2 {
                                return Err(Error::InvalidRecord);
                            }
                            let params = self.collect_types(&fields[2..])?;
                            let ret = self.get_type_by_id(fields[1]).ok_or(Error::InvalidType)?;
                            self.module.types.function(fields[0] != 0, ret, params)
                        }
                        TypeCode::StructAnon => {
                            if fields.is_empty() {
                                return Err(Error::InvalidRecord);
                            }
                            let elts = self.collect_types(&fields[1..])?;
                            self.module.types.anon_struct(elts, fields[0] != 0)
                        }
                        TypeCode::StructName => {
                            pending_name = record.string(0);
                            continue;
                        }
                        TypeCode::StructNamed => {
                            if fields.is_empty() {
                                return Err(Error::InvalidRecord);
                            }
                            let st = self.claim_named_struct(num_records, &mut pending_name)?;
                            let elts = self.collect_types(&fields[1..])?;
                            self.module.types.set_struct_body(st, elts, fields[0] != 0);
                            st
                        }
                        TypeCode::Opaque => {
                            if fields.len() != 1 {
                                return Err(Error::InvalidRecord);
                            }
                            self.claim_named_struct(num_records, &mut pending_name)?
                        }
                        TypeCode::Array => {
                            if fields.len() < 2 {
                                return Err(Error::InvalidRecord);
                            }
                            let elem = self.get_type_by_id(fields[1]).ok_or(Error::InvalidType)?;
                            self.module.types.array(fields[0], elem)
                        }
                        TypeCode::Vector => {
                            if fields.len() < 2 {
                                return Err(Error::InvalidRecord);
                            }
                            let elem = self.get_type_by_id(fields[1]).ok_or(Error::InvalidType)?;
                            self.module.types.vector(fields[0], elem)
                        }
                    };

                    if num_records >= self.type_list.len() {
                        return Err(Error::InvalidTypeTable);
                    }
                    if self.type_list[num_records].is_some_and(|t| t != result) {
                        return Err(Error::InvalidTypeTable);
                    }
                    self.type_list[num_records] = Some(result);
                    num_records += 1;
                }
            }
        }
    }

    /// Resolve the slot a named-struct record defines: either the
    /// placeholder installed by a forward reference, or a fresh struct.
    /// Takes the pending name either way.
    fn claim_named_struct(&mut self, slot: usize, pending_name: &mut String) -> Result<TypeId> {
        if slot >= self.type_list.len() {
            return Err(Error::InvalidTypeTable);
        }
        let name = std::mem::take(pending_name);
        match self.type_list[slot] {
            Some(ty) => {
                if !self.module.types.is_named_struct(ty) {
                    return Err(Error::InvalidTypeTable);
                }
                self.module.types.set_struct_name(ty, name);
                Ok(ty)
            }
            None => Ok(self.module.types.named_struct(name)),
        }
    }

    fn collect_types(&mut self, ids: &[u64]) -> Result<Vec<TypeId>> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            out.push(self.get_type_by_id(id).ok_or(Error::InvalidType)?);
        }
        Ok(out)
    }

    /// Parse the legacy type table. The on-disk order is unsound, so scan
    /// the block repeatedly from a snapshot, filling whichever slots have
    /// all dependencies resolved, until a pass makes no progress or
    /// everything is filled.
    pub(super) fn parse_old_type_table(&mut self) -> Result<()> {
        self.stream
            .enter_block(crate::codes::BlockId::TypeOld as u64)?;
        if !self.type_list.is_empty() {
            return Err(Error::InvalidTypeTable);
        }

        let block_start = self.stream.clone();
        let mut num_types_read = 0usize;

        'scan: loop {
            let mut next_type_id = 0usize;
            let mut read_any_types = false;

            loop {
                let entry = self.stream.advance()?;
                match entry {
                    Entry::EndBlock => {
                        if next_type_id != self.type_list.len() {
                            return Err(Error::InvalidTypeTable);
                        }
                        if num_types_read != self.type_list.len() {
                            if !read_any_types {
                                return Err(Error::InvalidTypeTable);
                            }
                            self.stream = block_start.clone();
                            continue 'scan;
                        }
                        return Ok(());
                    }
                    Entry::SubBlock(_) => {
                        self.stream.skip_block()?;
                        continue;
                    }
                    Entry::Record(abbrev_id) => {
                        let record = self.stream.read_record(abbrev_id)?;
                        let result = self.parse_old_type_record(&record, next_type_id)?;

                        if let OldTypeRecord::NumEntry(count) = result {
                            self.type_list.resize(count, None);
                            continue;
                        }

                        if next_type_id >= self.type_list.len() {
                            return Err(Error::InvalidTypeTable);
                        }
                        if let OldTypeRecord::Resolved(ty) = result {
                            if self.type_list[next_type_id].is_none() {
                                num_types_read += 1;
                                read_any_types = true;
                                self.type_list[next_type_id] = Some(ty);
                            }
                        }
                        next_type_id += 1;
                    }
                }
            }
        }
    }

    fn parse_old_type_record(
        &mut self,
        record: &Record,
        next_type_id: usize,
    ) -> Result<OldTypeRecord> {
        let fields = &record.fields;
        let code =
            super::record_code::<TypeCode>(record.code).ok_or(Error::InvalidTypeTable)?;

        let resolved = match code {
            TypeCode::NumEntry => {
                let &[count, ..] = &fields[..] else {
                    return Err(Error::InvalidTypeTable);
                };
                return Ok(OldTypeRecord::NumEntry(count as usize));
            }
            TypeCode::Void => Some(self.module.types.intern(Type::Void)),
            TypeCode::Float => Some(self.module.types.intern(Type::Float)),
            TypeCode::Double => Some(self.module.types.intern(Type::Double)),
            TypeCode::X86Fp80 => Some(self.module.types.intern(Type::X86Fp80)),
            TypeCode::Fp128 => Some(self.module.types.intern(Type::Fp128)),
            TypeCode::PpcFp128 => Some(self.module.types.intern(Type::PpcFp128)),
            TypeCode::Label => Some(self.module.types.intern(Type::Label)),
            TypeCode::Metadata => Some(self.module.types.intern(Type::Metadata)),
            TypeCode::X86Mmx => Some(self.module.types.intern(Type::X86Mmx)),
            TypeCode::Integer => {
                let &[width, ..] = &fields[..] else {
                    return Err(Error::InvalidTypeTable);
                };
                Some(self.module.types.int(width as u32))
            }
            TypeCode::Opaque => {
                if next_type_id < self.type_list.len() && self.type_list[next_type_id].is_none() {
                    Some(self.module.types.named_struct(""))
                } else {
                    None
                }
            }
            // The old table's struct code; resolves in place so pointers
            // created in earlier passes keep their identity.
            TypeCode::StructOld => {
                if next_type_id >= self.type_list.len() {
                    return Ok(OldTypeRecord::Unresolved);
                }
                if let Some(existing) = self.type_list[next_type_id] {
                    if !self.module.types.is_named_struct(existing) {
                        return Err(Error::InvalidTypeTable);
                    }
                    if !self.module.types.is_opaque_struct(existing) {
                        return Ok(OldTypeRecord::Unresolved);
                    }
                }
                if fields.is_empty() {
                    return Err(Error::InvalidTypeTable);
                }
                let st = match self.type_list[next_type_id] {
                    Some(t) => t,
                    None => {
                        let t = self.module.types.named_struct("");
                        self.type_list[next_type_id] = Some(t);
                        t
                    }
                };
                match self.collect_types_or_none(&fields[1..]) {
                    Some(elts) => {
                        self.module.types.set_struct_body(st, elts, fields[0] != 0);
                        // Clear the slot so the common path re-stores it
                        // and counts the progress.
                        self.type_list[next_type_id] = None;
                        Some(st)
                    }
                    None => None,
                }
            }
            TypeCode::Pointer => {
                if fields.is_empty() {
                    return Err(Error::InvalidTypeTable);
                }
                let address_space = if fields.len() == 2 { fields[1] as u32 } else { 0 };
                self.get_type_by_id_or_none(fields[0])
                    .map(|pointee| self.module.types.pointer(pointee, address_space))
            }
            TypeCode::FunctionOld => {
                if fields.len() < 3 {
                    return Err(Error::InvalidTypeTable);
                }
                match (
                    self.collect_types_or_none(&fields[3..]),
                    self.get_type_by_id_or_none(fields[2]),
                ) {
                    (Some(params), Some(ret)) => {
                        Some(self.module.types.function(fields[0] != 0, ret, params))
                    }
                    _ => None,
                }
            }
            TypeCode::Function => {
                if fields.len() < 2 {
                    return Err(Error::InvalidTypeTable);
                }
                match (
                    self.collect_types_or_none(&fields[2..]),
                    self.get_type_by_id_or_none(fields[1]),
                ) {
                    (Some(params), Some(ret)) => {
                        Some(self.module.types.function(fields[0] != 0, ret, params))
                    }
                    _ => None,
                }
            }
            TypeCode::Array => {
                if fields.len() < 2 {
                    return Err(Error::InvalidTypeTable);
                }
                self.get_type_by_id_or_none(fields[1])
                    .map(|elem| self.module.types.array(fields[0], elem))
            }
            TypeCode::Vector => {
                if fields.len() < 2 {
                    return Err(Error::InvalidTypeTable);
                }
                self.get_type_by_id_or_none(fields[1])
                    .map(|elem| self.module.types.vector(fields[0], elem))
            }
            TypeCode::StructAnon | TypeCode::StructName | TypeCode::StructNamed => {
                return Err(Error::InvalidTypeTable)
            }
        };

        Ok(match resolved {
            Some(ty) => OldTypeRecord::Resolved(ty),
            None => OldTypeRecord::Unresolved,
        })
    }

    fn collect_types_or_none(&mut self, ids: &[u64]) -> Option<Vec<TypeId>> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            out.push(self.get_type_by_id_or_none(id)?);
        }
        Some(out)
    }

    /// Parse the legacy type symbol table, naming struct slots by id.
    pub(super) fn parse_old_type_symbol_table(&mut self) -> Result<()> {
        self.stream
            .enter_block(crate::codes::BlockId::TypeSymtabOld as u64)?;

        loop {
            match self.stream.advance()? {
                Entry::EndBlock => return Ok(()),
                Entry::SubBlock(_) => self.stream.skip_block()?,
                Entry::Record(abbrev_id) => {
                    let record = self.stream.read_record(abbrev_id)?;
                    match super::record_code::<TypeSymtabCode>(record.code) {
                        Some(TypeSymtabCode::Entry) => {
                            if record.fields.is_empty() {
                                return Err(Error::InvalidRecord);
                            }
                            let type_id = record.fields[0] as usize;
                            let name = record.string(1);
                            let Some(Some(ty)) = self.type_list.get(type_id).copied() else {
                                return Err(Error::InvalidRecord);
                            };
                            // Only an unnamed struct takes the name.
                            if self.module.types.struct_name(ty) == Some("") {
                                self.module.types.set_struct_name(ty, name);
                            }
                        }
                        None => {
                            trace!(code = record.code, "ignoring unknown type-symtab record");
                        }
                    }
                }
            }
        }
    }
}

enum OldTypeRecord {
    NumEntry(usize),
    Resolved(TypeId),
    Unresolved,
}
