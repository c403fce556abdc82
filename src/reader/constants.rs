use crate::codes::{
    BinopCode, CastCode, ConstantsCode, OBO_NO_SIGNED_WRAP, OBO_NO_UNSIGNED_WRAP, PEO_EXACT,
};
use crate::ir::{
    BinOp, CastOp, ConstExpr, Constant, OpFlags, Type, TypeId, Value, ValueId,
};
use crate::stream::Entry;
use crate::{Error, Result};

use super::BitcodeReader;

/// Decode a sign-rotated value: the low bit carries the sign. An encoded
/// 1 is "negative zero", which stands for the minimum value.
pub fn decode_sign_rotated_value(v: u64) -> i64 {
    if v & 1 == 0 {
        (v >> 1) as i64
    } else if v != 1 {
        (v >> 1).wrapping_neg() as i64
    } else {
        i64::MIN
    }
}

/// Map a binop code onto the opcode set, picking the floating-point form
/// for FP operand types.
pub(super) fn decode_binop(code: u64, is_fp: bool) -> Option<BinOp> {
    let code = BinopCode::try_from(u8::try_from(code).ok()?).ok()?;
    Some(match code {
        BinopCode::Add => {
            if is_fp {
                BinOp::FAdd
            } else {
                BinOp::Add
            }
        }
        BinopCode::Sub => {
            if is_fp {
                BinOp::FSub
            } else {
                BinOp::Sub
            }
        }
        BinopCode::Mul => {
            if is_fp {
                BinOp::FMul
            } else {
                BinOp::Mul
            }
        }
        BinopCode::UDiv => BinOp::UDiv,
        BinopCode::SDiv => {
            if is_fp {
                BinOp::FDiv
            } else {
                BinOp::SDiv
            }
        }
        BinopCode::URem => BinOp::URem,
        BinopCode::SRem => {
            if is_fp {
                BinOp::FRem
            } else {
                BinOp::SRem
            }
        }
        BinopCode::Shl => BinOp::Shl,
        BinopCode::LShr => BinOp::LShr,
        BinopCode::AShr => BinOp::AShr,
        BinopCode::And => BinOp::And,
        BinopCode::Or => BinOp::Or,
        BinopCode::Xor => BinOp::Xor,
    })
}

pub(super) fn decode_cast(code: u64) -> Option<CastOp> {
    let code = CastCode::try_from(u8::try_from(code).ok()?).ok()?;
    Some(match code {
        CastCode::Trunc => CastOp::Trunc,
        CastCode::ZExt => CastOp::ZExt,
        CastCode::SExt => CastOp::SExt,
        CastCode::FpToUi => CastOp::FpToUi,
        CastCode::FpToSi => CastOp::FpToSi,
        CastCode::UiToFp => CastOp::UiToFp,
        CastCode::SiToFp => CastOp::SiToFp,
        CastCode::FpTrunc => CastOp::FpTrunc,
        CastCode::FpExt => CastOp::FpExt,
        CastCode::PtrToInt => CastOp::PtrToInt,
        CastCode::IntToPtr => CastOp::IntToPtr,
        CastCode::BitCast => CastOp::BitCast,
    })
}

/// Read the wrap/exactness flag word trailing some operator records.
pub(super) fn decode_operator_flags(op: BinOp, word: u64) -> OpFlags {
    let mut flags = OpFlags::default();
    if op.may_overflow() {
        flags.no_signed_wrap = word & (1 << OBO_NO_SIGNED_WRAP) != 0;
        flags.no_unsigned_wrap = word & (1 << OBO_NO_UNSIGNED_WRAP) != 0;
    } else if op.may_be_exact() {
        flags.exact = word & (1 << PEO_EXACT) != 0;
    }
    flags
}

impl<'a> BitcodeReader<'a> {
    /// Result type of a GEP: the first index steps the pointer, the rest
    /// walk the pointee; re-wrap in the base pointer's address space.
    pub(super) fn gep_result_type(&mut self, base: ValueId, indices: &[ValueId]) -> Result<TypeId> {
        let base_ty = self.module.value_type(base);
        let address_space = self
            .module
            .types
            .address_space(base_ty)
            .ok_or(Error::InvalidTypeForValue)?;
        let mut current = self
            .module
            .types
            .pointee(base_ty)
            .ok_or(Error::InvalidTypeForValue)?;

        for &index in indices.iter().skip(1) {
            current = if self.module.types.struct_fields(current).is_some() {
                let field = self
                    .module
                    .const_u64(index)
                    .ok_or(Error::InvalidConstantReference)?;
                *self
                    .module
                    .types
                    .struct_fields(current)
                    .and_then(|fields| fields.get(field as usize))
                    .ok_or(Error::InvalidRecord)?
            } else {
                self.module
                    .types
                    .element_type(current)
                    .ok_or(Error::InvalidRecord)?
            };
        }
        Ok(self.module.types.pointer(current, address_space))
    }

    /// Parse one CONSTANTS block against the "current type" register.
    pub(super) fn parse_constants_block(&mut self) -> Result<()> {
        self.stream
            .enter_block(crate::codes::BlockId::Constants as u64)?;

        let mut cur_ty = self.module.types.int32();
        let mut next_cst_no = self.values.size();

        loop {
            match self.stream.advance_skipping_subblocks()? {
                Entry::EndBlock => {
                    if next_cst_no != self.values.size() {
                        return Err(Error::InvalidConstantReference);
                    }
                    self.values.resolve_constant_forward_refs(&mut self.module)?;
                    return Ok(());
                }
                Entry::SubBlock(_) => unreachable!("subblocks are skipped"),
                Entry::Record(abbrev_id) => {
                    let record = self.stream.read_record(abbrev_id)?;
                    let fields = &record.fields;

                    let value = match super::record_code::<ConstantsCode>(record.code) {
                        Some(ConstantsCode::SetType) => {
                            let &[ty_id, ..] = &fields[..] else {
                                return Err(Error::InvalidRecord);
                            };
                            if ty_id as usize >= self.type_list.len() {
                                return Err(Error::InvalidRecord);
                            }
                            cur_ty = self.get_type_by_id(ty_id).ok_or(Error::InvalidRecord)?;
                            continue;
                        }
                        Some(ConstantsCode::Null) => Value::Constant(Constant::Null { ty: cur_ty }),
                        Some(ConstantsCode::Integer) => {
                            if !self.module.types.is_integer(cur_ty) || fields.is_empty() {
                                return Err(Error::InvalidRecord);
                            }
                            Value::Constant(Constant::Int {
                                ty: cur_ty,
                                value: decode_sign_rotated_value(fields[0]),
                            })
                        }
                        Some(ConstantsCode::WideInteger) => {
                            if !self.module.types.is_integer(cur_ty) || fields.is_empty() {
                                return Err(Error::InvalidRecord);
                            }
                            let words = fields
                                .iter()
                                .map(|&w| decode_sign_rotated_value(w) as u64)
                                .collect();
                            Value::Constant(Constant::WideInt { ty: cur_ty, words })
                        }
                        Some(ConstantsCode::Float) => {
                            if fields.is_empty() {
                                return Err(Error::InvalidRecord);
                            }
                            self.parse_float_record(cur_ty, fields)?
                        }
                        Some(ConstantsCode::Aggregate) => {
                            if fields.is_empty() {
                                return Err(Error::InvalidRecord);
                            }
                            self.parse_aggregate_record(cur_ty, fields)?
                        }
                        Some(ConstantsCode::String) => {
                            self.parse_string_record(cur_ty, fields, false)?
                        }
                        Some(ConstantsCode::CString) => {
                            self.parse_string_record(cur_ty, fields, true)?
                        }
                        Some(ConstantsCode::CeBinOp) => {
                            if fields.len() < 3 {
                                return Err(Error::InvalidRecord);
                            }
                            let is_fp = self.module.types.is_fp_or_fp_vector(cur_ty);
                            match decode_binop(fields[0], is_fp) {
                                None => Value::Constant(Constant::Undef { ty: cur_ty }),
                                Some(op) => {
                                    let lhs = self.values.get_constant_fwdref(
                                        &mut self.module,
                                        fields[1] as usize,
                                        cur_ty,
                                    );
                                    let rhs = self.values.get_constant_fwdref(
                                        &mut self.module,
                                        fields[2] as usize,
                                        cur_ty,
                                    );
                                    let flags = fields
                                        .get(3)
                                        .map(|&w| decode_operator_flags(op, w))
                                        .unwrap_or_default();
                                    Value::Constant(Constant::Expr(ConstExpr::Binop {
                                        ty: cur_ty,
                                        op,
                                        lhs,
                                        rhs,
                                        flags,
                                    }))
                                }
                            }
                        }
                        Some(ConstantsCode::CeCast) => {
                            if fields.len() < 3 {
                                return Err(Error::InvalidRecord);
                            }
                            match decode_cast(fields[0]) {
                                None => Value::Constant(Constant::Undef { ty: cur_ty }),
                                Some(op) => {
                                    let op_ty = self
                                        .get_type_by_id(fields[1])
                                        .ok_or(Error::InvalidRecord)?;
                                    let value = self.values.get_constant_fwdref(
                                        &mut self.module,
                                        fields[2] as usize,
                                        op_ty,
                                    );
                                    Value::Constant(Constant::Expr(ConstExpr::Cast {
                                        ty: cur_ty,
                                        op,
                                        value,
                                    }))
                                }
                            }
                        }
                        Some(code @ (ConstantsCode::CeGep | ConstantsCode::CeInboundsGep)) => {
                            if fields.len() % 2 != 0 {
                                return Err(Error::InvalidRecord);
                            }
                            let mut elts = Vec::with_capacity(fields.len() / 2);
                            for pair in fields.chunks_exact(2) {
                                let ty =
                                    self.get_type_by_id(pair[0]).ok_or(Error::InvalidRecord)?;
                                elts.push(self.values.get_constant_fwdref(
                                    &mut self.module,
                                    pair[1] as usize,
                                    ty,
                                ));
                            }
                            if elts.is_empty() {
                                return Err(Error::InvalidRecord);
                            }
                            let base = elts[0];
                            let ty = self.gep_result_type(base, &elts[1..])?;
                            Value::Constant(Constant::Expr(ConstExpr::Gep {
                                ty,
                                inbounds: code == ConstantsCode::CeInboundsGep,
                                base,
                                indices: elts[1..].to_vec(),
                            }))
                        }
                        Some(ConstantsCode::CeSelect) => {
                            if fields.len() < 3 {
                                return Err(Error::InvalidRecord);
                            }
                            let i1 = self.module.types.int1();
                            let cond = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[0] as usize,
                                i1,
                            );
                            let on_true = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[1] as usize,
                                cur_ty,
                            );
                            let on_false = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[2] as usize,
                                cur_ty,
                            );
                            Value::Constant(Constant::Expr(ConstExpr::Select {
                                ty: cur_ty,
                                cond,
                                on_true,
                                on_false,
                            }))
                        }
                        Some(ConstantsCode::CeExtractElt) => {
                            if fields.len() < 3 {
                                return Err(Error::InvalidRecord);
                            }
                            let op_ty =
                                self.get_type_by_id(fields[0]).ok_or(Error::InvalidRecord)?;
                            let elem_ty = self
                                .module
                                .types
                                .vector_len(op_ty)
                                .and_then(|_| self.module.types.element_type(op_ty))
                                .ok_or(Error::InvalidRecord)?;
                            let int32 = self.module.types.int32();
                            let vec = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[1] as usize,
                                op_ty,
                            );
                            let index = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[2] as usize,
                                int32,
                            );
                            Value::Constant(Constant::Expr(ConstExpr::ExtractElement {
                                ty: elem_ty,
                                vec,
                                index,
                            }))
                        }
                        Some(ConstantsCode::CeInsertElt) => {
                            let elem_ty = self
                                .module
                                .types
                                .vector_len(cur_ty)
                                .and_then(|_| self.module.types.element_type(cur_ty));
                            let Some(elem_ty) = elem_ty else {
                                return Err(Error::InvalidRecord);
                            };
                            if fields.len() < 3 {
                                return Err(Error::InvalidRecord);
                            }
                            let int32 = self.module.types.int32();
                            let vec = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[0] as usize,
                                cur_ty,
                            );
                            let elem = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[1] as usize,
                                elem_ty,
                            );
                            let index = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[2] as usize,
                                int32,
                            );
                            Value::Constant(Constant::Expr(ConstExpr::InsertElement {
                                ty: cur_ty,
                                vec,
                                elem,
                                index,
                            }))
                        }
                        Some(ConstantsCode::CeShuffleVec) => {
                            let Some(len) = self.module.types.vector_len(cur_ty) else {
                                return Err(Error::InvalidRecord);
                            };
                            if fields.len() < 3 {
                                return Err(Error::InvalidRecord);
                            }
                            let int32 = self.module.types.int32();
                            let mask_ty = self.module.types.vector(len, int32);
                            let v1 = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[0] as usize,
                                cur_ty,
                            );
                            let v2 = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[1] as usize,
                                cur_ty,
                            );
                            let mask = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[2] as usize,
                                mask_ty,
                            );
                            Value::Constant(Constant::Expr(ConstExpr::ShuffleVector {
                                ty: cur_ty,
                                v1,
                                v2,
                                mask,
                            }))
                        }
                        Some(ConstantsCode::CeShufVecEx) => {
                            let Some(len) = self.module.types.vector_len(cur_ty) else {
                                return Err(Error::InvalidRecord);
                            };
                            if fields.len() < 4 {
                                return Err(Error::InvalidRecord);
                            }
                            let op_ty =
                                self.get_type_by_id(fields[0]).ok_or(Error::InvalidRecord)?;
                            if !self.module.types.is_vector(op_ty) {
                                return Err(Error::InvalidRecord);
                            }
                            let int32 = self.module.types.int32();
                            let mask_ty = self.module.types.vector(len, int32);
                            let v1 = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[1] as usize,
                                op_ty,
                            );
                            let v2 = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[2] as usize,
                                op_ty,
                            );
                            let mask = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[3] as usize,
                                mask_ty,
                            );
                            Value::Constant(Constant::Expr(ConstExpr::ShuffleVector {
                                ty: cur_ty,
                                v1,
                                v2,
                                mask,
                            }))
                        }
                        Some(ConstantsCode::CeCmp) => {
                            if fields.len() < 4 {
                                return Err(Error::InvalidRecord);
                            }
                            let op_ty =
                                self.get_type_by_id(fields[0]).ok_or(Error::InvalidRecord)?;
                            let lhs = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[1] as usize,
                                op_ty,
                            );
                            let rhs = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[2] as usize,
                                op_ty,
                            );
                            let fp = self.module.types.is_fp_or_fp_vector(op_ty);
                            let i1 = self.module.types.int1();
                            let ty = match self.module.types.vector_len(op_ty) {
                                Some(len) => self.module.types.vector(len, i1),
                                None => i1,
                            };
                            Value::Constant(Constant::Expr(ConstExpr::Cmp {
                                ty,
                                fp,
                                pred: fields[3] as u32,
                                lhs,
                                rhs,
                            }))
                        }
                        Some(ConstantsCode::InlineAsm) => self.parse_inline_asm(cur_ty, fields)?,
                        Some(ConstantsCode::BlockAddress) => {
                            if fields.len() < 3 {
                                return Err(Error::InvalidRecord);
                            }
                            let fn_ty =
                                self.get_type_by_id(fields[0]).ok_or(Error::InvalidRecord)?;
                            let fn_val = self.values.get_constant_fwdref(
                                &mut self.module,
                                fields[1] as usize,
                                fn_ty,
                            );
                            let fid = match self.module.value(fn_val) {
                                Value::Function(fid) => *fid,
                                _ => return Err(Error::InvalidRecord),
                            };
                            // A stand-in that the end of the function body
                            // rewrites to the real block address.
                            let i8_ptr = self.module.types.int8_ptr();
                            let placeholder = self
                                .module
                                .push_value(Value::ConstantPlaceholder { ty: i8_ptr });
                            self.block_addr_fwd_refs
                                .entry(fid)
                                .or_default()
                                .push((fields[2], placeholder));
                            self.values
                                .assign(&mut self.module, placeholder, next_cst_no);
                            next_cst_no += 1;
                            continue;
                        }
                        // Unknown constant records read as undef of the
                        // current type.
                        Some(ConstantsCode::Undef) | None => {
                            Value::Constant(Constant::Undef { ty: cur_ty })
                        }
                    };

                    let vid = self.module.push_value(value);
                    self.values.assign(&mut self.module, vid, next_cst_no);
                    next_cst_no += 1;
                }
            }
        }
    }

    fn parse_float_record(&mut self, cur_ty: TypeId, fields: &[u64]) -> Result<Value> {
        let words = match self.module.types.get(cur_ty) {
            Type::Half => [fields[0] & 0xffff, 0],
            Type::Float => [fields[0] & 0xffff_ffff, 0],
            Type::Double => [fields[0], 0],
            Type::X86Fp80 => {
                // The on-disk layout differs from the 80-bit payload;
                // recompose the two words.
                if fields.len() < 2 {
                    return Err(Error::InvalidRecord);
                }
                [(fields[1] & 0xffff) | (fields[0] << 16), fields[0] >> 48]
            }
            Type::Fp128 | Type::PpcFp128 => {
                if fields.len() < 2 {
                    return Err(Error::InvalidRecord);
                }
                [fields[0], fields[1]]
            }
            _ => return Ok(Value::Constant(Constant::Undef { ty: cur_ty })),
        };
        Ok(Value::Constant(Constant::Float { ty: cur_ty, words }))
    }

    fn parse_aggregate_record(&mut self, cur_ty: TypeId, fields: &[u64]) -> Result<Value> {
        if let Some(field_tys) = self.module.types.struct_fields(cur_ty).map(<[_]>::to_vec) {
            if fields.len() != field_tys.len() {
                return Err(Error::InvalidRecord);
            }
            let mut elems = Vec::with_capacity(fields.len());
            for (&id, ty) in fields.iter().zip(field_tys) {
                elems.push(
                    self.values
                        .get_constant_fwdref(&mut self.module, id as usize, ty),
                );
            }
            return Ok(Value::Constant(Constant::Aggregate {
                ty: cur_ty,
                elems,
            }));
        }
        if let Some(elem_ty) = self.module.types.element_type(cur_ty) {
            let mut elems = Vec::with_capacity(fields.len());
            for &id in fields {
                elems.push(
                    self.values
                        .get_constant_fwdref(&mut self.module, id as usize, elem_ty),
                );
            }
            return Ok(Value::Constant(Constant::Aggregate {
                ty: cur_ty,
                elems,
            }));
        }
        Ok(Value::Constant(Constant::Undef { ty: cur_ty }))
    }

    fn parse_string_record(
        &mut self,
        cur_ty: TypeId,
        fields: &[u64],
        null_terminate: bool,
    ) -> Result<Value> {
        if fields.is_empty() {
            return Err(Error::InvalidRecord);
        }
        let elem_ty = match self.module.types.get(cur_ty) {
            Type::Array { elem, .. } => *elem,
            _ => return Err(Error::InvalidRecord),
        };
        let mut elems: Vec<ValueId> = Vec::with_capacity(fields.len() + 1);
        for &ch in fields {
            elems.push(self.module.push_value(Value::Constant(Constant::Int {
                ty: elem_ty,
                value: ch as i64,
            })));
        }
        if null_terminate {
            elems.push(
                self.module
                    .push_value(Value::Constant(Constant::Null { ty: elem_ty })),
            );
        }
        Ok(Value::Constant(Constant::Aggregate {
            ty: cur_ty,
            elems,
        }))
    }

    fn parse_inline_asm(&mut self, cur_ty: TypeId, fields: &[u64]) -> Result<Value> {
        if fields.len() < 2 {
            return Err(Error::InvalidRecord);
        }
        let side_effects = fields[0] & 1 != 0;
        let align_stack = fields[0] >> 1 != 0;
        let asm_len = fields[1] as usize;
        if 2 + asm_len >= fields.len() {
            return Err(Error::InvalidRecord);
        }
        let constraints_len = fields[2 + asm_len] as usize;
        if 3 + asm_len + constraints_len > fields.len() {
            return Err(Error::InvalidRecord);
        }
        let asm: String = fields[2..2 + asm_len]
            .iter()
            .map(|&b| b as u8 as char)
            .collect();
        let constraints: String = fields[3 + asm_len..3 + asm_len + constraints_len]
            .iter()
            .map(|&b| b as u8 as char)
            .collect();

        let fn_ty = self
            .module
            .types
            .pointee(cur_ty)
            .ok_or(Error::InvalidRecord)?;
        if self.module.types.function_parts(fn_ty).is_none() {
            return Err(Error::InvalidRecord);
        }
        Ok(Value::InlineAsm {
            ty: cur_ty,
            asm,
            constraints,
            side_effects,
            align_stack,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::decode_sign_rotated_value;

    fn encode_sign_rotated(x: i64) -> u64 {
        if x >= 0 {
            (x as u64) << 1
        } else if x == i64::MIN {
            1
        } else {
            ((x.unsigned_abs()) << 1) | 1
        }
    }

    #[test]
    fn sign_rotation_round_trips() {
        for x in [0i64, 1, -1, 2, -2, 63, -64, i64::MAX, i64::MIN + 1] {
            assert_eq!(decode_sign_rotated_value(encode_sign_rotated(x)), x);
        }
    }

    #[test]
    fn negative_zero_is_minimum() {
        assert_eq!(decode_sign_rotated_value(1), i64::MIN);
    }
}
