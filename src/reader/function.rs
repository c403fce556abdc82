use tracing::trace;

use crate::codes::{
    BlockId, FunctionCode, MetadataAttachmentCode, MetadataCode, RmwCode, ValueSymtabCode,
};
use crate::ir::{
    AtomicOrdering, BasicBlock, ClauseKind, Constant, DebugLoc, FuncId, InstId, InstKind,
    Instruction, MdOperand, Metadata, OpFlags, RmwOp, SyncScope, Type, TypeId, Value, ValueId,
};
use crate::stream::Entry;
use crate::{Error, Result};

use super::constants::{decode_binop, decode_cast, decode_operator_flags};
use super::BitcodeReader;

/// Decode an atomic ordering; unknown codes read as sequentially
/// consistent.
pub(super) fn decode_ordering(v: u64) -> AtomicOrdering {
    use crate::codes::ordering::*;
    match v {
        NOTATOMIC => AtomicOrdering::NotAtomic,
        UNORDERED => AtomicOrdering::Unordered,
        MONOTONIC => AtomicOrdering::Monotonic,
        ACQUIRE => AtomicOrdering::Acquire,
        RELEASE => AtomicOrdering::Release,
        ACQREL => AtomicOrdering::AcquireRelease,
        _ => AtomicOrdering::SequentiallyConsistent,
    }
}

/// Decode a synchronization scope; unknown codes read as cross-thread.
pub(super) fn decode_sync_scope(v: u64) -> SyncScope {
    match v {
        crate::codes::sync_scope::SINGLE_THREAD => SyncScope::SingleThread,
        _ => SyncScope::CrossThread,
    }
}

pub(super) fn decode_rmw_operation(v: u64) -> Option<RmwOp> {
    let code = RmwCode::try_from(u8::try_from(v).ok()?).ok()?;
    Some(match code {
        RmwCode::Xchg => RmwOp::Xchg,
        RmwCode::Add => RmwOp::Add,
        RmwCode::Sub => RmwOp::Sub,
        RmwCode::And => RmwOp::And,
        RmwCode::Nand => RmwOp::Nand,
        RmwCode::Or => RmwOp::Or,
        RmwCode::Xor => RmwOp::Xor,
        RmwCode::Max => RmwOp::Max,
        RmwCode::Min => RmwOp::Min,
        RmwCode::UMax => RmwOp::UMax,
        RmwCode::UMin => RmwOp::UMin,
    })
}

impl<'a> BitcodeReader<'a> {
    /// Read a value-id operand; ids at or past `next_value_no` are
    /// in-function forward references and carry their type in the next
    /// record slot.
    fn get_value_type_pair(
        &mut self,
        fields: &[u64],
        op_num: &mut usize,
        next_value_no: usize,
    ) -> Result<ValueId> {
        if *op_num >= fields.len() {
            return Err(Error::InvalidRecord);
        }
        let val_no = fields[*op_num] as usize;
        *op_num += 1;
        if val_no < next_value_no {
            return self.values.get_value_fwdref(&mut self.module, val_no, None);
        }
        if *op_num >= fields.len() {
            return Err(Error::InvalidRecord);
        }
        let ty = self
            .get_type_by_id(fields[*op_num])
            .ok_or(Error::InvalidRecord)?;
        *op_num += 1;
        self.values
            .get_value_fwdref(&mut self.module, val_no, Some(ty))
    }

    /// Read a value-id operand whose type is known from context.
    fn get_value(&mut self, fields: &[u64], op_num: &mut usize, ty: TypeId) -> Result<ValueId> {
        if *op_num >= fields.len() {
            return Err(Error::InvalidRecord);
        }
        let val_no = fields[*op_num] as usize;
        *op_num += 1;
        self.values
            .get_value_fwdref(&mut self.module, val_no, Some(ty))
    }

    fn get_fn_value(&mut self, val_no: u64, ty: TypeId) -> Result<ValueId> {
        self.values
            .get_value_fwdref(&mut self.module, val_no as usize, Some(ty))
    }

    fn check_block(&self, fid: FuncId, index: u64) -> Result<u32> {
        if (index as usize) < self.module.function(fid).blocks.len() {
            Ok(index as u32)
        } else {
            Err(Error::InvalidRecord)
        }
    }

    /// Parse one deferred function body. The value and metadata tables are
    /// restored to their module-level baselines on the way out.
    pub(super) fn parse_function_body(&mut self, fid: FuncId) -> Result<()> {
        self.stream.enter_block(BlockId::Function as u64)?;

        let module_value_size = self.values.size();
        let module_md_size = self.md_values.size();

        // Formal arguments occupy the first function-local value slots.
        let params: Vec<TypeId> = self
            .module
            .types
            .function_parts(self.module.function(fid).ty)
            .map(|(_, _, params)| params.to_vec())
            .ok_or(Error::InvalidTypeForValue)?;
        for (index, &ty) in params.iter().enumerate() {
            let vid = self.module.push_value(Value::Argument {
                func: fid,
                index: index as u32,
                ty,
            });
            self.values.push(vid);
            self.module.function_mut(fid).args.push(vid);
        }

        let mut next_value_no = self.values.size();
        let mut cur_bb: Option<usize> = None;
        let mut cur_bb_no = 0usize;
        let mut last_loc: Option<DebugLoc> = None;
        let mut instruction_list: Vec<InstId> = Vec::new();

        loop {
            match self.stream.advance()? {
                Entry::EndBlock => break,
                Entry::SubBlock(block_id) => {
                    match super::known_block(block_id) {
                        Some(BlockId::Constants) => {
                            self.parse_constants_block()?;
                            next_value_no = self.values.size();
                        }
                        Some(BlockId::ValueSymtab) => self.parse_value_symbol_table(Some(fid))?,
                        Some(BlockId::MetadataAttachment) => {
                            self.parse_metadata_attachment(fid, &instruction_list)?
                        }
                        Some(BlockId::Metadata) => self.parse_metadata_block()?,
                        _ => {
                            trace!(block_id, "skipping unknown function subblock");
                            self.stream.skip_block()?;
                        }
                    }
                    continue;
                }
                Entry::Record(abbrev_id) => {
                    let record = self.stream.read_record(abbrev_id)?;
                    let fields = &record.fields;
                    let code = u8::try_from(record.code)
                        .ok()
                        .and_then(|c| FunctionCode::try_from(c).ok())
                        .ok_or(Error::InvalidValue)?;

                    let (kind, ty) = match code {
                        FunctionCode::DeclareBlocks => {
                            let &[count, ..] = &fields[..] else {
                                return Err(Error::InvalidRecord);
                            };
                            if count == 0 {
                                return Err(Error::InvalidRecord);
                            }
                            let func = self.module.function_mut(fid);
                            func.blocks = vec![BasicBlock::default(); count as usize];
                            cur_bb = Some(0);
                            continue;
                        }
                        FunctionCode::DebugLocAgain => {
                            let inst = self
                                .last_emitted_inst(fid, cur_bb, cur_bb_no)
                                .ok_or(Error::InvalidRecord)?;
                            self.module.function_mut(fid).inst_mut(inst).debug_loc = last_loc;
                            continue;
                        }
                        FunctionCode::DebugLoc => {
                            let inst = self
                                .last_emitted_inst(fid, cur_bb, cur_bb_no)
                                .ok_or(Error::InvalidRecord)?;
                            if fields.len() < 4 {
                                return Err(Error::InvalidRecord);
                            }
                            let scope = match fields[2] {
                                0 => None,
                                id => Some(
                                    self.md_values
                                        .get_fwdref(&mut self.module, id as usize - 1),
                                ),
                            };
                            let inlined_at = match fields[3] {
                                0 => None,
                                id => Some(
                                    self.md_values
                                        .get_fwdref(&mut self.module, id as usize - 1),
                                ),
                            };
                            let loc = DebugLoc {
                                line: fields[0] as u32,
                                col: fields[1] as u32,
                                scope,
                                inlined_at,
                            };
                            last_loc = Some(loc);
                            self.module.function_mut(fid).inst_mut(inst).debug_loc = Some(loc);
                            continue;
                        }
                        FunctionCode::Binop => {
                            let mut op_num = 0;
                            let lhs = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let lhs_ty = self.module.value_type(lhs);
                            let rhs = self.get_value(fields, &mut op_num, lhs_ty)?;
                            if op_num >= fields.len() {
                                return Err(Error::InvalidRecord);
                            }
                            let is_fp = self.module.types.is_fp_or_fp_vector(lhs_ty);
                            let op = decode_binop(fields[op_num], is_fp)
                                .ok_or(Error::InvalidRecord)?;
                            op_num += 1;
                            let flags: OpFlags = fields
                                .get(op_num)
                                .map(|&w| decode_operator_flags(op, w))
                                .unwrap_or_default();
                            (InstKind::Binop { op, lhs, rhs, flags }, lhs_ty)
                        }
                        FunctionCode::Cast => {
                            let mut op_num = 0;
                            let value = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            if op_num + 2 != fields.len() {
                                return Err(Error::InvalidRecord);
                            }
                            let res_ty = self
                                .get_type_by_id(fields[op_num])
                                .ok_or(Error::InvalidRecord)?;
                            let op =
                                decode_cast(fields[op_num + 1]).ok_or(Error::InvalidRecord)?;
                            (InstKind::Cast { op, value }, res_ty)
                        }
                        gep_code @ (FunctionCode::Gep | FunctionCode::InboundsGep) => {
                            let mut op_num = 0;
                            let base = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let mut indices = Vec::new();
                            while op_num != fields.len() {
                                indices.push(self.get_value_type_pair(
                                    fields,
                                    &mut op_num,
                                    next_value_no,
                                )?);
                            }
                            let ty = self.gep_result_type(base, &indices)?;
                            (
                                InstKind::Gep {
                                    inbounds: gep_code == FunctionCode::InboundsGep,
                                    base,
                                    indices,
                                },
                                ty,
                            )
                        }
                        FunctionCode::ExtractVal => {
                            let mut op_num = 0;
                            let agg = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let mut indices = Vec::new();
                            let mut cur = self.module.value_type(agg);
                            while op_num != fields.len() {
                                let index = fields[op_num];
                                op_num += 1;
                                if u32::try_from(index).is_err() {
                                    return Err(Error::InvalidValue);
                                }
                                cur = self
                                    .indexed_aggregate_type(cur, index)
                                    .ok_or(Error::InvalidRecord)?;
                                indices.push(index as u32);
                            }
                            (InstKind::ExtractValue { agg, indices }, cur)
                        }
                        FunctionCode::InsertVal => {
                            let mut op_num = 0;
                            let agg = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let value = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let mut indices = Vec::new();
                            while op_num != fields.len() {
                                let index = fields[op_num];
                                op_num += 1;
                                if u32::try_from(index).is_err() {
                                    return Err(Error::InvalidValue);
                                }
                                indices.push(index as u32);
                            }
                            let ty = self.module.value_type(agg);
                            (InstKind::InsertValue { agg, value, indices }, ty)
                        }
                        FunctionCode::Select => {
                            // Old form: the condition is always scalar i1.
                            let mut op_num = 0;
                            let on_true = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let ty = self.module.value_type(on_true);
                            let on_false = self.get_value(fields, &mut op_num, ty)?;
                            let i1 = self.module.types.int1();
                            let cond = self.get_value(fields, &mut op_num, i1)?;
                            (InstKind::Select { cond, on_true, on_false }, ty)
                        }
                        FunctionCode::VSelect => {
                            let mut op_num = 0;
                            let on_true = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let ty = self.module.value_type(on_true);
                            let on_false = self.get_value(fields, &mut op_num, ty)?;
                            let cond = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            // The condition is i1 or a vector of i1.
                            let cond_ty = self.module.value_type(cond);
                            let scalar = self
                                .module
                                .types
                                .element_type(cond_ty)
                                .filter(|_| self.module.types.is_vector(cond_ty))
                                .unwrap_or(cond_ty);
                            if self.module.types.int_width(scalar) != Some(1) {
                                return Err(Error::InvalidTypeForValue);
                            }
                            (InstKind::Select { cond, on_true, on_false }, ty)
                        }
                        FunctionCode::ExtractElt => {
                            let mut op_num = 0;
                            let vec = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let int32 = self.module.types.int32();
                            let index = self.get_value(fields, &mut op_num, int32)?;
                            let vec_ty = self.module.value_type(vec);
                            if !self.module.types.is_vector(vec_ty) {
                                return Err(Error::InvalidRecord);
                            }
                            let ty = self
                                .module
                                .types
                                .element_type(vec_ty)
                                .ok_or(Error::InvalidRecord)?;
                            (InstKind::ExtractElement { vec, index }, ty)
                        }
                        FunctionCode::InsertElt => {
                            let mut op_num = 0;
                            let vec = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let vec_ty = self.module.value_type(vec);
                            let elem_ty = self
                                .module
                                .types
                                .element_type(vec_ty)
                                .filter(|_| self.module.types.is_vector(vec_ty))
                                .ok_or(Error::InvalidRecord)?;
                            let elem = self.get_value(fields, &mut op_num, elem_ty)?;
                            let int32 = self.module.types.int32();
                            let index = self.get_value(fields, &mut op_num, int32)?;
                            (InstKind::InsertElement { vec, elem, index }, vec_ty)
                        }
                        FunctionCode::ShuffleVec => {
                            let mut op_num = 0;
                            let v1 = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let v1_ty = self.module.value_type(v1);
                            let v2 = self.get_value(fields, &mut op_num, v1_ty)?;
                            let mask = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let mask_ty = self.module.value_type(mask);
                            let (len, elem) = match (
                                self.module.types.vector_len(mask_ty),
                                self.module.types.element_type(v1_ty),
                            ) {
                                (Some(len), Some(elem))
                                    if self.module.types.is_vector(v1_ty) =>
                                {
                                    (len, elem)
                                }
                                _ => return Err(Error::InvalidRecord),
                            };
                            let ty = self.module.types.vector(len, elem);
                            (InstKind::ShuffleVector { v1, v2, mask }, ty)
                        }
                        FunctionCode::Cmp | FunctionCode::Cmp2 => {
                            let mut op_num = 0;
                            let lhs = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let lhs_ty = self.module.value_type(lhs);
                            let rhs = self.get_value(fields, &mut op_num, lhs_ty)?;
                            if op_num + 1 != fields.len() {
                                return Err(Error::InvalidRecord);
                            }
                            let pred = fields[op_num] as u32;
                            let fp = self.module.types.is_fp_or_fp_vector(lhs_ty);
                            let i1 = self.module.types.int1();
                            let ty = match self.module.types.vector_len(lhs_ty) {
                                Some(len) => self.module.types.vector(len, i1),
                                None => i1,
                            };
                            (InstKind::Cmp { fp, pred, lhs, rhs }, ty)
                        }
                        FunctionCode::Ret => {
                            let void = self.module.types.void();
                            if fields.is_empty() {
                                (InstKind::Ret { value: None }, void)
                            } else {
                                let mut op_num = 0;
                                let value =
                                    self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                                if op_num != fields.len() {
                                    return Err(Error::InvalidRecord);
                                }
                                (InstKind::Ret { value: Some(value) }, void)
                            }
                        }
                        FunctionCode::Br => {
                            let void = self.module.types.void();
                            match fields.len() {
                                1 => {
                                    let dest = self.check_block(fid, fields[0])?;
                                    (InstKind::Br { dest }, void)
                                }
                                3 => {
                                    let then_dest = self.check_block(fid, fields[0])?;
                                    let else_dest = self.check_block(fid, fields[1])?;
                                    let i1 = self.module.types.int1();
                                    let cond = self.get_fn_value(fields[2], i1)?;
                                    (
                                        InstKind::CondBr {
                                            cond,
                                            then_dest,
                                            else_dest,
                                        },
                                        void,
                                    )
                                }
                                _ => return Err(Error::InvalidRecord),
                            }
                        }
                        FunctionCode::Switch => {
                            if fields.len() < 3 || fields.len() % 2 == 0 {
                                return Err(Error::InvalidRecord);
                            }
                            let op_ty = self
                                .get_type_by_id(fields[0])
                                .ok_or(Error::InvalidRecord)?;
                            let cond = self.get_fn_value(fields[1], op_ty)?;
                            let default = self.check_block(fid, fields[2])?;
                            let num_cases = (fields.len() - 3) / 2;
                            let mut cases = Vec::with_capacity(num_cases);
                            for i in 0..num_cases {
                                let case_val = self.get_fn_value(fields[3 + i * 2], op_ty)?;
                                if self.module.const_u64(case_val).is_none() {
                                    return Err(Error::InvalidRecord);
                                }
                                let dest = self.check_block(fid, fields[4 + i * 2])?;
                                cases.push((case_val, dest));
                            }
                            let void = self.module.types.void();
                            (InstKind::Switch { cond, default, cases }, void)
                        }
                        FunctionCode::IndirectBr => {
                            if fields.len() < 2 {
                                return Err(Error::InvalidRecord);
                            }
                            let op_ty = self
                                .get_type_by_id(fields[0])
                                .ok_or(Error::InvalidRecord)?;
                            let address = self.get_fn_value(fields[1], op_ty)?;
                            let mut dests = Vec::with_capacity(fields.len() - 2);
                            for &field in &fields[2..] {
                                dests.push(self.check_block(fid, field)?);
                            }
                            let void = self.module.types.void();
                            (InstKind::IndirectBr { address, dests }, void)
                        }
                        FunctionCode::Invoke => {
                            if fields.len() < 4 {
                                return Err(Error::InvalidRecord);
                            }
                            let attrs = fields[0] as u32;
                            let cc = fields[1] as u32;
                            let normal_dest = self.check_block(fid, fields[2])?;
                            let unwind_dest = self.check_block(fid, fields[3])?;
                            let mut op_num = 4;
                            let callee = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let callee_ty = self.module.value_type(callee);
                            let fn_ty = self
                                .module
                                .types
                                .pointee(callee_ty)
                                .ok_or(Error::InvalidRecord)?;
                            let (vararg, ret, fn_params) = self
                                .module
                                .types
                                .function_parts(fn_ty)
                                .map(|(v, r, p)| (v, r, p.to_vec()))
                                .ok_or(Error::InvalidRecord)?;
                            if fields.len() < op_num + fn_params.len() {
                                return Err(Error::InvalidRecord);
                            }
                            let mut args = Vec::with_capacity(fn_params.len());
                            for &param_ty in &fn_params {
                                args.push(self.get_value(fields, &mut op_num, param_ty)?);
                            }
                            if !vararg {
                                if op_num != fields.len() {
                                    return Err(Error::InvalidRecord);
                                }
                            } else {
                                while op_num != fields.len() {
                                    args.push(self.get_value_type_pair(
                                        fields,
                                        &mut op_num,
                                        next_value_no,
                                    )?);
                                }
                            }
                            (
                                InstKind::Invoke {
                                    callee,
                                    args,
                                    normal_dest,
                                    unwind_dest,
                                    cc,
                                    attrs,
                                },
                                ret,
                            )
                        }
                        FunctionCode::Resume => {
                            let mut op_num = 0;
                            let value = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let void = self.module.types.void();
                            (InstKind::Resume { value }, void)
                        }
                        FunctionCode::Unwind27 => {
                            // The removed terminator reads as a cleanup
                            // landing pad followed by a resume of its
                            // aggregate.
                            let i8_ptr = self.module.types.int8_ptr();
                            let int32 = self.module.types.int32();
                            let exn_ty = self.module.types.anon_struct(vec![i8_ptr, int32], false);
                            let pers_ty = self.module.types.function(true, int32, Vec::new());
                            let pers_fid =
                                self.get_or_insert_function("__gcc_personality_v0", pers_ty);
                            let personality = self.function_value(pers_fid);

                            let Some(bb) = cur_bb else {
                                return Err(Error::InvalidInstructionWithNoBB);
                            };
                            let func = self.module.function_mut(fid);
                            let lp = func.add_inst(Instruction::new(
                                InstKind::LandingPad {
                                    personality,
                                    cleanup: true,
                                    clauses: Vec::new(),
                                },
                                exn_ty,
                            ));
                            func.blocks[bb].insts.push(lp);
                            let lp_val = self.module.push_value(Value::Inst { func: fid, inst: lp });
                            let void = self.module.types.void();
                            (InstKind::Resume { value: lp_val }, void)
                        }
                        FunctionCode::Unreachable => {
                            let void = self.module.types.void();
                            (InstKind::Unreachable, void)
                        }
                        FunctionCode::Phi => {
                            if fields.is_empty() || (fields.len() - 1) % 2 != 0 {
                                return Err(Error::InvalidRecord);
                            }
                            let ty = self
                                .get_type_by_id(fields[0])
                                .ok_or(Error::InvalidRecord)?;
                            let mut incoming = Vec::with_capacity((fields.len() - 1) / 2);
                            for i in (1..fields.len()).step_by(2) {
                                let value = self.get_fn_value(fields[i], ty)?;
                                let block = self.check_block(fid, fields[i + 1])?;
                                incoming.push((value, block));
                            }
                            (InstKind::Phi { incoming }, ty)
                        }
                        FunctionCode::LandingPad => {
                            if fields.len() < 4 {
                                return Err(Error::InvalidRecord);
                            }
                            let mut op_num = 0;
                            let ty = self
                                .get_type_by_id(fields[op_num])
                                .ok_or(Error::InvalidRecord)?;
                            op_num += 1;
                            let personality =
                                self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            if op_num + 2 > fields.len() {
                                return Err(Error::InvalidRecord);
                            }
                            let cleanup = fields[op_num] != 0;
                            let num_clauses = fields[op_num + 1] as usize;
                            op_num += 2;
                            let mut clauses = Vec::with_capacity(num_clauses);
                            for _ in 0..num_clauses {
                                if op_num >= fields.len() {
                                    return Err(Error::InvalidRecord);
                                }
                                let kind = if fields[op_num] == 0 {
                                    ClauseKind::Catch
                                } else {
                                    ClauseKind::Filter
                                };
                                op_num += 1;
                                let value =
                                    self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                                clauses.push((kind, value));
                            }
                            (
                                InstKind::LandingPad {
                                    personality,
                                    cleanup,
                                    clauses,
                                },
                                ty,
                            )
                        }
                        FunctionCode::Alloca => {
                            if fields.len() != 4 {
                                return Err(Error::InvalidRecord);
                            }
                            let inst_ty = self
                                .get_type_by_id(fields[0])
                                .ok_or(Error::InvalidRecord)?;
                            if !self.module.types.is_pointer(inst_ty) {
                                return Err(Error::InvalidRecord);
                            }
                            let op_ty = self
                                .get_type_by_id(fields[1])
                                .ok_or(Error::InvalidRecord)?;
                            let size = self.get_fn_value(fields[2], op_ty)?;
                            let align = super::decode_alignment(fields[3]);
                            (InstKind::Alloca { size, align }, inst_ty)
                        }
                        FunctionCode::Load => {
                            let mut op_num = 0;
                            let ptr = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            if op_num + 2 != fields.len() {
                                return Err(Error::InvalidRecord);
                            }
                            let ptr_ty = self.module.value_type(ptr);
                            let ty = self
                                .module
                                .types
                                .pointee(ptr_ty)
                                .ok_or(Error::InvalidTypeForValue)?;
                            (
                                InstKind::Load {
                                    ptr,
                                    align: super::decode_alignment(fields[op_num]),
                                    volatile: fields[op_num + 1] != 0,
                                    ordering: AtomicOrdering::NotAtomic,
                                    scope: SyncScope::CrossThread,
                                },
                                ty,
                            )
                        }
                        FunctionCode::LoadAtomic => {
                            let mut op_num = 0;
                            let ptr = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            if op_num + 4 != fields.len() {
                                return Err(Error::InvalidRecord);
                            }
                            let ordering = decode_ordering(fields[op_num + 2]);
                            if matches!(
                                ordering,
                                AtomicOrdering::NotAtomic
                                    | AtomicOrdering::Release
                                    | AtomicOrdering::AcquireRelease
                            ) {
                                return Err(Error::InvalidRecord);
                            }
                            if fields[op_num] == 0 {
                                return Err(Error::InvalidRecord);
                            }
                            let scope = decode_sync_scope(fields[op_num + 3]);
                            let ptr_ty = self.module.value_type(ptr);
                            let ty = self
                                .module
                                .types
                                .pointee(ptr_ty)
                                .ok_or(Error::InvalidTypeForValue)?;
                            (
                                InstKind::Load {
                                    ptr,
                                    align: super::decode_alignment(fields[op_num]),
                                    volatile: fields[op_num + 1] != 0,
                                    ordering,
                                    scope,
                                },
                                ty,
                            )
                        }
                        FunctionCode::Store => {
                            let mut op_num = 0;
                            let ptr = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let ptr_ty = self.module.value_type(ptr);
                            let pointee = self
                                .module
                                .types
                                .pointee(ptr_ty)
                                .ok_or(Error::InvalidTypeForValue)?;
                            let value = self.get_value(fields, &mut op_num, pointee)?;
                            if op_num + 2 != fields.len() {
                                return Err(Error::InvalidRecord);
                            }
                            let void = self.module.types.void();
                            (
                                InstKind::Store {
                                    ptr,
                                    value,
                                    align: super::decode_alignment(fields[op_num]),
                                    volatile: fields[op_num + 1] != 0,
                                    ordering: AtomicOrdering::NotAtomic,
                                    scope: SyncScope::CrossThread,
                                },
                                void,
                            )
                        }
                        FunctionCode::StoreAtomic => {
                            let mut op_num = 0;
                            let ptr = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let ptr_ty = self.module.value_type(ptr);
                            let pointee = self
                                .module
                                .types
                                .pointee(ptr_ty)
                                .ok_or(Error::InvalidTypeForValue)?;
                            let value = self.get_value(fields, &mut op_num, pointee)?;
                            if op_num + 4 != fields.len() {
                                return Err(Error::InvalidRecord);
                            }
                            let ordering = decode_ordering(fields[op_num + 2]);
                            if matches!(
                                ordering,
                                AtomicOrdering::NotAtomic
                                    | AtomicOrdering::Acquire
                                    | AtomicOrdering::AcquireRelease
                            ) {
                                return Err(Error::InvalidRecord);
                            }
                            if fields[op_num] == 0 {
                                return Err(Error::InvalidRecord);
                            }
                            let scope = decode_sync_scope(fields[op_num + 3]);
                            let void = self.module.types.void();
                            (
                                InstKind::Store {
                                    ptr,
                                    value,
                                    align: super::decode_alignment(fields[op_num]),
                                    volatile: fields[op_num + 1] != 0,
                                    ordering,
                                    scope,
                                },
                                void,
                            )
                        }
                        FunctionCode::CmpXchg => {
                            let mut op_num = 0;
                            let ptr = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let ptr_ty = self.module.value_type(ptr);
                            let pointee = self
                                .module
                                .types
                                .pointee(ptr_ty)
                                .ok_or(Error::InvalidTypeForValue)?;
                            let expected = self.get_value(fields, &mut op_num, pointee)?;
                            let replacement = self.get_value(fields, &mut op_num, pointee)?;
                            if op_num + 3 != fields.len() {
                                return Err(Error::InvalidRecord);
                            }
                            let ordering = decode_ordering(fields[op_num + 1]);
                            if matches!(
                                ordering,
                                AtomicOrdering::NotAtomic | AtomicOrdering::Unordered
                            ) {
                                return Err(Error::InvalidRecord);
                            }
                            let scope = decode_sync_scope(fields[op_num + 2]);
                            (
                                InstKind::CmpXchg {
                                    ptr,
                                    expected,
                                    replacement,
                                    volatile: fields[op_num] != 0,
                                    ordering,
                                    scope,
                                },
                                pointee,
                            )
                        }
                        FunctionCode::AtomicRmw => {
                            let mut op_num = 0;
                            let ptr = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let ptr_ty = self.module.value_type(ptr);
                            let pointee = self
                                .module
                                .types
                                .pointee(ptr_ty)
                                .ok_or(Error::InvalidTypeForValue)?;
                            let value = self.get_value(fields, &mut op_num, pointee)?;
                            if op_num + 4 != fields.len() {
                                return Err(Error::InvalidRecord);
                            }
                            let op = decode_rmw_operation(fields[op_num])
                                .ok_or(Error::InvalidRecord)?;
                            let ordering = decode_ordering(fields[op_num + 2]);
                            if matches!(
                                ordering,
                                AtomicOrdering::NotAtomic | AtomicOrdering::Unordered
                            ) {
                                return Err(Error::InvalidRecord);
                            }
                            let scope = decode_sync_scope(fields[op_num + 3]);
                            (
                                InstKind::AtomicRmw {
                                    op,
                                    ptr,
                                    value,
                                    volatile: fields[op_num + 1] != 0,
                                    ordering,
                                    scope,
                                },
                                pointee,
                            )
                        }
                        FunctionCode::Fence => {
                            if fields.len() != 2 {
                                return Err(Error::InvalidRecord);
                            }
                            let ordering = decode_ordering(fields[0]);
                            if matches!(
                                ordering,
                                AtomicOrdering::NotAtomic
                                    | AtomicOrdering::Unordered
                                    | AtomicOrdering::Monotonic
                            ) {
                                return Err(Error::InvalidRecord);
                            }
                            let scope = decode_sync_scope(fields[1]);
                            let void = self.module.types.void();
                            (InstKind::Fence { ordering, scope }, void)
                        }
                        FunctionCode::Call => {
                            if fields.len() < 3 {
                                return Err(Error::InvalidRecord);
                            }
                            let attrs = fields[0] as u32;
                            let cc_info = fields[1];
                            let mut op_num = 2;
                            let callee = self.get_value_type_pair(fields, &mut op_num, next_value_no)?;
                            let callee_ty = self.module.value_type(callee);
                            let fn_ty = self
                                .module
                                .types
                                .pointee(callee_ty)
                                .ok_or(Error::InvalidRecord)?;
                            let (vararg, ret, fn_params) = self
                                .module
                                .types
                                .function_parts(fn_ty)
                                .map(|(v, r, p)| (v, r, p.to_vec()))
                                .ok_or(Error::InvalidRecord)?;
                            if fields.len() < fn_params.len() + op_num {
                                return Err(Error::InvalidRecord);
                            }
                            let mut args = Vec::with_capacity(fn_params.len());
                            for &param_ty in &fn_params {
                                if self.module.types.is_label(param_ty) {
                                    // Label-typed parameters reference
                                    // basic blocks, not values.
                                    let block = self.check_block(fid, fields[op_num])?;
                                    op_num += 1;
                                    args.push(self.module.push_value(Value::Block {
                                        func: fid,
                                        block,
                                        ty: param_ty,
                                    }));
                                } else {
                                    args.push(self.get_value(fields, &mut op_num, param_ty)?);
                                }
                            }
                            if !vararg {
                                if op_num != fields.len() {
                                    return Err(Error::InvalidRecord);
                                }
                            } else {
                                while op_num != fields.len() {
                                    args.push(self.get_value_type_pair(
                                        fields,
                                        &mut op_num,
                                        next_value_no,
                                    )?);
                                }
                            }
                            (
                                InstKind::Call {
                                    callee,
                                    args,
                                    cc: (cc_info >> 1) as u32,
                                    tail: cc_info & 1 != 0,
                                    attrs,
                                },
                                ret,
                            )
                        }
                        FunctionCode::VaArg => {
                            if fields.len() < 3 {
                                return Err(Error::InvalidRecord);
                            }
                            let list_ty = self
                                .get_type_by_id(fields[0])
                                .ok_or(Error::InvalidRecord)?;
                            let list = self.get_fn_value(fields[1], list_ty)?;
                            let res_ty = self
                                .get_type_by_id(fields[2])
                                .ok_or(Error::InvalidRecord)?;
                            (InstKind::VaArg { list }, res_ty)
                        }
                    };

                    // Append to the current block; a record with no block
                    // to land in rejects the whole body.
                    let Some(bb) = cur_bb else {
                        return Err(Error::InvalidInstructionWithNoBB);
                    };
                    let is_terminator = kind.is_terminator();
                    let produces_value = !self.module.types.is_void(ty);
                    let func = self.module.function_mut(fid);
                    let inst_id = func.add_inst(Instruction::new(kind, ty));
                    func.blocks[bb].insts.push(inst_id);
                    instruction_list.push(inst_id);

                    if is_terminator {
                        cur_bb_no += 1;
                        cur_bb = (cur_bb_no < self.module.function(fid).blocks.len())
                            .then_some(cur_bb_no);
                    }
                    if produces_value {
                        let vid = self.module.push_value(Value::Inst {
                            func: fid,
                            inst: inst_id,
                        });
                        self.values.assign(&mut self.module, vid, next_value_no);
                        next_value_no += 1;
                    }
                }
            }
        }

        // A surviving synthetic argument at the table's tail is a forward
        // reference nothing ever defined.
        if let Some(last) = self.values.last() {
            if matches!(self.module.value(last), Value::SyntheticArg { .. }) {
                return Err(Error::NeverResolvedValueFoundInFunction);
            }
        }

        // Anything that took the address of blocks in this function can be
        // pointed at the real blocks now.
        if let Some(refs) = self.block_addr_fwd_refs.remove(&fid) {
            let num_blocks = self.module.function(fid).blocks.len();
            let i8_ptr = self.module.types.int8_ptr();
            for (block_index, placeholder) in refs {
                if block_index as usize >= num_blocks {
                    return Err(Error::InvalidId);
                }
                *self.module.value_slot_mut(placeholder) =
                    Value::Constant(Constant::BlockAddress {
                        ty: i8_ptr,
                        func: fid,
                        block: block_index as u32,
                    });
            }
        }

        self.values.shrink_to(module_value_size);
        self.md_values.shrink_to(module_md_size);
        Ok(())
    }

    /// The most recently emitted instruction, for debug-location records.
    fn last_emitted_inst(
        &self,
        fid: FuncId,
        cur_bb: Option<usize>,
        cur_bb_no: usize,
    ) -> Option<InstId> {
        let func = self.module.function(fid);
        if let Some(bb) = cur_bb {
            if let Some(&inst) = func.blocks.get(bb).and_then(|b| b.insts.last()) {
                return Some(inst);
            }
        }
        if cur_bb_no > 0 {
            if let Some(&inst) = func.blocks.get(cur_bb_no - 1).and_then(|b| b.insts.last()) {
                return Some(inst);
            }
        }
        None
    }

    /// Step an aggregate type by one extract/insert-value index.
    fn indexed_aggregate_type(&self, ty: TypeId, index: u64) -> Option<TypeId> {
        if let Some(fields) = self.module.types.struct_fields(ty) {
            return fields.get(index as usize).copied();
        }
        match self.module.types.get(ty) {
            Type::Array { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    /// Parse a VALUE_SYMTAB block, naming values and (inside a function)
    /// basic blocks.
    pub(super) fn parse_value_symbol_table(&mut self, current_fn: Option<FuncId>) -> Result<()> {
        self.stream.enter_block(BlockId::ValueSymtab as u64)?;

        loop {
            match self.stream.advance()? {
                Entry::EndBlock => return Ok(()),
                Entry::SubBlock(_) => self.stream.skip_block()?,
                Entry::Record(abbrev_id) => {
                    let record = self.stream.read_record(abbrev_id)?;
                    match super::record_code::<ValueSymtabCode>(record.code) {
                        Some(ValueSymtabCode::Entry) => {
                            if record.fields.is_empty() {
                                return Err(Error::InvalidRecord);
                            }
                            let value_id = record.fields[0] as usize;
                            let name = record.string(1);
                            let v = self
                                .values
                                .get(value_id)
                                .ok_or(Error::InvalidRecord)?;
                            self.set_value_name(v, name);
                        }
                        Some(ValueSymtabCode::BbEntry) => {
                            if record.fields.is_empty() {
                                return Err(Error::InvalidRecord);
                            }
                            let Some(fid) = current_fn else {
                                return Err(Error::InvalidRecord);
                            };
                            let block = self.check_block(fid, record.fields[0])? as usize;
                            self.module.function_mut(fid).blocks[block].name = record.string(1);
                        }
                        None => {
                            trace!(code = record.code, "ignoring unknown symtab record");
                        }
                    }
                }
            }
        }
    }

    fn set_value_name(&mut self, v: ValueId, name: String) {
        let resolved = self.module.resolve(v);
        match *self.module.value_slot(resolved) {
            Value::Global(g) => self.module.globals[g.index()].name = name,
            Value::Function(f) => self.module.functions[f.index()].name = name,
            Value::Alias(a) => self.module.aliases[a.index()].name = name,
            _ => {}
        }
    }

    /// Parse a METADATA block into the metadata table.
    pub(super) fn parse_metadata_block(&mut self) -> Result<()> {
        self.stream.enter_block(BlockId::Metadata as u64)?;
        let mut next_md_no = self.md_values.size();

        loop {
            match self.stream.advance()? {
                Entry::EndBlock => return Ok(()),
                Entry::SubBlock(_) => self.stream.skip_block()?,
                Entry::Record(abbrev_id) => {
                    let record = self.stream.read_record(abbrev_id)?;
                    match super::record_code::<MetadataCode>(record.code) {
                        Some(MetadataCode::Name) => {
                            let name = record.string(0);
                            // NAME is immediately followed by the node list
                            // it labels.
                            let Entry::Record(next_abbrev) = self.stream.advance()? else {
                                return Err(Error::InvalidRecord);
                            };
                            let node_record = self.stream.read_record(next_abbrev)?;
                            if node_record.code != MetadataCode::NamedNode as u64 {
                                return Err(Error::InvalidRecord);
                            }
                            let mut elems = Vec::with_capacity(node_record.fields.len());
                            for &id in &node_record.fields {
                                elems.push(self.md_values.get_fwdref(&mut self.module, id as usize));
                            }
                            self.module.named_metadata.push((name, elems));
                        }
                        Some(code @ (MetadataCode::Node | MetadataCode::FnNode)) => {
                            if record.fields.len() % 2 == 1 {
                                return Err(Error::InvalidRecord);
                            }
                            let mut operands = Vec::with_capacity(record.fields.len() / 2);
                            for pair in record.fields.chunks_exact(2) {
                                let ty = self
                                    .get_type_by_id(pair[0])
                                    .ok_or(Error::InvalidRecord)?;
                                let operand = if self.module.types.is_metadata(ty) {
                                    MdOperand::Metadata(
                                        self.md_values
                                            .get_fwdref(&mut self.module, pair[1] as usize),
                                    )
                                } else if self.module.types.is_void(ty) {
                                    MdOperand::Null
                                } else {
                                    MdOperand::Value(self.values.get_value_fwdref(
                                        &mut self.module,
                                        pair[1] as usize,
                                        Some(ty),
                                    )?)
                                };
                                operands.push(operand);
                            }
                            let md = self.module.push_metadata(Metadata::Node {
                                operands,
                                function_local: code == MetadataCode::FnNode,
                            });
                            self.md_values.assign(&mut self.module, md, next_md_no);
                            next_md_no += 1;
                        }
                        Some(MetadataCode::String) => {
                            let md = self.module.push_metadata(Metadata::String(record.string(0)));
                            self.md_values.assign(&mut self.module, md, next_md_no);
                            next_md_no += 1;
                        }
                        Some(MetadataCode::Kind) => {
                            if record.fields.len() < 2 {
                                return Err(Error::InvalidRecord);
                            }
                            let kind = record.fields[0];
                            let name = record.string(1);
                            let mapped = self.module.md_kind_id(&name);
                            if self.md_kind_map.insert(kind, mapped).is_some() {
                                return Err(Error::ConflictingMetadataKindRecords);
                            }
                        }
                        Some(MetadataCode::NamedNode) | None => {
                            trace!(code = record.code, "ignoring unknown metadata record");
                        }
                    }
                }
            }
        }
    }

    /// Parse METADATA_ATTACHMENT records, hanging nodes off instructions
    /// by their creation index.
    pub(super) fn parse_metadata_attachment(
        &mut self,
        fid: FuncId,
        instruction_list: &[InstId],
    ) -> Result<()> {
        self.stream
            .enter_block(BlockId::MetadataAttachment as u64)?;

        loop {
            match self.stream.advance_skipping_subblocks()? {
                Entry::EndBlock => return Ok(()),
                Entry::SubBlock(_) => unreachable!("subblocks are skipped"),
                Entry::Record(abbrev_id) => {
                    let record = self.stream.read_record(abbrev_id)?;
                    match super::record_code::<MetadataAttachmentCode>(record.code) {
                        Some(MetadataAttachmentCode::Attachment) => {
                            let fields = &record.fields;
                            if fields.is_empty() || (fields.len() - 1) % 2 != 0 {
                                return Err(Error::InvalidRecord);
                            }
                            let inst = *instruction_list
                                .get(fields[0] as usize)
                                .ok_or(Error::InvalidRecord)?;
                            for pair in fields[1..].chunks_exact(2) {
                                let kind = *self
                                    .md_kind_map
                                    .get(&pair[0])
                                    .ok_or(Error::InvalidId)?;
                                let node =
                                    self.md_values.get_fwdref(&mut self.module, pair[1] as usize);
                                self.module
                                    .function_mut(fid)
                                    .inst_mut(inst)
                                    .metadata
                                    .push((kind, node));
                            }
                        }
                        None => {
                            trace!(code = record.code, "ignoring unknown attachment record");
                        }
                    }
                }
            }
        }
    }
}
