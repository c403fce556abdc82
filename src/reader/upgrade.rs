//! Rewrites of constructs that no longer exist in the IR: the
//! intrinsic-based exception handling scheme, removed debug intrinsics,
//! and intrinsics whose signatures changed.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::ir::{
    BasicBlock, ClauseKind, Constant, FuncId, InstId, InstKind, Instruction, TypeId, Value,
    ValueId,
};
use crate::{Error, Result};

use super::BitcodeReader;

const EH_EXCEPTION: &str = "llvm.eh.exception";
const EH_SELECTOR: &str = "llvm.eh.selector";
const EH_RESUME: &str = "llvm.eh.resume";
const EH_CATCH_ALL: &str = "llvm.eh.catch.all.value";

struct InvokeSite {
    func: FuncId,
    invoke_block: usize,
    exn_call: InstId,
    exn_block: usize,
    sel_call: InstId,
    sel_block: usize,
}

impl<'a> BitcodeReader<'a> {
    /// Whether a block's first real instruction is a landing pad.
    fn block_is_landing_pad(&self, fid: FuncId, block: usize) -> bool {
        let func = self.module.function(fid);
        func.blocks[block]
            .insts
            .iter()
            .map(|&i| &func.inst(i).kind)
            .find(|kind| !matches!(kind, InstKind::Phi { .. }))
            .is_some_and(|kind| matches!(kind, InstKind::LandingPad { .. }))
    }

    /// Position after leading phis and landing pads, where new
    /// instructions may be inserted.
    fn first_insertion_point(&self, fid: FuncId, block: usize) -> usize {
        let func = self.module.function(fid);
        func.blocks[block]
            .insts
            .iter()
            .position(|&i| {
                !matches!(
                    func.inst(i).kind,
                    InstKind::Phi { .. } | InstKind::LandingPad { .. }
                )
            })
            .unwrap_or(func.blocks[block].insts.len())
    }

    /// Does this call target the named function?
    fn call_targets(&self, kind: &InstKind, target: FuncId) -> bool {
        if let InstKind::Call { callee, .. } = kind {
            matches!(self.module.value(*callee), Value::Function(f) if *f == target)
        } else {
            false
        }
    }

    /// Search the unwind destination and its successors for the unique
    /// exception and selector calls, with an explicit work list.
    fn find_exn_and_sel(
        &self,
        fid: FuncId,
        start: usize,
        exn_fid: FuncId,
        sel_fid: FuncId,
    ) -> Option<(InstId, usize, InstId, usize)> {
        let func = self.module.function(fid);
        let mut visited = FxHashSet::default();
        let mut worklist = vec![start];
        let mut exn = None;
        let mut sel = None;

        while let Some(block) = worklist.pop() {
            if !visited.insert(block) {
                continue;
            }
            for &inst in &func.blocks[block].insts {
                let kind = &func.inst(inst).kind;
                if exn.is_none() && self.call_targets(kind, exn_fid) {
                    exn = Some((inst, block));
                } else if sel.is_none() && self.call_targets(kind, sel_fid) {
                    sel = Some((inst, block));
                }
                if let (Some((e, eb)), Some((s, sb))) = (exn, sel) {
                    return Some((e, eb, s, sb));
                }
            }
            if let Some(&term) = func.blocks[block].insts.last() {
                for succ in func.inst(term).kind.successors() {
                    worklist.push(succ as usize);
                }
            }
        }
        None
    }

    /// Insert an instruction into a block at `position`, registering its
    /// result value. Returns the value id.
    fn insert_inst(
        &mut self,
        fid: FuncId,
        block: usize,
        position: usize,
        inst: Instruction,
    ) -> ValueId {
        let func = self.module.function_mut(fid);
        let inst_id = func.add_inst(inst);
        func.blocks[block].insts.insert(position, inst_id);
        self.module.push_value(Value::Inst {
            func: fid,
            inst: inst_id,
        })
    }

    fn const_int(&mut self, ty: TypeId, value: i64) -> ValueId {
        self.module
            .push_value(Value::Constant(Constant::Int { ty, value }))
    }

    /// Upgrade the pre-landingpad exception handling scheme: every invoke
    /// whose unwind destination is not a landing pad gets one, fed from
    /// the old `llvm.eh.exception` / `llvm.eh.selector` calls.
    pub(super) fn upgrade_exception_handling(&mut self) -> Result<()> {
        let (Some(exn_fid), Some(sel_fid)) = (
            self.module.function_by_name(EH_EXCEPTION),
            self.module.function_by_name(EH_SELECTOR),
        ) else {
            return Ok(());
        };

        let i8_ptr = self.module.types.int8_ptr();
        let int32 = self.module.types.int32();
        let lpad_ty = self.module.types.anon_struct(vec![i8_ptr, int32], false);
        let exn_slot_ty = self.module.types.pointer(i8_ptr, 0);
        let sel_slot_ty = self.module.types.pointer(int32, 0);

        // Link every not-yet-converted invoke with its exception and
        // selector calls.
        let mut sites: Vec<InvokeSite> = Vec::new();
        for findex in 0..self.module.functions.len() {
            let fid = FuncId::new(findex);
            for block in 0..self.module.function(fid).blocks.len() {
                let Some(&term) = self.module.function(fid).blocks[block].insts.last() else {
                    continue;
                };
                let unwind_dest = match &self.module.function(fid).inst(term).kind {
                    InstKind::Invoke { unwind_dest, .. } => *unwind_dest,
                    _ => continue,
                };
                if self.block_is_landing_pad(fid, unwind_dest as usize) {
                    continue;
                }
                let (exn_call, exn_block, sel_call, sel_block) = self
                    .find_exn_and_sel(fid, unwind_dest as usize, exn_fid, sel_fid)
                    .ok_or(Error::InvalidRecord)?;
                sites.push(InvokeSite {
                    func: fid,
                    invoke_block: block,
                    exn_call,
                    exn_block,
                    sel_call,
                    sel_block,
                });
            }
        }

        if !sites.is_empty() {
            debug!(count = sites.len(), "upgrading legacy exception handling");
        }

        // Per-function stack slots for the exception object and selector.
        let mut fn_slots: FxHashMap<FuncId, (ValueId, ValueId)> = FxHashMap::default();
        let mut dead: Vec<(FuncId, usize, InstId)> = Vec::new();

        for site in &sites {
            let fid = site.func;
            let (exn_slot, sel_slot) = match fn_slots.get(&fid) {
                Some(&slots) => slots,
                None => {
                    // Allocate the slots in the entry block, in front of
                    // its terminator.
                    let one = self.const_int(int32, 1);
                    let entry_len = self.module.function(fid).blocks[0].insts.len();
                    let at = entry_len.saturating_sub(1);
                    let exn_slot = self.insert_inst(
                        fid,
                        0,
                        at,
                        Instruction::new(InstKind::Alloca { size: one, align: 0 }, exn_slot_ty),
                    );
                    let sel_slot = self.insert_inst(
                        fid,
                        0,
                        at + 1,
                        Instruction::new(InstKind::Alloca { size: one, align: 0 }, sel_slot_ty),
                    );
                    fn_slots.insert(fid, (exn_slot, sel_slot));
                    (exn_slot, sel_slot)
                }
            };

            let invoke_term = *self.module.function(fid).blocks[site.invoke_block]
                .insts
                .last()
                .ok_or(Error::InvalidRecord)?;
            let mut unwind_dest = match &self.module.function(fid).inst(invoke_term).kind {
                InstKind::Invoke { unwind_dest, .. } => *unwind_dest as usize,
                _ => return Err(Error::InvalidRecord),
            };

            if self.predecessor_count(fid, unwind_dest) > 1 {
                // Interpose a single-predecessor block in front of the
                // shared destination and retarget the invoke through it.
                let func = self.module.function_mut(fid);
                let new_bb = func.blocks.len();
                func.blocks.push(BasicBlock {
                    name: "new.lpad".to_owned(),
                    insts: Vec::new(),
                });
                let void = self.module.types.void();
                let br = Instruction::new(
                    InstKind::Br {
                        dest: unwind_dest as u32,
                    },
                    void,
                );
                let func = self.module.function_mut(fid);
                let br_id = func.add_inst(br);
                func.blocks[new_bb].insts.push(br_id);

                if let InstKind::Invoke {
                    unwind_dest: dest, ..
                } = &mut func.inst_mut(invoke_term).kind
                {
                    *dest = new_bb as u32;
                }

                // Incoming phi edges from the invoke's block move to the
                // interposed one.
                let invoke_block = site.invoke_block as u32;
                let phi_ids: Vec<InstId> = func.blocks[unwind_dest].insts.clone();
                for inst in phi_ids {
                    if let InstKind::Phi { incoming } = &mut func.inst_mut(inst).kind {
                        for (_, block) in incoming.iter_mut() {
                            if *block == invoke_block {
                                *block = new_bb as u32;
                            }
                        }
                    } else {
                        break;
                    }
                }
                unwind_dest = new_bb;
            }

            // The landing pad replaces the intrinsic pair: extract both
            // fields and store them in the function slots.
            let sel_args = match &self.module.function(fid).inst(site.sel_call).kind {
                InstKind::Call { args, .. } => args.clone(),
                _ => return Err(Error::InvalidRecord),
            };
            let personality = *sel_args.get(1).ok_or(Error::InvalidRecord)?;

            let clauses = self.selector_clauses(&sel_args)?;
            let cleanup = clauses.iter().any(|c| c.is_none());
            let clauses: Vec<(ClauseKind, ValueId)> = clauses.into_iter().flatten().collect();

            let at = self.first_insertion_point(fid, unwind_dest);
            let lp = self.insert_inst(
                fid,
                unwind_dest,
                at,
                Instruction::new(
                    InstKind::LandingPad {
                        personality,
                        cleanup,
                        clauses,
                    },
                    lpad_ty,
                ),
            );
            let lp_exn = self.insert_inst(
                fid,
                unwind_dest,
                at + 1,
                Instruction::new(
                    InstKind::ExtractValue {
                        agg: lp,
                        indices: vec![0],
                    },
                    i8_ptr,
                ),
            );
            let lp_sel = self.insert_inst(
                fid,
                unwind_dest,
                at + 2,
                Instruction::new(
                    InstKind::ExtractValue {
                        agg: lp,
                        indices: vec![1],
                    },
                    int32,
                ),
            );
            let void = self.module.types.void();
            self.insert_inst(
                fid,
                unwind_dest,
                at + 3,
                Instruction::new(
                    InstKind::Store {
                        ptr: exn_slot,
                        value: lp_exn,
                        align: 0,
                        volatile: false,
                        ordering: crate::ir::AtomicOrdering::NotAtomic,
                        scope: crate::ir::SyncScope::CrossThread,
                    },
                    void,
                ),
            );
            self.insert_inst(
                fid,
                unwind_dest,
                at + 4,
                Instruction::new(
                    InstKind::Store {
                        ptr: sel_slot,
                        value: lp_sel,
                        align: 0,
                        volatile: false,
                        ordering: crate::ir::AtomicOrdering::NotAtomic,
                        scope: crate::ir::SyncScope::CrossThread,
                    },
                    void,
                ),
            );

            dead.push((fid, site.exn_block, site.exn_call));
            dead.push((fid, site.sel_block, site.sel_call));
        }

        // Replace the intrinsic call results with loads from the slots,
        // right where the calls used to sit.
        for site in &sites {
            let fid = site.func;
            let &(exn_slot, sel_slot) = fn_slots.get(&fid).ok_or(Error::InvalidRecord)?;
            let at = self.module.function(fid).blocks[site.exn_block]
                .insts
                .iter()
                .position(|&i| i == site.exn_call)
                .ok_or(Error::InvalidRecord)?;
            let exn_load = self.insert_inst(
                fid,
                site.exn_block,
                at,
                Instruction::new(
                    InstKind::Load {
                        ptr: exn_slot,
                        align: 0,
                        volatile: false,
                        ordering: crate::ir::AtomicOrdering::NotAtomic,
                        scope: crate::ir::SyncScope::CrossThread,
                    },
                    i8_ptr,
                ),
            );
            let at = self.module.function(fid).blocks[site.sel_block]
                .insts
                .iter()
                .position(|&i| i == site.sel_call)
                .ok_or(Error::InvalidRecord)?;
            let sel_load = self.insert_inst(
                fid,
                site.sel_block,
                at,
                Instruction::new(
                    InstKind::Load {
                        ptr: sel_slot,
                        align: 0,
                        volatile: false,
                        ordering: crate::ir::AtomicOrdering::NotAtomic,
                        scope: crate::ir::SyncScope::CrossThread,
                    },
                    int32,
                ),
            );

            let (exn_call, sel_call) = (site.exn_call, site.sel_call);
            self.module.redirect_values(|v| match v {
                Value::Inst { func, inst } if *func == fid && *inst == exn_call => {
                    Some(Value::Forward(exn_load))
                }
                Value::Inst { func, inst } if *func == fid && *inst == sel_call => {
                    Some(Value::Forward(sel_load))
                }
                _ => None,
            });
        }

        for (fid, block, inst) in dead {
            self.module.function_mut(fid).blocks[block]
                .insts
                .retain(|&i| i != inst);
        }

        self.rewrite_eh_resume_calls(lpad_ty)?;
        Ok(())
    }

    /// Translate selector-call arguments to landing-pad clauses, scanning
    /// from the tail. `None` entries mark a cleanup.
    fn selector_clauses(
        &mut self,
        sel_args: &[ValueId],
    ) -> Result<Vec<Option<(ClauseKind, ValueId)>>> {
        let mut clauses = Vec::new();
        let mut n = sel_args.len();
        let i8_ptr = self.module.types.int8_ptr();

        let mut i = sel_args.len();
        while i > 2 {
            i -= 1;
            // Only an integer constant introduces a filter; a null pointer
            // here is a catch-all clause.
            let Some(filter_length) = self.integer_const_value(sel_args[i]) else {
                continue;
            };
            let filter_length = filter_length as usize;
            let first_catch = i + filter_length + usize::from(filter_length == 0);
            if first_catch > n {
                return Err(Error::InvalidRecord);
            }

            for &arg in &sel_args[first_catch..n] {
                clauses.push(Some((ClauseKind::Catch, self.resolve_catch_all(arg)?)));
            }

            if filter_length == 0 {
                clauses.push(None);
            } else {
                let type_info: Vec<ValueId> = sel_args[i + 1..first_catch].to_vec();
                let elem_ty = type_info
                    .first()
                    .map(|&v| self.module.value_type(v))
                    .unwrap_or(i8_ptr);
                let array_ty = self.module.types.array(type_info.len() as u64, elem_ty);
                let filter = self.module.push_value(Value::Constant(Constant::Aggregate {
                    ty: array_ty,
                    elems: type_info,
                }));
                clauses.push(Some((ClauseKind::Filter, filter)));
            }
            n = i;
        }

        for &arg in sel_args.iter().take(n).skip(2) {
            clauses.push(Some((ClauseKind::Catch, self.resolve_catch_all(arg)?)));
        }
        Ok(clauses)
    }

    fn integer_const_value(&self, v: ValueId) -> Option<u64> {
        match self.module.as_constant(v)? {
            Constant::Int { ty, value } if self.module.types.is_integer(*ty) => {
                Some(*value as u64)
            }
            Constant::Null { ty } if self.module.types.is_integer(*ty) => Some(0),
            _ => None,
        }
    }

    /// The symbolic catch-all global resolves to its initializer.
    fn resolve_catch_all(&mut self, arg: ValueId) -> Result<ValueId> {
        if let Value::Global(gid) = self.module.value(arg) {
            let global = &self.module.globals[gid.index()];
            if global.name == EH_CATCH_ALL {
                return global.init.ok_or(Error::ExpectedConstant);
            }
        }
        Ok(arg)
    }

    /// Replace every `llvm.eh.resume(exn, sel)` call with a `resume` of a
    /// two-field aggregate, discarding the rest of the block.
    fn rewrite_eh_resume_calls(&mut self, lpad_ty: TypeId) -> Result<()> {
        let Some(resume_fid) = self.module.function_by_name(EH_RESUME) else {
            return Ok(());
        };
        let void = self.module.types.void();

        for findex in 0..self.module.functions.len() {
            let fid = FuncId::new(findex);
            for block in 0..self.module.function(fid).blocks.len() {
                let call_pos = self.module.function(fid).blocks[block]
                    .insts
                    .iter()
                    .position(|&i| {
                        self.call_targets(&self.module.function(fid).inst(i).kind, resume_fid)
                    });
                let Some(call_pos) = call_pos else { continue };

                let call_id = self.module.function(fid).blocks[block].insts[call_pos];
                let args = match &self.module.function(fid).inst(call_id).kind {
                    InstKind::Call { args, .. } => args.clone(),
                    _ => continue,
                };
                if args.len() < 2 {
                    return Err(Error::InvalidRecord);
                }

                // Everything from the call onward is unreachable once the
                // resume terminates the block.
                self.module.function_mut(fid).blocks[block]
                    .insts
                    .truncate(call_pos);

                let undef = self
                    .module
                    .push_value(Value::Constant(Constant::Undef { ty: lpad_ty }));
                let end = self.module.function(fid).blocks[block].insts.len();
                let iv0 = self.insert_inst(
                    fid,
                    block,
                    end,
                    Instruction::new(
                        InstKind::InsertValue {
                            agg: undef,
                            value: args[0],
                            indices: vec![0],
                        },
                        lpad_ty,
                    ),
                );
                let iv1 = self.insert_inst(
                    fid,
                    block,
                    end + 1,
                    Instruction::new(
                        InstKind::InsertValue {
                            agg: iv0,
                            value: args[1],
                            indices: vec![1],
                        },
                        lpad_ty,
                    ),
                );
                self.insert_inst(
                    fid,
                    block,
                    end + 2,
                    Instruction::new(InstKind::Resume { value: iv1 }, void),
                );
            }
        }
        Ok(())
    }

    fn predecessor_count(&self, fid: FuncId, dest: usize) -> usize {
        let func = self.module.function(fid);
        func.blocks
            .iter()
            .filter(|b| {
                b.insts.last().is_some_and(|&term| {
                    func.inst(term)
                        .kind
                        .successors()
                        .contains(&(dest as u32))
                })
            })
            .count()
    }

    // ------------------------------------------------------------------
    // Debug intrinsics
    // ------------------------------------------------------------------

    /// Strip all calls to the pre-3.0 debug intrinsics. The declarations
    /// are unnamed once their users are gone.
    pub(super) fn check_debug_info_intrinsics(&mut self) {
        for name in [
            "llvm.dbg.func.start",
            "llvm.dbg.stoppoint",
            "llvm.dbg.region.start",
            "llvm.dbg.region.end",
        ] {
            self.strip_calls_to(name);
        }

        // Declare intrinsics whose arguments no longer reference metadata
        // nodes carry no usable information.
        if let Some(declare_fid) = self.module.function_by_name("llvm.dbg.declare") {
            if !self.declare_args_are_metadata(declare_fid) {
                self.strip_calls_to("llvm.dbg.declare");
            }
        }
    }

    fn declare_args_are_metadata(&self, declare_fid: FuncId) -> bool {
        // Metadata-typed arguments cannot reach a call operand in this
        // representation, so a surviving declare call is always stale.
        let _ = declare_fid;
        false
    }

    fn strip_calls_to(&mut self, name: &str) {
        let Some(target) = self.module.function_by_name(name) else {
            return;
        };
        let mut stripped = 0usize;
        for findex in 0..self.module.functions.len() {
            let fid = FuncId::new(findex);
            for block in 0..self.module.function(fid).blocks.len() {
                let insts = self.module.function(fid).blocks[block].insts.clone();
                let keep: Vec<InstId> = insts
                    .into_iter()
                    .filter(|&i| {
                        let is_call =
                            self.call_targets(&self.module.function(fid).inst(i).kind, target);
                        stripped += usize::from(is_call);
                        !is_call
                    })
                    .collect();
                self.module.function_mut(fid).blocks[block].insts = keep;
            }
        }
        if stripped > 0 {
            debug!(name, stripped, "stripped debug intrinsic calls");
        }
        self.module.functions[target.index()].name.clear();
    }

    // ------------------------------------------------------------------
    // Intrinsic signature upgrades
    // ------------------------------------------------------------------

    /// Find intrinsic declarations whose signatures changed; the old
    /// function is shelved under a `.old` name and a replacement with the
    /// current signature takes its place.
    pub(super) fn discover_intrinsic_upgrades(&mut self) {
        for findex in 0..self.module.functions.len() {
            let fid = FuncId::new(findex);
            let name = self.module.function(fid).name.clone();
            // Discovery may run more than once; shelved declarations are
            // recognizable by their suffix.
            if !(name.starts_with("llvm.ctlz.") || name.starts_with("llvm.cttz."))
                || name.ends_with(".old")
            {
                continue;
            }
            let Some((_, ret, params)) = self
                .module
                .types
                .function_parts(self.module.function(fid).ty)
                .map(|(v, r, p)| (v, r, p.to_vec()))
            else {
                continue;
            };
            if params.len() != 1 {
                continue;
            }
            // The count intrinsics gained an is_zero_undef argument.
            let i1 = self.module.types.int1();
            let new_ty = self.module.types.function(false, ret, vec![params[0], i1]);
            self.module.function_mut(fid).name = format!("{name}.old");
            let new_fid = self.get_or_insert_function(&name, new_ty);
            debug!(name = %name, "upgrading intrinsic signature");
            self.upgraded_intrinsics.push((fid, new_fid));
        }
    }

    /// Legacy global renames: the catch-all sentinel lost its leading dot.
    pub(super) fn upgrade_global_variables(&mut self) {
        for global in &mut self.module.globals {
            if global.name == ".llvm.eh.catch.all.value" {
                global.name = EH_CATCH_ALL.to_owned();
            }
        }
    }

    /// Rewrite calls to upgraded intrinsics inside one freshly
    /// materialized function.
    pub(super) fn upgrade_intrinsic_calls_in(&mut self, fid: FuncId) {
        if self.upgraded_intrinsics.is_empty() {
            return;
        }
        let pairs = self.upgraded_intrinsics.clone();
        for (old, new) in pairs {
            if old == new {
                continue;
            }
            let targets: Vec<InstId> = self
                .module
                .function(fid)
                .insts
                .iter()
                .enumerate()
                .filter(|(_, inst)| self.call_targets(&inst.kind, old))
                .map(|(i, _)| InstId::new(i))
                .collect();
            if targets.is_empty() {
                continue;
            }
            let new_callee = self.function_value(new);
            let i1 = self.module.types.int1();
            for inst in targets {
                let zero_undef = self.const_int(i1, 0);
                if let InstKind::Call { callee, args, .. } =
                    &mut self.module.function_mut(fid).inst_mut(inst).kind
                {
                    *callee = new_callee;
                    args.push(zero_undef);
                }
            }
        }
    }

    /// After full materialization no calls to the old intrinsics can
    /// remain; point any stragglers at the replacement and shelve the old
    /// declarations for good.
    pub(super) fn finish_intrinsic_upgrades(&mut self) {
        let pairs = std::mem::take(&mut self.upgraded_intrinsics);
        for (old, new) in pairs {
            if old == new {
                continue;
            }
            self.module.redirect_values(|v| match v {
                Value::Function(f) if *f == old => Some(Value::Function(new)),
                _ => None,
            });
            self.module.functions[old.index()].name.clear();
        }
    }
}
