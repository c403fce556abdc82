use crate::ir::{MdId, Metadata, Module, TypeId, Value, ValueId};
use crate::{Error, Result};

/// Index-addressed table of module and function values. Slots referenced
/// before definition hold placeholder values; `assign` redirects the
/// placeholder when the real value arrives.
#[derive(Debug, Default)]
pub struct ValueTable {
    slots: Vec<Option<ValueId>>,
    /// Pending `(placeholder, slot index)` pairs, bulk-processed when a
    /// constants block ends.
    resolve_constants: Vec<(ValueId, usize)>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> Option<ValueId> {
        self.slots.get(index).copied().flatten()
    }

    pub fn last(&self) -> Option<ValueId> {
        self.slots.last().copied().flatten()
    }

    pub fn push(&mut self, value: ValueId) {
        self.slots.push(Some(value));
    }

    /// Truncate to `n` entries, freeing function-local slots.
    pub fn shrink_to(&mut self, n: usize) {
        self.slots.truncate(n);
    }

    /// Install `value` at `index`. A constant placeholder in the slot is
    /// queued for bulk resolution; a synthetic argument is redirected
    /// immediately, which rewrites every use at once.
    pub fn assign(&mut self, module: &mut Module, value: ValueId, index: usize) {
        if index == self.slots.len() {
            self.slots.push(Some(value));
            return;
        }
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        match self.slots[index] {
            None => self.slots[index] = Some(value),
            Some(old) => {
                if module.value_slot(old).is_constant() {
                    self.resolve_constants.push((old, index));
                } else {
                    *module.value_slot_mut(old) = Value::Forward(value);
                }
                self.slots[index] = Some(value);
            }
        }
    }

    /// Reference slot `index` from a constant context, creating a typed
    /// constant placeholder if the slot is empty.
    pub fn get_constant_fwdref(
        &mut self,
        module: &mut Module,
        index: usize,
        ty: TypeId,
    ) -> ValueId {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        if let Some(v) = self.slots[index] {
            debug_assert_eq!(
                module.value_type(v),
                ty,
                "type mismatch in constant table"
            );
            return v;
        }
        let v = module.push_value(Value::ConstantPlaceholder { ty });
        self.slots[index] = Some(v);
        v
    }

    /// Reference slot `index` from a value context. With no type to give a
    /// placeholder, an empty slot is an invalid reference.
    pub fn get_value_fwdref(
        &mut self,
        module: &mut Module,
        index: usize,
        ty: Option<TypeId>,
    ) -> Result<ValueId> {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        if let Some(v) = self.slots[index] {
            return Ok(v);
        }
        let Some(ty) = ty else {
            return Err(Error::InvalidRecord);
        };
        let v = module.push_value(Value::SyntheticArg { ty });
        self.slots[index] = Some(v);
        Ok(v)
    }

    /// Bulk-resolve queued constant placeholders. Pairs are sorted by
    /// placeholder id so nested lookups are a binary search away, then
    /// processed from the back; each placeholder slot becomes a forward
    /// link to the real value, resolving every user in one step.
    pub fn resolve_constant_forward_refs(&mut self, module: &mut Module) -> Result<()> {
        self.resolve_constants.sort_unstable();
        while let Some((placeholder, index)) = self.resolve_constants.pop() {
            let real = self
                .get(index)
                .ok_or(Error::InvalidConstantReference)?;
            if module.resolve(real) == placeholder {
                return Err(Error::InvalidConstantReference);
            }
            *module.value_slot_mut(placeholder) = Value::Forward(real);
        }
        Ok(())
    }

    /// Whether any placeholders remain queued.
    pub fn has_pending_constants(&self) -> bool {
        !self.resolve_constants.is_empty()
    }
}

/// Parallel table for metadata nodes, with temporary-node placeholders.
#[derive(Debug, Default)]
pub struct MetadataTable {
    slots: Vec<Option<MdId>>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn shrink_to(&mut self, n: usize) {
        self.slots.truncate(n);
    }

    pub fn assign(&mut self, module: &mut Module, md: MdId, index: usize) {
        if index == self.slots.len() {
            self.slots.push(Some(md));
            return;
        }
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        match self.slots[index] {
            None => self.slots[index] = Some(md),
            Some(old) => {
                *module.metadata_slot_mut(old) = Metadata::Forward(md);
                self.slots[index] = Some(md);
            }
        }
    }

    /// Reference slot `index`, creating a temporary node if empty.
    pub fn get_fwdref(&mut self, module: &mut Module, index: usize) -> MdId {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        if let Some(md) = self.slots[index] {
            return md;
        }
        let md = module.push_metadata(Metadata::Temporary);
        self.slots[index] = Some(md);
        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Constant;

    #[test]
    fn assign_resolves_synthetic_argument() {
        let mut module = Module::new();
        let mut table = ValueTable::new();
        let ty = module.types.int32();

        let placeholder = table
            .get_value_fwdref(&mut module, 0, Some(ty))
            .expect("typed fwdref");
        let real = module.push_value(Value::Constant(Constant::Int { ty, value: 7 }));
        table.assign(&mut module, real, 0);

        assert_eq!(module.resolve(placeholder), real);
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn untyped_fwdref_is_invalid() {
        let mut module = Module::new();
        let mut table = ValueTable::new();
        assert!(table.get_value_fwdref(&mut module, 3, None).is_err());
    }

    #[test]
    fn constant_fwdrefs_bulk_resolve() {
        let mut module = Module::new();
        let mut table = ValueTable::new();
        let ty = module.types.int32();

        // Slot 1 referenced before definition, then defined.
        let ph = table.get_constant_fwdref(&mut module, 1, ty);
        let real = module.push_value(Value::Constant(Constant::Int { ty, value: 42 }));
        table.assign(&mut module, real, 1);
        table.resolve_constant_forward_refs(&mut module).unwrap();

        assert_eq!(module.resolve(ph), real);
        match module.value(ph) {
            Value::Constant(Constant::Int { value: 42, .. }) => {}
            other => panic!("placeholder did not resolve: {other:?}"),
        }
    }

    #[test]
    fn unresolved_constant_fwdref_is_an_error() {
        let mut module = Module::new();
        let mut table = ValueTable::new();
        let ty = module.types.int32();

        let ph = table.get_constant_fwdref(&mut module, 0, ty);
        // Queue the pair by assigning over the placeholder, then empty the
        // slot to simulate a reference past the end of the block.
        let real = module.push_value(Value::Constant(Constant::Int { ty, value: 1 }));
        table.assign(&mut module, real, 0);
        table.shrink_to(0);
        let _ = ph;
        assert!(table.resolve_constant_forward_refs(&mut module).is_err());
    }
}
