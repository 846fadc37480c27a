//! Tensor pack: the operator/caller memory contract
//!
//! Operators never own their operands. The caller binds tensors into a
//! [`TensorPack`] keyed by semantic [`SlotId`] and rebinds them on every
//! `run()`; `prepare()`/`run()` look operands and scratch buffers up by slot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CuantizarError, Result};
use crate::tensor::Tensor;

/// Semantic slot identifiers for tensors bound into a pack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotId {
    /// First operand (LHS matrix)
    Lhs,
    /// Second operand (RHS matrix / weights)
    Rhs,
    /// Optional bias vector (length N)
    Bias,
    /// Destination tensor
    Dst,
    /// Per-row LHS sum scratch (i32, length M)
    RowSumScratch,
    /// Per-column RHS sum scratch (i32, length N)
    ColSumScratch,
    /// Interleaved LHS scratch
    PackedLhs,
    /// Transposed/tiled RHS scratch
    PackedRhs,
}

/// Mapping from semantic slot to tensor handles
///
/// Const and mutable bindings live in separate tables; a mutable binding can
/// be read through [`TensorPack::get_const`] but a const binding can never be
/// written. Mutable handles are removed with [`TensorPack::take_mut`] while in
/// use so disjoint slots can be written without aliasing.
#[derive(Default)]
pub struct TensorPack<'a> {
    consts: HashMap<SlotId, &'a Tensor>,
    muts: HashMap<SlotId, &'a mut Tensor>,
}

impl<'a> TensorPack<'a> {
    /// Create an empty pack
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a read-only tensor to a slot
    pub fn bind_const(&mut self, slot: SlotId, tensor: &'a Tensor) -> &mut Self {
        self.consts.insert(slot, tensor);
        self
    }

    /// Bind a writable tensor to a slot
    pub fn bind(&mut self, slot: SlotId, tensor: &'a mut Tensor) -> &mut Self {
        self.muts.insert(slot, tensor);
        self
    }

    /// Whether any tensor is bound to the slot
    #[must_use]
    pub fn contains(&self, slot: SlotId) -> bool {
        self.consts.contains_key(&slot) || self.muts.contains_key(&slot)
    }

    /// Read-only access to the tensor bound at a slot
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::MissingWorkspace`] if the slot is unbound.
    pub fn get_const(&self, slot: SlotId) -> Result<&Tensor> {
        if let Some(t) = self.consts.get(&slot) {
            return Ok(t);
        }
        if let Some(t) = self.muts.get(&slot) {
            return Ok(t);
        }
        Err(CuantizarError::MissingWorkspace { slot })
    }

    /// Remove and return the writable tensor bound at a slot
    ///
    /// The handle is moved out of the pack so further writes to other slots
    /// cannot alias it; rebind it with [`TensorPack::bind`] when done.
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::MissingWorkspace`] if no writable tensor is
    /// bound at the slot.
    pub fn take_mut(&mut self, slot: SlotId) -> Result<&'a mut Tensor> {
        self.muts
            .remove(&slot)
            .ok_or(CuantizarError::MissingWorkspace { slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;
    use crate::types::{DataType, TensorDescriptor};

    fn s32(n: usize) -> Tensor {
        Tensor::zeroed(TensorDescriptor::new(vec![n], DataType::S32))
    }

    #[test]
    fn test_bind_and_lookup() {
        let a = s32(4);
        let mut d = s32(4);
        let mut pack = TensorPack::new();
        pack.bind_const(SlotId::Lhs, &a);
        pack.bind(SlotId::Dst, &mut d);

        assert!(pack.contains(SlotId::Lhs));
        assert!(pack.contains(SlotId::Dst));
        assert!(!pack.contains(SlotId::Bias));
        assert!(pack.get_const(SlotId::Lhs).is_ok());
        // Mutable bindings are readable too
        assert!(pack.get_const(SlotId::Dst).is_ok());
    }

    #[test]
    fn test_missing_slot_errors() {
        let pack = TensorPack::new();
        let err = pack.get_const(SlotId::Rhs).unwrap_err();
        assert!(matches!(
            err,
            CuantizarError::MissingWorkspace { slot: SlotId::Rhs }
        ));
    }

    #[test]
    fn test_take_mut_removes_binding() {
        let mut d = s32(2);
        let mut pack = TensorPack::new();
        pack.bind(SlotId::Dst, &mut d);

        let dst = pack.take_mut(SlotId::Dst).unwrap();
        dst.as_i32_mut().unwrap()[0] = 7;
        assert!(pack.take_mut(SlotId::Dst).is_err());

        pack.bind(SlotId::Dst, dst);
        assert_eq!(pack.get_const(SlotId::Dst).unwrap().as_i32().unwrap()[0], 7);
    }

    #[test]
    fn test_take_mut_on_const_binding_errors() {
        let a = s32(2);
        let mut pack = TensorPack::new();
        pack.bind_const(SlotId::Lhs, &a);
        assert!(pack.take_mut(SlotId::Lhs).is_err());
    }

    #[test]
    fn test_rebinding_replaces() {
        let a = s32(2);
        let b = s32(3);
        let mut pack = TensorPack::new();
        pack.bind_const(SlotId::Lhs, &a);
        pack.bind_const(SlotId::Lhs, &b);
        assert_eq!(
            pack.get_const(SlotId::Lhs)
                .unwrap()
                .descriptor()
                .num_elements(),
            3
        );
    }
}
