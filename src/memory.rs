//! Workspace declarations and scoped scratch-memory management
//!
//! Operators declare their scratch needs as a list of [`WorkspaceRequirement`]
//! entries (slot, size, lifetime). Transient buffers are acquired from a
//! shared [`MemoryGroup`] at the start of a run through a
//! [`MemoryGroupScope`]; the scope returns every buffer to the group's pool
//! when it drops, including on the error path, so peer operators in the same
//! group reuse the same scratch memory. Persistent buffers (packed weights,
//! cached column sums) are allocated once by the caller and rebound on every
//! run.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::pack::{SlotId, TensorPack};
use crate::tensor::Tensor;
use crate::types::{DataType, TensorDescriptor};

/// How long a workspace buffer must outlive a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifetime {
    /// Survives across runs (packed weights, cached reductions)
    Persistent,
    /// Valid only within one run; reclaimed when the scope ends
    Transient,
}

/// One declared scratch buffer: semantic slot, shape/type, lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceRequirement {
    /// Slot the buffer must be bound to
    pub slot: SlotId,
    /// Descriptor of the required buffer
    pub descriptor: TensorDescriptor,
    /// Required lifetime
    pub lifetime: Lifetime,
}

impl WorkspaceRequirement {
    /// Declared size in bytes
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.descriptor.size_bytes()
    }
}

/// Allocate owned tensors for every persistent requirement in a list
///
/// The caller keeps these alive across runs and rebinds them into the pack
/// on each `run()`.
#[must_use]
pub fn allocate_persistent(requirements: &[WorkspaceRequirement]) -> HashMap<SlotId, Tensor> {
    requirements
        .iter()
        .filter(|r| r.lifetime == Lifetime::Persistent)
        .map(|r| (r.slot, Tensor::zeroed(r.descriptor.clone())))
        .collect()
}

/// Pool of reusable scratch buffers shared by peer operators
///
/// Buffers are keyed by (element type, element count); a scope pops matching
/// buffers on acquisition and pushes them back on drop.
#[derive(Default)]
pub struct MemoryGroup {
    pool: Mutex<HashMap<(DataType, usize), Vec<Tensor>>>,
}

impl MemoryGroup {
    /// Create an empty group
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire all transient buffers for an operator's requirements
    ///
    /// Pooled buffers are reused when type and element count match; missing
    /// ones are allocated. The returned scope releases everything back to
    /// this group when dropped.
    #[must_use]
    pub fn acquire_scope(&self, requirements: &[WorkspaceRequirement]) -> MemoryGroupScope<'_> {
        let mut tensors = HashMap::new();
        for req in requirements
            .iter()
            .filter(|r| r.lifetime == Lifetime::Transient)
        {
            let key = (req.descriptor.data_type(), req.descriptor.num_elements());
            let recycled = self
                .pool
                .lock()
                .expect("memory group pool lock poisoned")
                .get_mut(&key)
                .and_then(Vec::pop);
            let tensor = match recycled {
                Some(mut t) => {
                    // Reused buffers keep their old contents; descriptors are
                    // refreshed so shape checks see the current operator's view.
                    *t.descriptor_mut() = req.descriptor.clone();
                    t
                }
                None => Tensor::zeroed(req.descriptor.clone()),
            };
            tensors.insert(req.slot, tensor);
        }
        MemoryGroupScope {
            group: self,
            tensors,
        }
    }

    /// Number of idle buffers currently held in the pool
    #[must_use]
    pub fn pooled_buffers(&self) -> usize {
        self.pool
            .lock()
            .expect("memory group pool lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    fn release(&self, tensors: HashMap<SlotId, Tensor>) {
        let mut pool = self.pool.lock().expect("memory group pool lock poisoned");
        for (_, t) in tensors {
            let key = (t.descriptor().data_type(), t.descriptor().num_elements());
            pool.entry(key).or_default().push(t);
        }
    }
}

/// RAII guard over one run's transient buffers
///
/// Holds the acquired tensors; [`MemoryGroupScope::bind_transient`] lends
/// them into a [`TensorPack`] for the duration of the scope.
pub struct MemoryGroupScope<'g> {
    group: &'g MemoryGroup,
    tensors: HashMap<SlotId, Tensor>,
}

impl MemoryGroupScope<'_> {
    /// Bind every acquired buffer into the pack as a writable slot
    ///
    /// The pack must not outlive this scope.
    pub fn bind_transient<'s>(&'s mut self, pack: &mut TensorPack<'s>) {
        for (slot, tensor) in &mut self.tensors {
            pack.bind(*slot, tensor);
        }
    }

    /// Number of buffers held by this scope
    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether this scope holds no buffers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

impl Drop for MemoryGroupScope<'_> {
    fn drop(&mut self) {
        self.group.release(std::mem::take(&mut self.tensors));
    }
}
