//! Refcounted cache of transformed (reshaped) weights
//!
//! Several operators often share one weights tensor; each needs it in the
//! same packed layout. The [`WeightsManager`] runs a [`WeightsTransform`] at
//! most once per (tensor, transform) pair and hands out shared references to
//! the cached result.
//!
//! Registering a tensor holds one reference; every acquisition holds another.
//! A transform output re-registered through `manage` records a parent link,
//! and running a transform on the child releases the parent's reference —
//! so a reshape chain frees its intermediates as soon as the next stage has
//! consumed them. A tensor with no parent is marked unused automatically once
//! its registered transforms have run.
//!
//! Freeing is two-phase: an entry is dropped only when its reference count
//! reaches zero AND it is marked unused (explicitly via
//! [`WeightsManager::mark_as_unused`] or automatically as above). A
//! [`WeightsManager::release`] before the mark therefore never frees.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{CuantizarError, Result};
use crate::gemm::reshape::{packed_rhs_len, transpose_rhs_into};
use crate::tensor::{Buffer, Tensor};
use crate::types::{DataType, TensorDescriptor};

/// Identifies a transform type; cache entries are keyed per (tensor, uid)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformId(u64);

impl TransformId {
    /// Build an identifier from a raw value unique to the transform type
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// A weights reshape that can be cached by the manager
pub trait WeightsTransform: Send + Sync {
    /// Stable identifier of this transform type
    fn uid(&self) -> TransformId;

    /// Produce the transformed tensor from the original weights
    ///
    /// # Errors
    ///
    /// Returns an error if the weights do not fit the transform.
    fn run(&self, src: &Tensor) -> Result<Tensor>;
}

/// Handle to a tensor registered with a [`WeightsManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeightsId(u64);

struct Entry {
    original: Tensor,
    transformed: HashMap<TransformId, Arc<Tensor>>,
    refcount: usize,
    unused: bool,
    parent: Option<u64>,
}

/// Shared cache of packed weights, keyed by handle
#[derive(Default)]
pub struct WeightsManager {
    entries: Mutex<HashMap<u64, Entry>>,
    next_id: AtomicU64,
}

impl WeightsManager {
    /// Create an empty manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a weights tensor and return its handle
    ///
    /// The registration itself counts as one reference, paired with one
    /// [`WeightsManager::release`]. Pass `parent` when the tensor is the
    /// output of a prior transform; running a transform on this entry then
    /// releases the parent's reference.
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::UnmanagedTensor`] when `parent` names an
    /// entry this manager does not hold.
    pub fn manage(&self, tensor: Tensor, parent: Option<WeightsId>) -> Result<WeightsId> {
        let mut entries = self.entries.lock().expect("weights manager lock poisoned");
        if let Some(p) = parent {
            if !entries.contains_key(&p.0) {
                return Err(CuantizarError::UnmanagedTensor { id: p.0 });
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            id,
            Entry {
                original: tensor,
                transformed: HashMap::new(),
                refcount: 1,
                unused: false,
                parent: parent.map(|p| p.0),
            },
        );
        Ok(WeightsId(id))
    }

    /// Whether a handle refers to a live entry
    #[must_use]
    pub fn is_managed(&self, id: WeightsId) -> bool {
        self.entries
            .lock()
            .expect("weights manager lock poisoned")
            .contains_key(&id.0)
    }

    /// Run (or fetch the cached result of) a transform, without acquiring
    ///
    /// The first execution per (tensor, transform) pair also advances the
    /// chain bookkeeping: the parent's reference is released (freeing it at
    /// zero when marked unused), and a parentless entry is marked unused now
    /// that its registered transforms have run.
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::UnmanagedTensor`] for an unknown handle and
    /// propagates transform failures.
    pub fn run(&self, id: WeightsId, transform: &dyn WeightsTransform) -> Result<Arc<Tensor>> {
        let mut entries = self.entries.lock().expect("weights manager lock poisoned");
        let (produced, parent) = {
            let entry = entries
                .get_mut(&id.0)
                .ok_or(CuantizarError::UnmanagedTensor { id: id.0 })?;
            if let Some(cached) = entry.transformed.get(&transform.uid()) {
                return Ok(Arc::clone(cached));
            }
            let produced = Arc::new(transform.run(&entry.original)?);
            entry
                .transformed
                .insert(transform.uid(), Arc::clone(&produced));
            if entry.parent.is_none() {
                // All registered transforms have now run
                entry.unused = true;
            }
            (produced, entry.parent)
        };
        if let Some(pid) = parent {
            if let Some(p) = entries.get_mut(&pid) {
                p.refcount = p.refcount.saturating_sub(1);
                if p.refcount == 0 && p.unused {
                    entries.remove(&pid);
                }
            }
        } else if entries.get(&id.0).is_some_and(|e| e.refcount == 0) {
            entries.remove(&id.0);
        }
        Ok(produced)
    }

    /// Acquire the transformed weights for an operator: cache + refcount
    ///
    /// Pair every acquisition with one [`WeightsManager::release`].
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::UnmanagedTensor`] for an unknown handle and
    /// propagates transform failures.
    pub fn acquire(&self, id: WeightsId, transform: &dyn WeightsTransform) -> Result<Arc<Tensor>> {
        {
            let mut entries = self.entries.lock().expect("weights manager lock poisoned");
            let entry = entries
                .get_mut(&id.0)
                .ok_or(CuantizarError::UnmanagedTensor { id: id.0 })?;
            entry.refcount += 1;
        }
        match self.run(id, transform) {
            Ok(t) => Ok(t),
            Err(e) => {
                let mut entries = self.entries.lock().expect("weights manager lock poisoned");
                if let Some(entry) = entries.get_mut(&id.0) {
                    entry.refcount = entry.refcount.saturating_sub(1);
                }
                Err(e)
            }
        }
    }

    /// Flag the weights as no longer needed once all holders release
    ///
    /// Frees the entry immediately when nothing holds it.
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::UnmanagedTensor`] for an unknown handle.
    pub fn mark_as_unused(&self, id: WeightsId) -> Result<()> {
        let mut entries = self.entries.lock().expect("weights manager lock poisoned");
        let entry = entries
            .get_mut(&id.0)
            .ok_or(CuantizarError::UnmanagedTensor { id: id.0 })?;
        entry.unused = true;
        if entry.refcount == 0 {
            entries.remove(&id.0);
        }
        Ok(())
    }

    /// Drop one reference; frees the entry when it hits zero while unused
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::UnmanagedTensor`] for an unknown handle and
    /// a precondition violation when releasing more than was held.
    pub fn release(&self, id: WeightsId) -> Result<()> {
        let mut entries = self.entries.lock().expect("weights manager lock poisoned");
        let entry = entries
            .get_mut(&id.0)
            .ok_or(CuantizarError::UnmanagedTensor { id: id.0 })?;
        if entry.refcount == 0 {
            return Err(CuantizarError::PreconditionViolation {
                reason: "Released weights that were never acquired".to_string(),
            });
        }
        entry.refcount -= 1;
        if entry.refcount == 0 && entry.unused {
            entries.remove(&id.0);
        }
        Ok(())
    }

    /// Number of live entries
    #[must_use]
    pub fn managed_count(&self) -> usize {
        self.entries
            .lock()
            .expect("weights manager lock poisoned")
            .len()
    }
}

/// Packs a `k x n` RHS into the tiled layout consumed by the packed kernel
#[derive(Debug, Clone, Copy)]
pub struct RhsPackTransform;

impl WeightsTransform for RhsPackTransform {
    fn uid(&self) -> TransformId {
        TransformId::new(0x5248_5350)
    }

    fn run(&self, src: &Tensor) -> Result<Tensor> {
        let (k, n) = (src.descriptor().rows(), src.descriptor().cols());
        let plen = packed_rhs_len(k, n);
        let descriptor = TensorDescriptor::quantized(
            vec![plen],
            src.descriptor().data_type(),
            src.descriptor().quantization().clone(),
        )
        .locked();
        match src.descriptor().data_type() {
            DataType::QAsymmU8 => {
                let mut out = vec![0u8; plen];
                transpose_rhs_into(src.as_u8()?, k, n, &mut out)?;
                Tensor::new(descriptor, Buffer::U8(out))
            }
            DataType::QAsymmS8 | DataType::QSymmS8PerChannel => {
                let mut out = vec![0i8; plen];
                transpose_rhs_into(src.as_i8()?, k, n, &mut out)?;
                Tensor::new(descriptor, Buffer::I8(out))
            }
            other => Err(CuantizarError::UnsupportedOperation {
                reason: format!("Cannot pack weights of type {other:?}"),
            }),
        }
    }
}
