//! Error types for cuantizar
//!
//! All fallible operations return [`Result`]. `validate()` entry points are
//! pure: they never mutate state and report problems through the same error
//! type, so callers can check a shape/type combination once and cache the
//! decision.

use thiserror::Error;

use crate::pack::SlotId;

/// Error type for all cuantizar operations
#[derive(Debug, Error)]
pub enum CuantizarError {
    /// Shape mismatch or malformed shape
    #[error("Invalid shape: {reason}")]
    InvalidShape {
        /// Explanation of the shape problem
        reason: String,
    },

    /// Configuration rejected (bad descriptor combination, overflow risk, ...)
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Explanation of the configuration problem
        reason: String,
    },

    /// Operation not supported for the given data types or stage kind
    #[error("Unsupported operation: {reason}")]
    UnsupportedOperation {
        /// Explanation of what is unsupported
        reason: String,
    },

    /// Operator used out of lifecycle order (run before configure/prepare)
    #[error("Precondition violation: {reason}")]
    PreconditionViolation {
        /// Explanation of the violated precondition
        reason: String,
    },

    /// A required tensor-pack slot was not bound
    #[error("Missing workspace tensor for slot {slot:?}")]
    MissingWorkspace {
        /// Slot that was expected in the pack
        slot: SlotId,
    },

    /// A bound workspace buffer is smaller than the declared requirement
    #[error("Workspace buffer for slot {slot:?} too small: need {needed} bytes, have {actual}")]
    WorkspaceTooSmall {
        /// Slot with the undersized buffer
        slot: SlotId,
        /// Bytes required
        needed: usize,
        /// Bytes bound
        actual: usize,
    },

    /// WeightsManager operation on a tensor it does not manage
    #[error("Tensor {id} is not managed by this WeightsManager")]
    UnmanagedTensor {
        /// Handle passed by the caller
        id: u64,
    },
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, CuantizarError>;
