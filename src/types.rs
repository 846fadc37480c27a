//! Core data types: element types, quantization descriptors, tensor descriptors
//!
//! Quantization follows the asymmetric convention
//! `real = scale * (quantized + zero_point)`: the zero point is *added* to the
//! raw value. Per-channel quantization carries one scale per output channel
//! with the zero point fixed at 0.

use serde::{Deserialize, Serialize};

use crate::error::{CuantizarError, Result};

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Asymmetric quantized unsigned 8-bit
    QAsymmU8,
    /// Asymmetric quantized signed 8-bit
    QAsymmS8,
    /// Symmetric signed 8-bit with per-channel scales (zero point 0)
    QSymmS8PerChannel,
    /// Symmetric signed 16-bit
    QSymmS16,
    /// Signed 32-bit integer (accumulator)
    S32,
    /// 32-bit float (dequantized output)
    F32,
}

impl DataType {
    /// Size of one element in bytes
    #[must_use]
    pub fn size_bytes(self) -> usize {
        match self {
            Self::QAsymmU8 | Self::QAsymmS8 | Self::QSymmS8PerChannel => 1,
            Self::QSymmS16 => 2,
            Self::S32 | Self::F32 => 4,
        }
    }

    /// Whether this is a quantized (narrow integer) type
    #[must_use]
    pub fn is_quantized(self) -> bool {
        matches!(
            self,
            Self::QAsymmU8 | Self::QAsymmS8 | Self::QSymmS8PerChannel | Self::QSymmS16
        )
    }

    /// Representable range of the quantized type, as i32 bounds
    ///
    /// Returns `None` for non-quantized types.
    #[must_use]
    pub fn quantized_range(self) -> Option<(i32, i32)> {
        match self {
            Self::QAsymmU8 => Some((0, 255)),
            Self::QAsymmS8 | Self::QSymmS8PerChannel => Some((-128, 127)),
            Self::QSymmS16 => Some((-32768, 32767)),
            Self::S32 | Self::F32 => None,
        }
    }
}

/// Scale and zero-point pair describing an asymmetric quantization
///
/// Either per-tensor (one scale, arbitrary zero point) or per-channel (one
/// scale per output channel, zero point fixed at 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationInfo {
    scales: Vec<f32>,
    zero_point: i32,
}

impl QuantizationInfo {
    /// Per-tensor quantization with a single scale and zero point
    ///
    /// # Errors
    ///
    /// Returns an error if `scale` is not strictly positive.
    pub fn per_tensor(scale: f32, zero_point: i32) -> Result<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(CuantizarError::InvalidConfiguration {
                reason: format!("Quantization scale must be > 0, got {scale}"),
            });
        }
        Ok(Self {
            scales: vec![scale],
            zero_point,
        })
    }

    /// Per-channel quantization: one scale per output channel, zero point 0
    ///
    /// # Errors
    ///
    /// Returns an error if `scales` is empty or any scale is not > 0.
    pub fn per_channel(scales: Vec<f32>) -> Result<Self> {
        if scales.is_empty() {
            return Err(CuantizarError::InvalidConfiguration {
                reason: "Per-channel quantization requires at least one scale".to_string(),
            });
        }
        if let Some(bad) = scales.iter().find(|s| !s.is_finite() || **s <= 0.0) {
            return Err(CuantizarError::InvalidConfiguration {
                reason: format!("Quantization scale must be > 0, got {bad}"),
            });
        }
        Ok(Self {
            scales,
            zero_point: 0,
        })
    }

    /// Identity quantization (scale 1.0, zero point 0)
    #[must_use]
    pub fn none() -> Self {
        Self {
            scales: vec![1.0],
            zero_point: 0,
        }
    }

    /// The zero point (always 0 for per-channel)
    #[must_use]
    pub fn zero_point(&self) -> i32 {
        self.zero_point
    }

    /// The per-tensor scale (first scale for per-channel)
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scales[0]
    }

    /// All scales: length 1 for per-tensor, N for per-channel
    #[must_use]
    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    /// Whether this describes per-channel quantization
    #[must_use]
    pub fn is_per_channel(&self) -> bool {
        self.scales.len() > 1
    }
}

impl Default for QuantizationInfo {
    fn default() -> Self {
        Self::none()
    }
}

/// Shape, element type, and quantization of a tensor
///
/// The `locked` flag gates auto-initialization: an unlocked descriptor may
/// have its shape and type filled in by `configure()`; once locked, a
/// mismatch is a hard configuration error. The `dynamic` flag permits
/// updating quantization info between `prepare()` calls without a full
/// reconfiguration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    shape: Vec<usize>,
    data_type: DataType,
    quantization: QuantizationInfo,
    locked: bool,
    dynamic: bool,
}

impl TensorDescriptor {
    /// Create a descriptor with identity quantization
    #[must_use]
    pub fn new(shape: Vec<usize>, data_type: DataType) -> Self {
        Self {
            shape,
            data_type,
            quantization: QuantizationInfo::none(),
            locked: false,
            dynamic: false,
        }
    }

    /// Create a quantized descriptor
    #[must_use]
    pub fn quantized(shape: Vec<usize>, data_type: DataType, qinfo: QuantizationInfo) -> Self {
        Self {
            shape,
            data_type,
            quantization: qinfo,
            locked: false,
            dynamic: false,
        }
    }

    /// Mark the descriptor as locked (no further auto-initialization)
    #[must_use]
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    /// Mark the quantization info as updatable between prepare() calls
    #[must_use]
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Tensor shape, outermost dimension first
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of rows of the innermost matrix (second-to-last dimension)
    ///
    /// A 1-D shape is treated as a single row.
    #[must_use]
    pub fn rows(&self) -> usize {
        match self.shape.len() {
            0 => 0,
            1 => 1,
            n => self.shape[n - 2],
        }
    }

    /// Number of columns of the innermost matrix (last dimension)
    #[must_use]
    pub fn cols(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    /// Leading batch dimensions (everything before the innermost matrix)
    #[must_use]
    pub fn batch_dims(&self) -> &[usize] {
        let n = self.shape.len();
        if n <= 2 {
            &[]
        } else {
            &self.shape[..n - 2]
        }
    }

    /// Total number of batches (product of batch dimensions)
    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.batch_dims().iter().product::<usize>().max(1)
    }

    /// Total number of elements
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Total size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.num_elements() * self.data_type.size_bytes()
    }

    /// Element type
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Quantization info
    #[must_use]
    pub fn quantization(&self) -> &QuantizationInfo {
        &self.quantization
    }

    /// Whether the descriptor may still be auto-initialized by configure()
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Whether quantization info may be updated between prepare() calls
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Auto-initialize shape and type if still unlocked
    ///
    /// Used by `configure()` to fill in an empty destination descriptor.
    /// Locks the descriptor afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is locked and the requested
    /// shape/type disagree with the existing ones.
    pub fn auto_init(&mut self, shape: &[usize], data_type: DataType) -> Result<()> {
        if self.locked {
            if self.shape != shape || self.data_type != data_type {
                return Err(CuantizarError::InvalidConfiguration {
                    reason: format!(
                        "Descriptor locked as {:?}/{:?}, cannot reinitialize to {:?}/{:?}",
                        self.shape, self.data_type, shape, data_type
                    ),
                });
            }
            return Ok(());
        }
        self.shape = shape.to_vec();
        self.data_type = data_type;
        self.locked = true;
        Ok(())
    }

    /// Replace the quantization info
    ///
    /// # Errors
    ///
    /// Returns a precondition violation unless the descriptor was marked
    /// `dynamic` or is still unlocked.
    pub fn set_quantization(&mut self, qinfo: QuantizationInfo) -> Result<()> {
        if self.locked && !self.dynamic {
            return Err(CuantizarError::PreconditionViolation {
                reason: "Quantization info is immutable on a locked, non-dynamic descriptor"
                    .to_string(),
            });
        }
        self.quantization = qinfo;
        Ok(())
    }
}
