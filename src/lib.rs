//! # Cuantizar
//!
//! CPU execution pipeline for quantized (asymmetric integer) matrix
//! multiplication: 8-bit operands, i32 accumulation, fused requantization
//! into the destination type.
//!
//! Cuantizar (Spanish: "to quantize") follows the offset-decomposition
//! approach: the hot loop multiplies raw quantized values only, and the
//! zero-point cross terms are recovered afterwards from precomputed row and
//! column sums. Operators are configured once against tensor descriptors and
//! then run repeatedly against buffers bound in a [`TensorPack`], so the
//! heavy weight reshaping can happen a single time for many inferences.
//!
//! ## Example
//!
//! ```rust
//! use cuantizar::{
//!     Buffer, DataType, GemmInfo, QuantizedMatMulOperator, Scheduler, SlotId, Tensor,
//!     TensorDescriptor, TensorPack,
//! };
//!
//! let lhs = Tensor::new(
//!     TensorDescriptor::new(vec![2, 3], DataType::QAsymmU8).locked(),
//!     Buffer::U8(vec![1, 2, 3, 4, 5, 6]),
//! )
//! .unwrap();
//! let rhs = Tensor::new(
//!     TensorDescriptor::new(vec![3, 2], DataType::QAsymmU8).locked(),
//!     Buffer::U8(vec![1, 0, 0, 1, 1, 1]),
//! )
//! .unwrap();
//!
//! let mut dst_desc = TensorDescriptor::new(vec![], DataType::S32);
//! let mut op = QuantizedMatMulOperator::configure(
//!     lhs.descriptor(),
//!     rhs.descriptor(),
//!     None,
//!     &mut dst_desc,
//!     GemmInfo::default(),
//! )
//! .unwrap();
//!
//! let mut dst = Tensor::zeroed(dst_desc);
//! let mut scratch: Vec<(SlotId, Tensor)> = op
//!     .workspace()
//!     .iter()
//!     .map(|r| (r.slot, Tensor::zeroed(r.descriptor.clone())))
//!     .collect();
//!
//! let scheduler = Scheduler::new(2).unwrap();
//! let mut pack = TensorPack::new();
//! pack.bind_const(SlotId::Lhs, &lhs);
//! pack.bind_const(SlotId::Rhs, &rhs);
//! pack.bind(SlotId::Dst, &mut dst);
//! for (slot, t) in &mut scratch {
//!     pack.bind(*slot, t);
//! }
//! op.run(&scheduler, &mut pack).unwrap();
//! assert_eq!(dst.as_i32().unwrap(), &[4, 5, 10, 11]);
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_wrap)] // i32 -> narrow casts follow a saturating clamp
#![allow(clippy::cast_possible_truncation)] // i64 -> i32 after explicit clamping
#![allow(clippy::cast_sign_loss)] // clamped values are in the unsigned range
#![allow(clippy::cast_precision_loss)] // i32 -> f32 in the dequantize path
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::missing_panics_doc)] // Lock poisoning is the only panic source
#![allow(clippy::uninlined_format_args)] // Prefer explicit format args

pub mod error;
pub mod gemm;
pub mod memory;
pub mod pack;
pub mod scheduler;
pub mod tensor;
pub mod types;
pub mod weights;

pub use error::{CuantizarError, Result};
pub use gemm::{
    GemmInfo, GenericKernel, MatMulShape, MicroKernel, OutputStage, OutputStageInfo,
    OutputStageKind, OverflowPolicy, PackedKernel, QuantizedMatMulOperator,
};
pub use memory::{allocate_persistent, Lifetime, MemoryGroup, MemoryGroupScope, WorkspaceRequirement};
pub use pack::{SlotId, TensorPack};
pub use scheduler::{Scheduler, Window};
pub use tensor::{Buffer, Tensor};
pub use types::{DataType, QuantizationInfo, TensorDescriptor};
pub use weights::{RhsPackTransform, TransformId, WeightsId, WeightsManager, WeightsTransform};
