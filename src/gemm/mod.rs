//! Quantized GEMM pipeline: descriptors, reductions, reshape, kernels,
//! output stage, and the operator that orchestrates them

pub mod info;
pub mod kernel;
pub mod operator;
pub mod output_stage;
pub mod reduction;
pub mod reshape;

pub use info::{GemmInfo, OutputStageInfo, OutputStageKind, OverflowPolicy};
pub use kernel::{GenericKernel, KernelArgs, MatMulShape, MicroKernel, PackedKernel, QuantView};
pub use operator::QuantizedMatMulOperator;
pub use output_stage::OutputStage;
