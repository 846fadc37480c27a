//! GEMM and output-stage descriptors
//!
//! Plain data consumed by [`crate::gemm::QuantizedMatMulOperator`]. The
//! output-stage descriptor covers three requantization encodings; multiplier
//! and shift vectors have length 1 (shared across all channels) or N (one
//! entry per output channel).

use serde::{Deserialize, Serialize};

use crate::error::{CuantizarError, Result};
use crate::types::DataType;

/// Behavior on integer overflow when narrowing the requantized value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Clamp to the representable range of the target type
    Saturate,
    /// Wrap around (two's complement); rejected for quantized targets
    Wrap,
}

/// Which requantization encoding the output stage uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStageKind {
    /// No output stage: the i32 accumulator is the result
    None,
    /// Plain integer multiplier + arithmetic right shift
    QuantizeDown,
    /// Q31 fixed-point multiplier (`m / 2^31`) + rounding shift
    QuantizeDownFixedPoint,
    /// Real (f32) multiplier with round-to-nearest
    QuantizeDownFloat,
}

/// Output stage descriptor: requantize an i32 accumulator into the target type
///
/// `result = saturate(((accum + bias) * multiplier) >>_round shift + offset, [min, max])`
///
/// The `[min, max]` clamp doubles as a fused ReLU / bounded-ReLU: no separate
/// activation pass is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputStageInfo {
    /// Requantization encoding
    pub kind: OutputStageKind,
    /// Integer multipliers (QuantizeDown / QuantizeDownFixedPoint); length 1 or N
    pub multipliers: Vec<i32>,
    /// Shifts; length 1 or N. Negative fixed-point shift = pre-multiply left shift
    pub shifts: Vec<i32>,
    /// Real multipliers (QuantizeDownFloat); length 1 or N
    pub real_multipliers: Vec<f32>,
    /// Offset added after the shift
    pub offset: i32,
    /// Lower saturation bound
    pub min: i32,
    /// Upper saturation bound
    pub max: i32,
    /// Target element type
    pub output_type: DataType,
    /// Overflow handling when narrowing
    pub overflow_policy: OverflowPolicy,
}

impl OutputStageInfo {
    /// No output stage: result stays in the i32 accumulator
    #[must_use]
    pub fn none() -> Self {
        Self {
            kind: OutputStageKind::None,
            multipliers: vec![],
            shifts: vec![],
            real_multipliers: vec![],
            offset: 0,
            min: i32::MIN,
            max: i32::MAX,
            output_type: DataType::S32,
            overflow_policy: OverflowPolicy::Saturate,
        }
    }

    /// Plain integer quantize-down stage with a shared multiplier/shift
    #[must_use]
    pub fn quantize_down(
        multiplier: i32,
        shift: i32,
        offset: i32,
        min: i32,
        max: i32,
        output_type: DataType,
    ) -> Self {
        Self {
            kind: OutputStageKind::QuantizeDown,
            multipliers: vec![multiplier],
            shifts: vec![shift],
            real_multipliers: vec![],
            offset,
            min,
            max,
            output_type,
            overflow_policy: OverflowPolicy::Saturate,
        }
    }

    /// Q31 fixed-point stage with a shared multiplier/shift
    #[must_use]
    pub fn quantize_down_fixed_point(
        multiplier: i32,
        shift: i32,
        offset: i32,
        min: i32,
        max: i32,
        output_type: DataType,
    ) -> Self {
        Self {
            kind: OutputStageKind::QuantizeDownFixedPoint,
            multipliers: vec![multiplier],
            shifts: vec![shift],
            real_multipliers: vec![],
            offset,
            min,
            max,
            output_type,
            overflow_policy: OverflowPolicy::Saturate,
        }
    }

    /// Per-channel Q31 fixed-point stage
    #[must_use]
    pub fn quantize_down_fixed_point_per_channel(
        multipliers: Vec<i32>,
        shifts: Vec<i32>,
        offset: i32,
        min: i32,
        max: i32,
        output_type: DataType,
    ) -> Self {
        Self {
            kind: OutputStageKind::QuantizeDownFixedPoint,
            multipliers,
            shifts,
            real_multipliers: vec![],
            offset,
            min,
            max,
            output_type,
            overflow_policy: OverflowPolicy::Saturate,
        }
    }

    /// Real-multiplier stage with a shared scale ratio
    #[must_use]
    pub fn quantize_down_float(
        multiplier: f32,
        offset: i32,
        min: i32,
        max: i32,
        output_type: DataType,
    ) -> Self {
        Self {
            kind: OutputStageKind::QuantizeDownFloat,
            multipliers: vec![],
            shifts: vec![],
            real_multipliers: vec![multiplier],
            offset,
            min,
            max,
            output_type,
            overflow_policy: OverflowPolicy::Saturate,
        }
    }

    /// Whether any multiplier vector carries one entry per channel
    #[must_use]
    pub fn is_per_channel(&self) -> bool {
        self.multipliers.len() > 1 || self.shifts.len() > 1 || self.real_multipliers.len() > 1
    }

    /// Validate the descriptor against the number of output channels
    ///
    /// # Errors
    ///
    /// Returns an error if the bounds are inverted, vector lengths are
    /// neither 1 nor `num_channels`, the output type is outside the stage
    /// kind's allowed family, or Wrap overflow is combined with a quantized
    /// target.
    pub fn validate(&self, num_channels: usize) -> Result<()> {
        if self.min > self.max {
            return Err(CuantizarError::InvalidConfiguration {
                reason: format!("Saturation bounds inverted: min {} > max {}", self.min, self.max),
            });
        }
        if self.overflow_policy == OverflowPolicy::Wrap && self.output_type.is_quantized() {
            return Err(CuantizarError::UnsupportedOperation {
                reason: "Wrap overflow policy is not supported for quantized output types"
                    .to_string(),
            });
        }

        let check_len = |len: usize, what: &str| -> Result<()> {
            if len == 1 || len == num_channels {
                Ok(())
            } else {
                Err(CuantizarError::InvalidConfiguration {
                    reason: format!(
                        "{what} vector length {len} must be 1 or the channel count {num_channels}"
                    ),
                })
            }
        };

        match self.kind {
            OutputStageKind::None => {
                if self.output_type != DataType::S32 {
                    return Err(CuantizarError::UnsupportedOperation {
                        reason: format!(
                            "Stage kind None requires S32 output, got {:?}",
                            self.output_type
                        ),
                    });
                }
            }
            OutputStageKind::QuantizeDown | OutputStageKind::QuantizeDownFixedPoint => {
                if !matches!(
                    self.output_type,
                    DataType::QAsymmU8 | DataType::QAsymmS8 | DataType::QSymmS16
                ) {
                    return Err(CuantizarError::UnsupportedOperation {
                        reason: format!(
                            "Integer quantize-down stages require an 8/16-bit integer output, got {:?}",
                            self.output_type
                        ),
                    });
                }
                check_len(self.multipliers.len(), "Multiplier")?;
                check_len(self.shifts.len(), "Shift")?;
                if self.kind == OutputStageKind::QuantizeDown
                    && self.shifts.iter().any(|&s| s < 0)
                {
                    return Err(CuantizarError::InvalidConfiguration {
                        reason: "Plain quantize-down shift must be non-negative".to_string(),
                    });
                }
            }
            OutputStageKind::QuantizeDownFloat => {
                if !(self.output_type.is_quantized() || self.output_type == DataType::F32) {
                    return Err(CuantizarError::UnsupportedOperation {
                        reason: format!(
                            "Float quantize-down stage requires integer or F32 output, got {:?}",
                            self.output_type
                        ),
                    });
                }
                check_len(self.real_multipliers.len(), "Real multiplier")?;
            }
        }
        Ok(())
    }
}

impl Default for OutputStageInfo {
    fn default() -> Self {
        Self::none()
    }
}

/// Top-level GEMM configuration flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GemmInfo {
    /// LHS was reshaped by the caller (rejected by validate)
    pub lhs_reshaped: bool,
    /// RHS was reshaped by the caller (rejected by validate)
    pub rhs_reshaped: bool,
    /// Pack RHS and cache its column sums once in prepare()
    pub reshape_rhs_only_on_first_run: bool,
    /// Reinterpret the output M dimension as (M/D, D); 0 disables
    pub depth_output_3d: usize,
    /// Fused output stage descriptor
    pub output_stage: OutputStageInfo,
    /// Accumulate into the existing destination (stage None only)
    pub accumulate: bool,
}

impl GemmInfo {
    /// Configuration with a fused output stage
    #[must_use]
    pub fn with_output_stage(output_stage: OutputStageInfo) -> Self {
        Self {
            output_stage,
            ..Self::default()
        }
    }
}
