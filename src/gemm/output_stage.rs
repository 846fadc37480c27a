//! Output stage: requantize an i32 accumulator into the target type
//!
//! Three multiplier encodings (see [`OutputStageKind`]):
//!
//! 1. `QuantizeDown`: plain integer multiply + arithmetic right shift.
//! 2. `QuantizeDownFixedPoint`: multiply by a Q31 fixed-point multiplier
//!    (`m / 2^31`, saturating rounding doubling high mul), then round half
//!    up by adding `2^(shift-1)` before an arithmetic right shift. A
//!    negative shift means a pre-multiply left shift.
//! 3. `QuantizeDownFloat`: widen to f32, multiply by a real scale ratio,
//!    round to nearest.
//!
//! The post-shift offset is added last, then the value saturates into
//! `[min, max]` intersected with the target type's representable range. The
//! clamp is how fused ReLU / bounded ReLU is expressed. Per-channel stages
//! broadcast multiplier/shift entry `k` over every row of column `k`.

use crate::error::Result;
use crate::gemm::info::{OutputStageInfo, OutputStageKind};
use crate::types::DataType;

/// Saturating rounding doubling high multiply: `(a * b * 2) / 2^32`, rounded
///
/// The Q31 fixed-point primitive: multiplying by `m` here scales by
/// `m / 2^31`. The single overflow case (`i32::MIN * i32::MIN`) saturates.
#[inline]
#[must_use]
pub fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }
    let ab = i64::from(a) * i64::from(b);
    let nudge = if ab >= 0 { 1i64 << 30 } else { 1 - (1i64 << 30) };
    ((ab + nudge) / (1i64 << 31)) as i32
}

/// Arithmetic right shift with round-half-up (`+ 2^(exp-1)` before the shift)
#[inline]
#[must_use]
pub fn rounding_right_shift(value: i32, exponent: u32) -> i32 {
    if exponent == 0 {
        return value;
    }
    let rounding = 1i64 << (exponent - 1);
    ((i64::from(value) + rounding) >> exponent) as i32
}

/// Q31 fixed-point requantization of one value (no offset, no clamp)
#[inline]
#[must_use]
pub fn multiply_by_quantized_multiplier(value: i32, multiplier: i32, shift: i32) -> i32 {
    if shift < 0 {
        // Pre-multiply left shift, saturated into i32 before the high mul
        let shifted = (i64::from(value) << (-shift) as u32)
            .clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        saturating_rounding_doubling_high_mul(shifted, multiplier)
    } else {
        rounding_right_shift(
            saturating_rounding_doubling_high_mul(value, multiplier),
            shift as u32,
        )
    }
}

/// Configured output stage, ready to requantize accumulator values
///
/// Built once at configure time; the saturation bounds are pre-intersected
/// with the target type's representable range.
#[derive(Debug, Clone)]
pub struct OutputStage {
    info: OutputStageInfo,
    min: i32,
    max: i32,
}

impl OutputStage {
    /// Validate the descriptor and build the stage
    ///
    /// # Errors
    ///
    /// Propagates [`OutputStageInfo::validate`] failures.
    pub fn new(info: OutputStageInfo, num_channels: usize) -> Result<Self> {
        info.validate(num_channels)?;
        let (mut min, mut max) = (info.min, info.max);
        if let Some((lo, hi)) = info.output_type.quantized_range() {
            min = min.max(lo);
            max = max.min(hi);
        }
        Ok(Self { info, min, max })
    }

    /// The stage kind
    #[must_use]
    pub fn kind(&self) -> OutputStageKind {
        self.info.kind
    }

    /// The target element type
    #[must_use]
    pub fn output_type(&self) -> DataType {
        self.info.output_type
    }

    #[inline]
    fn per_channel_index(len: usize, channel: usize) -> usize {
        if len > 1 {
            channel
        } else {
            0
        }
    }

    /// Requantize one bias-corrected accumulator value for output channel
    /// `channel`, returning the clamped integer result
    #[inline]
    #[must_use]
    pub fn quantize(&self, value: i32, channel: usize) -> i32 {
        let scaled = match self.info.kind {
            OutputStageKind::None => value,
            OutputStageKind::QuantizeDown => {
                let m = self.info.multipliers
                    [Self::per_channel_index(self.info.multipliers.len(), channel)];
                let s = self.info.shifts[Self::per_channel_index(self.info.shifts.len(), channel)];
                let wide = (i64::from(value) * i64::from(m)) >> s as u32;
                wide.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
            }
            OutputStageKind::QuantizeDownFixedPoint => {
                let m = self.info.multipliers
                    [Self::per_channel_index(self.info.multipliers.len(), channel)];
                let s = self.info.shifts[Self::per_channel_index(self.info.shifts.len(), channel)];
                multiply_by_quantized_multiplier(value, m, s)
            }
            OutputStageKind::QuantizeDownFloat => {
                let m = self.info.real_multipliers
                    [Self::per_channel_index(self.info.real_multipliers.len(), channel)];
                (value as f32 * m).round() as i32
            }
        };
        scaled.saturating_add(self.info.offset).clamp(self.min, self.max)
    }

    /// Dequantize path for an F32 destination: scale without re-quantizing
    #[inline]
    #[must_use]
    pub fn dequantize(&self, value: i32, channel: usize) -> f32 {
        let m = self.info.real_multipliers
            [Self::per_channel_index(self.info.real_multipliers.len(), channel)];
        value as f32 * m
    }
}
