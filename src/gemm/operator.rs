//! Quantized matrix-multiply operator
//!
//! Two-phase lifecycle: [`QuantizedMatMulOperator::configure`] validates the
//! descriptor combination, auto-initializes the destination, probes a kernel
//! strategy, and publishes workspace requirements. [`QuantizedMatMulOperator::run`]
//! executes against tensors bound in a [`TensorPack`]; the first run (or an
//! explicit [`QuantizedMatMulOperator::prepare`]) performs the one-time RHS
//! reshape and column-sum caching when `reshape_rhs_only_on_first_run` is set.
//!
//! The integer core computes `sum_j a[i][j] * b[j][k]` only; zero-point
//! corrections are folded in afterwards from precomputed reductions:
//!
//! ```text
//! out[i][k] = raw[i][k]
//!           + a_off * col_sum[k] + b_off * row_sum[i] + K * a_off * b_off
//!           + bias[k]
//! ```
//!
//! then the output stage requantizes into the destination type in the same
//! pass, so the i32 accumulator never round-trips through memory. Zero points
//! are re-read from the bound descriptors on every run, so `dynamic`
//! descriptors may update their quantization between runs without a
//! reconfiguration.

use crate::error::{CuantizarError, Result};
use crate::gemm::info::{GemmInfo, OutputStageKind};
use crate::gemm::kernel::{GenericKernel, KernelArgs, MatMulShape, MicroKernel, PackedKernel, QuantView};
use crate::gemm::output_stage::OutputStage;
use crate::gemm::reduction::{col_sums_into, row_sums_into};
use crate::gemm::reshape::{
    interleave_lhs_into, packed_lhs_len, packed_rhs_len, transpose_rhs_into,
};
use crate::memory::{Lifetime, WorkspaceRequirement};
use crate::pack::{SlotId, TensorPack};
use crate::scheduler::Scheduler;
use crate::tensor::Tensor;
use crate::types::{DataType, TensorDescriptor};

/// Configured quantized GEMM: `dst = requantize(lhs * rhs + bias)`
pub struct QuantizedMatMulOperator {
    shape: MatMulShape,
    batches: usize,
    rhs_batches: usize,
    lhs_type: DataType,
    rhs_type: DataType,
    out_type: DataType,
    info: GemmInfo,
    has_bias: bool,
    stage: OutputStage,
    kernel: Box<dyn MicroKernel>,
    use_packed: bool,
    requirements: Vec<WorkspaceRequirement>,
    is_prepared: bool,
}

impl QuantizedMatMulOperator {
    /// Static validation of a descriptor combination
    ///
    /// Pure: never mutates state, so callers can probe support before
    /// committing to a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported type combinations, mismatched inner
    /// dimensions, broken batch broadcasting, a malformed output stage, or an
    /// accumulator that could overflow i32 at the configured depth.
    pub fn validate(
        lhs: &TensorDescriptor,
        rhs: &TensorDescriptor,
        bias: Option<&TensorDescriptor>,
        dst: Option<&TensorDescriptor>,
        info: &GemmInfo,
    ) -> Result<()> {
        if info.lhs_reshaped || info.rhs_reshaped {
            return Err(CuantizarError::UnsupportedOperation {
                reason: "Pre-reshaped operands are not supported; reshaping is internal"
                    .to_string(),
            });
        }
        if !matches!(lhs.data_type(), DataType::QAsymmU8 | DataType::QAsymmS8) {
            return Err(CuantizarError::UnsupportedOperation {
                reason: format!("LHS must be an 8-bit asymmetric type, got {:?}", lhs.data_type()),
            });
        }
        if !matches!(
            rhs.data_type(),
            DataType::QAsymmU8 | DataType::QAsymmS8 | DataType::QSymmS8PerChannel
        ) {
            return Err(CuantizarError::UnsupportedOperation {
                reason: format!("RHS must be an 8-bit quantized type, got {:?}", rhs.data_type()),
            });
        }

        let (m, k, n) = (lhs.rows(), lhs.cols(), rhs.cols());
        if m == 0 || k == 0 || n == 0 {
            return Err(CuantizarError::InvalidShape {
                reason: format!("Degenerate problem size {m} x {k} x {n}"),
            });
        }
        if rhs.rows() != k {
            return Err(CuantizarError::InvalidShape {
                reason: format!("LHS columns ({k}) != RHS rows ({})", rhs.rows()),
            });
        }
        let batches = lhs.num_batches();
        let rhs_batches = rhs.num_batches();
        if rhs_batches != 1 && rhs_batches != batches {
            return Err(CuantizarError::InvalidShape {
                reason: format!(
                    "RHS has {rhs_batches} batches, LHS has {batches}; RHS must have 1 or match"
                ),
            });
        }

        if rhs.data_type() == DataType::QSymmS8PerChannel {
            if rhs.quantization().zero_point() != 0 {
                return Err(CuantizarError::InvalidConfiguration {
                    reason: "Per-channel RHS quantization requires a zero point of 0".to_string(),
                });
            }
            let scales = rhs.quantization().scales().len();
            if scales != 1 && scales != n {
                return Err(CuantizarError::InvalidConfiguration {
                    reason: format!(
                        "Per-channel RHS carries {scales} scales for {n} output channels"
                    ),
                });
            }
        }

        info.output_stage.validate(n)?;

        if let Some(b) = bias {
            if info.output_stage.kind == OutputStageKind::None {
                return Err(CuantizarError::UnsupportedOperation {
                    reason: "Bias fusion requires an output stage".to_string(),
                });
            }
            if b.data_type() != DataType::S32 {
                return Err(CuantizarError::UnsupportedOperation {
                    reason: format!("Bias must be S32, got {:?}", b.data_type()),
                });
            }
            if b.num_elements() != n {
                return Err(CuantizarError::InvalidShape {
                    reason: format!("Bias has {} entries, expected {n}", b.num_elements()),
                });
            }
        }

        if info.accumulate && info.output_stage.kind != OutputStageKind::None {
            return Err(CuantizarError::UnsupportedOperation {
                reason: "Accumulation requires the raw S32 destination (no output stage)"
                    .to_string(),
            });
        }
        if info.depth_output_3d > 0 && m % info.depth_output_3d != 0 {
            return Err(CuantizarError::InvalidShape {
                reason: format!(
                    "depth_output_3d ({}) must divide the output rows ({m})",
                    info.depth_output_3d
                ),
            });
        }

        if let Some(d) = dst {
            if d.is_locked() {
                let expected = Self::dst_shape(lhs, n, info);
                if d.shape() != expected.as_slice() {
                    return Err(CuantizarError::InvalidShape {
                        reason: format!(
                            "Destination locked as {:?}, expected {:?}",
                            d.shape(),
                            expected
                        ),
                    });
                }
                if d.data_type() != info.output_stage.output_type {
                    return Err(CuantizarError::InvalidConfiguration {
                        reason: format!(
                            "Destination locked as {:?}, output stage produces {:?}",
                            d.data_type(),
                            info.output_stage.output_type
                        ),
                    });
                }
            }
        }

        Self::check_accumulator_depth(lhs, rhs, k)
    }

    /// Worst-case magnitude check: K products of offset-corrected operands
    /// must fit the i32 accumulator.
    fn check_accumulator_depth(
        lhs: &TensorDescriptor,
        rhs: &TensorDescriptor,
        k: usize,
    ) -> Result<()> {
        let bound = |d: &TensorDescriptor| -> i64 {
            let (lo, hi) = d.data_type().quantized_range().unwrap_or((0, 0));
            let off = i64::from(d.quantization().zero_point());
            (i64::from(lo) + off).abs().max((i64::from(hi) + off).abs())
        };
        let worst = k as i64 * bound(lhs) * bound(rhs);
        if worst > i64::from(i32::MAX) {
            return Err(CuantizarError::InvalidConfiguration {
                reason: format!(
                    "Reduction depth {k} can overflow the i32 accumulator (worst case {worst})"
                ),
            });
        }
        Ok(())
    }

    fn dst_shape(lhs: &TensorDescriptor, n: usize, info: &GemmInfo) -> Vec<usize> {
        let m = lhs.rows();
        let mut shape: Vec<usize> = lhs.batch_dims().to_vec();
        if info.depth_output_3d > 0 {
            shape.extend([m / info.depth_output_3d, info.depth_output_3d, n]);
        } else {
            shape.extend([m, n]);
        }
        shape
    }

    /// Validate, auto-initialize the destination, and build the operator
    ///
    /// The kernel strategy is probed here, once; the decision is cached for
    /// the life of the operator. An unlocked `dst` descriptor is filled in
    /// with the output shape and the stage's output type, then locked.
    ///
    /// # Errors
    ///
    /// Propagates [`QuantizedMatMulOperator::validate`] failures and locked
    /// destination mismatches.
    pub fn configure(
        lhs: &TensorDescriptor,
        rhs: &TensorDescriptor,
        bias: Option<&TensorDescriptor>,
        dst: &mut TensorDescriptor,
        info: GemmInfo,
    ) -> Result<Self> {
        Self::validate(lhs, rhs, bias, Some(dst), &info)?;

        let shape = MatMulShape {
            m: lhs.rows(),
            n: rhs.cols(),
            k: lhs.cols(),
        };
        let out_type = info.output_stage.output_type;
        dst.auto_init(&Self::dst_shape(lhs, shape.n, &info), out_type)?;

        let candidates: [Box<dyn MicroKernel>; 2] =
            [Box::new(PackedKernel), Box::new(GenericKernel)];
        let kernel = candidates
            .into_iter()
            .find(|c| c.supports(&shape, lhs.data_type(), rhs.data_type()))
            .ok_or_else(|| CuantizarError::UnsupportedOperation {
                reason: "No kernel supports the requested problem".to_string(),
            })?;
        let use_packed = kernel.wants_packed_operands();

        let stage = OutputStage::new(info.output_stage.clone(), shape.n)?;

        let batches = lhs.num_batches();
        let rhs_batches = rhs.num_batches();
        let cached = info.reshape_rhs_only_on_first_run;
        let rhs_lifetime = if cached {
            Lifetime::Persistent
        } else {
            Lifetime::Transient
        };

        let mut requirements = vec![
            WorkspaceRequirement {
                slot: SlotId::RowSumScratch,
                descriptor: TensorDescriptor::new(vec![shape.m], DataType::S32),
                lifetime: Lifetime::Transient,
            },
            WorkspaceRequirement {
                slot: SlotId::ColSumScratch,
                descriptor: if cached {
                    TensorDescriptor::new(vec![rhs_batches, shape.n], DataType::S32)
                } else {
                    TensorDescriptor::new(vec![shape.n], DataType::S32)
                },
                lifetime: rhs_lifetime,
            },
        ];
        if use_packed {
            requirements.push(WorkspaceRequirement {
                slot: SlotId::PackedLhs,
                descriptor: TensorDescriptor::new(
                    vec![packed_lhs_len(shape.m, shape.k)],
                    lhs.data_type(),
                ),
                lifetime: Lifetime::Transient,
            });
            let plen = packed_rhs_len(shape.k, shape.n);
            requirements.push(WorkspaceRequirement {
                slot: SlotId::PackedRhs,
                descriptor: if cached {
                    TensorDescriptor::new(vec![rhs_batches, plen], rhs.data_type())
                } else {
                    TensorDescriptor::new(vec![plen], rhs.data_type())
                },
                lifetime: rhs_lifetime,
            });
        }

        Ok(Self {
            shape,
            batches,
            rhs_batches,
            lhs_type: lhs.data_type(),
            rhs_type: rhs.data_type(),
            out_type,
            info,
            has_bias: bias.is_some(),
            stage,
            kernel,
            use_packed,
            requirements,
            is_prepared: false,
        })
    }

    /// Workspace buffers the caller must provide on every run
    #[must_use]
    pub fn workspace(&self) -> &[WorkspaceRequirement] {
        &self.requirements
    }

    /// Whether the one-time preparation has run
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.is_prepared
    }

    /// One-time heavy setup: pack the RHS and cache its column sums
    ///
    /// Only does work when `reshape_rhs_only_on_first_run` is set; otherwise
    /// the reshape happens inside every run. Idempotent: a second call is a
    /// no-op. Invoked automatically by the first [`QuantizedMatMulOperator::run`].
    ///
    /// On success the written workspace slots are rebound into the pack; on
    /// error they may be left unbound.
    ///
    /// # Errors
    ///
    /// Returns an error if a required slot is missing or undersized.
    pub fn prepare<'a>(&mut self, pack: &mut TensorPack<'a>) -> Result<()> {
        if self.is_prepared {
            return Ok(());
        }
        if !self.info.reshape_rhs_only_on_first_run {
            self.is_prepared = true;
            return Ok(());
        }

        let col = pack.take_mut(SlotId::ColSumScratch)?;
        let mut packed = if self.use_packed {
            Some(pack.take_mut(SlotId::PackedRhs)?)
        } else {
            None
        };
        self.check_workspace(SlotId::ColSumScratch, col)?;
        if let Some(p) = packed.as_deref() {
            self.check_workspace(SlotId::PackedRhs, p)?;
        }

        let (n, k) = (self.shape.n, self.shape.k);
        let plen = packed_rhs_len(k, n);
        {
            let rhs = pack.get_const(SlotId::Rhs)?;
            if rhs.descriptor().num_elements() != self.rhs_batches * k * n {
                return Err(CuantizarError::InvalidShape {
                    reason: format!(
                        "RHS holds {} elements, configured for {} x {k} x {n}",
                        rhs.descriptor().num_elements(),
                        self.rhs_batches
                    ),
                });
            }
            for ri in 0..self.rhs_batches {
                col_sums_of(rhs, ri * k * n, k, n, &mut col.as_i32_mut()?[ri * n..(ri + 1) * n])?;
                if let Some(p) = packed.as_deref_mut() {
                    transpose_batch(rhs, ri * k * n, k, n, p, ri * plen)?;
                }
            }
        }

        pack.bind(SlotId::ColSumScratch, col);
        if let Some(p) = packed {
            pack.bind(SlotId::PackedRhs, p);
        }
        self.is_prepared = true;
        Ok(())
    }

    /// Execute the configured multiply over every batch
    ///
    /// Expects `Lhs`, `Rhs`, the `Bias` declared at configure time (bindings
    /// for an undeclared bias are ignored), a writable `Dst`, and every
    /// workspace slot bound in the pack. The first call runs
    /// [`QuantizedMatMulOperator::prepare`] implicitly. Zero points are read
    /// from the bound descriptors, so dynamic quantization updates take
    /// effect immediately.
    ///
    /// On success the writable bindings are rebound into the pack; on error
    /// they may be left unbound.
    ///
    /// # Errors
    ///
    /// Returns an error for missing or undersized slots, operand shapes or
    /// types that disagree with the configuration, or kernel failures.
    pub fn run<'a>(&mut self, scheduler: &Scheduler, pack: &mut TensorPack<'a>) -> Result<()> {
        if !self.is_prepared {
            self.prepare(pack)?;
        }

        let dst = pack.take_mut(SlotId::Dst)?;
        let row = pack.take_mut(SlotId::RowSumScratch)?;
        let col = pack.take_mut(SlotId::ColSumScratch)?;
        let mut plhs = None;
        let mut prhs = None;
        if self.use_packed {
            plhs = Some(pack.take_mut(SlotId::PackedLhs)?);
            prhs = Some(pack.take_mut(SlotId::PackedRhs)?);
        }

        self.check_workspace(SlotId::RowSumScratch, row)?;
        self.check_workspace(SlotId::ColSumScratch, col)?;
        if let Some(p) = plhs.as_deref() {
            self.check_workspace(SlotId::PackedLhs, p)?;
        }
        if let Some(p) = prhs.as_deref() {
            self.check_workspace(SlotId::PackedRhs, p)?;
        }

        let result = self.run_batches(
            scheduler,
            pack,
            dst,
            row,
            col,
            plhs.as_deref_mut(),
            prhs.as_deref_mut(),
        );

        pack.bind(SlotId::Dst, dst);
        pack.bind(SlotId::RowSumScratch, row);
        pack.bind(SlotId::ColSumScratch, col);
        if let Some(p) = plhs {
            pack.bind(SlotId::PackedLhs, p);
        }
        if let Some(p) = prhs {
            pack.bind(SlotId::PackedRhs, p);
        }
        result
    }

    fn check_workspace(&self, slot: SlotId, tensor: &Tensor) -> Result<()> {
        let req = self
            .requirements
            .iter()
            .find(|r| r.slot == slot)
            .ok_or(CuantizarError::MissingWorkspace { slot })?;
        let actual = tensor.descriptor().size_bytes();
        if actual < req.bytes() {
            return Err(CuantizarError::WorkspaceTooSmall {
                slot,
                needed: req.bytes(),
                actual,
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    fn run_batches(
        &self,
        scheduler: &Scheduler,
        pack: &TensorPack<'_>,
        dst: &mut Tensor,
        row: &mut Tensor,
        col: &mut Tensor,
        mut plhs: Option<&mut Tensor>,
        mut prhs: Option<&mut Tensor>,
    ) -> Result<()> {
        let MatMulShape { m, n, k } = self.shape;
        let lhs = pack.get_const(SlotId::Lhs)?;
        let rhs = pack.get_const(SlotId::Rhs)?;
        // Only the bias declared at configure time participates; a stray
        // binding at the slot is ignored
        let bias = if self.has_bias {
            let b = pack.get_const(SlotId::Bias)?.as_i32()?;
            if b.len() != n {
                return Err(CuantizarError::InvalidShape {
                    reason: format!("Bias has {} entries, expected {n}", b.len()),
                });
            }
            Some(b)
        } else {
            None
        };

        if lhs.descriptor().data_type() != self.lhs_type
            || rhs.descriptor().data_type() != self.rhs_type
        {
            return Err(CuantizarError::PreconditionViolation {
                reason: "Bound operand types differ from the configured ones".to_string(),
            });
        }
        if lhs.descriptor().num_elements() != self.batches * m * k {
            return Err(CuantizarError::InvalidShape {
                reason: format!(
                    "LHS holds {} elements, configured for {} x {m} x {k}",
                    lhs.descriptor().num_elements(),
                    self.batches
                ),
            });
        }
        if rhs.descriptor().num_elements() != self.rhs_batches * k * n {
            return Err(CuantizarError::InvalidShape {
                reason: format!(
                    "RHS holds {} elements, configured for {} x {k} x {n}",
                    rhs.descriptor().num_elements(),
                    self.rhs_batches
                ),
            });
        }
        if dst.descriptor().num_elements() != self.batches * m * n {
            return Err(CuantizarError::InvalidShape {
                reason: format!(
                    "Destination holds {} elements, configured for {} x {m} x {n}",
                    dst.descriptor().num_elements(),
                    self.batches
                ),
            });
        }

        let a_off = lhs.descriptor().quantization().zero_point();
        let b_off = rhs.descriptor().quantization().zero_point();
        let cached = self.info.reshape_rhs_only_on_first_run;
        let lhs_plen = packed_lhs_len(m, k);
        let rhs_plen = packed_rhs_len(k, n);
        let stage = &self.stage;
        let kernel = self.kernel.as_ref();

        for bi in 0..self.batches {
            let ri = if self.rhs_batches == 1 { 0 } else { bi };

            let row_sums: Option<&[i32]> = if b_off != 0 {
                row_sums_of(lhs, bi * m * k, m, k, &mut row.as_i32_mut()?[..m])?;
                Some(&row.as_i32()?[..m])
            } else {
                None
            };
            let col_sums: Option<&[i32]> = if cached {
                Some(&col.as_i32()?[ri * n..(ri + 1) * n])
            } else if a_off != 0 {
                col_sums_of(rhs, ri * k * n, k, n, &mut col.as_i32_mut()?[..n])?;
                Some(&col.as_i32()?[..n])
            } else {
                None
            };

            let (pa, pb) = if self.use_packed {
                let pl = plhs.as_deref_mut().ok_or(CuantizarError::MissingWorkspace {
                    slot: SlotId::PackedLhs,
                })?;
                let pr = prhs.as_deref_mut().ok_or(CuantizarError::MissingWorkspace {
                    slot: SlotId::PackedRhs,
                })?;
                interleave_batch(lhs, bi * m * k, m, k, pl)?;
                if !cached && (bi == 0 || self.rhs_batches > 1) {
                    transpose_batch(rhs, ri * k * n, k, n, pr, 0)?;
                }
                let pr_start = if cached { ri * rhs_plen } else { 0 };
                (
                    Some(quant_view(pl, 0, lhs_plen)?),
                    Some(quant_view(pr, pr_start, rhs_plen)?),
                )
            } else {
                (None, None)
            };

            let args = KernelArgs {
                lhs: quant_view(lhs, bi * m * k, m * k)?,
                rhs: quant_view(rhs, ri * k * n, k * n)?,
                packed_lhs: pa,
                packed_rhs: pb,
            };
            let range = bi * m * n..(bi + 1) * m * n;

            match self.out_type {
                DataType::QAsymmU8 => execute(
                    scheduler,
                    kernel,
                    &self.shape,
                    &args,
                    &mut dst.as_u8_mut()?[range],
                    row_sums,
                    col_sums,
                    bias,
                    a_off,
                    b_off,
                    |v, c, s: &mut u8| *s = stage.quantize(v, c) as u8,
                )?,
                DataType::QAsymmS8 | DataType::QSymmS8PerChannel => execute(
                    scheduler,
                    kernel,
                    &self.shape,
                    &args,
                    &mut dst.as_i8_mut()?[range],
                    row_sums,
                    col_sums,
                    bias,
                    a_off,
                    b_off,
                    |v, c, s: &mut i8| *s = stage.quantize(v, c) as i8,
                )?,
                DataType::QSymmS16 => execute(
                    scheduler,
                    kernel,
                    &self.shape,
                    &args,
                    &mut dst.as_i16_mut()?[range],
                    row_sums,
                    col_sums,
                    bias,
                    a_off,
                    b_off,
                    |v, c, s: &mut i16| *s = stage.quantize(v, c) as i16,
                )?,
                DataType::S32 if self.info.accumulate => execute(
                    scheduler,
                    kernel,
                    &self.shape,
                    &args,
                    &mut dst.as_i32_mut()?[range],
                    row_sums,
                    col_sums,
                    bias,
                    a_off,
                    b_off,
                    |v, c, s: &mut i32| *s = s.saturating_add(stage.quantize(v, c)),
                )?,
                DataType::S32 => execute(
                    scheduler,
                    kernel,
                    &self.shape,
                    &args,
                    &mut dst.as_i32_mut()?[range],
                    row_sums,
                    col_sums,
                    bias,
                    a_off,
                    b_off,
                    |v, c, s: &mut i32| *s = stage.quantize(v, c),
                )?,
                DataType::F32 => execute(
                    scheduler,
                    kernel,
                    &self.shape,
                    &args,
                    &mut dst.as_f32_mut()?[range],
                    row_sums,
                    col_sums,
                    bias,
                    a_off,
                    b_off,
                    |v, c, s: &mut f32| *s = stage.dequantize(v, c),
                )?,
            }
        }
        Ok(())
    }
}

/// Run the kernel over one batch and fold corrections + output stage in a
/// single pass over the destination rows.
#[allow(clippy::too_many_arguments)]
fn execute<T, E>(
    scheduler: &Scheduler,
    kernel: &dyn MicroKernel,
    shape: &MatMulShape,
    args: &KernelArgs<'_>,
    dst: &mut [T],
    row_sums: Option<&[i32]>,
    col_sums: Option<&[i32]>,
    bias: Option<&[i32]>,
    a_offset: i32,
    b_offset: i32,
    emit: E,
) -> Result<()>
where
    T: Send,
    E: Fn(i32, usize, &mut T) + Sync,
{
    let depth_term = shape.k as i64 * i64::from(a_offset) * i64::from(b_offset);
    scheduler.run_rows(dst, shape.n, shape.m, |window, out| {
        let mut acc = vec![0i32; window.len() * shape.n];
        kernel.run(window, args, shape, &mut acc)?;
        for (local, out_row) in out.chunks_mut(shape.n).enumerate() {
            let global = window.start + local;
            let row_term = depth_term
                + row_sums.map_or(0, |s| i64::from(b_offset) * i64::from(s[global]));
            let acc_row = &acc[local * shape.n..(local + 1) * shape.n];
            for (c, (slot, &raw)) in out_row.iter_mut().zip(acc_row).enumerate() {
                let mut v = i64::from(raw) + row_term;
                if let Some(cols) = col_sums {
                    v += i64::from(a_offset) * i64::from(cols[c]);
                }
                if let Some(b) = bias {
                    v += i64::from(b[c]);
                }
                let v = v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
                emit(v, c, slot);
            }
        }
        Ok(())
    })
}

fn quant_view(t: &Tensor, start: usize, len: usize) -> Result<QuantView<'_>> {
    match t.descriptor().data_type() {
        DataType::QAsymmU8 => Ok(QuantView::U8(&t.as_u8()?[start..start + len])),
        DataType::QAsymmS8 | DataType::QSymmS8PerChannel => {
            Ok(QuantView::I8(&t.as_i8()?[start..start + len]))
        }
        other => Err(CuantizarError::UnsupportedOperation {
            reason: format!("Expected an 8-bit quantized operand, got {other:?}"),
        }),
    }
}

fn row_sums_of(t: &Tensor, start: usize, rows: usize, cols: usize, out: &mut [i32]) -> Result<()> {
    let len = rows * cols;
    match t.descriptor().data_type() {
        DataType::QAsymmU8 => row_sums_into(&t.as_u8()?[start..start + len], rows, cols, out),
        DataType::QAsymmS8 | DataType::QSymmS8PerChannel => {
            row_sums_into(&t.as_i8()?[start..start + len], rows, cols, out)
        }
        other => Err(CuantizarError::UnsupportedOperation {
            reason: format!("Expected an 8-bit quantized operand, got {other:?}"),
        }),
    }
}

fn col_sums_of(t: &Tensor, start: usize, rows: usize, cols: usize, out: &mut [i32]) -> Result<()> {
    let len = rows * cols;
    match t.descriptor().data_type() {
        DataType::QAsymmU8 => col_sums_into(&t.as_u8()?[start..start + len], rows, cols, out),
        DataType::QAsymmS8 | DataType::QSymmS8PerChannel => {
            col_sums_into(&t.as_i8()?[start..start + len], rows, cols, out)
        }
        other => Err(CuantizarError::UnsupportedOperation {
            reason: format!("Expected an 8-bit quantized operand, got {other:?}"),
        }),
    }
}

fn interleave_batch(src: &Tensor, start: usize, m: usize, k: usize, dst: &mut Tensor) -> Result<()> {
    let len = m * k;
    let plen = packed_lhs_len(m, k);
    match src.descriptor().data_type() {
        DataType::QAsymmU8 => interleave_lhs_into(
            &src.as_u8()?[start..start + len],
            m,
            k,
            &mut dst.as_u8_mut()?[..plen],
        ),
        DataType::QAsymmS8 | DataType::QSymmS8PerChannel => interleave_lhs_into(
            &src.as_i8()?[start..start + len],
            m,
            k,
            &mut dst.as_i8_mut()?[..plen],
        ),
        other => Err(CuantizarError::UnsupportedOperation {
            reason: format!("Expected an 8-bit quantized operand, got {other:?}"),
        }),
    }
}

fn transpose_batch(
    src: &Tensor,
    start: usize,
    k: usize,
    n: usize,
    dst: &mut Tensor,
    dst_start: usize,
) -> Result<()> {
    let len = k * n;
    let plen = packed_rhs_len(k, n);
    match src.descriptor().data_type() {
        DataType::QAsymmU8 => transpose_rhs_into(
            &src.as_u8()?[start..start + len],
            k,
            n,
            &mut dst.as_u8_mut()?[dst_start..dst_start + plen],
        ),
        DataType::QAsymmS8 | DataType::QSymmS8PerChannel => transpose_rhs_into(
            &src.as_i8()?[start..start + len],
            k,
            n,
            &mut dst.as_i8_mut()?[dst_start..dst_start + plen],
        ),
        other => Err(CuantizarError::UnsupportedOperation {
            reason: format!("Expected an 8-bit quantized operand, got {other:?}"),
        }),
    }
}
