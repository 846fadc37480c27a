//! Integer matrix-multiply micro-kernels
//!
//! The operator selects a kernel strategy once at configure time through the
//! capability probe [`MicroKernel::supports`]; the probe result never changes
//! for the life of a configured operator. Two strategies ship here: a generic
//! triple loop over the raw operands, and a packed kernel consuming the tiled
//! layouts from [`crate::gemm::reshape`]. An optimized (SIMD/assembly) kernel
//! plugs in through the same trait.
//!
//! Kernels compute the raw product `sum_j a[i][j] * b[j][k]` for the rows of
//! one [`Window`]; zero-point corrections and the output stage are applied by
//! the operator afterwards.

use num_traits::AsPrimitive;

use crate::error::{CuantizarError, Result};
use crate::gemm::reshape::{packed_lhs_at, packed_rhs_at};
use crate::scheduler::Window;
use crate::types::DataType;

/// Problem dimensions: `A(m x k) * B(k x n)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatMulShape {
    /// Output rows
    pub m: usize,
    /// Output columns
    pub n: usize,
    /// Reduction depth
    pub k: usize,
}

/// Read-only view over 8-bit quantized storage
#[derive(Debug, Clone, Copy)]
pub enum QuantView<'a> {
    /// Unsigned 8-bit elements
    U8(&'a [u8]),
    /// Signed 8-bit elements
    I8(&'a [i8]),
}

impl QuantView<'_> {
    /// Number of elements in the view
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::I8(v) => v.len(),
        }
    }

    /// Whether the view is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Operand views handed to a kernel for one batch
#[derive(Debug, Clone, Copy)]
pub struct KernelArgs<'a> {
    /// Raw LHS batch slice (`m x k`, row major)
    pub lhs: QuantView<'a>,
    /// Raw RHS batch slice (`k x n`, row major)
    pub rhs: QuantView<'a>,
    /// Interleaved LHS panels, when the packed path prepared them
    pub packed_lhs: Option<QuantView<'a>>,
    /// Transposed RHS panels, when the packed path prepared them
    pub packed_rhs: Option<QuantView<'a>>,
}

/// Pluggable integer multiply strategy
pub trait MicroKernel: Send + Sync {
    /// Capability probe: can this kernel handle the problem?
    ///
    /// Called once at configure time; the answer is cached and never
    /// re-queried.
    fn supports(&self, shape: &MatMulShape, lhs_type: DataType, rhs_type: DataType) -> bool;

    /// Whether the kernel consumes the packed operand layouts
    fn wants_packed_operands(&self) -> bool {
        false
    }

    /// Accumulate the raw product for `window` rows into `acc`
    ///
    /// `acc` holds `window.len() * shape.n` zeroed i32 slots indexed locally
    /// (`acc[0]` is row `window.start`, column 0).
    ///
    /// # Errors
    ///
    /// Returns an error if a required operand view is missing or mis-sized.
    fn run(
        &self,
        window: Window,
        args: &KernelArgs<'_>,
        shape: &MatMulShape,
        acc: &mut [i32],
    ) -> Result<()>;
}

fn check_acc_len(window: Window, n: usize, acc_len: usize) -> Result<()> {
    let expected = window.len() * n;
    if acc_len != expected {
        return Err(CuantizarError::InvalidShape {
            reason: format!("Accumulator has {acc_len} slots, window expects {expected}"),
        });
    }
    Ok(())
}

/// Reference triple-loop kernel over the raw row-major operands
///
/// Handles every shape and type combination, including the vector-times-
/// matrix case the packed path skips.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericKernel;

impl GenericKernel {
    fn run_typed<A, B>(window: Window, a: &[A], b: &[B], shape: &MatMulShape, acc: &mut [i32])
    where
        A: AsPrimitive<i32>,
        B: AsPrimitive<i32>,
    {
        let (n, k) = (shape.n, shape.k);
        for (local, row) in (window.start..window.end).enumerate() {
            let a_row = &a[row * k..(row + 1) * k];
            let out = &mut acc[local * n..(local + 1) * n];
            for (j, av) in a_row.iter().enumerate() {
                let av = av.as_();
                let b_row = &b[j * n..(j + 1) * n];
                for (slot, bv) in out.iter_mut().zip(b_row.iter()) {
                    *slot += av * bv.as_();
                }
            }
        }
    }
}

impl MicroKernel for GenericKernel {
    fn supports(&self, _shape: &MatMulShape, _lhs_type: DataType, _rhs_type: DataType) -> bool {
        true
    }

    fn run(
        &self,
        window: Window,
        args: &KernelArgs<'_>,
        shape: &MatMulShape,
        acc: &mut [i32],
    ) -> Result<()> {
        check_acc_len(window, shape.n, acc.len())?;
        match (args.lhs, args.rhs) {
            (QuantView::U8(a), QuantView::U8(b)) => Self::run_typed(window, a, b, shape, acc),
            (QuantView::U8(a), QuantView::I8(b)) => Self::run_typed(window, a, b, shape, acc),
            (QuantView::I8(a), QuantView::U8(b)) => Self::run_typed(window, a, b, shape, acc),
            (QuantView::I8(a), QuantView::I8(b)) => Self::run_typed(window, a, b, shape, acc),
        }
        Ok(())
    }
}

/// Tiled kernel consuming the interleaved LHS / transposed RHS layouts
///
/// Stands in for the optimized assembly dispatch: same probe contract, same
/// packed operand diet, scalar arithmetic.
#[derive(Debug, Default, Clone, Copy)]
pub struct PackedKernel;

impl PackedKernel {
    fn run_typed<A, B>(window: Window, pa: &[A], pb: &[B], shape: &MatMulShape, acc: &mut [i32])
    where
        A: Copy + AsPrimitive<i32>,
        B: Copy + AsPrimitive<i32>,
    {
        let (n, k) = (shape.n, shape.k);
        for (local, row) in (window.start..window.end).enumerate() {
            let out = &mut acc[local * n..(local + 1) * n];
            for j in 0..k {
                let av: i32 = packed_lhs_at(pa, k, row, j).as_();
                for (c, slot) in out.iter_mut().enumerate() {
                    *slot += av * packed_rhs_at(pb, k, j, c).as_();
                }
            }
        }
    }
}

impl MicroKernel for PackedKernel {
    fn supports(&self, shape: &MatMulShape, _lhs_type: DataType, _rhs_type: DataType) -> bool {
        // Vector-times-matrix skips the reshape entirely; the generic
        // kernel serves it.
        shape.m >= 2
    }

    fn wants_packed_operands(&self) -> bool {
        true
    }

    fn run(
        &self,
        window: Window,
        args: &KernelArgs<'_>,
        shape: &MatMulShape,
        acc: &mut [i32],
    ) -> Result<()> {
        check_acc_len(window, shape.n, acc.len())?;
        let (pa, pb) = match (args.packed_lhs, args.packed_rhs) {
            (Some(pa), Some(pb)) => (pa, pb),
            _ => {
                return Err(CuantizarError::PreconditionViolation {
                    reason: "Packed kernel requires packed operand views".to_string(),
                })
            }
        };
        match (pa, pb) {
            (QuantView::U8(a), QuantView::U8(b)) => Self::run_typed(window, a, b, shape, acc),
            (QuantView::U8(a), QuantView::I8(b)) => Self::run_typed(window, a, b, shape, acc),
            (QuantView::I8(a), QuantView::U8(b)) => Self::run_typed(window, a, b, shape, acc),
            (QuantView::I8(a), QuantView::I8(b)) => Self::run_typed(window, a, b, shape, acc),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemm::reshape::{
        interleave_lhs_into, packed_lhs_len, packed_rhs_len, transpose_rhs_into,
    };

    fn naive(a: &[i32], b: &[i32], m: usize, n: usize, k: usize) -> Vec<i32> {
        let mut out = vec![0i32; m * n];
        for i in 0..m {
            for c in 0..n {
                for j in 0..k {
                    out[i * n + c] += a[i * k + j] * b[j * n + c];
                }
            }
        }
        out
    }

    #[test]
    fn test_generic_matches_naive() {
        let (m, n, k) = (3, 4, 5);
        let a: Vec<i8> = (0..(m * k) as i8).map(|v| v - 7).collect();
        let b: Vec<i8> = (0..(k * n) as i8).map(|v| 3 - v).collect();
        let expected = naive(
            &a.iter().map(|&v| i32::from(v)).collect::<Vec<_>>(),
            &b.iter().map(|&v| i32::from(v)).collect::<Vec<_>>(),
            m,
            n,
            k,
        );

        let shape = MatMulShape { m, n, k };
        let args = KernelArgs {
            lhs: QuantView::I8(&a),
            rhs: QuantView::I8(&b),
            packed_lhs: None,
            packed_rhs: None,
        };
        let mut acc = vec![0i32; m * n];
        GenericKernel
            .run(Window { start: 0, end: m }, &args, &shape, &mut acc)
            .unwrap();
        assert_eq!(acc, expected);
    }

    #[test]
    fn test_generic_window_local_indexing() {
        let (m, n, k) = (4, 2, 3);
        let a: Vec<u8> = (1..=(m * k) as u8).collect();
        let b: Vec<u8> = (1..=(k * n) as u8).collect();
        let full = naive(
            &a.iter().map(|&v| i32::from(v)).collect::<Vec<_>>(),
            &b.iter().map(|&v| i32::from(v)).collect::<Vec<_>>(),
            m,
            n,
            k,
        );

        let shape = MatMulShape { m, n, k };
        let args = KernelArgs {
            lhs: QuantView::U8(&a),
            rhs: QuantView::U8(&b),
            packed_lhs: None,
            packed_rhs: None,
        };
        let window = Window { start: 2, end: 4 };
        let mut acc = vec![0i32; window.len() * n];
        GenericKernel.run(window, &args, &shape, &mut acc).unwrap();
        assert_eq!(acc, full[2 * n..4 * n]);
    }

    #[test]
    fn test_packed_matches_generic() {
        let (m, n, k) = (5, 18, 7);
        let a: Vec<u8> = (0..m * k).map(|v| (v * 31 % 251) as u8).collect();
        let b: Vec<i8> = (0..k * n).map(|v| ((v * 17 % 200) as i16 - 100) as i8).collect();

        let shape = MatMulShape { m, n, k };
        let mut expected = vec![0i32; m * n];
        GenericKernel
            .run(
                Window { start: 0, end: m },
                &KernelArgs {
                    lhs: QuantView::U8(&a),
                    rhs: QuantView::I8(&b),
                    packed_lhs: None,
                    packed_rhs: None,
                },
                &shape,
                &mut expected,
            )
            .unwrap();

        let mut pa = vec![0u8; packed_lhs_len(m, k)];
        let mut pb = vec![0i8; packed_rhs_len(k, n)];
        interleave_lhs_into(&a, m, k, &mut pa).unwrap();
        transpose_rhs_into(&b, k, n, &mut pb).unwrap();

        let mut acc = vec![0i32; m * n];
        PackedKernel
            .run(
                Window { start: 0, end: m },
                &KernelArgs {
                    lhs: QuantView::U8(&a),
                    rhs: QuantView::I8(&b),
                    packed_lhs: Some(QuantView::U8(&pa)),
                    packed_rhs: Some(QuantView::I8(&pb)),
                },
                &shape,
                &mut acc,
            )
            .unwrap();
        assert_eq!(acc, expected);
    }

    #[test]
    fn test_packed_requires_packed_views() {
        let shape = MatMulShape { m: 2, n: 2, k: 2 };
        let a = vec![0u8; 4];
        let b = vec![0u8; 4];
        let args = KernelArgs {
            lhs: QuantView::U8(&a),
            rhs: QuantView::U8(&b),
            packed_lhs: None,
            packed_rhs: None,
        };
        let mut acc = vec![0i32; 4];
        let err = PackedKernel.run(Window { start: 0, end: 2 }, &args, &shape, &mut acc);
        assert!(err.is_err());
    }

    #[test]
    fn test_probe_vector_path() {
        let kern = PackedKernel;
        let vec_shape = MatMulShape { m: 1, n: 8, k: 8 };
        let mat_shape = MatMulShape { m: 2, n: 8, k: 8 };
        assert!(!kern.supports(&vec_shape, DataType::QAsymmU8, DataType::QAsymmU8));
        assert!(kern.supports(&mat_shape, DataType::QAsymmU8, DataType::QAsymmU8));
        assert!(GenericKernel.supports(&vec_shape, DataType::QAsymmU8, DataType::QAsymmU8));
    }

    #[test]
    fn test_acc_length_checked() {
        let shape = MatMulShape { m: 2, n: 3, k: 1 };
        let a = vec![0u8; 2];
        let b = vec![0u8; 3];
        let args = KernelArgs {
            lhs: QuantView::U8(&a),
            rhs: QuantView::U8(&b),
            packed_lhs: None,
            packed_rhs: None,
        };
        let mut acc = vec![0i32; 5];
        assert!(GenericKernel
            .run(Window { start: 0, end: 2 }, &args, &shape, &mut acc)
            .is_err());
    }
}
