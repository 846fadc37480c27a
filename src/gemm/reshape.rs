//! Reshape/pack stage: tiled operand layouts for the packed micro-kernel
//!
//! The LHS is interleaved in 4-row panels (rows zipped element by element),
//! the RHS transposed in 16-column panels (each panel stores its 16 columns
//! contiguously per K step). Ragged edges are zero-padded so the kernel can
//! index panels uniformly.
//!
//! Layouts:
//!
//! ```text
//! LHS  M x K  -> ceil(M/4) panels of 4*K:  panel p, step j holds
//!                a[4p][j] a[4p+1][j] a[4p+2][j] a[4p+3][j]
//! RHS  K x N  -> ceil(N/16) panels of 16*K: panel q, step j holds
//!                b[j][16q] .. b[j][16q+15]
//! ```

use crate::error::{CuantizarError, Result};

/// Rows zipped per LHS panel
pub const LHS_PANEL_ROWS: usize = 4;

/// Columns grouped per RHS panel
pub const RHS_PANEL_COLS: usize = 16;

/// Element count of the interleaved LHS layout for an `m x k` matrix
#[must_use]
pub fn packed_lhs_len(m: usize, k: usize) -> usize {
    m.div_ceil(LHS_PANEL_ROWS) * LHS_PANEL_ROWS * k
}

/// Element count of the transposed RHS layout for a `k x n` matrix
#[must_use]
pub fn packed_rhs_len(k: usize, n: usize) -> usize {
    n.div_ceil(RHS_PANEL_COLS) * RHS_PANEL_COLS * k
}

/// Interleave an `m x k` row-major LHS into 4-row panels
///
/// # Errors
///
/// Returns an error if `src` or `dst` have the wrong length.
pub fn interleave_lhs_into<T: Copy + Default>(
    src: &[T],
    m: usize,
    k: usize,
    dst: &mut [T],
) -> Result<()> {
    if src.len() != m * k {
        return Err(CuantizarError::InvalidShape {
            reason: format!("LHS has {} elements, expected {}", src.len(), m * k),
        });
    }
    let expected = packed_lhs_len(m, k);
    if dst.len() != expected {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "Packed LHS buffer has {} elements, expected {expected}",
                dst.len()
            ),
        });
    }

    let panels = m.div_ceil(LHS_PANEL_ROWS);
    for p in 0..panels {
        let panel = &mut dst[p * LHS_PANEL_ROWS * k..(p + 1) * LHS_PANEL_ROWS * k];
        for j in 0..k {
            for lane in 0..LHS_PANEL_ROWS {
                let row = p * LHS_PANEL_ROWS + lane;
                panel[j * LHS_PANEL_ROWS + lane] = if row < m {
                    src[row * k + j]
                } else {
                    T::default()
                };
            }
        }
    }
    Ok(())
}

/// Transpose a `k x n` row-major RHS into 16-column panels
///
/// # Errors
///
/// Returns an error if `src` or `dst` have the wrong length.
pub fn transpose_rhs_into<T: Copy + Default>(
    src: &[T],
    k: usize,
    n: usize,
    dst: &mut [T],
) -> Result<()> {
    if src.len() != k * n {
        return Err(CuantizarError::InvalidShape {
            reason: format!("RHS has {} elements, expected {}", src.len(), k * n),
        });
    }
    let expected = packed_rhs_len(k, n);
    if dst.len() != expected {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "Packed RHS buffer has {} elements, expected {expected}",
                dst.len()
            ),
        });
    }

    let panels = n.div_ceil(RHS_PANEL_COLS);
    for q in 0..panels {
        let panel = &mut dst[q * RHS_PANEL_COLS * k..(q + 1) * RHS_PANEL_COLS * k];
        for j in 0..k {
            for lane in 0..RHS_PANEL_COLS {
                let col = q * RHS_PANEL_COLS + lane;
                panel[j * RHS_PANEL_COLS + lane] = if col < n {
                    src[j * n + col]
                } else {
                    T::default()
                };
            }
        }
    }
    Ok(())
}

/// Element of an interleaved LHS at (row, j)
#[inline]
#[must_use]
pub fn packed_lhs_at<T: Copy>(packed: &[T], k: usize, row: usize, j: usize) -> T {
    let panel = row / LHS_PANEL_ROWS;
    let lane = row % LHS_PANEL_ROWS;
    packed[panel * LHS_PANEL_ROWS * k + j * LHS_PANEL_ROWS + lane]
}

/// Element of a transposed RHS at (j, col)
#[inline]
#[must_use]
pub fn packed_rhs_at<T: Copy>(packed: &[T], k: usize, j: usize, col: usize) -> T {
    let panel = col / RHS_PANEL_COLS;
    let lane = col % RHS_PANEL_COLS;
    packed[panel * RHS_PANEL_COLS * k + j * RHS_PANEL_COLS + lane]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_lengths() {
        assert_eq!(packed_lhs_len(2, 3), 12); // one padded 4-row panel
        assert_eq!(packed_lhs_len(4, 3), 12);
        assert_eq!(packed_lhs_len(5, 3), 24);
        assert_eq!(packed_rhs_len(3, 2), 48); // one padded 16-col panel
        assert_eq!(packed_rhs_len(3, 17), 96);
    }

    #[test]
    fn test_interleave_round_trip_via_accessor() {
        let m = 5;
        let k = 3;
        let src: Vec<i8> = (0..(m * k) as i8).collect();
        let mut dst = vec![0i8; packed_lhs_len(m, k)];
        interleave_lhs_into(&src, m, k, &mut dst).unwrap();
        for row in 0..m {
            for j in 0..k {
                assert_eq!(packed_lhs_at(&dst, k, row, j), src[row * k + j]);
            }
        }
    }

    #[test]
    fn test_interleave_pads_with_zero() {
        let src: Vec<u8> = vec![9; 2 * 2];
        let mut dst = vec![0xAA; packed_lhs_len(2, 2)];
        interleave_lhs_into(&src, 2, 2, &mut dst).unwrap();
        // Rows 2 and 3 of the panel are padding
        for j in 0..2 {
            assert_eq!(packed_lhs_at(&dst, 2, 2, j), 0);
            assert_eq!(packed_lhs_at(&dst, 2, 3, j), 0);
        }
    }

    #[test]
    fn test_transpose_round_trip_via_accessor() {
        let k = 4;
        let n = 18;
        let src: Vec<i8> = (0..(k * n)).map(|v| (v % 117) as i8).collect();
        let mut dst = vec![0i8; packed_rhs_len(k, n)];
        transpose_rhs_into(&src, k, n, &mut dst).unwrap();
        for j in 0..k {
            for col in 0..n {
                assert_eq!(packed_rhs_at(&dst, k, j, col), src[j * n + col]);
            }
        }
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let src = vec![0u8; 5];
        let mut dst = vec![0u8; packed_lhs_len(2, 3)];
        assert!(interleave_lhs_into(&src, 2, 3, &mut dst).is_err());
        let src = vec![0u8; 6];
        let mut small = vec![0u8; 3];
        assert!(interleave_lhs_into(&src, 2, 3, &mut small).is_err());
        assert!(transpose_rhs_into(&src, 2, 3, &mut small).is_err());
    }
}
