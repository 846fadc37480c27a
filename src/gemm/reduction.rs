//! Offset-correction reductions: LHS row sums and RHS column sums
//!
//! With zero points `a_off` and `b_off`, the quantized product expands to
//!
//! ```text
//! out[i][k] = sum_j a[i][j]*b[j][k]
//!           + a_off * sum_j b[j][k]        (column sums, fixed per RHS)
//!           + b_off * sum_j a[i][j]        (row sums, recomputed per run)
//!           + K * a_off * b_off
//! ```
//!
//! Precomputing the two sums once costs O(M*K) + O(K*N) instead of an
//! O(M*N*K) cross-term correction per output element. Column sums are
//! computed in `prepare()` when the RHS is fixed; row sums on every `run()`.

use num_traits::AsPrimitive;

use crate::error::{CuantizarError, Result};

/// Sum each row of an `rows x cols` matrix into `out[rows]`
///
/// # Errors
///
/// Returns an error on length mismatches.
pub fn row_sums_into<T>(data: &[T], rows: usize, cols: usize, out: &mut [i32]) -> Result<()>
where
    T: AsPrimitive<i32>,
{
    if data.len() != rows * cols {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "Matrix has {} elements, expected {} ({rows} x {cols})",
                data.len(),
                rows * cols
            ),
        });
    }
    if out.len() != rows {
        return Err(CuantizarError::InvalidShape {
            reason: format!("Row-sum buffer has {} entries, expected {rows}", out.len()),
        });
    }
    for (row, slot) in data.chunks_exact(cols.max(1)).zip(out.iter_mut()) {
        *slot = row.iter().map(|v| v.as_()).sum();
    }
    if cols == 0 {
        out.fill(0);
    }
    Ok(())
}

/// Sum each column of an `rows x cols` matrix into `out[cols]`
///
/// # Errors
///
/// Returns an error on length mismatches.
pub fn col_sums_into<T>(data: &[T], rows: usize, cols: usize, out: &mut [i32]) -> Result<()>
where
    T: AsPrimitive<i32>,
{
    if data.len() != rows * cols {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "Matrix has {} elements, expected {} ({rows} x {cols})",
                data.len(),
                rows * cols
            ),
        });
    }
    if out.len() != cols {
        return Err(CuantizarError::InvalidShape {
            reason: format!("Column-sum buffer has {} entries, expected {cols}", out.len()),
        });
    }
    out.fill(0);
    for row in data.chunks_exact(cols.max(1)) {
        for (slot, v) in out.iter_mut().zip(row.iter()) {
            *slot += v.as_();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_sums_i8() {
        let data: Vec<i8> = vec![1, 2, 3, -4, 5, -6];
        let mut out = vec![0i32; 2];
        row_sums_into(&data, 2, 3, &mut out).unwrap();
        assert_eq!(out, vec![6, -5]);
    }

    #[test]
    fn test_col_sums_u8() {
        let data: Vec<u8> = vec![1, 2, 3, 4, 5, 6];
        let mut out = vec![0i32; 3];
        col_sums_into(&data, 2, 3, &mut out).unwrap();
        assert_eq!(out, vec![5, 7, 9]);
    }

    #[test]
    fn test_u8_values_do_not_wrap() {
        // 200 * 3 exceeds i8 but must widen cleanly to i32
        let data: Vec<u8> = vec![200; 6];
        let mut out = vec![0i32; 2];
        col_sums_into(&data, 3, 2, &mut out).unwrap();
        assert_eq!(out, vec![600, 600]);
    }

    #[test]
    fn test_length_mismatches() {
        let data: Vec<i8> = vec![0; 5];
        let mut out = vec![0i32; 2];
        assert!(row_sums_into(&data, 2, 3, &mut out).is_err());
        let data: Vec<i8> = vec![0; 6];
        let mut short = vec![0i32; 1];
        assert!(row_sums_into(&data, 2, 3, &mut short).is_err());
        assert!(col_sums_into(&data, 2, 3, &mut short).is_err());
    }
}
