//! Shape validation and numeric tolerances for sparse primitives

use crate::dtype::Element;
use crate::error::{Error, Result};

/// Resolved dimensions of an SpMM call: `Y[batch](m, n) = op(A)(m, k) · op(B)(k, n)`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SpmmDims {
    /// Number of batches (1 for rank-2 operands)
    pub batch: usize,
    /// Rows of op(A) and of the output
    pub m: usize,
    /// Contraction dimension
    pub k: usize,
    /// Columns of op(B) and of the output
    pub n: usize,
}

/// Validate SpMM operand shapes and resolve the effective dimensions
///
/// `a_shape` is rank 2 (`[M, K]`) or rank 3 batched (`[B, M, K]`); `b_shape`
/// must have the same rank with matching batch count. Transposes apply to the
/// trailing two dimensions.
pub fn validate_spmm_shapes(
    a_shape: &[usize],
    b_shape: &[usize],
    trans_a: bool,
    trans_b: bool,
) -> Result<SpmmDims> {
    if a_shape.len() != 2 && a_shape.len() != 3 {
        return Err(Error::invalid_argument(
            "a",
            format!("SpMM expects a rank-2 or rank-3 sparse operand, got rank {}", a_shape.len()),
        ));
    }
    if b_shape.len() != a_shape.len() {
        return Err(Error::shape_mismatch(a_shape, b_shape));
    }

    let batch = if a_shape.len() == 3 {
        if a_shape[0] != b_shape[0] {
            return Err(Error::shape_mismatch(a_shape, b_shape));
        }
        a_shape[0]
    } else {
        1
    };

    let (a_rows, a_cols) = (a_shape[a_shape.len() - 2], a_shape[a_shape.len() - 1]);
    let (b_rows, b_cols) = (b_shape[b_shape.len() - 2], b_shape[b_shape.len() - 1]);

    let (m, k) = if trans_a { (a_cols, a_rows) } else { (a_rows, a_cols) };
    let (kb, n) = if trans_b { (b_cols, b_rows) } else { (b_rows, b_cols) };

    if k != kb {
        return Err(Error::shape_mismatch(a_shape, b_shape));
    }

    Ok(SpmmDims { batch, m, k, n })
}

/// Validate SpMV operand shapes, returning `(out_len, x_len)`
///
/// SpMV is defined on rank-2 matrices and 1-D vectors only; a batched sparse
/// operand is rejected.
pub fn validate_spmv_shapes(
    a_shape: &[usize],
    x_shape: &[usize],
    trans_a: bool,
) -> Result<(usize, usize)> {
    if a_shape.len() != 2 {
        return Err(Error::invalid_argument(
            "a",
            format!("SpMV is not batched: expected a rank-2 operand, got rank {}", a_shape.len()),
        ));
    }
    if x_shape.len() != 1 {
        return Err(Error::invalid_argument(
            "x",
            format!("SpMV expects a 1-D vector, got rank {}", x_shape.len()),
        ));
    }

    let (m, k) = if trans_a {
        (a_shape[1], a_shape[0])
    } else {
        (a_shape[0], a_shape[1])
    };

    if x_shape[0] != k {
        return Err(Error::shape_mismatch(&[k], x_shape));
    }

    Ok((m, k))
}

/// Validate SpGEMM operand shapes, returning `(m, k, n)`
pub fn validate_spgemm_shapes(a_shape: &[usize], b_shape: &[usize]) -> Result<(usize, usize, usize)> {
    if a_shape.len() != 2 || b_shape.len() != 2 {
        return Err(Error::invalid_argument(
            "a",
            "SpGEMM expects rank-2 CSR operands".to_string(),
        ));
    }
    if a_shape[1] != b_shape[0] {
        return Err(Error::shape_mismatch(a_shape, b_shape));
    }
    Ok((a_shape[0], a_shape[1], b_shape[1]))
}

/// Threshold below which values are dropped from sparse results
///
/// Rounding can turn exact zeros into values like `1e-16`; keeping them would
/// bloat the sparsity structure and make it input-order dependent. The
/// threshold scales with element precision so every backend filters the same
/// entries.
pub fn zero_tolerance<T: Element>() -> f64 {
    match std::mem::size_of::<T>() {
        8 => 1e-15,
        4 => 1e-7,
        2 => 1e-3,
        _ => 1e-2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spmm_plain() {
        let d = validate_spmm_shapes(&[3, 4], &[4, 5], false, false).unwrap();
        assert_eq!(d, SpmmDims { batch: 1, m: 3, k: 4, n: 5 });
    }

    #[test]
    fn test_spmm_transposed() {
        let d = validate_spmm_shapes(&[4, 3], &[5, 4], true, true).unwrap();
        assert_eq!(d, SpmmDims { batch: 1, m: 3, k: 4, n: 5 });
    }

    #[test]
    fn test_spmm_batched() {
        let d = validate_spmm_shapes(&[2, 3, 4], &[2, 4, 5], false, false).unwrap();
        assert_eq!(d.batch, 2);
        assert!(validate_spmm_shapes(&[2, 3, 4], &[3, 4, 5], false, false).is_err());
    }

    #[test]
    fn test_spmm_inner_mismatch() {
        assert!(validate_spmm_shapes(&[3, 4], &[5, 6], false, false).is_err());
    }

    #[test]
    fn test_spmv_rejects_batched() {
        assert!(validate_spmv_shapes(&[2, 3, 4], &[4], false).is_err());
        assert_eq!(validate_spmv_shapes(&[3, 4], &[4], false).unwrap(), (3, 4));
        assert_eq!(validate_spmv_shapes(&[3, 4], &[3], true).unwrap(), (4, 3));
    }

    #[test]
    fn test_spgemm_shapes() {
        assert_eq!(validate_spgemm_shapes(&[3, 4], &[4, 5]).unwrap(), (3, 4, 5));
        assert!(validate_spgemm_shapes(&[3, 4], &[5, 5]).is_err());
    }

    #[test]
    fn test_zero_tolerance_scales_with_precision() {
        assert_eq!(zero_tolerance::<f64>(), 1e-15);
        assert_eq!(zero_tolerance::<f32>(), 1e-7);
        assert_eq!(zero_tolerance::<u8>(), 1e-2);
    }
}
