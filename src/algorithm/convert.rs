//! Host-side conversion kernels shared by all backends
//!
//! COO indices are stored dimension-major: `indices[d * nnz + i]` is the
//! coordinate of entry `i` along sparse dimension `d`. Values carry an
//! optional trailing dense slice of `dense_size` elements per entry.

use crate::dtype::Element;
use crate::error::{Error, Result};

/// Row-major strides over a shape, in elements
fn strides_of(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Flattened sparse key of COO entry `i`
fn flat_key(indices: &[i64], nnz: usize, strides: &[usize], i: usize) -> i64 {
    let mut key = 0i64;
    for (d, &stride) in strides.iter().enumerate() {
        key += indices[d * nnz + i] * stride as i64;
    }
    key
}

/// True iff the flattened sparse keys are strictly ascending
pub fn is_coalesced_host(indices: &[i64], nnz: usize, sparse_shape: &[usize]) -> bool {
    let strides = strides_of(sparse_shape);
    for i in 1..nnz {
        if flat_key(indices, nnz, &strides, i) <= flat_key(indices, nnz, &strides, i - 1) {
            return false;
        }
    }
    true
}

/// Convert a dense row-major buffer to COO with `sparse_dim` leading sparse
/// dimensions
///
/// A prefix cell is kept iff any element of its trailing dense slice is
/// nonzero. Two passes: count, then fill. The scan order is row-major, so the
/// output is coalesced by construction.
///
/// Returns `(indices, values, nnz)`.
pub fn dense_to_coo_host<T: Element>(
    data: &[T],
    shape: &[usize],
    sparse_dim: usize,
) -> Result<(Vec<i64>, Vec<T>, usize)> {
    if sparse_dim == 0 || sparse_dim > shape.len() {
        return Err(Error::invalid_argument(
            "sparse_dim",
            format!("must be in 1..={}, got {}", shape.len(), sparse_dim),
        ));
    }

    let sparse_shape = &shape[..sparse_dim];
    let cells: usize = sparse_shape.iter().product();
    let dense_size: usize = shape[sparse_dim..].iter().product();

    let is_live = |cell: usize| -> bool {
        let slice = &data[cell * dense_size..(cell + 1) * dense_size];
        slice.iter().any(|v| v.to_f64() != 0.0)
    };

    let nnz = (0..cells).filter(|&c| is_live(c)).count();

    let mut indices = vec![0i64; sparse_dim * nnz];
    let mut values = Vec::with_capacity(nnz * dense_size);
    let strides = strides_of(sparse_shape);

    let mut out = 0usize;
    for cell in 0..cells {
        if !is_live(cell) {
            continue;
        }
        for d in 0..sparse_dim {
            indices[d * nnz + out] = ((cell / strides[d]) % sparse_shape[d]) as i64;
        }
        values.extend_from_slice(&data[cell * dense_size..(cell + 1) * dense_size]);
        out += 1;
    }

    Ok((indices, values, nnz))
}

/// Scatter COO entries into a zeroed dense buffer, summing duplicates
pub fn coo_to_dense_host<T: Element>(
    indices: &[i64],
    values: &[T],
    nnz: usize,
    shape: &[usize],
    sparse_dim: usize,
    out: &mut [T],
) {
    if nnz == 0 {
        return;
    }
    let sparse_shape = &shape[..sparse_dim];
    let dense_size: usize = shape[sparse_dim..].iter().product();
    let strides = strides_of(sparse_shape);

    for i in 0..nnz {
        let cell = flat_key(indices, nnz, &strides, i) as usize;
        let dst = &mut out[cell * dense_size..(cell + 1) * dense_size];
        let src = &values[i * dense_size..(i + 1) * dense_size];
        for (d, &s) in dst.iter_mut().zip(src.iter()) {
            *d = *d + s;
        }
    }
}

/// Sort COO entries by flattened sparse index and sum duplicate runs
///
/// Trailing dense slices of duplicates are summed elementwise. Returns
/// `(indices, values, nnz)` of the coalesced tensor.
pub fn coalesce_host<T: Element>(
    indices: &[i64],
    values: &[T],
    nnz: usize,
    sparse_shape: &[usize],
    dense_size: usize,
) -> (Vec<i64>, Vec<T>, usize) {
    let sparse_dim = sparse_shape.len();
    if nnz == 0 {
        return (Vec::new(), Vec::new(), 0);
    }

    let strides = strides_of(sparse_shape);
    let mut perm: Vec<usize> = (0..nnz).collect();
    perm.sort_by_key(|&i| flat_key(indices, nnz, &strides, i));

    // Count unique keys to size the output exactly
    let mut out_nnz = 0usize;
    let mut prev = None;
    for &i in &perm {
        let key = flat_key(indices, nnz, &strides, i);
        if prev != Some(key) {
            out_nnz += 1;
            prev = Some(key);
        }
    }

    let mut out_indices = vec![0i64; sparse_dim * out_nnz];
    let mut out_values = vec![T::zero(); out_nnz * dense_size];

    let mut slot = usize::MAX;
    let mut prev = None;
    for &i in &perm {
        let key = flat_key(indices, nnz, &strides, i);
        if prev != Some(key) {
            slot = slot.wrapping_add(1);
            prev = Some(key);
            for d in 0..sparse_dim {
                out_indices[d * out_nnz + slot] = indices[d * nnz + i];
            }
        }
        let dst = &mut out_values[slot * dense_size..(slot + 1) * dense_size];
        let src = &values[i * dense_size..(i + 1) * dense_size];
        for (d, &s) in dst.iter_mut().zip(src.iter()) {
            *d = *d + s;
        }
    }

    (out_indices, out_values, out_nnz)
}

/// Convert coalesced COO to CSR
///
/// `shape` is `[M, N]` or batched `[B, M, N]`; the input must have
/// `sparse_dim == shape.len()` (no trailing dense dims) and be coalesced.
/// Batched inputs must have the same nnz in every batch.
///
/// Returns `(crows, cols, values)` with `crows.len() == B * (M + 1)`.
pub fn coo_to_csr_host<T: Element>(
    indices: &[i64],
    values: &[T],
    nnz: usize,
    shape: &[usize],
) -> Result<(Vec<i64>, Vec<i64>, Vec<T>)> {
    let (batch, m) = match shape.len() {
        2 => (1usize, shape[0]),
        3 => (shape[0], shape[1]),
        rank => {
            return Err(Error::invalid_argument(
                "shape",
                format!("CSR supports rank 2 or 3, got rank {rank}"),
            ))
        }
    };

    let (batch_ids, rows, cols): (&[i64], &[i64], &[i64]) = if shape.len() == 3 {
        (&indices[..nnz], &indices[nnz..2 * nnz], &indices[2 * nnz..])
    } else {
        (&[], &indices[..nnz], &indices[nnz..])
    };

    if batch > 1 {
        let mut per_batch = vec![0usize; batch];
        for &b in batch_ids {
            per_batch[b as usize] += 1;
        }
        let batch_nnz = per_batch[0];
        if per_batch.iter().any(|&c| c != batch_nnz) {
            return Err(Error::invalid_argument(
                "coo",
                "batched CSR requires uniform per-batch nnz".to_string(),
            ));
        }
    }

    let batch_nnz = if batch == 0 { 0 } else { nnz / batch };
    let mut crows = vec![0i64; batch * (m + 1)];

    // Entries are coalesced, so per batch they arrive row-sorted: counting
    // into crows then prefix-summing yields the row pointers.
    for i in 0..nnz {
        let b = if batch > 1 { batch_ids[i] as usize } else { 0 };
        let row = rows[i] as usize;
        crows[b * (m + 1) + row + 1] += 1;
    }
    for b in 0..batch {
        let seg = &mut crows[b * (m + 1)..(b + 1) * (m + 1)];
        for r in 0..m {
            seg[r + 1] += seg[r];
        }
        debug_assert_eq!(seg[m] as usize, batch_nnz);
    }

    Ok((crows, cols.to_vec(), values.to_vec()))
}

/// Expand CSR row pointers back to COO indices
///
/// Batched CSR yields a 3-row index tensor with the batch coordinate first.
/// Returns `(indices, values)`; the output is coalesced.
pub fn csr_to_coo_host<T: Element>(
    crows: &[i64],
    cols: &[i64],
    values: &[T],
    shape: &[usize],
) -> (Vec<i64>, Vec<T>) {
    let (batch, m) = match shape.len() {
        3 => (shape[0], shape[1]),
        _ => (1, shape[0]),
    };
    let nnz = cols.len();
    let batch_nnz = if batch == 0 { 0 } else { nnz / batch };
    let sparse_dim = if shape.len() == 3 { 3 } else { 2 };

    let mut indices = vec![0i64; sparse_dim * nnz];
    for b in 0..batch {
        let seg = &crows[b * (m + 1)..(b + 1) * (m + 1)];
        for row in 0..m {
            for pos in seg[row] as usize..seg[row + 1] as usize {
                let i = b * batch_nnz + pos;
                if sparse_dim == 3 {
                    indices[i] = b as i64;
                    indices[nnz + i] = row as i64;
                    indices[2 * nnz + i] = cols[i];
                } else {
                    indices[i] = row as i64;
                    indices[nnz + i] = cols[i];
                }
            }
        }
    }

    (indices, values.to_vec())
}

/// Scatter CSR entries into a zeroed dense buffer
pub fn csr_to_dense_host<T: Element>(
    crows: &[i64],
    cols: &[i64],
    values: &[T],
    shape: &[usize],
    out: &mut [T],
) {
    let (batch, m, n) = match shape.len() {
        3 => (shape[0], shape[1], shape[2]),
        _ => (1, shape[0], shape[1]),
    };
    let nnz = cols.len();
    let batch_nnz = if batch == 0 { 0 } else { nnz / batch };

    for b in 0..batch {
        let seg = &crows[b * (m + 1)..(b + 1) * (m + 1)];
        for row in 0..m {
            for pos in seg[row] as usize..seg[row + 1] as usize {
                let i = b * batch_nnz + pos;
                let col = cols[i] as usize;
                out[b * m * n + row * n + col] = values[i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_to_coo_rank2() {
        // [[1, 0], [0, 2]]
        let data = [1.0f32, 0.0, 0.0, 2.0];
        let (indices, values, nnz) = dense_to_coo_host(&data, &[2, 2], 2).unwrap();
        assert_eq!(nnz, 2);
        assert_eq!(indices, vec![0, 1, 0, 1]);
        assert_eq!(values, vec![1.0, 2.0]);
        assert!(is_coalesced_host(&indices, nnz, &[2, 2]));
    }

    #[test]
    fn test_dense_to_coo_with_dense_dims() {
        // Shape [2, 2] with sparse_dim 1: rows are the dense slices
        let data = [0.0f32, 0.0, 3.0, 4.0];
        let (indices, values, nnz) = dense_to_coo_host(&data, &[2, 2], 1).unwrap();
        assert_eq!(nnz, 1);
        assert_eq!(indices, vec![1]);
        assert_eq!(values, vec![3.0, 4.0]);
    }

    #[test]
    fn test_dense_round_trip() {
        let data = [0.0f64, 5.0, 0.0, 0.0, 0.0, 7.0];
        let (indices, values, nnz) = dense_to_coo_host(&data, &[2, 3], 2).unwrap();
        let mut out = vec![0.0f64; 6];
        coo_to_dense_host(&indices, &values, nnz, &[2, 3], 2, &mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn test_coalesce_sums_duplicates() {
        // Entries (1,0)=2, (0,1)=1, (1,0)=3 -> (0,1)=1, (1,0)=5
        let indices = [1i64, 0, 1, 0, 1, 0];
        let values = [2.0f32, 1.0, 3.0];
        let (idx, vals, nnz) = coalesce_host(&indices, &values, 3, &[2, 2], 1);
        assert_eq!(nnz, 2);
        assert_eq!(idx, vec![0, 1, 1, 0]);
        assert_eq!(vals, vec![1.0, 5.0]);
    }

    #[test]
    fn test_coo_to_csr_rank2() {
        // [[0, 1], [2, 0]]
        let indices = [0i64, 1, 1, 0];
        let values = [1.0f32, 2.0];
        let (crows, cols, vals) = coo_to_csr_host(&indices, &values, 2, &[2, 2]).unwrap();
        assert_eq!(crows, vec![0, 1, 2]);
        assert_eq!(cols, vec![1, 0]);
        assert_eq!(vals, vec![1.0, 2.0]);
    }

    #[test]
    fn test_coo_to_csr_ragged_batch_rejected() {
        // Batch 0 has two entries, batch 1 has one
        let indices = [0i64, 0, 1, 0, 1, 0, 0, 1, 0];
        let values = [1.0f32, 2.0, 3.0];
        assert!(coo_to_csr_host(&indices, &values, 3, &[2, 2, 2]).is_err());
    }

    #[test]
    fn test_csr_coo_round_trip_batched() {
        let crows = [0i64, 1, 2, 0, 0, 2];
        let cols = [1i64, 0, 0, 1];
        let values = [1.0f64, 2.0, 3.0, 4.0];
        let shape = [2usize, 2, 2];

        let (indices, vals) = csr_to_coo_host(&crows, &cols, &values, &shape);
        assert_eq!(indices, vec![0, 0, 1, 1, 0, 1, 1, 1, 1, 0, 0, 1]);

        let (crows2, cols2, vals2) = coo_to_csr_host(&indices, &vals, 4, &shape).unwrap();
        assert_eq!(crows2, crows.to_vec());
        assert_eq!(cols2, cols.to_vec());
        assert_eq!(vals2, values.to_vec());
    }

    #[test]
    fn test_csr_to_dense() {
        let crows = [0i64, 1, 2];
        let cols = [1i64, 0];
        let values = [1.0f32, 2.0];
        let mut out = vec![0.0f32; 4];
        csr_to_dense_host(&crows, &cols, &values, &[2, 2], &mut out);
        assert_eq!(out, vec![0.0, 1.0, 2.0, 0.0]);
    }
}
