//! CSR/COO × dense kernels
//!
//! All kernels accumulate in f64 regardless of the element type and convert
//! once on write-back. The accumulator is seeded with `β·Y`, so `β = 0`
//! zeroes stale output data.

use crate::dtype::Element;
use crate::error::Result;
use crate::runtime::cpu::CpuRuntime;
use crate::sparse::{BlasParams, CooData, CsrData, SparseStorage};
use crate::tensor::Tensor;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Below this many output elements the parallel path is not worth spawning
#[cfg(feature = "rayon")]
const PARALLEL_THRESHOLD: usize = 4096;

/// Convert the f64 accumulator back to `T` and store it into `y`'s buffer
///
/// `y` must be contiguous with exactly `acc.len()` elements.
fn write_back<T: Element>(acc: &[f64], y: &mut Tensor<CpuRuntime>) {
    debug_assert!(y.is_contiguous());
    debug_assert_eq!(y.numel(), acc.len());
    let dst = y.storage().ptr() as *mut T;
    for (i, &v) in acc.iter().enumerate() {
        unsafe { dst.add(i).write(T::from_f64(v)) };
    }
}

/// Index into `op(B)` stored row-major as `(b_rows, b_cols)`
#[inline]
fn op_b<T: Element>(b: &[T], b_cols: usize, trans_b: bool, k: usize, j: usize) -> f64 {
    if trans_b {
        b[j * b_cols + k].to_f64()
    } else {
        b[k * b_cols + j].to_f64()
    }
}

/// One batch of `acc ← acc + α·A·op(B)` over rows `0..m` of a CSR segment
fn spmm_rows<T: Element>(
    acc: &mut [f64],
    crows: &[i64],
    cols: &[i64],
    vals: &[T],
    b: &[T],
    b_cols: usize,
    n: usize,
    alpha: f64,
    trans_b: bool,
) {
    let row_body = |(row, out_row): (usize, &mut [f64])| {
        for pos in crows[row] as usize..crows[row + 1] as usize {
            let k = cols[pos] as usize;
            let v = alpha * vals[pos].to_f64();
            for (j, out) in out_row.iter_mut().enumerate() {
                *out += v * op_b(b, b_cols, trans_b, k, j);
            }
        }
    };

    #[cfg(feature = "rayon")]
    if acc.len() >= PARALLEL_THRESHOLD {
        acc.par_chunks_mut(n).enumerate().for_each(row_body);
        return;
    }

    acc.chunks_mut(n).enumerate().for_each(row_body);
}

/// One batch of `acc ← acc + α·Aᵀ·op(B)`: scatter per stored entry
///
/// Transposed A writes to rows selected by column indices, so this path
/// stays serial; entry order makes it deterministic.
fn spmm_rows_trans_a<T: Element>(
    acc: &mut [f64],
    crows: &[i64],
    cols: &[i64],
    vals: &[T],
    b: &[T],
    b_cols: usize,
    n: usize,
    m: usize,
    alpha: f64,
    trans_b: bool,
) {
    for row in 0..m {
        for pos in crows[row] as usize..crows[row + 1] as usize {
            let out_row = cols[pos] as usize;
            let v = alpha * vals[pos].to_f64();
            for j in 0..n {
                acc[out_row * n + j] += v * op_b(b, b_cols, trans_b, row, j);
            }
        }
    }
}

pub(super) fn spmm_csr<T: Element>(
    a: &CsrData<CpuRuntime>,
    b: &Tensor<CpuRuntime>,
    y: &mut Tensor<CpuRuntime>,
    params: &BlasParams,
) -> Result<()> {
    let batch = a.batch_count();
    let m = a.rows();
    let batch_nnz = a.batch_nnz();

    let b_shape = b.shape();
    let (b_rows, b_cols) = (b_shape[b_shape.len() - 2], b_shape[b_shape.len() - 1]);
    let y_shape = y.shape();
    let (out_m, n) = (y_shape[y_shape.len() - 2], y_shape[y_shape.len() - 1]);

    let crows: Vec<i64> = a.crows.to_vec();
    let cols: Vec<i64> = a.cols.to_vec();
    let vals: Vec<T> = a.values.to_vec();
    let b_data: Vec<T> = b.to_vec();
    let y_data: Vec<T> = y.to_vec();

    let mut acc: Vec<f64> = y_data.iter().map(|v| params.beta * v.to_f64()).collect();

    for bi in 0..batch {
        let crows_seg = &crows[bi * (m + 1)..(bi + 1) * (m + 1)];
        let cols_seg = &cols[bi * batch_nnz..(bi + 1) * batch_nnz];
        let vals_seg = &vals[bi * batch_nnz..(bi + 1) * batch_nnz];
        let b_seg = &b_data[bi * b_rows * b_cols..(bi + 1) * b_rows * b_cols];
        let acc_seg = &mut acc[bi * out_m * n..(bi + 1) * out_m * n];

        if params.trans_a {
            spmm_rows_trans_a(
                acc_seg, crows_seg, cols_seg, vals_seg, b_seg, b_cols, n, m, params.alpha,
                params.trans_b,
            );
        } else {
            spmm_rows(
                acc_seg, crows_seg, cols_seg, vals_seg, b_seg, b_cols, n, params.alpha,
                params.trans_b,
            );
        }
    }

    write_back::<T>(&acc, y);
    Ok(())
}

pub(super) fn spmm_coo<T: Element>(
    a: &CooData<CpuRuntime>,
    b: &Tensor<CpuRuntime>,
    y: &mut Tensor<CpuRuntime>,
    params: &BlasParams,
) -> Result<()> {
    let nnz = a.nnz();
    let b_cols = b.shape()[1];
    let y_shape = y.shape();
    let n = y_shape[1];

    let indices: Vec<i64> = a.indices.to_vec();
    let vals: Vec<T> = a.values.to_vec();
    let b_data: Vec<T> = b.to_vec();
    let y_data: Vec<T> = y.to_vec();

    let mut acc: Vec<f64> = y_data.iter().map(|v| params.beta * v.to_f64()).collect();

    for i in 0..nnz {
        let (mut row, mut k) = (indices[i] as usize, indices[nnz + i] as usize);
        if params.trans_a {
            std::mem::swap(&mut row, &mut k);
        }
        let v = params.alpha * vals[i].to_f64();
        for j in 0..n {
            acc[row * n + j] += v * op_b(&b_data, b_cols, params.trans_b, k, j);
        }
    }

    write_back::<T>(&acc, y);
    Ok(())
}

pub(super) fn spmv_csr<T: Element>(
    a: &CsrData<CpuRuntime>,
    x: &Tensor<CpuRuntime>,
    y: &mut Tensor<CpuRuntime>,
    params: &BlasParams,
) -> Result<()> {
    let m = a.rows();

    let crows: Vec<i64> = a.crows.to_vec();
    let cols: Vec<i64> = a.cols.to_vec();
    let vals: Vec<T> = a.values.to_vec();
    let x_data: Vec<T> = x.to_vec();
    let y_data: Vec<T> = y.to_vec();

    let mut acc: Vec<f64> = y_data.iter().map(|v| params.beta * v.to_f64()).collect();

    if params.trans_a {
        for row in 0..m {
            let xv = x_data[row].to_f64();
            for pos in crows[row] as usize..crows[row + 1] as usize {
                acc[cols[pos] as usize] += params.alpha * vals[pos].to_f64() * xv;
            }
        }
    } else {
        for (row, out) in acc.iter_mut().enumerate() {
            let mut sum = 0.0;
            for pos in crows[row] as usize..crows[row + 1] as usize {
                sum += vals[pos].to_f64() * x_data[cols[pos] as usize].to_f64();
            }
            *out += params.alpha * sum;
        }
    }

    write_back::<T>(&acc, y);
    Ok(())
}

/// `C ← α·(op(A)·op(B)) ∘ spy(mask) + β·mask`
///
/// Only entries present in the mask are computed; the output reuses the
/// mask's sparsity structure.
pub(super) fn sddmm_csr<T: Element>(
    a: &Tensor<CpuRuntime>,
    b: &Tensor<CpuRuntime>,
    mask: &CsrData<CpuRuntime>,
    params: &BlasParams,
) -> Result<CsrData<CpuRuntime>> {
    let m = mask.rows();
    let a_cols = a.shape()[1];
    let b_cols = b.shape()[1];
    let k = if params.trans_a { a.shape()[0] } else { a_cols };

    let crows: Vec<i64> = mask.crows.to_vec();
    let cols: Vec<i64> = mask.cols.to_vec();
    let mask_vals: Vec<T> = mask.values.to_vec();
    let a_data: Vec<T> = a.to_vec();
    let b_data: Vec<T> = b.to_vec();

    let mut out_vals: Vec<T> = Vec::with_capacity(mask.nnz());
    for row in 0..m {
        for pos in crows[row] as usize..crows[row + 1] as usize {
            let col = cols[pos] as usize;
            let mut dot = 0.0;
            for kk in 0..k {
                let av = if params.trans_a {
                    a_data[kk * a_cols + row].to_f64()
                } else {
                    a_data[row * a_cols + kk].to_f64()
                };
                dot += av * op_b(&b_data, b_cols, params.trans_b, kk, col);
            }
            out_vals.push(T::from_f64(
                params.alpha * dot + params.beta * mask_vals[pos].to_f64(),
            ));
        }
    }

    CsrData::new(
        mask.crows.clone(),
        mask.cols.clone(),
        Tensor::try_from_slice(&out_vals, &[out_vals.len()], mask.device())?,
        mask.shape.clone(),
    )
}
