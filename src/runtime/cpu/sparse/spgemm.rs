//! Sparse × sparse matmul (SpGEMM) via exact symbolic computation
//!
//! Phase 1 counts the distinct output columns per row so the numeric phase
//! can pre-size its accumulators. Phase 2 accumulates products per output
//! row in f64, sorts by column, and drops entries below the dtype's zero
//! tolerance so rounding noise does not inflate the output structure.

use crate::algorithm::sparse::zero_tolerance;
use crate::dtype::Element;
use crate::error::Result;
use crate::runtime::cpu::CpuRuntime;
use crate::sparse::{BlasParams, CsrData};
use crate::tensor::Tensor;
use std::collections::{HashMap, HashSet};

pub(super) fn esc_spgemm_csr<T: Element>(
    a: &CsrData<CpuRuntime>,
    b: &CsrData<CpuRuntime>,
    params: &BlasParams,
) -> Result<CsrData<CpuRuntime>> {
    let m = a.rows();
    let n = b.ncols();

    let a_crows: Vec<i64> = a.crows.to_vec();
    let a_cols: Vec<i64> = a.cols.to_vec();
    let a_vals: Vec<T> = a.values.to_vec();

    let b_crows: Vec<i64> = b.crows.to_vec();
    let b_cols: Vec<i64> = b.cols.to_vec();
    let b_vals: Vec<T> = b.values.to_vec();

    // Phase 1: count distinct columns per output row
    let mut row_nnz = vec![0usize; m];
    let mut col_set: HashSet<usize> = HashSet::new();
    for row in 0..m {
        col_set.clear();
        for a_idx in a_crows[row] as usize..a_crows[row + 1] as usize {
            let k = a_cols[a_idx] as usize;
            for b_idx in b_crows[k] as usize..b_crows[k + 1] as usize {
                col_set.insert(b_cols[b_idx] as usize);
            }
        }
        row_nnz[row] = col_set.len();
    }

    // Phase 2: accumulate, sort, filter
    let tol = zero_tolerance::<T>();
    let mut c_crows: Vec<i64> = Vec::with_capacity(m + 1);
    let mut c_cols: Vec<i64> = Vec::new();
    let mut c_vals: Vec<T> = Vec::new();
    c_crows.push(0);

    for row in 0..m {
        let mut accum: HashMap<usize, f64> = HashMap::with_capacity(row_nnz[row]);
        for a_idx in a_crows[row] as usize..a_crows[row + 1] as usize {
            let k = a_cols[a_idx] as usize;
            let a_val = a_vals[a_idx].to_f64();
            for b_idx in b_crows[k] as usize..b_crows[k + 1] as usize {
                let j = b_cols[b_idx] as usize;
                *accum.entry(j).or_insert(0.0) += a_val * b_vals[b_idx].to_f64();
            }
        }

        let mut entries: Vec<(usize, f64)> = accum.into_iter().collect();
        entries.sort_by_key(|&(col, _)| col);

        for (col, val) in entries {
            let scaled = params.alpha * val;
            if scaled.abs() > tol {
                c_cols.push(col as i64);
                c_vals.push(T::from_f64(scaled));
            }
        }
        c_crows.push(c_cols.len() as i64);
    }

    let nnz = c_cols.len();
    CsrData::new(
        Tensor::try_from_slice(&c_crows, &[m + 1], a.device())?,
        Tensor::try_from_slice(&c_cols, &[nnz], a.device())?,
        Tensor::try_from_slice(&c_vals, &[nnz], a.device())?,
        vec![m, n],
    )
}
