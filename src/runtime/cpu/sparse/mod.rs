//! Sparse primitives for the CPU runtime
//!
//! Conversions run directly on the shared host kernels in
//! [`crate::algorithm::convert`]. The BLAS-style kernels accumulate in f64
//! and visit stored entries in index order, so results are deterministic;
//! the row-parallel SpMM path partitions disjoint output rows and produces
//! the same values as the serial path.

mod blas;
mod spgemm;

use super::{CpuClient, CpuRuntime};
use crate::algorithm::convert;
use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::sparse::{BlasParams, CooData, CsrData, SparseOps, SparseStorage};
use crate::tensor::Tensor;

impl SparseOps<CpuRuntime> for CpuClient {
    fn dense_to_coo<T: Element>(
        &self,
        dense: &Tensor<CpuRuntime>,
        sparse_dim: usize,
    ) -> Result<CooData<CpuRuntime>> {
        let data: Vec<T> = dense.to_vec();
        let shape = dense.shape().to_vec();
        let (indices, values, nnz) = convert::dense_to_coo_host(&data, &shape, sparse_dim)?;

        let mut values_shape = vec![nnz];
        values_shape.extend_from_slice(&shape[sparse_dim..]);

        CooData::new(
            Tensor::try_from_slice(&indices, &[sparse_dim, nnz], dense.device())?,
            Tensor::try_from_slice(&values, &values_shape, dense.device())?,
            shape,
            true,
        )
    }

    fn coo_to_dense<T: Element>(&self, coo: &CooData<CpuRuntime>) -> Result<Tensor<CpuRuntime>> {
        let indices: Vec<i64> = coo.indices.to_vec();
        let values: Vec<T> = coo.values.to_vec();

        let mut out = vec![T::zero(); coo.shape.iter().product()];
        convert::coo_to_dense_host(&indices, &values, coo.nnz(), &coo.shape, coo.sparse_dim(), &mut out);

        Tensor::try_from_slice(&out, &coo.shape, coo.device())
    }

    fn coo_to_csr<T: Element>(&self, coo: &CooData<CpuRuntime>) -> Result<CsrData<CpuRuntime>> {
        if coo.dense_dim() != 0 {
            return Err(Error::invalid_argument(
                "coo",
                format!(
                    "CSR cannot carry trailing dense dimensions; got {} sparse of {} dims",
                    coo.sparse_dim(),
                    coo.shape.len()
                ),
            ));
        }

        let mut indices: Vec<i64> = coo.indices.to_vec();
        let mut values: Vec<T> = coo.values.to_vec();
        let mut nnz = coo.nnz();
        if !coo.is_coalesced() {
            (indices, values, nnz) = convert::coalesce_host(&indices, &values, nnz, &coo.shape, 1);
        }

        let (crows, cols, vals) = convert::coo_to_csr_host(&indices, &values, nnz, &coo.shape)?;
        let out_nnz = cols.len();

        CsrData::new(
            Tensor::try_from_slice(&crows, &[crows.len()], coo.device())?,
            Tensor::try_from_slice(&cols, &[out_nnz], coo.device())?,
            Tensor::try_from_slice(&vals, &[out_nnz], coo.device())?,
            coo.shape.clone(),
        )
    }

    fn csr_to_coo<T: Element>(&self, csr: &CsrData<CpuRuntime>) -> Result<CooData<CpuRuntime>> {
        let crows: Vec<i64> = csr.crows.to_vec();
        let cols: Vec<i64> = csr.cols.to_vec();
        let values: Vec<T> = csr.values.to_vec();

        let (indices, vals) = convert::csr_to_coo_host(&crows, &cols, &values, &csr.shape);
        let sparse_dim = csr.shape.len();
        let nnz = vals.len();

        CooData::new(
            Tensor::try_from_slice(&indices, &[sparse_dim, nnz], csr.device())?,
            Tensor::try_from_slice(&vals, &[nnz], csr.device())?,
            csr.shape.clone(),
            true,
        )
    }

    fn csr_to_dense<T: Element>(&self, csr: &CsrData<CpuRuntime>) -> Result<Tensor<CpuRuntime>> {
        let crows: Vec<i64> = csr.crows.to_vec();
        let cols: Vec<i64> = csr.cols.to_vec();
        let values: Vec<T> = csr.values.to_vec();

        let mut out = vec![T::zero(); csr.shape.iter().product()];
        convert::csr_to_dense_host(&crows, &cols, &values, &csr.shape, &mut out);

        Tensor::try_from_slice(&out, &csr.shape, csr.device())
    }

    fn coalesce<T: Element>(&self, coo: &CooData<CpuRuntime>) -> Result<CooData<CpuRuntime>> {
        let indices: Vec<i64> = coo.indices.to_vec();
        let values: Vec<T> = coo.values.to_vec();
        let sparse_dim = coo.sparse_dim();
        let dense_size = coo.dense_size();

        let (out_indices, out_values, out_nnz) = convert::coalesce_host(
            &indices,
            &values,
            coo.nnz(),
            &coo.shape[..sparse_dim],
            dense_size,
        );

        let mut values_shape = vec![out_nnz];
        values_shape.extend_from_slice(&coo.shape[sparse_dim..]);

        CooData::new(
            Tensor::try_from_slice(&out_indices, &[sparse_dim, out_nnz], coo.device())?,
            Tensor::try_from_slice(&out_values, &values_shape, coo.device())?,
            coo.shape.clone(),
            true,
        )
    }

    fn spmm_csr<T: Element>(
        &self,
        a: &CsrData<CpuRuntime>,
        b: &Tensor<CpuRuntime>,
        y: &mut Tensor<CpuRuntime>,
        params: &BlasParams,
    ) -> Result<()> {
        blas::spmm_csr::<T>(a, b, y, params)
    }

    fn spmm_coo<T: Element>(
        &self,
        a: &CooData<CpuRuntime>,
        b: &Tensor<CpuRuntime>,
        y: &mut Tensor<CpuRuntime>,
        params: &BlasParams,
    ) -> Result<()> {
        blas::spmm_coo::<T>(a, b, y, params)
    }

    fn spmv_csr<T: Element>(
        &self,
        a: &CsrData<CpuRuntime>,
        x: &Tensor<CpuRuntime>,
        y: &mut Tensor<CpuRuntime>,
        params: &BlasParams,
    ) -> Result<()> {
        blas::spmv_csr::<T>(a, x, y, params)
    }

    fn spgemm_csr<T: Element>(
        &self,
        a: &CsrData<CpuRuntime>,
        b: &CsrData<CpuRuntime>,
        params: &BlasParams,
    ) -> Result<CsrData<CpuRuntime>> {
        spgemm::esc_spgemm_csr::<T>(a, b, params)
    }

    fn sddmm_csr<T: Element>(
        &self,
        a: &Tensor<CpuRuntime>,
        b: &Tensor<CpuRuntime>,
        mask: &CsrData<CpuRuntime>,
        params: &BlasParams,
    ) -> Result<CsrData<CpuRuntime>> {
        blas::sddmm_csr::<T>(a, b, mask, params)
    }
}
