//! Sparse primitives for the CUDA runtime
//!
//! BLAS-style kernels run through cuSPARSE: build descriptors, query the
//! external buffer size, acquire it as a scoped [`ScratchBuffer`], execute.
//! Deterministic algorithm variants (`CSR_ALG2`) are selected so repeated
//! runs on the same device reproduce bitwise-identical results.
//!
//! Format conversions stage through the host and share the kernels in
//! [`crate::algorithm::convert`]; their cost is transfer-bound either way.
//! Index tensors are i64 crate-wide and cast to i32 at the cuSPARSE
//! boundary, rejecting matrices whose dimensions or nnz overflow.

use cudarc::cusparse::sys::*;

use super::cusparse::{
    check_cusparse, dtype_to_cusparse, operation, CsrMatrixDescriptor, DenseMatrixDescriptor,
    DenseVecDescriptor, SpGemmDescriptor,
};
use super::{CudaClient, CudaRuntime};
use crate::algorithm::convert;
use crate::algorithm::sparse::zero_tolerance;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::runtime::{Runtime, ScratchBuffer};
use crate::sparse::{BlasParams, CooData, CsrData, SparseOps, SparseStorage};
use crate::tensor::Tensor;

/// Reject dimensions the 32-bit cuSPARSE index type cannot address
fn check_i32_range(values: &[usize]) -> Result<()> {
    for &v in values {
        if v > i32::MAX as usize {
            return Err(Error::invalid_argument(
                "shape",
                format!("dimension or nnz {v} exceeds the cusparse 32-bit index limit"),
            ));
        }
    }
    Ok(())
}

/// cuSPARSE sparse math is float-only here; integer dtypes stay on the CPU
fn blas_value_type(dtype: DType, op: &'static str) -> Result<cudaDataType> {
    match dtype {
        DType::F32 | DType::F64 => dtype_to_cusparse(dtype),
        _ => Err(Error::unsupported_dtype(dtype, op)),
    }
}

impl CudaClient {
    /// Cast an i64 index tensor to i32, rejecting values outside i32 range
    fn index_to_i32(&self, t: &Tensor<CudaRuntime>) -> Result<Tensor<CudaRuntime>> {
        let data: Vec<i64> = t.to_vec();
        let mut cast = Vec::with_capacity(data.len());
        for &v in &data {
            if v < 0 || v > i32::MAX as i64 {
                return Err(Error::invalid_argument(
                    "indices",
                    format!("index {v} exceeds the cusparse 32-bit index limit"),
                ));
            }
            cast.push(v as i32);
        }
        Tensor::try_from_slice(&cast, &[cast.len()], t.device())
    }
}

impl SparseOps<CudaRuntime> for CudaClient {
    fn dense_to_coo<T: Element>(
        &self,
        dense: &Tensor<CudaRuntime>,
        sparse_dim: usize,
    ) -> Result<CooData<CudaRuntime>> {
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

    fn coo_to_dense<T: Element>(&self, coo: &CooData<CudaRuntime>) -> Result<Tensor<CudaRuntime>> {
        let indices: Vec<i64> = coo.indices.to_vec();
        let values: Vec<T> = coo.values.to_vec();

        let mut out = vec![T::zero(); coo.shape.iter().product()];
        convert::coo_to_dense_host(&indices, &values, coo.nnz(), &coo.shape, coo.sparse_dim(), &mut out);

        Tensor::try_from_slice(&out, &coo.shape, coo.device())
    }

    fn coo_to_csr<T: Element>(&self, coo: &CooData<CudaRuntime>) -> Result<CsrData<CudaRuntime>> {
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

    fn csr_to_coo<T: Element>(&self, csr: &CsrData<CudaRuntime>) -> Result<CooData<CudaRuntime>> {
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

    fn csr_to_dense<T: Element>(&self, csr: &CsrData<CudaRuntime>) -> Result<Tensor<CudaRuntime>> {
        let crows: Vec<i64> = csr.crows.to_vec();
        let cols: Vec<i64> = csr.cols.to_vec();
        let values: Vec<T> = csr.values.to_vec();

        let mut out = vec![T::zero(); csr.shape.iter().product()];
        convert::csr_to_dense_host(&crows, &cols, &values, &csr.shape, &mut out);

        Tensor::try_from_slice(&out, &csr.shape, csr.device())
    }

    fn coalesce<T: Element>(&self, coo: &CooData<CudaRuntime>) -> Result<CooData<CudaRuntime>> {
        let indices: Vec<i64> = coo.indices.to_vec();
        let values: Vec<T> = coo.values.to_vec();
        let sparse_dim = coo.sparse_dim();

        let (out_indices, out_values, out_nnz) = convert::coalesce_host(
            &indices,
            &values,
            coo.nnz(),
            &coo.shape[..sparse_dim],
            coo.dense_size(),
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
        a: &CsrData<CudaRuntime>,
        b: &Tensor<CudaRuntime>,
        y: &mut Tensor<CudaRuntime>,
        params: &BlasParams,
    ) -> Result<()> {
        let value_type = blas_value_type(a.dtype(), "spmm_cuda")?;

        let batch = a.batch_count();
        let (m, k) = (a.rows(), a.ncols());
        let batch_nnz = a.batch_nnz();
        check_i32_range(&[m, k, batch_nnz])?;

        let b_shape = b.shape();
        let (b_rows, b_cols) = (b_shape[b_shape.len() - 2], b_shape[b_shape.len() - 1]);
        let y_shape = y.shape();
        let (out_m, n) = (y_shape[y_shape.len() - 2], y_shape[y_shape.len() - 1]);

        let crows_i32 = self.index_to_i32(&a.crows)?;
        let cols_i32 = self.index_to_i32(&a.cols)?;

        let alpha = T::from_f64(params.alpha);
        let beta = T::from_f64(params.beta);

        // SAFETY: descriptors reference live device tensors sized per their
        // metadata; the scratch buffer outlives the execute call.
        unsafe {
            let mat_a = CsrMatrixDescriptor::new(
                m as i64,
                k as i64,
                batch_nnz as i64,
                crows_i32.storage().ptr() as *const i32,
                cols_i32.storage().ptr() as *const i32,
                a.values.storage().ptr() as *const std::ffi::c_void,
                value_type,
            )?;
            let mat_b = DenseMatrixDescriptor::new(
                b_rows as i64,
                b_cols as i64,
                b.storage().ptr() as *const std::ffi::c_void,
                value_type,
                cusparseOrder_t::CUSPARSE_ORDER_ROW,
            )?;
            let mat_y = DenseMatrixDescriptor::new(
                out_m as i64,
                n as i64,
                y.storage().ptr() as *const std::ffi::c_void,
                value_type,
                cusparseOrder_t::CUSPARSE_ORDER_ROW,
            )?;

            if batch > 1 {
                mat_a.set_strided_batch(batch as i32, (m + 1) as i64, batch_nnz as i64)?;
                mat_b.set_strided_batch(batch as i32, (b_rows * b_cols) as i64)?;
                mat_y.set_strided_batch(batch as i32, (out_m * n) as i64)?;
            }

            let handle = self.cusparse.handle();
            let op_a = operation(params.trans_a);
            let op_b = operation(params.trans_b);
            let alpha_ptr = &alpha as *const T as *const std::ffi::c_void;
            let beta_ptr = &beta as *const T as *const std::ffi::c_void;

            let mut buffer_size = 0usize;
            check_cusparse(cusparseSpMM_bufferSize(
                handle,
                op_a,
                op_b,
                alpha_ptr,
                mat_a.handle(),
                mat_b.handle(),
                beta_ptr,
                mat_y.handle(),
                value_type,
                cusparseSpMMAlg_t::CUSPARSE_SPMM_CSR_ALG2,
                &mut buffer_size,
            ))?;

            let workspace = ScratchBuffer::acquire(&self.allocator, buffer_size)?;
            check_cusparse(cusparseSpMM(
                handle,
                op_a,
                op_b,
                alpha_ptr,
                mat_a.handle(),
                mat_b.handle(),
                beta_ptr,
                mat_y.handle(),
                value_type,
                cusparseSpMMAlg_t::CUSPARSE_SPMM_CSR_ALG2,
                workspace.ptr() as *mut std::ffi::c_void,
            ))?;
        }

        Ok(())
    }

    fn spmm_coo<T: Element>(
        &self,
        a: &CooData<CudaRuntime>,
        b: &Tensor<CudaRuntime>,
        y: &mut Tensor<CudaRuntime>,
        params: &BlasParams,
    ) -> Result<()> {
        // Route through CSR: one conversion, then the deterministic SpMM path
        let csr = self.coo_to_csr::<T>(a)?;
        self.spmm_csr::<T>(&csr, b, y, params)
    }

    fn spmv_csr<T: Element>(
        &self,
        a: &CsrData<CudaRuntime>,
        x: &Tensor<CudaRuntime>,
        y: &mut Tensor<CudaRuntime>,
        params: &BlasParams,
    ) -> Result<()> {
        let value_type = blas_value_type(a.dtype(), "spmv_cuda")?;

        let (m, k) = (a.rows(), a.ncols());
        check_i32_range(&[m, k, a.nnz()])?;

        let crows_i32 = self.index_to_i32(&a.crows)?;
        let cols_i32 = self.index_to_i32(&a.cols)?;

        let alpha = T::from_f64(params.alpha);
        let beta = T::from_f64(params.beta);

        // SAFETY: descriptors reference live device tensors sized per their
        // metadata; the scratch buffer outlives the execute call.
        unsafe {
            let mat_a = CsrMatrixDescriptor::new(
                m as i64,
                k as i64,
                a.nnz() as i64,
                crows_i32.storage().ptr() as *const i32,
                cols_i32.storage().ptr() as *const i32,
                a.values.storage().ptr() as *const std::ffi::c_void,
                value_type,
            )?;
            let vec_x = DenseVecDescriptor::new(
                x.numel() as i64,
                x.storage().ptr() as *const std::ffi::c_void,
                value_type,
            )?;
            let vec_y = DenseVecDescriptor::new(
                y.numel() as i64,
                y.storage().ptr() as *const std::ffi::c_void,
                value_type,
            )?;

            let handle = self.cusparse.handle();
            let op_a = operation(params.trans_a);
            let alpha_ptr = &alpha as *const T as *const std::ffi::c_void;
            let beta_ptr = &beta as *const T as *const std::ffi::c_void;

            let mut buffer_size = 0usize;
            check_cusparse(cusparseSpMV_bufferSize(
                handle,
                op_a,
                alpha_ptr,
                mat_a.handle(),
                vec_x.handle(),
                beta_ptr,
                vec_y.handle(),
                value_type,
                cusparseSpMVAlg_t::CUSPARSE_SPMV_CSR_ALG2,
                &mut buffer_size,
            ))?;

            let workspace = ScratchBuffer::acquire(&self.allocator, buffer_size)?;
            check_cusparse(cusparseSpMV(
                handle,
                op_a,
                alpha_ptr,
                mat_a.handle(),
                vec_x.handle(),
                beta_ptr,
                vec_y.handle(),
                value_type,
                cusparseSpMVAlg_t::CUSPARSE_SPMV_CSR_ALG2,
                workspace.ptr() as *mut std::ffi::c_void,
            ))?;
        }

        Ok(())
    }

    fn spgemm_csr<T: Element>(
        &self,
        a: &CsrData<CudaRuntime>,
        b: &CsrData<CudaRuntime>,
        params: &BlasParams,
    ) -> Result<CsrData<CudaRuntime>> {
        let value_type = blas_value_type(a.dtype(), "spgemm_cuda")?;

        let (m, k) = (a.rows(), a.ncols());
        let n = b.ncols();
        check_i32_range(&[m, k, n, a.nnz(), b.nnz()])?;

        let a_crows_i32 = self.index_to_i32(&a.crows)?;
        let a_cols_i32 = self.index_to_i32(&a.cols)?;
        let b_crows_i32 = self.index_to_i32(&b.crows)?;
        let b_cols_i32 = self.index_to_i32(&b.cols)?;

        let alpha = T::from_f64(params.alpha);
        let beta = T::zero();
        let op = operation(false);
        let alg = cusparseSpGEMMAlg_t::CUSPARSE_SPGEMM_DEFAULT;

        let device = a.device();
        let dtype = a.dtype();

        // SAFETY: descriptor buffers are live device tensors; the two
        // workspaces stay in scope until the copy phase completes.
        let (c_crows_i32, c_cols_i32, c_values) = unsafe {
            let mat_a = CsrMatrixDescriptor::new(
                m as i64,
                k as i64,
                a.nnz() as i64,
                a_crows_i32.storage().ptr() as *const i32,
                a_cols_i32.storage().ptr() as *const i32,
                a.values.storage().ptr() as *const std::ffi::c_void,
                value_type,
            )?;
            let mat_b = CsrMatrixDescriptor::new(
                k as i64,
                n as i64,
                b.nnz() as i64,
                b_crows_i32.storage().ptr() as *const i32,
                b_cols_i32.storage().ptr() as *const i32,
                b.values.storage().ptr() as *const std::ffi::c_void,
                value_type,
            )?;
            let mat_c = CsrMatrixDescriptor::empty(m as i64, n as i64, value_type)?;
            let spgemm = SpGemmDescriptor::new()?;

            let handle = self.cusparse.handle();
            let alpha_ptr = &alpha as *const T as *const std::ffi::c_void;
            let beta_ptr = &beta as *const T as *const std::ffi::c_void;

            // Phase 1: work estimation (size query, then with workspace)
            let mut buffer_size1 = 0usize;
            check_cusparse(cusparseSpGEMM_workEstimation(
                handle,
                op,
                op,
                alpha_ptr,
                mat_a.handle(),
                mat_b.handle(),
                beta_ptr,
                mat_c.handle(),
                value_type,
                alg,
                spgemm.handle(),
                &mut buffer_size1,
                std::ptr::null_mut(),
            ))?;
            let workspace1 = ScratchBuffer::acquire(&self.allocator, buffer_size1)?;
            check_cusparse(cusparseSpGEMM_workEstimation(
                handle,
                op,
                op,
                alpha_ptr,
                mat_a.handle(),
                mat_b.handle(),
                beta_ptr,
                mat_c.handle(),
                value_type,
                alg,
                spgemm.handle(),
                &mut buffer_size1,
                workspace1.ptr() as *mut std::ffi::c_void,
            ))?;

            // Phase 2: symbolic + numeric compute
            let mut buffer_size2 = 0usize;
            check_cusparse(cusparseSpGEMM_compute(
                handle,
                op,
                op,
                alpha_ptr,
                mat_a.handle(),
                mat_b.handle(),
                beta_ptr,
                mat_c.handle(),
                value_type,
                alg,
                spgemm.handle(),
                &mut buffer_size2,
                std::ptr::null_mut(),
            ))?;
            let workspace2 = ScratchBuffer::acquire(&self.allocator, buffer_size2)?;
            check_cusparse(cusparseSpGEMM_compute(
                handle,
                op,
                op,
                alpha_ptr,
                mat_a.handle(),
                mat_b.handle(),
                beta_ptr,
                mat_c.handle(),
                value_type,
                alg,
                spgemm.handle(),
                &mut buffer_size2,
                workspace2.ptr() as *mut std::ffi::c_void,
            ))?;

            // Phase 3: read the output size, attach buffers, copy out
            let (_, _, c_nnz) = mat_c.get_size()?;
            let c_crows_i32 = Tensor::zeros(&[m + 1], DType::I32, device)?;
            let c_cols_i32 = Tensor::zeros(&[c_nnz as usize], DType::I32, device)?;
            let c_values = Tensor::zeros(&[c_nnz as usize], dtype, device)?;

            if c_nnz > 0 {
                mat_c.set_pointers(
                    c_crows_i32.storage().ptr() as *mut i32,
                    c_cols_i32.storage().ptr() as *mut i32,
                    c_values.storage().ptr() as *mut std::ffi::c_void,
                )?;
                check_cusparse(cusparseSpGEMM_copy(
                    handle,
                    op,
                    op,
                    alpha_ptr,
                    mat_a.handle(),
                    mat_b.handle(),
                    beta_ptr,
                    mat_c.handle(),
                    value_type,
                    alg,
                    spgemm.handle(),
                ))?;
            }

            (c_crows_i32, c_cols_i32, c_values)
        };

        // Drop entries under the zero tolerance so the structure matches the
        // CPU backend for the same inputs.
        let crows_host: Vec<i32> = c_crows_i32.to_vec();
        let cols_host: Vec<i32> = c_cols_i32.to_vec();
        let vals_host: Vec<T> = c_values.to_vec();
        let tol = zero_tolerance::<T>();

        let mut f_crows: Vec<i64> = Vec::with_capacity(m + 1);
        let mut f_cols: Vec<i64> = Vec::new();
        let mut f_vals: Vec<T> = Vec::new();
        f_crows.push(0);
        for row in 0..m {
            for pos in crows_host[row] as usize..crows_host[row + 1] as usize {
                if vals_host[pos].to_f64().abs() > tol {
                    f_cols.push(cols_host[pos] as i64);
                    f_vals.push(vals_host[pos]);
                }
            }
            f_crows.push(f_cols.len() as i64);
        }

        let out_nnz = f_cols.len();
        CsrData::new(
            Tensor::try_from_slice(&f_crows, &[m + 1], device)?,
            Tensor::try_from_slice(&f_cols, &[out_nnz], device)?,
            Tensor::try_from_slice(&f_vals, &[out_nnz], device)?,
            vec![m, n],
        )
    }

    fn sddmm_csr<T: Element>(
        &self,
        a: &Tensor<CudaRuntime>,
        b: &Tensor<CudaRuntime>,
        mask: &CsrData<CudaRuntime>,
        params: &BlasParams,
    ) -> Result<CsrData<CudaRuntime>> {
        let value_type = blas_value_type(mask.dtype(), "sddmm_cuda")?;

        let (m, n) = (mask.rows(), mask.ncols());
        check_i32_range(&[m, n, mask.nnz()])?;

        let crows_i32 = self.index_to_i32(&mask.crows)?;
        let cols_i32 = self.index_to_i32(&mask.cols)?;

        // cuSPARSE accumulates in place: seed the output values with the
        // mask's values so beta scales them.
        let out_values = Tensor::empty(&[mask.nnz()], mask.dtype(), mask.device())?;
        CudaRuntime::copy_within_device(
            mask.values.storage().ptr(),
            out_values.storage().ptr(),
            mask.nnz() * mask.dtype().size_in_bytes(),
            mask.device(),
        )?;

        let (a_rows, a_cols) = (a.shape()[0], a.shape()[1]);
        let (b_rows, b_cols) = (b.shape()[0], b.shape()[1]);

        let alpha = T::from_f64(params.alpha);
        let beta = T::from_f64(params.beta);

        // SAFETY: descriptors reference live device tensors sized per their
        // metadata; the scratch buffer outlives the execute call.
        unsafe {
            let mat_a = DenseMatrixDescriptor::new(
                a_rows as i64,
                a_cols as i64,
                a.storage().ptr() as *const std::ffi::c_void,
                value_type,
                cusparseOrder_t::CUSPARSE_ORDER_ROW,
            )?;
            let mat_b = DenseMatrixDescriptor::new(
                b_rows as i64,
                b_cols as i64,
                b.storage().ptr() as *const std::ffi::c_void,
                value_type,
                cusparseOrder_t::CUSPARSE_ORDER_ROW,
            )?;
            let mat_c = CsrMatrixDescriptor::new(
                m as i64,
                n as i64,
                mask.nnz() as i64,
                crows_i32.storage().ptr() as *const i32,
                cols_i32.storage().ptr() as *const i32,
                out_values.storage().ptr() as *const std::ffi::c_void,
                value_type,
            )?;

            let handle = self.cusparse.handle();
            let op_a = operation(params.trans_a);
            let op_b = operation(params.trans_b);
            let alpha_ptr = &alpha as *const T as *const std::ffi::c_void;
            let beta_ptr = &beta as *const T as *const std::ffi::c_void;

            let mut buffer_size = 0usize;
            check_cusparse(cusparseSDDMM_bufferSize(
                handle,
                op_a,
                op_b,
                alpha_ptr,
                mat_a.handle(),
                mat_b.handle(),
                beta_ptr,
                mat_c.handle(),
                value_type,
                cusparseSDDMMAlg_t::CUSPARSE_SDDMM_ALG_DEFAULT,
                &mut buffer_size,
            ))?;

            let workspace = ScratchBuffer::acquire(&self.allocator, buffer_size)?;
            check_cusparse(cusparseSDDMM(
                handle,
                op_a,
                op_b,
                alpha_ptr,
                mat_a.handle(),
                mat_b.handle(),
                beta_ptr,
                mat_c.handle(),
                value_type,
                cusparseSDDMMAlg_t::CUSPARSE_SDDMM_ALG_DEFAULT,
                workspace.ptr() as *mut std::ffi::c_void,
            ))?;
        }

        CsrData::new(
            mask.crows.clone(),
            mask.cols.clone(),
            out_values,
            mask.shape.clone(),
        )
    }
}
