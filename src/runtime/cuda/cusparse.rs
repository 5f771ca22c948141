//! RAII wrappers over the cuSPARSE generic API
//!
//! Every library object (handle, sparse/dense descriptors, SpGEMM state) is
//! owned by a guard that destroys it on drop, so error paths inside a
//! primitive cannot leak descriptors. All descriptors use 32-bit indices;
//! callers cast from the crate's i64 index format at the boundary.

#![allow(unsafe_op_in_unsafe_fn)]

use std::ptr::null_mut;
use std::sync::Arc;

use cudarc::cusparse::sys::*;
use cudarc::driver::CudaStream;

use crate::dtype::DType;
use crate::error::{Error, Result};

/// Convert a cuSPARSE status into a backend error
pub fn check_cusparse(status: cusparseStatus_t) -> Result<()> {
    if status == cusparseStatus_t::CUSPARSE_STATUS_SUCCESS {
        Ok(())
    } else {
        Err(Error::Backend(format!("cusparse error: {status:?}")))
    }
}

/// Map an element dtype to the cuSPARSE value type
///
/// cuSPARSE computation is limited to real float types here; integer sparse
/// math stays on the CPU backend.
pub fn dtype_to_cusparse(dtype: DType) -> Result<cudaDataType> {
    match dtype {
        DType::F64 => Ok(cudaDataType::CUDA_R_64F),
        DType::F32 => Ok(cudaDataType::CUDA_R_32F),
        DType::F16 => Ok(cudaDataType::CUDA_R_16F),
        DType::BF16 => Ok(cudaDataType::CUDA_R_16BF),
        _ => Err(Error::unsupported_dtype(dtype, "cusparse")),
    }
}

/// Owning wrapper for the cuSPARSE library handle, bound to one stream
pub struct CudaSparse {
    handle: cusparseHandle_t,
    stream: Arc<CudaStream>,
}

impl CudaSparse {
    /// Create a handle and associate it with `stream`
    pub fn new(stream: Arc<CudaStream>) -> Result<Self> {
        unsafe {
            let mut handle = null_mut();
            check_cusparse(cusparseCreate(&mut handle))?;
            check_cusparse(cusparseSetStream(handle, stream.cu_stream() as cudaStream_t))?;
            Ok(Self { handle, stream })
        }
    }

    /// Raw library handle
    #[inline]
    pub fn handle(&self) -> cusparseHandle_t {
        self.handle
    }

    /// Stream the handle is bound to
    #[inline]
    pub fn stream(&self) -> &Arc<CudaStream> {
        &self.stream
    }
}

impl Drop for CudaSparse {
    fn drop(&mut self) {
        unsafe {
            let _ = cusparseDestroy(self.handle);
        }
    }
}

// SAFETY: cusparse calls are ordered by the bound stream; the raw handle is
// only a token into the library's thread-safe dispatch.
unsafe impl Send for CudaSparse {}
unsafe impl Sync for CudaSparse {}

/// CSR sparse matrix descriptor (32-bit indices, zero-based)
pub struct CsrMatrixDescriptor {
    descr: cusparseSpMatDescr_t,
}

impl CsrMatrixDescriptor {
    /// Create a descriptor over existing device buffers
    ///
    /// # Safety
    /// `row_ptrs` must hold `rows + 1` i32 elements, `col_indices` and
    /// `values` must hold `nnz` elements, all in live device memory that
    /// outlives the descriptor's use.
    pub unsafe fn new(
        rows: i64,
        cols: i64,
        nnz: i64,
        row_ptrs: *const i32,
        col_indices: *const i32,
        values: *const std::ffi::c_void,
        data_type: cudaDataType,
    ) -> Result<Self> {
        let mut descr = null_mut();
        check_cusparse(cusparseCreateCsr(
            &mut descr,
            rows,
            cols,
            nnz,
            row_ptrs as *mut std::ffi::c_void,
            col_indices as *mut std::ffi::c_void,
            values as *mut std::ffi::c_void,
            cusparseIndexType_t::CUSPARSE_INDEX_32I,
            cusparseIndexType_t::CUSPARSE_INDEX_32I,
            cusparseIndexBase_t::CUSPARSE_INDEX_BASE_ZERO,
            data_type,
        ))?;
        Ok(Self { descr })
    }

    /// Create an empty descriptor for SpGEMM output (buffers attached later)
    pub fn empty(rows: i64, cols: i64, data_type: cudaDataType) -> Result<Self> {
        unsafe {
            let mut descr = null_mut();
            check_cusparse(cusparseCreateCsr(
                &mut descr,
                rows,
                cols,
                0,
                null_mut(),
                null_mut(),
                null_mut(),
                cusparseIndexType_t::CUSPARSE_INDEX_32I,
                cusparseIndexType_t::CUSPARSE_INDEX_32I,
                cusparseIndexBase_t::CUSPARSE_INDEX_BASE_ZERO,
                data_type,
            ))?;
            Ok(Self { descr })
        }
    }

    /// Describe a uniform batch: `batch` matrices whose row pointers and
    /// column/value arrays are laid out back to back
    pub fn set_strided_batch(
        &self,
        batch: i32,
        offsets_stride: i64,
        columns_values_stride: i64,
    ) -> Result<()> {
        unsafe {
            check_cusparse(cusparseCsrSetStridedBatch(
                self.descr,
                batch,
                offsets_stride,
                columns_values_stride,
            ))
        }
    }

    /// Attach output buffers after the size is known (SpGEMM phase 3)
    ///
    /// # Safety
    /// The buffers must match the nnz reported by `get_size` and stay alive
    /// for the remaining library calls on this descriptor.
    pub unsafe fn set_pointers(
        &self,
        row_ptrs: *mut i32,
        col_indices: *mut i32,
        values: *mut std::ffi::c_void,
    ) -> Result<()> {
        check_cusparse(cusparseCsrSetPointers(
            self.descr,
            row_ptrs as *mut std::ffi::c_void,
            col_indices as *mut std::ffi::c_void,
            values,
        ))
    }

    /// Read back `(rows, cols, nnz)` from the descriptor
    pub fn get_size(&self) -> Result<(i64, i64, i64)> {
        unsafe {
            let (mut rows, mut cols, mut nnz) = (0i64, 0i64, 0i64);
            check_cusparse(cusparseSpMatGetSize(
                self.descr, &mut rows, &mut cols, &mut nnz,
            ))?;
            Ok((rows, cols, nnz))
        }
    }

    /// Raw descriptor handle
    #[inline]
    pub fn handle(&self) -> cusparseSpMatDescr_t {
        self.descr
    }
}

impl Drop for CsrMatrixDescriptor {
    fn drop(&mut self) {
        unsafe {
            let _ = cusparseDestroySpMat(self.descr);
        }
    }
}

/// Dense matrix descriptor
pub struct DenseMatrixDescriptor {
    descr: cusparseDnMatDescr_t,
}

impl DenseMatrixDescriptor {
    /// Create a descriptor over an existing device buffer
    ///
    /// # Safety
    /// `values` must hold `rows * cols` elements of `data_type` in live
    /// device memory.
    pub unsafe fn new(
        rows: i64,
        cols: i64,
        values: *const std::ffi::c_void,
        data_type: cudaDataType,
        order: cusparseOrder_t,
    ) -> Result<Self> {
        let ld = if order == cusparseOrder_t::CUSPARSE_ORDER_ROW {
            cols
        } else {
            rows
        };

        let mut descr = null_mut();
        check_cusparse(cusparseCreateDnMat(
            &mut descr,
            rows,
            cols,
            ld,
            values as *mut std::ffi::c_void,
            data_type,
            order,
        ))?;
        Ok(Self { descr })
    }

    /// Describe a uniform batch of matrices `stride` elements apart
    pub fn set_strided_batch(&self, batch: i32, stride: i64) -> Result<()> {
        unsafe { check_cusparse(cusparseDnMatSetStridedBatch(self.descr, batch, stride)) }
    }

    /// Raw descriptor handle
    #[inline]
    pub fn handle(&self) -> cusparseDnMatDescr_t {
        self.descr
    }
}

impl Drop for DenseMatrixDescriptor {
    fn drop(&mut self) {
        unsafe {
            let _ = cusparseDestroyDnMat(self.descr);
        }
    }
}

/// Dense vector descriptor
pub struct DenseVecDescriptor {
    descr: cusparseDnVecDescr_t,
}

impl DenseVecDescriptor {
    /// Create a descriptor over an existing device buffer
    ///
    /// # Safety
    /// `values` must hold `size` elements of `data_type` in live device
    /// memory.
    pub unsafe fn new(
        size: i64,
        values: *const std::ffi::c_void,
        data_type: cudaDataType,
    ) -> Result<Self> {
        let mut descr = null_mut();
        check_cusparse(cusparseCreateDnVec(
            &mut descr,
            size,
            values as *mut std::ffi::c_void,
            data_type,
        ))?;
        Ok(Self { descr })
    }

    /// Raw descriptor handle
    #[inline]
    pub fn handle(&self) -> cusparseDnVecDescr_t {
        self.descr
    }
}

impl Drop for DenseVecDescriptor {
    fn drop(&mut self) {
        unsafe {
            let _ = cusparseDestroyDnVec(self.descr);
        }
    }
}

/// SpGEMM intermediate state descriptor
pub struct SpGemmDescriptor {
    descr: cusparseSpGEMMDescr_t,
}

impl SpGemmDescriptor {
    /// Create the state object for one SpGEMM invocation
    pub fn new() -> Result<Self> {
        unsafe {
            let mut descr = null_mut();
            check_cusparse(cusparseSpGEMM_createDescr(&mut descr))?;
            Ok(Self { descr })
        }
    }

    /// Raw descriptor handle
    #[inline]
    pub fn handle(&self) -> cusparseSpGEMMDescr_t {
        self.descr
    }
}

impl Drop for SpGemmDescriptor {
    fn drop(&mut self) {
        unsafe {
            let _ = cusparseSpGEMM_destroyDescr(self.descr);
        }
    }
}

/// Transpose flag to cuSPARSE operation
#[inline]
pub fn operation(trans: bool) -> cusparseOperation_t {
    if trans {
        cusparseOperation_t::CUSPARSE_OPERATION_TRANSPOSE
    } else {
        cusparseOperation_t::CUSPARSE_OPERATION_NON_TRANSPOSE
    }
}
