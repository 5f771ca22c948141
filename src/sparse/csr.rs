//! CSR (compressed sparse row) sparse storage

use super::coo::check_dense_operand;
use super::format::{SparseFormat, SparseStorage};
use super::ops::{BlasParams, SparseOps};
use crate::algorithm::sparse::{validate_spmm_shapes, validate_spmv_shapes, validate_spgemm_shapes};
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::runtime::{Device, Runtime};
use crate::tensor::Tensor;

/// CSR sparse matrix, rank 2 (`[M, N]`) or batched rank 3 (`[B, M, N]`)
///
/// The batched layout concatenates per-batch segments: `crows` holds
/// `B * (M + 1)` row pointers (each segment starting at 0), and `cols` /
/// `values` hold `B` equal-length runs of entries. Uniform per-batch nnz is a
/// structural requirement; ragged batches cannot be represented.
pub struct CsrData<R: Runtime> {
    /// Row pointers, I64, length `B * (M + 1)`
    pub crows: Tensor<R>,
    /// Column indices, I64, length nnz
    pub cols: Tensor<R>,
    /// Entry values, length nnz
    pub values: Tensor<R>,
    /// Logical shape, `[M, N]` or `[B, M, N]`
    pub shape: Vec<usize>,
}

impl<R: Runtime> CsrData<R> {
    /// Build from component tensors
    ///
    /// Validates dtypes, ranks, and component lengths. Data-dependent
    /// invariants (monotone row pointers, column bounds) are checked by
    /// [`CsrData::from_slices`] or deferred to kernel use.
    pub fn new(
        crows: Tensor<R>,
        cols: Tensor<R>,
        values: Tensor<R>,
        shape: Vec<usize>,
    ) -> Result<Self> {
        let (batch, m) = match shape.len() {
            2 => (1, shape[0]),
            3 => (shape[0], shape[1]),
            rank => {
                return Err(Error::invalid_argument(
                    "shape",
                    format!("CSR supports rank 2 or 3, got rank {rank}"),
                ))
            }
        };

        for (name, t) in [("crows", &crows), ("cols", &cols)] {
            if t.dtype() != DType::I64 {
                return Err(Error::invalid_argument(
                    name,
                    format!("CSR indices must be i64, got {}", t.dtype()),
                ));
            }
            if t.ndim() != 1 {
                return Err(Error::invalid_argument(
                    name,
                    format!("CSR components must be rank 1, got rank {}", t.ndim()),
                ));
            }
        }
        if values.ndim() != 1 {
            return Err(Error::invalid_argument(
                "values",
                format!("CSR values must be rank 1, got rank {}", values.ndim()),
            ));
        }

        if crows.numel() != batch * (m + 1) {
            return Err(Error::precondition(format!(
                "crows length {} does not match {batch} batch(es) of {} row pointers",
                crows.numel(),
                m + 1
            )));
        }
        if cols.numel() != values.numel() {
            return Err(Error::shape_mismatch(&[cols.numel()], &[values.numel()]));
        }
        if batch > 0 && cols.numel() % batch != 0 {
            return Err(Error::precondition(format!(
                "nnz {} is not divisible by batch count {batch}",
                cols.numel()
            )));
        }
        if !crows.device().is_same(values.device()) || !cols.device().is_same(values.device()) {
            return Err(Error::DeviceMismatch);
        }

        Ok(Self {
            crows,
            cols,
            values,
            shape,
        })
    }

    /// Build from host slices with full invariant checks
    ///
    /// Each batch segment of `crows` must start at 0, be monotone
    /// non-decreasing, and end at the per-batch nnz; columns must be in
    /// bounds.
    pub fn from_slices<T: Element>(
        crows: &[i64],
        cols: &[i64],
        values: &[T],
        shape: &[usize],
        device: &R::Device,
    ) -> Result<Self> {
        let (batch, m, n) = match shape.len() {
            2 => (1, shape[0], shape[1]),
            3 => (shape[0], shape[1], shape[2]),
            rank => {
                return Err(Error::invalid_argument(
                    "shape",
                    format!("CSR supports rank 2 or 3, got rank {rank}"),
                ))
            }
        };

        if crows.len() != batch * (m + 1) {
            return Err(Error::precondition(format!(
                "crows length {} does not match {batch} batch(es) of {} row pointers",
                crows.len(),
                m + 1
            )));
        }
        if batch == 0 || cols.len() % batch != 0 {
            if batch == 0 && cols.is_empty() {
                // Zero-batch tensors are empty and valid
            } else {
                return Err(Error::precondition(format!(
                    "nnz {} is not divisible by batch count {batch}",
                    cols.len()
                )));
            }
        }

        let batch_nnz = if batch == 0 { 0 } else { cols.len() / batch };
        for b in 0..batch {
            let seg = &crows[b * (m + 1)..(b + 1) * (m + 1)];
            if seg[0] != 0 {
                return Err(Error::precondition(format!(
                    "crows segment {b} starts at {}, expected 0",
                    seg[0]
                )));
            }
            if seg.windows(2).any(|w| w[1] < w[0]) {
                return Err(Error::precondition(format!(
                    "crows segment {b} is not monotone non-decreasing"
                )));
            }
            if seg[m] as usize != batch_nnz {
                return Err(Error::precondition(format!(
                    "crows segment {b} ends at {}, expected nnz {batch_nnz}",
                    seg[m]
                )));
            }
        }
        for &col in cols {
            if col < 0 || col as usize >= n {
                return Err(Error::IndexOutOfBounds {
                    index: col,
                    size: n,
                });
            }
        }

        Self::new(
            Tensor::try_from_slice(crows, &[crows.len()], device)?,
            Tensor::try_from_slice(cols, &[cols.len()], device)?,
            Tensor::try_from_slice(values, &[values.len()], device)?,
            shape.to_vec(),
        )
    }

    /// Number of batches (1 for rank-2 matrices)
    #[inline]
    pub fn batch_count(&self) -> usize {
        if self.shape.len() == 3 {
            self.shape[0]
        } else {
            1
        }
    }

    /// Rows per matrix
    #[inline]
    pub fn rows(&self) -> usize {
        self.shape[self.shape.len() - 2]
    }

    /// Columns per matrix
    #[inline]
    pub fn ncols(&self) -> usize {
        self.shape[self.shape.len() - 1]
    }

    /// Stored entries per batch
    #[inline]
    pub fn batch_nnz(&self) -> usize {
        let batch = self.batch_count();
        if batch == 0 {
            0
        } else {
            self.cols.numel() / batch
        }
    }

    /// Device the tensor lives on
    #[inline]
    pub fn device(&self) -> &R::Device {
        self.values.device()
    }

    // ===== High-level operations =====

    /// Convert to COO (output is coalesced)
    pub fn to_coo(&self, client: &R::Client) -> Result<super::CooData<R>>
    where
        R::Client: SparseOps<R>,
    {
        crate::dispatch_dtype!(self.dtype(), T => {
            client.csr_to_coo::<T>(self)
        }, "csr_to_coo")
    }

    /// Materialize as a dense tensor
    pub fn to_dense(&self, client: &R::Client) -> Result<Tensor<R>>
    where
        R::Client: SparseOps<R>,
    {
        crate::dispatch_dtype!(self.dtype(), T => {
            client.csr_to_dense::<T>(self)
        }, "csr_to_dense")
    }

    /// `Y ← α·op(A)·op(B)`: sparse-dense matmul
    ///
    /// `beta` must be 0 since the output is freshly allocated; accumulate
    /// into an existing tensor with [`CsrData::spmm_into`].
    pub fn spmm(&self, client: &R::Client, b: &Tensor<R>, params: &BlasParams) -> Result<Tensor<R>>
    where
        R::Client: SparseOps<R>,
    {
        if params.beta != 0.0 {
            return Err(Error::invalid_argument(
                "beta",
                "spmm allocates its output; accumulate with spmm_into".to_string(),
            ));
        }
        let dims = validate_spmm_shapes(&self.shape, b.shape(), params.trans_a, params.trans_b)?;
        let out_shape: Vec<usize> = if self.shape.len() == 3 {
            vec![dims.batch, dims.m, dims.n]
        } else {
            vec![dims.m, dims.n]
        };
        let mut y = Tensor::zeros(&out_shape, self.dtype(), b.device())?;
        self.spmm_into(client, b, &mut y, params)?;
        Ok(y)
    }

    /// `Y ← α·op(A)·op(B) + β·Y` with a preallocated output
    pub fn spmm_into(
        &self,
        client: &R::Client,
        b: &Tensor<R>,
        y: &mut Tensor<R>,
        params: &BlasParams,
    ) -> Result<()>
    where
        R::Client: SparseOps<R>,
    {
        check_dense_operand(self.dtype(), self.device(), b)?;
        check_dense_operand(self.dtype(), self.device(), y)?;

        let dims = validate_spmm_shapes(&self.shape, b.shape(), params.trans_a, params.trans_b)?;
        let expected: Vec<usize> = if self.shape.len() == 3 {
            vec![dims.batch, dims.m, dims.n]
        } else {
            vec![dims.m, dims.n]
        };
        if y.shape() != expected.as_slice() {
            return Err(Error::shape_mismatch(&expected, y.shape()));
        }
        if !y.is_contiguous() {
            return Err(Error::invalid_argument(
                "y",
                "SpMM output must be contiguous".to_string(),
            ));
        }

        let b = b.contiguous();
        crate::dispatch_dtype!(self.dtype(), T => {
            client.spmm_csr::<T>(self, &b, y, params)
        }, "spmm")
    }

    /// `y ← α·op(A)·x`: sparse matrix-vector product
    pub fn spmv(&self, client: &R::Client, x: &Tensor<R>, params: &BlasParams) -> Result<Tensor<R>>
    where
        R::Client: SparseOps<R>,
    {
        if params.beta != 0.0 {
            return Err(Error::invalid_argument(
                "beta",
                "spmv allocates its output; accumulate with spmv_into".to_string(),
            ));
        }
        let (m, _) = validate_spmv_shapes(&self.shape, x.shape(), params.trans_a)?;
        let mut y = Tensor::zeros(&[m], self.dtype(), x.device())?;
        self.spmv_into(client, x, &mut y, params)?;
        Ok(y)
    }

    /// `y ← α·op(A)·x + β·y` with a preallocated output
    pub fn spmv_into(
        &self,
        client: &R::Client,
        x: &Tensor<R>,
        y: &mut Tensor<R>,
        params: &BlasParams,
    ) -> Result<()>
    where
        R::Client: SparseOps<R>,
    {
        check_dense_operand(self.dtype(), self.device(), x)?;
        check_dense_operand(self.dtype(), self.device(), y)?;

        let (m, _) = validate_spmv_shapes(&self.shape, x.shape(), params.trans_a)?;
        if y.shape() != [m] {
            return Err(Error::shape_mismatch(&[m], y.shape()));
        }
        if !y.is_contiguous() {
            return Err(Error::invalid_argument(
                "y",
                "SpMV output must be contiguous".to_string(),
            ));
        }

        let x = x.contiguous();
        crate::dispatch_dtype!(self.dtype(), T => {
            client.spmv_csr::<T>(self, &x, y, params)
        }, "spmv")
    }

    /// `C ← α·A·B`: sparse × sparse matmul producing CSR
    ///
    /// Only `beta = 0` and untransposed operands are supported.
    pub fn matmul(&self, client: &R::Client, b: &CsrData<R>, params: &BlasParams) -> Result<CsrData<R>>
    where
        R::Client: SparseOps<R>,
    {
        if params.beta != 0.0 {
            return Err(Error::unimplemented("SpGEMM with beta != 0"));
        }
        if params.trans_a || params.trans_b {
            return Err(Error::unimplemented("SpGEMM with transposed operands"));
        }
        if self.dtype() != b.dtype() {
            return Err(Error::DTypeMismatch {
                lhs: self.dtype(),
                rhs: b.dtype(),
            });
        }
        if !self.device().is_same(b.device()) {
            return Err(Error::DeviceMismatch);
        }
        validate_spgemm_shapes(&self.shape, &b.shape)?;

        crate::dispatch_dtype!(self.dtype(), T => {
            client.spgemm_csr::<T>(self, b, params)
        }, "spgemm")
    }

    /// `C ← α·(A·B) ∘ spy(self) + β·self`: sampled dense-dense matmul
    ///
    /// `self` is the sparsity mask (and the accumulated term when
    /// `beta != 0`); `a` and `b` are dense.
    pub fn sddmm(
        &self,
        client: &R::Client,
        a: &Tensor<R>,
        b: &Tensor<R>,
        params: &BlasParams,
    ) -> Result<CsrData<R>>
    where
        R::Client: SparseOps<R>,
    {
        check_dense_operand(self.dtype(), self.device(), a)?;
        check_dense_operand(self.dtype(), self.device(), b)?;
        if self.shape.len() != 2 {
            return Err(Error::unimplemented("batched SDDMM"));
        }

        let dims = validate_spmm_shapes(a.shape(), b.shape(), params.trans_a, params.trans_b)?;
        if [dims.m, dims.n] != [self.rows(), self.ncols()] {
            return Err(Error::shape_mismatch(&[self.rows(), self.ncols()], &[dims.m, dims.n]));
        }

        let a = a.contiguous();
        let b = b.contiguous();
        crate::dispatch_dtype!(self.dtype(), T => {
            client.sddmm_csr::<T>(&a, &b, self, params)
        }, "sddmm")
    }
}

impl<R: Runtime> SparseStorage for CsrData<R> {
    fn format(&self) -> SparseFormat {
        SparseFormat::Csr
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn nnz(&self) -> usize {
        self.cols.numel()
    }

    fn dtype(&self) -> DType {
        self.values.dtype()
    }
}

impl<R: Runtime> Clone for CsrData<R> {
    fn clone(&self) -> Self {
        Self {
            crows: self.crows.clone(),
            cols: self.cols.clone(),
            values: self.values.clone(),
            shape: self.shape.clone(),
        }
    }
}

impl<R: Runtime> std::fmt::Debug for CsrData<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrData")
            .field("shape", &self.shape)
            .field("nnz", &self.nnz())
            .field("dtype", &self.dtype())
            .finish()
    }
}

#[cfg(test)]
#[cfg(feature = "cpu")]
mod tests {
    use super::*;
    use crate::runtime::cpu::CpuRuntime;

    fn device() -> <CpuRuntime as Runtime>::Device {
        CpuRuntime::default_device()
    }

    #[test]
    fn test_from_slices_valid() {
        let csr = CsrData::<CpuRuntime>::from_slices(
            &[0, 1, 2],
            &[1, 0],
            &[1.0f32, 2.0],
            &[2, 2],
            &device(),
        )
        .unwrap();
        assert_eq!(csr.nnz(), 2);
        assert_eq!(csr.batch_count(), 1);
        assert_eq!(csr.rows(), 2);
    }

    #[test]
    fn test_from_slices_rejects_bad_crows() {
        // Does not start at 0
        assert!(matches!(
            CsrData::<CpuRuntime>::from_slices(
                &[1, 1, 2],
                &[1, 0],
                &[1.0f32, 2.0],
                &[2, 2],
                &device(),
            ),
            Err(Error::PreconditionNotMet { .. })
        ));

        // Not monotone
        assert!(matches!(
            CsrData::<CpuRuntime>::from_slices(
                &[0, 2, 1],
                &[1, 0],
                &[1.0f32, 2.0],
                &[2, 2],
                &device(),
            ),
            Err(Error::PreconditionNotMet { .. })
        ));

        // Does not end at nnz
        assert!(matches!(
            CsrData::<CpuRuntime>::from_slices(
                &[0, 1, 1],
                &[1, 0],
                &[1.0f32, 2.0],
                &[2, 2],
                &device(),
            ),
            Err(Error::PreconditionNotMet { .. })
        ));
    }

    #[test]
    fn test_from_slices_rejects_col_out_of_bounds() {
        assert!(matches!(
            CsrData::<CpuRuntime>::from_slices(
                &[0, 1, 2],
                &[1, 2],
                &[1.0f32, 2.0],
                &[2, 2],
                &device(),
            ),
            Err(Error::IndexOutOfBounds { index: 2, size: 2 })
        ));
    }

    #[test]
    fn test_batched_layout() {
        let csr = CsrData::<CpuRuntime>::from_slices(
            &[0, 1, 2, 0, 0, 2],
            &[1, 0, 0, 1],
            &[1.0f64, 2.0, 3.0, 4.0],
            &[2, 2, 2],
            &device(),
        )
        .unwrap();
        assert_eq!(csr.batch_count(), 2);
        assert_eq!(csr.batch_nnz(), 2);
        assert_eq!(csr.nnz(), 4);
    }
}
