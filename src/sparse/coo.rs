//! COO (coordinate list) sparse storage

use super::format::{SparseFormat, SparseStorage};
use super::ops::{BlasParams, SparseOps};
use crate::algorithm::convert::is_coalesced_host;
use crate::algorithm::sparse::validate_spmm_shapes;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::runtime::{Device, Runtime};
use crate::tensor::Tensor;

/// COO sparse tensor
///
/// Entries are stored as a `(sparse_dim, nnz)` I64 index tensor plus a value
/// tensor of shape `(nnz, dense_dims...)`: the first `sparse_dim` dimensions
/// of the logical shape are sparse, the rest are dense slices carried per
/// entry.
///
/// A COO tensor is *coalesced* when its flattened sparse indices are strictly
/// ascending: sorted lexicographically with no duplicates. Construction from
/// host data detects the flag; [`CooData::coalesce`] establishes it by
/// sorting and summing duplicates.
pub struct CooData<R: Runtime> {
    /// Entry coordinates, I64, shape `(sparse_dim, nnz)`
    pub indices: Tensor<R>,
    /// Entry values, shape `(nnz, dense_dims...)`
    pub values: Tensor<R>,
    /// Logical shape
    pub shape: Vec<usize>,
    coalesced: bool,
}

impl<R: Runtime> CooData<R> {
    /// Build from index/value tensors
    ///
    /// Validates dtypes and shape agreement. The `coalesced` flag is trusted;
    /// pass `false` when the entry order is unknown.
    pub fn new(
        indices: Tensor<R>,
        values: Tensor<R>,
        shape: Vec<usize>,
        coalesced: bool,
    ) -> Result<Self> {
        if indices.dtype() != DType::I64 {
            return Err(Error::invalid_argument(
                "indices",
                format!("COO indices must be i64, got {}", indices.dtype()),
            ));
        }
        if indices.ndim() != 2 {
            return Err(Error::invalid_argument(
                "indices",
                format!("COO indices must be rank 2, got rank {}", indices.ndim()),
            ));
        }
        if !indices.device().is_same(values.device()) {
            return Err(Error::DeviceMismatch);
        }

        let sparse_dim = indices.shape()[0];
        let nnz = indices.shape()[1];

        if sparse_dim == 0 || sparse_dim > shape.len() {
            return Err(Error::invalid_argument(
                "indices",
                format!("sparse_dim must be in 1..={}, got {sparse_dim}", shape.len()),
            ));
        }
        if values.ndim() == 0 || values.shape()[0] != nnz {
            return Err(Error::shape_mismatch(&[nnz], values.shape()));
        }
        if values.shape()[1..] != shape[sparse_dim..] {
            return Err(Error::shape_mismatch(&shape[sparse_dim..], &values.shape()[1..]));
        }

        Ok(Self {
            indices,
            values,
            shape,
            coalesced,
        })
    }

    /// Build from host slices, bounds-checking every coordinate
    ///
    /// `indices` is dimension-major (`sparse_dim * nnz` entries); `values`
    /// holds `nnz` trailing dense slices. The coalesced flag is detected.
    pub fn from_slices<T: Element>(
        indices: &[i64],
        values: &[T],
        shape: &[usize],
        sparse_dim: usize,
        device: &R::Device,
    ) -> Result<Self> {
        if sparse_dim == 0 || sparse_dim > shape.len() {
            return Err(Error::invalid_argument(
                "sparse_dim",
                format!("must be in 1..={}, got {sparse_dim}", shape.len()),
            ));
        }
        if indices.len() % sparse_dim != 0 {
            return Err(Error::invalid_argument(
                "indices",
                format!("length {} is not a multiple of sparse_dim {sparse_dim}", indices.len()),
            ));
        }

        let nnz = indices.len() / sparse_dim;
        let dense_size: usize = shape[sparse_dim..].iter().product();
        if values.len() != nnz * dense_size {
            return Err(Error::shape_mismatch(&[nnz * dense_size], &[values.len()]));
        }

        for d in 0..sparse_dim {
            let bound = shape[d];
            for &idx in &indices[d * nnz..(d + 1) * nnz] {
                if idx < 0 || idx as usize >= bound {
                    return Err(Error::IndexOutOfBounds {
                        index: idx,
                        size: bound,
                    });
                }
            }
        }

        let coalesced = is_coalesced_host(indices, nnz, &shape[..sparse_dim]);

        let mut values_shape = vec![nnz];
        values_shape.extend_from_slice(&shape[sparse_dim..]);

        Self::new(
            Tensor::try_from_slice(indices, &[sparse_dim, nnz], device)?,
            Tensor::try_from_slice(values, &values_shape, device)?,
            shape.to_vec(),
            coalesced,
        )
    }

    /// Number of sparse dimensions
    #[inline]
    pub fn sparse_dim(&self) -> usize {
        self.indices.shape()[0]
    }

    /// Number of trailing dense dimensions
    #[inline]
    pub fn dense_dim(&self) -> usize {
        self.shape.len() - self.sparse_dim()
    }

    /// Elements in one trailing dense slice
    #[inline]
    pub fn dense_size(&self) -> usize {
        self.shape[self.sparse_dim()..].iter().product()
    }

    /// Whether the entries are sorted and duplicate-free
    #[inline]
    pub fn is_coalesced(&self) -> bool {
        self.coalesced
    }

    /// Device the tensor lives on
    #[inline]
    pub fn device(&self) -> &R::Device {
        self.values.device()
    }

    // ===== High-level operations =====

    /// Extract the sparse structure of a dense tensor
    pub fn from_dense(client: &R::Client, dense: &Tensor<R>, sparse_dim: usize) -> Result<Self>
    where
        R::Client: SparseOps<R>,
    {
        let dense = dense.contiguous();
        crate::dispatch_dtype!(dense.dtype(), T => {
            client.dense_to_coo::<T>(&dense, sparse_dim)
        }, "dense_to_coo")
    }

    /// Materialize as a dense tensor (duplicates sum)
    pub fn to_dense(&self, client: &R::Client) -> Result<Tensor<R>>
    where
        R::Client: SparseOps<R>,
    {
        crate::dispatch_dtype!(self.dtype(), T => {
            client.coo_to_dense::<T>(self)
        }, "coo_to_dense")
    }

    /// Convert to CSR
    ///
    /// Uncoalesced input is coalesced first, so duplicate entries are summed.
    pub fn to_csr(&self, client: &R::Client) -> Result<super::CsrData<R>>
    where
        R::Client: SparseOps<R>,
    {
        crate::dispatch_dtype!(self.dtype(), T => {
            client.coo_to_csr::<T>(self)
        }, "coo_to_csr")
    }

    /// Sort entries by flattened index and sum duplicates
    ///
    /// Idempotent: a coalesced tensor is returned as a cheap clone.
    pub fn coalesce(&self, client: &R::Client) -> Result<Self>
    where
        R::Client: SparseOps<R>,
    {
        if self.coalesced {
            return Ok(self.clone());
        }
        crate::dispatch_dtype!(self.dtype(), T => {
            client.coalesce::<T>(self)
        }, "coalesce")
    }

    /// `Y ← α·A·op(B)`: sparse-dense matmul with a rank-2 COO operand
    ///
    /// `beta` must be 0 since the output is freshly allocated.
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
        let mut y = Tensor::zeros(&[dims.m, dims.n], self.dtype(), b.device())?;
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
        if self.shape.len() != 2 {
            return Err(Error::unimplemented(
                "SpMM with a batched or N-D COO operand; convert to CSR first",
            ));
        }
        check_dense_operand(self.dtype(), self.device(), b)?;
        check_dense_operand(self.dtype(), self.device(), y)?;

        let dims = validate_spmm_shapes(&self.shape, b.shape(), params.trans_a, params.trans_b)?;
        if y.shape() != [dims.m, dims.n] {
            return Err(Error::shape_mismatch(&[dims.m, dims.n], y.shape()));
        }
        if !y.is_contiguous() {
            return Err(Error::invalid_argument(
                "y",
                "SpMM output must be contiguous".to_string(),
            ));
        }

        let b = b.contiguous();
        crate::dispatch_dtype!(self.dtype(), T => {
            client.spmm_coo::<T>(self, &b, y, params)
        }, "spmm")
    }
}

/// Check a dense operand against the sparse operand's dtype and device
pub(super) fn check_dense_operand<R: Runtime>(
    dtype: DType,
    device: &R::Device,
    t: &Tensor<R>,
) -> Result<()> {
    if t.dtype() != dtype {
        return Err(Error::DTypeMismatch {
            lhs: dtype,
            rhs: t.dtype(),
        });
    }
    if !t.device().is_same(device) {
        return Err(Error::DeviceMismatch);
    }
    Ok(())
}

impl<R: Runtime> SparseStorage for CooData<R> {
    fn format(&self) -> SparseFormat {
        SparseFormat::Coo
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn nnz(&self) -> usize {
        self.indices.shape()[1]
    }

    fn dtype(&self) -> DType {
        self.values.dtype()
    }
}

impl<R: Runtime> Clone for CooData<R> {
    fn clone(&self) -> Self {
        Self {
            indices: self.indices.clone(),
            values: self.values.clone(),
            shape: self.shape.clone(),
            coalesced: self.coalesced,
        }
    }
}

impl<R: Runtime> std::fmt::Debug for CooData<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooData")
            .field("shape", &self.shape)
            .field("sparse_dim", &self.sparse_dim())
            .field("nnz", &self.nnz())
            .field("dtype", &self.dtype())
            .field("coalesced", &self.coalesced)
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
    fn test_from_slices_detects_coalesced() {
        // (0,1)=1, (1,0)=2: strictly ascending keys
        let coo = CooData::<CpuRuntime>::from_slices(
            &[0, 1, 1, 0],
            &[1.0f32, 2.0],
            &[2, 2],
            2,
            &device(),
        )
        .unwrap();
        assert!(coo.is_coalesced());
        assert_eq!(coo.nnz(), 2);
        assert_eq!(coo.sparse_dim(), 2);
        assert_eq!(coo.dense_dim(), 0);

        // Duplicate entry (0,1) twice: not coalesced
        let coo = CooData::<CpuRuntime>::from_slices(
            &[0, 0, 1, 1],
            &[1.0f32, 2.0],
            &[2, 2],
            2,
            &device(),
        )
        .unwrap();
        assert!(!coo.is_coalesced());
    }

    #[test]
    fn test_from_slices_bounds_check() {
        let err = CooData::<CpuRuntime>::from_slices(
            &[0, 2, 0, 0],
            &[1.0f32, 2.0],
            &[2, 2],
            2,
            &device(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::IndexOutOfBounds { index: 2, size: 2 }));
    }

    #[test]
    fn test_trailing_dense_dims() {
        // Shape [3, 2] with sparse_dim 1: each entry carries a length-2 slice
        let coo = CooData::<CpuRuntime>::from_slices(
            &[0, 2],
            &[1.0f32, 2.0, 3.0, 4.0],
            &[3, 2],
            1,
            &device(),
        )
        .unwrap();
        assert_eq!(coo.dense_dim(), 1);
        assert_eq!(coo.dense_size(), 2);
        assert_eq!(coo.values.shape(), &[2, 2]);
    }

    #[test]
    fn test_value_length_mismatch() {
        assert!(CooData::<CpuRuntime>::from_slices(
            &[0, 1, 1, 0],
            &[1.0f32],
            &[2, 2],
            2,
            &device(),
        )
        .is_err());
    }
}
