//! Backend trait for sparse primitives

use super::{CooData, CsrData};
use crate::dtype::Element;
use crate::error::Result;
use crate::runtime::Runtime;
use crate::tensor::Tensor;

/// Scaling and transpose parameters for the BLAS-style primitives
///
/// The contracts are `Y ← α·op(A)·op(B) + β·Y` (SpMM),
/// `y ← α·op(A)·x + β·y` (SpMV), `C ← α·op(A)·op(B)` (SpGEMM) and
/// `C ← α·(op(A)·op(B)) ∘ spy(C) + β·C` (SDDMM), where `op` is identity or
/// transpose.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BlasParams {
    /// Transpose the sparse/first operand
    pub trans_a: bool,
    /// Transpose the dense/second operand
    pub trans_b: bool,
    /// Scale on the product
    pub alpha: f64,
    /// Scale on the existing output
    pub beta: f64,
}

impl Default for BlasParams {
    fn default() -> Self {
        Self {
            trans_a: false,
            trans_b: false,
            alpha: 1.0,
            beta: 0.0,
        }
    }
}

impl BlasParams {
    /// Defaults: no transposes, `alpha = 1`, `beta = 0`
    pub fn new() -> Self {
        Self::default()
    }

    /// Set alpha
    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set beta
    pub fn beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    /// Transpose the first operand
    pub fn trans_a(mut self, trans: bool) -> Self {
        self.trans_a = trans;
        self
    }

    /// Transpose the second operand
    pub fn trans_b(mut self, trans: bool) -> Self {
        self.trans_b = trans;
        self
    }
}

/// Sparse kernels implemented by a backend client
///
/// These are the typed entry points; the dtype-erased wrappers on
/// [`CooData`]/[`CsrData`] validate shapes, dtypes and devices, make dense
/// operands contiguous, and dispatch here via `dispatch_dtype!`. Kernels may
/// assume contiguous operands and a preallocated, shape-checked output.
pub trait SparseOps<R: Runtime> {
    // ===== Conversions =====

    /// Dense tensor to COO with `sparse_dim` leading sparse dimensions
    fn dense_to_coo<T: Element>(&self, dense: &Tensor<R>, sparse_dim: usize) -> Result<CooData<R>>;

    /// COO to dense (duplicates sum)
    fn coo_to_dense<T: Element>(&self, coo: &CooData<R>) -> Result<Tensor<R>>;

    /// COO to CSR (coalesces first, so duplicates sum)
    fn coo_to_csr<T: Element>(&self, coo: &CooData<R>) -> Result<CsrData<R>>;

    /// CSR to COO (output is coalesced)
    fn csr_to_coo<T: Element>(&self, csr: &CsrData<R>) -> Result<CooData<R>>;

    /// CSR to dense
    fn csr_to_dense<T: Element>(&self, csr: &CsrData<R>) -> Result<Tensor<R>>;

    /// Sort by flattened index and sum duplicates
    fn coalesce<T: Element>(&self, coo: &CooData<R>) -> Result<CooData<R>>;

    // ===== BLAS-style primitives =====

    /// `Y ← α·op(A)·op(B) + β·Y` with CSR A (rank 2 or batched rank 3)
    fn spmm_csr<T: Element>(
        &self,
        a: &CsrData<R>,
        b: &Tensor<R>,
        y: &mut Tensor<R>,
        params: &BlasParams,
    ) -> Result<()>;

    /// `Y ← α·op(A)·op(B) + β·Y` with COO A (rank 2)
    fn spmm_coo<T: Element>(
        &self,
        a: &CooData<R>,
        b: &Tensor<R>,
        y: &mut Tensor<R>,
        params: &BlasParams,
    ) -> Result<()>;

    /// `y ← α·op(A)·x + β·y` with CSR A and 1-D x, y
    fn spmv_csr<T: Element>(
        &self,
        a: &CsrData<R>,
        x: &Tensor<R>,
        y: &mut Tensor<R>,
        params: &BlasParams,
    ) -> Result<()>;

    /// `C ← α·op(A)·op(B)` with CSR operands, producing CSR
    fn spgemm_csr<T: Element>(
        &self,
        a: &CsrData<R>,
        b: &CsrData<R>,
        params: &BlasParams,
    ) -> Result<CsrData<R>>;

    /// `C ← α·(op(A)·op(B)) ∘ spy(C) + β·C`: dense×dense sampled by a CSR mask
    fn sddmm_csr<T: Element>(
        &self,
        a: &Tensor<R>,
        b: &Tensor<R>,
        mask: &CsrData<R>,
        params: &BlasParams,
    ) -> Result<CsrData<R>>;
}
