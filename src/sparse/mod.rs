//! Sparse tensor storage formats and operations
//!
//! Two storage formats are exposed: [`CooData`] (coordinate list, N-D with
//! trailing dense dimensions) and [`CsrData`] (compressed sparse row, rank 2
//! or batched rank 3). Conversions and the BLAS-style primitives (SpMM, SpMV,
//! SpGEMM, SDDMM) are dispatched through the [`SparseOps`] backend trait.

mod coo;
mod csr;
mod format;
mod ops;

pub use coo::CooData;
pub use csr::CsrData;
pub use format::{SparseFormat, SparseStorage};
pub use ops::{BlasParams, SparseOps};
