//! Sparse format identification and the common storage interface

use crate::dtype::DType;

/// Identifies a sparse storage format
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SparseFormat {
    /// Coordinate list: explicit indices per entry
    Coo,
    /// Compressed sparse row: row pointers + column indices
    Csr,
}

impl std::fmt::Display for SparseFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SparseFormat::Coo => f.write_str("COO"),
            SparseFormat::Csr => f.write_str("CSR"),
        }
    }
}

/// Interface shared by all sparse storage types
pub trait SparseStorage {
    /// Storage format of this tensor
    fn format(&self) -> SparseFormat;

    /// Logical shape
    fn shape(&self) -> &[usize];

    /// Number of stored entries
    fn nnz(&self) -> usize;

    /// Element type of the values
    fn dtype(&self) -> DType;

    /// Fraction of entries that are implicit zeros
    fn sparsity(&self) -> f64 {
        let total: usize = self.shape().iter().product();
        if total == 0 {
            return 0.0;
        }
        1.0 - self.nnz() as f64 / total as f64
    }

    /// Fraction of entries that are stored
    fn density(&self) -> f64 {
        1.0 - self.sparsity()
    }
}
