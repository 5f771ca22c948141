//! Backend-agnostic algorithms and validation helpers
//!
//! Code here operates on host slices and plain shapes so that every backend
//! validates and converts identically. Same inputs always produce the same
//! sparsity structure regardless of where kernels execute.

pub mod convert;
pub mod sparse;
