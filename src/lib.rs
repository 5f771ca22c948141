//! # sparsr
//!
//! **Sparse tensor computation for Rust with CPU and CUDA backends.**
//!
//! sparsr provides COO and CSR sparse storage over a dense tensor substrate,
//! format conversions, the sparse BLAS primitives (SpMM, SpMV, SpGEMM,
//! SDDMM), and broadcast-aware graph edge reductions for message passing.
//!
//! ## Design
//!
//! - **Static backend dispatch**: every operation is generic over a
//!   [`Runtime`](runtime::Runtime); backends implement the
//!   [`SparseOps`](sparse::SparseOps) and [`GraphOps`](graph::GraphOps)
//!   traits on their client types.
//! - **Deterministic by default**: CPU kernels visit entries in index order;
//!   the CUDA backend selects cuSPARSE's deterministic algorithm variants.
//! - **Scoped workspaces**: temporary device memory is acquired through
//!   [`ScratchBuffer`](runtime::ScratchBuffer) guards tied to the call.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sparsr::prelude::*;
//!
//! let device = CpuRuntime::default_device();
//! let client = CpuRuntime::default_client(&device);
//!
//! let dense = Tensor::<CpuRuntime>::from_slice(&[1.0f32, 0.0, 0.0, 2.0], &[2, 2], &device);
//! let coo = CooData::from_dense(&client, &dense, 2)?;
//! let csr = coo.to_csr(&client)?;
//!
//! let b = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0], &[2, 2], &device);
//! let y = csr.spmm(&client, &b, &BlasParams::new())?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cpu` (default): CPU backend
//! - `cuda`: NVIDIA CUDA backend via cuSPARSE
//! - `rayon` (default): multi-threaded CPU kernels
//! - `f16`: half-precision floats (F16, BF16)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod algorithm;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod runtime;
pub mod sparse;
pub mod tensor;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::dtype::DType;
    pub use crate::error::{Error, Result};
    pub use crate::graph::{ComputeOp, GraphOps, PoolOp, SendRecvOutput};
    pub use crate::runtime::{Device, Runtime, RuntimeClient};
    pub use crate::sparse::{BlasParams, CooData, CsrData, SparseFormat, SparseOps, SparseStorage};
    pub use crate::tensor::{Layout, Tensor};

    #[cfg(feature = "cpu")]
    pub use crate::runtime::cpu::CpuRuntime;

    #[cfg(feature = "cuda")]
    pub use crate::runtime::cuda::CudaRuntime;
}
