//! CUDA backend
//!
//! Sparse BLAS primitives are driven through cuSPARSE generic-API
//! descriptors; conversions between formats stage through pinned host
//! memory since their cost is dominated by the transfer anyway. Each
//! primitive acquires its external workspace as a
//! [`ScratchBuffer`](crate::runtime::ScratchBuffer) scoped to the call.

mod cache;
mod client;
pub mod cusparse;
mod device;
mod runtime;
mod sparse;

pub use client::{CudaAllocator, CudaClient, CudaRawHandle};
pub use device::CudaDevice;
pub use runtime::{cuda_device, cuda_device_id, is_cuda_available, CudaRuntime};
