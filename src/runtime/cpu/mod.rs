//! CPU backend
//!
//! The CPU backend is the reference implementation: every sparse primitive
//! and the graph edge reductions are implemented here with deterministic
//! results. Row-parallel kernels (SpMM) use rayon when the `rayon` feature
//! is enabled and partition disjoint output rows, so parallel and serial
//! execution produce identical results.

mod client;
mod device;
mod graph;
mod runtime;
mod sparse;

pub use client::{CpuAllocator, CpuClient};
pub use device::CpuDevice;
pub use runtime::CpuRuntime;
