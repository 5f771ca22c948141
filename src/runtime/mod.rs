//! Runtime abstraction: devices, clients, allocators, and backends

mod allocator;
mod traits;

#[cfg(feature = "cpu")]
pub mod cpu;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use allocator::{Allocator, DefaultAllocator, ScratchBuffer};
pub use traits::{Device, Runtime, RuntimeClient};
