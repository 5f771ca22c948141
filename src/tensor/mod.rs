//! Tensor types: dense N-dimensional arrays on a compute device

mod core;
mod id;
mod layout;
mod storage;

pub use core::Tensor;
pub use id::TensorId;
pub use layout::{broadcast_shapes, Layout, Shape, Strides};
pub use storage::Storage;
