//! Traits for compute backend abstraction

use crate::error::Result;

/// Device identification
pub trait Device: Clone + Send + Sync + 'static {
    /// Unique identifier for this device
    fn id(&self) -> usize;

    /// Check if two devices are the same
    fn is_same(&self, other: &Self) -> bool {
        self.id() == other.id()
    }

    /// Human-readable name
    fn name(&self) -> String {
        format!("Device({})", self.id())
    }
}

/// Client that dispatches operations on a device
///
/// Backend operation traits ([`SparseOps`](crate::sparse::SparseOps),
/// [`GraphOps`](crate::graph::GraphOps)) are implemented on client types.
pub trait RuntimeClient<R: Runtime>: Clone + Send + Sync {
    /// The device this client operates on
    fn device(&self) -> &R::Device;

    /// Wait for all pending operations to complete
    ///
    /// Reading device results (`to_vec`) is only valid after this returns.
    fn synchronize(&self);

    /// The allocator for this client
    fn allocator(&self) -> &R::Allocator;
}

/// Core trait for compute backends
///
/// `Runtime` abstracts over compute devices with static dispatch: every
/// runtime names its device, client, and allocator types, plus a raw handle
/// for backends that expose native objects (streams, contexts).
pub trait Runtime: Clone + Send + Sync + 'static {
    /// Device identifier type
    type Device: Device;

    /// Client for dispatching operations
    type Client: RuntimeClient<Self>;

    /// Memory allocator type
    type Allocator: super::Allocator;

    /// Raw handle for backend-native access (`()` on CPU)
    type RawHandle: Send + Sync;

    /// Human-readable name of this runtime
    fn name() -> &'static str;

    /// Allocate device memory, returning a device pointer
    ///
    /// Fails with `OutOfMemory` when the device cannot satisfy the request.
    fn allocate(size_bytes: usize, device: &Self::Device) -> Result<u64>;

    /// Deallocate device memory
    fn deallocate(ptr: u64, size_bytes: usize, device: &Self::Device);

    /// Copy data from host to device
    fn copy_to_device(src: &[u8], dst: u64, device: &Self::Device) -> Result<()>;

    /// Copy data from device to host
    fn copy_from_device(src: u64, dst: &mut [u8], device: &Self::Device) -> Result<()>;

    /// Copy data within the device
    fn copy_within_device(src: u64, dst: u64, size_bytes: usize, device: &Self::Device)
        -> Result<()>;

    /// Copy a strided view into a contiguous buffer
    ///
    /// `strides` are in elements; `src_byte_offset` positions the view within
    /// the source buffer.
    fn copy_strided(
        src_handle: u64,
        src_byte_offset: usize,
        dst_handle: u64,
        shape: &[usize],
        strides: &[isize],
        elem_size: usize,
        device: &Self::Device,
    ) -> Result<()>;

    /// The default device
    fn default_device() -> Self::Device;

    /// The default client for a device
    fn default_client(device: &Self::Device) -> Self::Client;

    /// Raw handle from a client (escape hatch for native calls)
    fn raw_handle(client: &Self::Client) -> &Self::RawHandle;
}
