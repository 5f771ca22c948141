//! CUDA client: context, stream, cuSPARSE handle, allocator

use std::sync::Arc;

use cudarc::driver::safe::{CudaContext, CudaStream};

use super::cache::is_cuda_context_valid;
use super::cusparse::CudaSparse;
use super::device::CudaDevice;
use super::CudaRuntime;
use crate::error::{Error, Result};
use crate::runtime::{Allocator, RuntimeClient};

/// CUDA runtime client
///
/// Owns the context, the stream every operation launches on, and the
/// cuSPARSE handle bound to that stream. Clones share the underlying
/// handles via `Arc`.
#[derive(Clone)]
pub struct CudaClient {
    pub(crate) device: CudaDevice,
    pub(crate) context: Arc<CudaContext>,
    pub(crate) stream: Arc<CudaStream>,
    pub(crate) cusparse: Arc<CudaSparse>,
    pub(crate) allocator: CudaAllocator,
    pub(crate) raw_handle: CudaRawHandle,
}

impl std::fmt::Debug for CudaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaClient")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl CudaClient {
    /// Create a client for a device: context, stream, cuSPARSE handle
    pub fn new(device: CudaDevice) -> Result<Self> {
        let context = CudaContext::new(device.index)
            .map_err(|e| Error::Backend(format!("failed to create CUDA context: {e:?}")))?;
        context
            .bind_to_thread()
            .map_err(|e| Error::Backend(format!("failed to bind CUDA context: {e:?}")))?;

        let stream = context
            .new_stream()
            .map_err(|e| Error::Backend(format!("failed to create CUDA stream: {e:?}")))?;

        let cusparse = CudaSparse::new(stream.clone())?;

        let allocator = CudaAllocator {
            stream: stream.clone(),
        };
        let raw_handle = CudaRawHandle {
            context: context.clone(),
            stream: stream.clone(),
        };

        Ok(Self {
            device,
            context,
            stream,
            cusparse: Arc::new(cusparse),
            allocator,
            raw_handle,
        })
    }

    /// Stream every kernel and library call must launch on
    #[inline]
    pub fn stream(&self) -> &Arc<CudaStream> {
        &self.stream
    }

    /// CUDA context of this client
    #[inline]
    pub fn context(&self) -> &Arc<CudaContext> {
        &self.context
    }

    /// cuSPARSE handle bound to this client's stream
    #[inline]
    pub fn cusparse(&self) -> &CudaSparse {
        &self.cusparse
    }
}

impl RuntimeClient<CudaRuntime> for CudaClient {
    fn device(&self) -> &CudaDevice {
        &self.device
    }

    fn synchronize(&self) {
        if let Err(e) = self.stream.synchronize() {
            eprintln!("[sparsr::cuda] stream synchronization failed: {e:?}");
        }
    }

    fn allocator(&self) -> &CudaAllocator {
        &self.allocator
    }
}

/// Stream-ordered CUDA allocator
///
/// Uses `cuMemAllocAsync` / `cuMemFreeAsync`; a failed allocation returns a
/// null pointer, which [`ScratchBuffer`](crate::runtime::ScratchBuffer)
/// surfaces as `OutOfMemory`.
#[derive(Clone)]
pub struct CudaAllocator {
    stream: Arc<CudaStream>,
}

impl Allocator for CudaAllocator {
    fn allocate(&self, size_bytes: usize) -> u64 {
        if size_bytes == 0 {
            return 0;
        }

        unsafe {
            let mut ptr: u64 = 0;
            let result =
                cudarc::driver::sys::cuMemAllocAsync(&mut ptr, size_bytes, self.stream.cu_stream());
            if result != cudarc::driver::sys::CUresult::CUDA_SUCCESS {
                // Flush pending stream-ordered frees and retry once
                let _ = self.stream.synchronize();
                let result = cudarc::driver::sys::cuMemAllocAsync(
                    &mut ptr,
                    size_bytes,
                    self.stream.cu_stream(),
                );
                if result != cudarc::driver::sys::CUresult::CUDA_SUCCESS {
                    return 0;
                }
            }
            ptr
        }
    }

    fn deallocate(&self, ptr: u64, _size_bytes: usize) {
        if ptr == 0 {
            return;
        }

        if !is_cuda_context_valid() {
            // Context already torn down; the driver reclaims the memory
            return;
        }

        unsafe {
            let result = cudarc::driver::sys::cuMemFreeAsync(ptr, self.stream.cu_stream());
            if result != cudarc::driver::sys::CUresult::CUDA_SUCCESS
                && result != cudarc::driver::sys::CUresult::CUDA_ERROR_ILLEGAL_ADDRESS
            {
                eprintln!("[sparsr::cuda] cuMemFreeAsync failed for ptr {ptr:#x}: {result:?}");
            }
        }
    }
}

/// Escape hatch for callers launching their own kernels
#[derive(Clone)]
pub struct CudaRawHandle {
    /// CUDA context for device management
    pub context: Arc<CudaContext>,
    /// Stream the runtime launches on
    pub stream: Arc<CudaStream>,
}
