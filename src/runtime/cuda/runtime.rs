//! CUDA runtime

use super::cache::{get_or_create_client, is_cuda_context_valid, try_get_cached_stream};
use super::client::{CudaAllocator, CudaClient, CudaRawHandle};
use super::device::CudaDevice;
use crate::error::{Error, Result};
use crate::runtime::Runtime;

/// CUDA backend marker type
#[derive(Clone, Debug, Default)]
pub struct CudaRuntime;

impl Runtime for CudaRuntime {
    type Device = CudaDevice;
    type Client = CudaClient;
    type Allocator = CudaAllocator;
    type RawHandle = CudaRawHandle;

    fn name() -> &'static str {
        "cuda"
    }

    fn allocate(size_bytes: usize, device: &Self::Device) -> Result<u64> {
        if size_bytes == 0 {
            return Ok(0);
        }

        let client = get_or_create_client(device);
        unsafe {
            let mut ptr: u64 = 0;
            let result = cudarc::driver::sys::cuMemAllocAsync(
                &mut ptr,
                size_bytes,
                client.stream.cu_stream(),
            );
            if result == cudarc::driver::sys::CUresult::CUDA_SUCCESS {
                return Ok(ptr);
            }

            // Flush pending stream-ordered frees and retry once
            let _ = client.stream.synchronize();
            let result = cudarc::driver::sys::cuMemAllocAsync(
                &mut ptr,
                size_bytes,
                client.stream.cu_stream(),
            );
            if result == cudarc::driver::sys::CUresult::CUDA_SUCCESS {
                return Ok(ptr);
            }

            Err(Error::OutOfMemory { size: size_bytes })
        }
    }

    fn deallocate(ptr: u64, _size_bytes: usize, device: &Self::Device) {
        if ptr == 0 {
            return;
        }

        if !is_cuda_context_valid() {
            return;
        }

        unsafe {
            let result = if let Some(stream) = try_get_cached_stream(device.index) {
                cudarc::driver::sys::cuMemFreeAsync(ptr, stream)
            } else {
                cudarc::driver::sys::cuMemFree_v2(ptr)
            };

            if result != cudarc::driver::sys::CUresult::CUDA_SUCCESS
                && result != cudarc::driver::sys::CUresult::CUDA_ERROR_ILLEGAL_ADDRESS
            {
                eprintln!("[sparsr::cuda] cuMemFree failed for ptr {ptr:#x}: {result:?}");
            }
        }
    }

    fn copy_to_device(src: &[u8], dst: u64, device: &Self::Device) -> Result<()> {
        if src.is_empty() || dst == 0 {
            return Ok(());
        }

        let client = get_or_create_client(device);
        unsafe {
            let result = cudarc::driver::sys::cuMemcpyHtoDAsync_v2(
                dst,
                src.as_ptr() as *const std::ffi::c_void,
                src.len(),
                client.stream.cu_stream(),
            );
            if result != cudarc::driver::sys::CUresult::CUDA_SUCCESS {
                return Err(Error::Backend(format!(
                    "host-to-device copy failed: {} bytes ({result:?})",
                    src.len()
                )));
            }
            let _ = client.stream.synchronize();
        }
        Ok(())
    }

    fn copy_from_device(src: u64, dst: &mut [u8], device: &Self::Device) -> Result<()> {
        if dst.is_empty() || src == 0 {
            return Ok(());
        }

        let client = get_or_create_client(device);
        unsafe {
            let result = cudarc::driver::sys::cuMemcpyDtoHAsync_v2(
                dst.as_mut_ptr() as *mut std::ffi::c_void,
                src,
                dst.len(),
                client.stream.cu_stream(),
            );
            if result != cudarc::driver::sys::CUresult::CUDA_SUCCESS {
                return Err(Error::Backend(format!(
                    "device-to-host copy failed: {} bytes ({result:?})",
                    dst.len()
                )));
            }
            let _ = client.stream.synchronize();
        }
        Ok(())
    }

    fn copy_within_device(
        src: u64,
        dst: u64,
        size_bytes: usize,
        device: &Self::Device,
    ) -> Result<()> {
        if size_bytes == 0 || src == 0 || dst == 0 {
            return Ok(());
        }

        let client = get_or_create_client(device);
        unsafe {
            let result = cudarc::driver::sys::cuMemcpyDtoDAsync_v2(
                dst,
                src,
                size_bytes,
                client.stream.cu_stream(),
            );
            if result != cudarc::driver::sys::CUresult::CUDA_SUCCESS {
                return Err(Error::Backend(format!(
                    "device-to-device copy failed: {size_bytes} bytes ({result:?})"
                )));
            }
        }
        Ok(())
    }

    /// Gather a strided view into a contiguous buffer
    ///
    /// Stages through the host: the byte span covering the view is copied
    /// down once, gathered with an odometer walk, and copied back. Strided
    /// views only arise from `contiguous()` on transposed tensors, which is
    /// rare in sparse workloads.
    fn copy_strided(
        src_handle: u64,
        src_byte_offset: usize,
        dst_handle: u64,
        shape: &[usize],
        strides: &[isize],
        elem_size: usize,
        device: &Self::Device,
    ) -> Result<()> {
        if src_handle == 0 || dst_handle == 0 || shape.is_empty() {
            return Ok(());
        }
        let numel: usize = shape.iter().product();
        if numel == 0 {
            return Ok(());
        }

        // Element-offset extent of the view relative to src_byte_offset
        let (mut min_off, mut max_off) = (0isize, 0isize);
        for (d, &stride) in strides.iter().enumerate() {
            let reach = stride * (shape[d] as isize - 1);
            if reach < 0 {
                min_off += reach;
            } else {
                max_off += reach;
            }
        }

        let span_elems = (max_off - min_off) as usize + 1;
        let span_base = src_byte_offset as isize + min_off * elem_size as isize;
        if span_base < 0 {
            return Err(Error::Internal(
                "strided view reaches before its buffer".to_string(),
            ));
        }

        let mut staging = vec![0u8; span_elems * elem_size];
        Self::copy_from_device(src_handle + span_base as u64, &mut staging, device)?;

        let mut gathered = vec![0u8; numel * elem_size];
        let mut coords = vec![0usize; shape.len()];
        for i in 0..numel {
            let mut elem_off = -min_off;
            for (d, &c) in coords.iter().enumerate() {
                elem_off += strides[d] * c as isize;
            }
            let src_byte = elem_off as usize * elem_size;
            gathered[i * elem_size..(i + 1) * elem_size]
                .copy_from_slice(&staging[src_byte..src_byte + elem_size]);

            for d in (0..shape.len()).rev() {
                coords[d] += 1;
                if coords[d] < shape[d] {
                    break;
                }
                coords[d] = 0;
            }
        }

        Self::copy_to_device(&gathered, dst_handle, device)
    }

    fn default_device() -> Self::Device {
        CudaDevice::new(0)
    }

    fn default_client(device: &Self::Device) -> Self::Client {
        get_or_create_client(device)
    }

    fn raw_handle(client: &Self::Client) -> &Self::RawHandle {
        &client.raw_handle
    }
}

/// The default CUDA device (index 0)
pub fn cuda_device() -> CudaDevice {
    CudaDevice::new(0)
}

/// A specific CUDA device by index
pub fn cuda_device_id(device_id: usize) -> CudaDevice {
    CudaDevice::new(device_id)
}

/// Whether a CUDA device can be initialized on this system
pub fn is_cuda_available() -> bool {
    std::panic::catch_unwind(|| {
        let device = CudaDevice::new(0);
        let _client = get_or_create_client(&device);
    })
    .is_ok()
}
