//! Per-device client cache
//!
//! Creating a CUDA context, stream, and cuSPARSE handle is expensive, so one
//! client is kept per device index and cloned out on demand.

use super::client::CudaClient;
use super::device::CudaDevice;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

static CLIENT_CACHE: OnceLock<Mutex<HashMap<usize, CudaClient>>> = OnceLock::new();

/// Whether the current thread still has a live CUDA context
///
/// Deallocation paths must check this: after context teardown the driver
/// reclaims memory itself and a free call would fault.
pub(super) fn is_cuda_context_valid() -> bool {
    let mut ctx: cudarc::driver::sys::CUcontext = std::ptr::null_mut();
    // SAFETY: cuCtxGetCurrent only writes the out pointer
    let result = unsafe { cudarc::driver::sys::cuCtxGetCurrent(&mut ctx) };
    result == cudarc::driver::sys::CUresult::CUDA_SUCCESS && !ctx.is_null()
}

fn lock_client_cache(
    cache: &Mutex<HashMap<usize, CudaClient>>,
) -> MutexGuard<'_, HashMap<usize, CudaClient>> {
    // Cache operations are idempotent, so a poisoned lock is recoverable
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Get or lazily create the cached client for a device
pub(super) fn get_or_create_client(device: &CudaDevice) -> CudaClient {
    let cache = CLIENT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = lock_client_cache(cache);

    if let Some(client) = guard.get(&device.index) {
        return client.clone();
    }

    let client = CudaClient::new(device.clone()).expect("failed to create CUDA client");
    guard.insert(device.index, client.clone());
    client
}

/// Stream of the cached client for a device, if one exists
pub(super) fn try_get_cached_stream(device_index: usize) -> Option<cudarc::driver::sys::CUstream> {
    let cache = CLIENT_CACHE.get()?;
    let guard = lock_client_cache(cache);
    guard
        .get(&device_index)
        .map(|client| client.stream.cu_stream())
}
