//! CUDA device abstraction

use crate::error::{Error, Result};
use crate::runtime::Device;

/// A single GPU, identified by its driver index
#[derive(Clone, Debug)]
pub struct CudaDevice {
    pub(crate) index: usize,
}

impl CudaDevice {
    /// Device at the given driver index
    pub fn new(index: usize) -> Self {
        Self { index }
    }

    /// Free and total global memory in bytes
    pub fn memory_info(&self) -> Result<(usize, usize)> {
        let (free, total) = cudarc::driver::result::mem_get_info()
            .map_err(|e| Error::Backend(format!("failed to query device memory: {e:?}")))?;
        Ok((free, total))
    }
}

impl Device for CudaDevice {
    fn id(&self) -> usize {
        self.index
    }

    fn name(&self) -> String {
        format!("cuda:{}", self.index)
    }
}

impl Default for CudaDevice {
    fn default() -> Self {
        Self::new(0)
    }
}
