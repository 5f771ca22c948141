//! Memory allocator trait, default implementation, and scoped scratch buffers

use crate::error::{Error, Result};

/// Memory allocator for a runtime backend
pub trait Allocator: Clone + Send + Sync {
    /// Allocate memory of the given size, returning a device pointer
    ///
    /// Zero-size requests return a null pointer.
    fn allocate(&self, size_bytes: usize) -> u64;

    /// Deallocate memory
    fn deallocate(&self, ptr: u64, size_bytes: usize);

    /// Total bytes currently allocated, when the allocator tracks it
    fn allocated_bytes(&self) -> usize {
        0
    }
}

/// Default allocator that delegates to backend-provided functions
#[derive(Clone, Debug)]
pub struct DefaultAllocator<D> {
    device: D,
    allocate_fn: fn(usize, &D) -> u64,
    deallocate_fn: fn(u64, usize, &D),
}

impl<D: Clone + Send + Sync> DefaultAllocator<D> {
    /// Create a new default allocator
    pub fn new(
        device: D,
        allocate_fn: fn(usize, &D) -> u64,
        deallocate_fn: fn(u64, usize, &D),
    ) -> Self {
        Self {
            device,
            allocate_fn,
            deallocate_fn,
        }
    }

    /// The device this allocator is associated with
    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: Clone + Send + Sync> Allocator for DefaultAllocator<D> {
    fn allocate(&self, size_bytes: usize) -> u64 {
        (self.allocate_fn)(size_bytes, &self.device)
    }

    fn deallocate(&self, ptr: u64, size_bytes: usize) {
        (self.deallocate_fn)(ptr, size_bytes, &self.device)
    }
}

/// Scoped scratch workspace acquired from an allocator
///
/// Kernels that need temporary device memory (cuSPARSE external buffers,
/// staging areas) acquire it through this guard; the buffer is released when
/// the guard leaves scope, including on early error returns.
pub struct ScratchBuffer<'a, A: Allocator> {
    allocator: &'a A,
    ptr: u64,
    size_bytes: usize,
}

impl<'a, A: Allocator> ScratchBuffer<'a, A> {
    /// Acquire `size_bytes` of scratch memory
    ///
    /// A zero-size request succeeds with a null pointer and releases nothing.
    pub fn acquire(allocator: &'a A, size_bytes: usize) -> Result<Self> {
        if size_bytes == 0 {
            return Ok(Self {
                allocator,
                ptr: 0,
                size_bytes: 0,
            });
        }

        let ptr = allocator.allocate(size_bytes);
        if ptr == 0 {
            return Err(Error::OutOfMemory { size: size_bytes });
        }

        Ok(Self {
            allocator,
            ptr,
            size_bytes,
        })
    }

    /// Device pointer of the scratch area (null for zero-size buffers)
    #[inline]
    pub fn ptr(&self) -> u64 {
        self.ptr
    }

    /// Size of the scratch area in bytes
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

impl<A: Allocator> Drop for ScratchBuffer<'_, A> {
    fn drop(&mut self) {
        if self.ptr != 0 {
            self.allocator.deallocate(self.ptr, self.size_bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allocator_trait_bounds() {
        fn assert_allocator<A: Allocator>() {}
        assert_allocator::<DefaultAllocator<()>>();
    }

    #[test]
    fn test_scratch_zero_size() {
        fn noop_alloc(_: usize, _: &()) -> u64 {
            unreachable!("zero-size scratch must not allocate")
        }
        fn noop_dealloc(_: u64, _: usize, _: &()) {}

        let alloc = DefaultAllocator::new((), noop_alloc, noop_dealloc);
        let buf = ScratchBuffer::acquire(&alloc, 0).unwrap();
        assert_eq!(buf.ptr(), 0);
        assert_eq!(buf.size_bytes(), 0);
    }
}
