//! Core Tensor type

use super::{Layout, Storage, TensorId};
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use std::fmt;

/// N-dimensional array stored on a compute device
///
/// A tensor is a [`Layout`] view over reference-counted [`Storage`].
/// `transpose` and `reshape` are zero-copy: they produce a new view sharing
/// the same storage. `contiguous()` materializes a strided view into fresh
/// row-major storage.
pub struct Tensor<R: Runtime> {
    id: TensorId,
    storage: Storage<R>,
    layout: Layout,
}

impl<R: Runtime> Tensor<R> {
    /// Build a tensor from existing storage and layout
    pub fn from_parts(storage: Storage<R>, layout: Layout) -> Self {
        Self {
            id: TensorId::new(),
            storage,
            layout,
        }
    }

    /// Create a tensor from host data
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` does not equal the product of `shape`.
    /// For a fallible alternative, use [`Self::try_from_slice`].
    pub fn from_slice<T: Element>(data: &[T], shape: &[usize], device: &R::Device) -> Self {
        Self::try_from_slice(data, shape, device).expect("Tensor::from_slice failed")
    }

    /// Create a tensor from host data (fallible version)
    pub fn try_from_slice<T: Element>(
        data: &[T],
        shape: &[usize],
        device: &R::Device,
    ) -> Result<Self> {
        let expected_len: usize = shape.iter().product();
        if data.len() != expected_len {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }

        Ok(Self::from_parts(
            Storage::from_slice(data, device)?,
            Layout::contiguous(shape),
        ))
    }

    /// Create an uninitialized tensor
    ///
    /// The contents are unspecified; every element must be written before it
    /// is read.
    pub fn empty(shape: &[usize], dtype: DType, device: &R::Device) -> Result<Self> {
        let len: usize = shape.iter().product();
        Ok(Self::from_parts(
            Storage::new(len, dtype, device)?,
            Layout::contiguous(shape),
        ))
    }

    /// Create a zero-filled tensor
    pub fn zeros(shape: &[usize], dtype: DType, device: &R::Device) -> Result<Self> {
        let len: usize = shape.iter().product();
        let bytes = vec![0u8; len * dtype.size_in_bytes()];
        Ok(Self::from_parts(
            Storage::from_bytes(&bytes, dtype, device)?,
            Layout::contiguous(shape),
        ))
    }

    // ===== Accessors =====

    /// Tensor id
    #[inline]
    pub fn id(&self) -> TensorId {
        self.id
    }

    /// Underlying storage
    #[inline]
    pub fn storage(&self) -> &Storage<R> {
        &self.storage
    }

    /// Layout of this view
    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Shape
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    /// Strides (elements)
    #[inline]
    pub fn strides(&self) -> &[isize] {
        self.layout.strides()
    }

    /// Number of dimensions
    #[inline]
    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    /// Total number of elements
    #[inline]
    pub fn numel(&self) -> usize {
        self.layout.elem_count()
    }

    /// Element type
    #[inline]
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Device
    #[inline]
    pub fn device(&self) -> &R::Device {
        self.storage.device()
    }

    /// True iff the view is row-major with offset 0
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    // ===== View operations (zero-copy) =====

    /// Swap two dimensions
    pub fn transpose(&self, dim0: isize, dim1: isize) -> Result<Self> {
        let layout = self.layout.transpose(dim0, dim1).ok_or_else(|| {
            Error::invalid_argument("dim", format!("cannot transpose dims {dim0},{dim1}"))
        })?;

        Ok(Self {
            id: TensorId::new(),
            storage: self.storage.clone(),
            layout,
        })
    }

    /// Transpose the last two dimensions (matrix transpose)
    pub fn t(&self) -> Result<Self> {
        self.transpose(-2, -1)
    }

    /// Reshape to a new shape (zero-copy, requires a contiguous view)
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let layout = self
            .layout
            .reshape(shape)
            .ok_or_else(|| Error::shape_mismatch(shape, self.shape()))?;

        Ok(Self {
            id: TensorId::new(),
            storage: self.storage.clone(),
            layout,
        })
    }

    /// Return a contiguous tensor, copying only if this view is strided
    pub fn contiguous(&self) -> Self {
        if self.is_contiguous() {
            return self.clone();
        }

        let dtype = self.dtype();
        let device = self.storage.device();
        let elem_size = dtype.size_in_bytes();

        let storage = Storage::new(self.numel(), dtype, device)
            .expect("Tensor::contiguous allocation failed");

        R::copy_strided(
            self.storage.ptr(),
            self.layout.offset() * elem_size,
            storage.ptr(),
            self.shape(),
            self.strides(),
            elem_size,
            device,
        )
        .expect("copy_strided failed in contiguous()");

        Self::from_parts(storage, Layout::contiguous(self.shape()))
    }

    // ===== Data access =====

    /// Copy the viewed data to a host `Vec`
    ///
    /// The view must be contiguous; call [`Self::contiguous`] first otherwise.
    pub fn to_vec<T: bytemuck::Pod>(&self) -> Vec<T> {
        assert!(
            self.is_contiguous(),
            "Tensor must be contiguous to copy to vec"
        );

        let elem_size = std::mem::size_of::<T>();
        let byte_offset = self.layout.offset() * elem_size;

        // Allocate with the alignment of T, then view as bytes for the copy.
        let mut result = vec![T::zeroed(); self.numel()];
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut result);
        let src_ptr = self.storage.ptr() as usize + byte_offset;
        R::copy_from_device(src_ptr as u64, bytes, self.storage.device())
            .expect("copy_from_device failed in to_vec()");
        result
    }
}

impl<R: Runtime> Clone for Tensor<R> {
    /// Clones share storage (zero-copy)
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            storage: self.storage.clone(),
            layout: self.layout.clone(),
        }
    }
}

impl<R: Runtime> fmt::Debug for Tensor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("shape", &self.shape())
            .field("dtype", &self.dtype())
            .finish()
    }
}
