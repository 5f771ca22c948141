//! Layout: shape, strides, and offset describing a view into storage

use smallvec::SmallVec;
use std::fmt;

/// Stack allocation threshold for dimensions. Sparse workloads rarely go
/// beyond rank 4 (batch, rows, cols, features).
const STACK_DIMS: usize = 4;

/// Shape type: dimensions of a tensor
pub type Shape = SmallVec<[usize; STACK_DIMS]>;

/// Strides type: element offsets between consecutive elements along each
/// dimension. Signed so transposed/backward views stay representable.
/// Strides are in elements, not bytes.
pub type Strides = SmallVec<[isize; STACK_DIMS]>;

/// Memory layout of a tensor view
///
/// The address (in elements) of the entry at `[i0, i1, ..., in]` is
/// `offset + i0 * strides[0] + ... + in * strides[n]`.
#[derive(Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Strides,
    offset: usize,
}

impl Layout {
    /// Row-major (C-order) layout for a shape
    pub fn contiguous(shape: &[usize]) -> Self {
        let shape: Shape = shape.iter().copied().collect();
        let strides = Self::contiguous_strides(&shape);
        Self {
            shape,
            strides,
            offset: 0,
        }
    }

    /// Layout with explicit shape, strides, and offset
    pub fn new(shape: Shape, strides: Strides, offset: usize) -> Self {
        debug_assert_eq!(shape.len(), strides.len());
        Self {
            shape,
            strides,
            offset,
        }
    }

    fn contiguous_strides(shape: &[usize]) -> Strides {
        let mut strides: Strides = SmallVec::with_capacity(shape.len());
        let mut stride = 1isize;
        for &dim in shape.iter().rev() {
            strides.push(stride);
            stride *= dim as isize;
        }
        strides.reverse();
        strides
    }

    /// Shape of the view
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Strides of the view (elements)
    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    /// Starting element offset into storage
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of dimensions
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements
    #[inline]
    pub fn elem_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// True iff the view is row-major with offset 0
    pub fn is_contiguous(&self) -> bool {
        if self.shape.is_empty() {
            return true;
        }
        self.offset == 0 && self.strides == Self::contiguous_strides(&self.shape)
    }

    /// Normalize a possibly-negative dimension index
    pub fn normalize_dim(&self, d: isize) -> Option<usize> {
        let ndim = self.ndim() as isize;
        let idx = if d < 0 { ndim + d } else { d };
        (idx >= 0 && idx < ndim).then_some(idx as usize)
    }

    /// Linear element offset for the given indices, bounds-checked
    pub fn index(&self, indices: &[usize]) -> Option<usize> {
        if indices.len() != self.ndim() {
            return None;
        }
        for (idx, &dim) in indices.iter().zip(self.shape.iter()) {
            if *idx >= dim {
                return None;
            }
        }
        let mut linear = self.offset as isize;
        for (&idx, &stride) in indices.iter().zip(self.strides.iter()) {
            linear += idx as isize * stride;
        }
        Some(linear as usize)
    }

    /// Swap two dimensions (zero-copy transpose)
    pub fn transpose(&self, dim0: isize, dim1: isize) -> Option<Self> {
        let d0 = self.normalize_dim(dim0)?;
        let d1 = self.normalize_dim(dim1)?;

        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.swap(d0, d1);
        strides.swap(d0, d1);

        Some(Self::new(shape, strides, self.offset))
    }

    /// Reinterpret as a new shape. Only valid for contiguous views with a
    /// matching element count.
    pub fn reshape(&self, new_shape: &[usize]) -> Option<Self> {
        if !self.is_contiguous() {
            return None;
        }
        let new_count: usize = new_shape.iter().product();
        if new_count != self.elem_count() {
            return None;
        }
        Some(Self::contiguous(new_shape))
    }
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Layout {{ shape: {:?}, strides: {:?}, offset: {} }}",
            self.shape.as_slice(),
            self.strides.as_slice(),
            self.offset
        )
    }
}

/// Compute the broadcast shape of two shapes (NumPy rules)
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Shape> {
    let max_ndim = a.len().max(b.len());
    let mut result = Shape::with_capacity(max_ndim);

    for i in 0..max_ndim {
        let a_dim = if i < a.len() { a[a.len() - 1 - i] } else { 1 };
        let b_dim = if i < b.len() { b[b.len() - 1 - i] } else { 1 };

        if a_dim == b_dim || b_dim == 1 {
            result.push(a_dim);
        } else if a_dim == 1 {
            result.push(b_dim);
        } else {
            return None;
        }
    }

    result.reverse();
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_layout() {
        let layout = Layout::contiguous(&[2, 3, 4]);
        assert_eq!(layout.shape(), &[2, 3, 4]);
        assert_eq!(layout.strides(), &[12, 4, 1]);
        assert_eq!(layout.elem_count(), 24);
        assert!(layout.is_contiguous());
    }

    #[test]
    fn test_transpose() {
        let layout = Layout::contiguous(&[2, 3]);
        let t = layout.transpose(-1, -2).unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.strides(), &[1, 3]);
        assert!(!t.is_contiguous());
    }

    #[test]
    fn test_reshape() {
        let layout = Layout::contiguous(&[2, 3, 4]);
        let r = layout.reshape(&[6, 4]).unwrap();
        assert_eq!(r.shape(), &[6, 4]);
        assert!(r.is_contiguous());

        let t = layout.transpose(0, 1).unwrap();
        assert!(t.reshape(&[6, 4]).is_none());
    }

    #[test]
    fn test_index() {
        let layout = Layout::contiguous(&[2, 3]);
        assert_eq!(layout.index(&[0, 2]), Some(2));
        assert_eq!(layout.index(&[1, 0]), Some(3));
        assert_eq!(layout.index(&[2, 0]), None);
    }

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(
            broadcast_shapes(&[3, 1], &[1, 4]),
            Some(SmallVec::from_slice(&[3, 4]))
        );
        assert_eq!(
            broadcast_shapes(&[2, 3, 4], &[4]),
            Some(SmallVec::from_slice(&[2, 3, 4]))
        );
        assert_eq!(broadcast_shapes(&[3], &[4]), None);
    }
}
