//! Broadcast planning for per-edge feature computation
//!
//! Node and edge features may differ in their trailing feature dimensions as
//! long as they broadcast (right-aligned, size-1 axes expand). The plan
//! precomputes, for every output feature coordinate, the linear offsets into
//! each operand's feature slice, so the edge loop is a flat table lookup.

use crate::error::{Error, Result};
use crate::tensor::broadcast_shapes;

/// Precomputed broadcast plan over trailing feature dimensions
#[derive(Clone, Debug)]
pub struct BcastInfo {
    /// False when both feature shapes are identical and the tables are unused
    pub use_bcast: bool,
    /// Elements in one left (node) feature slice
    pub l_len: usize,
    /// Elements in one right (edge) feature slice
    pub r_len: usize,
    /// Elements in one output feature slice
    pub out_len: usize,
    /// Per-output-coordinate offset into the left slice
    pub l_offset: Vec<usize>,
    /// Per-output-coordinate offset into the right slice
    pub r_offset: Vec<usize>,
    /// Broadcast feature shape
    pub out_dims: Vec<usize>,
}

impl BcastInfo {
    /// Offset into the left slice for output coordinate `k`
    #[inline]
    pub fn l(&self, k: usize) -> usize {
        if self.use_bcast {
            self.l_offset[k]
        } else {
            k
        }
    }

    /// Offset into the right slice for output coordinate `k`
    #[inline]
    pub fn r(&self, k: usize) -> usize {
        if self.use_bcast {
            self.r_offset[k]
        } else {
            k
        }
    }
}

/// Build the broadcast plan for two trailing feature shapes
///
/// Scalar features (empty dims) are treated as a single element. Returns
/// `BroadcastError` when a dimension pair is incompatible.
pub fn calc_bcast(l_dims: &[usize], r_dims: &[usize]) -> Result<BcastInfo> {
    let l_len: usize = l_dims.iter().product();
    let r_len: usize = r_dims.iter().product();

    if l_dims == r_dims {
        let out_len = l_len;
        return Ok(BcastInfo {
            use_bcast: false,
            l_len,
            r_len,
            out_len,
            l_offset: Vec::new(),
            r_offset: Vec::new(),
            out_dims: l_dims.to_vec(),
        });
    }

    let out_dims: Vec<usize> = broadcast_shapes(l_dims, r_dims)
        .ok_or_else(|| Error::broadcast(l_dims, r_dims))?
        .to_vec();
    let out_len: usize = out_dims.iter().product();

    let ndim = out_dims.len();
    let dim_at = |dims: &[usize], d: usize| -> usize {
        // Right-aligned: missing leading dims act as 1
        if d + dims.len() >= ndim {
            dims[d + dims.len() - ndim]
        } else {
            1
        }
    };

    // Row-major strides with broadcast axes zeroed
    let mut l_strides = vec![0usize; ndim];
    let mut r_strides = vec![0usize; ndim];
    let (mut ls, mut rs) = (1usize, 1usize);
    for d in (0..ndim).rev() {
        let (l, r) = (dim_at(l_dims, d), dim_at(r_dims, d));
        l_strides[d] = if l == 1 { 0 } else { ls };
        r_strides[d] = if r == 1 { 0 } else { rs };
        ls *= l;
        rs *= r;
    }

    let mut l_offset = vec![0usize; out_len];
    let mut r_offset = vec![0usize; out_len];
    for k in 0..out_len {
        let (mut rem, mut lo, mut ro) = (k, 0usize, 0usize);
        for d in (0..ndim).rev() {
            let coord = rem % out_dims[d];
            rem /= out_dims[d];
            lo += coord * l_strides[d];
            ro += coord * r_strides[d];
        }
        l_offset[k] = lo;
        r_offset[k] = ro;
    }

    Ok(BcastInfo {
        use_bcast: true,
        l_len,
        r_len,
        out_len,
        l_offset,
        r_offset,
        out_dims,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_shapes_bypass_tables() {
        let info = calc_bcast(&[2, 3], &[2, 3]).unwrap();
        assert!(!info.use_bcast);
        assert_eq!(info.out_len, 6);
        assert_eq!(info.l(4), 4);
        assert_eq!(info.r(4), 4);
    }

    #[test]
    fn test_scalar_edge_features() {
        // X features (3,), E features () -> broadcast to (3,)
        let info = calc_bcast(&[3], &[]).unwrap();
        assert!(info.use_bcast);
        assert_eq!(info.out_len, 3);
        assert_eq!((info.l(0), info.l(2)), (0, 2));
        assert_eq!((info.r(0), info.r(2)), (0, 0));
    }

    #[test]
    fn test_size_one_axis_expands() {
        // (2, 1) with (1, 3) -> (2, 3)
        let info = calc_bcast(&[2, 1], &[1, 3]).unwrap();
        assert_eq!(info.out_dims, vec![2, 3]);
        assert_eq!(info.out_len, 6);
        // out (1, 2) -> l row 1, r col 2
        assert_eq!(info.l(5), 1);
        assert_eq!(info.r(5), 2);
    }

    #[test]
    fn test_incompatible_shapes() {
        assert!(calc_bcast(&[2], &[3]).is_err());
    }
}
