//! Message-passing edge reductions
//!
//! The core primitive is `send_ue_recv`: for every edge, combine the source
//! node's features with the edge's features ([`ComputeOp`]), then reduce all
//! messages arriving at each destination node ([`PoolOp`]). Feature shapes
//! broadcast over trailing dimensions; see [`bcast`].

mod bcast;

pub use bcast::{calc_bcast, BcastInfo};

use crate::error::Result;
use crate::runtime::Runtime;
use crate::tensor::Tensor;

/// Elementwise combination of source-node and edge features
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ComputeOp {
    /// `x + e`
    Add,
    /// `x * e`
    Mul,
}

/// Reduction over all messages arriving at one destination node
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PoolOp {
    /// Sum of messages
    Sum,
    /// Sum divided by `max(1, in_degree)`
    Mean,
    /// Smallest message; ties keep the first edge in iteration order
    Min,
    /// Largest message; ties keep the first edge in iteration order
    Max,
}

impl PoolOp {
    /// Whether the backward pass needs the forward output for extremum masking
    #[inline]
    pub fn needs_output(&self) -> bool {
        matches!(self, PoolOp::Min | PoolOp::Max)
    }
}

/// Result of the forward edge reduction
pub struct SendRecvOutput<R: Runtime> {
    /// Pooled destination features, shape `(n_out, broadcast feature dims)`
    pub out: Tensor<R>,
    /// In-degree per destination, I32 shape `(n_out,)`; present only for
    /// [`PoolOp::Mean`], where the backward pass needs it
    pub dst_count: Option<Tensor<R>>,
}

impl<R: Runtime> std::fmt::Debug for SendRecvOutput<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendRecvOutput")
            .field("out", &self.out)
            .field("dst_count", &self.dst_count)
            .finish()
    }
}

/// Backend entry points for the edge reductions
///
/// Implementations accept I32 or I64 index tensors and node/edge features of
/// any float dtype; indices out of `[0, n)` are rejected.
pub trait GraphOps<R: Runtime> {
    /// Forward pass: `out[dst[i]] ← pool_i(compute(x[src[i]], e[i]))`
    ///
    /// `n_out` overrides the number of output rows; it defaults to the number
    /// of nodes in `x`. Destinations with no incoming edge are zero.
    #[allow(clippy::too_many_arguments)]
    fn send_ue_recv(
        &self,
        x: &Tensor<R>,
        e: &Tensor<R>,
        src_index: &Tensor<R>,
        dst_index: &Tensor<R>,
        compute_op: ComputeOp,
        pool_op: PoolOp,
        n_out: Option<usize>,
    ) -> Result<SendRecvOutput<R>>;

    /// Backward pass: gradients of the forward output w.r.t. `x` and `e`
    ///
    /// `out` is the forward result (consulted for Min/Max extremum masking)
    /// and `dst_count` the forward degree tensor (required for Mean).
    /// Gradients of broadcast feature axes are summed back to the operand
    /// shapes.
    #[allow(clippy::too_many_arguments)]
    fn send_ue_recv_grad(
        &self,
        x: &Tensor<R>,
        e: &Tensor<R>,
        src_index: &Tensor<R>,
        dst_index: &Tensor<R>,
        out: &Tensor<R>,
        dst_count: Option<&Tensor<R>>,
        out_grad: &Tensor<R>,
        compute_op: ComputeOp,
        pool_op: PoolOp,
    ) -> Result<(Tensor<R>, Tensor<R>)>;
}
