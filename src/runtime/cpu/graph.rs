//! Edge reductions for the CPU runtime
//!
//! Single-threaded edge loop in submission order: Min/Max tie resolution
//! (first edge wins) and floating-point sums are exactly reproducible.

use super::{CpuClient, CpuRuntime};
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::graph::{calc_bcast, BcastInfo, ComputeOp, GraphOps, PoolOp, SendRecvOutput};
use crate::tensor::Tensor;

/// Read an index tensor as i64, accepting I32 or I64
fn read_index(name: &'static str, t: &Tensor<CpuRuntime>) -> Result<Vec<i64>> {
    if t.ndim() != 1 {
        return Err(Error::invalid_argument(
            name,
            format!("index tensor must be rank 1, got rank {}", t.ndim()),
        ));
    }
    match t.dtype() {
        DType::I64 => Ok(t.to_vec()),
        DType::I32 => Ok(t.to_vec::<i32>().into_iter().map(i64::from).collect()),
        dtype => Err(Error::invalid_argument(
            name,
            format!("index tensor must be i32 or i64, got {dtype}"),
        )),
    }
}

fn check_indices(name: &'static str, indices: &[i64], bound: usize) -> Result<()> {
    for &idx in indices {
        if idx < 0 || idx as usize >= bound {
            return Err(Error::IndexOutOfBounds {
                index: idx,
                size: bound,
            });
        }
    }
    Ok(())
}

/// Validate operands and build the feature broadcast plan
fn prepare(
    x: &Tensor<CpuRuntime>,
    e: &Tensor<CpuRuntime>,
    src_index: &Tensor<CpuRuntime>,
    dst_index: &Tensor<CpuRuntime>,
    n_out: Option<usize>,
) -> Result<(Vec<i64>, Vec<i64>, BcastInfo, usize)> {
    if x.ndim() == 0 || e.ndim() == 0 {
        return Err(Error::invalid_argument(
            "x",
            "node and edge features must have a leading entry dimension".to_string(),
        ));
    }
    if x.dtype() != e.dtype() {
        return Err(Error::DTypeMismatch {
            lhs: x.dtype(),
            rhs: e.dtype(),
        });
    }

    let src = read_index("src_index", src_index)?;
    let dst = read_index("dst_index", dst_index)?;
    if src.len() != dst.len() {
        return Err(Error::shape_mismatch(&[src.len()], &[dst.len()]));
    }
    if e.shape()[0] != src.len() {
        return Err(Error::shape_mismatch(&[src.len()], &[e.shape()[0]]));
    }

    let n_out = n_out.unwrap_or(x.shape()[0]);
    check_indices("src_index", &src, x.shape()[0])?;
    check_indices("dst_index", &dst, n_out)?;

    let bcast = calc_bcast(&x.shape()[1..], &e.shape()[1..])?;
    Ok((src, dst, bcast, n_out))
}

#[inline]
fn apply(op: ComputeOp, x: f64, e: f64) -> f64 {
    match op {
        ComputeOp::Add => x + e,
        ComputeOp::Mul => x * e,
    }
}

fn forward<T: Element>(
    x: &Tensor<CpuRuntime>,
    e: &Tensor<CpuRuntime>,
    src: &[i64],
    dst: &[i64],
    bcast: &BcastInfo,
    compute_op: ComputeOp,
    pool_op: PoolOp,
    n_out: usize,
) -> Result<SendRecvOutput<CpuRuntime>> {
    let x_data: Vec<T> = x.to_vec();
    let e_data: Vec<T> = e.to_vec();
    let out_len = bcast.out_len;

    // Destinations with no incoming edge stay zero for every pool op, so the
    // accumulator starts at zero and Min/Max track initialization separately.
    let mut acc = vec![0.0f64; n_out * out_len];
    let mut seen = vec![false; if pool_op.needs_output() { n_out * out_len } else { 0 }];
    let mut deg = vec![0i32; n_out];

    for i in 0..src.len() {
        let (s, d) = (src[i] as usize, dst[i] as usize);
        deg[d] += 1;
        for k in 0..out_len {
            let xv = x_data[s * bcast.l_len + bcast.l(k)].to_f64();
            let ev = e_data[i * bcast.r_len + bcast.r(k)].to_f64();
            let v = apply(compute_op, xv, ev);
            let slot = d * out_len + k;
            match pool_op {
                PoolOp::Sum | PoolOp::Mean => acc[slot] += v,
                PoolOp::Min => {
                    // Strict comparison: the first edge keeps ties
                    if !seen[slot] || v < acc[slot] {
                        acc[slot] = v;
                        seen[slot] = true;
                    }
                }
                PoolOp::Max => {
                    if !seen[slot] || v > acc[slot] {
                        acc[slot] = v;
                        seen[slot] = true;
                    }
                }
            }
        }
    }

    if pool_op == PoolOp::Mean {
        for d in 0..n_out {
            let scale = 1.0 / deg[d].max(1) as f64;
            for v in &mut acc[d * out_len..(d + 1) * out_len] {
                *v *= scale;
            }
        }
    }

    let out_data: Vec<T> = acc.iter().map(|&v| T::from_f64(v)).collect();
    let mut out_shape = vec![n_out];
    out_shape.extend_from_slice(&bcast.out_dims);

    let dst_count = if pool_op == PoolOp::Mean {
        Some(Tensor::try_from_slice(&deg, &[n_out], x.device())?)
    } else {
        None
    };

    Ok(SendRecvOutput {
        out: Tensor::try_from_slice(&out_data, &out_shape, x.device())?,
        dst_count,
    })
}

#[allow(clippy::too_many_arguments)]
fn backward<T: Element>(
    x: &Tensor<CpuRuntime>,
    e: &Tensor<CpuRuntime>,
    src: &[i64],
    dst: &[i64],
    bcast: &BcastInfo,
    out: &Tensor<CpuRuntime>,
    dst_count: Option<&Tensor<CpuRuntime>>,
    out_grad: &Tensor<CpuRuntime>,
    compute_op: ComputeOp,
    pool_op: PoolOp,
) -> Result<(Tensor<CpuRuntime>, Tensor<CpuRuntime>)> {
    let x_data: Vec<T> = x.to_vec();
    let e_data: Vec<T> = e.to_vec();
    let g_data: Vec<T> = out_grad.to_vec();
    let out_len = bcast.out_len;

    let out_data: Vec<T> = if pool_op.needs_output() {
        out.to_vec()
    } else {
        Vec::new()
    };
    let deg: Vec<i32> = match (pool_op, dst_count) {
        (PoolOp::Mean, Some(t)) => t.to_vec(),
        (PoolOp::Mean, None) => {
            return Err(Error::invalid_argument(
                "dst_count",
                "mean pooling backward requires the forward degree tensor".to_string(),
            ))
        }
        _ => Vec::new(),
    };

    // Accumulating through the broadcast offset tables folds the gradient of
    // an expanded axis back onto the operand's single element.
    let mut x_grad = vec![0.0f64; x.numel()];
    let mut e_grad = vec![0.0f64; e.numel()];

    for i in 0..src.len() {
        let (s, d) = (src[i] as usize, dst[i] as usize);
        for k in 0..out_len {
            let xv = x_data[s * bcast.l_len + bcast.l(k)].to_f64();
            let ev = e_data[i * bcast.r_len + bcast.r(k)].to_f64();
            let mut g = g_data[d * out_len + k].to_f64();

            match pool_op {
                PoolOp::Sum => {}
                PoolOp::Mean => g /= deg[d].max(1) as f64,
                PoolOp::Min | PoolOp::Max => {
                    // Gradient flows only through edges that achieved the
                    // pooled extremum; all tied edges receive it. The forward
                    // output was rounded through T, so the recomputed value
                    // must be rounded the same way before comparing.
                    let v = T::from_f64(apply(compute_op, xv, ev)).to_f64();
                    if v != out_data[d * out_len + k].to_f64() {
                        continue;
                    }
                }
            }

            match compute_op {
                ComputeOp::Add => {
                    x_grad[s * bcast.l_len + bcast.l(k)] += g;
                    e_grad[i * bcast.r_len + bcast.r(k)] += g;
                }
                ComputeOp::Mul => {
                    x_grad[s * bcast.l_len + bcast.l(k)] += g * ev;
                    e_grad[i * bcast.r_len + bcast.r(k)] += g * xv;
                }
            }
        }
    }

    let x_out: Vec<T> = x_grad.iter().map(|&v| T::from_f64(v)).collect();
    let e_out: Vec<T> = e_grad.iter().map(|&v| T::from_f64(v)).collect();
    Ok((
        Tensor::try_from_slice(&x_out, x.shape(), x.device())?,
        Tensor::try_from_slice(&e_out, e.shape(), e.device())?,
    ))
}

impl GraphOps<CpuRuntime> for CpuClient {
    fn send_ue_recv(
        &self,
        x: &Tensor<CpuRuntime>,
        e: &Tensor<CpuRuntime>,
        src_index: &Tensor<CpuRuntime>,
        dst_index: &Tensor<CpuRuntime>,
        compute_op: ComputeOp,
        pool_op: PoolOp,
        n_out: Option<usize>,
    ) -> Result<SendRecvOutput<CpuRuntime>> {
        let (src, dst, bcast, n_out) = prepare(x, e, src_index, dst_index, n_out)?;
        let x = x.contiguous();
        let e = e.contiguous();

        crate::dispatch_dtype!(x.dtype(), T => {
            forward::<T>(&x, &e, &src, &dst, &bcast, compute_op, pool_op, n_out)
        }, "send_ue_recv")
    }

    fn send_ue_recv_grad(
        &self,
        x: &Tensor<CpuRuntime>,
        e: &Tensor<CpuRuntime>,
        src_index: &Tensor<CpuRuntime>,
        dst_index: &Tensor<CpuRuntime>,
        out: &Tensor<CpuRuntime>,
        dst_count: Option<&Tensor<CpuRuntime>>,
        out_grad: &Tensor<CpuRuntime>,
        compute_op: ComputeOp,
        pool_op: PoolOp,
    ) -> Result<(Tensor<CpuRuntime>, Tensor<CpuRuntime>)> {
        let (src, dst, bcast, n_out) = prepare(x, e, src_index, dst_index, Some(out.shape()[0]))?;

        let mut expected = vec![n_out];
        expected.extend_from_slice(&bcast.out_dims);
        if out_grad.shape() != expected.as_slice() {
            return Err(Error::shape_mismatch(&expected, out_grad.shape()));
        }
        if out_grad.dtype() != x.dtype() {
            return Err(Error::DTypeMismatch {
                lhs: x.dtype(),
                rhs: out_grad.dtype(),
            });
        }

        let x = x.contiguous();
        let e = e.contiguous();
        let out = out.contiguous();
        let out_grad = out_grad.contiguous();

        crate::dispatch_dtype!(x.dtype(), T => {
            backward::<T>(
                &x, &e, &src, &dst, &bcast, &out, dst_count, &out_grad, compute_op, pool_op,
            )
        }, "send_ue_recv_grad")
    }
}
