//! Integration tests for broadcast-aware edge reductions

use sparsr::prelude::*;

fn setup() -> (<CpuRuntime as Runtime>::Device, <CpuRuntime as Runtime>::Client) {
    let device = CpuRuntime::default_device();
    let client = CpuRuntime::default_client(&device);
    (device, client)
}

fn tensor(
    device: &<CpuRuntime as Runtime>::Device,
    data: &[f32],
    shape: &[usize],
) -> Tensor<CpuRuntime> {
    Tensor::from_slice(data, shape, device)
}

fn index(device: &<CpuRuntime as Runtime>::Device, data: &[i64]) -> Tensor<CpuRuntime> {
    Tensor::from_slice(data, &[data.len()], device)
}

/// Shared fixture: 3 nodes with 2-wide features, edges 0->2, 1->2, 0->0
fn fixture(
    device: &<CpuRuntime as Runtime>::Device,
) -> (
    Tensor<CpuRuntime>,
    Tensor<CpuRuntime>,
    Tensor<CpuRuntime>,
    Tensor<CpuRuntime>,
) {
    let x = tensor(device, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);
    let e = tensor(device, &[10.0, 10.0, 20.0, 20.0, 1.0, 1.0], &[3, 2]);
    let src = index(device, &[0, 1, 0]);
    let dst = index(device, &[2, 2, 0]);
    (x, e, src, dst)
}

#[test]
fn add_pooling_variants() -> Result<()> {
    let (device, client) = setup();
    let (x, e, src, dst) = fixture(&device);

    let sum = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Sum, None)?;
    assert_eq!(
        sum.out.to_vec::<f32>(),
        vec![2.0, 3.0, 0.0, 0.0, 34.0, 36.0]
    );
    assert!(sum.dst_count.is_none());

    let mean = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Mean, None)?;
    assert_eq!(
        mean.out.to_vec::<f32>(),
        vec![2.0, 3.0, 0.0, 0.0, 17.0, 18.0]
    );
    assert_eq!(mean.dst_count.unwrap().to_vec::<i32>(), vec![1, 0, 2]);

    let min = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Min, None)?;
    assert_eq!(
        min.out.to_vec::<f32>(),
        vec![2.0, 3.0, 0.0, 0.0, 11.0, 12.0]
    );

    let max = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Max, None)?;
    assert_eq!(
        max.out.to_vec::<f32>(),
        vec![2.0, 3.0, 0.0, 0.0, 23.0, 24.0]
    );
    Ok(())
}

#[test]
fn mul_sum_pooling() -> Result<()> {
    let (device, client) = setup();
    let (x, e, src, dst) = fixture(&device);

    let r = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Mul, PoolOp::Sum, None)?;
    assert_eq!(
        r.out.to_vec::<f32>(),
        vec![1.0, 2.0, 0.0, 0.0, 70.0, 100.0]
    );
    Ok(())
}

#[test]
fn scalar_edge_features_broadcast() -> Result<()> {
    let (device, client) = setup();
    let x = tensor(&device, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let e = tensor(&device, &[2.0, 3.0], &[2, 1]);
    let src = index(&device, &[0, 1]);
    let dst = index(&device, &[1, 0]);

    let r = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Mul, PoolOp::Sum, None)?;
    assert_eq!(r.out.shape(), &[2, 3]);
    assert_eq!(
        r.out.to_vec::<f32>(),
        vec![12.0, 15.0, 18.0, 2.0, 4.0, 6.0]
    );
    Ok(())
}

#[test]
fn two_sided_feature_broadcast() -> Result<()> {
    let (device, client) = setup();
    // x features (2, 1) against e features (1, 3): output features (2, 3)
    let x = tensor(&device, &[1.0, 2.0, 3.0, 4.0], &[2, 2, 1]);
    let e = tensor(&device, &[10.0, 20.0, 30.0, 40.0, 50.0, 60.0], &[2, 1, 3]);
    let src = index(&device, &[0, 1]);
    let dst = index(&device, &[1, 1]);

    let r = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Sum, None)?;
    assert_eq!(r.out.shape(), &[2, 2, 3]);
    assert_eq!(
        r.out.to_vec::<f32>(),
        vec![
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, // node 0: no incoming edges
            54.0, 74.0, 94.0, 56.0, 76.0, 96.0,
        ]
    );
    Ok(())
}

#[test]
fn empty_edge_set_gives_zeros() -> Result<()> {
    let (device, client) = setup();
    let x = tensor(&device, &[1.0, 2.0], &[2, 1]);
    let e = tensor(&device, &[], &[0, 1]);
    let src = index(&device, &[]);
    let dst = index(&device, &[]);

    let r = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Mean, None)?;
    assert_eq!(r.out.to_vec::<f32>(), vec![0.0, 0.0]);
    assert_eq!(r.dst_count.unwrap().to_vec::<i32>(), vec![0, 0]);
    Ok(())
}

#[test]
fn n_out_override() -> Result<()> {
    let (device, client) = setup();
    let x = tensor(&device, &[1.0, 2.0], &[2, 1]);
    let e = tensor(&device, &[10.0], &[1, 1]);

    let r = client.send_ue_recv(
        &x,
        &e,
        &index(&device, &[1]),
        &index(&device, &[4]),
        ComputeOp::Add,
        PoolOp::Sum,
        Some(5),
    )?;
    assert_eq!(r.out.shape(), &[5, 1]);
    assert_eq!(r.out.to_vec::<f32>(), vec![0.0, 0.0, 0.0, 0.0, 12.0]);
    Ok(())
}

// ===== Backward =====

#[test]
fn sum_add_backward() -> Result<()> {
    let (device, client) = setup();
    let (x, e, src, dst) = fixture(&device);

    let fwd = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Sum, None)?;
    let g = tensor(&device, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);

    let (x_grad, e_grad) = client.send_ue_recv_grad(
        &x, &e, &src, &dst, &fwd.out, None, &g, ComputeOp::Add, PoolOp::Sum,
    )?;
    // Each edge routes the destination's gradient to its source and itself
    assert_eq!(x_grad.to_vec::<f32>(), vec![6.0, 8.0, 5.0, 6.0, 0.0, 0.0]);
    assert_eq!(e_grad.to_vec::<f32>(), vec![5.0, 6.0, 5.0, 6.0, 1.0, 2.0]);
    Ok(())
}

#[test]
fn sum_mul_backward() -> Result<()> {
    let (device, client) = setup();
    let (x, e, src, dst) = fixture(&device);

    let fwd = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Mul, PoolOp::Sum, None)?;
    let g = tensor(&device, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);

    let (x_grad, e_grad) = client.send_ue_recv_grad(
        &x, &e, &src, &dst, &fwd.out, None, &g, ComputeOp::Mul, PoolOp::Sum,
    )?;
    // d/dx = g * e, d/de = g * x
    assert_eq!(
        x_grad.to_vec::<f32>(),
        vec![51.0, 62.0, 100.0, 120.0, 0.0, 0.0]
    );
    assert_eq!(
        e_grad.to_vec::<f32>(),
        vec![5.0, 12.0, 15.0, 24.0, 1.0, 4.0]
    );
    Ok(())
}

#[test]
fn mean_backward_scales_by_degree() -> Result<()> {
    let (device, client) = setup();
    let (x, e, src, dst) = fixture(&device);

    let fwd = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Mean, None)?;
    let g = tensor(&device, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);

    let (x_grad, e_grad) = client.send_ue_recv_grad(
        &x,
        &e,
        &src,
        &dst,
        &fwd.out,
        fwd.dst_count.as_ref(),
        &g,
        ComputeOp::Add,
        PoolOp::Mean,
    )?;
    assert_eq!(x_grad.to_vec::<f32>(), vec![3.5, 5.0, 2.5, 3.0, 0.0, 0.0]);
    assert_eq!(e_grad.to_vec::<f32>(), vec![2.5, 3.0, 2.5, 3.0, 1.0, 2.0]);
    Ok(())
}

#[test]
fn mul_mean_backward_scales_by_degree() -> Result<()> {
    let (device, client) = setup();
    let (x, e, src, dst) = fixture(&device);

    let fwd = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Mul, PoolOp::Mean, None)?;
    assert_eq!(
        fwd.out.to_vec::<f32>(),
        vec![1.0, 2.0, 0.0, 0.0, 35.0, 50.0]
    );

    let g = tensor(&device, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);
    let (x_grad, e_grad) = client.send_ue_recv_grad(
        &x,
        &e,
        &src,
        &dst,
        &fwd.out,
        fwd.dst_count.as_ref(),
        &g,
        ComputeOp::Mul,
        PoolOp::Mean,
    )?;
    // Degree-scaled gradient times the other operand
    assert_eq!(
        x_grad.to_vec::<f32>(),
        vec![26.0, 32.0, 50.0, 60.0, 0.0, 0.0]
    );
    assert_eq!(
        e_grad.to_vec::<f32>(),
        vec![2.5, 6.0, 7.5, 12.0, 1.0, 4.0]
    );
    Ok(())
}

#[test]
fn mul_min_backward_masks_per_coordinate() -> Result<()> {
    let (device, client) = setup();
    let (x, e, src, dst) = fixture(&device);

    let fwd = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Mul, PoolOp::Min, None)?;
    assert_eq!(
        fwd.out.to_vec::<f32>(),
        vec![1.0, 2.0, 0.0, 0.0, 10.0, 20.0]
    );

    let g = tensor(&device, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);
    let (x_grad, e_grad) = client.send_ue_recv_grad(
        &x, &e, &src, &dst, &fwd.out, None, &g, ComputeOp::Mul, PoolOp::Min,
    )?;
    // Node 0's edges achieve both minima; node 1's edge is masked out
    assert_eq!(
        x_grad.to_vec::<f32>(),
        vec![51.0, 62.0, 0.0, 0.0, 0.0, 0.0]
    );
    assert_eq!(
        e_grad.to_vec::<f32>(),
        vec![5.0, 12.0, 0.0, 0.0, 1.0, 4.0]
    );
    Ok(())
}

#[test]
fn mul_max_backward_masks_per_coordinate() -> Result<()> {
    let (device, client) = setup();
    let (x, e, src, dst) = fixture(&device);

    let fwd = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Mul, PoolOp::Max, None)?;
    assert_eq!(
        fwd.out.to_vec::<f32>(),
        vec![1.0, 2.0, 0.0, 0.0, 60.0, 80.0]
    );

    let g = tensor(&device, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);
    let (x_grad, e_grad) = client.send_ue_recv_grad(
        &x, &e, &src, &dst, &fwd.out, None, &g, ComputeOp::Mul, PoolOp::Max,
    )?;
    assert_eq!(
        x_grad.to_vec::<f32>(),
        vec![1.0, 2.0, 100.0, 120.0, 0.0, 0.0]
    );
    assert_eq!(
        e_grad.to_vec::<f32>(),
        vec![0.0, 0.0, 15.0, 24.0, 1.0, 4.0]
    );
    Ok(())
}

#[test]
fn min_mul_with_broadcast_edge_scalars() -> Result<()> {
    let (device, client) = setup();
    // Scalar edge weights against 3-wide node features; both edges land on
    // node 0 and the last coordinate ties exactly (3*2 == 6*1).
    let x = tensor(&device, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let e = tensor(&device, &[2.0, 1.0], &[2, 1]);
    let src = index(&device, &[0, 1]);
    let dst = index(&device, &[0, 0]);

    let fwd = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Mul, PoolOp::Min, None)?;
    assert_eq!(
        fwd.out.to_vec::<f32>(),
        vec![2.0, 4.0, 6.0, 0.0, 0.0, 0.0]
    );

    let g = tensor(&device, &[1.0, 1.0, 1.0, 9.0, 9.0, 9.0], &[2, 3]);
    let (x_grad, e_grad) = client.send_ue_recv_grad(
        &x, &e, &src, &dst, &fwd.out, None, &g, ComputeOp::Mul, PoolOp::Min,
    )?;
    // Tied coordinates send gradient through both edges; the scalar edge
    // gradient sums over the coordinates that edge achieved
    assert_eq!(
        x_grad.to_vec::<f32>(),
        vec![2.0, 2.0, 2.0, 0.0, 0.0, 1.0]
    );
    assert_eq!(e_grad.to_vec::<f32>(), vec![6.0, 6.0]);
    Ok(())
}

#[test]
fn mean_backward_requires_degree_tensor() -> Result<()> {
    let (device, client) = setup();
    let (x, e, src, dst) = fixture(&device);
    let fwd = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Mean, None)?;
    let g = tensor(&device, &[0.0; 6], &[3, 2]);

    assert!(matches!(
        client.send_ue_recv_grad(
            &x, &e, &src, &dst, &fwd.out, None, &g, ComputeOp::Add, PoolOp::Mean,
        ),
        Err(Error::InvalidArgument { .. })
    ));
    Ok(())
}

#[test]
fn min_backward_gradient_flows_to_all_tied_edges() -> Result<()> {
    let (device, client) = setup();
    let x = tensor(&device, &[5.0, 5.0], &[2, 1]);
    let e = tensor(&device, &[0.0, 0.0], &[2, 1]);
    let src = index(&device, &[0, 1]);
    let dst = index(&device, &[0, 0]);

    let fwd = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Min, None)?;
    let g = tensor(&device, &[3.0, 7.0], &[2, 1]);

    let (x_grad, e_grad) = client.send_ue_recv_grad(
        &x, &e, &src, &dst, &fwd.out, None, &g, ComputeOp::Add, PoolOp::Min,
    )?;
    assert_eq!(x_grad.to_vec::<f32>(), vec![3.0, 3.0]);
    assert_eq!(e_grad.to_vec::<f32>(), vec![3.0, 3.0]);
    Ok(())
}

#[test]
fn max_backward_masks_non_extremal_edges() -> Result<()> {
    let (device, client) = setup();
    let x = tensor(&device, &[1.0, 4.0], &[2, 1]);
    let e = tensor(&device, &[0.0, 0.0], &[2, 1]);
    let src = index(&device, &[0, 1]);
    let dst = index(&device, &[0, 0]);

    let fwd = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Max, None)?;
    assert_eq!(fwd.out.to_vec::<f32>(), vec![4.0, 0.0]);

    let g = tensor(&device, &[2.0, 9.0], &[2, 1]);
    let (x_grad, e_grad) = client.send_ue_recv_grad(
        &x, &e, &src, &dst, &fwd.out, None, &g, ComputeOp::Add, PoolOp::Max,
    )?;
    // Only the edge that achieved the maximum receives gradient
    assert_eq!(x_grad.to_vec::<f32>(), vec![0.0, 2.0]);
    assert_eq!(e_grad.to_vec::<f32>(), vec![0.0, 2.0]);
    Ok(())
}

#[test]
fn backward_reduces_broadcast_axes() -> Result<()> {
    let (device, client) = setup();
    let x = tensor(&device, &[1.0, 2.0, 3.0, 4.0], &[2, 2, 1]);
    let e = tensor(&device, &[10.0, 20.0, 30.0, 40.0, 50.0, 60.0], &[2, 1, 3]);
    let src = index(&device, &[0, 1]);
    let dst = index(&device, &[1, 1]);

    let fwd = client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Sum, None)?;
    let g = tensor(
        &device,
        &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
        &[2, 2, 3],
    );

    let (x_grad, e_grad) = client.send_ue_recv_grad(
        &x, &e, &src, &dst, &fwd.out, None, &g, ComputeOp::Add, PoolOp::Sum,
    )?;
    // Gradients of expanded axes fold back onto the operand shapes
    assert_eq!(x_grad.shape(), &[2, 2, 1]);
    assert_eq!(x_grad.to_vec::<f32>(), vec![3.0, 3.0, 3.0, 3.0]);
    assert_eq!(e_grad.shape(), &[2, 1, 3]);
    assert_eq!(e_grad.to_vec::<f32>(), vec![2.0, 2.0, 2.0, 2.0, 2.0, 2.0]);
    Ok(())
}

// ===== Validation =====

#[test]
fn mismatched_operands_rejected() -> Result<()> {
    let (device, client) = setup();
    let x = tensor(&device, &[1.0, 2.0], &[2, 1]);
    let src = index(&device, &[0]);
    let dst = index(&device, &[1]);

    // Edge feature dtype must match node features
    let e64 = Tensor::<CpuRuntime>::from_slice(&[1.0f64], &[1, 1], &device);
    assert!(matches!(
        client.send_ue_recv(&x, &e64, &src, &dst, ComputeOp::Add, PoolOp::Sum, None),
        Err(Error::DTypeMismatch { .. })
    ));

    // Edge count must match the index length
    let e = tensor(&device, &[1.0, 2.0], &[2, 1]);
    assert!(matches!(
        client.send_ue_recv(&x, &e, &src, &dst, ComputeOp::Add, PoolOp::Sum, None),
        Err(Error::ShapeMismatch { .. })
    ));

    // Incompatible feature shapes cannot broadcast
    let x3 = tensor(&device, &[1.0; 6], &[2, 3]);
    let e2 = tensor(&device, &[1.0, 1.0], &[1, 2]);
    assert!(client
        .send_ue_recv(&x3, &e2, &src, &dst, ComputeOp::Add, PoolOp::Sum, None)
        .is_err());
    Ok(())
}
