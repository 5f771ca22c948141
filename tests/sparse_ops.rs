//! Integration tests for sparse formats, conversions, and BLAS primitives

use sparsr::prelude::*;

fn setup() -> (<CpuRuntime as Runtime>::Device, <CpuRuntime as Runtime>::Client) {
    let device = CpuRuntime::default_device();
    let client = CpuRuntime::default_client(&device);
    (device, client)
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() < 1e-5,
            "element {i}: got {a}, expected {e}"
        );
    }
}

/// Row-major dense reference matmul
fn dense_matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        for p in 0..k {
            for j in 0..n {
                c[i * n + j] += a[i * k + p] * b[p * n + j];
            }
        }
    }
    c
}

// ===== Conversions =====

#[test]
fn dense_coo_round_trip() -> Result<()> {
    let (device, client) = setup();
    let data = [0.0f32, 1.5, 0.0, 0.0, -2.0, 0.0, 0.0, 0.0, 3.0];
    let dense = Tensor::<CpuRuntime>::from_slice(&data, &[3, 3], &device);

    let coo = CooData::from_dense(&client, &dense, 2)?;
    assert_eq!(coo.nnz(), 3);
    assert!(coo.is_coalesced());

    let back = coo.to_dense(&client)?;
    assert_close(&back.to_vec::<f32>(), &data);
    Ok(())
}

#[test]
fn coo_to_csr_sums_duplicates() -> Result<()> {
    let (device, client) = setup();
    // Entry (0, 1) appears twice; CSR construction must merge them.
    let coo = CooData::<CpuRuntime>::from_slices(
        &[0, 1, 0, 1, 0, 1],
        &[2.0f32, 5.0, 3.0],
        &[2, 2],
        2,
        &device,
    )?;
    assert!(!coo.is_coalesced());

    let csr = coo.to_csr(&client)?;
    assert_eq!(csr.nnz(), 2);
    assert_eq!(csr.crows.to_vec::<i64>(), vec![0, 1, 2]);
    assert_eq!(csr.cols.to_vec::<i64>(), vec![1, 0]);
    assert_close(&csr.values.to_vec::<f32>(), &[5.0, 5.0]);
    Ok(())
}

#[test]
fn coalesce_is_idempotent() -> Result<()> {
    let (device, client) = setup();
    let coo = CooData::<CpuRuntime>::from_slices(
        &[1, 0, 1, 0, 1, 0],
        &[1.0f32, 2.0, 3.0],
        &[2, 2],
        2,
        &device,
    )?;

    let c1 = coo.coalesce(&client)?;
    assert!(c1.is_coalesced());
    assert_eq!(c1.nnz(), 2);
    assert_close(&c1.values.to_vec::<f32>(), &[2.0, 4.0]);

    // Already coalesced: shares storage instead of copying
    let c2 = c1.coalesce(&client)?;
    assert_eq!(c2.nnz(), 2);
    assert_eq!(c1.values.id(), c2.values.id());
    Ok(())
}

#[test]
fn csr_coo_round_trip() -> Result<()> {
    let (device, client) = setup();
    let csr = CsrData::<CpuRuntime>::from_slices(
        &[0, 2, 3],
        &[0, 2, 1],
        &[1.0f32, 2.0, 3.0],
        &[2, 3],
        &device,
    )?;

    let coo = csr.to_coo(&client)?;
    assert!(coo.is_coalesced());
    assert_eq!(coo.indices.to_vec::<i64>(), vec![0, 0, 1, 0, 2, 1]);

    let back = coo.to_csr(&client)?;
    assert_eq!(back.crows.to_vec::<i64>(), vec![0, 2, 3]);
    assert_eq!(back.cols.to_vec::<i64>(), vec![0, 2, 1]);
    Ok(())
}

#[test]
fn batched_csr_round_trip_through_dense() -> Result<()> {
    let (device, client) = setup();
    let data = [
        1.0f32, 0.0, 0.0, 2.0, // batch 0
        0.0, 3.0, 4.0, 0.0, // batch 1
    ];
    let dense = Tensor::<CpuRuntime>::from_slice(&data, &[2, 2, 2], &device);

    let csr = CooData::from_dense(&client, &dense, 3)?.to_csr(&client)?;
    assert_eq!(csr.batch_count(), 2);
    assert_eq!(csr.batch_nnz(), 2);
    assert_eq!(csr.crows.to_vec::<i64>(), vec![0, 1, 2, 0, 1, 2]);

    let back = csr.to_dense(&client)?;
    assert_close(&back.to_vec::<f32>(), &data);
    Ok(())
}

#[test]
fn ragged_batch_rejected() -> Result<()> {
    let (device, client) = setup();
    // Batch 0 has 2 entries, batch 1 has 1
    let coo = CooData::<CpuRuntime>::from_slices(
        &[0, 0, 1, 0, 1, 0, 0, 1, 0],
        &[1.0f32, 2.0, 3.0],
        &[2, 2, 2],
        3,
        &device,
    )?;
    assert!(matches!(
        coo.to_csr(&client),
        Err(Error::InvalidArgument { .. })
    ));
    Ok(())
}

#[test]
fn csr_with_dense_dims_rejected() -> Result<()> {
    let (device, client) = setup();
    // sparse_dim 1 of rank 2: one trailing dense dim
    let coo = CooData::<CpuRuntime>::from_slices(
        &[0, 2],
        &[1.0f32, 2.0, 3.0, 4.0],
        &[3, 2],
        1,
        &device,
    )?;
    assert!(matches!(
        coo.to_csr(&client),
        Err(Error::InvalidArgument { .. })
    ));
    Ok(())
}

// ===== SpMM =====

#[test]
fn spmm_matches_dense_reference() -> Result<()> {
    let (device, client) = setup();
    let a_dense = [1.0f32, 0.0, 2.0, 0.0, 0.0, 3.0, 0.0, 4.0, 0.0, 0.0, 5.0, 0.0];
    let b_data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];

    let a = Tensor::<CpuRuntime>::from_slice(&a_dense, &[3, 4], &device);
    let b = Tensor::<CpuRuntime>::from_slice(&b_data, &[4, 2], &device);
    let csr = CooData::from_dense(&client, &a, 2)?.to_csr(&client)?;

    let y = csr.spmm(&client, &b, &BlasParams::new().alpha(2.0))?;
    let mut expected = dense_matmul(&a_dense, &b_data, 3, 4, 2);
    expected.iter_mut().for_each(|v| *v *= 2.0);
    assert_close(&y.to_vec::<f32>(), &expected);
    Ok(())
}

#[test]
fn spmm_transposes() -> Result<()> {
    let (device, client) = setup();
    let a_dense = [1.0f32, 2.0, 0.0, 0.0, 0.0, 3.0];
    let a = Tensor::<CpuRuntime>::from_slice(&a_dense, &[2, 3], &device);
    let csr = CooData::from_dense(&client, &a, 2)?.to_csr(&client)?;

    // op(A) = A^T (3x2), B raw is (4, 2) transposed to (2, 4)
    let b_data = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let b = Tensor::<CpuRuntime>::from_slice(&b_data, &[4, 2], &device);

    let y = csr.spmm(&client, &b, &BlasParams::new().trans_a(true).trans_b(true))?;
    assert_eq!(y.shape(), &[3, 4]);

    let at = [1.0f32, 0.0, 2.0, 0.0, 0.0, 3.0];
    let bt = [1.0f32, 3.0, 5.0, 7.0, 2.0, 4.0, 6.0, 8.0];
    let expected = dense_matmul(&at, &bt, 3, 2, 4);
    assert_close(&y.to_vec::<f32>(), &expected);
    Ok(())
}

#[test]
fn spmm_into_accumulates_with_beta() -> Result<()> {
    let (device, client) = setup();
    let csr = CsrData::<CpuRuntime>::from_slices(
        &[0, 1, 2],
        &[0, 1],
        &[2.0f32, 3.0],
        &[2, 2],
        &device,
    )?;
    let b = Tensor::<CpuRuntime>::from_slice(&[1.0f32, 1.0, 1.0, 1.0], &[2, 2], &device);
    let mut y = Tensor::<CpuRuntime>::from_slice(&[10.0f32, 10.0, 10.0, 10.0], &[2, 2], &device);

    csr.spmm_into(&client, &b, &mut y, &BlasParams::new().beta(0.5))?;
    // y = 1.0 * diag(2,3) * ones + 0.5 * 10
    assert_close(&y.to_vec::<f32>(), &[7.0, 7.0, 8.0, 8.0]);
    Ok(())
}

#[test]
fn spmm_rejects_beta_without_output() -> Result<()> {
    let (device, client) = setup();
    let csr =
        CsrData::<CpuRuntime>::from_slices(&[0, 1], &[0], &[1.0f32], &[1, 1], &device)?;
    let b = Tensor::<CpuRuntime>::from_slice(&[1.0f32], &[1, 1], &device);
    assert!(matches!(
        csr.spmm(&client, &b, &BlasParams::new().beta(1.0)),
        Err(Error::InvalidArgument { .. })
    ));
    Ok(())
}

#[test]
fn batched_spmm_matches_per_batch() -> Result<()> {
    let (device, client) = setup();
    let a0 = [1.0f32, 0.0, 0.0, 2.0];
    let a1 = [0.0f32, 3.0, 4.0, 0.0];
    let b0 = [1.0f32, 2.0, 3.0, 4.0];
    let b1 = [5.0f32, 6.0, 7.0, 8.0];

    let a_batched: Vec<f32> = a0.iter().chain(a1.iter()).copied().collect();
    let b_batched: Vec<f32> = b0.iter().chain(b1.iter()).copied().collect();

    let a = Tensor::<CpuRuntime>::from_slice(&a_batched, &[2, 2, 2], &device);
    let b = Tensor::<CpuRuntime>::from_slice(&b_batched, &[2, 2, 2], &device);
    let csr = CooData::from_dense(&client, &a, 3)?.to_csr(&client)?;

    let y = csr.spmm(&client, &b, &BlasParams::new())?;
    assert_eq!(y.shape(), &[2, 2, 2]);

    let mut expected = dense_matmul(&a0, &b0, 2, 2, 2);
    expected.extend(dense_matmul(&a1, &b1, 2, 2, 2));
    assert_close(&y.to_vec::<f32>(), &expected);
    Ok(())
}

#[test]
fn coo_spmm_rank2_only() -> Result<()> {
    let (device, client) = setup();
    let coo = CooData::<CpuRuntime>::from_slices(
        &[0, 1, 1, 0],
        &[2.0f32, 3.0],
        &[2, 2],
        2,
        &device,
    )?;
    let b = Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0, 4.0], &[2, 2], &device);

    let y = coo.spmm(&client, &b, &BlasParams::new())?;
    assert_close(&y.to_vec::<f32>(), &[6.0, 8.0, 3.0, 6.0]);

    // Batched COO operands must go through CSR
    let batched = CooData::<CpuRuntime>::from_slices(
        &[0, 1, 0, 0, 0, 1],
        &[1.0f32, 2.0],
        &[2, 2, 2],
        3,
        &device,
    )?;
    let b3 = Tensor::<CpuRuntime>::from_slice(&[0.0f32; 8], &[2, 2, 2], &device);
    assert!(matches!(
        batched.spmm(&client, &b3, &BlasParams::new()),
        Err(Error::Unimplemented { .. })
    ));
    Ok(())
}

// ===== SpMV =====

#[test]
fn spmv_matches_spmm_column() -> Result<()> {
    let (device, client) = setup();
    let a_dense = [1.0f32, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0, 0.0, 5.0];
    let a = Tensor::<CpuRuntime>::from_slice(&a_dense, &[3, 3], &device);
    let csr = CooData::from_dense(&client, &a, 2)?.to_csr(&client)?;

    let x = Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0], &[3], &device);
    let y = csr.spmv(&client, &x, &BlasParams::new())?;
    assert_close(&y.to_vec::<f32>(), &[7.0, 6.0, 19.0]);

    let yt = csr.spmv(&client, &x, &BlasParams::new().trans_a(true))?;
    assert_close(&yt.to_vec::<f32>(), &[13.0, 6.0, 17.0]);
    Ok(())
}

#[test]
fn spmv_accumulates_with_beta() -> Result<()> {
    let (device, client) = setup();
    let csr = CsrData::<CpuRuntime>::from_slices(
        &[0, 1, 2],
        &[0, 1],
        &[2.0f32, 3.0],
        &[2, 2],
        &device,
    )?;
    let x = Tensor::<CpuRuntime>::from_slice(&[1.0f32, 1.0], &[2], &device);
    let mut y = Tensor::<CpuRuntime>::from_slice(&[100.0f32, 100.0], &[2], &device);

    csr.spmv_into(&client, &x, &mut y, &BlasParams::new().beta(0.01))?;
    assert_close(&y.to_vec::<f32>(), &[3.0, 4.0]);
    Ok(())
}

#[test]
fn spmv_rejects_batched_operand() -> Result<()> {
    let (device, client) = setup();
    let csr = CsrData::<CpuRuntime>::from_slices(
        &[0, 1, 1, 0, 0, 1],
        &[0, 1],
        &[1.0f32, 2.0],
        &[2, 2, 2],
        &device,
    )?;
    let x = Tensor::<CpuRuntime>::from_slice(&[1.0f32, 1.0], &[2], &device);
    assert!(matches!(
        csr.spmv(&client, &x, &BlasParams::new()),
        Err(Error::InvalidArgument { .. })
    ));
    Ok(())
}

// ===== SpGEMM =====

#[test]
fn spgemm_matches_dense_reference() -> Result<()> {
    let (device, client) = setup();
    let a_dense = [1.0f32, 0.0, 2.0, 0.0, 3.0, 0.0];
    let b_dense = [0.0f32, 4.0, 5.0, 0.0, 0.0, 6.0];

    let a = Tensor::<CpuRuntime>::from_slice(&a_dense, &[2, 3], &device);
    let b = Tensor::<CpuRuntime>::from_slice(&b_dense, &[3, 2], &device);
    let a_csr = CooData::from_dense(&client, &a, 2)?.to_csr(&client)?;
    let b_csr = CooData::from_dense(&client, &b, 2)?.to_csr(&client)?;

    let c = a_csr.matmul(&client, &b_csr, &BlasParams::new().alpha(3.0))?;
    assert_eq!(c.shape(), &[2, 2]);

    let c_dense = c.to_dense(&client)?;
    let mut expected = dense_matmul(&a_dense, &b_dense, 2, 3, 2);
    expected.iter_mut().for_each(|v| *v *= 3.0);
    assert_close(&c_dense.to_vec::<f32>(), &expected);
    Ok(())
}

#[test]
fn spgemm_filters_cancelled_entries() -> Result<()> {
    let (device, client) = setup();
    // A = [1, -1], B columns identical: products cancel exactly
    let a_csr = CsrData::<CpuRuntime>::from_slices(
        &[0, 2],
        &[0, 1],
        &[1.0f32, -1.0],
        &[1, 2],
        &device,
    )?;
    let b_csr = CsrData::<CpuRuntime>::from_slices(
        &[0, 1, 2],
        &[0, 0],
        &[7.0f32, 7.0],
        &[2, 1],
        &device,
    )?;

    let c = a_csr.matmul(&client, &b_csr, &BlasParams::new())?;
    assert_eq!(c.nnz(), 0);
    assert_eq!(c.crows.to_vec::<i64>(), vec![0, 0]);
    Ok(())
}

#[test]
fn spgemm_rejects_beta_and_transpose() -> Result<()> {
    let (device, client) = setup();
    let a =
        CsrData::<CpuRuntime>::from_slices(&[0, 1], &[0], &[1.0f32], &[1, 1], &device)?;
    assert!(matches!(
        a.matmul(&client, &a, &BlasParams::new().beta(1.0)),
        Err(Error::Unimplemented { .. })
    ));
    assert!(matches!(
        a.matmul(&client, &a, &BlasParams::new().trans_a(true)),
        Err(Error::Unimplemented { .. })
    ));
    Ok(())
}

// ===== SDDMM =====

#[test]
fn sddmm_samples_dense_product() -> Result<()> {
    let (device, client) = setup();
    let a_data = [1.0f32, 2.0, 3.0, 4.0];
    let b_data = [5.0f32, 6.0, 7.0, 8.0];
    let a = Tensor::<CpuRuntime>::from_slice(&a_data, &[2, 2], &device);
    let b = Tensor::<CpuRuntime>::from_slice(&b_data, &[2, 2], &device);

    // Mask keeps (0,1) and (1,0); seed values scaled by beta
    let mask = CsrData::<CpuRuntime>::from_slices(
        &[0, 1, 2],
        &[1, 0],
        &[10.0f32, 20.0],
        &[2, 2],
        &device,
    )?;

    let c = mask.sddmm(&client, &a, &b, &BlasParams::new().beta(0.5))?;
    let full = dense_matmul(&a_data, &b_data, 2, 2, 2);
    assert_close(
        &c.values.to_vec::<f32>(),
        &[full[1] + 5.0, full[2] + 10.0],
    );
    // Structure is inherited from the mask
    assert_eq!(c.cols.to_vec::<i64>(), vec![1, 0]);
    Ok(())
}

#[test]
fn sddmm_with_transposed_operand() -> Result<()> {
    let (device, client) = setup();
    // op(A) = A^T = [[1, 3], [2, 4]]
    let a = Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0, 4.0], &[2, 2], &device);
    let b = Tensor::<CpuRuntime>::from_slice(&[5.0f32, 6.0, 7.0, 8.0], &[2, 2], &device);
    let mask = CsrData::<CpuRuntime>::from_slices(
        &[0, 1, 2],
        &[1, 0],
        &[0.0f32, 0.0],
        &[2, 2],
        &device,
    )?;

    let c = mask.sddmm(&client, &a, &b, &BlasParams::new().trans_a(true))?;
    // A^T·B = [[26, 30], [38, 44]], sampled at (0,1) and (1,0)
    assert_close(&c.values.to_vec::<f32>(), &[30.0, 38.0]);
    Ok(())
}

// ===== Validation =====

#[test]
fn mismatched_operands_rejected() -> Result<()> {
    let (device, client) = setup();
    let csr = CsrData::<CpuRuntime>::from_slices(
        &[0, 1, 2],
        &[0, 1],
        &[1.0f32, 2.0],
        &[2, 2],
        &device,
    )?;

    // Wrong dtype
    let b64 = Tensor::<CpuRuntime>::from_slice(&[1.0f64; 4], &[2, 2], &device);
    assert!(matches!(
        csr.spmm(&client, &b64, &BlasParams::new()),
        Err(Error::DTypeMismatch { .. })
    ));

    // Inner dimension mismatch
    let b_bad = Tensor::<CpuRuntime>::from_slice(&[1.0f32; 6], &[3, 2], &device);
    assert!(matches!(
        csr.spmm(&client, &b_bad, &BlasParams::new()),
        Err(Error::ShapeMismatch { .. })
    ));
    Ok(())
}
