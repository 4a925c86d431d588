use anyhow::Result;
use attention::{AttentionError, Config, MultiHeadAttention};
use candle_core::{DType, Device, Tensor};

const TOL: f32 = 1e-5;

fn inputs(batch: usize, q_len: usize, k_len: usize, dim: usize) -> Result<(Tensor, Tensor)> {
    let device = Device::Cpu;
    let queries = Tensor::randn(0f32, 1.0, (batch, q_len, dim), &device)?;
    let keys = Tensor::randn(0f32, 1.0, (batch, k_len, dim), &device)?;
    Ok((queries, keys))
}

/// `weights[b][h][q][k]`
fn weights_4d(weights: &Tensor) -> Result<Vec<Vec<Vec<Vec<f32>>>>> {
    let (batch, ..) = weights.dims4()?;
    (0..batch)
        .map(|b| Ok(weights.get(b)?.to_vec3::<f32>()?))
        .collect()
}

#[test]
fn output_has_query_shape() -> Result<()> {
    let module = MultiHeadAttention::new(Config::new(4))?;
    let (queries, keys) = inputs(3, 5, 7, 16)?;
    let out = module.forward_with_weights(&queries, &keys, &[5, 2, 0], &[7, 3, 1], None)?;
    assert_eq!(out.context.dims(), &[3, 5, 16]);
    assert_eq!(out.weights.dims(), &[3, 4, 5, 7]);
    Ok(())
}

#[test]
fn padded_query_rows_are_zero() -> Result<()> {
    let module = MultiHeadAttention::new(Config::new(2))?;
    let (queries, keys) = inputs(2, 4, 4, 8)?;
    let queries_len = [2usize, 4];
    let out = module.forward_with_weights(&queries, &keys, &queries_len, &[4, 3], None)?;

    for (b, per_batch) in weights_4d(&out.weights)?.iter().enumerate() {
        for per_head in per_batch {
            for (q, row) in per_head.iter().enumerate() {
                let mass: f32 = row.iter().sum();
                if q >= queries_len[b] {
                    assert!(row.iter().all(|w| *w == 0.0), "b={b} q={q} row={row:?}");
                } else {
                    assert!((mass - 1.0).abs() < TOL, "b={b} q={q} mass={mass}");
                }
            }
        }
    }
    Ok(())
}

#[test]
fn padded_keys_receive_no_weight() -> Result<()> {
    let module = MultiHeadAttention::new(Config::new(4))?;
    let (queries, keys) = inputs(3, 3, 6, 8)?;
    let keys_len = [1usize, 4, 6];
    let out = module.forward_with_weights(&queries, &keys, &[3, 3, 3], &keys_len, None)?;

    for (b, per_batch) in weights_4d(&out.weights)?.iter().enumerate() {
        for per_head in per_batch {
            for row in per_head {
                let padded: f32 = row[keys_len[b]..].iter().sum();
                assert!(padded < TOL, "b={b} leaked {padded}");
            }
        }
    }
    Ok(())
}

#[test]
fn causal_masking_hides_future_keys() -> Result<()> {
    let module = MultiHeadAttention::new(Config::new(2).with_causal(true))?;
    let (queries, keys) = inputs(2, 5, 5, 6)?;
    let out = module.forward_with_weights(&queries, &keys, &[5, 5], &[5, 5], None)?;

    for per_batch in weights_4d(&out.weights)? {
        for per_head in per_batch {
            for (i, row) in per_head.iter().enumerate() {
                let future: f32 = row[i + 1..].iter().sum();
                assert!(future < TOL, "query {i} leaked {future} to the future");
                let mass: f32 = row.iter().sum();
                assert!((mass - 1.0).abs() < TOL);
            }
            // The first query can only see the first key.
            assert!((per_head[0][0] - 1.0).abs() < TOL);
        }
    }
    Ok(())
}

#[test]
fn causal_and_padding_masks_combine() -> Result<()> {
    let module = MultiHeadAttention::new(Config::new(1).with_causal(true))?;
    let (queries, keys) = inputs(1, 4, 4, 4)?;
    let out = module.forward_with_weights(&queries, &keys, &[3], &[2], None)?;
    let weights = weights_4d(&out.weights)?;
    let rows = &weights[0][0];

    // Query 3 is padding.
    assert!(rows[3].iter().all(|w| *w == 0.0));
    // Query 2 sees keys 0..=2 causally, but key 2 is padding.
    assert!(rows[2][2] < TOL && rows[2][3] < TOL);
    assert!((rows[2][0] + rows[2][1] - 1.0).abs() < TOL);
    Ok(())
}

#[test]
fn unpadded_rows_sum_to_one() -> Result<()> {
    let module = MultiHeadAttention::new(Config::new(4))?;
    let (queries, keys) = inputs(2, 6, 9, 12)?;
    let out = module.forward_with_weights(&queries, &keys, &[6, 6], &[9, 9], None)?;
    let sums = out.weights.sum(3)?.flatten_all()?.to_vec1::<f32>()?;
    assert!(sums.iter().all(|s| (s - 1.0).abs() < TOL));
    Ok(())
}

#[test]
fn repeated_calls_without_dropout_are_bit_identical() -> Result<()> {
    let module = MultiHeadAttention::new(Config::new(2).with_causal(true))?;
    let (queries, keys) = inputs(2, 4, 4, 8)?;
    let first = module.forward(&queries, &keys, &[4, 2], &[3, 4], None)?;
    let second = module.forward(&queries, &keys, &[4, 2], &[3, 4], None)?;
    assert_eq!(first.to_vec3::<f32>()?, second.to_vec3::<f32>()?);
    Ok(())
}

#[test]
fn values_default_to_keys() -> Result<()> {
    let module = MultiHeadAttention::new(Config::new(2))?;
    let (queries, keys) = inputs(1, 3, 5, 4)?;
    let implicit = module.forward(&queries, &keys, &[3], &[4], None)?;
    let explicit = module.forward(&queries, &keys, &[3], &[4], Some(&keys))?;
    assert_eq!(implicit.to_vec3::<f32>()?, explicit.to_vec3::<f32>()?);

    let values = Tensor::randn(0f32, 1.0, (1, 5, 4), &Device::Cpu)?;
    let distinct = module.forward(&queries, &keys, &[3], &[4], Some(&values))?;
    assert_ne!(implicit.to_vec3::<f32>()?, distinct.to_vec3::<f32>()?);
    Ok(())
}

#[test]
fn non_divisible_head_count_fails_at_call_time() -> Result<()> {
    let module = MultiHeadAttention::new(Config::new(3))?;
    let (queries, keys) = inputs(1, 2, 2, 8)?;
    let err = module.forward(&queries, &keys, &[2], &[2], None).unwrap_err();
    assert!(matches!(err, AttentionError::InvalidShape { .. }), "{err}");
    assert!(module.parameters().is_none());
    Ok(())
}

#[test]
fn zero_length_sequences_do_not_produce_nan() -> Result<()> {
    let module = MultiHeadAttention::new(Config::new(2))?;
    let (queries, keys) = inputs(2, 3, 3, 4)?;
    let out = module.forward_with_weights(&queries, &keys, &[0, 3], &[3, 0], None)?;
    let values = out.context.flatten_all()?.to_vec1::<f32>()?;
    assert!(values.iter().all(|v| v.is_finite()));

    let weights = weights_4d(&out.weights)?;
    // Batch 0 has no valid queries: every row is zeroed.
    assert!(weights[0].iter().flatten().flatten().all(|w| *w == 0.0));
    // Batch 1 has no valid keys: rows soften to uniform.
    for row in weights[1].iter().flatten() {
        assert!(row.iter().all(|w| (w - 1.0 / 3.0).abs() < 1e-3));
    }
    Ok(())
}

#[test]
fn seeded_dropout_is_reproducible_and_disabled_in_eval() -> Result<()> {
    let (queries, keys) = inputs(1, 4, 4, 8)?;
    let reference = MultiHeadAttention::new(Config::new(2))?;
    reference.forward(&queries, &keys, &[4], &[4], None)?;
    let params = reference.parameters().cloned().expect("initialised");

    let dropped_weights = || -> Result<Vec<f32>> {
        let config = Config::new(2).with_dropout(0.5).with_seed(99);
        let module = MultiHeadAttention::with_parameters(config, params.clone())?;
        let out = module.forward_with_weights(&queries, &keys, &[4], &[4], None)?;
        Ok(out.weights.flatten_all()?.to_vec1::<f32>()?)
    };
    let first = dropped_weights()?;
    assert_eq!(first, dropped_weights()?);
    assert!(first.iter().any(|w| *w == 0.0));

    let module = MultiHeadAttention::with_parameters(Config::new(2).with_dropout(0.5), params)?;
    module.set_training(false);
    assert!(!module.is_training());
    let eval = module.forward(&queries, &keys, &[4], &[4], None)?;
    let expected = reference.forward(&queries, &keys, &[4], &[4], None)?;
    assert_eq!(eval.to_vec3::<f32>()?, expected.to_vec3::<f32>()?);
    Ok(())
}

#[test]
fn half_precision_inputs_keep_their_dtype() -> Result<()> {
    let module = MultiHeadAttention::new(Config::new(2))?;
    let (queries, keys) = inputs(1, 3, 3, 8)?;
    let out = module.forward_with_weights(
        &queries.to_dtype(DType::BF16)?,
        &keys.to_dtype(DType::BF16)?,
        &[3],
        &[2],
        None,
    )?;
    assert_eq!(out.context.dtype(), DType::BF16);
    assert_eq!(out.weights.dtype(), DType::F32);
    Ok(())
}

#[test]
fn lengths_can_come_from_tensors() -> Result<()> {
    let device = Device::Cpu;
    let lengths = Tensor::new(&[2u32, 3], &device)?;
    let lengths = attention::masks::lengths_from_tensor(&lengths)?;
    let module = MultiHeadAttention::new(Config::new(1))?;
    let (queries, keys) = inputs(2, 3, 3, 2)?;
    let out = module.forward(&queries, &keys, &lengths, &lengths, None)?;
    assert_eq!(out.dims(), &[2, 3, 2]);
    Ok(())
}
