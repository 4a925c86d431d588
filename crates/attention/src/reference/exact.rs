//! Reference scaled dot-product attention kernel.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`Attention`](crate::core::Attention) trait.

use std::sync::OnceLock;

use candle_core::Tensor;
use candle_nn::ops::softmax_last_dim;
use layers::{checks, Dropout, PrecisionPolicy};

use crate::core::{Attention, AttentionError, AttentionMasks, AttentionOutput};

/// Portable attention kernel built from Candle matmul and softmax.
#[derive(Debug, Default)]
pub struct ExactAttention {
    first_call: OnceLock<()>,
}

impl ExactAttention {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expect_broadcastable(
    label: &str,
    mask: &Tensor,
    target: [usize; 4],
) -> Result<(), AttentionError> {
    let dims = mask.dims();
    let fits = dims.len() == 4
        && dims
            .iter()
            .zip(target.iter())
            .all(|(&have, &want)| have == want || have == 1);
    if fits {
        Ok(())
    } else {
        Err(AttentionError::shape(format!(
            "{label} mask {dims:?} does not broadcast to {target:?}"
        )))
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        masks: &AttentionMasks,
        dropout: &Dropout,
    ) -> Result<AttentionOutput, AttentionError> {
        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::shape("q, k, v must reside on the same device"));
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::shape("q, k, v must share the same dtype"));
        }
        if !checks::FLOAT_DTYPES.contains(&dtype) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        let (batch, heads, q_len, head_dim) = q
            .dims4()
            .map_err(|_| AttentionError::shape("q must have shape [batch, heads, seq_len, head_dim]"))?;
        let (kb, kh, k_len, kd) = k
            .dims4()
            .map_err(|_| AttentionError::shape("k must have shape [batch, heads, seq_len, head_dim]"))?;
        let (vb, vh, vk, vd) = v
            .dims4()
            .map_err(|_| AttentionError::shape("v must have shape [batch, heads, seq_len, head_dim]"))?;

        if kb != batch || kh != heads || kd != head_dim {
            return Err(AttentionError::shape(format!(
                "k shape mismatch: expected [{batch}, {heads}, ?, {head_dim}] got [{kb}, {kh}, {k_len}, {kd}]"
            )));
        }
        if vb != batch || vh != heads || vk != k_len || vd != head_dim {
            return Err(AttentionError::shape(format!(
                "v shape mismatch: expected [{batch}, {heads}, {k_len}, {head_dim}] got [{vb}, {vh}, {vk}, {vd}]"
            )));
        }

        let target = [batch, heads, q_len, k_len];
        if let Some(mask) = &masks.additive {
            expect_broadcastable("additive", mask, target)?;
        }
        if let Some(mask) = &masks.query {
            expect_broadcastable("query", mask, target)?;
        }

        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init dtype={dtype:?} heads={heads} head_dim={head_dim} additive_mask={} query_mask={} dropout={}",
                masks.additive.is_some(),
                masks.query.is_some(),
                dropout.probability()
            );
        }

        let policy = PrecisionPolicy::from_parameter_dtype(dtype);
        let compute = policy.compute();
        let weights_policy = PrecisionPolicy::new(compute, compute);

        let merged = batch * heads;
        let q_view = policy
            .cast_for_compute(q)?
            .reshape((merged, q_len, head_dim))?;
        let k_view = policy
            .cast_for_compute(k)?
            .reshape((merged, k_len, head_dim))?;
        let v_view = policy
            .cast_for_compute(v)?
            .reshape((merged, k_len, head_dim))?;

        let scale = 1.0 / (head_dim as f64).sqrt();
        let scores = q_view
            .matmul(&k_view.transpose(1, 2)?)?
            .affine(scale, 0.0)?
            .reshape((batch, heads, q_len, k_len))?;

        let scores = match &masks.additive {
            Some(mask) => scores.broadcast_add(&mask.to_dtype(compute)?)?,
            None => scores,
        };

        let weights = softmax_last_dim(&scores.contiguous()?)?;
        let weights = match &masks.query {
            Some(mask) => weights.broadcast_mul(&mask.to_dtype(compute)?)?,
            None => weights,
        };
        let weights = if dropout.is_active() {
            dropout.forward(&weights, &weights_policy)?
        } else {
            weights
        };

        let context = weights
            .reshape((merged, q_len, k_len))?
            .matmul(&v_view)?
            .reshape((batch, heads, q_len, head_dim))?;

        Ok(AttentionOutput {
            context: policy.cast_to_storage(&context)?,
            weights,
        })
    }
}
