//! Causal (leftward) masks for decoder self-attention.
//!
//! Query `i` may attend to key `j` only when `j <= i`. Positions are aligned
//! at the start of both sequences, so when `k_len > q_len` the trailing keys
//! stay hidden from every query.

use candle_core::{Device, Result, Tensor};

use super::MASK_PENALTY;

/// Additive causal mask shaped `[1, 1, q_len, k_len]`.
pub fn causal_mask(device: &Device, q_len: usize, k_len: usize) -> Result<Tensor> {
    let data: Vec<f32> = (0..q_len)
        .flat_map(|q| (0..k_len).map(move |k| if k > q { MASK_PENALTY } else { 0.0 }))
        .collect();
    log::debug!("causal mask q_len={q_len} k_len={k_len}");
    Tensor::from_vec(data, (1, 1, q_len, k_len), device)
}
