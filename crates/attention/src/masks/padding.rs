//! Padding masks built from per-sequence valid lengths.
//!
//! Lengths longer than the padded sequence are clamped, so every position of
//! that sequence counts as valid. A length of zero masks the whole sequence.

use candle_core::{DType, Device, Error, Result, Tensor};

use super::MASK_PENALTY;

/// Additive mask shaped `[batch, 1, 1, k_len]` hiding keys at or beyond each
/// sequence's length. Broadcasts over heads and query positions.
pub fn key_padding_mask(device: &Device, keys_len: &[usize], k_len: usize) -> Result<Tensor> {
    let data: Vec<f32> = keys_len
        .iter()
        .flat_map(|&valid| (0..k_len).map(move |k| if k < valid { 0.0 } else { MASK_PENALTY }))
        .collect();
    Tensor::from_vec(data, (keys_len.len(), 1, 1, k_len), device)
}

/// Multiplicative mask shaped `[batch, 1, q_len, 1]` with `1.0` for queries
/// inside each sequence's length and `0.0` past it.
pub fn query_padding_mask(device: &Device, queries_len: &[usize], q_len: usize) -> Result<Tensor> {
    let data: Vec<f32> = queries_len
        .iter()
        .flat_map(|&valid| (0..q_len).map(move |q| if q < valid { 1.0 } else { 0.0 }))
        .collect();
    Tensor::from_vec(data, (queries_len.len(), 1, q_len, 1), device)
}

/// Reads a rank-1 integer length tensor (`u8`, `u32` or `i64`).
pub fn lengths_from_tensor(lengths: &Tensor) -> Result<Vec<usize>> {
    if lengths.rank() != 1 {
        return Err(Error::Msg(format!(
            "lengths: expected a rank-1 tensor, got shape {:?}",
            lengths.dims()
        )));
    }
    match lengths.dtype() {
        DType::U8 | DType::U32 | DType::I64 => {}
        other => {
            return Err(Error::Msg(format!(
                "lengths: expected an integer dtype, got {other:?}"
            )))
        }
    }
    lengths
        .to_dtype(DType::I64)?
        .to_vec1::<i64>()?
        .into_iter()
        .map(|len| {
            usize::try_from(len)
                .map_err(|_| Error::Msg(format!("lengths: negative length {len}")))
        })
        .collect()
}
