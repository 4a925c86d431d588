//! Core traits and types shared across attention implementations.
//!
//! Kernels operate on head-split tensors with layout
//! `[batch, n_heads, seq_len, head_dim]`. Scores, softmax and the weighted sum
//! run in the compute dtype of the input (`f32` for `f16`/`bf16`), and the
//! context is returned in the input dtype.

pub mod config;
pub mod errors;

use candle_core::Tensor;
use layers::Dropout;

pub use config::Config;
pub use errors::AttentionError;

/// Masks applied around the softmax.
#[derive(Debug, Clone, Default)]
pub struct AttentionMasks {
    /// Added to the scaled scores before softmax. Must broadcast to
    /// `[batch, n_heads, q_len, k_len]`; blocked entries hold
    /// [`MASK_PENALTY`](crate::masks::MASK_PENALTY).
    pub additive: Option<Tensor>,
    /// Multiplied into the softmax output. Must broadcast to
    /// `[batch, n_heads, q_len, k_len]`; holds `1.0` for kept query rows and
    /// `0.0` for padded ones.
    pub query: Option<Tensor>,
}

/// Result of an attention call.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// Attended values. Kernels return `[batch, n_heads, q_len, head_dim]`;
    /// [`MultiHeadAttention`](crate::multihead::MultiHeadAttention) returns the
    /// projected `[batch, q_len, feature_dim]`.
    pub context: Tensor,
    /// Attention weights `[batch, n_heads, q_len, k_len]` after masking and
    /// dropout, in the compute dtype.
    pub weights: Tensor,
}

/// Unified interface for scaled dot-product attention kernels.
///
/// * `q`, `k`, and `v` share the layout `[batch, n_heads, seq_len, head_dim]`;
///   `k` and `v` share `seq_len`.
/// * Scores are scaled by `1 / sqrt(head_dim)`.
/// * The additive mask is applied before softmax over the key axis, the query
///   mask after it, then `dropout`.
pub trait Attention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        masks: &AttentionMasks,
        dropout: &Dropout,
    ) -> Result<AttentionOutput, AttentionError>;
}
