//! Mask builders for padded and causal attention.
//!
//! Two kinds of masks are produced, both `f32`:
//!
//! * **Additive** masks hold `0.0` (keep) or [`MASK_PENALTY`] (discard) and are
//!   added to the scaled scores before softmax. The penalty is large but
//!   finite, so a row with every key masked degrades to a uniform softmax
//!   instead of NaN.
//! * **Multiplicative** query masks hold `1.0`/`0.0` and are applied after
//!   softmax, zeroing the weight rows of padded queries.
//!
//! Masks are shaped to broadcast against `[batch, num_heads, q_len, k_len]`
//! rather than materialising the full tensor.

pub mod causal;
pub mod padding;

/// Additive penalty for blocked positions, `-2^30`.
pub const MASK_PENALTY: f32 = -1_073_741_824.0;

pub use causal::causal_mask;
pub use padding::{key_padding_mask, lengths_from_tensor, query_padding_mask};
