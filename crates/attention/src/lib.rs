//! Masked multi-head scaled dot-product attention.
//!
//! [`MultiHeadAttention`] consumes `(batch, seq_len, feature_dim)` queries,
//! keys and optional values together with per-sequence valid lengths. Three
//! masking regimes shape the attention weights:
//!
//! * key padding: keys past `keys_len` receive an additive `-2^30` before
//!   softmax, so they get (almost) no weight;
//! * causal: with [`Config::causal`] set, query `i` cannot attend to key
//!   `j > i`;
//! * query padding: after softmax, weight rows of queries past `queries_len`
//!   are multiplied by zero.
//!
//! Dropout on the attention weights is optional, seeded, and active only in
//! training mode. With no dropout the computation is deterministic.
//!
//! Lower-level pieces are public too: [`masks`] builds the mask tensors and
//! [`reference::ExactAttention`] is the per-head kernel behind the
//! [`Attention`] trait.

pub mod core;
pub mod masks;
pub mod multihead;
pub mod reference;

pub use core::{Attention, AttentionError, AttentionMasks, AttentionOutput, Config};
pub use multihead::{AttentionParameters, MultiHeadAttention};
