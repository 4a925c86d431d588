//! Building blocks for transformer layers on top of Candle.
//!
//! Everything here works on `(batch, seq, hidden)` tensors:
//!
//! * [`linear`]: affine projections used for attention queries, keys, values
//!   and outputs.
//! * [`conv`]: kernel-width-1 convolutions, the per-position dense maps of the
//!   feed-forward block.
//! * [`mlp`]: the position-wise feed-forward block itself.
//! * [`dropout`]: seeded inverted dropout with a training switch.
//! * [`activations`], [`dtypes`], [`checks`]: shared helpers.
//!
//! Forward passes return `candle_core::Result`; validation failures surface as
//! `candle_core::Error::Msg` with a label naming the offending tensor.

use thiserror::Error;

pub mod activations;
pub mod checks;
pub mod conv;
pub mod dropout;
pub mod dtypes;
pub mod linear;
pub mod mlp;

pub use activations::ActivationKind;
pub use conv::PointwiseConv;
pub use dropout::Dropout;
pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit};
pub use mlp::{FeedForward, FeedForwardConfig, FeedForwardParameters};

/// Failure to load a layer configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
