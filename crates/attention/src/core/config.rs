//! Configuration for [`MultiHeadAttention`](crate::multihead::MultiHeadAttention).
//!
//! The [`Config`] struct can be built in code, deserialised from TOML, and
//! adjusted through environment variables for quick experiments.

use std::{fs, path::Path};

use layers::{ActivationKind, ConfigError};
use serde::{Deserialize, Serialize};

use super::AttentionError;

/// Environment variable overriding [`Config::dropout_p`].
pub const DROPOUT_ENV: &str = "ATTENTION_DROPOUT_P";

/// Configuration driving multi-head attention behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of heads; must divide the feature dimension of the inputs.
    pub num_heads: usize,
    /// Dropout probability applied to attention weights during training.
    ///
    /// `None` or `0.0` disables dropout and the computation is deterministic.
    pub dropout_p: Option<f32>,
    /// Prevent query `i` from attending to keys `j > i` (decoder masking).
    pub causal: bool,
    /// Activation applied after every projection. `Identity` keeps them linear.
    pub projection_activation: ActivationKind,
    /// Seed of the dropout mask generator.
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_heads: 8,
            dropout_p: None,
            causal: false,
            projection_activation: ActivationKind::Identity,
            seed: 0,
        }
    }
}

impl Config {
    pub fn new(num_heads: usize) -> Self {
        Self {
            num_heads,
            ..Self::default()
        }
    }

    pub fn with_dropout(mut self, dropout_p: f32) -> Self {
        self.dropout_p = Some(dropout_p);
        self
    }

    pub fn with_causal(mut self, causal: bool) -> Self {
        self.causal = causal;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.num_heads == 0 {
            return Err(AttentionError::InvalidConfig {
                context: "num_heads must be greater than zero".to_string(),
            });
        }
        if let Some(p) = self.dropout_p {
            if !(0.0..1.0).contains(&p) {
                return Err(AttentionError::InvalidConfig {
                    context: format!("dropout probability must be in [0, 1), got {p}"),
                });
            }
        }
        Ok(())
    }

    /// Applies `ATTENTION_DROPOUT_P` when it is set to a parseable float.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var(DROPOUT_ENV) {
            match raw.trim().parse::<f32>() {
                Ok(p) => {
                    log::debug!("{DROPOUT_ENV}={p} overrides dropout_p={:?}", self.dropout_p);
                    self.dropout_p = Some(p);
                }
                Err(_) => log::warn!("ignoring unparseable {DROPOUT_ENV}={raw:?}"),
            }
        }
    }

    /// Parses a TOML document; missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        log::debug!("attention config loaded from {}: {config:?}", path.display());
        Ok(config)
    }
}
