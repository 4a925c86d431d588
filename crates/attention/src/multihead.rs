//! Multi-head attention with padding and causal masking.
//!
//! Given queries `(batch, q_len, d)`, keys `(batch, k_len, d)` and optional
//! values (defaulting to the keys), [`MultiHeadAttention`]:
//!
//! 1. projects queries, keys and values to `d` features each,
//! 2. splits the features into `num_heads` slices of `d / num_heads`,
//! 3. scores every head with `q k^T / sqrt(d / num_heads)`,
//! 4. adds `-2^30` to keys past `keys_len` and, for decoders, to future keys,
//! 5. applies softmax over keys, then zeroes the rows of queries past
//!    `queries_len`,
//! 6. applies dropout to the weights (training mode only),
//! 7. mixes the values, concatenates the heads and projects once more.
//!
//! Key padding is additive before softmax while query padding multiplies after
//! it: padded queries keep a normalised distribution internally but contribute
//! an all-zero weight row.
//!
//! The four projections are created on the first call from the query feature
//! size, device and dtype, and reused by every later call.

use std::fmt;

use candle_core::{DType, Tensor};
use layers::{checks, Dropout, Linear, LinearConfig, LinearInit, PrecisionPolicy};
use once_cell::sync::OnceCell;

use crate::core::{Attention, AttentionError, AttentionMasks, AttentionOutput, Config};
use crate::masks::{causal_mask, key_padding_mask, query_padding_mask};
use crate::reference::ExactAttention;

/// Learned projections of a [`MultiHeadAttention`] module.
#[derive(Debug, Clone)]
pub struct AttentionParameters {
    pub query: Linear,
    pub key: Linear,
    pub value: Linear,
    pub output: Linear,
}

impl AttentionParameters {
    /// Glorot-uniform `d x d` projections with zero biases.
    pub fn init(
        feature_dim: usize,
        device: &candle_core::Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        let config = LinearConfig::new(feature_dim, feature_dim);
        let make = || Linear::with_init(config, LinearInit::XavierUniform, device, dtype);
        Ok(Self {
            query: make()?,
            key: make()?,
            value: make()?,
            output: make()?,
        })
    }

    /// Feature dimension the projections were built for.
    pub fn feature_dim(&self) -> usize {
        self.query.config().input_dim
    }

    fn validate(&self) -> Result<(), AttentionError> {
        let dim = self.feature_dim();
        for (name, linear) in [
            ("query", &self.query),
            ("key", &self.key),
            ("value", &self.value),
            ("output", &self.output),
        ] {
            let cfg = linear.config();
            if cfg.input_dim != dim || cfg.output_dim != dim || !cfg.bias {
                return Err(AttentionError::shape(format!(
                    "{name} projection must be {dim} -> {dim} with bias, got {} -> {} (bias={})",
                    cfg.input_dim, cfg.output_dim, cfg.bias
                )));
            }
        }
        Ok(())
    }
}

/// Masked multi-head scaled dot-product attention.
pub struct MultiHeadAttention {
    config: Config,
    params: OnceCell<AttentionParameters>,
    kernel: ExactAttention,
    dropout: Dropout,
}

impl fmt::Debug for MultiHeadAttention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiHeadAttention")
            .field("config", &self.config)
            .field("feature_dim", &self.params.get().map(|p| p.feature_dim()))
            .field("training", &self.dropout.is_training())
            .finish()
    }
}

impl MultiHeadAttention {
    /// Builds a module whose projections are created on the first call.
    ///
    /// `config` is used as given; call [`Config::apply_env_overrides`] first
    /// to honour `ATTENTION_DROPOUT_P`.
    pub fn new(config: Config) -> Result<Self, AttentionError> {
        config.validate()?;
        let dropout = Dropout::new(config.dropout_p, config.seed)?;
        Ok(Self {
            config,
            params: OnceCell::new(),
            kernel: ExactAttention::new(),
            dropout,
        })
    }

    /// Builds a module around existing projections (e.g. restored weights).
    pub fn with_parameters(
        config: Config,
        params: AttentionParameters,
    ) -> Result<Self, AttentionError> {
        params.validate()?;
        let module = Self::new(config)?;
        let feature_dim = params.feature_dim();
        if feature_dim % module.config.num_heads != 0 {
            return Err(AttentionError::shape(format!(
                "feature dim {feature_dim} is not divisible by {} heads",
                module.config.num_heads
            )));
        }
        let _ = module.params.set(params);
        Ok(module)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn num_heads(&self) -> usize {
        self.config.num_heads
    }

    /// Projections, once created.
    pub fn parameters(&self) -> Option<&AttentionParameters> {
        self.params.get()
    }

    /// Training mode enables attention dropout; evaluation mode disables it.
    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }

    pub fn is_training(&self) -> bool {
        self.dropout.is_training()
    }

    /// Attends `queries` over `keys`/`values`; returns `(batch, q_len, d)`.
    pub fn forward(
        &self,
        queries: &Tensor,
        keys: &Tensor,
        queries_len: &[usize],
        keys_len: &[usize],
        values: Option<&Tensor>,
    ) -> Result<Tensor, AttentionError> {
        self.forward_with_weights(queries, keys, queries_len, keys_len, values)
            .map(|out| out.context)
    }

    /// Like [`forward`](Self::forward) but also returns the attention weights
    /// `(batch, num_heads, q_len, k_len)`.
    pub fn forward_with_weights(
        &self,
        queries: &Tensor,
        keys: &Tensor,
        queries_len: &[usize],
        keys_len: &[usize],
        values: Option<&Tensor>,
    ) -> Result<AttentionOutput, AttentionError> {
        let values = values.unwrap_or(keys);
        let (batch, q_len, feature_dim) = sequence_dims("queries", queries)?;
        let (kb, k_len, kd) = sequence_dims("keys", keys)?;
        let (vb, v_len, vd) = sequence_dims("values", values)?;

        if kb != batch || vb != batch {
            return Err(AttentionError::shape(format!(
                "batch mismatch: queries {batch}, keys {kb}, values {vb}"
            )));
        }
        if kd != feature_dim || vd != feature_dim {
            return Err(AttentionError::shape(format!(
                "feature mismatch: queries {feature_dim}, keys {kd}, values {vd}"
            )));
        }
        if v_len != k_len {
            return Err(AttentionError::shape(format!(
                "values length {v_len} must match keys length {k_len}"
            )));
        }
        if queries_len.len() != batch || keys_len.len() != batch {
            return Err(AttentionError::shape(format!(
                "length vectors must have {batch} entries, got queries_len {} and keys_len {}",
                queries_len.len(),
                keys_len.len()
            )));
        }
        let heads = self.config.num_heads;
        if feature_dim % heads != 0 {
            return Err(AttentionError::shape(format!(
                "feature dim {feature_dim} is not divisible by {heads} heads"
            )));
        }

        let dtype = queries.dtype();
        checks::expect_dtype_in("queries", queries, checks::FLOAT_DTYPES)
            .map_err(|_| AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            })?;
        if keys.dtype() != dtype || values.dtype() != dtype {
            return Err(AttentionError::shape(
                "queries, keys and values must share the same dtype",
            ));
        }

        let device = queries.device();
        let params = self.params.get_or_try_init(|| {
            log::info!(
                "attention::multihead init heads={heads} feature_dim={feature_dim} head_dim={} causal={} dropout={:?} dtype={dtype:?}",
                feature_dim / heads,
                self.config.causal,
                self.config.dropout_p,
            );
            AttentionParameters::init(feature_dim, device, dtype)
        })?;
        if params.feature_dim() != feature_dim {
            return Err(AttentionError::shape(format!(
                "module was built for feature dim {}, got {feature_dim}",
                params.feature_dim()
            )));
        }

        let policy = PrecisionPolicy::from_parameter_dtype(dtype);
        let activation = self.config.projection_activation;
        let project = |linear: &Linear, input: &Tensor| -> Result<Tensor, AttentionError> {
            let projected = linear.forward(input, &policy)?;
            Ok(activation.apply(&projected, &policy)?)
        };

        let q = split_heads(&project(&params.query, queries)?, heads)?;
        let k = split_heads(&project(&params.key, keys)?, heads)?;
        let v = split_heads(&project(&params.value, values)?, heads)?;

        let mut additive = key_padding_mask(device, keys_len, k_len)?;
        if self.config.causal {
            additive = additive.broadcast_add(&causal_mask(device, q_len, k_len)?)?;
        }
        let masks = AttentionMasks {
            additive: Some(additive),
            query: Some(query_padding_mask(device, queries_len, q_len)?),
        };

        let attended = self.kernel.attend(&q, &k, &v, &masks, &self.dropout)?;
        let merged = merge_heads(&attended.context)?;
        let output = project(&params.output, &merged)?;

        Ok(AttentionOutput {
            context: output,
            weights: attended.weights,
        })
    }
}

fn sequence_dims(label: &str, tensor: &Tensor) -> Result<(usize, usize, usize), AttentionError> {
    checks::batch_seq_hidden(label, tensor).map_err(|err| AttentionError::shape(err.to_string()))
}

/// `(batch, len, d)` -> `(batch, heads, len, d / heads)`; head `h` owns
/// features `h * d / heads .. (h + 1) * d / heads`.
fn split_heads(tensor: &Tensor, heads: usize) -> Result<Tensor, AttentionError> {
    let (batch, len, dim) = tensor.dims3()?;
    Ok(tensor
        .reshape((batch, len, heads, dim / heads))?
        .transpose(1, 2)?
        .contiguous()?)
}

/// Inverse of [`split_heads`].
fn merge_heads(tensor: &Tensor) -> Result<Tensor, AttentionError> {
    let (batch, heads, len, head_dim) = tensor.dims4()?;
    Ok(tensor
        .transpose(1, 2)?
        .contiguous()?
        .reshape((batch, len, heads * head_dim))?)
}
