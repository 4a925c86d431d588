//! Position-wise feed-forward block.
//!
//! [`FeedForward`] applies two size-1 convolutions to `(batch, len, in_dim)`
//! inputs: the first widens to `hidden_size`, the second maps to
//! `output_size`. Each convolution is followed by optional dropout and the
//! configured activation (ReLU by default):
//!
//! ```text
//! conv(hidden) -> dropout -> act -> conv(output) -> dropout -> act
//! ```
//!
//! Positions never mix and nothing is masked; callers ignore padded outputs
//! themselves. Kernels are created on the first call, sized from the input's
//! channel count and placed on the input's device in its dtype.

use std::fmt;

use candle_core::{Error, Result, Tensor};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::{
    activations::ActivationKind,
    checks,
    conv::PointwiseConv,
    dropout::Dropout,
    dtypes::PrecisionPolicy,
    linear::LinearInit,
    ConfigError,
};

/// Configuration for [`FeedForward`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedForwardConfig {
    /// Width of the first convolution.
    pub hidden_size: usize,
    /// Width of the second convolution and of the output.
    pub output_size: usize,
    /// Dropout after each convolution; `None` or `0.0` disables it.
    #[serde(default)]
    pub dropout_p: Option<f32>,
    #[serde(default = "default_activation")]
    pub activation: ActivationKind,
    /// Seed of the dropout mask generator.
    #[serde(default)]
    pub seed: u64,
}

fn default_activation() -> ActivationKind {
    ActivationKind::Relu
}

impl FeedForwardConfig {
    /// ReLU block without dropout.
    pub fn new(hidden_size: usize, output_size: usize) -> Self {
        Self {
            hidden_size,
            output_size,
            dropout_p: None,
            activation: ActivationKind::Relu,
            seed: 0,
        }
    }

    pub fn with_dropout(mut self, dropout_p: f32) -> Self {
        self.dropout_p = Some(dropout_p);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 || self.output_size == 0 {
            return Err(Error::Msg(format!(
                "feed_forward: hidden_size ({}) and output_size ({}) must be non-zero",
                self.hidden_size, self.output_size
            )));
        }
        checks::expect_probability("feed_forward.dropout_p", self.dropout_p)
    }

    /// Parses a TOML document and validates it.
    pub fn from_toml_str(source: &str) -> std::result::Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        log::debug!("feed_forward config loaded: {config:?}");
        Ok(config)
    }
}

/// The two convolutions of a [`FeedForward`] block.
#[derive(Debug, Clone)]
pub struct FeedForwardParameters {
    pub inner: PointwiseConv,
    pub outer: PointwiseConv,
}

/// Two stacked point-wise convolutions with activation and dropout.
pub struct FeedForward {
    config: FeedForwardConfig,
    params: OnceCell<FeedForwardParameters>,
    inner_dropout: Dropout,
    outer_dropout: Dropout,
}

impl fmt::Debug for FeedForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedForward")
            .field("config", &self.config)
            .field("initialised", &self.params.get().is_some())
            .finish()
    }
}

impl FeedForward {
    /// Builds a block whose kernels are created on the first forward pass.
    pub fn new(config: FeedForwardConfig) -> Result<Self> {
        config.validate()?;
        let inner_dropout = Dropout::new(config.dropout_p, config.seed)?;
        let outer_dropout = Dropout::new(config.dropout_p, config.seed.wrapping_add(1))?;
        Ok(Self {
            config,
            params: OnceCell::new(),
            inner_dropout,
            outer_dropout,
        })
    }

    /// Builds a block around existing kernels.
    pub fn with_parameters(config: FeedForwardConfig, params: FeedForwardParameters) -> Result<Self> {
        if params.inner.out_channels() != config.hidden_size
            || params.outer.in_channels() != config.hidden_size
            || params.outer.out_channels() != config.output_size
        {
            return Err(Error::Msg(format!(
                "feed_forward: kernels {}->{}->{} do not match hidden_size {} / output_size {}",
                params.inner.in_channels(),
                params.inner.out_channels(),
                params.outer.out_channels(),
                config.hidden_size,
                config.output_size
            )));
        }
        let block = Self::new(config)?;
        let _ = block.params.set(params);
        Ok(block)
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    /// Parameters, if they have been created.
    pub fn parameters(&self) -> Option<&FeedForwardParameters> {
        self.params.get()
    }

    /// Switches dropout on (`true`) or off.
    pub fn set_training(&self, training: bool) {
        self.inner_dropout.set_training(training);
        self.outer_dropout.set_training(training);
    }

    /// Maps `(batch, len, in_dim)` to `(batch, len, output_size)`.
    pub fn forward(&self, inputs: &Tensor) -> Result<Tensor> {
        let (_, _, in_dim) = checks::batch_seq_hidden("feed_forward.input", inputs)?;
        checks::expect_dtype_in("feed_forward.input", inputs, checks::FLOAT_DTYPES)?;
        let params = self.params.get_or_try_init(|| {
            log::info!(
                "feed_forward init in_dim={} hidden_size={} output_size={} dropout={:?} dtype={:?}",
                in_dim,
                self.config.hidden_size,
                self.config.output_size,
                self.config.dropout_p,
                inputs.dtype()
            );
            let device = inputs.device();
            let dtype = inputs.dtype();
            Ok::<_, Error>(FeedForwardParameters {
                inner: PointwiseConv::with_init(
                    in_dim,
                    self.config.hidden_size,
                    LinearInit::FanInNormal,
                    device,
                    dtype,
                )?,
                outer: PointwiseConv::with_init(
                    self.config.hidden_size,
                    self.config.output_size,
                    LinearInit::FanInNormal,
                    device,
                    dtype,
                )?,
            })
        })?;

        let policy = PrecisionPolicy::from_parameter_dtype(inputs.dtype());
        let hidden = params.inner.forward(inputs, &policy)?;
        let hidden = self.inner_dropout.forward(&hidden, &policy)?;
        let hidden = self.config.activation.apply(&hidden, &policy)?;

        let outputs = params.outer.forward(&hidden, &policy)?;
        let outputs = self.outer_dropout.forward(&outputs, &policy)?;
        self.config.activation.apply(&outputs, &policy)
    }
}
