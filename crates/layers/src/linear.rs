//! Dense affine projections.
//!
//! [`Linear`] maps `(batch, seq, in_dim)` or `(rows, in_dim)` to the same
//! leading layout with `out_dim` features. Weights are stored `(out_dim,
//! in_dim)` and the bias, when enabled, `(out_dim,)`. The matmul runs in
//! [`PrecisionPolicy::compute`] and the result is cast back to the storage
//! dtype.

use candle_core::{DType, Device, Error, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy};

/// Shape of a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearConfig {
    pub input_dim: usize,
    pub output_dim: usize,
    /// Whether a learnable bias vector is applied.
    pub bias: bool,
}

impl LinearConfig {
    /// A projection with bias.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }
}

/// Weight initialisation policies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinearInit {
    /// Glorot uniform, `U(-sqrt(6 / (fan_in + fan_out)), +...)`.
    XavierUniform,
    /// Glorot normal, `N(0, 2 / (fan_in + fan_out))`.
    XavierNormal,
    /// He normal scaled by `1 / sqrt(fan_in)`, as used for conv kernels.
    FanInNormal,
}

impl LinearInit {
    /// Samples a `(fan_out, fan_in)` matrix on `device` in `dtype`.
    pub fn sample(
        &self,
        fan_out: usize,
        fan_in: usize,
        device: &Device,
        dtype: DType,
    ) -> Result<Tensor> {
        let (fi, fo) = (fan_in as f64, fan_out as f64);
        let shape = (fan_out, fan_in);
        let weight = match self {
            LinearInit::XavierUniform => {
                let bound = (6.0 / (fi + fo)).sqrt() as f32;
                Tensor::rand(-bound, bound, shape, device)?
            }
            LinearInit::XavierNormal => {
                let std = (2.0 / (fi + fo)).sqrt() as f32;
                Tensor::randn(0f32, std, shape, device)?
            }
            LinearInit::FanInNormal => {
                let std = (1.0 / fi).sqrt() as f32;
                Tensor::randn(0f32, std, shape, device)?
            }
        };
        weight.to_dtype(dtype)
    }
}

/// Affine projection `x W^T + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Wraps existing parameters after validating their shapes.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        checks::expect_shape("linear.weight", &weight, &[config.output_dim, config.input_dim])?;
        checks::expect_dtype_in("linear.weight", &weight, checks::FLOAT_DTYPES)?;
        match (config.bias, bias.as_ref()) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_same_dtype("linear.bias", tensor, "linear.weight", &weight)?;
            }
            (false, Some(_)) => {
                return Err(Error::Msg("linear.bias: provided but config disables bias".into()))
            }
            (true, None) => {
                return Err(Error::Msg("linear.bias: config expects a bias".into()));
            }
            (false, None) => {}
        }
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Samples weights with `init`; biases start at zero.
    pub fn with_init(
        config: LinearConfig,
        init: LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample(config.output_dim, config.input_dim, device, dtype)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Applies the projection to `(batch, seq, in_dim)` or `(rows, in_dim)`.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let input = policy.cast_for_compute(hidden)?;
        let weight_t = policy.cast_for_compute(&self.weight)?.t()?;

        let mut output = match hidden.dims() {
            &[batch, seq, dim] if dim == self.config.input_dim => input
                .reshape((batch * seq, dim))?
                .matmul(&weight_t)?
                .reshape((batch, seq, self.config.output_dim))?,
            &[_, dim] if dim == self.config.input_dim => input.matmul(&weight_t)?,
            dims => {
                return Err(Error::Msg(format!(
                    "linear.input: expected [B, T, {in_dim}] or [T, {in_dim}], got {dims:?}",
                    in_dim = self.config.input_dim
                )))
            }
        };

        if let Some(bias) = &self.bias {
            output = output.broadcast_add(&policy.cast_for_compute(bias)?)?;
        }
        policy.cast_to_storage(&output)
    }
}
