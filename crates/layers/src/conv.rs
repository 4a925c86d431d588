//! Size-1 convolutions over sequence batches.
//!
//! A kernel-width-1 convolution applies the same dense map to every sequence
//! position without mixing positions. Inputs and outputs use the
//! `(batch, len, channels)` layout of the rest of the crate; the layer
//! transposes to Candle's channels-first `(batch, channels, len)` around the
//! `conv1d` call. Kernels are stored `(out_channels, in_channels, 1)`.

use candle_core::{DType, Device, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy, linear::LinearInit};

/// Point-wise (kernel width 1) 1D convolution with bias.
#[derive(Debug, Clone)]
pub struct PointwiseConv {
    kernel: Tensor,
    bias: Tensor,
}

impl PointwiseConv {
    /// Wraps an existing `(out, in, 1)` kernel and `(out,)` bias.
    pub fn new(kernel: Tensor, bias: Tensor) -> Result<Self> {
        checks::expect_rank("conv.kernel", &kernel, 3)?;
        checks::expect_dtype_in("conv.kernel", &kernel, checks::FLOAT_DTYPES)?;
        let (out_channels, in_channels, _) = kernel.dims3()?;
        checks::expect_shape("conv.kernel", &kernel, &[out_channels, in_channels, 1])?;
        checks::expect_shape("conv.bias", &bias, &[out_channels])?;
        checks::expect_same_dtype("conv.bias", &bias, "conv.kernel", &kernel)?;
        Ok(Self { kernel, bias })
    }

    /// Samples a kernel with `init` (fan-in = `in_channels`); bias starts at zero.
    pub fn with_init(
        in_channels: usize,
        out_channels: usize,
        init: LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let kernel = init
            .sample(out_channels, in_channels, device, dtype)?
            .reshape((out_channels, in_channels, 1))?;
        let bias = Tensor::zeros(out_channels, dtype, device)?;
        Self::new(kernel, bias)
    }

    pub fn in_channels(&self) -> usize {
        self.kernel.dims()[1]
    }

    pub fn out_channels(&self) -> usize {
        self.kernel.dims()[0]
    }

    pub fn kernel(&self) -> &Tensor {
        &self.kernel
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Maps `(batch, len, in_channels)` to `(batch, len, out_channels)`.
    pub fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let (_, _, channels) = checks::batch_seq_hidden("conv.input", input)?;
        if channels != self.in_channels() {
            return Err(candle_core::Error::Msg(format!(
                "conv.input: expected {} channels, got {channels}",
                self.in_channels()
            )));
        }
        let kernel = policy.cast_for_compute(&self.kernel)?;
        let bias = policy
            .cast_for_compute(&self.bias)?
            .reshape((1, self.out_channels(), 1))?;

        let channels_first = policy.cast_for_compute(input)?.transpose(1, 2)?.contiguous()?;
        let convolved = channels_first
            .conv1d(&kernel, 0, 1, 1, 1)?
            .broadcast_add(&bias)?;
        let output = convolved.transpose(1, 2)?.contiguous()?;
        policy.cast_to_storage(&output)
    }
}
