//! Labelled shape and dtype assertions shared by the layer components.
//!
//! Every helper takes a `label` naming the tensor being checked (for example
//! `"linear.weight"`) so failures read well when they surface several layers
//! up the call stack. They return `candle_core::Result<()>` and never panic.

use candle_core::{DType, Error, Result, Tensor};

/// Dtypes accepted for parameters and activations.
pub const FLOAT_DTYPES: &[DType] = &[DType::F16, DType::BF16, DType::F32];

/// Ensures `tensor` has exactly `rank` dimensions.
pub fn expect_rank(label: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    let actual = tensor.rank();
    if actual == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected rank {rank}, got rank {actual} with shape {:?}",
            tensor.dims()
        )))
    }
}

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected shape {:?}, got {:?}",
            expected,
            tensor.dims()
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention and returns the three sizes.
pub fn batch_seq_hidden(label: &str, tensor: &Tensor) -> Result<(usize, usize, usize)> {
    match tensor.dims() {
        [batch, seq, hidden] => Ok((*batch, *seq, *hidden)),
        dims => Err(Error::Msg(format!(
            "{label}: expected (batch, seq, hidden) layout, got {dims:?}"
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

/// Requires two tensors to share a dtype.
pub fn expect_same_dtype(label: &str, lhs: &Tensor, other: &str, rhs: &Tensor) -> Result<()> {
    if lhs.dtype() == rhs.dtype() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label} ({:?}) must share the dtype of {other} ({:?})",
            lhs.dtype(),
            rhs.dtype()
        )))
    }
}

/// Validates a probability used for dropout: `None` or a value in `[0, 1)`.
pub fn expect_probability(label: &str, p: Option<f32>) -> Result<()> {
    match p {
        Some(p) if !(0.0..1.0).contains(&p) => Err(Error::Msg(format!(
            "{label}: probability must be in [0, 1), got {p}"
        ))),
        _ => Ok(()),
    }
}
