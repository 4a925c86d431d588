//! Element-wise non-linearities used after projections and convolutions.
//!
//! Activations keep the input layout. They evaluate in the compute dtype of
//! the [`PrecisionPolicy`] and return a tensor in the storage dtype.
//!
//! * **ReLU** `max(x, 0)`, the default for the point-wise feed-forward block.
//! * **GELU** erf form `0.5 * x * (1 + erf(x / sqrt(2)))`.
//! * **SiLU** `x * sigmoid(x)`.

use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

use crate::dtypes::PrecisionPolicy;

/// Identifies a non-linearity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    /// Pass-through; keeps a projection purely affine.
    #[default]
    Identity,
    Relu,
    Gelu,
    Silu,
}

impl ActivationKind {
    /// Applies the activation to `input` using the precision rules in `policy`.
    pub fn apply(self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        if self == ActivationKind::Identity {
            return policy.cast_to_storage(input);
        }
        let compute = policy.cast_for_compute(input)?;
        let activated = match self {
            ActivationKind::Identity => compute,
            ActivationKind::Relu => compute.relu()?,
            ActivationKind::Gelu => compute.gelu_erf()?,
            ActivationKind::Silu => compute.silu()?,
        };
        policy.cast_to_storage(&activated)
    }
}
