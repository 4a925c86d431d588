//! Seeded inverted dropout.
//!
//! Masks come from a 64-bit linear congruential generator owned by the
//! [`Dropout`] instance, so a given seed and call sequence always drops the
//! same elements. Survivors are scaled by `1 / (1 - p)`. A probability of
//! `None` or `0.0` disables dropout entirely and the input is returned as-is,
//! which keeps evaluation bit-exact.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use candle_core::{Error, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy};

/// Dropout policy selected from a probability.
#[derive(Debug)]
pub enum DropoutMode {
    Disabled,
    Enabled { probability: f32, rng: Mutex<Lcg64> },
}

impl DropoutMode {
    /// `None` or `0.0` disables dropout.
    pub fn from_probability(probability: Option<f32>, seed: u64) -> Result<Self> {
        checks::expect_probability("dropout.p", probability)?;
        Ok(match probability {
            Some(p) if p > 0.0 => DropoutMode::Enabled {
                probability: p,
                rng: Mutex::new(Lcg64::new(seed)),
            },
            _ => DropoutMode::Disabled,
        })
    }
}

/// Inverted dropout with a training switch.
pub struct Dropout {
    mode: DropoutMode,
    training: AtomicBool,
}

impl fmt::Debug for Dropout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dropout")
            .field("probability", &self.probability())
            .field("training", &self.is_training())
            .finish()
    }
}

impl Dropout {
    /// Creates a dropout layer in training mode.
    pub fn new(probability: Option<f32>, seed: u64) -> Result<Self> {
        Ok(Self {
            mode: DropoutMode::from_probability(probability, seed)?,
            training: AtomicBool::new(true),
        })
    }

    /// A dropout that never drops anything.
    pub fn disabled() -> Self {
        Self {
            mode: DropoutMode::Disabled,
            training: AtomicBool::new(true),
        }
    }

    /// Active drop probability, `0.0` when disabled.
    pub fn probability(&self) -> f32 {
        match &self.mode {
            DropoutMode::Disabled => 0.0,
            DropoutMode::Enabled { probability, .. } => *probability,
        }
    }

    /// True when this layer would modify its input on the next call.
    pub fn is_active(&self) -> bool {
        self.is_training() && matches!(self.mode, DropoutMode::Enabled { .. })
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }

    /// Evaluation mode (`false`) turns the layer into the identity.
    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    /// Applies dropout to a tensor of any rank.
    pub fn forward(&self, tensor: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let (probability, rng) = match &self.mode {
            DropoutMode::Enabled { probability, rng } if self.is_active() => (*probability, rng),
            _ => return Ok(tensor.clone()),
        };
        let keep_prob = 1.0 - probability;
        let total = tensor.elem_count();
        let mask_data = {
            let mut rng = rng
                .lock()
                .map_err(|_| Error::Msg("dropout RNG mutex poisoned".into()))?;
            (0..total)
                .map(|_| {
                    if rng.next_f32() < keep_prob {
                        1.0 / keep_prob
                    } else {
                        0.0
                    }
                })
                .collect::<Vec<f32>>()
        };
        let compute = policy.cast_for_compute(tensor)?;
        let mask = Tensor::from_vec(mask_data, tensor.dims(), tensor.device())?
            .to_dtype(compute.dtype())?;
        policy.cast_to_storage(&compute.mul(&mask)?)
    }
}

/// 64-bit linear congruential generator for deterministic dropout masks.
#[derive(Debug, Clone)]
pub struct Lcg64 {
    state: u64,
}

impl Lcg64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // Knuth's MMIX multiplier.
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    /// Uniform sample in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        const SCALE: f64 = 1.0 / ((1u64 << 53) as f64);
        let bits = self.next_u64() >> 11;
        (bits as f64 * SCALE) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn policy() -> PrecisionPolicy {
        PrecisionPolicy::from_parameter_dtype(DType::F32)
    }

    #[test]
    fn zero_probability_is_identity() -> Result<()> {
        let dropout = Dropout::new(Some(0.0), 7)?;
        assert!(!dropout.is_active());
        let input = Tensor::randn(0f32, 1.0, (2, 3, 4), &Device::Cpu)?;
        let out = dropout.forward(&input, &policy())?;
        let diff = input.sub(&out)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn preserves_expectation_and_scales_survivors() -> Result<()> {
        let dropout = Dropout::new(Some(0.25), 123)?;
        let input = Tensor::ones((4, 2, 8, 16), DType::F32, &Device::Cpu)?;
        let values = dropout
            .forward(&input, &policy())?
            .flatten_all()?
            .to_vec1::<f32>()?;
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        assert!((mean - 1.0).abs() < 0.1);
        assert!(values
            .iter()
            .all(|v| *v == 0.0 || (*v - 1.0 / 0.75).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn equal_seeds_drop_equal_elements() -> Result<()> {
        let input = Tensor::ones((3, 5), DType::F32, &Device::Cpu)?;
        let a = Dropout::new(Some(0.5), 42)?.forward(&input, &policy())?;
        let b = Dropout::new(Some(0.5), 42)?.forward(&input, &policy())?;
        assert_eq!(a.to_vec2::<f32>()?, b.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn evaluation_mode_disables_dropout() -> Result<()> {
        let dropout = Dropout::new(Some(0.5), 0)?;
        dropout.set_training(false);
        let input = Tensor::randn(0f32, 1.0, (2, 2, 4), &Device::Cpu)?;
        let out = dropout.forward(&input, &policy())?;
        let diff = input.sub(&out)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_probability() {
        assert!(Dropout::new(Some(1.0), 0).is_err());
    }
}
