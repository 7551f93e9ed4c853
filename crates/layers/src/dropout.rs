//! Dropout with an explicit train/eval switch.
//!
//! Whether dropout fires is decided by the [`Mode`] passed into each forward
//! call rather than by state stored on the layer. Masks are sampled from a
//! seeded RNG so training-mode runs can be reproduced exactly.

use std::{fmt, sync::Mutex};

use candle_core::{DType, Error, Result, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Execution mode for stochastic layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Regularisation is active.
    Train,
    /// Deterministic inference.
    #[default]
    Eval,
}

impl Mode {
    pub fn is_train(self) -> bool {
        matches!(self, Mode::Train)
    }
}

/// Inverted dropout: survivors are scaled by `1 / (1 - p)`.
pub struct Dropout {
    probability: f32,
    rng: Mutex<StdRng>,
}

impl fmt::Debug for Dropout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dropout")
            .field("probability", &self.probability)
            .finish()
    }
}

impl Dropout {
    /// Builds a dropout layer; `probability` must lie in `[0, 1)`.
    pub fn new(probability: f32, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(Error::Msg(format!(
                "dropout probability must be in [0, 1), got {probability}"
            )));
        }
        Ok(Self {
            probability,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    /// A dropout layer that never drops anything.
    pub fn disabled() -> Self {
        Self {
            probability: 0.0,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    /// Applies dropout when `mode` is [`Mode::Train`] and the probability is non-zero.
    pub fn forward(&self, tensor: &Tensor, mode: Mode) -> Result<Tensor> {
        if !mode.is_train() || self.probability == 0.0 {
            return Ok(tensor.clone());
        }

        let keep_prob = 1.0 - self.probability;
        let total = tensor.elem_count();
        let mask_data = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| Error::Msg("dropout RNG mutex poisoned".into()))?;
            (0..total)
                .map(|_| {
                    if rng.gen::<f32>() < keep_prob {
                        1.0 / keep_prob
                    } else {
                        0.0
                    }
                })
                .collect::<Vec<f32>>()
        };
        let mask = Tensor::from_vec(mask_data, tensor.dims(), tensor.device())?;
        let dtype = tensor.dtype();
        tensor
            .to_dtype(DType::F32)?
            .mul(&mask)?
            .to_dtype(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn eval_mode_is_identity() -> Result<()> {
        let input = Tensor::randn(0f32, 1.0, (2, 4, 4), &Device::Cpu)?;
        let dropout = Dropout::new(0.5, 7)?;
        let output = dropout.forward(&input, Mode::Eval)?;
        assert_eq!(
            output.flatten_all()?.to_vec1::<f32>()?,
            input.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn zero_probability_is_identity_in_training() -> Result<()> {
        let input = Tensor::ones((3, 3), DType::F32, &Device::Cpu)?;
        let output = Dropout::disabled().forward(&input, Mode::Train)?;
        assert_eq!(output.sum_all()?.to_vec0::<f32>()?, 9.0);
        Ok(())
    }

    #[test]
    fn training_mode_zeros_and_rescales() -> Result<()> {
        let input = Tensor::ones((64, 64), DType::F32, &Device::Cpu)?;
        let dropout = Dropout::new(0.5, 11)?;
        let values = dropout
            .forward(&input, Mode::Train)?
            .flatten_all()?
            .to_vec1::<f32>()?;

        assert!(values.iter().all(|v| *v == 0.0 || (*v - 2.0).abs() < 1e-6));
        let dropped = values.iter().filter(|v| **v == 0.0).count();
        let fraction = dropped as f32 / values.len() as f32;
        assert!((0.4..0.6).contains(&fraction), "dropped fraction {fraction}");
        Ok(())
    }

    #[test]
    fn same_seed_same_mask() -> Result<()> {
        let input = Tensor::ones((8, 8), DType::F32, &Device::Cpu)?;
        let a = Dropout::new(0.3, 5)?.forward(&input, Mode::Train)?;
        let b = Dropout::new(0.3, 5)?.forward(&input, Mode::Train)?;
        assert_eq!(
            a.flatten_all()?.to_vec1::<f32>()?,
            b.flatten_all()?.to_vec1::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn probability_is_validated() {
        assert!(Dropout::new(1.0, 0).is_err());
        assert!(Dropout::new(-0.1, 0).is_err());
        assert!(Dropout::new(0.0, 0).is_ok());
    }
}
