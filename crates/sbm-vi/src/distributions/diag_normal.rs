use candle_core::{Device, Tensor};
use sbm_core::{InitialStatePrior, Result, SbmError};

use crate::nn::normal_log_density;

/// Independent Gaussians over the state vector, used as the initial-state
/// prior.
#[derive(Debug, Clone)]
pub struct DiagonalNormal {
    mean: Tensor,
    std: Tensor,
    dim: usize,
}

impl DiagonalNormal {
    /// # Errors
    ///
    /// Returns [`SbmError::Data`] if `mean` and `std` differ in length or a
    /// standard deviation is not positive.
    pub fn new(mean: &[f64], std: &[f64], device: &Device) -> Result<Self> {
        if mean.len() != std.len() {
            return Err(SbmError::data(format!(
                "diagonal normal: mean has {} entries, std has {}",
                mean.len(),
                std.len()
            )));
        }
        if std.iter().any(|s| !(*s > 0.0)) {
            return Err(SbmError::data(format!(
                "diagonal normal: std must be positive, got {std:?}"
            )));
        }
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("DiagonalNormal::new: {e}"),
        };
        let d = mean.len();
        Ok(Self {
            mean: Tensor::from_slice(mean, (1, d), device).map_err(map_err)?,
            std: Tensor::from_slice(std, (1, d), device).map_err(map_err)?,
            dim: d,
        })
    }

    /// # Errors
    ///
    /// See [`DiagonalNormal::new`].
    pub fn from_initial_state(prior: &InitialStatePrior, device: &Device) -> Result<Self> {
        Self::new(prior.mean(), &prior.std_devs(), device)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// `[B, D] -> [B]`.
    pub fn log_prob(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        normal_log_density(x, &self.mean, &self.std)?.sum(1)
    }
}
