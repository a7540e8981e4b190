//! Truncated normal prior with inverse-CDF sampling.

use candle_core::{Device, Tensor};
use sbm_core::{PriorSpec, Result, SbmError};
use statrs::distribution::{ContinuousCDF, Normal};

use super::{check_noise_shape, ConstrainedDistribution, Support};
use crate::nn::normal_log_density;

/// Standardized truncation window of one coordinate.
///
/// Windows entirely in the upper tail are mirrored into the lower tail so the
/// CDF differences keep their precision.
#[derive(Debug, Clone, Copy)]
struct Window {
    cdf_lo: f64,
    cdf_hi: f64,
    alpha: f64,
    beta: f64,
    mirrored: bool,
}

/// `N(loc, scale)` restricted to `[lower, upper]`.
///
/// Sampling is reparameterized through `Phi^-1(Phi(alpha) + Phi(eps) * Z)`,
/// evaluated on the host since the parameters are constants.
#[derive(Debug, Clone)]
pub struct TruncatedNormal {
    names: Vec<String>,
    support: Support,
    loc: Vec<f64>,
    scale: Vec<f64>,
    windows: Vec<Window>,
    loc_t: Tensor,
    scale_t: Tensor,
    log_norm_t: Tensor,
    std_normal: Normal,
    device: Device,
}

impl TruncatedNormal {
    /// # Errors
    ///
    /// Returns [`SbmError::Config`] if a window has zero probability mass and
    /// [`SbmError::Backend`] if tensor creation fails.
    pub fn new(names: &[String], specs: &[PriorSpec], device: &Device) -> Result<Self> {
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("TruncatedNormal::new: {e}"),
        };
        let std_normal = Normal::new(0.0, 1.0)
            .map_err(|e| SbmError::config(format!("standard normal: {e}")))?;

        let mut windows = Vec::with_capacity(specs.len());
        let mut log_norm = Vec::with_capacity(specs.len());
        for (name, s) in names.iter().zip(specs) {
            let alpha = (s.lower - s.loc) / s.scale;
            let beta = (s.upper - s.loc) / s.scale;
            let mirrored = alpha > 0.0;
            let (a, b) = if mirrored { (-beta, -alpha) } else { (alpha, beta) };
            let cdf_lo = std_normal.cdf(a);
            let cdf_hi = std_normal.cdf(b);
            let mass = cdf_hi - cdf_lo;
            if mass <= 0.0 || !mass.is_finite() {
                return Err(SbmError::config(format!(
                    "truncated normal prior '{name}' has no mass inside [{}, {}]",
                    s.lower, s.upper
                )));
            }
            log_norm.push(mass.ln());
            windows.push(Window {
                cdf_lo,
                cdf_hi,
                alpha: a,
                beta: b,
                mirrored,
            });
        }

        let p = specs.len();
        let loc: Vec<f64> = specs.iter().map(|s| s.loc).collect();
        let scale: Vec<f64> = specs.iter().map(|s| s.scale).collect();
        Ok(Self {
            names: names.to_vec(),
            support: Support::new(specs, device).map_err(map_err)?,
            loc_t: Tensor::from_slice(&loc, (1, p), device).map_err(map_err)?,
            scale_t: Tensor::from_slice(&scale, (1, p), device).map_err(map_err)?,
            log_norm_t: Tensor::from_vec(log_norm, (1, p), device).map_err(map_err)?,
            loc,
            scale,
            windows,
            std_normal,
            device: device.clone(),
        })
    }

    fn quantile(&self, j: usize, eps: f64) -> f64 {
        let w = self.windows[j];
        let u = w.cdf_lo + self.std_normal.cdf(eps) * (w.cdf_hi - w.cdf_lo);
        let xi = self.std_normal.inverse_cdf(u).clamp(w.alpha, w.beta);
        let xi = if w.mirrored { -xi } else { xi };
        let lower = self.support.lower()[j];
        let upper = self.support.upper()[j];
        let margin = 1e-12 * (upper - lower);
        (self.loc[j] + self.scale[j] * xi).clamp(lower + margin, upper - margin)
    }

    fn density(&self, theta: &Tensor) -> candle_core::Result<Tensor> {
        let log_p = normal_log_density(theta, &self.loc_t, &self.scale_t)?
            .broadcast_sub(&self.log_norm_t)?
            .sum(1)?;
        self.support.mask_outside(theta, &log_p)
    }
}

impl ConstrainedDistribution for TruncatedNormal {
    fn param_names(&self) -> &[String] {
        &self.names
    }

    fn lower(&self) -> &[f64] {
        self.support.lower()
    }

    fn upper(&self) -> &[f64] {
        self.support.upper()
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn is_trainable(&self) -> bool {
        false
    }

    fn sample_from_noise(&self, eps: &Tensor) -> Result<(Tensor, Tensor)> {
        check_noise_shape(eps, self.dim(), "TruncatedNormal")?;
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("TruncatedNormal::sample_from_noise: {e}"),
        };
        let rows = eps.to_vec2::<f64>().map_err(map_err)?;
        let batch = rows.len();
        let values: Vec<f64> = rows
            .iter()
            .flat_map(|row| row.iter().enumerate().map(|(j, e)| self.quantile(j, *e)))
            .collect();
        let theta = Tensor::from_vec(values, (batch, self.dim()), &self.device).map_err(map_err)?;
        let log_p = self.density(&theta).map_err(map_err)?;
        Ok((theta, log_p))
    }

    fn log_prob(&self, values: &Tensor) -> Result<Tensor> {
        self.density(values).map_err(|e| SbmError::Backend {
            message: format!("TruncatedNormal::log_prob: {e}"),
        })
    }
}
