//! Constrained probability distributions over the parameter vector.
//!
//! Every family maps an unconstrained Gaussian draw into the finite support
//! `(lower, upper)` of each parameter, so samples can never leave the support.
//! Densities include the Jacobian of that map.
//!
//! ## Families
//!
//! | Name                      | Role             | Trainable |
//! |---------------------------|------------------|-----------|
//! | `RescaledLogitNormal`     | prior, posterior | posterior |
//! | `TruncatedNormal`         | prior            | no        |
//! | `MultivariateLogitNormal` | posterior        | yes       |
//!
//! [`DiagonalNormal`] is the unconstrained initial-state prior.

mod diag_normal;
mod logit_normal;
mod mv_logit_normal;
mod truncated_normal;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use rand::RngCore;
use sbm_core::{PriorBundle, PriorSpec, Result, SbmError};

use crate::nn::{log_sigmoid, standard_normal, DTYPE};

pub use diag_normal::DiagonalNormal;
pub use logit_normal::RescaledLogitNormal;
pub use mv_logit_normal::MultivariateLogitNormal;
pub use truncated_normal::TruncatedNormal;

/// Logit-space values are clipped to `[-Z_CLIP, Z_CLIP]`.
pub const Z_CLIP: f64 = 25.0;

/// A distribution over a bounded parameter vector.
///
/// Values are `[batch, dim]` tensors; densities are `[batch]`.
pub trait ConstrainedDistribution: fmt::Debug {
    fn param_names(&self) -> &[String];

    fn lower(&self) -> &[f64];

    fn upper(&self) -> &[f64];

    fn device(&self) -> &Device;

    /// Whether the distribution owns optimizer-visible variables.
    fn is_trainable(&self) -> bool;

    fn dim(&self) -> usize {
        self.param_names().len()
    }

    /// Maps standard normal noise `[batch, dim]` to `(values, log_density)`.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Data`] on a noise shape mismatch and
    /// [`SbmError::Backend`] on tensor failures.
    fn sample_from_noise(&self, eps: &Tensor) -> Result<(Tensor, Tensor)>;

    /// Log-density at arbitrary points; `-inf` for points outside the support.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Backend`] on tensor failures.
    fn log_prob(&self, values: &Tensor) -> Result<Tensor>;

    /// Reparameterized draws using noise from `rng`.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`ConstrainedDistribution::sample_from_noise`].
    fn sample(&self, batch_size: usize, rng: &mut dyn RngCore) -> Result<(Tensor, Tensor)> {
        let eps = standard_normal(rng, (batch_size, self.dim()), self.device()).map_err(|e| {
            SbmError::Backend {
                message: format!("sample: {e}"),
            }
        })?;
        self.sample_from_noise(&eps)
    }

    /// Monte Carlo estimate of the mean from `n_samples` draws.
    ///
    /// # Errors
    ///
    /// Propagates sampling errors.
    fn mean_estimate(&self, n_samples: usize, rng: &mut dyn RngCore) -> Result<Vec<f64>> {
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("mean_estimate: {e}"),
        };
        let (values, _) = self.sample(n_samples.max(1), rng)?;
        values
            .mean(0)
            .map_err(map_err)?
            .to_vec1::<f64>()
            .map_err(map_err)
    }
}

/// Prior family selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorFamily {
    RescaledLogitNormal,
    TruncatedNormal,
}

impl FromStr for PriorFamily {
    type Err = SbmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RescaledLogitNormal" => Ok(Self::RescaledLogitNormal),
            "TruncatedNormal" => Ok(Self::TruncatedNormal),
            other => Err(SbmError::config(format!(
                "unknown prior family '{other}' (expected RescaledLogitNormal or TruncatedNormal)"
            ))),
        }
    }
}

/// Posterior family selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosteriorFamily {
    MultivariateLogitNormal,
    RescaledLogitNormal,
}

impl FromStr for PosteriorFamily {
    type Err = SbmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MultivariateLogitNormal" => Ok(Self::MultivariateLogitNormal),
            "RescaledLogitNormal" => Ok(Self::RescaledLogitNormal),
            other => Err(SbmError::config(format!(
                "unknown posterior family '{other}' \
                 (expected MultivariateLogitNormal or RescaledLogitNormal)"
            ))),
        }
    }
}

/// Bijection between logit space and the box `(lower, upper)`.
///
/// `theta = lower + width * sigmoid(z)`, with
/// `ln |dtheta/dz| = ln width + ln sigmoid(z) + ln sigmoid(-z)`.
#[derive(Debug, Clone)]
pub(crate) struct Support {
    lower: Vec<f64>,
    upper: Vec<f64>,
    lower_t: Tensor,
    upper_t: Tensor,
    width_t: Tensor,
    log_width_t: Tensor,
}

impl Support {
    pub(crate) fn new(specs: &[PriorSpec], device: &Device) -> candle_core::Result<Self> {
        let lower: Vec<f64> = specs.iter().map(|s| s.lower).collect();
        let upper: Vec<f64> = specs.iter().map(|s| s.upper).collect();
        let width: Vec<f64> = specs.iter().map(PriorSpec::width).collect();
        let log_width: Vec<f64> = width.iter().map(|w| w.ln()).collect();
        let p = specs.len();
        Ok(Self {
            lower_t: Tensor::from_slice(&lower, (1, p), device)?,
            upper_t: Tensor::from_slice(&upper, (1, p), device)?,
            width_t: Tensor::from_vec(width, (1, p), device)?,
            log_width_t: Tensor::from_vec(log_width, (1, p), device)?,
            lower,
            upper,
        })
    }

    pub(crate) fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub(crate) fn upper(&self) -> &[f64] {
        &self.upper
    }

    fn log_jacobian(&self, z: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let ls_pos = log_sigmoid(z)?;
        let ls_neg = log_sigmoid(&z.neg()?)?;
        let log_det = (&ls_pos + ls_neg)?.broadcast_add(&self.log_width_t)?.sum(1)?;
        Ok((ls_pos, log_det))
    }

    /// Logit space to constrained space; returns `(theta, log_det [B])`.
    pub(crate) fn forward(&self, z: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let z = z.clamp(-Z_CLIP, Z_CLIP)?;
        let (ls_pos, log_det) = self.log_jacobian(&z)?;
        let theta = ls_pos
            .exp()?
            .broadcast_mul(&self.width_t)?
            .broadcast_add(&self.lower_t)?;
        Ok((theta, log_det))
    }

    /// Constrained space to clipped logit space; returns `(z, log_det [B])`.
    pub(crate) fn inverse(&self, theta: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let u_min = (-Z_CLIP).exp();
        let u = theta
            .broadcast_sub(&self.lower_t)?
            .broadcast_div(&self.width_t)?
            .clamp(u_min, 1.0 - u_min)?;
        let z = (u.log()? - u.affine(-1.0, 1.0)?.log()?)?.clamp(-Z_CLIP, Z_CLIP)?;
        let (_, log_det) = self.log_jacobian(&z)?;
        Ok((z, log_det))
    }

    /// Replaces `log_p` by `-inf` for every row with a coordinate outside the box.
    pub(crate) fn mask_outside(
        &self,
        theta: &Tensor,
        log_p: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let below = theta.broadcast_lt(&self.lower_t)?.to_dtype(DTYPE)?;
        let above = theta.broadcast_gt(&self.upper_t)?.to_dtype(DTYPE)?;
        let outside = (below + above)?.sum(1)?;
        let inside = outside.eq(0.0)?;
        let neg_inf = Tensor::full(f64::NEG_INFINITY, log_p.shape(), log_p.device())?;
        inside.where_cond(log_p, &neg_inf)
    }
}

pub(crate) fn check_noise_shape(eps: &Tensor, dim: usize, who: &str) -> Result<()> {
    match eps.dims() {
        [_, d] if *d == dim => Ok(()),
        other => Err(SbmError::data(format!(
            "{who}: noise must be [batch, {dim}], got {other:?}"
        ))),
    }
}

/// Builds the fixed prior over `names`.
///
/// # Errors
///
/// Returns [`SbmError::Config`] when `specs` and `names` disagree in length.
pub fn build_prior(
    family: PriorFamily,
    names: &[String],
    specs: &[PriorSpec],
    device: &Device,
) -> Result<Box<dyn ConstrainedDistribution>> {
    if names.len() != specs.len() {
        return Err(SbmError::config(format!(
            "prior has {} names but {} specs",
            names.len(),
            specs.len()
        )));
    }
    Ok(match family {
        PriorFamily::RescaledLogitNormal => {
            Box::new(RescaledLogitNormal::fixed(names, specs, device)?)
        }
        PriorFamily::TruncatedNormal => Box::new(TruncatedNormal::new(names, specs, device)?),
    })
}

/// Logit-space `(loc, scale)` initial values for a posterior matching `spec`.
pub fn logit_space_init(prior: PriorFamily, spec: &PriorSpec) -> (f64, f64) {
    match prior {
        PriorFamily::RescaledLogitNormal => (spec.loc, spec.scale.clamp(1e-3, 1.0)),
        PriorFamily::TruncatedNormal => {
            let u = ((spec.loc - spec.lower) / spec.width()).clamp(0.01, 0.99);
            let scale = spec.scale / (spec.width() * u * (1.0 - u));
            ((u / (1.0 - u)).ln(), scale.clamp(1e-3, 1.0))
        }
    }
}

/// Builds the trainable posterior over `names`, registering its variables in
/// `var_map` and initializing it from the prior.
///
/// # Errors
///
/// Returns [`SbmError::Config`] on a length mismatch and
/// [`SbmError::Backend`] if variable creation fails.
pub fn build_posterior(
    family: PosteriorFamily,
    prior_family: PriorFamily,
    names: &[String],
    specs: &[PriorSpec],
    var_map: &VarMap,
    device: &Device,
) -> Result<Box<dyn ConstrainedDistribution>> {
    if names.len() != specs.len() {
        return Err(SbmError::config(format!(
            "posterior has {} names but {} specs",
            names.len(),
            specs.len()
        )));
    }
    let (loc, scale): (Vec<f64>, Vec<f64>) = specs
        .iter()
        .map(|s| logit_space_init(prior_family, s))
        .unzip();
    Ok(match family {
        PosteriorFamily::MultivariateLogitNormal => Box::new(MultivariateLogitNormal::new(
            var_map, "q_theta", names, specs, &loc, &scale, device,
        )?),
        PosteriorFamily::RescaledLogitNormal => Box::new(RescaledLogitNormal::trainable(
            var_map, "q_theta", names, specs, &loc, &scale, device,
        )?),
    })
}

/// Reads a prior bundle from a safetensors file mapping each parameter name
/// to a `[loc, scale, lower, upper]` vector.
///
/// # Errors
///
/// Returns [`SbmError::Config`] if the file cannot be read or an entry is
/// malformed.
pub fn load_prior_safetensors<P: AsRef<Path>>(path: P) -> Result<PriorBundle> {
    let path = path.as_ref();
    let tensors = candle_core::safetensors::load(path, &Device::Cpu).map_err(|e| {
        SbmError::config(format!("cannot read prior file {}: {e}", path.display()))
    })?;
    let mut bundle = PriorBundle::new();
    for (name, tensor) in tensors {
        let values = tensor
            .flatten_all()
            .and_then(|t| t.to_dtype(DTYPE))
            .and_then(|t| t.to_vec1::<f64>())
            .map_err(|e| SbmError::config(format!("prior '{name}' is not numeric: {e}")))?;
        let spec = PriorSpec::from_slice(&name, &values)?;
        bundle.insert(name, spec)?;
    }
    Ok(bundle)
}

/// Writes `bundle` in the layout read by [`load_prior_safetensors`].
///
/// # Errors
///
/// Returns [`SbmError::Backend`] if serialization fails.
pub fn save_prior_safetensors<P: AsRef<Path>>(bundle: &PriorBundle, path: P) -> Result<()> {
    let map_err = |e: candle_core::Error| SbmError::Backend {
        message: format!("save_prior_safetensors: {e}"),
    };
    let mut tensors = HashMap::new();
    for name in bundle.names() {
        if let Some(s) = bundle.get(name) {
            let t = Tensor::new(&[s.loc, s.scale, s.lower, s.upper], &Device::Cpu)
                .map_err(map_err)?;
            tensors.insert(name.to_string(), t);
        }
    }
    candle_core::safetensors::save(&tensors, path.as_ref()).map_err(map_err)
}

#[cfg(test)]
pub(crate) mod test_support {
    use sbm_core::PriorSpec;

    pub fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("p{i}")).collect()
    }

    pub fn specs() -> Vec<PriorSpec> {
        vec![
            PriorSpec { loc: 0.5, scale: 0.3, lower: 0.1, upper: 0.9 },
            PriorSpec { loc: 5e-5, scale: 3e-5, lower: 1e-5, upper: 1e-4 },
            PriorSpec { loc: 1.0, scale: 2.0, lower: 0.5, upper: 3.0 },
        ]
    }
}
