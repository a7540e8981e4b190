//! Amortized sampler over latent trajectories, conditioned on theta.
//!
//! ## Structure
//!
//! ```text
//! eps [B, n, D] ──► L x AutoregressiveAffine ──► v
//!               ──► increments: z_0 = m_0 + s_0 v_0, z_t = z_{t-1} + s v_t
//!               ──► x = x_scale * softplus(z),  x_scale = x0_mean / ln 2
//! ```
//!
//! With `reverse` the affine layers run from the last step to the first
//! (features reversed) and their output is flipped back before the
//! increments are assembled. The density of a sample is the base-noise
//! density minus the log-Jacobian of every stage; [`PathFlow::log_prob`]
//! recomputes it from a trajectory by inverting each stage.

mod features;
mod layer;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use rand::RngCore;
use sbm_core::{Result, SbmError, TrainConfig};
use serde::{Deserialize, Serialize};

use crate::nn::{
    log_sigmoid, register_var, reverse_along, softplus, softplus_inverse, softplus_inverse_f64,
    standard_normal, std_normal_log_density, sum_per_sample,
};

pub use features::conditioning_features;
pub use layer::{AutoregressiveAffine, LayerPass};

/// `dx/dz` of the output map at `z = 0` is `x0_mean / X0_SPREAD`.
const X0_SPREAD: f64 = 2.0 * std::f64::consts::LN_2;

/// Flow architecture options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Autoregressive layers (default: 5).
    pub num_layers: usize,
    /// Recurrent hidden width (default: 32).
    pub hidden_dim: usize,
    /// Run the layers backward in time (default: true).
    pub reverse: bool,
    /// Advance hidden states from base noise instead of outputs.
    pub base_state: bool,
    /// Initial per-step increment scale (default: 0.01).
    pub increment_scale: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self::from(&TrainConfig::default())
    }
}

impl From<&TrainConfig> for FlowConfig {
    fn from(config: &TrainConfig) -> Self {
        Self {
            num_layers: config.num_layers,
            hidden_dim: config.hidden_dim,
            reverse: config.reverse,
            base_state: config.base_state,
            increment_scale: config.increment_scale,
        }
    }
}

/// A trajectory draw with its density decomposition.
#[derive(Debug, Clone)]
pub struct FlowSample {
    /// `[B, n, D]`, strictly positive.
    pub trajectory: Tensor,
    /// `ln q(x | theta)`, `[B]`.
    pub log_prob: Tensor,
    /// Standard normal log-density of the base noise, `[B]`.
    pub base_log_prob: Tensor,
    /// Log-Jacobians `[B]`: one per affine layer, then the increment
    /// assembly, then the output map.
    pub log_dets: Vec<Tensor>,
}

/// Autoregressive normalizing flow over `[n, D]` trajectories.
#[derive(Debug, Clone)]
pub struct PathFlow {
    layers: Vec<AutoregressiveAffine>,
    features: Tensor,
    m0: Tensor,
    s0_raw: Tensor,
    step_raw: Tensor,
    x_scale: Tensor,
    log_x_scale_sum: f64,
    steps: usize,
    dim: usize,
    reverse: bool,
    device: Device,
}

impl PathFlow {
    /// Creates a flow whose variables live in `var_map`.
    ///
    /// `features` is the `[n, C]` matrix from [`conditioning_features`] and
    /// `num_params` the width of theta used as context. Weight
    /// initialization draws from `rng`.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Config`] for zero layers or hidden width,
    /// [`SbmError::Data`] for a bad initial mean, and [`SbmError::Backend`]
    /// if variable creation fails.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        var_map: &VarMap,
        config: &FlowConfig,
        features: Tensor,
        x0_mean: &[f64],
        x0_error_scale: f64,
        num_params: usize,
        rng: &mut dyn RngCore,
        device: &Device,
    ) -> Result<Self> {
        if config.num_layers == 0 || config.hidden_dim == 0 {
            return Err(SbmError::config("flow needs at least one layer and hidden unit"));
        }
        if x0_mean.iter().any(|m| !(*m > 0.0)) {
            return Err(SbmError::data(format!(
                "flow output scale needs a positive initial mean, got {x0_mean:?}"
            )));
        }
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("PathFlow::new: {e}"),
        };
        let (steps, feature_dim) = features.dims2().map_err(map_err)?;
        let dim = x0_mean.len();

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            layers.push(
                AutoregressiveAffine::new(
                    var_map,
                    &format!("flow.layer_{i}"),
                    dim,
                    config.hidden_dim,
                    feature_dim,
                    num_params,
                    config.base_state,
                    rng,
                    device,
                )
                .map_err(map_err)?,
            );
        }

        let x_scale: Vec<f64> = x0_mean.iter().map(|m| m / std::f64::consts::LN_2).collect();
        let log_x_scale_sum = steps as f64 * x_scale.iter().map(|s| s.ln()).sum::<f64>();
        let s0 = softplus_inverse_f64(x0_error_scale * X0_SPREAD);
        let step = softplus_inverse_f64(config.increment_scale);
        let row = |v: f64| Tensor::from_vec(vec![v; dim], (1, dim), device);

        let features = if config.reverse {
            reverse_along(&features, 0).map_err(map_err)?
        } else {
            features
        };

        Ok(Self {
            layers,
            features,
            m0: register_var(var_map, "flow.m0", &row(0.0).map_err(map_err)?).map_err(map_err)?,
            s0_raw: register_var(var_map, "flow.s0", &row(s0).map_err(map_err)?)
                .map_err(map_err)?,
            step_raw: register_var(var_map, "flow.step", &row(step).map_err(map_err)?)
                .map_err(map_err)?,
            x_scale: Tensor::from_vec(x_scale, (1, 1, dim), device).map_err(map_err)?,
            log_x_scale_sum,
            steps,
            dim,
            reverse: config.reverse,
            device: device.clone(),
        })
    }

    /// Grid points per trajectory.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn state_dim(&self) -> usize {
        self.dim
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn context(theta: &Tensor) -> candle_core::Result<Tensor> {
        theta.abs()?.maximum(1e-30)?.log()
    }

    /// Per-step increment scales `[1, n, D]`: `s_0` at step 0, `s` after.
    fn increment_scales(&self) -> candle_core::Result<(Tensor, Tensor)> {
        let s0 = softplus(&self.s0_raw)?;
        let step = softplus(&self.step_raw)?;
        let rest = step.unsqueeze(1)?.broadcast_as((1, self.steps - 1, self.dim))?;
        let scales = Tensor::cat(&[s0.unsqueeze(1)?, rest.contiguous()?], 1)?;
        let step_log_det = (step.log()?.sum_all()? * (self.steps - 1) as f64)?;
        let log_det = (s0.log()?.sum_all()? + step_log_det)?;
        Ok((scales, log_det))
    }

    fn sample_inner(&self, eps: &Tensor, theta: &Tensor) -> candle_core::Result<FlowSample> {
        let batch = eps.dim(0)?;
        let context = Self::context(theta)?;
        let base_log_prob = sum_per_sample(&std_normal_log_density(eps)?)?;

        let mut v = if self.reverse {
            reverse_along(eps, 1)?
        } else {
            eps.clone()
        };
        let mut log_dets = Vec::with_capacity(self.layers.len() + 2);
        for layer in &self.layers {
            let pass = layer.forward(&v, &self.features, &context)?;
            v = pass.output;
            log_dets.push(pass.log_det);
        }
        if self.reverse {
            v = reverse_along(&v, 1)?;
        }

        let (scales, scale_log_det) = self.increment_scales()?;
        let z = v
            .broadcast_mul(&scales)?
            .cumsum(1)?
            .broadcast_add(&self.m0.unsqueeze(1)?)?;
        log_dets.push(scale_log_det.broadcast_as(batch)?.contiguous()?);

        let trajectory = softplus(&z)?.broadcast_mul(&self.x_scale)?;
        let out_log_det = (sum_per_sample(&log_sigmoid(&z)?)? + self.log_x_scale_sum)?;
        log_dets.push(out_log_det);

        let mut log_prob = base_log_prob.clone();
        for ld in &log_dets {
            log_prob = (log_prob - ld)?;
        }
        Ok(FlowSample {
            trajectory,
            log_prob,
            base_log_prob,
            log_dets,
        })
    }

    /// Transforms base noise `[B, n, D]` under parameters `theta [B, P]`.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Data`] on a noise shape mismatch and
    /// [`SbmError::Backend`] on tensor failures.
    pub fn sample_from_noise(&self, eps: &Tensor, theta: &Tensor) -> Result<FlowSample> {
        match eps.dims() {
            [_, n, d] if *n == self.steps && *d == self.dim => {}
            other => {
                return Err(SbmError::data(format!(
                    "flow noise must be [batch, {}, {}], got {other:?}",
                    self.steps, self.dim
                )))
            }
        }
        self.sample_inner(eps, theta).map_err(|e| SbmError::Backend {
            message: format!("PathFlow::sample_from_noise: {e}"),
        })
    }

    /// Draws one trajectory per row of `theta`.
    ///
    /// # Errors
    ///
    /// See [`PathFlow::sample_from_noise`].
    pub fn sample(&self, theta: &Tensor, rng: &mut dyn RngCore) -> Result<FlowSample> {
        let batch = theta.dim(0).map_err(|e| SbmError::Backend {
            message: format!("PathFlow::sample: {e}"),
        })?;
        let eps = standard_normal(rng, (batch, self.steps, self.dim), &self.device).map_err(|e| {
            SbmError::Backend {
                message: format!("PathFlow::sample: {e}"),
            }
        })?;
        self.sample_from_noise(&eps, theta)
    }

    fn log_prob_inner(&self, x: &Tensor, theta: &Tensor) -> candle_core::Result<Tensor> {
        let context = Self::context(theta)?;
        let z = softplus_inverse(&x.broadcast_div(&self.x_scale)?)?;
        let out_log_det = (sum_per_sample(&log_sigmoid(&z)?)? + self.log_x_scale_sum)?;

        let (scales, scale_log_det) = self.increment_scales()?;
        let first = z.narrow(1, 0, 1)?.broadcast_sub(&self.m0.unsqueeze(1)?)?;
        let rest = (z.narrow(1, 1, self.steps - 1)? - z.narrow(1, 0, self.steps - 1)?)?;
        let mut v = Tensor::cat(&[first, rest], 1)?.broadcast_div(&scales)?;

        if self.reverse {
            v = reverse_along(&v, 1)?;
        }
        let mut log_det = (out_log_det.broadcast_add(&scale_log_det))?;
        for layer in self.layers.iter().rev() {
            let pass = layer.inverse(&v, &self.features, &context)?;
            v = pass.output;
            log_det = (log_det + pass.log_det)?;
        }
        let base = sum_per_sample(&std_normal_log_density(&v)?)?;
        base - log_det
    }

    /// `ln q(x | theta)` for trajectories `x [B, n, D]`, recomputed by
    /// inverting every stage.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Backend`] on tensor failures.
    pub fn log_prob(&self, x: &Tensor, theta: &Tensor) -> Result<Tensor> {
        self.log_prob_inner(x, theta).map_err(|e| SbmError::Backend {
            message: format!("PathFlow::log_prob: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    const N: usize = 7;

    fn flow(config: &FlowConfig, var_map: &VarMap, rng: &mut StdRng) -> PathFlow {
        let features = standard_normal(rng, (N, 5), &Device::Cpu).unwrap();
        PathFlow::new(var_map, config, features, &[50.0, 0.1, 1.0], 0.1, 4, rng, &Device::Cpu)
            .unwrap()
    }

    fn perturb(var_map: &VarMap, rng: &mut StdRng) {
        for var in var_map.all_vars() {
            let noise = standard_normal(rng, var.dims(), &Device::Cpu).unwrap();
            var.set(&(var.as_tensor() + (noise * 0.05).unwrap()).unwrap()).unwrap();
        }
    }

    fn theta(rng: &mut StdRng) -> Tensor {
        standard_normal(rng, (3, 4), &Device::Cpu).unwrap().exp().unwrap()
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f64 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f64>()
            .unwrap()
    }

    #[test]
    fn log_density_decomposes_and_matches_inverse() {
        for (reverse, base_state) in [(false, false), (true, false), (true, true), (false, true)] {
            let mut rng = StdRng::seed_from_u64(9);
            let var_map = VarMap::new();
            let config = FlowConfig {
                num_layers: 2,
                hidden_dim: 6,
                reverse,
                base_state,
                increment_scale: 0.01,
            };
            let f = flow(&config, &var_map, &mut rng);
            perturb(&var_map, &mut rng);
            let theta = theta(&mut rng);
            let sample = f.sample(&theta, &mut rng).unwrap();
            assert_eq!(sample.trajectory.dims(), &[3, N, 3]);
            assert_eq!(sample.log_dets.len(), 4);

            let mut expected = sample.base_log_prob.clone();
            for ld in &sample.log_dets {
                expected = (expected - ld).unwrap();
            }
            assert!(max_abs_diff(&expected, &sample.log_prob) < 1e-9);

            let recomputed = f.log_prob(&sample.trajectory, &theta).unwrap();
            let err = max_abs_diff(&recomputed, &sample.log_prob);
            assert!(err < 1e-6, "reverse={reverse} base_state={base_state}: {err}");
        }
    }

    #[test]
    fn fresh_flow_starts_near_initial_mean() {
        let mut rng = StdRng::seed_from_u64(4);
        let var_map = VarMap::new();
        let f = flow(&FlowConfig::default(), &var_map, &mut rng);
        let eps = Tensor::zeros((1, N, 3), crate::nn::DTYPE, &Device::Cpu).unwrap();
        let sample = f.sample_from_noise(&eps, &theta(&mut rng).narrow(0, 0, 1).unwrap()).unwrap();
        let x = sample.trajectory.to_vec3::<f64>().unwrap();
        for t in 0..N {
            assert!((x[0][t][0] - 50.0).abs() < 1e-6);
            assert!((x[0][t][1] - 0.1).abs() < 1e-9);
        }
    }

    #[test]
    fn trajectories_are_positive() {
        let mut rng = StdRng::seed_from_u64(2);
        let var_map = VarMap::new();
        let f = flow(&FlowConfig::default(), &var_map, &mut rng);
        let eps = (standard_normal(&mut rng, (3, N, 3), &Device::Cpu).unwrap() * 50.0).unwrap();
        let sample = f.sample_from_noise(&eps, &theta(&mut rng)).unwrap();
        let x = sample.trajectory.flatten_all().unwrap().to_vec1::<f64>().unwrap();
        assert!(x.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn wrong_noise_shape_is_data_error() {
        let mut rng = StdRng::seed_from_u64(2);
        let var_map = VarMap::new();
        let f = flow(&FlowConfig::default(), &var_map, &mut rng);
        let eps = Tensor::zeros((3, N + 1, 3), crate::nn::DTYPE, &Device::Cpu).unwrap();
        assert!(matches!(
            f.sample_from_noise(&eps, &theta(&mut rng)),
            Err(SbmError::Data { .. })
        ));
    }
}
