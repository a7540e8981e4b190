//! Rescaled logit-normal: independent Gaussians in logit space pushed through
//! the support bijection.

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use sbm_core::{PriorSpec, Result, SbmError};

use super::{check_noise_shape, ConstrainedDistribution, Support};
use crate::nn::{normal_log_density, register_var, std_normal_log_density};

/// `theta = lower + (upper - lower) * sigmoid(z)`, `z ~ N(loc, scale)`.
///
/// As a prior `loc` and `scale` are constants taken from the prior bundle; as
/// a mean-field posterior they are variables registered in a [`VarMap`]
/// (`scale` parameterized through its logarithm).
#[derive(Debug, Clone)]
pub struct RescaledLogitNormal {
    names: Vec<String>,
    support: Support,
    loc: Tensor,
    log_scale: Tensor,
    trainable: bool,
    device: Device,
}

impl RescaledLogitNormal {
    /// Fixed distribution using each spec's `loc` and `scale` in logit space.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Backend`] if tensor creation fails.
    pub fn fixed(names: &[String], specs: &[PriorSpec], device: &Device) -> Result<Self> {
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("RescaledLogitNormal::fixed: {e}"),
        };
        let p = specs.len();
        let loc: Vec<f64> = specs.iter().map(|s| s.loc).collect();
        let log_scale: Vec<f64> = specs.iter().map(|s| s.scale.ln()).collect();
        Ok(Self {
            names: names.to_vec(),
            support: Support::new(specs, device).map_err(map_err)?,
            loc: Tensor::from_vec(loc, (1, p), device).map_err(map_err)?,
            log_scale: Tensor::from_vec(log_scale, (1, p), device).map_err(map_err)?,
            trainable: false,
            device: device.clone(),
        })
    }

    /// Trainable mean-field distribution registered under `prefix` in
    /// `var_map`, starting at the given logit-space `loc` and `scale`.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Backend`] if variable creation fails.
    pub fn trainable(
        var_map: &VarMap,
        prefix: &str,
        names: &[String],
        specs: &[PriorSpec],
        loc: &[f64],
        scale: &[f64],
        device: &Device,
    ) -> Result<Self> {
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("RescaledLogitNormal::trainable: {e}"),
        };
        let p = specs.len();
        let log_scale: Vec<f64> = scale.iter().map(|s| s.ln()).collect();
        let loc_init = Tensor::from_slice(loc, (1, p), device).map_err(map_err)?;
        let log_scale_init = Tensor::from_vec(log_scale, (1, p), device).map_err(map_err)?;
        Ok(Self {
            names: names.to_vec(),
            support: Support::new(specs, device).map_err(map_err)?,
            loc: register_var(var_map, &format!("{prefix}.loc"), &loc_init).map_err(map_err)?,
            log_scale: register_var(var_map, &format!("{prefix}.log_scale"), &log_scale_init)
                .map_err(map_err)?,
            trainable: true,
            device: device.clone(),
        })
    }

    fn forward(&self, eps: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let scale = self.log_scale.exp()?;
        let z = eps.broadcast_mul(&scale)?.broadcast_add(&self.loc)?;
        let (theta, log_det) = self.support.forward(&z)?;
        let base = std_normal_log_density(eps)?
            .broadcast_sub(&self.log_scale)?
            .sum(1)?;
        Ok((theta, (base - log_det)?))
    }

    fn density(&self, theta: &Tensor) -> candle_core::Result<Tensor> {
        let (z, log_det) = self.support.inverse(theta)?;
        let log_n = normal_log_density(&z, &self.loc, &self.log_scale.exp()?)?.sum(1)?;
        self.support.mask_outside(theta, &(log_n - log_det)?)
    }
}

impl ConstrainedDistribution for RescaledLogitNormal {
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
        self.trainable
    }

    fn sample_from_noise(&self, eps: &Tensor) -> Result<(Tensor, Tensor)> {
        check_noise_shape(eps, self.dim(), "RescaledLogitNormal")?;
        self.forward(eps).map_err(|e| SbmError::Backend {
            message: format!("RescaledLogitNormal::sample_from_noise: {e}"),
        })
    }

    fn log_prob(&self, values: &Tensor) -> Result<Tensor> {
        self.density(values).map_err(|e| SbmError::Backend {
            message: format!("RescaledLogitNormal::log_prob: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{names, specs};
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_noise_maps_to_logistic_of_loc() {
        let dist = RescaledLogitNormal::fixed(&names(3), &specs(), &Device::Cpu).unwrap();
        let eps = Tensor::zeros((1, 3), candle_core::DType::F64, &Device::Cpu).unwrap();
        let (theta, _) = dist.sample_from_noise(&eps).unwrap();
        let theta = theta.to_vec2::<f64>().unwrap();
        let s = &specs()[0];
        let expected = s.lower + s.width() / (1.0 + (-s.loc).exp());
        assert_relative_eq!(theta[0][0], expected, epsilon = 1e-12);
    }

    #[test]
    fn trainable_registers_two_vars() {
        let var_map = VarMap::new();
        let dist = RescaledLogitNormal::trainable(
            &var_map,
            "q",
            &names(3),
            &specs(),
            &[0.0; 3],
            &[0.5; 3],
            &Device::Cpu,
        )
        .unwrap();
        assert!(dist.is_trainable());
        assert_eq!(var_map.all_vars().len(), 2);
    }

    #[test]
    fn wrong_noise_width_is_data_error() {
        let dist = RescaledLogitNormal::fixed(&names(3), &specs(), &Device::Cpu).unwrap();
        let eps = Tensor::zeros((2, 4), candle_core::DType::F64, &Device::Cpu).unwrap();
        assert!(matches!(
            dist.sample_from_noise(&eps),
            Err(SbmError::Data { .. })
        ));
    }
}
