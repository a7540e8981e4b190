//! Full-covariance logit-normal posterior.

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use sbm_core::{PriorSpec, Result, SbmError};

use super::{check_noise_shape, ConstrainedDistribution, Support};
use crate::nn::{register_var, softplus, softplus_inverse_f64, std_normal_log_density, LN_2PI};

const MIN_DIAG: f64 = 1e-5;

/// `z = loc + L eps` pushed through the support bijection.
///
/// `L` is lower-triangular. Its strictly-lower part is read directly from a
/// `[P, P]` variable and its diagonal is `softplus(raw) + 1e-5`, so it is
/// always invertible.
#[derive(Debug, Clone)]
pub struct MultivariateLogitNormal {
    names: Vec<String>,
    support: Support,
    loc: Tensor,
    tril_raw: Tensor,
    strict_lower: Tensor,
    eye: Tensor,
    device: Device,
}

impl MultivariateLogitNormal {
    /// Registers `{prefix}.loc` and `{prefix}.scale_tril` in `var_map`.
    ///
    /// The initial `L` is diagonal with entries `scale`.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Backend`] if variable creation fails.
    pub fn new(
        var_map: &VarMap,
        prefix: &str,
        names: &[String],
        specs: &[PriorSpec],
        loc: &[f64],
        scale: &[f64],
        device: &Device,
    ) -> Result<Self> {
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("MultivariateLogitNormal::new: {e}"),
        };
        let p = specs.len();
        let mut raw = vec![0.0; p * p];
        let mut strict = vec![0.0; p * p];
        let mut eye = vec![0.0; p * p];
        for i in 0..p {
            raw[i * p + i] = softplus_inverse_f64((scale[i] - MIN_DIAG).max(MIN_DIAG));
            eye[i * p + i] = 1.0;
            for j in 0..i {
                strict[i * p + j] = 1.0;
            }
        }
        let loc_init = Tensor::from_slice(loc, (1, p), device).map_err(map_err)?;
        let raw_init = Tensor::from_vec(raw, (p, p), device).map_err(map_err)?;
        Ok(Self {
            names: names.to_vec(),
            support: Support::new(specs, device).map_err(map_err)?,
            loc: register_var(var_map, &format!("{prefix}.loc"), &loc_init).map_err(map_err)?,
            tril_raw: register_var(var_map, &format!("{prefix}.scale_tril"), &raw_init)
                .map_err(map_err)?,
            strict_lower: Tensor::from_vec(strict, (p, p), device).map_err(map_err)?,
            eye: Tensor::from_vec(eye, (p, p), device).map_err(map_err)?,
            device: device.clone(),
        })
    }

    /// The current lower-triangular scale factor `[P, P]`.
    pub fn scale_tril(&self) -> candle_core::Result<Tensor> {
        let diag = ((softplus(&self.tril_raw)? + MIN_DIAG)? * &self.eye)?;
        (&self.tril_raw * &self.strict_lower)? + diag
    }

    fn log_diag_sum(l: &Tensor, eye: &Tensor) -> candle_core::Result<Tensor> {
        (l * eye)?.sum(1)?.log()?.sum_all()
    }

    fn forward(&self, eps: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let l = self.scale_tril()?;
        let z = eps.matmul(&l.t()?.contiguous()?)?.broadcast_add(&self.loc)?;
        let (theta, log_det) = self.support.forward(&z)?;
        let base = std_normal_log_density(eps)?
            .sum(1)?
            .broadcast_sub(&Self::log_diag_sum(&l, &self.eye)?)?;
        Ok((theta, (base - log_det)?))
    }

    fn density(&self, theta: &Tensor) -> candle_core::Result<Tensor> {
        let (z, log_det) = self.support.inverse(theta)?;
        let l = self.scale_tril()?;
        let r = z.broadcast_sub(&self.loc)?;
        let p = self.names.len();

        // Forward substitution L w = r, one coordinate at a time.
        let mut w: Vec<Tensor> = Vec::with_capacity(p);
        for i in 0..p {
            let mut acc = r.narrow(1, i, 1)?;
            if i > 0 {
                let prev = Tensor::cat(&w, 1)?;
                let row = l.narrow(0, i, 1)?.narrow(1, 0, i)?;
                acc = (acc - prev.broadcast_mul(&row)?.sum_keepdim(1)?)?;
            }
            let l_ii = l.narrow(0, i, 1)?.narrow(1, i, 1)?;
            w.push(acc.broadcast_div(&l_ii)?);
        }
        let w = Tensor::cat(&w, 1)?;
        let quad = (w.sqr()?.sum(1)? * -0.5)?;
        let log_n = (quad - 0.5 * LN_2PI * p as f64)?
            .broadcast_sub(&Self::log_diag_sum(&l, &self.eye)?)?;
        self.support.mask_outside(theta, &(log_n - log_det)?)
    }
}

impl ConstrainedDistribution for MultivariateLogitNormal {
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
        true
    }

    fn sample_from_noise(&self, eps: &Tensor) -> Result<(Tensor, Tensor)> {
        check_noise_shape(eps, self.dim(), "MultivariateLogitNormal")?;
        self.forward(eps).map_err(|e| SbmError::Backend {
            message: format!("MultivariateLogitNormal::sample_from_noise: {e}"),
        })
    }

    fn log_prob(&self, values: &Tensor) -> Result<Tensor> {
        self.density(values).map_err(|e| SbmError::Backend {
            message: format!("MultivariateLogitNormal::log_prob: {e}"),
        })
    }
}
