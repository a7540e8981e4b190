//! Soil biogeochemical SDE models.
//!
//! Each model supplies a drift and a diagonal diffusion for its carbon pools,
//! plus the derived CO2 flux. All functions are vectorized: states are
//! `[batch, steps, pools]`, parameters `[batch, params]`, and the forcing
//! window starts at grid index `time_offset`.
//!
//! ## Variants
//!
//! | Class  | Pools                 | Drift parameters |
//! |--------|-----------------------|------------------|
//! | `SCON` | SOC, DOC, MBC         | 11               |
//! | `SAWB` | SOC, DOC, MBC, EEC    | 12               |
//!
//! Diffusion `C` adds a constant variance coefficient `c_<pool>` per pool;
//! `SS` adds `s_<pool>` with variance `s * x`.

mod sawb;
mod scon;

use std::fmt;
use std::str::FromStr;

use candle_core::{Device, Tensor};
use rand::RngCore;
use sbm_core::{ForcingSeries, Result, SbmError, TimeGrid};

use crate::nn::{normal_log_density, standard_normal, sum_per_sample};

pub use sawb::Sawb;
pub use scon::Scon;

/// Universal gas constant in kJ / (mol K).
pub const GAS_CONSTANT: f64 = 0.008_314;

/// Lower bound on every diffusion variance.
pub const MIN_VARIANCE: f64 = 1e-8;

/// SDE model class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass {
    /// Sequential conversion: SOC, DOC, MBC.
    Scon,
    /// Stoichiometric-approximation with enzymes: SOC, DOC, MBC, EEC.
    Sawb,
}

impl FromStr for ModelClass {
    type Err = SbmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SCON" => Ok(Self::Scon),
            "SAWB" => Ok(Self::Sawb),
            other => Err(SbmError::config(format!(
                "unknown model class '{other}' (expected SCON or SAWB)"
            ))),
        }
    }
}

/// Diffusion parameterization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffusionType {
    /// Constant per-pool variance `c`.
    Constant,
    /// State-scaling variance `s * x`.
    StateScaling,
}

impl DiffusionType {
    fn prefix(self) -> &'static str {
        match self {
            Self::Constant => "c",
            Self::StateScaling => "s",
        }
    }

    /// Diffusion parameter names for `pools`, e.g. `c_SOC`.
    pub fn param_names(self, pools: &[&str]) -> Vec<String> {
        pools
            .iter()
            .map(|p| format!("{}_{p}", self.prefix()))
            .collect()
    }

    /// Square root of the diagonal variance, `[B, m, D]`.
    ///
    /// `coeffs` holds the per-pool coefficients as `[B, 1, D]`.
    pub fn diffusion_sqrt(self, x: &Tensor, coeffs: &Tensor) -> candle_core::Result<Tensor> {
        let variance = match self {
            Self::Constant => coeffs.broadcast_as(x.shape())?.contiguous()?,
            Self::StateScaling => x.broadcast_mul(coeffs)?,
        };
        variance.maximum(MIN_VARIANCE)?.sqrt()
    }
}

impl FromStr for DiffusionType {
    type Err = SbmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "C" => Ok(Self::Constant),
            "SS" => Ok(Self::StateScaling),
            other => Err(SbmError::config(format!(
                "unknown diffusion type '{other}' (expected C or SS)"
            ))),
        }
    }
}

/// Drift and diffusion of a pool model.
///
/// Implementations are pure: the same inputs always give the same outputs.
pub trait SdeModel: fmt::Debug {
    /// Pool names, in state order.
    fn state_names(&self) -> &[&'static str];

    /// Every parameter name (drift then diffusion), in column order of theta.
    fn param_names(&self) -> &[String];

    fn state_dim(&self) -> usize {
        self.state_names().len()
    }

    /// `(drift, diffusion_sqrt)`, both shaped like `x`.
    fn drift_diffusion(
        &self,
        x: &Tensor,
        theta: &Tensor,
        time_offset: usize,
    ) -> candle_core::Result<(Tensor, Tensor)>;

    /// CO2 flux leaving the pools, `[B, m, 1]`.
    fn derived_flux(
        &self,
        x: &Tensor,
        theta: &Tensor,
        time_offset: usize,
    ) -> candle_core::Result<Tensor>;
}

/// Forcing series uploaded once as `[1, n, 1]` tensors.
#[derive(Debug, Clone)]
pub struct ForcingTensors {
    temperature: Tensor,
    litter_soc: Tensor,
    litter_doc: Tensor,
}

/// Forcing restricted to a window of `m` grid steps.
pub(crate) struct ForcingWindow {
    pub temperature: Tensor,
    pub litter_soc: Tensor,
    pub litter_doc: Tensor,
}

impl ForcingTensors {
    /// # Errors
    ///
    /// Returns [`SbmError::Backend`] if the upload fails.
    pub fn new(forcing: &ForcingSeries, device: &Device) -> Result<Self> {
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("ForcingTensors::new: {e}"),
        };
        let n = forcing.len();
        let upload = |v: &[f64]| Tensor::from_slice(v, (1, n, 1), device);
        Ok(Self {
            temperature: upload(forcing.temperature()).map_err(map_err)?,
            litter_soc: upload(forcing.litter_soc()).map_err(map_err)?,
            litter_doc: upload(forcing.litter_doc()).map_err(map_err)?,
        })
    }

    pub(crate) fn window(&self, start: usize, len: usize) -> candle_core::Result<ForcingWindow> {
        Ok(ForcingWindow {
            temperature: self.temperature.narrow(1, start, len)?,
            litter_soc: self.litter_soc.narrow(1, start, len)?,
            litter_doc: self.litter_doc.narrow(1, start, len)?,
        })
    }
}

/// Column `idx` of `theta [B, P]` as `[B, 1, 1]`.
pub(crate) fn param_column(theta: &Tensor, idx: usize) -> candle_core::Result<Tensor> {
    theta.narrow(1, idx, 1)?.unsqueeze(2)
}

/// Columns `[start, start + len)` of `theta` as `[B, 1, len]`.
pub(crate) fn param_block(theta: &Tensor, start: usize, len: usize) -> candle_core::Result<Tensor> {
    theta.narrow(1, start, len)?.unsqueeze(1)
}

/// Arrhenius rate `k_ref * exp(-Ea / R * (1/T - 1/T_ref))`.
///
/// `k_ref` and `ea` are `[B, 1, 1]`, `temperature` is `[1, m, 1]`; the result
/// is `[B, m, 1]`.
pub fn arrhenius(
    k_ref: &Tensor,
    ea: &Tensor,
    temperature: &Tensor,
    temp_ref: f64,
) -> candle_core::Result<Tensor> {
    let inv = temperature.recip()?.affine(1.0, -1.0 / temp_ref)?;
    let exponent = (ea.broadcast_mul(&inv)? * (-1.0 / GAS_CONSTANT))?;
    exponent.exp()?.broadcast_mul(k_ref)
}

/// Builds the model for `class` and `diffusion` over `forcing`.
///
/// # Errors
///
/// Returns [`SbmError::Backend`] if the forcing upload fails.
pub fn build_sde(
    class: ModelClass,
    diffusion: DiffusionType,
    forcing: &ForcingSeries,
    temp_ref: f64,
    device: &Device,
) -> Result<Box<dyn SdeModel>> {
    let forcing = ForcingTensors::new(forcing, device)?;
    Ok(match class {
        ModelClass::Scon => Box::new(Scon::new(diffusion, forcing, temp_ref)),
        ModelClass::Sawb => Box::new(Sawb::new(diffusion, forcing, temp_ref)),
    })
}

/// Euler–Maruyama log-density of every transition of `x [B, n, D]`, summed
/// per sample: `x_{t+1} ~ N(x_t + drift dt, diffusion^2 dt)`.
pub fn transition_log_density(
    model: &dyn SdeModel,
    x: &Tensor,
    theta: &Tensor,
    dt: f64,
) -> candle_core::Result<Tensor> {
    let n = x.dim(1)?;
    let prev = x.narrow(1, 0, n - 1)?;
    let next = x.narrow(1, 1, n - 1)?;
    let (drift, diffusion) = model.drift_diffusion(&prev, theta, 0)?;
    let mean = (&prev + (drift * dt)?)?;
    let std = (diffusion * dt.sqrt())?;
    sum_per_sample(&normal_log_density(&next, &mean, &std)?)
}

/// Simulates one Euler–Maruyama path on `grid`, flooring states at
/// `MIN_VARIANCE` to keep them positive. Returns `[n][D]` values.
///
/// Used to build synthetic observation sets.
///
/// # Errors
///
/// Returns [`SbmError::Data`] on a dimension mismatch and
/// [`SbmError::Backend`] on tensor failures.
pub fn simulate(
    model: &dyn SdeModel,
    grid: &TimeGrid,
    x0: &[f64],
    theta: &[f64],
    rng: &mut dyn RngCore,
    device: &Device,
) -> Result<Vec<Vec<f64>>> {
    let d = model.state_dim();
    if x0.len() != d || theta.len() != model.param_names().len() {
        return Err(SbmError::data(format!(
            "simulate: expected {d} states and {} parameters, got {} and {}",
            model.param_names().len(),
            x0.len(),
            theta.len()
        )));
    }
    let map_err = |e: candle_core::Error| SbmError::Backend {
        message: format!("simulate: {e}"),
    };
    let dt = grid.dt();
    let theta = Tensor::from_slice(theta, (1, theta.len()), device).map_err(map_err)?;
    let mut x = Tensor::from_slice(x0, (1, 1, d), device).map_err(map_err)?;
    let mut path = Vec::with_capacity(grid.len());
    path.push(x0.to_vec());
    for t in 0..grid.len() - 1 {
        let (drift, diffusion) = model.drift_diffusion(&x, &theta, t).map_err(map_err)?;
        let noise = standard_normal(rng, (1, 1, d), device).map_err(map_err)?;
        let step = (diffusion * noise).and_then(|s| s * dt.sqrt()).map_err(map_err)?;
        x = (&x + (drift * dt).map_err(map_err)?)
            .and_then(|x| x + step)
            .and_then(|x| x.maximum(MIN_VARIANCE))
            .map_err(map_err)?;
        path.push(x.flatten_all().and_then(|v| v.to_vec1::<f64>()).map_err(map_err)?);
    }
    Ok(path)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn models(n: usize) -> Vec<(Box<dyn SdeModel>, Vec<f64>, Vec<f64>)> {
        let device = Device::Cpu;
        let mut out = Vec::new();
        for diffusion in [DiffusionType::Constant, DiffusionType::StateScaling] {
            out.push((
                build_sde(ModelClass::Scon, diffusion, &forcing(n), 283.0, &device).unwrap(),
                scon_theta(diffusion),
                vec![50.0, 0.1, 1.0],
            ));
            out.push((
                build_sde(ModelClass::Sawb, diffusion, &forcing(n), 283.0, &device).unwrap(),
                sawb_theta(diffusion),
                vec![50.0, 0.1, 1.0, 0.1],
            ));
        }
        out
    }

    #[test]
    fn drift_and_diffusion_match_state_shape() {
        for (model, theta, x0) in models(12) {
            let x = states(3, 5, &x0);
            let theta = batch_theta(&theta, 3);
            let (drift, diffusion) = model.drift_diffusion(&x, &theta, 4).unwrap();
            assert_eq!(drift.dims(), x.dims(), "{model:?}");
            assert_eq!(diffusion.dims(), x.dims(), "{model:?}");
            let flux = model.derived_flux(&x, &theta, 4).unwrap();
            assert_eq!(flux.dims(), &[3, 5, 1]);
        }
    }

    #[test]
    fn drift_sum_balances_inputs_minus_co2() {
        for (model, theta, x0) in models(6) {
            let x = states(2, 6, &x0);
            let theta = batch_theta(&theta, 2);
            let (drift, _) = model.drift_diffusion(&x, &theta, 0).unwrap();
            let total = drift.sum(2).unwrap().to_vec2::<f64>().unwrap();
            let co2 = model
                .derived_flux(&x, &theta, 0)
                .unwrap()
                .squeeze(2)
                .unwrap()
                .to_vec2::<f64>()
                .unwrap();
            for b in 0..2 {
                for t in 0..6 {
                    assert_relative_eq!(
                        total[b][t],
                        0.001 + 0.0001 - co2[b][t],
                        epsilon = 1e-12,
                        max_relative = 1e-9
                    );
                }
            }
        }
    }

    #[test]
    fn arrhenius_is_reference_rate_at_reference_temperature() {
        let device = Device::Cpu;
        let k_ref = Tensor::new(&[[[0.005f64]]], &device).unwrap();
        let ea = Tensor::new(&[[[50.0f64]]], &device).unwrap();
        let t = Tensor::new(&[[[283.0f64], [293.0]]], &device).unwrap();
        let k = arrhenius(&k_ref, &ea, &t, 283.0).unwrap().flatten_all().unwrap();
        let k = k.to_vec1::<f64>().unwrap();
        assert_relative_eq!(k[0], 0.005, epsilon = 1e-15);
        assert!(k[1] > 0.005);
    }

    #[test]
    fn constant_diffusion_is_sqrt_of_coefficient() {
        let n = 4;
        let model = build_sde(
            ModelClass::Scon,
            DiffusionType::Constant,
            &forcing(n),
            283.0,
            &Device::Cpu,
        )
        .unwrap();
        let x = states(1, n, &[50.0, 0.1, 1.0]);
        let theta = batch_theta(&scon_theta(DiffusionType::Constant), 1);
        let (_, diffusion) = model.drift_diffusion(&x, &theta, 0).unwrap();
        let d = diffusion.to_vec3::<f64>().unwrap();
        assert_relative_eq!(d[0][2][0], 0.05f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(d[0][3][2], 0.0005f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn unknown_names_are_config_errors() {
        assert!(matches!("XYZ".parse::<ModelClass>(), Err(SbmError::Config { .. })));
        assert!(matches!("Q".parse::<DiffusionType>(), Err(SbmError::Config { .. })));
        assert_eq!("SAWB".parse::<ModelClass>().unwrap(), ModelClass::Sawb);
    }

    #[test]
    fn transition_density_is_finite_on_simulated_path() {
        let n = 30;
        let grid = TimeGrid::new((n - 1) as f64, 1.0).unwrap();
        let model = build_sde(
            ModelClass::Scon,
            DiffusionType::Constant,
            &forcing(n),
            283.0,
            &Device::Cpu,
        )
        .unwrap();
        let theta_v = scon_theta(DiffusionType::Constant);
        let mut rng = StdRng::seed_from_u64(3);
        let path = simulate(model.as_ref(), &grid, &[50.0, 0.1, 1.0], &theta_v, &mut rng, &Device::Cpu)
            .unwrap();
        assert_eq!(path.len(), n);
        assert!(path.iter().flatten().all(|v| v.is_finite() && *v > 0.0));

        let flat: Vec<f64> = path.into_iter().flatten().collect();
        let x = Tensor::from_vec(flat, (1, n, 3), &Device::Cpu).unwrap();
        let theta = batch_theta(&theta_v, 1);
        let lp = transition_log_density(model.as_ref(), &x, &theta, 1.0).unwrap();
        assert_eq!(lp.dims(), &[1]);
        assert!(lp.to_vec1::<f64>().unwrap()[0].is_finite());
    }

    #[test]
    fn simulate_rejects_wrong_dimensions() {
        let grid = TimeGrid::new(3.0, 1.0).unwrap();
        let model = build_sde(
            ModelClass::Scon,
            DiffusionType::Constant,
            &forcing(4),
            283.0,
            &Device::Cpu,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let err = simulate(model.as_ref(), &grid, &[1.0, 1.0], &[0.0; 14], &mut rng, &Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, SbmError::Data { .. }));
    }
}
