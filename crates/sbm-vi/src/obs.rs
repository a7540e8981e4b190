//! Gaussian observation model over the latent trajectory.
//!
//! Observations live on a sparse set of grid indices. Each modeled variable
//! gets the noise scale `obs_error_scale * mean(|observed values|)`, and
//! unobserved cells are masked out so they contribute exactly zero.

use candle_core::{Device, Tensor};
use sbm_core::{ObservationSet, PretrainLoss, Result, SbmError};
use tracing::debug;

use crate::nn::{normal_log_density, sum_per_sample};

/// Name of the derived CO2 flux column.
pub const CO2_COLUMN: &str = "CO2";

/// Observation likelihood for paths shaped `[B, n, V]`, where `V` is the
/// number of states plus one CO2 column when the flux is scored.
#[derive(Debug, Clone)]
pub struct ObsModel {
    variables: Vec<String>,
    scales: Vec<f64>,
    indices: Tensor,
    values: Tensor,
    mask: Tensor,
    scale_t: Tensor,
    observed_cells: usize,
}

impl ObsModel {
    /// # Errors
    ///
    /// Returns [`SbmError::Data`] if no modeled variable has an observation.
    pub fn new(
        obs: &ObservationSet,
        state_names: &[&str],
        learn_co2: bool,
        obs_error_scale: f64,
        device: &Device,
    ) -> Result<Self> {
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("ObsModel::new: {e}"),
        };

        let mut variables: Vec<String> = state_names.iter().map(|s| s.to_string()).collect();
        if learn_co2 {
            variables.push(CO2_COLUMN.to_string());
        }
        for column in obs.columns() {
            if !variables.contains(column) {
                debug!(column = %column, "ignoring observation column that is not modeled");
            }
        }

        let observed_cells: usize = variables.iter().map(|v| obs.observed_count(v)).sum();
        if observed_cells == 0 {
            return Err(SbmError::data(format!(
                "observation set has no values for any modeled variable ({})",
                variables.join(", ")
            )));
        }

        let scales: Vec<f64> = variables
            .iter()
            .map(|v| match obs.mean_abs(v) {
                Some(m) if m > 0.0 => obs_error_scale * m,
                _ => obs_error_scale,
            })
            .collect();

        let (k, v) = (obs.len(), variables.len());
        let mut values = Vec::with_capacity(k * v);
        let mut mask = Vec::with_capacity(k * v);
        for row in 0..k {
            for name in &variables {
                let cell = obs.value(row, name);
                values.push(cell.unwrap_or(0.0));
                mask.push(u8::from(cell.is_some()));
            }
        }
        let indices: Vec<u32> = obs.indices().iter().map(|i| *i as u32).collect();

        Ok(Self {
            indices: Tensor::from_vec(indices, k, device).map_err(map_err)?,
            values: Tensor::from_vec(values, (1, k, v), device).map_err(map_err)?,
            mask: Tensor::from_vec(mask, (1, k, v), device).map_err(map_err)?,
            scale_t: Tensor::from_slice(&scales, (1, 1, v), device).map_err(map_err)?,
            variables,
            scales,
            observed_cells,
        })
    }

    /// Modeled variable names, in path column order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn dim(&self) -> usize {
        self.variables.len()
    }

    pub fn includes_co2(&self) -> bool {
        self.variables.last().is_some_and(|v| v == CO2_COLUMN)
    }

    /// Per-variable noise scales.
    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    pub fn observed_cells(&self) -> usize {
        self.observed_cells
    }

    /// Path values at the observed grid indices, `[B, K, V]`.
    fn at_observations(&self, paths: &Tensor) -> candle_core::Result<Tensor> {
        paths.index_select(&self.indices, 1)
    }

    fn masked(&self, cells: &Tensor) -> candle_core::Result<Tensor> {
        let mask = self.mask.broadcast_as(cells.shape())?;
        let zeros = cells.zeros_like()?;
        mask.where_cond(cells, &zeros)
    }

    /// Per-sample log-likelihood `[B]`.
    pub fn log_likelihood(&self, paths: &Tensor) -> candle_core::Result<Tensor> {
        let predicted = self.at_observations(paths)?;
        let lp = normal_log_density(&predicted, &self.values, &self.scale_t)?;
        sum_per_sample(&self.masked(&lp)?)
    }

    /// Log-likelihood summed over the batch (scalar).
    pub fn total_log_likelihood(&self, paths: &Tensor) -> candle_core::Result<Tensor> {
        self.log_likelihood(paths)?.sum_all()
    }

    /// Mean scale-normalized L1 or L2 misfit over observed cells (scalar).
    pub fn fit_loss(&self, paths: &Tensor, loss: PretrainLoss) -> candle_core::Result<Tensor> {
        let predicted = self.at_observations(paths)?;
        let residual = predicted
            .broadcast_sub(&self.values)?
            .broadcast_div(&self.scale_t)?;
        let per_cell = match loss {
            PretrainLoss::L1 => residual.abs()?,
            PretrainLoss::L2 => residual.sqr()?,
        };
        let cells = (self.observed_cells * paths.dim(0)?) as f64;
        self.masked(&per_cell)?.sum_all()? / cells
    }
}
