//! The assembled variational model: SDE, prior, posterior, flow and
//! observation likelihood, plus the variable stores the optimizer updates.

use std::fmt;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use sbm_core::{Result, SbmError};

use crate::distributions::{ConstrainedDistribution, DiagonalNormal};
use crate::flow::PathFlow;
use crate::obs::ObsModel;
use crate::params::ParameterSpace;
use crate::sde::SdeModel;

/// Every component needed to evaluate the ELBO.
///
/// Built by [`crate::training::build_model`]. The flow's variables live in
/// [`VariationalModel::flow_vars`], the posterior's in
/// [`VariationalModel::posterior_vars`]; nothing else is trainable.
pub struct VariationalModel {
    pub(crate) sde: Box<dyn SdeModel>,
    pub(crate) flow: PathFlow,
    pub(crate) prior: Box<dyn ConstrainedDistribution>,
    pub(crate) posterior: Box<dyn ConstrainedDistribution>,
    pub(crate) x0_prior: DiagonalNormal,
    pub(crate) obs: ObsModel,
    pub(crate) space: ParameterSpace,
    pub(crate) dt: f64,
    pub(crate) flow_vars: VarMap,
    pub(crate) posterior_vars: VarMap,
    pub(crate) device: Device,
}

impl fmt::Debug for VariationalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariationalModel")
            .field("sde", &self.sde)
            .field("free_params", &self.space.free_names())
            .field("observed", &self.obs.variables())
            .field("steps", &self.flow.steps())
            .field("dt", &self.dt)
            .finish_non_exhaustive()
    }
}

impl VariationalModel {
    pub fn sde(&self) -> &dyn SdeModel {
        self.sde.as_ref()
    }

    pub fn flow(&self) -> &PathFlow {
        &self.flow
    }

    /// Prior over the free parameters.
    pub fn prior(&self) -> &dyn ConstrainedDistribution {
        self.prior.as_ref()
    }

    /// Posterior over the free parameters.
    pub fn posterior(&self) -> &dyn ConstrainedDistribution {
        self.posterior.as_ref()
    }

    pub fn x0_prior(&self) -> &DiagonalNormal {
        &self.x0_prior
    }

    pub fn obs(&self) -> &ObsModel {
        &self.obs
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    /// Grid step.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn flow_vars(&self) -> &VarMap {
        &self.flow_vars
    }

    pub fn posterior_vars(&self) -> &VarMap {
        &self.posterior_vars
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Full parameter vectors `[B, P]` from free draws `[B, P_free]`.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Backend`] if the tensor assembly fails.
    pub fn assemble_theta(&self, free: &Tensor) -> Result<Tensor> {
        self.space.assemble(free).map_err(|e| SbmError::Backend {
            message: format!("VariationalModel::assemble_theta: {e}"),
        })
    }

    /// Trajectories `[B, n, D]` widened with the derived CO2 flux column
    /// when the observation model scores it.
    pub(crate) fn observed_paths(
        &self,
        trajectory: &Tensor,
        theta: &Tensor,
    ) -> candle_core::Result<Tensor> {
        if !self.obs.includes_co2() {
            return Ok(trajectory.clone());
        }
        let flux = self.sde.derived_flux(trajectory, theta, 0)?;
        Tensor::cat(&[trajectory, &flux], 2)
    }
}
