//! Single-sample reparameterized ELBO.
//!
//! ```text
//! ELBO = ln p(theta) + ln p(x_0) + sum_t ln p(x_{t+1} | x_t, theta)
//!      + ln p(y | x, theta) - ln q(theta) - ln q(x | theta)
//! ```
//!
//! One draw per batch element. Pinned parameters enter the SDE and the flow
//! context through [`ParameterSpace::assemble`](crate::params::ParameterSpace::assemble)
//! and are absent from both parameter densities.

use candle_core::Tensor;
use rand::RngCore;
use sbm_core::{Result, SbmError};

use crate::model::VariationalModel;
use crate::nn::{scalar, standard_normal};
use crate::sde::transition_log_density;

/// Per-sample ELBO terms, each `[B]`.
#[derive(Debug, Clone)]
pub struct ElboTerms {
    pub log_p_theta: Tensor,
    pub log_q_theta: Tensor,
    pub log_p_x0: Tensor,
    pub log_p_transitions: Tensor,
    pub log_lik: Tensor,
    pub log_q_x: Tensor,
}

impl ElboTerms {
    /// Per-sample ELBO `[B]`.
    pub fn elbo(&self) -> candle_core::Result<Tensor> {
        let model = ((&self.log_p_theta + &self.log_p_x0)? + &self.log_p_transitions)?;
        let entropy = (&self.log_q_theta + &self.log_q_x)?;
        (model + &self.log_lik)? - entropy
    }

    /// Negative batch-mean ELBO, the quantity minimized (scalar).
    pub fn neg_elbo(&self) -> candle_core::Result<Tensor> {
        self.elbo()?.mean_all()?.neg()
    }

    /// Batch means of every term, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Backend`] if a reduction fails.
    pub fn means(&self) -> Result<[f64; 6]> {
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("ElboTerms::means: {e}"),
        };
        let mean = |t: &Tensor| t.mean_all().and_then(|m| scalar(&m)).map_err(map_err);
        Ok([
            mean(&self.log_p_theta)?,
            mean(&self.log_q_theta)?,
            mean(&self.log_p_x0)?,
            mean(&self.log_p_transitions)?,
            mean(&self.log_lik)?,
            mean(&self.log_q_x)?,
        ])
    }
}

/// One ELBO evaluation with the draws it was computed from.
#[derive(Debug, Clone)]
pub struct ElboSample {
    pub terms: ElboTerms,
    /// Full parameter vectors `[B, P]`, pinned columns included.
    pub theta: Tensor,
    /// Latent trajectories `[B, n, D]`.
    pub trajectory: Tensor,
    /// Trajectories with the derived flux column when it is scored,
    /// `[B, n, V]`.
    pub paths: Tensor,
}

impl VariationalModel {
    /// ELBO from explicit noise: `theta_eps [B, P_free]` for the posterior,
    /// `path_eps [B, n, D]` for the flow.
    ///
    /// Deterministic in its inputs, so permuting the batch rows of both
    /// noise tensors permutes every per-sample term identically.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Data`] on noise shape mismatches and
    /// [`SbmError::Backend`] on tensor failures.
    pub fn estimate_from_noise(&self, theta_eps: &Tensor, path_eps: &Tensor) -> Result<ElboSample> {
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("VariationalModel::estimate_from_noise: {e}"),
        };
        let (free, log_q_theta) = self.posterior.sample_from_noise(theta_eps)?;
        let log_p_theta = self.prior.log_prob(&free)?;
        let theta = self.assemble_theta(&free)?;

        let sample = self.flow.sample_from_noise(path_eps, &theta)?;
        let x = sample.trajectory;
        let x0 = x.narrow(1, 0, 1).and_then(|x0| x0.squeeze(1)).map_err(map_err)?;
        let log_p_x0 = self.x0_prior.log_prob(&x0).map_err(map_err)?;
        let log_p_transitions =
            transition_log_density(self.sde.as_ref(), &x, &theta, self.dt).map_err(map_err)?;
        let paths = self.observed_paths(&x, &theta).map_err(map_err)?;
        let log_lik = self.obs.log_likelihood(&paths).map_err(map_err)?;

        Ok(ElboSample {
            terms: ElboTerms {
                log_p_theta,
                log_q_theta,
                log_p_x0,
                log_p_transitions,
                log_lik,
                log_q_x: sample.log_prob,
            },
            theta,
            trajectory: x,
            paths,
        })
    }

    /// ELBO over `batch_size` fresh draws from `rng`.
    ///
    /// # Errors
    ///
    /// See [`VariationalModel::estimate_from_noise`].
    pub fn estimate(&self, batch_size: usize, rng: &mut dyn RngCore) -> Result<ElboSample> {
        let (theta_eps, path_eps) = self.draw_noise(batch_size, rng)?;
        self.estimate_from_noise(&theta_eps, &path_eps)
    }

    /// Base noise for one ELBO evaluation, parameter noise drawn first.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Backend`] if the upload fails.
    pub fn draw_noise(
        &self,
        batch_size: usize,
        rng: &mut dyn RngCore,
    ) -> Result<(Tensor, Tensor)> {
        let map_err = |e: candle_core::Error| SbmError::Backend {
            message: format!("VariationalModel::draw_noise: {e}"),
        };
        let theta_eps = standard_normal(rng, (batch_size, self.space.num_free()), &self.device)
            .map_err(map_err)?;
        let path_eps = standard_normal(
            rng,
            (batch_size, self.flow.steps(), self.flow.state_dim()),
            &self.device,
        )
        .map_err(map_err)?;
        Ok((theta_eps, path_eps))
    }
}
