//! Training configuration.
//!
//! Every recognized tuning option of a run lives in [`TrainConfig`]. The
//! defaults reproduce the reference SCON-C CO2 setup: 45,000 main iterations
//! after a 5,000-iteration warmup, batch size 50, five flow layers with time
//! reversal enabled.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SbmError};

/// Loss used during the optional flow pretraining phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PretrainLoss {
    /// Mean absolute error against the observations.
    L1,
    /// Mean squared error against the observations.
    L2,
}

impl std::str::FromStr for PretrainLoss {
    type Err = SbmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "L1" | "l1" => Ok(Self::L1),
            "L2" | "l2" => Ok(Self::L2),
            other => Err(SbmError::config(format!(
                "unknown pretraining loss '{other}' (expected L1 or L2)"
            ))),
        }
    }
}

/// What to do when the loss or gradient stops being finite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NonFinitePolicy {
    /// Abort the run with a numerical error.
    Abort,
    /// Skip the optimizer step; abort after too many skips.
    SkipStep,
}

/// Configuration for one training run.
///
/// # Example
///
/// ```
/// use sbm_core::TrainConfig;
///
/// let config = TrainConfig {
///     iterations: 200,
///     warmup_iterations: 20,
///     batch_size: 8,
///     ..TrainConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// assert_eq!(config.total_iterations(), 220);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Peak learning rate of the main phase (default: 1e-2).
    pub learning_rate: f64,

    /// Main-phase iterations, after warmup (default: 45,000).
    pub iterations: usize,

    /// Minibatch size (default: 50).
    pub batch_size: usize,

    /// Observation noise as a fraction of each variable's mean (default: 0.05).
    pub obs_error_scale: f64,

    /// SDE model class identifier (default: "SCON").
    pub model_class: String,

    /// Diffusion type identifier (default: "C").
    pub diffusion_type: String,

    /// Reference temperature of the Arrhenius terms, Kelvin (default: 283).
    pub temp_ref: f64,

    /// Parameters pinned to fixed values instead of inferred.
    pub fixed_params: BTreeMap<String, f64>,

    /// Whether the derived CO2 flux is scored against observations.
    pub learn_co2: bool,

    /// Prior family name (default: "RescaledLogitNormal").
    pub prior_family: String,

    /// Posterior family name (default: "MultivariateLogitNormal").
    pub posterior_family: String,

    /// Held-out evaluation batch size (default: 100).
    pub eval_batch_size: usize,

    /// Iterations between held-out evaluations (default: 100).
    pub eval_every: usize,

    /// Warmup iterations (default: 5,000).
    pub warmup_iterations: usize,

    /// Learning rate at the start of warmup (default: 1e-6).
    pub warmup_learning_rate: f64,

    /// Multiplicative decay factor (default: 0.6).
    pub lr_decay: f64,

    /// Main-phase iterations between decays (default: 10,000).
    pub lr_decay_step_size: usize,

    /// Iterations between progress log lines (default: 20).
    pub print_every: usize,

    /// Log progress at info level instead of debug (default: true).
    pub verbose: bool,

    /// Directory for periodic safetensors snapshots of trainable variables.
    pub debug_snapshot_dir: Option<PathBuf>,

    /// Flow-only pretraining iterations (default: 0).
    pub pretrain_iterations: usize,

    /// Pretraining loss (default: L1).
    pub pretrain_loss: PretrainLoss,

    /// Autoregressive flow layers (default: 5).
    pub num_layers: usize,

    /// Recurrent hidden width of each flow layer (default: 32).
    pub hidden_dim: usize,

    /// Run the flow backward in time (default: true).
    pub reverse: bool,

    /// Condition flow layers on base noise instead of generated values.
    pub base_state: bool,

    /// Initial step scale of the flow's increment assembly (default: 0.01).
    pub increment_scale: f64,

    /// Clip the global gradient norm to this value when set.
    pub max_grad_norm: Option<f64>,

    /// Handling of non-finite loss or gradients (default: Abort).
    pub non_finite_policy: NonFinitePolicy,

    /// Consecutive skipped steps tolerated under [`NonFinitePolicy::SkipStep`].
    pub max_skipped_steps: usize,

    /// Fail when given a CPU device (default: false).
    pub require_accelerator: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-2,
            iterations: 45_000,
            batch_size: 50,
            obs_error_scale: 0.05,
            model_class: "SCON".to_string(),
            diffusion_type: "C".to_string(),
            temp_ref: 283.0,
            fixed_params: BTreeMap::new(),
            learn_co2: true,
            prior_family: "RescaledLogitNormal".to_string(),
            posterior_family: "MultivariateLogitNormal".to_string(),
            eval_batch_size: 100,
            eval_every: 100,
            warmup_iterations: 5_000,
            warmup_learning_rate: 1e-6,
            lr_decay: 0.6,
            lr_decay_step_size: 10_000,
            print_every: 20,
            verbose: true,
            debug_snapshot_dir: None,
            pretrain_iterations: 0,
            pretrain_loss: PretrainLoss::L1,
            num_layers: 5,
            hidden_dim: 32,
            reverse: true,
            base_state: false,
            increment_scale: 0.01,
            max_grad_norm: None,
            non_finite_policy: NonFinitePolicy::Abort,
            max_skipped_steps: 10,
            require_accelerator: false,
        }
    }
}

impl TrainConfig {
    /// Warmup plus main-phase iterations (pretraining excluded).
    pub fn total_iterations(&self) -> usize {
        self.warmup_iterations + self.iterations
    }

    /// Checks ranges of every numeric option.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Config`] describing the first invalid option.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("learning_rate", self.learning_rate),
            ("warmup_learning_rate", self.warmup_learning_rate),
            ("obs_error_scale", self.obs_error_scale),
            ("lr_decay", self.lr_decay),
            ("increment_scale", self.increment_scale),
            ("temp_ref", self.temp_ref),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(SbmError::config(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        let counts = [
            ("batch_size", self.batch_size),
            ("eval_batch_size", self.eval_batch_size),
            ("num_layers", self.num_layers),
            ("hidden_dim", self.hidden_dim),
            ("lr_decay_step_size", self.lr_decay_step_size),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(SbmError::config(format!("{name} must be at least 1")));
            }
        }
        if let Some(norm) = self.max_grad_norm {
            if !norm.is_finite() || norm <= 0.0 {
                return Err(SbmError::config(format!(
                    "max_grad_norm must be positive, got {norm}"
                )));
            }
        }
        if let Some((name, value)) = self.fixed_params.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SbmError::config(format!(
                "fixed parameter '{name}' has non-finite value {value}"
            )));
        }
        Ok(())
    }

    /// Hyperparameter-encoding suffix used to name run outputs.
    ///
    /// # Example
    ///
    /// ```
    /// use sbm_core::TrainConfig;
    ///
    /// let suffix = TrainConfig::default().run_suffix(1000.0, 1.0);
    /// assert!(suffix.starts_with("_iter_45000_warmup_5000_t_1000_dt_1_batch_50_layers_5"));
    /// ```
    pub fn run_suffix(&self, t_end: f64, dt: f64) -> String {
        format!(
            "_iter_{}_warmup_{}_t_{}_dt_{}_batch_{}_layers_{}_lr_{}_decay_step_{}_warmup_lr_{}",
            self.iterations,
            self.warmup_iterations,
            t_end,
            dt,
            self.batch_size,
            self.num_layers,
            self.learning_rate,
            self.lr_decay_step_size,
            self.warmup_learning_rate,
        )
    }
}
