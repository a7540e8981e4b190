//! Training phases and the learning-rate schedule.

use std::fmt;

use sbm_core::TrainConfig;

/// Where a run is in `Pretrain -> Warmup -> Main -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrainingPhase {
    /// Flow-only fit of sampled paths to the observations.
    Pretrain,
    /// Learning rate ramps up linearly.
    Warmup,
    /// Step-decayed learning rate.
    Main,
    /// Iteration budget exhausted.
    Finished,
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pretrain => "pretrain",
            Self::Warmup => "warmup",
            Self::Main => "main",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Learning rate as a function of the optimizer iteration, counted from the
/// first warmup step (pretraining is not counted).
///
/// # Example
///
/// ```
/// use sbm_core::TrainConfig;
/// use sbm_vi::training::{LrSchedule, TrainingPhase};
///
/// let config = TrainConfig {
///     warmup_iterations: 10,
///     iterations: 100,
///     lr_decay_step_size: 50,
///     ..TrainConfig::default()
/// };
/// let schedule = LrSchedule::from_config(&config);
/// assert_eq!(schedule.phase(0), TrainingPhase::Warmup);
/// assert_eq!(schedule.phase(10), TrainingPhase::Main);
/// assert_eq!(schedule.phase(110), TrainingPhase::Finished);
/// assert_eq!(schedule.learning_rate(60), config.learning_rate * config.lr_decay);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LrSchedule {
    warmup_iterations: usize,
    main_iterations: usize,
    warmup_lr: f64,
    peak_lr: f64,
    decay: f64,
    decay_step: usize,
}

impl LrSchedule {
    pub fn from_config(config: &TrainConfig) -> Self {
        Self {
            warmup_iterations: config.warmup_iterations,
            main_iterations: config.iterations,
            warmup_lr: config.warmup_learning_rate,
            peak_lr: config.learning_rate,
            decay: config.lr_decay,
            decay_step: config.lr_decay_step_size.max(1),
        }
    }

    /// Warmup plus main iterations.
    pub fn total(&self) -> usize {
        self.warmup_iterations + self.main_iterations
    }

    pub fn phase(&self, iteration: usize) -> TrainingPhase {
        if iteration < self.warmup_iterations {
            TrainingPhase::Warmup
        } else if iteration < self.total() {
            TrainingPhase::Main
        } else {
            TrainingPhase::Finished
        }
    }

    /// Linear from `warmup_lr` towards `peak_lr` during warmup, then
    /// `peak_lr * decay^floor(k / decay_step)` with `k` counted from the
    /// start of the main phase.
    pub fn learning_rate(&self, iteration: usize) -> f64 {
        match self.phase(iteration) {
            TrainingPhase::Warmup => {
                let frac = iteration as f64 / self.warmup_iterations as f64;
                self.warmup_lr + (self.peak_lr - self.warmup_lr) * frac
            }
            TrainingPhase::Pretrain | TrainingPhase::Main | TrainingPhase::Finished => {
                let k = iteration.saturating_sub(self.warmup_iterations);
                let decays = (k / self.decay_step) as i32;
                self.peak_lr * self.decay.powi(decays)
            }
        }
    }
}
