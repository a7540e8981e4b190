//! Training driver.
//!
//! ```text
//! build_model ──► fit: [Pretrain] ──► Warmup ──► Main ──► Finished
//!                       flow only     linear lr   step-decayed lr
//! ```
//!
//! [`train`] is `build_model` followed by `fit`. Every step draws a fresh
//! minibatch, minimizes the negative ELBO with AdamW and records the loss
//! and gradient norm; held-out evaluations run every `eval_every` steps.

mod eval;
mod schedule;
mod train;

pub use eval::{evaluate, Evaluation};
pub use schedule::{LrSchedule, TrainingPhase};
pub use train::{build_model, fit, train, TrainedModel, TrainingData, TrainingHistory};
