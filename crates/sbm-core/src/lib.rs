//! # sbm-core
//!
//! Data model for variational inference over soil biogeochemical SDE models.
//!
//! ## Key Types
//!
//! - [`TimeGrid`]: fixed-step grid over `[0, T]`
//! - [`ForcingSeries`]: temperature and litter inputs aligned with the grid
//! - [`ObservationSet`]: sparse observation table loaded from CSV
//! - [`PriorBundle`] / [`PriorSpec`]: validated prior parameterization
//! - [`InitialStatePrior`]: diagonal Gaussian over the initial state
//! - [`TrainConfig`]: every tuning option of a training run
//! - [`SbmError`]: the error type shared by all crates
//!
//! ## Architecture Rules
//!
//! - No tensor code here; `sbm-vi` owns everything that touches candle.
//! - Everything in this crate is immutable after construction.

pub mod config;
pub mod error;
pub mod forcing;
pub mod grid;
pub mod observations;
pub mod priors;

pub use config::{NonFinitePolicy, PretrainLoss, TrainConfig};
pub use error::{Result, SbmError};
pub use forcing::ForcingSeries;
pub use grid::TimeGrid;
pub use observations::{ObservationSet, DEFAULT_TIME_COLUMN};
pub use priors::{InitialStatePrior, PriorBundle, PriorSpec};
