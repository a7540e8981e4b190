//! # sbm-vi
//!
//! Amortized variational inference for soil biogeochemical SDE models.
//!
//! A posterior over the physical parameters and an autoregressive flow over
//! latent trajectories are fitted jointly by maximizing a single-sample
//! reparameterized ELBO.
//!
//! ## Key Types
//!
//! - [`sde::SdeModel`]: drift, diffusion and CO2 flux of a pool model
//!   (SCON, SAWB)
//! - [`distributions::ConstrainedDistribution`]: interval-supported priors
//!   and posteriors
//! - [`flow::PathFlow`]: trajectory sampler conditioned on theta
//! - [`obs::ObsModel`]: masked Gaussian observation likelihood
//! - [`model::VariationalModel`]: every component plus its variable stores
//! - [`elbo::ElboTerms`]: per-sample ELBO decomposition
//! - [`training::train`]: build and fit in one call
//!
//! ## Architecture Rules
//!
//! - Numerics are `f64` throughout.
//! - All randomness comes from a caller-supplied RNG; noise is drawn on the
//!   host and uploaded.
//! - Only the flow and posterior `VarMap`s are trainable.

pub mod distributions;
pub mod elbo;
pub mod flow;
pub mod model;
pub mod nn;
pub mod obs;
pub mod params;
pub mod sde;
pub mod training;

pub use elbo::{ElboSample, ElboTerms};
pub use model::VariationalModel;
pub use training::{build_model, evaluate, fit, train, TrainedModel, TrainingData};
