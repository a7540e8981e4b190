//! Training on synthetic SCON-C observations.

mod common;

use candle_core::Device;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sbm_vi::training::{evaluate, train};

use common::{init_tracing, quick_config, synthetic_data};

fn assert_improves(t_end: f64, iterations: usize) {
    init_tracing();
    let data = synthetic_data(t_end, 5, true, 7);
    let config = quick_config(iterations);
    let mut rng = StdRng::seed_from_u64(2024);
    let trained = train(&data, &config, &Device::Cpu, &mut rng).unwrap();

    let evals = trained.eval_history();
    let (first, last) = (evals[0], evals[evals.len() - 1]);
    assert_eq!(first.0, 0);
    assert_eq!(last.0, config.total_iterations());
    assert!(
        last.1 < first.1,
        "negative ELBO did not improve: {} -> {}",
        first.1,
        last.1
    );

    let posterior = trained.posterior();
    let mean = posterior.mean_estimate(1_000, &mut rng).unwrap();
    for ((m, lo), hi) in mean.iter().zip(posterior.lower()).zip(posterior.upper()) {
        assert!(lo < m && m < hi, "posterior mean {m} outside ({lo}, {hi})");
    }

    let eval = evaluate(&trained.model, 16, &mut rng).unwrap();
    assert!(eval.neg_elbo.is_finite());
    assert_eq!(eval.paths.dims(), &[16, data.grid().len(), 4]);
}

#[test]
fn short_horizon_training_improves_elbo() {
    assert_improves(50.0, 150);
}

#[test]
#[ignore = "full 1000-hour horizon; run with --ignored"]
fn full_horizon_training_improves_elbo() {
    assert_improves(1000.0, 2_000);
}

#[test]
fn loss_history_covers_every_step() {
    let data = synthetic_data(20.0, 4, false, 3);
    let config = quick_config(10);
    let mut rng = StdRng::seed_from_u64(5);
    let trained = train(&data, &config, &Device::Cpu, &mut rng).unwrap();
    assert_eq!(trained.loss_history().len(), config.total_iterations());
    assert_eq!(trained.grad_norm_history().len(), config.total_iterations());
    assert_eq!(trained.history.skipped_steps, 0);
    assert_eq!(trained.sde().state_dim(), 3);
    assert_eq!(trained.obs().dim(), 4);
    assert_eq!(trained.prior().dim(), 14);
    assert_eq!(trained.flow().steps(), 21);
}
