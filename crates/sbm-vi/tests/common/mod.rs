//! Synthetic SCON-C data shared by the integration tests.

#![allow(dead_code)]

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use sbm_core::{
    ForcingSeries, InitialStatePrior, ObservationSet, PriorBundle, PriorSpec, TimeGrid,
    TrainConfig,
};
use sbm_vi::sde::{build_sde, simulate, DiffusionType, ModelClass};
use sbm_vi::training::TrainingData;

pub const X0: [f64; 3] = [50.0, 0.1, 1.0];

/// SCON-C parameters used to simulate the observations.
pub const TRUE_THETA: [f64; 14] = [
    0.002, 0.33, 0.33, 0.33, 0.5, 2.5e-5, 0.005, 0.0002, 75.0, 50.0, 50.0, 0.01, 1e-6, 1e-5,
];

pub const OBS_NOISE: f64 = 0.05;

pub fn forcing(grid: &TimeGrid) -> ForcingSeries {
    let temp = grid
        .times()
        .iter()
        .map(|t| 283.0 + 5.0 * (2.0 * std::f64::consts::PI * t / 24.0).sin())
        .collect();
    let n = grid.len();
    ForcingSeries::new(grid, temp, vec![0.001; n], vec![0.0001; n]).unwrap()
}

/// Priors spanning half to one and a half times each simulating value.
pub fn priors() -> PriorBundle {
    let grid = TimeGrid::new(1.0, 1.0).unwrap();
    let sde = build_sde(
        ModelClass::Scon,
        DiffusionType::Constant,
        &forcing(&grid),
        283.0,
        &Device::Cpu,
    )
    .unwrap();
    let mut bundle = PriorBundle::new();
    for (name, value) in sde.param_names().iter().zip(TRUE_THETA) {
        let spec = PriorSpec {
            loc: 0.0,
            scale: 1.0,
            lower: 0.5 * value,
            upper: 1.5 * value,
        };
        bundle.insert(name.clone(), spec).unwrap();
    }
    bundle
}

/// Simulates SCON-C on `[0, t_end]` and observes every `every` hours with
/// relative noise [`OBS_NOISE`]. With `with_co2` the derived flux is
/// observed as well.
pub fn synthetic_data(t_end: f64, every: usize, with_co2: bool, seed: u64) -> TrainingData {
    let grid = TimeGrid::new(t_end, 1.0).unwrap();
    let forcing = forcing(&grid);
    let sde = build_sde(
        ModelClass::Scon,
        DiffusionType::Constant,
        &forcing,
        283.0,
        &Device::Cpu,
    )
    .unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    let path = simulate(sde.as_ref(), &grid, &X0, &TRUE_THETA, &mut rng, &Device::Cpu).unwrap();

    let flux = if with_co2 {
        let flat: Vec<f64> = path.iter().flatten().copied().collect();
        let x = Tensor::from_vec(flat, (1, grid.len(), 3), &Device::Cpu).unwrap();
        let theta = Tensor::new(&[TRUE_THETA], &Device::Cpu).unwrap();
        let f = sde.derived_flux(&x, &theta, 0).unwrap();
        Some(f.flatten_all().unwrap().to_vec1::<f64>().unwrap())
    } else {
        None
    };

    let mut columns: Vec<String> = sde.state_names().iter().map(|s| s.to_string()).collect();
    if with_co2 {
        columns.push("CO2".to_string());
    }
    let mut noisy = |v: f64| {
        let z: f64 = StandardNormal.sample(&mut rng);
        v * (1.0 + OBS_NOISE * z)
    };
    let mut rows = Vec::new();
    for t in (0..grid.len()).step_by(every) {
        let mut row: Vec<Option<f64>> = path[t].iter().map(|v| Some(noisy(*v))).collect();
        if let Some(f) = &flux {
            row.push(Some(noisy(f[t])));
        }
        rows.push((grid.time_at(t), row));
    }
    let observations = ObservationSet::from_rows(&grid, columns, rows).unwrap();
    let x0 = InitialStatePrior::new(X0.to_vec(), 0.1).unwrap();
    TrainingData::new(grid, forcing, observations, x0, priors()).unwrap()
}

/// A short run with a small flow.
pub fn quick_config(iterations: usize) -> TrainConfig {
    TrainConfig {
        iterations,
        warmup_iterations: iterations / 10,
        warmup_learning_rate: 1e-4,
        learning_rate: 5e-3,
        lr_decay_step_size: iterations.max(1),
        batch_size: 8,
        eval_batch_size: 64,
        eval_every: iterations.max(1),
        print_every: 50,
        num_layers: 2,
        hidden_dim: 16,
        max_grad_norm: Some(1e3),
        ..TrainConfig::default()
    }
}

/// Installs a test subscriber honoring `RUST_LOG`; repeated calls are
/// no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
