use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sbm_vi::flow::{FlowConfig, PathFlow};
use sbm_vi::nn::standard_normal;

const STATES: usize = 3;
const PARAMS: usize = 14;

fn flow(steps: usize, rng: &mut StdRng) -> (PathFlow, VarMap) {
    let var_map = VarMap::new();
    let features = standard_normal(rng, (steps, 4 + STATES), &Device::Cpu).unwrap();
    let config = FlowConfig {
        num_layers: 5,
        hidden_dim: 32,
        ..FlowConfig::default()
    };
    let flow = PathFlow::new(
        &var_map,
        &config,
        features,
        &[50.0, 0.1, 1.0],
        0.1,
        PARAMS,
        rng,
        &Device::Cpu,
    )
    .unwrap();
    (flow, var_map)
}

fn theta(batch: usize) -> Tensor {
    Tensor::full(0.01f64, (batch, PARAMS), &Device::Cpu).unwrap()
}

fn bench_sample(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let (flow, _vars) = flow(100, &mut rng);
    let theta = theta(50);
    c.bench_function("PathFlow::sample (B=50, n=100)", |b| {
        b.iter(|| black_box(flow.sample(&theta, &mut rng).unwrap()))
    });
}

fn bench_log_prob(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let (flow, _vars) = flow(100, &mut rng);
    let theta = theta(50);
    let x = flow.sample(&theta, &mut rng).unwrap().trajectory;
    c.bench_function("PathFlow::log_prob (B=50, n=100)", |b| {
        b.iter(|| black_box(flow.log_prob(&x, &theta).unwrap()))
    });
}

fn bench_sample_backward(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(2);
    let (flow, _vars) = flow(100, &mut rng);
    let theta = theta(50);
    c.bench_function("PathFlow::sample + backward (B=50, n=100)", |b| {
        b.iter(|| {
            let sample = flow.sample(&theta, &mut rng).unwrap();
            let loss = sample.log_prob.mean_all().unwrap();
            black_box(loss.backward().unwrap())
        })
    });
}

criterion_group!(benches, bench_sample, bench_log_prob, bench_sample_backward);
criterion_main!(benches);
