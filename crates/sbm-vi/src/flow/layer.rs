//! Recurrent autoregressive affine layer.
//!
//! ## Architecture
//!
//! ```text
//! h_{-1} = tanh(W_ctx ln|theta|)
//! (mu_t, raw_t) = W_head h_{t-1} + V_head c_t
//! sigma_t = softplus(raw_t) + 1e-4
//! y_t = mu_t + sigma_t * u_t
//! h_t = tanh(W_h h_{t-1} + W_in feed_t + W_c c_t + W_ctx ln|theta|)
//! ```
//!
//! `feed_t` is `y_t`, or `u_t` in base-state mode. The head weights start at
//! zero and its bias at `(0, softplus^-1(1))`, so a fresh layer is the
//! identity map.

use candle_core::{Device, Tensor};
use candle_nn::{Linear, Module, VarMap};
use rand::Rng;
use rand_distr::Uniform;

use crate::nn::{register_var, softplus, softplus_inverse_f64, DTYPE};

const MIN_SIGMA: f64 = 1e-4;

/// Output of a layer pass in either direction.
pub struct LayerPass {
    /// The transformed sequence `[B, n, D]`.
    pub output: Tensor,
    /// `sum_t sum_d ln sigma_t`, `[B]`.
    pub log_det: Tensor,
}

/// One autoregressive affine layer over `[B, n, D]` sequences.
#[derive(Debug, Clone)]
pub struct AutoregressiveAffine {
    w_in: Linear,
    w_h: Linear,
    w_c: Linear,
    w_ctx: Linear,
    head_h: Linear,
    head_c: Linear,
    dim: usize,
    base_state: bool,
}

/// Weight `[out, in]` uniform in `±1/sqrt(in)`, drawn from `rng`.
fn init_linear<R: Rng + ?Sized>(
    var_map: &VarMap,
    name: &str,
    in_dim: usize,
    out_dim: usize,
    with_bias: bool,
    rng: &mut R,
    device: &Device,
) -> candle_core::Result<Linear> {
    let bound = 1.0 / (in_dim.max(1) as f64).sqrt();
    let dist = Uniform::new_inclusive(-bound, bound);
    let w: Vec<f64> = (0..in_dim * out_dim).map(|_| rng.sample(dist)).collect();
    let w = Tensor::from_vec(w, (out_dim, in_dim), device)?;
    let weight = register_var(var_map, &format!("{name}.weight"), &w)?;
    let bias = if with_bias {
        let b: Vec<f64> = (0..out_dim).map(|_| rng.sample(dist)).collect();
        let b = Tensor::from_vec(b, out_dim, device)?;
        Some(register_var(var_map, &format!("{name}.bias"), &b)?)
    } else {
        None
    };
    Ok(Linear::new(weight, bias))
}

impl AutoregressiveAffine {
    /// Registers the layer's variables under `prefix`.
    #[allow(clippy::too_many_arguments)]
    pub fn new<R: Rng + ?Sized>(
        var_map: &VarMap,
        prefix: &str,
        dim: usize,
        hidden: usize,
        feature_dim: usize,
        context_dim: usize,
        base_state: bool,
        rng: &mut R,
        device: &Device,
    ) -> candle_core::Result<Self> {
        let mut linear = |name: &str, in_dim: usize, out_dim: usize, with_bias: bool| {
            let name = format!("{prefix}.{name}");
            init_linear(var_map, &name, in_dim, out_dim, with_bias, rng, device)
        };
        let w_in = linear("w_in", dim, hidden, false)?;
        let w_h = linear("w_h", hidden, hidden, false)?;
        let w_c = linear("w_c", feature_dim, hidden, true)?;
        let w_ctx = linear("w_ctx", context_dim, hidden, false)?;

        let zeros_h = Tensor::zeros((2 * dim, hidden), DTYPE, device)?;
        let zeros_c = Tensor::zeros((2 * dim, feature_dim), DTYPE, device)?;
        let mut bias = vec![0.0; 2 * dim];
        bias[dim..].fill(softplus_inverse_f64(1.0 - MIN_SIGMA));
        let bias = Tensor::from_vec(bias, 2 * dim, device)?;
        let head_h = Linear::new(
            register_var(var_map, &format!("{prefix}.head_h.weight"), &zeros_h)?,
            None,
        );
        let head_c = Linear::new(
            register_var(var_map, &format!("{prefix}.head_c.weight"), &zeros_c)?,
            Some(register_var(var_map, &format!("{prefix}.head_c.bias"), &bias)?),
        );

        Ok(Self {
            w_in,
            w_h,
            w_c,
            w_ctx,
            head_h,
            head_c,
            dim,
            base_state,
        })
    }

    /// `(mu, sigma)` for one step, both `[B, D]`.
    fn affine_params(
        &self,
        h: &Tensor,
        c_head_t: &Tensor,
    ) -> candle_core::Result<(Tensor, Tensor)> {
        let out = self.head_h.forward(h)?.broadcast_add(c_head_t)?;
        let mu = out.narrow(1, 0, self.dim)?;
        let sigma = (softplus(&out.narrow(1, self.dim, self.dim)?)? + MIN_SIGMA)?;
        Ok((mu, sigma))
    }

    /// Runs the recurrence. `invert = false` maps `u -> y`, `true` maps
    /// `y -> u`; the log-determinant is that of `u -> y` in both cases.
    fn run(
        &self,
        input: &Tensor,
        features: &Tensor,
        context: &Tensor,
        invert: bool,
    ) -> candle_core::Result<LayerPass> {
        let n = input.dim(1)?;
        let ctx_h = self.w_ctx.forward(context)?;
        let c_h = self.w_c.forward(features)?;
        let c_head = self.head_c.forward(features)?;

        let mut h = ctx_h.tanh()?;
        let mut outputs = Vec::with_capacity(n);
        let mut log_sigma = Vec::with_capacity(n);
        for t in 0..n {
            let (mu, sigma) = self.affine_params(&h, &c_head.narrow(0, t, 1)?)?;
            let x_t = input.narrow(1, t, 1)?.squeeze(1)?;
            let (u_t, y_t) = if invert {
                ((&x_t - &mu)?.div(&sigma)?, x_t)
            } else {
                let y_t = (&mu + (&sigma * &x_t)?)?;
                (x_t, y_t)
            };
            log_sigma.push(sigma.log()?.sum(1)?);
            let feed = if self.base_state { &u_t } else { &y_t };
            let pre = (self.w_h.forward(&h)? + self.w_in.forward(feed)?)?
                .broadcast_add(&c_h.narrow(0, t, 1)?)?;
            h = (pre + &ctx_h)?.tanh()?;
            outputs.push(if invert { u_t } else { y_t });
        }
        Ok(LayerPass {
            output: Tensor::stack(&outputs, 1)?,
            log_det: Tensor::stack(&log_sigma, 1)?.sum(1)?,
        })
    }

    /// `u -> y` for `u: [B, n, D]`, features `[n, C]`, context `[B, P]`.
    pub fn forward(
        &self,
        u: &Tensor,
        features: &Tensor,
        context: &Tensor,
    ) -> candle_core::Result<LayerPass> {
        self.run(u, features, context, false)
    }

    /// `y -> u`, with the log-determinant of the forward map.
    pub fn inverse(
        &self,
        y: &Tensor,
        features: &Tensor,
        context: &Tensor,
    ) -> candle_core::Result<LayerPass> {
        self.run(y, features, context, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::standard_normal;
    use rand::{rngs::StdRng, SeedableRng};

    fn layer(base_state: bool, var_map: &VarMap, rng: &mut StdRng) -> AutoregressiveAffine {
        AutoregressiveAffine::new(var_map, "l0", 2, 8, 3, 4, base_state, rng, &Device::Cpu).unwrap()
    }

    #[test]
    fn fresh_layer_is_near_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let var_map = VarMap::new();
        let l = layer(false, &var_map, &mut rng);
        let u = standard_normal(&mut rng, (3, 5, 2), &Device::Cpu).unwrap();
        let f = standard_normal(&mut rng, (5, 3), &Device::Cpu).unwrap();
        let ctx = standard_normal(&mut rng, (3, 4), &Device::Cpu).unwrap();
        let pass = l.forward(&u, &f, &ctx).unwrap();
        let diff = (pass.output - &u).unwrap().abs().unwrap().max_keepdim(2).unwrap();
        let max = diff.flatten_all().unwrap().max(0).unwrap().to_scalar::<f64>().unwrap();
        assert!(max < 1e-9, "{max}");
        for v in pass.log_det.to_vec1::<f64>().unwrap() {
            assert!(v.abs() < 1e-8);
        }
    }

    #[test]
    fn inverse_recovers_input() {
        for base_state in [false, true] {
            let mut rng = StdRng::seed_from_u64(1);
            let var_map = VarMap::new();
            let l = layer(base_state, &var_map, &mut rng);
            // Perturb the zero-initialized heads so the map is non-trivial.
            for var in var_map.all_vars() {
                let noise = standard_normal(&mut rng, var.dims(), &Device::Cpu).unwrap();
                var.set(&(var.as_tensor() + (noise * 0.1).unwrap()).unwrap()).unwrap();
            }
            let u = standard_normal(&mut rng, (2, 6, 2), &Device::Cpu).unwrap();
            let f = standard_normal(&mut rng, (6, 3), &Device::Cpu).unwrap();
            let ctx = standard_normal(&mut rng, (2, 4), &Device::Cpu).unwrap();
            let fwd = l.forward(&u, &f, &ctx).unwrap();
            let inv = l.inverse(&fwd.output, &f, &ctx).unwrap();
            let err = (inv.output - &u)
                .unwrap()
                .abs()
                .unwrap()
                .flatten_all()
                .unwrap()
                .max(0)
                .unwrap()
                .to_scalar::<f64>()
                .unwrap();
            assert!(err < 1e-9, "base_state={base_state}: {err}");
            let a = fwd.log_det.to_vec1::<f64>().unwrap();
            let b = inv.log_det.to_vec1::<f64>().unwrap();
            for (x, y) in a.iter().zip(&b) {
                assert!((x - y).abs() < 1e-9);
            }
        }
    }
}
