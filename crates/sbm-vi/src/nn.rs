//! Shared tensor primitives: stable activations, Gaussian densities, noise
//! draws from an explicitly passed RNG, and variable registration.

use candle_core::{DType, Device, Result, Shape, Tensor, Var};
use candle_nn::VarMap;
use rand::Rng;
use rand_distr::StandardNormal;

/// Element type used for every tensor of the engine.
pub const DTYPE: DType = DType::F64;

/// `ln(2π)`.
pub(crate) const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Softplus `ln(1 + e^x)` computed as `max(x, 0) + ln(1 + e^{-|x|})`.
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    x.relu()? + tail
}

/// `ln σ(x) = -softplus(-x)`.
pub fn log_sigmoid(x: &Tensor) -> Result<Tensor> {
    softplus(&x.neg()?)?.neg()
}

/// Inverse of [`softplus`] for positive inputs: `y + ln(1 - e^{-y})`.
pub fn softplus_inverse(y: &Tensor) -> Result<Tensor> {
    let y = y.maximum(1e-12)?;
    let tail = y.neg()?.exp()?.affine(-1.0, 1.0)?.log()?;
    y + tail
}

/// Scalar inverse softplus, for initial values.
pub(crate) fn softplus_inverse_f64(y: f64) -> f64 {
    if y > 30.0 {
        y
    } else {
        y.exp_m1().ln()
    }
}

/// Elementwise `ln N(x; mean, std)` with broadcasting.
pub fn normal_log_density(x: &Tensor, mean: &Tensor, std: &Tensor) -> Result<Tensor> {
    let z = x.broadcast_sub(mean)?.broadcast_div(std)?;
    let quad = (z.sqr()? * -0.5)?;
    quad.broadcast_sub(&std.log()?)? - 0.5 * LN_2PI
}

/// Elementwise standard normal log-density.
pub fn std_normal_log_density(eps: &Tensor) -> Result<Tensor> {
    (eps.sqr()? * -0.5)? - 0.5 * LN_2PI
}

/// Draws standard normal noise of `shape` from `rng` onto `device`.
pub fn standard_normal<R, S>(rng: &mut R, shape: S, device: &Device) -> Result<Tensor>
where
    R: Rng + ?Sized,
    S: Into<Shape>,
{
    let shape = shape.into();
    let data: Vec<f64> = (0..shape.elem_count())
        .map(|_| rng.sample::<f64, _>(StandardNormal))
        .collect();
    Tensor::from_vec(data, shape, device)
}

/// Registers a trainable variable with an explicit initial value.
///
/// `VarBuilder` hints only support constant or random initializers; the
/// posterior and flow need data-dependent starting points.
pub fn register_var(var_map: &VarMap, name: &str, init: &Tensor) -> Result<Tensor> {
    let var = Var::from_tensor(init)?;
    let tensor = var.as_tensor().clone();
    let mut data = var_map
        .data()
        .lock()
        .map_err(|e| candle_core::Error::Msg(format!("var map lock poisoned: {e}")))?;
    data.insert(name.to_string(), var);
    Ok(tensor)
}

/// Reverses a tensor along `dim`.
pub fn reverse_along(x: &Tensor, dim: usize) -> Result<Tensor> {
    let len = x.dim(dim)?;
    let ids: Vec<u32> = (0..len as u32).rev().collect();
    let ids = Tensor::from_vec(ids, len, x.device())?;
    x.index_select(&ids, dim)
}

/// Sums every dimension except the leading batch dimension.
pub fn sum_per_sample(x: &Tensor) -> Result<Tensor> {
    let mut out = x.clone();
    while out.rank() > 1 {
        out = out.sum(out.rank() - 1)?;
    }
    Ok(out)
}

/// Scalar value of a 0-d or single-element tensor.
pub fn scalar(x: &Tensor) -> Result<f64> {
    x.flatten_all()?.to_dtype(DTYPE)?.get(0)?.to_scalar::<f64>()
}
