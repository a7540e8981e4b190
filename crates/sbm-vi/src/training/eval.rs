//! Held-out ELBO evaluation.

use candle_core::Tensor;
use rand::RngCore;
use sbm_core::{Result, SbmError};

use crate::model::VariationalModel;
use crate::nn::scalar;

/// Result of one held-out evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Negative batch-mean ELBO.
    pub neg_elbo: f64,
    /// Batch means of the ELBO terms, in [`crate::elbo::ElboTerms`] field
    /// order.
    pub term_means: [f64; 6],
    /// Sampled paths `[B, n, V]`, with the derived CO2 flux as the last
    /// column when it is scored.
    pub paths: Tensor,
    /// Parameter draws `[B, P]` the paths were generated under.
    pub theta: Tensor,
}

/// Estimates the ELBO on `batch_size` fresh draws. Gradients are not
/// taken and no variable changes; the returned tensors are detached, so the
/// autodiff graph of the estimate is released on return.
///
/// # Errors
///
/// Propagates estimation failures; returns [`SbmError::Backend`] if the
/// reduction fails.
pub fn evaluate(
    model: &VariationalModel,
    batch_size: usize,
    rng: &mut dyn RngCore,
) -> Result<Evaluation> {
    let sample = model.estimate(batch_size, rng)?;
    let neg_elbo = sample
        .terms
        .neg_elbo()
        .and_then(|l| scalar(&l))
        .map_err(|e| SbmError::Backend {
            message: format!("evaluate: {e}"),
        })?;
    Ok(Evaluation {
        neg_elbo,
        term_means: sample.terms.means()?,
        paths: sample.paths.detach(),
        theta: sample.theta.detach(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::build_model;
    use crate::training::test_support::{small_config, small_data};
    use candle_core::Device;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn paths_carry_co2_column_when_learned() {
        for learn_co2 in [false, true] {
            let mut rng = StdRng::seed_from_u64(11);
            let config = sbm_core::TrainConfig {
                learn_co2,
                ..small_config()
            };
            let model = build_model(&small_data(), &config, &Device::Cpu, &mut rng).unwrap();
            let eval = evaluate(&model, 3, &mut rng).unwrap();
            let expected = if learn_co2 { 4 } else { 3 };
            assert_eq!(eval.paths.dims(), &[3, model.flow().steps(), expected]);
            assert!(eval.neg_elbo.is_finite());
        }
    }

    #[test]
    fn outputs_are_detached_from_the_graph() {
        let mut rng = StdRng::seed_from_u64(13);
        let model = build_model(&small_data(), &small_config(), &Device::Cpu, &mut rng).unwrap();
        let sample = model.estimate(3, &mut rng).unwrap();
        assert!(sample.paths.track_op());
        let eval = evaluate(&model, 3, &mut rng).unwrap();
        assert!(!eval.paths.track_op());
        assert!(!eval.theta.track_op());
    }

    #[test]
    fn same_seed_same_estimate() {
        let mut rng = StdRng::seed_from_u64(12);
        let model = build_model(&small_data(), &small_config(), &Device::Cpu, &mut rng).unwrap();
        let a = evaluate(&model, 4, &mut StdRng::seed_from_u64(99)).unwrap();
        let b = evaluate(&model, 4, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(a.neg_elbo, b.neg_elbo);
        assert_eq!(a.term_means, b.term_means);
    }
}
