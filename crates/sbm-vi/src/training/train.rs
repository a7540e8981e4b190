//! Model assembly and the optimization loop.

use std::path::Path;

use candle_core::backprop::GradStore;
use candle_core::{Device, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use rand::rngs::StdRng;
use rand::RngCore;
use sbm_core::{
    ForcingSeries, InitialStatePrior, NonFinitePolicy, ObservationSet, PriorBundle, Result,
    SbmError, TimeGrid, TrainConfig, DEFAULT_TIME_COLUMN,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::distributions::{
    build_posterior, build_prior, load_prior_safetensors, ConstrainedDistribution,
    DiagonalNormal, PosteriorFamily, PriorFamily,
};
use crate::flow::{conditioning_features, FlowConfig, PathFlow};
use crate::model::VariationalModel;
use crate::nn::scalar;
use crate::obs::ObsModel;
use crate::params::ParameterSpace;
use crate::sde::{build_sde, DiffusionType, ModelClass, SdeModel};

use super::eval::evaluate;
use super::schedule::{LrSchedule, TrainingPhase};

/// Everything loaded before training starts.
#[derive(Debug, Clone)]
pub struct TrainingData {
    grid: TimeGrid,
    forcing: ForcingSeries,
    observations: ObservationSet,
    x0_prior: InitialStatePrior,
    priors: PriorBundle,
}

impl TrainingData {
    /// # Errors
    ///
    /// Returns [`SbmError::Data`] if the forcing does not cover the grid.
    pub fn new(
        grid: TimeGrid,
        forcing: ForcingSeries,
        observations: ObservationSet,
        x0_prior: InitialStatePrior,
        priors: PriorBundle,
    ) -> Result<Self> {
        if forcing.len() != grid.len() {
            return Err(SbmError::data(format!(
                "forcing has {} steps but the grid has {}",
                forcing.len(),
                grid.len()
            )));
        }
        Ok(Self {
            grid,
            forcing,
            observations,
            x0_prior,
            priors,
        })
    }

    /// Reads the observation CSV (time column `hour`) and the prior file.
    ///
    /// Prior files ending in `.safetensors` are read as tensors, anything
    /// else as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SbmError::Io`] or [`SbmError::Data`] for the observation
    /// file and [`SbmError::Config`] for the prior file.
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        grid: TimeGrid,
        forcing: ForcingSeries,
        observations_csv: P,
        x0_prior: InitialStatePrior,
        prior_file: Q,
    ) -> Result<Self> {
        let observations =
            ObservationSet::from_csv_path(observations_csv, &grid, DEFAULT_TIME_COLUMN)?;
        let prior_file = prior_file.as_ref();
        let priors = if prior_file.extension().is_some_and(|e| e == "safetensors") {
            load_prior_safetensors(prior_file)?
        } else {
            PriorBundle::from_json_path(prior_file)?
        };
        Self::new(grid, forcing, observations, x0_prior, priors)
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    pub fn forcing(&self) -> &ForcingSeries {
        &self.forcing
    }

    pub fn observations(&self) -> &ObservationSet {
        &self.observations
    }

    pub fn x0_prior(&self) -> &InitialStatePrior {
        &self.x0_prior
    }

    pub fn priors(&self) -> &PriorBundle {
        &self.priors
    }
}

/// Per-iteration records of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    /// Pretraining fit loss per pretraining iteration.
    pub pretrain_loss: Vec<f64>,
    /// Negative ELBO per applied optimizer step.
    pub loss: Vec<f64>,
    /// Global gradient norm per applied step, before clipping.
    pub grad_norm: Vec<f64>,
    /// `(iteration, held-out negative ELBO)`; iteration 0 is before the
    /// first update and the last entry is always the terminal iteration.
    pub eval: Vec<(usize, f64)>,
    /// Steps skipped under [`NonFinitePolicy::SkipStep`].
    pub skipped_steps: usize,
}

/// A fitted model and its history.
#[derive(Debug)]
pub struct TrainedModel {
    pub model: VariationalModel,
    pub history: TrainingHistory,
    /// Hyperparameter suffix from [`TrainConfig::run_suffix`].
    pub run_suffix: String,
}

impl TrainedModel {
    pub fn flow(&self) -> &PathFlow {
        self.model.flow()
    }

    pub fn posterior(&self) -> &dyn ConstrainedDistribution {
        self.model.posterior()
    }

    pub fn prior(&self) -> &dyn ConstrainedDistribution {
        self.model.prior()
    }

    pub fn obs(&self) -> &ObsModel {
        self.model.obs()
    }

    pub fn sde(&self) -> &dyn SdeModel {
        self.model.sde()
    }

    /// Gradient norms of every applied step.
    pub fn grad_norm_history(&self) -> &[f64] {
        &self.history.grad_norm
    }

    pub fn loss_history(&self) -> &[f64] {
        &self.history.loss
    }

    pub fn eval_history(&self) -> &[(usize, f64)] {
        &self.history.eval
    }
}

/// Builds the SDE, parameter space, prior, posterior, observation model and
/// flow described by `config`.
///
/// Flow weights are drawn from `rng`.
///
/// # Errors
///
/// Returns [`SbmError::Config`] for invalid options, unknown names, missing
/// priors or a CPU device when an accelerator is required, and
/// [`SbmError::Data`] for dimension mismatches in `data`.
pub fn build_model(
    data: &TrainingData,
    config: &TrainConfig,
    device: &Device,
    rng: &mut dyn RngCore,
) -> Result<VariationalModel> {
    config.validate()?;
    if config.require_accelerator && device.is_cpu() {
        return Err(SbmError::config(
            "an accelerator device is required but a CPU device was given",
        ));
    }
    let class: ModelClass = config.model_class.parse()?;
    let diffusion: DiffusionType = config.diffusion_type.parse()?;
    let prior_family: PriorFamily = config.prior_family.parse()?;
    let posterior_family: PosteriorFamily = config.posterior_family.parse()?;

    let sde = build_sde(class, diffusion, &data.forcing, config.temp_ref, device)?;
    data.x0_prior.check_dim(sde.state_dim())?;
    let space = ParameterSpace::new(sde.param_names(), &config.fixed_params)?;
    let specs = data.priors.require(space.free_names())?;

    let prior = build_prior(prior_family, space.free_names(), &specs, device)?;
    let posterior_vars = VarMap::new();
    let posterior = build_posterior(
        posterior_family,
        prior_family,
        space.free_names(),
        &specs,
        &posterior_vars,
        device,
    )?;

    let obs = ObsModel::new(
        &data.observations,
        sde.state_names(),
        config.learn_co2,
        config.obs_error_scale,
        device,
    )?;
    let features = conditioning_features(
        &data.grid,
        &data.forcing,
        &data.observations,
        sde.state_names(),
        data.x0_prior.mean(),
        device,
    )?;
    let flow_vars = VarMap::new();
    let flow = PathFlow::new(
        &flow_vars,
        &FlowConfig::from(config),
        features,
        data.x0_prior.mean(),
        data.x0_prior.error_scale(),
        space.names().len(),
        rng,
        device,
    )?;
    let x0_prior = DiagonalNormal::from_initial_state(&data.x0_prior, device)?;

    info!(
        model = ?class,
        diffusion = ?diffusion,
        free = space.num_free(),
        fixed = config.fixed_params.len(),
        steps = data.grid.len(),
        observed = ?obs.variables(),
        "built variational model"
    );

    Ok(VariationalModel {
        sde,
        flow,
        prior,
        posterior,
        x0_prior,
        obs,
        space,
        dt: data.grid.dt(),
        flow_vars,
        posterior_vars,
        device: device.clone(),
    })
}

/// Consecutive-skip bookkeeping for non-finite steps.
struct StepGuard {
    policy: NonFinitePolicy,
    max_skipped: usize,
    consecutive: usize,
    total: usize,
}

impl StepGuard {
    fn new(config: &TrainConfig) -> Self {
        Self {
            policy: config.non_finite_policy,
            max_skipped: config.max_skipped_steps,
            consecutive: 0,
            total: 0,
        }
    }

    /// `Ok` means skip this step and continue.
    fn reject(&mut self, iteration: usize, what: &str) -> Result<()> {
        match self.policy {
            NonFinitePolicy::Abort => Err(SbmError::Numerical {
                iteration,
                message: format!("{what} is not finite"),
            }),
            NonFinitePolicy::SkipStep => {
                self.consecutive += 1;
                self.total += 1;
                if self.consecutive > self.max_skipped {
                    return Err(SbmError::Numerical {
                        iteration,
                        message: format!(
                            "{what} is not finite; {} consecutive steps skipped",
                            self.consecutive
                        ),
                    });
                }
                warn!(iteration, what, consecutive = self.consecutive, "skipping step");
                Ok(())
            }
        }
    }

    fn accept(&mut self) {
        self.consecutive = 0;
    }
}

fn grad_norm(grads: &GradStore, vars: &[Var]) -> candle_core::Result<f64> {
    let mut total = 0.0;
    for var in vars {
        if let Some(g) = grads.get(var.as_tensor()) {
            total += g.sqr()?.sum_all()?.to_scalar::<f64>()?;
        }
    }
    Ok(total.sqrt())
}

fn scale_grads(grads: &mut GradStore, vars: &[Var], factor: f64) -> candle_core::Result<()> {
    for var in vars {
        let scaled = match grads.get(var.as_tensor()) {
            Some(g) => (g * factor)?,
            None => continue,
        };
        grads.insert(var.as_tensor(), scaled);
    }
    Ok(())
}

fn write_snapshot(model: &VariationalModel, dir: &Path, suffix: &str, iteration: usize) -> Result<()> {
    let map_err = |e: candle_core::Error| SbmError::Backend {
        message: format!("write_snapshot: {e}"),
    };
    std::fs::create_dir_all(dir)?;
    let flow = dir.join(format!("flow{suffix}_at_{iteration}.safetensors"));
    let posterior = dir.join(format!("q_theta{suffix}_at_{iteration}.safetensors"));
    model.flow_vars.save(&flow).map_err(map_err)?;
    model.posterior_vars.save(&posterior).map_err(map_err)?;
    debug!(iteration, path = %flow.display(), "wrote snapshot");
    Ok(())
}

fn log_progress(
    config: &TrainConfig,
    iteration: usize,
    phase: TrainingPhase,
    loss: f64,
    norm: Option<f64>,
    lr: f64,
) {
    if config.verbose {
        info!(iteration, %phase, loss, grad_norm = norm, lr, "training");
    } else {
        debug!(iteration, %phase, loss, grad_norm = norm, lr, "training");
    }
}

/// Flow-only fit of sampled paths to the observations. The posterior is
/// sampled but not updated.
fn pretrain(
    model: &VariationalModel,
    config: &TrainConfig,
    rng: &mut dyn RngCore,
    guard: &mut StepGuard,
    history: &mut TrainingHistory,
) -> Result<()> {
    let map_err = |e: candle_core::Error| SbmError::Backend {
        message: format!("pretrain: {e}"),
    };
    let params = ParamsAdamW {
        lr: config.learning_rate,
        weight_decay: 0.0,
        ..Default::default()
    };
    let mut optimizer = AdamW::new(model.flow_vars.all_vars(), params).map_err(map_err)?;
    for it in 0..config.pretrain_iterations {
        let (theta_eps, path_eps) = model.draw_noise(config.batch_size, rng)?;
        let (free, _) = model.posterior.sample_from_noise(&theta_eps)?;
        let theta = model.assemble_theta(&free)?;
        let sample = model.flow.sample_from_noise(&path_eps, &theta)?;
        let loss = model
            .observed_paths(&sample.trajectory, &theta)
            .and_then(|paths| model.obs.fit_loss(&paths, config.pretrain_loss))
            .map_err(map_err)?;
        let value = scalar(&loss).map_err(map_err)?;
        if !value.is_finite() {
            guard.reject(it, "pretraining loss")?;
            continue;
        }
        guard.accept();
        optimizer.backward_step(&loss).map_err(map_err)?;
        history.pretrain_loss.push(value);
        if config.print_every > 0 && (it + 1) % config.print_every == 0 {
            let lr = config.learning_rate;
            log_progress(config, it + 1, TrainingPhase::Pretrain, value, None, lr);
        }
    }
    Ok(())
}

/// Runs pretraining (if configured), warmup and the main phase on `model`.
///
/// # Errors
///
/// Returns [`SbmError::Numerical`] when a non-finite loss or gradient is
/// not tolerated by the configured policy, and [`SbmError::Backend`] or
/// [`SbmError::Io`] on backend and snapshot failures.
pub fn fit(
    model: &VariationalModel,
    config: &TrainConfig,
    rng: &mut dyn RngCore,
) -> Result<TrainingHistory> {
    let map_err = |e: candle_core::Error| SbmError::Backend {
        message: format!("fit: {e}"),
    };
    config.validate()?;
    let mut history = TrainingHistory::default();
    let mut guard = StepGuard::new(config);
    let suffix = config.run_suffix(model.dt * (model.flow.steps() - 1) as f64, model.dt);

    if config.pretrain_iterations > 0 {
        info!(iterations = config.pretrain_iterations, loss = ?config.pretrain_loss, "pretraining flow");
        pretrain(model, config, rng, &mut guard, &mut history)?;
        guard.accept();
    }

    let mut vars = model.flow_vars.all_vars();
    vars.extend(model.posterior_vars.all_vars());
    let schedule = LrSchedule::from_config(config);
    let params = ParamsAdamW {
        lr: schedule.learning_rate(0),
        weight_decay: 0.0,
        ..Default::default()
    };
    let mut optimizer = AdamW::new(vars.clone(), params).map_err(map_err)?;

    if config.eval_every > 0 {
        let initial = evaluate(model, config.eval_batch_size, rng)?;
        history.eval.push((0, initial.neg_elbo));
    }

    let mut iteration = 0;
    loop {
        let phase = schedule.phase(iteration);
        if phase == TrainingPhase::Finished {
            break;
        }
        let lr = schedule.learning_rate(iteration);
        optimizer.set_learning_rate(lr);

        let sample = model.estimate(config.batch_size, rng)?;
        let loss = sample.terms.neg_elbo().map_err(map_err)?;
        let value = scalar(&loss).map_err(map_err)?;
        if !value.is_finite() {
            guard.reject(iteration, "negative ELBO")?;
            iteration += 1;
            continue;
        }

        let mut grads = loss.backward().map_err(map_err)?;
        let norm = grad_norm(&grads, &vars).map_err(map_err)?;
        if !norm.is_finite() {
            guard.reject(iteration, "gradient norm")?;
            iteration += 1;
            continue;
        }
        guard.accept();
        if let Some(max) = config.max_grad_norm {
            if norm > max {
                scale_grads(&mut grads, &vars, max / norm).map_err(map_err)?;
            }
        }
        optimizer.step(&grads).map_err(map_err)?;
        history.loss.push(value);
        history.grad_norm.push(norm);
        iteration += 1;

        if config.print_every > 0 && iteration % config.print_every == 0 {
            log_progress(config, iteration, phase, value, Some(norm), lr);
        }
        if config.eval_every > 0 && iteration % config.eval_every == 0 {
            let eval = evaluate(model, config.eval_batch_size, rng)?;
            debug!(iteration, neg_elbo = eval.neg_elbo, "held-out evaluation");
            history.eval.push((iteration, eval.neg_elbo));
            if let Some(dir) = &config.debug_snapshot_dir {
                write_snapshot(model, dir, &suffix, iteration)?;
            }
        }
    }

    if history.eval.last().map(|(i, _)| *i) != Some(iteration) {
        let eval = evaluate(model, config.eval_batch_size, rng)?;
        debug!(iteration, neg_elbo = eval.neg_elbo, "final held-out evaluation");
        history.eval.push((iteration, eval.neg_elbo));
    }

    history.skipped_steps = guard.total;
    info!(
        iterations = iteration,
        skipped = history.skipped_steps,
        final_loss = history.loss.last().copied().unwrap_or(f64::NAN),
        "training finished"
    );
    Ok(history)
}

/// Builds the model and fits it.
///
/// # Errors
///
/// See [`build_model`] and [`fit`].
///
/// # Example
///
/// ```no_run
/// use candle_core::Device;
/// use rand::{rngs::StdRng, SeedableRng};
/// use sbm_core::{ForcingSeries, InitialStatePrior, TimeGrid, TrainConfig};
/// use sbm_vi::training::{train, TrainingData};
///
/// let grid = TimeGrid::new(1000.0, 1.0).unwrap();
/// let n = grid.len();
/// let forcing = ForcingSeries::new(&grid, vec![283.0; n], vec![0.001; n], vec![0.0001; n]).unwrap();
/// let x0 = InitialStatePrior::new(vec![50.0, 0.1, 1.0], 0.1).unwrap();
/// let data = TrainingData::load(grid, forcing, "obs.csv", x0, "priors.json").unwrap();
///
/// let mut rng = StdRng::seed_from_u64(0);
/// let trained = train(&data, &TrainConfig::default(), &Device::Cpu, &mut rng).unwrap();
/// println!("final loss {:?}", trained.loss_history().last());
/// ```
pub fn train(
    data: &TrainingData,
    config: &TrainConfig,
    device: &Device,
    rng: &mut StdRng,
) -> Result<TrainedModel> {
    let model = build_model(data, config, device, rng)?;
    let history = fit(&model, config, rng)?;
    Ok(TrainedModel {
        model,
        history,
        run_suffix: config.run_suffix(data.grid.t_end(), data.grid.dt()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::test_support::{small_config, small_data};
    use candle_core::Tensor;
    use rand::SeedableRng;

    #[test]
    fn short_run_records_history() {
        let mut rng = StdRng::seed_from_u64(0);
        let config = small_config();
        let trained = train(&small_data(), &config, &Device::Cpu, &mut rng).unwrap();
        assert_eq!(trained.loss_history().len(), config.total_iterations());
        assert_eq!(trained.grad_norm_history().len(), config.total_iterations());
        assert!(trained.loss_history().iter().all(|l| l.is_finite()));
        assert!(trained.grad_norm_history().iter().all(|g| *g > 0.0));
        let evals: Vec<usize> = trained.eval_history().iter().map(|(i, _)| *i).collect();
        assert_eq!(evals, vec![0, 2, 4, 5]);
        assert!(trained.run_suffix.starts_with("_iter_3_warmup_2"));

        let json = serde_json::to_string(&trained.history).unwrap();
        let back: TrainingHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(back.eval.len(), 4);
    }

    #[test]
    fn final_evaluation_lands_on_last_iteration() {
        let mut rng = StdRng::seed_from_u64(7);
        let config = TrainConfig {
            eval_every: 0,
            ..small_config()
        };
        let trained = train(&small_data(), &config, &Device::Cpu, &mut rng).unwrap();
        let evals: Vec<usize> = trained.eval_history().iter().map(|(i, _)| *i).collect();
        assert_eq!(evals, vec![config.total_iterations()]);

        let config = TrainConfig {
            eval_every: 5,
            ..small_config()
        };
        let trained = train(&small_data(), &config, &Device::Cpu, &mut rng).unwrap();
        let evals: Vec<usize> = trained.eval_history().iter().map(|(i, _)| *i).collect();
        assert_eq!(evals, vec![0, 5]);
    }

    #[test]
    fn training_moves_posterior_variables() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = build_model(&small_data(), &small_config(), &Device::Cpu, &mut rng).unwrap();
        let before: Vec<Tensor> = model
            .posterior_vars()
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().copy().unwrap())
            .collect();
        fit(&model, &small_config(), &mut rng).unwrap();
        let moved = model
            .posterior_vars()
            .all_vars()
            .iter()
            .zip(&before)
            .any(|(v, b)| {
                let diff = (v.as_tensor() - b).unwrap().abs().unwrap().sum_all().unwrap();
                diff.to_scalar::<f64>().unwrap() > 0.0
            });
        assert!(moved);
    }

    #[test]
    fn cpu_rejected_when_accelerator_required() {
        let mut rng = StdRng::seed_from_u64(2);
        let config = TrainConfig {
            require_accelerator: true,
            ..small_config()
        };
        let err = build_model(&small_data(), &config, &Device::Cpu, &mut rng).unwrap_err();
        assert!(matches!(err, SbmError::Config { .. }));
    }

    #[test]
    fn unknown_model_class_is_config_error() {
        let mut rng = StdRng::seed_from_u64(3);
        let config = TrainConfig {
            model_class: "CENTURY".to_string(),
            ..small_config()
        };
        let err = build_model(&small_data(), &config, &Device::Cpu, &mut rng).unwrap_err();
        assert!(matches!(err, SbmError::Config { .. }));
    }

    #[test]
    fn missing_prior_is_config_error() {
        let mut rng = StdRng::seed_from_u64(4);
        let full = small_data();
        let mut priors = PriorBundle::new();
        priors.insert("u_M", *full.priors().get("u_M").unwrap()).unwrap();
        let data = TrainingData::new(
            *full.grid(),
            full.forcing().clone(),
            full.observations().clone(),
            full.x0_prior().clone(),
            priors,
        )
        .unwrap();
        let err = build_model(&data, &small_config(), &Device::Cpu, &mut rng).unwrap_err();
        assert!(matches!(err, SbmError::Config { .. }));
        assert!(err.to_string().contains("a_SD"));
    }

    #[test]
    fn mismatched_forcing_is_data_error() {
        let full = small_data();
        let short = TimeGrid::new(5.0, 1.0).unwrap();
        let err = TrainingData::new(
            short,
            full.forcing().clone(),
            full.observations().clone(),
            full.x0_prior().clone(),
            full.priors().clone(),
        )
        .unwrap_err();
        assert!(matches!(err, SbmError::Data { .. }));
    }

    #[test]
    fn abort_policy_reports_iteration() {
        let guard_config = TrainConfig::default();
        let mut guard = StepGuard::new(&guard_config);
        let err = guard.reject(17, "negative ELBO").unwrap_err();
        assert!(matches!(err, SbmError::Numerical { iteration: 17, .. }));
    }

    #[test]
    fn skip_policy_tolerates_limited_skips() {
        let config = TrainConfig {
            non_finite_policy: NonFinitePolicy::SkipStep,
            max_skipped_steps: 2,
            ..TrainConfig::default()
        };
        let mut guard = StepGuard::new(&config);
        assert!(guard.reject(0, "loss").is_ok());
        assert!(guard.reject(1, "loss").is_ok());
        guard.accept();
        assert!(guard.reject(2, "loss").is_ok());
        assert!(guard.reject(3, "loss").is_ok());
        let err = guard.reject(4, "loss").unwrap_err();
        assert!(err.is_numerical());
        assert_eq!(guard.total, 5);
    }

    #[test]
    fn pretraining_updates_only_the_flow() {
        let mut rng = StdRng::seed_from_u64(5);
        let config = TrainConfig {
            pretrain_iterations: 3,
            warmup_iterations: 0,
            iterations: 0,
            eval_every: 0,
            ..small_config()
        };
        let model = build_model(&small_data(), &config, &Device::Cpu, &mut rng).unwrap();
        let q_before: Vec<Vec<f64>> = model
            .posterior_vars()
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().flatten_all().unwrap().to_vec1::<f64>().unwrap())
            .collect();
        let history = fit(&model, &config, &mut rng).unwrap();
        assert_eq!(history.pretrain_loss.len(), 3);
        assert!(history.loss.is_empty());
        let q_after: Vec<Vec<f64>> = model
            .posterior_vars()
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().flatten_all().unwrap().to_vec1::<f64>().unwrap())
            .collect();
        assert_eq!(q_before, q_after);
    }

    #[test]
    fn snapshots_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(6);
        let config = TrainConfig {
            debug_snapshot_dir: Some(dir.path().join("snaps")),
            ..small_config()
        };
        train(&small_data(), &config, &Device::Cpu, &mut rng).unwrap();
        let files: Vec<_> = std::fs::read_dir(dir.path().join("snaps"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files.len(), 4);
        assert!(files.iter().all(|f| f.ends_with(".safetensors")));
    }
}
