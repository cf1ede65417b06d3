//! Fitting the hyperparameters of an exact GP to training data
//!
//! [`fit`] is the entry point: it validates the data and configuration,
//! builds an RBF model, runs the optimizer for the configured number of
//! epochs and returns a [`FittedModel`] ready for posterior queries.
use std::sync::Arc;

use nalgebra::DMatrix;

use crate::data::{rows_to_matrix, TrainingData};
use crate::param::{Hyperparameter, HyperparameterRegistry};
use crate::process::gaussian::kernel::{Kernel, RBFKernel};
use crate::process::gaussian::{
    ExactGp, MeanFunction, MultivariateNormal, NoiseModel,
};
use crate::result::{GpError, Result};

mod config;
pub use config::{EarlyStopping, FitConfig, MeanKind};

mod trainer;
pub use trainer::{
    CancellationToken, ProgressRecord, StopReason, Trainer, TrainerState,
};

/// Fit an RBF Gaussian process to `x_train` and `y_train`
///
/// Inputs are checked before the configuration, and nothing is computed
/// unless both are valid.
///
/// # Example
///
/// ```
/// use gpfit::{fit, FitConfig};
///
/// let x: Vec<Vec<f64>> = (0..15).map(|i| vec![i as f64 / 14.0]).collect();
/// let y: Vec<f64> = x
///     .iter()
///     .map(|x| (2.0 * std::f64::consts::PI * x[0]).sin())
///     .collect();
///
/// let config = FitConfig::default().with_num_epochs(50);
/// let model = fit(&x, &y, config).unwrap();
/// assert!(model.final_loss() < model.initial_loss());
///
/// let posterior = model.posterior(&[vec![0.25]]).unwrap();
/// let (lower, upper) = posterior.confidence_region(2.0);
/// assert!(lower[0] < posterior.mean()[0] && posterior.mean()[0] < upper[0]);
/// ```
pub fn fit(
    x_train: &[Vec<f64>],
    y_train: &[f64],
    config: FitConfig,
) -> Result<FittedModel<RBFKernel>> {
    let data = TrainingData::from_rows(x_train, y_train)?;
    config.validate()?;
    let kernel = RBFKernel::new(config.lengthscale_init)?;
    fit_with_kernel(kernel, Arc::new(data), config)
}

/// Fit a Gaussian process with an arbitrary kernel
///
/// The noise model and mean function are built from `config`; the kernel
/// enters the fit with its current hyperparameters.
pub fn fit_with_kernel<K: Kernel>(
    kernel: K,
    data: Arc<TrainingData>,
    config: FitConfig,
) -> Result<FittedModel<K>> {
    fit_with_cancellation(kernel, data, config, CancellationToken::new())
}

/// [`fit_with_kernel`] that stops early when `cancel` is triggered,
/// returning the best hyperparameters seen so far.
pub fn fit_with_cancellation<K: Kernel>(
    kernel: K,
    data: Arc<TrainingData>,
    config: FitConfig,
    cancel: CancellationToken,
) -> Result<FittedModel<K>> {
    config.validate()?;
    let noise = NoiseModel::new(config.noise_init, config.noise_floor)?;
    let mean = match config.mean {
        MeanKind::Zero => MeanFunction::Zero,
        MeanKind::Constant => MeanFunction::constant(config.constant_mean_init),
    };
    let gp = ExactGp::new(data, kernel, noise, mean);

    let mut trainer = Trainer::new(gp, config)?.with_cancellation(cancel);
    trainer.run(|_| ())?;
    trainer.finish()
}

/// A Gaussian process with fitted hyperparameters, in evaluation mode
#[derive(Clone, Debug, PartialEq)]
pub struct FittedModel<K>
where
    K: Kernel,
{
    pub(crate) gp: ExactGp<K>,
    pub(crate) initial_loss: f64,
    pub(crate) final_loss: f64,
    pub(crate) epochs_run: usize,
    pub(crate) stop_reason: StopReason,
    pub(crate) progress: Vec<ProgressRecord>,
}

impl<K> FittedModel<K>
where
    K: Kernel,
{
    /// Posterior of the latent function at the query points
    pub fn posterior(
        &self,
        x_query: &[Vec<f64>],
    ) -> Result<MultivariateNormal> {
        let xs = rows_to_matrix("x_query", x_query)?;
        self.gp.posterior(&xs)
    }

    /// Posterior at the rows of `xs`
    pub fn posterior_matrix(
        &self,
        xs: &DMatrix<f64>,
    ) -> Result<MultivariateNormal> {
        self.gp.posterior(xs)
    }

    /// Posterior predictive of new observations at the query points
    pub fn predictive(
        &self,
        x_query: &[Vec<f64>],
    ) -> Result<MultivariateNormal> {
        let xs = rows_to_matrix("x_query", x_query)?;
        self.gp.predictive(&xs)
    }

    /// The fitted hyperparameters
    pub fn hyperparameters(&self) -> Result<HyperparameterRegistry> {
        self.gp.registry()
    }

    /// Look up a fitted hyperparameter by its registry name, e.g.
    /// `"kernel.lengthscale"`
    pub fn hyperparameter(&self, name: &str) -> Result<Hyperparameter> {
        self.gp
            .hyperparameters()
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| {
                GpError::InvalidInput(format!(
                    "no hyperparameter named '{name}'"
                ))
            })
    }

    /// Fitted noise variance σ²
    pub fn noise_variance(&self) -> f64 {
        self.gp.noise().noise_variance()
    }

    /// Loss at the initial hyperparameters
    pub fn initial_loss(&self) -> f64 {
        self.initial_loss
    }

    /// Loss at the fitted hyperparameters
    pub fn final_loss(&self) -> f64 {
        self.final_loss
    }

    /// Number of optimizer iterations taken
    pub fn epochs_run(&self) -> usize {
        self.epochs_run
    }

    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason
    }

    /// Progress records emitted during the fit. Each call starts over from
    /// the first record.
    pub fn progress(&self) -> std::slice::Iter<'_, ProgressRecord> {
        self.progress.iter()
    }

    /// The fitted model
    pub fn model(&self) -> &ExactGp<K> {
        &self.gp
    }

    pub fn into_model(self) -> ExactGp<K> {
        self.gp
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use super::*;
    use crate::optim::UpdateRule;

    fn sine_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..15).map(|i| vec![i as f64 / 14.0]).collect();
        let y = x.iter().map(|x| (2.0 * PI * x[0]).sin()).collect();
        (x, y)
    }

    fn sine_config() -> FitConfig {
        FitConfig::default()
            .with_lengthscale_init(0.693)
            .with_noise_init(2.0)
            .with_learning_rate(0.1)
            .with_num_epochs(150)
    }

    #[test]
    fn sine_scenario_reduces_loss_and_noise() {
        let (x, y) = sine_data();
        for rule in [UpdateRule::default(), UpdateRule::GradientDescent] {
            let model =
                fit(&x, &y, sine_config().with_update_rule(rule)).unwrap();
            assert!(model.final_loss() < model.initial_loss());
            assert!(model.noise_variance() < 2.0);
            assert!(model.noise_variance() > 1E-5);
            assert_eq!(model.epochs_run(), 150);
            assert_eq!(model.stop_reason(), StopReason::Completed);
        }
    }

    #[test]
    fn fit_is_deterministic() {
        let (x, y) = sine_data();
        let a = fit(&x, &y, sine_config()).unwrap();
        let b = fit(&x, &y, sine_config()).unwrap();
        assert_eq!(
            a.hyperparameters().unwrap().raw_values(),
            b.hyperparameters().unwrap().raw_values()
        );
        assert_eq!(a.final_loss(), b.final_loss());
    }

    #[test]
    fn small_steps_descend() {
        let (x, y) = sine_data();
        let config = sine_config()
            .with_update_rule(UpdateRule::GradientDescent)
            .with_learning_rate(0.01)
            .with_num_epochs(10)
            .with_log_every(1);
        let model = fit(&x, &y, config).unwrap();
        let losses: Vec<f64> = model.progress().map(|r| r.loss).collect();
        assert_eq!(losses.len(), 10);
        for pair in losses.windows(2) {
            assert!(pair[1] <= pair[0] + 1E-10, "{losses:?}");
        }
    }

    #[test]
    fn constant_function_posterior() {
        let c = 1.7;
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64 / 3.0]).collect();
        let y = vec![c; 10];
        let config = FitConfig::default()
            .with_constant_mean(0.0)
            .with_noise_init(0.5)
            .with_num_epochs(300);
        let model = fit(&x, &y, config).unwrap();

        assert!(model.noise_variance() < 0.5);
        let query = vec![vec![0.5], vec![1.25], vec![2.9]];
        let posterior = model.posterior(&query).unwrap();
        for m in posterior.mean().iter() {
            assert!((m - c).abs() < 0.05, "{m}");
        }
    }

    #[test]
    fn progress_is_restartable() {
        let (x, y) = sine_data();
        let model = fit(&x, &y, sine_config().with_log_every(50)).unwrap();
        let epochs: Vec<usize> = model.progress().map(|r| r.epoch).collect();
        assert_eq!(epochs, vec![50, 100, 150]);
        let again: Vec<usize> = model.progress().map(|r| r.epoch).collect();
        assert_eq!(epochs, again);

        let record = model.progress().next().unwrap();
        assert!(record.hyperparameters.contains_key("kernel.lengthscale"));
        assert!(record.hyperparameters.contains_key("likelihood.noise"));
    }

    #[test]
    fn no_progress_when_disabled() {
        let (x, y) = sine_data();
        let model = fit(&x, &y, sine_config().with_num_epochs(5)).unwrap();
        assert_eq!(model.progress().count(), 0);
    }

    #[test]
    fn length_mismatch_is_invalid_input() {
        let x: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64]).collect();
        let y = vec![0.0; 4];
        // the broken config would be rejected too, but inputs come first
        let config = FitConfig::default().with_learning_rate(-1.0);
        assert!(matches!(fit(&x, &y, config), Err(GpError::InvalidInput(_))));
    }

    #[test]
    fn bad_config_is_rejected() {
        let (x, y) = sine_data();
        let config = FitConfig::default().with_noise_floor(0.0);
        assert!(matches!(fit(&x, &y, config), Err(GpError::InvalidConfig(_))));
        let config = FitConfig::default().with_num_epochs(0);
        assert!(matches!(fit(&x, &y, config), Err(GpError::InvalidConfig(_))));
    }

    #[test]
    fn frozen_lengthscale_keeps_initial_value() {
        let (x, y) = sine_data();
        let config = sine_config().with_include(["likelihood.noise"]);
        let model = fit(&x, &y, config).unwrap();
        let lengthscale = model.hyperparameter("kernel.lengthscale").unwrap();
        assert::close(lengthscale.value(), 0.693, 1E-12);
        assert!(model.noise_variance() < 2.0);
        assert!(model.hyperparameter("kernel.period").is_err());
    }

    #[test]
    fn query_must_match_training_dimension() {
        let (x, y) = sine_data();
        let model = fit(&x, &y, sine_config().with_num_epochs(2)).unwrap();
        assert!(matches!(
            model.posterior(&[vec![0.0, 1.0]]),
            Err(GpError::InvalidInput(_))
        ));
        assert!(matches!(model.posterior(&[]), Err(GpError::InvalidInput(_))));
    }

    #[test]
    fn predictive_is_wider_than_posterior() {
        let (x, y) = sine_data();
        let model = fit(&x, &y, sine_config().with_num_epochs(20)).unwrap();
        let query = vec![vec![0.3]];
        let post = model.posterior(&query).unwrap();
        let pred = model.predictive(&query).unwrap();
        assert!(pred.variance()[0] > post.variance()[0]);
        assert_eq!(
            model.model().mode(),
            crate::process::gaussian::Mode::Evaluation
        );
    }

    #[test]
    fn cancellation_returns_a_usable_model() {
        let (x, y) = sine_data();
        let data = Arc::new(TrainingData::from_rows(&x, &y).unwrap());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let model = fit_with_cancellation(
            RBFKernel::new(0.693).unwrap(),
            data,
            sine_config(),
            cancel,
        )
        .unwrap();
        assert_eq!(model.stop_reason(), StopReason::Cancelled);
        assert_eq!(model.epochs_run(), 0);
        assert!(model.posterior(&[vec![0.5]]).is_ok());
    }
}
