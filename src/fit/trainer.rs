use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::DVector;

use super::config::FitConfig;
use crate::optim::OptimizerState;
use crate::param::HyperparameterRegistry;
use crate::process::gaussian::kernel::Kernel;
use crate::process::gaussian::{ExactGp, ExactMarginalLogLikelihood};
use crate::result::{GpError, Result};

/// Cooperative cancellation signal, checked between iterations
///
/// Clones share the same flag, so a token handed to a [`Trainer`] can be
/// cancelled from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that fitting stop before the next iteration
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Snapshot of the fit emitted every `log_every` epochs
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressRecord {
    /// 1-based epoch
    pub epoch: usize,
    /// Loss at the start of the epoch
    pub loss: f64,
    /// Constrained values of the reported hyperparameters at which `loss`
    /// was computed
    pub hyperparameters: BTreeMap<String, f64>,
}

/// Why a fit stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Ran every configured epoch
    Completed,
    /// The loss plateaued
    EarlyStopped,
    /// The cancellation token was triggered
    Cancelled,
}

/// Lifecycle of a [`Trainer`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainerState {
    Initialized,
    Training,
    Fitted(StopReason),
}

/// Gradient-based maximum likelihood fitting of an [`ExactGp`]
///
/// The trainer exclusively owns the model's hyperparameters until it is
/// finished. A fitted trainer does not train again; continue a fit by
/// building a new trainer from the fitted model.
#[derive(Debug)]
pub struct Trainer<K>
where
    K: Kernel,
{
    gp: ExactGp<K>,
    config: FitConfig,
    mask: Vec<bool>,
    optimizer: OptimizerState,
    state: TrainerState,
    epoch: usize,
    initial_loss: Option<f64>,
    /// Lowest loss seen and the raw parameters it was computed at
    best: Option<(f64, DVector<f64>)>,
    /// Registry at the last finite evaluation
    last_good: HyperparameterRegistry,
    /// Epochs since the loss last improved by `min_delta`
    plateau: usize,
    history: Vec<ProgressRecord>,
    cancel: CancellationToken,
}

impl<K> Trainer<K>
where
    K: Kernel,
{
    /// Prepare to fit `gp` with `config`
    ///
    /// The configuration is validated and every name in `include`,
    /// `exclude` and `report` must be a registered hyperparameter.
    pub fn new(gp: ExactGp<K>, config: FitConfig) -> Result<Self> {
        config.validate()?;
        let registry = gp.registry()?;

        let mask = registry
            .trainable_mask(
                config.include.as_deref(),
                config.exclude.as_slice(),
            )
            .map_err(|e| GpError::InvalidConfig(e.to_string()))?;

        if let Some(unknown) = config
            .report
            .iter()
            .flatten()
            .find(|name| registry.index_of(name).is_none())
        {
            return Err(GpError::InvalidConfig(format!(
                "cannot report unknown hyperparameter '{unknown}'"
            )));
        }

        let optimizer = OptimizerState::new(
            config.update_rule,
            config.learning_rate,
            registry.len(),
        );

        let mut gp = gp;
        gp.train();

        Ok(Self {
            gp,
            config,
            mask,
            optimizer,
            state: TrainerState::Initialized,
            epoch: 0,
            initial_loss: None,
            best: None,
            last_good: registry,
            plateau: 0,
            history: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Stop the fit when `token` is cancelled
    #[must_use]
    pub fn with_cancellation(self, cancel: CancellationToken) -> Self {
        Self { cancel, ..self }
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    /// Number of epochs taken
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Which raw parameters the optimizer updates, in registry order
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// The model at the current hyperparameters
    pub fn model(&self) -> &ExactGp<K> {
        &self.gp
    }

    /// Loss before the first update
    pub fn initial_loss(&self) -> Option<f64> {
        self.initial_loss
    }

    /// Progress records emitted so far
    pub fn history(&self) -> &[ProgressRecord] {
        &self.history
    }

    /// Loss and its gradient at the current hyperparameters
    ///
    /// The loss is the negative log marginal likelihood, divided by the
    /// number of training points when `normalize_loss` is set.
    pub fn loss(&self) -> Result<(f64, DVector<f64>)> {
        let mll = ExactMarginalLogLikelihood::evaluate(&self.gp)
            .map_err(|err| {
                log::warn!(
                    "loss evaluation failed at epoch {}: {err}",
                    self.epoch + 1
                );
                err
            })?;
        let scale = if self.config.normalize_loss {
            1.0 / self.gp.data().len() as f64
        } else {
            1.0
        };
        Ok((-mll.value * scale, -mll.gradient * scale))
    }

    fn check_finite(&self, loss: f64, grad: &DVector<f64>) -> Result<()> {
        if loss.is_finite() && grad.iter().all(|g| g.is_finite()) {
            Ok(())
        } else {
            log::warn!(
                "non-finite loss ({loss}) at epoch {}; last finite \
                 hyperparameters: {}",
                self.epoch + 1,
                self.last_good
            );
            Err(GpError::DivergedOptimization {
                epoch: self.epoch + 1,
                last_good: Box::new(self.last_good.clone()),
            })
        }
    }

    fn record(
        &self,
        loss: f64,
        registry: &HyperparameterRegistry,
    ) -> ProgressRecord {
        let hyperparameters = registry
            .iter()
            .filter(|p| match &self.config.report {
                None => true,
                Some(names) => names.iter().any(|name| name == p.name()),
            })
            .map(|p| (p.name().to_string(), p.value()))
            .collect();
        ProgressRecord {
            epoch: self.epoch,
            loss,
            hyperparameters,
        }
    }

    /// Perform one iteration: evaluate the loss and its gradient, then
    /// update the trainable raw parameters. Returns the loss at the start
    /// of the iteration.
    pub fn step(&mut self) -> Result<f64> {
        if let TrainerState::Fitted(_) = self.state {
            return Err(GpError::InvalidConfig(
                "trainer has already been fitted".into(),
            ));
        }
        self.state = TrainerState::Training;

        let (loss, grad) = self.loss()?;
        self.check_finite(loss, &grad)?;

        let registry = self.gp.registry()?;
        let mut params = registry.raw_values();

        self.initial_loss.get_or_insert(loss);
        self.update_plateau(loss);
        if self.best.as_ref().map_or(true, |(best, _)| loss < *best) {
            self.best = Some((loss, params.clone()));
        }

        self.epoch += 1;
        log::debug!("epoch {}: loss = {loss}, grad = {grad:?}", self.epoch);

        let log_every = self.config.log_every;
        if log_every > 0 && self.epoch % log_every == 0 {
            let record = self.record(loss, &registry);
            log::info!(
                "Iter {}/{} - Loss: {:.3} {}",
                self.epoch,
                self.config.num_epochs,
                loss,
                registry
            );
            self.history.push(record);
        }
        self.last_good = registry;

        self.optimizer.step(&mut params, &grad, &self.mask);
        self.gp = self.gp.with_raw_parameters(params.as_slice())?;
        Ok(loss)
    }

    fn update_plateau(&mut self, loss: f64) {
        if let Some(stopping) = self.config.early_stopping {
            let improved = self
                .best
                .as_ref()
                .map_or(true, |(best, _)| loss <= best - stopping.min_delta);
            if improved {
                self.plateau = 0;
            } else {
                self.plateau += 1;
            }
        }
    }

    fn plateaued(&self) -> bool {
        self.config
            .early_stopping
            .map_or(false, |stopping| self.plateau >= stopping.patience)
    }

    /// Run the remaining epochs, handing each progress record to
    /// `observer` as it is emitted.
    ///
    /// Cancellation is checked before every iteration; a cancelled fit
    /// returns to the best hyperparameters seen.
    pub fn run<F>(&mut self, mut observer: F) -> Result<StopReason>
    where
        F: FnMut(&ProgressRecord),
    {
        if let TrainerState::Fitted(reason) = self.state {
            return Ok(reason);
        }

        let reason = loop {
            if self.epoch >= self.config.num_epochs {
                break StopReason::Completed;
            }
            if self.cancel.is_cancelled() {
                if let Some((_, best)) = &self.best {
                    self.gp = self.gp.with_raw_parameters(best.as_slice())?;
                }
                log::info!("fit cancelled after {} epochs", self.epoch);
                break StopReason::Cancelled;
            }

            let n_records = self.history.len();
            self.step()?;
            if let Some(record) = self.history.get(n_records) {
                observer(record);
            }

            if self.plateaued() {
                log::info!(
                    "loss plateaued for {} epochs; stopping at epoch {}",
                    self.plateau,
                    self.epoch
                );
                break StopReason::EarlyStopped;
            }
        };

        self.state = TrainerState::Fitted(reason);
        if reason == StopReason::Completed {
            log::info!("fit completed after {} epochs", self.epoch);
        }
        Ok(reason)
    }

    /// Finish the fit and hand the model over in evaluation mode
    ///
    /// The final loss is evaluated at the returned hyperparameters.
    pub fn finish(self) -> Result<super::FittedModel<K>> {
        let stop_reason = match self.state {
            TrainerState::Fitted(reason) => reason,
            _ => {
                return Err(GpError::InvalidConfig(
                    "trainer must be run before it is finished".into(),
                ))
            }
        };
        let (final_loss, grad) = self.loss()?;
        self.check_finite(final_loss, &grad)?;

        let initial_loss = self.initial_loss.unwrap_or(final_loss);
        let mut gp = self.gp;
        gp.eval();

        Ok(super::FittedModel {
            gp,
            initial_loss,
            final_loss,
            epochs_run: self.epoch,
            stop_reason,
            progress: self.history,
        })
    }
}
