#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_NOISE_FLOOR, SOFTPLUS_ZERO};
use crate::optim::UpdateRule;
use crate::result::{GpError, Result};

/// Stop once the loss has not improved by `min_delta` for `patience`
/// consecutive epochs
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct EarlyStopping {
    /// Smallest decrease in loss that counts as an improvement
    pub min_delta: f64,
    /// Number of epochs without improvement before stopping
    pub patience: usize,
}

/// Prior mean of the fitted process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub enum MeanKind {
    /// m(x) = 0
    #[default]
    Zero,
    /// Learned constant mean
    Constant,
}

/// Options for [`fit`](crate::fit::fit)
///
/// # Example
///
/// ```
/// use gpfit::FitConfig;
/// use gpfit::optim::UpdateRule;
///
/// let config = FitConfig::default()
///     .with_learning_rate(0.05)
///     .with_num_epochs(200)
///     .with_update_rule(UpdateRule::GradientDescent);
///
/// assert!(config.validate().is_ok());
/// assert!(config.with_learning_rate(-1.0).validate().is_err());
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(default))]
pub struct FitConfig {
    /// Initial (constrained) RBF lengthscale
    pub lengthscale_init: f64,
    /// Initial (constrained) noise variance
    pub noise_init: f64,
    /// Strict lower bound of the noise variance
    pub noise_floor: f64,
    /// Step size η
    pub learning_rate: f64,
    /// Number of optimizer iterations
    pub num_epochs: usize,
    /// Emit a progress record every `log_every` epochs. 0 disables.
    pub log_every: usize,
    /// Update rule of the optimizer
    pub update_rule: UpdateRule,
    /// Optional loss-plateau stopping rule. `None` runs every epoch.
    pub early_stopping: Option<EarlyStopping>,
    /// Prior mean of the process
    pub mean: MeanKind,
    /// Initial value of the constant mean
    pub constant_mean_init: f64,
    /// Hyperparameters the optimizer may update. `None` means all of them.
    pub include: Option<Vec<String>>,
    /// Hyperparameters held fixed
    pub exclude: Vec<String>,
    /// Hyperparameters reported in progress records. `None` means all.
    pub report: Option<Vec<String>>,
    /// Divide the negative log marginal likelihood by the number of points
    pub normalize_loss: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            lengthscale_init: SOFTPLUS_ZERO,
            noise_init: SOFTPLUS_ZERO,
            noise_floor: DEFAULT_NOISE_FLOOR,
            learning_rate: 0.1,
            num_epochs: 50,
            log_every: 0,
            update_rule: UpdateRule::default(),
            early_stopping: None,
            mean: MeanKind::Zero,
            constant_mean_init: 0.0,
            include: None,
            exclude: Vec::new(),
            report: None,
            normalize_loss: true,
        }
    }
}

impl FitConfig {
    #[must_use]
    pub fn with_lengthscale_init(self, lengthscale_init: f64) -> Self {
        Self {
            lengthscale_init,
            ..self
        }
    }

    #[must_use]
    pub fn with_noise_init(self, noise_init: f64) -> Self {
        Self { noise_init, ..self }
    }

    #[must_use]
    pub fn with_noise_floor(self, noise_floor: f64) -> Self {
        Self {
            noise_floor,
            ..self
        }
    }

    #[must_use]
    pub fn with_learning_rate(self, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            ..self
        }
    }

    #[must_use]
    pub fn with_num_epochs(self, num_epochs: usize) -> Self {
        Self { num_epochs, ..self }
    }

    #[must_use]
    pub fn with_log_every(self, log_every: usize) -> Self {
        Self { log_every, ..self }
    }

    #[must_use]
    pub fn with_update_rule(self, update_rule: UpdateRule) -> Self {
        Self {
            update_rule,
            ..self
        }
    }

    #[must_use]
    pub fn with_early_stopping(self, min_delta: f64, patience: usize) -> Self {
        Self {
            early_stopping: Some(EarlyStopping {
                min_delta,
                patience,
            }),
            ..self
        }
    }

    /// Fit a constant mean starting from `init`
    #[must_use]
    pub fn with_constant_mean(self, init: f64) -> Self {
        Self {
            mean: MeanKind::Constant,
            constant_mean_init: init,
            ..self
        }
    }

    /// Only let the optimizer update the named hyperparameters
    #[must_use]
    pub fn with_include<S: Into<String>>(
        self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            include: Some(names.into_iter().map(Into::into).collect()),
            ..self
        }
    }

    /// Hold the named hyperparameters fixed
    #[must_use]
    pub fn with_exclude<S: Into<String>>(
        self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            exclude: names.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Only report the named hyperparameters in progress records
    #[must_use]
    pub fn with_report<S: Into<String>>(
        self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            report: Some(names.into_iter().map(Into::into).collect()),
            ..self
        }
    }

    #[must_use]
    pub fn with_normalize_loss(self, normalize_loss: bool) -> Self {
        Self {
            normalize_loss,
            ..self
        }
    }

    /// Reject configurations no fit can run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(GpError::InvalidConfig(msg));

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if self.num_epochs == 0 {
            return invalid("num_epochs must be positive".into());
        }
        if !(self.noise_floor.is_finite() && self.noise_floor > 0.0) {
            return invalid(format!(
                "noise_floor must be positive, got {}",
                self.noise_floor
            ));
        }
        if !(self.noise_init.is_finite() && self.noise_init > self.noise_floor)
        {
            return invalid(format!(
                "noise_init ({}) must be greater than noise_floor ({})",
                self.noise_init, self.noise_floor
            ));
        }
        if !(self.lengthscale_init.is_finite() && self.lengthscale_init > 0.0) {
            return invalid(format!(
                "lengthscale_init must be positive, got {}",
                self.lengthscale_init
            ));
        }
        if !self.constant_mean_init.is_finite() {
            return invalid("constant_mean_init must be finite".into());
        }
        if let Some(EarlyStopping {
            min_delta,
            patience,
        }) = self.early_stopping
        {
            if patience == 0 {
                return invalid(
                    "early stopping patience must be positive".into(),
                );
            }
            if !(min_delta.is_finite() && min_delta >= 0.0) {
                return invalid(format!(
                    "early stopping min_delta must be non-negative, \
                     got {min_delta}"
                ));
            }
        }
        self.update_rule.validate()
    }
}
