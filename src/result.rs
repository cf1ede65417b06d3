//! Errors surfaced by model construction, fitting and querying
use std::fmt;

use thiserror::Error;

use crate::param::{HyperparameterRegistry, ParameterError};
use crate::process::gaussian::kernel::{CovGradError, KernelError};

/// A result type for gpfit
pub type Result<T> = std::result::Result<T, GpError>;

/// Named constrained hyperparameter values attached to an error for
/// diagnosis.
#[derive(Clone, Debug, PartialEq)]
pub struct HyperparameterValues(pub Vec<(String, f64)>);

impl From<&HyperparameterRegistry> for HyperparameterValues {
    fn from(registry: &HyperparameterRegistry) -> Self {
        Self(registry.constrained_values())
    }
}

impl fmt::Display for HyperparameterValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

/// Errors from gpfit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpError {
    /// The training or query data is unusable: empty, mismatched lengths,
    /// ragged rows or non-finite values.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The fit configuration is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The noisy covariance matrix is not positive-definite
    #[error(
        "covariance matrix is not positive-definite at hyperparameters \
         {hyperparameters}; try a larger noise floor or another initialization"
    )]
    NumericalInstability {
        /// Hyperparameters at which the factorization failed
        hyperparameters: HyperparameterValues,
    },
    /// Σ of a standalone multivariate normal could not be factored for
    /// density evaluation or sampling
    #[error(
        "covariance of a {dims}-dimensional normal is not positive-definite"
    )]
    CovarianceNotPositiveDefinite {
        /// Dimension of the distribution
        dims: usize,
    },
    /// The loss or its gradient became non-finite during fitting
    #[error(
        "optimization diverged at epoch {epoch}; last finite hyperparameters: \
         {last_good}"
    )]
    DivergedOptimization {
        /// Epoch (1-based) at which a non-finite value appeared
        epoch: usize,
        /// Hyperparameters of the last iteration with a finite loss
        last_good: Box<HyperparameterRegistry>,
    },
    /// Hyperparameter construction or lookup failed
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    /// Kernel construction or reparameterization failed
    #[error(transparent)]
    Kernel(#[from] KernelError),
    /// Quasi-Newton optimization failed
    #[error("optimizer error: {0}")]
    Optimizer(String),
}

impl From<CovGradError> for GpError {
    fn from(e: CovGradError) -> Self {
        Self::Kernel(KernelError::CovGrad(e))
    }
}

impl GpError {
    /// Instability error carrying the values of `registry`
    pub fn instability(registry: &HyperparameterRegistry) -> Self {
        Self::NumericalInstability {
            hyperparameters: registry.into(),
        }
    }
}
