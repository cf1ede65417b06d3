//! Covariance kernels
//!
//! Kernels carry their hyperparameters as [`Hyperparameter`]s and report
//! covariance gradients with respect to the *raw* (unconstrained) value of
//! each one, in the order given by [`Kernel::hyperparameters`].

use nalgebra::base::constraint::{SameNumberOfColumns, ShapeConstraint};
use nalgebra::base::storage::Storage;
use nalgebra::{DMatrix, DVector, Dim, Matrix};
use thiserror::Error;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

use crate::param::{Hyperparameter, ParameterError};

mod covgrad;
pub use covgrad::*;

mod misc;
pub use self::misc::*;

mod rbf;
pub use self::rbf::*;

mod scale;
pub use self::scale::*;

/// Kernel Function
pub trait Kernel: std::fmt::Debug + Clone + PartialEq {
    /// Number of hyperparameters
    fn n_parameters(&self) -> usize;

    /// Returns the covariance matrix between the rows of `x1` and `x2`
    fn covariance<R1, R2, C1, C2, S1, S2>(
        &self,
        x1: &Matrix<f64, R1, C1, S1>,
        x2: &Matrix<f64, R2, C2, S2>,
    ) -> DMatrix<f64>
    where
        R1: Dim,
        R2: Dim,
        C1: Dim,
        C2: Dim,
        S1: Storage<f64, R1, C1>,
        S2: Storage<f64, R2, C2>,
        ShapeConstraint: SameNumberOfColumns<C1, C2>;

    /// Reports if the given kernel function is stationary.
    fn is_stationary(&self) -> bool;

    /// Returns the diagonal of the kernel(x, x)
    fn diag<R, C, S>(&self, x: &Matrix<f64, R, C, S>) -> DVector<f64>
    where
        R: Dim,
        C: Dim,
        S: Storage<f64, R, C>;

    /// The hyperparameters of this kernel in gradient order
    fn hyperparameters(&self) -> Vec<Hyperparameter>;

    /// Return the corresponding raw parameter vector
    fn parameters(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.n_parameters(),
            self.hyperparameters().iter().map(Hyperparameter::raw),
        )
    }

    /// Create a new kernel of the same type from raw parameters
    fn reparameterize(&self, params: &[f64]) -> Result<Self, KernelError>;

    /// Takes a sequence of raw parameters and consumes only the ones it
    /// needs to create itself.
    fn consume_parameters<'p>(
        &self,
        params: &'p [f64],
    ) -> Result<(Self, &'p [f64]), KernelError> {
        let n = self.n_parameters();
        if params.len() < n {
            Err(KernelError::MissingParameters(n - params.len()))
        } else {
            let (cur, next) = params.split_at(n);
            let kernel = self.reparameterize(cur)?;
            Ok((kernel, next))
        }
    }

    /// Covariance of `x` with itself and its gradient with respect to the
    /// raw hyperparameters
    fn covariance_with_gradient<R, C, S>(
        &self,
        x: &Matrix<f64, R, C, S>,
    ) -> Result<(DMatrix<f64>, CovGrad), CovGradError>
    where
        R: Dim,
        C: Dim,
        S: Storage<f64, R, C>;
}

/// Errors from Kernel construction
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub enum KernelError {
    /// A hyperparameter could not be constructed
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    /// Too many parameters provided
    #[error("{0} extra parameters provided to kernel")]
    ExtraneousParameters(usize),
    /// Too few parameters provided
    #[error("missing {0} parameters")]
    MissingParameters(usize),
    /// An error in computing cov-grad
    #[error("covariance gradient couldn't be computed: {0}")]
    CovGrad(#[from] CovGradError),
}
