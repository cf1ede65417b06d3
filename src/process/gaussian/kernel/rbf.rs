use super::{e2_norm, CovGrad, CovGradError, Kernel, KernelError};
use crate::param::{Hyperparameter, Transform};
use nalgebra::base::constraint::{SameNumberOfColumns, ShapeConstraint};
use nalgebra::base::storage::Storage;
use nalgebra::{DMatrix, DVector, Dim, Matrix};
use std::f64;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Transform the RBF lengthscale is read through
pub const LENGTHSCALE_TRANSFORM: Transform =
    Transform::Softplus { lower_bound: 0.0 };

/// Radial-basis function (RBF) kernel
/// The distance metric here is L2 (Euclidean).
///
/// ```math
///     K(\mathbf{x}, \mathbf{x'}) = \exp\left(-\frac{\|\mathbf{x} - \mathbf{x'}\|^2}{2\ell^2}\right)
/// ```
///
/// # Parameters
/// * `lengthscale` - Length scale, stored through a softplus transform so it
///   is positive for every raw value.
///
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub struct RBFKernel {
    lengthscale: Hyperparameter,
}

impl RBFKernel {
    /// Create a new rbf kernel with the given length scale
    pub fn new(lengthscale: f64) -> Result<Self, KernelError> {
        let lengthscale = Hyperparameter::new(
            "lengthscale",
            lengthscale,
            LENGTHSCALE_TRANSFORM,
        )?;
        Ok(Self { lengthscale })
    }

    /// Create a new rbf kernel from the raw lengthscale parameter
    #[must_use]
    pub fn from_raw(raw: f64) -> Self {
        Self {
            lengthscale: Hyperparameter::from_raw(
                "lengthscale",
                raw,
                LENGTHSCALE_TRANSFORM,
            ),
        }
    }

    /// Length scale
    pub fn lengthscale(&self) -> f64 {
        self.lengthscale.value()
    }
}

impl Default for RBFKernel {
    fn default() -> Self {
        Self::from_raw(0.0)
    }
}

impl Kernel for RBFKernel {
    fn n_parameters(&self) -> usize {
        1
    }

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
        ShapeConstraint: SameNumberOfColumns<C1, C2>,
    {
        let l = self.lengthscale();
        DMatrix::from_fn(x1.nrows(), x2.nrows(), |i, j| {
            (-0.5 * e2_norm(&x1.row(i), &x2.row(j), l)).exp()
        })
    }

    fn is_stationary(&self) -> bool {
        true
    }

    fn diag<R, C, S>(&self, x: &Matrix<f64, R, C, S>) -> DVector<f64>
    where
        R: Dim,
        C: Dim,
        S: Storage<f64, R, C>,
    {
        DVector::repeat(x.nrows(), 1.0)
    }

    fn hyperparameters(&self) -> Vec<Hyperparameter> {
        vec![self.lengthscale.clone()]
    }

    fn reparameterize(&self, params: &[f64]) -> Result<Self, KernelError> {
        match params {
            [] => Err(KernelError::MissingParameters(1)),
            [value] => Ok(Self {
                lengthscale: self.lengthscale.with_raw(*value),
            }),
            _ => Err(KernelError::ExtraneousParameters(params.len() - 1)),
        }
    }

    fn covariance_with_gradient<R, C, S>(
        &self,
        x: &Matrix<f64, R, C, S>,
    ) -> Result<(DMatrix<f64>, CovGrad), CovGradError>
    where
        R: Dim,
        C: Dim,
        S: Storage<f64, R, C>,
    {
        let n = x.nrows();
        let l = self.lengthscale();
        let dl_draw = self
            .lengthscale
            .transform()
            .derivative(self.lengthscale.raw());

        let mut dm = DMatrix::zeros(n, n);
        let mut grad = CovGrad::zeros(n, 1);

        for i in 0..n {
            for j in 0..i {
                // Save covariance
                let d2 = e2_norm(&x.row(i), &x.row(j), l);
                let cov_ij = (-d2 / 2.0).exp();

                dm[(i, j)] = cov_ij;
                dm[(j, i)] = cov_ij;

                // dk/dl = k * |x - x'|^2 / l^3
                let dc_draw = if cov_ij > 0.0 {
                    cov_ij * d2 / l * dl_draw
                } else {
                    0.0
                };
                grad[(i, j, 0)] = dc_draw;
                grad[(j, i, 0)] = dc_draw;
            }
            dm[(i, i)] = 1.0;
        }

        Ok((dm, grad))
    }
}
