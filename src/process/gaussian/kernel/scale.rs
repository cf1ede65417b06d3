use super::{CovGrad, CovGradError, Kernel, KernelError};
use crate::param::{Hyperparameter, Transform};
use nalgebra::base::constraint::{SameNumberOfColumns, ShapeConstraint};
use nalgebra::base::storage::Storage;
use nalgebra::{DMatrix, DVector, Dim, Matrix};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Transform the output scale is read through
pub const OUTPUTSCALE_TRANSFORM: Transform =
    Transform::Softplus { lower_bound: 0.0 };

/// Kernel scaled by a learned output variance, `s * k(x, x')`.
///
/// The output scale comes first in the parameter order, followed by the
/// parameters of the wrapped kernel.
///
/// # Example
///
/// ```
/// use gpfit::process::gaussian::kernel::{Kernel, RBFKernel, ScaleKernel};
/// use nalgebra::DMatrix;
///
/// let kernel = ScaleKernel::new(RBFKernel::new(1.0).unwrap(), 2.5).unwrap();
/// let x = DMatrix::from_column_slice(2, 1, &[0.0, 1.0]);
/// let cov = kernel.covariance(&x, &x);
/// assert::close(cov[(0, 0)], 2.5, 1E-10);
/// assert_eq!(kernel.n_parameters(), 2);
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub struct ScaleKernel<K>
where
    K: Kernel,
{
    base: K,
    outputscale: Hyperparameter,
}

impl<K> ScaleKernel<K>
where
    K: Kernel,
{
    /// Wrap `base` with the given output scale
    pub fn new(base: K, outputscale: f64) -> Result<Self, KernelError> {
        let outputscale = Hyperparameter::new(
            "outputscale",
            outputscale,
            OUTPUTSCALE_TRANSFORM,
        )?;
        Ok(Self { base, outputscale })
    }

    /// Output scale
    pub fn outputscale(&self) -> f64 {
        self.outputscale.value()
    }

    /// The wrapped kernel
    pub fn base(&self) -> &K {
        &self.base
    }
}

impl<K> Kernel for ScaleKernel<K>
where
    K: Kernel,
{
    fn n_parameters(&self) -> usize {
        1 + self.base.n_parameters()
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
        self.base.covariance(x1, x2) * self.outputscale()
    }

    fn is_stationary(&self) -> bool {
        self.base.is_stationary()
    }

    fn diag<R, C, S>(&self, x: &Matrix<f64, R, C, S>) -> DVector<f64>
    where
        R: Dim,
        C: Dim,
        S: Storage<f64, R, C>,
    {
        self.base.diag(x) * self.outputscale()
    }

    fn hyperparameters(&self) -> Vec<Hyperparameter> {
        let mut params = vec![self.outputscale.clone()];
        params.extend(self.base.hyperparameters());
        params
    }

    fn reparameterize(&self, params: &[f64]) -> Result<Self, KernelError> {
        match params.split_first() {
            None => Err(KernelError::MissingParameters(self.n_parameters())),
            Some((scale, rest)) => {
                let base = self.base.reparameterize(rest)?;
                Ok(Self {
                    base,
                    outputscale: self.outputscale.with_raw(*scale),
                })
            }
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
        let s = self.outputscale();
        let ds_draw = self
            .outputscale
            .transform()
            .derivative(self.outputscale.raw());

        let (base_cov, base_grad) = self.base.covariance_with_gradient(x)?;
        let grad = base_grad.scale(s).prepend(&base_cov * ds_draw)?;
        Ok((base_cov * s, grad))
    }
}
