use nalgebra::{DMatrix, DVector};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_NOISE_FLOOR;
use crate::param::{Hyperparameter, ParameterError, Transform};

/// Homoscedastic observation noise
///
/// The noise variance `σ²` is stored as a raw value read through
/// `softplus(r) + ε`, where `ε` is the noise floor fixed at construction.
/// The variance is strictly greater than `ε` for every raw value, which keeps
/// the diagonal of `K + σ²I` positive even when the kernel signal vanishes.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct NoiseModel {
    noise: Hyperparameter,
}

impl Default for NoiseModel {
    fn default() -> Self {
        Self::from_raw(0.0, DEFAULT_NOISE_FLOOR)
    }
}

impl NoiseModel {
    /// Noise model with the given initial variance and floor
    ///
    /// # Example
    ///
    /// ```
    /// use gpfit::process::gaussian::NoiseModel;
    ///
    /// let noise = NoiseModel::new(2.0, 1E-5).unwrap();
    /// assert::close(noise.noise_variance(), 2.0, 1E-12);
    ///
    /// // The initial variance must be above the floor
    /// assert!(NoiseModel::new(1E-6, 1E-5).is_err());
    /// ```
    pub fn new(
        noise_variance: f64,
        noise_floor: f64,
    ) -> Result<Self, ParameterError> {
        if !(noise_floor.is_finite() && noise_floor > 0.0) {
            return Err(ParameterError::OutOfBounds {
                name: "noise_floor".into(),
                given: noise_floor,
                lower_bound: 0.0,
            });
        }
        let noise = Hyperparameter::new(
            "noise",
            noise_variance,
            Transform::softplus(noise_floor),
        )?;
        Ok(Self { noise })
    }

    /// Noise model from the raw noise parameter
    #[must_use]
    pub fn from_raw(raw: f64, noise_floor: f64) -> Self {
        Self {
            noise: Hyperparameter::from_raw(
                "noise",
                raw,
                Transform::softplus(noise_floor),
            ),
        }
    }

    /// The noise variance σ²
    pub fn noise_variance(&self) -> f64 {
        self.noise.value()
    }

    /// The lower bound ε of the noise variance
    pub fn noise_floor(&self) -> f64 {
        self.noise.transform().lower_bound()
    }

    /// Raw noise parameter
    pub fn raw(&self) -> f64 {
        self.noise.raw()
    }

    /// Convert d/dσ² into d/dr by the chain rule through the transform
    pub fn raw_gradient(&self, d_noise_variance: f64) -> f64 {
        self.noise.raw_gradient(d_noise_variance)
    }

    /// Number of hyperparameters
    pub fn n_parameters(&self) -> usize {
        1
    }

    /// Hyperparameters in gradient order
    pub fn hyperparameters(&self) -> Vec<Hyperparameter> {
        vec![self.noise.clone()]
    }

    /// Take the raw noise parameter off the front of `params`
    pub fn consume_parameters<'p>(
        &self,
        params: &'p [f64],
    ) -> Option<(Self, &'p [f64])> {
        params.split_first().map(|(raw, rest)| {
            (
                Self {
                    noise: self.noise.with_raw(*raw),
                },
                rest,
            )
        })
    }

    /// Enact the noise model onto the given covariance matrix, `K + σ²I`
    pub fn add_noise_to_kernel(&self, cov: &DMatrix<f64>) -> DMatrix<f64> {
        let diag = DVector::from_element(cov.nrows(), self.noise_variance());
        cov + DMatrix::from_diagonal(&diag)
    }
}
