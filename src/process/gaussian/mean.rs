use nalgebra::{DMatrix, DVector};

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

use crate::param::{Hyperparameter, Transform};

/// Prior mean function of a Gaussian process
#[derive(Clone, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub enum MeanFunction {
    /// m(x) = 0
    #[default]
    Zero,
    /// m(x) = μ with μ learned alongside the kernel
    Constant(Hyperparameter),
}

impl MeanFunction {
    /// Constant mean with initial value `value`
    pub fn constant(value: f64) -> Self {
        Self::Constant(Hyperparameter::from_raw(
            "constant",
            value,
            Transform::Identity,
        ))
    }

    /// Evaluate the mean at the rows of `x`
    pub fn evaluate(&self, x: &DMatrix<f64>) -> DVector<f64> {
        match self {
            Self::Zero => DVector::zeros(x.nrows()),
            Self::Constant(mu) => DVector::from_element(x.nrows(), mu.value()),
        }
    }

    /// Number of hyperparameters
    pub fn n_parameters(&self) -> usize {
        match self {
            Self::Zero => 0,
            Self::Constant(_) => 1,
        }
    }

    /// Hyperparameters in gradient order
    pub fn hyperparameters(&self) -> Vec<Hyperparameter> {
        match self {
            Self::Zero => Vec::new(),
            Self::Constant(mu) => vec![mu.clone()],
        }
    }

    /// Take this mean's raw parameters off the front of `params`
    pub fn consume_parameters<'p>(
        &self,
        params: &'p [f64],
    ) -> Option<(Self, &'p [f64])> {
        match self {
            Self::Zero => Some((Self::Zero, params)),
            Self::Constant(mu) => params.split_first().map(|(raw, rest)| {
                (Self::Constant(mu.with_raw(*raw)), rest)
            }),
        }
    }

    /// Gradient of the log marginal likelihood with respect to the raw mean
    /// parameters given `alpha = (K + σ²I)⁻¹ (y - m)`.
    ///
    /// For a constant mean, d log p / dμ = Σ αᵢ.
    pub fn ln_m_gradient(&self, alpha: &DVector<f64>) -> Vec<f64> {
        match self {
            Self::Zero => Vec::new(),
            Self::Constant(mu) => vec![mu.raw_gradient(alpha.sum())],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_mean_has_no_parameters() {
        let mean = MeanFunction::Zero;
        let x = DMatrix::zeros(3, 1);
        assert_eq!(mean.evaluate(&x), DVector::zeros(3));
        assert_eq!(mean.n_parameters(), 0);
        let params = [1.0];
        let (same, rest) = mean.consume_parameters(&params).unwrap();
        assert_eq!(same, MeanFunction::Zero);
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn constant_mean_evaluates_everywhere() {
        let mean = MeanFunction::constant(2.5);
        let x = DMatrix::from_column_slice(2, 1, &[-10.0, 10.0]);
        assert_eq!(mean.evaluate(&x), DVector::from_element(2, 2.5));

        let alpha = DVector::from_column_slice(&[0.5, 1.5]);
        assert_eq!(mean.ln_m_gradient(&alpha), vec![2.0]);
    }
}
