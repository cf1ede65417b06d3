#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

use nalgebra::DMatrix;
use std::fmt;
use std::ops::{Index, IndexMut};
use thiserror::Error;

/// Gradient of a covariance matrix: one `n x n` slice per raw parameter
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub struct CovGrad {
    slices: Vec<DMatrix<f64>>,
}

impl fmt::Display for CovGrad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.slices.iter().try_for_each(|s| write!(f, "{s}"))
    }
}

impl CovGrad {
    /// Create a new cov-grad with all zeros
    #[must_use]
    pub fn zeros(n: usize, m: usize) -> Self {
        Self {
            slices: (0..m).map(|_| DMatrix::zeros(n, n)).collect(),
        }
    }

    /// Number of parameters, i.e. slices
    pub fn n_parameters(&self) -> usize {
        self.slices.len()
    }

    /// Iterate over the slices in parameter order
    pub fn iter(&self) -> std::slice::Iter<'_, DMatrix<f64>> {
        self.slices.iter()
    }

    /// Multiply every slice by a scalar
    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        Self {
            slices: self.slices.iter().map(|s| s * factor).collect(),
        }
    }

    /// Prepend a slice for a new leading parameter
    pub fn prepend(&self, slice: DMatrix<f64>) -> Result<Self, CovGradError> {
        match self.slices.first() {
            Some(first) if first.shape() != slice.shape() => {
                Err(CovGradError::ShapeMismatch(vec![
                    slice.shape(),
                    first.shape(),
                ]))
            }
            _ => {
                let mut slices = Vec::with_capacity(self.slices.len() + 1);
                slices.push(slice);
                slices.extend(self.slices.iter().cloned());
                Ok(Self { slices })
            }
        }
    }
}

impl Index<usize> for CovGrad {
    type Output = DMatrix<f64>;

    fn index(&self, k: usize) -> &Self::Output {
        &self.slices[k]
    }
}

impl Index<(usize, usize, usize)> for CovGrad {
    type Output = f64;

    fn index(&self, (i, j, k): (usize, usize, usize)) -> &Self::Output {
        &self.slices[k][(i, j)]
    }
}

impl IndexMut<(usize, usize, usize)> for CovGrad {
    fn index_mut(
        &mut self,
        (i, j, k): (usize, usize, usize),
    ) -> &mut Self::Output {
        &mut self.slices[k][(i, j)]
    }
}

/// Error from constructing a `CovGrad`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub enum CovGradError {
    /// The shapes of the slices do not match
    #[error("cannot create covariance gradient, shape mismatch: {0:?}")]
    ShapeMismatch(Vec<(usize, usize)>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_puts_slice_first() {
        let grad = CovGrad::zeros(2, 1);
        let ones = DMatrix::from_element(2, 2, 1.0);
        let grad = grad.prepend(ones.clone()).unwrap();
        assert_eq!(grad.n_parameters(), 2);
        assert_eq!(grad[0], ones);
        assert_eq!(grad[(1, 1, 1)], 0.0);
        assert!(grad.prepend(DMatrix::zeros(3, 3)).is_err());
    }

    #[test]
    fn scale_multiplies_every_slice() {
        let mut grad = CovGrad::zeros(2, 2);
        grad[(0, 1, 0)] = 1.0;
        grad[(1, 0, 1)] = -3.0;
        let scaled = grad.scale(2.0);
        assert_eq!(scaled.n_parameters(), 2);
        assert_eq!(scaled[(0, 1, 0)], 2.0);
        assert_eq!(scaled[(1, 0, 1)], -6.0);
        assert_eq!(scaled.iter().map(|s| s.sum()).sum::<f64>(), -4.0);
    }
}
