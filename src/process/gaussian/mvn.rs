use itertools::izip;
use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector, Dyn};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::consts::{HALF_LN_2PI, MAX_SAMPLING_JITTER, MIN_SAMPLING_JITTER};
use crate::result::{GpError, Result};

/// Multivariate Gaussian over function values, 𝒩(μ, Σ).
///
/// Used both for the prior of a process at a set of inputs and for the
/// posterior conditioned on training data.
#[derive(Clone, Debug, PartialEq)]
pub struct MultivariateNormal {
    mean: DVector<f64>,
    cov: DMatrix<f64>,
}

impl MultivariateNormal {
    /// Create a new multivariate normal, checking the dimensions of μ and Σ
    pub fn new(mean: DVector<f64>, cov: DMatrix<f64>) -> Result<Self> {
        if !cov.is_square() {
            Err(GpError::InvalidInput("Σ must be square".into()))
        } else if mean.len() != cov.nrows() {
            Err(GpError::InvalidInput(format!(
                "μ has {} dimensions but Σ is {}x{}",
                mean.len(),
                cov.nrows(),
                cov.ncols()
            )))
        } else {
            Ok(Self { mean, cov })
        }
    }

    /// Create a new multivariate normal without checking dimensions
    #[must_use]
    pub(crate) fn new_unchecked(mean: DVector<f64>, cov: DMatrix<f64>) -> Self {
        Self { mean, cov }
    }

    /// Number of dimensions
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    /// Returns `true` if the distribution has no dimensions
    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Mean vector μ
    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    /// Covariance matrix Σ
    pub fn cov(&self) -> &DMatrix<f64> {
        &self.cov
    }

    /// Marginal variances, the diagonal of Σ clamped at zero
    pub fn variance(&self) -> DVector<f64> {
        self.cov.diagonal().map(|v| v.max(0.0))
    }

    /// Marginal standard deviations
    pub fn std(&self) -> DVector<f64> {
        self.variance().map(f64::sqrt)
    }

    /// Point-wise `(μ - z·σ, μ + z·σ)`
    ///
    /// With `z = 2` this is the usual ≈95% band under normality.
    ///
    /// # Example
    ///
    /// ```
    /// use gpfit::process::gaussian::MultivariateNormal;
    /// use nalgebra::{DMatrix, DVector};
    ///
    /// let mvn = MultivariateNormal::new(
    ///     DVector::from_column_slice(&[0.0, 1.0]),
    ///     DMatrix::from_diagonal(&DVector::from_column_slice(&[1.0, 4.0])),
    /// ).unwrap();
    ///
    /// let (lower, upper) = mvn.confidence_region(2.0);
    /// assert::close(lower[1], -3.0, 1E-12);
    /// assert::close(upper[1], 5.0, 1E-12);
    /// ```
    pub fn confidence_region(&self, z: f64) -> (DVector<f64>, DVector<f64>) {
        let std = self.std();
        let n = self.len();
        let mut lower = DVector::zeros(n);
        let mut upper = DVector::zeros(n);
        for (lo, hi, &m, &s) in izip!(
            lower.iter_mut(),
            upper.iter_mut(),
            self.mean.iter(),
            std.iter()
        ) {
            *lo = m - z * s;
            *hi = m + z * s;
        }
        (lower, upper)
    }

    /// Log density at `x`
    pub fn ln_pdf(&self, x: &DVector<f64>) -> Result<f64> {
        if x.len() != self.len() {
            return Err(GpError::InvalidInput(format!(
                "point has {} dimensions, expected {}",
                x.len(),
                self.len()
            )));
        }
        let chol = Cholesky::new(self.cov.clone())
            .ok_or_else(|| self.not_positive_definite())?;
        let diff = x - &self.mean;
        let alpha = chol.solve(&diff);
        let half_ln_det: f64 =
            chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum();
        Ok(-0.5 * diff.dot(&alpha)
            - half_ln_det
            - self.len() as f64 * HALF_LN_2PI)
    }

    /// Lower Cholesky factor of Σ, adding escalating diagonal jitter when Σ
    /// is only positive semi-definite.
    fn sampling_factor(&self) -> Result<Cholesky<f64, Dyn>> {
        if let Some(chol) = Cholesky::new(self.cov.clone()) {
            return Ok(chol);
        }
        let mut jitter = MIN_SAMPLING_JITTER;
        while jitter <= MAX_SAMPLING_JITTER {
            let mut cov = self.cov.clone();
            for i in 0..cov.nrows() {
                cov[(i, i)] += jitter;
            }
            if let Some(chol) = Cholesky::new(cov) {
                log::debug!("sampling factorization needed jitter {jitter:e}");
                return Ok(chol);
            }
            jitter *= 10.0;
        }
        Err(self.not_positive_definite())
    }

    fn not_positive_definite(&self) -> GpError {
        GpError::CovarianceNotPositiveDefinite { dims: self.len() }
    }

    /// Draw a single value
    pub fn draw<R: Rng>(&self, rng: &mut R) -> Result<DVector<f64>> {
        let chol = self.sampling_factor()?;
        Ok(self.draw_with(&chol, rng))
    }

    /// Draw `n` values, factoring Σ once
    pub fn sample<R: Rng>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<DVector<f64>>> {
        let chol = self.sampling_factor()?;
        Ok((0..n).map(|_| self.draw_with(&chol, rng)).collect())
    }

    fn draw_with<R: Rng>(
        &self,
        chol: &Cholesky<f64, Dyn>,
        rng: &mut R,
    ) -> DVector<f64> {
        let z: DVector<f64> = DVector::from_iterator(
            self.len(),
            (0..self.len()).map(|_| rng.sample(StandardNormal)),
        );
        chol.l() * z + &self.mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    fn standard(n: usize) -> MultivariateNormal {
        MultivariateNormal::new(DVector::zeros(n), DMatrix::identity(n, n))
            .unwrap()
    }

    #[test]
    fn new_checks_dimensions() {
        assert!(MultivariateNormal::new(
            DVector::zeros(2),
            DMatrix::identity(3, 3)
        )
        .is_err());
        assert!(MultivariateNormal::new(DVector::zeros(2), DMatrix::zeros(2, 3))
            .is_err());
    }

    #[test]
    fn standard_ln_pdf_at_origin() {
        let mvn = standard(3);
        let ln_f = mvn.ln_pdf(&DVector::zeros(3)).unwrap();
        assert::close(ln_f, -3.0 * HALF_LN_2PI, 1E-12);
    }

    #[test]
    fn ln_pdf_matches_univariate() {
        let mvn = MultivariateNormal::new(
            DVector::from_element(1, 1.0),
            DMatrix::from_element(1, 1, 4.0),
        )
        .unwrap();
        // N(3 | 1, 4)
        let expected = -0.5 * (3.0_f64 - 1.0).powi(2) / 4.0
            - 0.5 * 4.0_f64.ln()
            - HALF_LN_2PI;
        assert::close(
            mvn.ln_pdf(&DVector::from_element(1, 3.0)).unwrap(),
            expected,
            1E-12,
        );
    }

    #[test]
    fn variance_is_clamped() {
        let mvn = MultivariateNormal::new(
            DVector::zeros(2),
            DMatrix::from_row_slice(2, 2, &[-1E-12, 0.0, 0.0, 1.0]),
        )
        .unwrap();
        assert_eq!(mvn.variance()[0], 0.0);
        assert_eq!(mvn.std()[1], 1.0);
    }

    #[test]
    fn negative_definite_cov_is_reported_with_dims() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0x5EED);
        let mvn =
            MultivariateNormal::new(DVector::zeros(2), -DMatrix::identity(2, 2))
                .unwrap();
        assert_eq!(
            mvn.ln_pdf(&DVector::zeros(2)),
            Err(GpError::CovarianceNotPositiveDefinite { dims: 2 })
        );
        assert_eq!(
            mvn.draw(&mut rng),
            Err(GpError::CovarianceNotPositiveDefinite { dims: 2 })
        );
    }

    #[test]
    fn sample_mean_approaches_mu() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0x1234);
        let mvn = MultivariateNormal::new(
            DVector::from_column_slice(&[1.0, -2.0]),
            DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 2.0]),
        )
        .unwrap();
        let n = 20_000;
        let xs = mvn.sample(n, &mut rng).unwrap();
        let mean = xs.iter().fold(DVector::<f64>::zeros(2), |acc, x| acc + x)
            / n as f64;
        assert::close(mean[0], 1.0, 0.05);
        assert::close(mean[1], -2.0, 0.05);
    }

    #[test]
    fn draw_from_semi_definite_cov() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0xABCD);
        // rank one
        let v = DVector::from_column_slice(&[1.0, 1.0]);
        let mvn =
            MultivariateNormal::new(DVector::zeros(2), &v * v.transpose())
                .unwrap();
        let x = mvn.draw(&mut rng).unwrap();
        assert::close(x[0], x[1], 1E-3);
    }
}
