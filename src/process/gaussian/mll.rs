use nalgebra::DVector;

use super::kernel::Kernel;
use super::ExactGp;
use crate::result::Result;

/// Value and raw-parameter gradient of the log marginal likelihood
#[derive(Clone, Debug, PartialEq)]
pub struct MarginalLogLikelihood {
    /// log p(y | X, θ)
    pub value: f64,
    /// ∂ log p(y | X, θ) / ∂r in registry order
    pub gradient: DVector<f64>,
}

/// Exact log marginal likelihood of a Gaussian process with Gaussian noise
///
/// ```math
/// log p(y | X, θ) = -½ (y - m)ᵀ (K + σ²I)⁻¹ (y - m) - ½ log|K + σ²I| - ½ N log 2π
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExactMarginalLogLikelihood;

impl ExactMarginalLogLikelihood {
    /// Evaluate the log marginal likelihood of the training targets and its
    /// gradient with respect to every raw hyperparameter of `gp`.
    ///
    /// The gradient of each covariance parameter is
    /// `½ tr[(ααᵀ - (K + σ²I)⁻¹) ∂K/∂r]` with `α = (K + σ²I)⁻¹ (y - m)`.
    pub fn evaluate<K: Kernel>(
        gp: &ExactGp<K>,
    ) -> Result<MarginalLogLikelihood> {
        let (k, k_grad) =
            gp.kernel().covariance_with_gradient(gp.data().x())?;
        let factor = gp.factor_covariance(&k)?;
        let alpha = &factor.alpha;

        // GPML Equation 2.30
        let value = factor.ln_m();

        // GPML Equation 5.9
        let aat_kinv = alpha * alpha.transpose() - factor.chol.inverse();

        let mut gradient = Vec::with_capacity(gp.n_parameters());
        gradient.extend(
            k_grad
                .iter()
                .map(|dk| 0.5 * aat_kinv.component_mul(dk).sum()),
        );
        // ∂(K + σ²I)/∂σ² = I
        gradient.push(gp.noise().raw_gradient(0.5 * aat_kinv.trace()));
        gradient.extend(gp.mean().ln_m_gradient(alpha));

        Ok(MarginalLogLikelihood {
            value,
            gradient: DVector::from_vec(gradient),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data::TrainingData;
    use crate::process::gaussian::kernel::{RBFKernel, ScaleKernel};
    use crate::process::gaussian::{MeanFunction, NoiseModel};

    fn data() -> Arc<TrainingData> {
        let x = [-3.0, -1.7, -0.4, 0.2, 0.9, 1.5, 2.8];
        let y: Vec<f64> =
            x.iter().map(|x: &f64| x.sin() + 0.1 * x).collect();
        Arc::new(TrainingData::from_scalars(&x, &y).unwrap())
    }

    fn numeric_gradient<K: Kernel>(gp: &ExactGp<K>) -> DVector<f64> {
        const H: f64 = 1E-6;
        let theta = gp.raw_parameters();
        DVector::from_iterator(
            theta.len(),
            (0..theta.len()).map(|k| {
                let mut plus = theta.clone();
                plus[k] += H;
                let mut minus = theta.clone();
                minus[k] -= H;
                let fp = gp
                    .with_raw_parameters(plus.as_slice())
                    .unwrap()
                    .ln_m()
                    .unwrap();
                let fm = gp
                    .with_raw_parameters(minus.as_slice())
                    .unwrap()
                    .ln_m()
                    .unwrap();
                (fp - fm) / (2.0 * H)
            }),
        )
    }

    fn assert_gradient_matches<K: Kernel>(gp: &ExactGp<K>) {
        let mll = ExactMarginalLogLikelihood::evaluate(gp).unwrap();
        let numeric = numeric_gradient(gp);
        assert_eq!(mll.gradient.len(), numeric.len());
        for (a, b) in mll.gradient.iter().zip(numeric.iter()) {
            approx::assert_relative_eq!(
                *a,
                *b,
                epsilon = 1E-4,
                max_relative = 1E-4
            );
        }
    }

    #[test]
    fn value_matches_marginal_density() {
        let gp = ExactGp::new(
            data(),
            RBFKernel::new(0.8).unwrap(),
            NoiseModel::new(0.3, 1E-5).unwrap(),
            MeanFunction::Zero,
        );
        let mll = ExactMarginalLogLikelihood::evaluate(&gp).unwrap();
        let expected = gp.marginal().ln_pdf(gp.data().y()).unwrap();
        assert::close(mll.value, expected, 1E-10);
        assert::close(mll.value, gp.ln_m().unwrap(), 1E-10);
    }

    #[test]
    fn rbf_gradient_matches_finite_difference() {
        for (l, noise) in [(0.3, 0.01), (0.693, 2.0), (2.5, 0.1)] {
            let gp = ExactGp::new(
                data(),
                RBFKernel::new(l).unwrap(),
                NoiseModel::new(noise, 1E-5).unwrap(),
                MeanFunction::Zero,
            );
            assert_gradient_matches(&gp);
        }
    }

    #[test]
    fn scaled_constant_mean_gradient_matches_finite_difference() {
        for (s, l, noise, c) in
            [(0.5, 1.0, 0.2, 0.0), (2.0, 0.4, 0.05, -0.3), (1.3, 3.0, 1.0, 1.1)]
        {
            let gp = ExactGp::new(
                data(),
                ScaleKernel::new(RBFKernel::new(l).unwrap(), s).unwrap(),
                NoiseModel::new(noise, 1E-5).unwrap(),
                MeanFunction::constant(c),
            );
            assert_eq!(gp.n_parameters(), 4);
            assert_gradient_matches(&gp);
        }
    }

    #[test]
    fn gradient_follows_registry_order() {
        let gp = ExactGp::new(
            data(),
            RBFKernel::new(1.0).unwrap(),
            NoiseModel::new(0.5, 1E-5).unwrap(),
            MeanFunction::constant(0.0),
        );
        let mll = ExactMarginalLogLikelihood::evaluate(&gp).unwrap();
        assert_eq!(mll.gradient.len(), gp.registry().unwrap().len());
    }
}
