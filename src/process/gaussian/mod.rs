//! Exact Gaussian Processes
//!
//! An [`ExactGp`] combines a mean function, a covariance [`Kernel`] and a
//! homoscedastic [`NoiseModel`] over a fixed set of [`TrainingData`]. In
//! [`Mode::Training`] a query returns the prior of the process; in
//! [`Mode::Evaluation`] it returns the posterior conditioned on the training
//! targets.
use std::sync::Arc;

use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector, Dyn};

use crate::consts::HALF_LN_2PI;
use crate::data::TrainingData;
use crate::param::{Hyperparameter, HyperparameterRegistry};
use crate::process::RandomProcess;
use crate::result::{GpError, HyperparameterValues, Result};

pub mod kernel;
use kernel::{Kernel, KernelError};

mod mean;
pub use mean::MeanFunction;

mod mll;
pub use mll::{ExactMarginalLogLikelihood, MarginalLogLikelihood};

mod mvn;
pub use mvn::MultivariateNormal;

mod noise_model;
pub use noise_model::NoiseModel;

/// Which computation path [`ExactGp::query`] takes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Mode {
    /// Queries return the prior, used while fitting hyperparameters
    #[default]
    Training,
    /// Queries return the posterior conditioned on the training data
    Evaluation,
}

/// Factorization of the noisy training covariance
pub(crate) struct TrainingFactor {
    /// Cholesky decomposition of K + σ²I
    pub chol: Cholesky<f64, Dyn>,
    /// y - m(X)
    pub resid: DVector<f64>,
    /// Dual coefficients of training data in kernel space
    pub alpha: DVector<f64>,
}

impl TrainingFactor {
    /// ln |K + σ²I| / 2
    pub fn half_ln_det(&self) -> f64 {
        self.chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum()
    }

    /// Log marginal likelihood of the residuals
    pub fn ln_m(&self) -> f64 {
        let n = self.resid.len() as f64;
        -0.5 * self.resid.dot(&self.alpha)
            - self.half_ln_det()
            - n * HALF_LN_2PI
    }
}

/// Exact Gaussian process regression model
#[derive(Clone, Debug, PartialEq)]
pub struct ExactGp<K>
where
    K: Kernel,
{
    /// Training inputs and targets, shared and never copied
    data: Arc<TrainingData>,
    /// Covariance Kernel
    kernel: K,
    /// Observation noise
    noise: NoiseModel,
    /// Prior mean
    mean: MeanFunction,
    mode: Mode,
}

impl<K> ExactGp<K>
where
    K: Kernel,
{
    /// Create a new model in training mode
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use gpfit::TrainingData;
    /// use gpfit::process::gaussian::{ExactGp, MeanFunction, NoiseModel};
    /// use gpfit::process::gaussian::kernel::RBFKernel;
    /// use nalgebra::DMatrix;
    ///
    /// let data = TrainingData::from_scalars(
    ///     &[-2.0, -1.0, 0.0, 1.0, 2.0],
    ///     &[-0.9, -0.8, 0.0, 0.8, 0.9],
    /// ).unwrap();
    ///
    /// let mut gp = ExactGp::new(
    ///     Arc::new(data),
    ///     RBFKernel::new(1.0).unwrap(),
    ///     NoiseModel::new(1E-2, 1E-5).unwrap(),
    ///     MeanFunction::Zero,
    /// );
    /// gp.eval();
    ///
    /// let xs = DMatrix::from_column_slice(1, 1, &[0.5]);
    /// let posterior = gp.query(&xs).unwrap();
    /// assert!(posterior.mean()[0] > 0.0);
    /// ```
    pub fn new(
        data: Arc<TrainingData>,
        kernel: K,
        noise: NoiseModel,
        mean: MeanFunction,
    ) -> Self {
        Self {
            data,
            kernel,
            noise,
            mean,
            mode: Mode::Training,
        }
    }

    /// The training data
    pub fn data(&self) -> &TrainingData {
        &self.data
    }

    /// Shared handle to the training data
    pub fn shared_data(&self) -> Arc<TrainingData> {
        Arc::clone(&self.data)
    }

    /// Return the kernel being used in this GP
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// The noise model
    pub fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    /// The prior mean function
    pub fn mean(&self) -> &MeanFunction {
        &self.mean
    }

    /// Current mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch to training mode: queries return the prior
    pub fn train(&mut self) {
        self.mode = Mode::Training;
    }

    /// Switch to evaluation mode: queries return the posterior
    pub fn eval(&mut self) {
        self.mode = Mode::Evaluation;
    }

    /// Number of hyperparameters across kernel, noise and mean
    pub fn n_parameters(&self) -> usize {
        self.kernel.n_parameters()
            + self.noise.n_parameters()
            + self.mean.n_parameters()
    }

    /// All hyperparameters, named `kernel.*`, `likelihood.*` and `mean.*`,
    /// in gradient order.
    pub fn hyperparameters(&self) -> Vec<Hyperparameter> {
        let kernel = self.kernel.hyperparameters();
        let noise = self.noise.hyperparameters();
        let mean = self.mean.hyperparameters();
        kernel
            .iter()
            .map(|p| p.prefixed("kernel"))
            .chain(noise.iter().map(|p| p.prefixed("likelihood")))
            .chain(mean.iter().map(|p| p.prefixed("mean")))
            .collect()
    }

    /// Explicit registry of the hyperparameters
    pub fn registry(&self) -> Result<HyperparameterRegistry> {
        Ok(HyperparameterRegistry::new(self.hyperparameters())?)
    }

    /// Raw hyperparameters in registry order
    pub fn raw_parameters(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.n_parameters(),
            self.hyperparameters().iter().map(Hyperparameter::raw),
        )
    }

    /// The same model with every raw hyperparameter replaced
    pub fn with_raw_parameters(&self, raw: &[f64]) -> Result<Self> {
        let (kernel, rest) = self.kernel.consume_parameters(raw)?;
        let (noise, rest) = self
            .noise
            .consume_parameters(rest)
            .ok_or(KernelError::MissingParameters(1))?;
        let (mean, rest) = self
            .mean
            .consume_parameters(rest)
            .ok_or(KernelError::MissingParameters(self.mean.n_parameters()))?;
        if !rest.is_empty() {
            return Err(KernelError::ExtraneousParameters(rest.len()).into());
        }
        Ok(Self {
            data: Arc::clone(&self.data),
            kernel,
            noise,
            mean,
            mode: self.mode,
        })
    }

    pub(crate) fn instability(&self) -> GpError {
        let values = self
            .hyperparameters()
            .iter()
            .map(|p| (p.name().to_string(), p.value()))
            .collect();
        GpError::NumericalInstability {
            hyperparameters: HyperparameterValues(values),
        }
    }

    fn check_query(&self, xs: &DMatrix<f64>) -> Result<()> {
        if xs.ncols() != self.data.dims() {
            return Err(GpError::InvalidInput(format!(
                "query points have {} dimensions, training points have {}",
                xs.ncols(),
                self.data.dims()
            )));
        }
        if xs.iter().all(|x| x.is_finite()) {
            Ok(())
        } else {
            Err(GpError::InvalidInput(
                "query points contain non-finite values".into(),
            ))
        }
    }

    /// Factor K(X, X) + σ²I and solve for the dual coefficients
    pub(crate) fn factor(&self) -> Result<TrainingFactor> {
        let x = self.data.x();
        self.factor_covariance(&self.kernel.covariance(x, x))
    }

    /// Factor `k + σ²I` where `k` is the noiseless training covariance
    pub(crate) fn factor_covariance(
        &self,
        k: &DMatrix<f64>,
    ) -> Result<TrainingFactor> {
        let k = self.noise.add_noise_to_kernel(k);

        // Decompose K into Cholesky lower triangular matrix
        let chol = Cholesky::new(k).ok_or_else(|| self.instability())?;
        let resid = self.data.y() - self.mean.evaluate(self.data.x());
        let alpha = chol.solve(&resid);
        Ok(TrainingFactor { chol, resid, alpha })
    }

    /// Prior of the latent function at `xs`, `Normal(m(xs), K(xs, xs))`
    pub fn prior(&self, xs: &DMatrix<f64>) -> Result<MultivariateNormal> {
        self.check_query(xs)?;
        Ok(MultivariateNormal::new_unchecked(
            self.mean.evaluate(xs),
            self.kernel.covariance(xs, xs),
        ))
    }

    /// Marginal distribution of the training targets,
    /// `Normal(m(X), K(X, X) + σ²I)`
    pub fn marginal(&self) -> MultivariateNormal {
        let x = self.data.x();
        MultivariateNormal::new_unchecked(
            self.mean.evaluate(x),
            self.noise
                .add_noise_to_kernel(&self.kernel.covariance(x, x)),
        )
    }

    /// Posterior of the latent function at `xs` given the training data
    ///
    /// ```math
    /// μ* = m(X*) + K(X*, X) [K(X, X) + σ²I]⁻¹ (y - m(X))
    /// Σ* = K(X*, X*) - K(X*, X) [K(X, X) + σ²I]⁻¹ K(X, X*)
    /// ```
    pub fn posterior(&self, xs: &DMatrix<f64>) -> Result<MultivariateNormal> {
        self.check_query(xs)?;
        let factor = self.factor()?;

        let k_trans = self.kernel.covariance(xs, self.data.x());
        let mean = self.mean.evaluate(xs) + &k_trans * &factor.alpha;

        let v = factor.chol.solve(&k_trans.transpose());
        let cov = self.kernel.covariance(xs, xs) - &k_trans * v;
        let cov = (&cov + cov.transpose()) * 0.5;

        Ok(MultivariateNormal::new_unchecked(mean, cov))
    }

    /// Posterior predictive distribution of new observations at `xs`, the
    /// posterior with the observation noise added.
    pub fn predictive(&self, xs: &DMatrix<f64>) -> Result<MultivariateNormal> {
        let posterior = self.posterior(xs)?;
        let cov = self.noise.add_noise_to_kernel(posterior.cov());
        Ok(MultivariateNormal::new_unchecked(posterior.mean().clone(), cov))
    }

    /// Forward pass: the prior in training mode, the posterior in
    /// evaluation mode.
    pub fn query(&self, xs: &DMatrix<f64>) -> Result<MultivariateNormal> {
        match self.mode {
            Mode::Training => self.prior(xs),
            Mode::Evaluation => self.posterior(xs),
        }
    }

    /// Return the log marginal likelihood
    pub fn ln_m(&self) -> Result<f64> {
        Ok(self.factor()?.ln_m())
    }
}

impl<K> RandomProcess for ExactGp<K>
where
    K: Kernel,
{
    type SampleFunction = MultivariateNormal;

    fn sample_function(
        &self,
        indices: &DMatrix<f64>,
    ) -> Result<Self::SampleFunction> {
        self.query(indices)
    }

    fn ln_m(&self) -> Result<f64> {
        ExactGp::ln_m(self)
    }

    fn ln_m_with_parameters(
        &self,
        parameters: &DVector<f64>,
    ) -> Result<(f64, DVector<f64>)> {
        let gp = self.with_raw_parameters(parameters.as_slice())?;
        let mll = ExactMarginalLogLikelihood::evaluate(&gp)?;
        Ok((mll.value, mll.gradient))
    }

    fn parameters(&self) -> DVector<f64> {
        self.raw_parameters()
    }

    fn set_parameters(self, parameters: &DVector<f64>) -> Result<Self> {
        self.with_raw_parameters(parameters.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::gaussian::kernel::{RBFKernel, ScaleKernel};

    fn sin_data() -> Arc<TrainingData> {
        let x = [-4.0, -3.0, -2.0, -1.0, 1.0];
        let y: Vec<f64> = x.iter().map(|x: &f64| x.sin()).collect();
        Arc::new(TrainingData::from_scalars(&x, &y).unwrap())
    }

    fn arange(start: f64, stop: f64, step_size: f64) -> DMatrix<f64> {
        let size = ((stop - start) / step_size).floor() as usize;
        let it = (0..size).map(|i| start + (i as f64) * step_size);
        DMatrix::from_iterator(size, 1, it)
    }

    fn rbf_gp(noise: f64) -> ExactGp<RBFKernel> {
        ExactGp::new(
            sin_data(),
            RBFKernel::new(1.0).unwrap(),
            NoiseModel::new(noise, 1E-12).unwrap(),
            MeanFunction::Zero,
        )
    }

    #[test]
    fn simple() {
        let mut gp = rbf_gp(1E-10);
        gp.eval();

        let xs: DMatrix<f64> = arange(-5.0, 5.0, 1.0);
        let pred = gp.query(&xs).unwrap();

        let expected_mean: DVector<f64> = DVector::from_column_slice(&[
            0.614_097_52,
            0.756_802_5,
            -0.141_120_01,
            -0.909_297_43,
            -0.841_470_98,
            0.085_333_65,
            0.841_470_98,
            0.563_985_6,
            0.127_422_02,
            0.010_476_83,
        ]);
        assert!(pred.mean().relative_eq(&expected_mean, 1E-6, 1E-6));

        // Known values at the training points have (almost) no variance
        let var = pred.variance();
        for i in [1, 2, 3, 4, 6] {
            assert!(var[i] < 1E-6);
        }
        assert::close(var[0], 0.509_625_632, 1E-6);
        assert::close(var[9], 0.999_872_74, 1E-6);
    }

    #[test]
    fn ln_m_matches_marginal_density() {
        let gp = rbf_gp(0.1);
        let expected = gp.marginal().ln_pdf(gp.data().y()).unwrap();
        assert::close(gp.ln_m().unwrap(), expected, 1E-10);
    }

    #[test]
    fn training_mode_returns_prior() {
        let gp = rbf_gp(0.1);
        assert_eq!(gp.mode(), Mode::Training);
        let xs = arange(-1.0, 1.0, 0.5);
        let prior = gp.query(&xs).unwrap();
        assert_eq!(prior.mean(), &DVector::zeros(4));
        assert!(prior.variance().iter().all(|&v| (v - 1.0).abs() < 1E-12));
    }

    #[test]
    fn mode_switch_does_not_change_hyperparameters() {
        let mut gp = rbf_gp(0.1);
        let before = gp.raw_parameters();
        gp.eval();
        assert_eq!(gp.mode(), Mode::Evaluation);
        gp.train();
        assert_eq!(gp.raw_parameters(), before);
    }

    #[test]
    fn predictive_adds_noise() {
        let mut gp = rbf_gp(0.25);
        gp.eval();
        let xs = arange(0.0, 2.0, 1.0);
        let post = gp.posterior(&xs).unwrap();
        let pred = gp.predictive(&xs).unwrap();
        for i in 0..2 {
            assert::close(pred.variance()[i], post.variance()[i] + 0.25, 1E-12);
        }
    }

    #[test]
    fn registry_names_and_order() {
        let gp = ExactGp::new(
            sin_data(),
            ScaleKernel::new(RBFKernel::new(1.0).unwrap(), 2.0).unwrap(),
            NoiseModel::new(0.5, 1E-5).unwrap(),
            MeanFunction::constant(0.1),
        );
        let registry = gp.registry().unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "kernel.outputscale",
                "kernel.lengthscale",
                "likelihood.noise",
                "mean.constant"
            ]
        );
        assert::close(
            registry.get("kernel.outputscale").unwrap().value(),
            2.0,
            1E-12,
        );
        assert_eq!(registry.raw_values(), gp.raw_parameters());
    }

    #[test]
    fn with_raw_parameters_round_trip() {
        let gp = rbf_gp(0.5);
        let raw = DVector::from_column_slice(&[0.3, -1.0]);
        let next = gp.with_raw_parameters(raw.as_slice()).unwrap();
        assert_eq!(next.raw_parameters(), raw);
        assert!(gp.with_raw_parameters(&[0.3]).is_err());
        assert!(gp.with_raw_parameters(&[0.3, 1.0, 2.0]).is_err());
    }

    #[test]
    fn query_checks_dimensions() {
        let mut gp = rbf_gp(0.5);
        gp.eval();
        let xs = DMatrix::zeros(2, 2);
        assert!(matches!(gp.query(&xs), Err(GpError::InvalidInput(_))));
        let xs = DMatrix::from_element(1, 1, f64::NAN);
        assert!(matches!(gp.query(&xs), Err(GpError::InvalidInput(_))));
    }

    #[test]
    fn instability_reports_constrained_values() {
        let gp = rbf_gp(0.5);
        match gp.instability() {
            GpError::NumericalInstability { hyperparameters } => {
                assert_eq!(hyperparameters.0.len(), 2);
                assert_eq!(hyperparameters.0[0].0, "kernel.lengthscale");
                assert::close(hyperparameters.0[0].1, 1.0, 1E-10);
                assert_eq!(hyperparameters.0[1].0, "likelihood.noise");
                assert::close(hyperparameters.0[1].1, 0.5, 1E-10);
            }
            other => panic!("expected instability, got {other:?}"),
        }
    }

    #[test]
    fn random_process_parameters_round_trip() {
        let gp = rbf_gp(0.5);
        let params = DVector::from_column_slice(&[0.2, -0.4]);
        let (ln_m, grad) = gp.ln_m_with_parameters(&params).unwrap();
        let moved = gp.set_parameters(&params).unwrap();
        assert_eq!(RandomProcess::parameters(&moved), params);
        assert::close(RandomProcess::ln_m(&moved).unwrap(), ln_m, 1E-12);
        assert_eq!(grad.len(), 2);
    }

    #[cfg(feature = "lbfgs")]
    #[test]
    fn lbfgs_improves_ln_m() {
        use crate::process::RandomProcessMle;

        let gp = ExactGp::new(
            sin_data(),
            RBFKernel::new(3.0).unwrap(),
            NoiseModel::new(1.0, 1E-5).unwrap(),
            MeanFunction::Zero,
        );
        let before = gp.ln_m().unwrap();
        let fitted = gp.optimize(50).unwrap();
        assert!(fitted.ln_m().unwrap() > before);
    }
}
