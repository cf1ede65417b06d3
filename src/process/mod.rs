//! Random processes and hyperparameter estimation
use nalgebra::{DMatrix, DVector};

use crate::result::Result;

pub mod gaussian;

/// A random process whose hyperparameters are fit by maximizing the log
/// marginal likelihood of its training data.
pub trait RandomProcess: Sized {
    /// Type of the sample function, aka trajectory of the process.
    type SampleFunction;

    /// Create a sample function at the indices given.
    fn sample_function(
        &self,
        indices: &DMatrix<f64>,
    ) -> Result<Self::SampleFunction>;

    /// Compute the log marginal likelihood
    fn ln_m(&self) -> Result<f64>;

    /// Compute the log marginal likelihood with a different set of raw
    /// parameters and compute the gradient.
    fn ln_m_with_parameters(
        &self,
        parameters: &DVector<f64>,
    ) -> Result<(f64, DVector<f64>)>;

    /// Get the raw parameters
    fn parameters(&self) -> DVector<f64>;

    /// Set with the given raw parameters
    fn set_parameters(self, parameters: &DVector<f64>) -> Result<Self>;
}

#[cfg(feature = "lbfgs")]
pub use self::mle::{RandomProcessMle, RandomProcessMleOp};

#[cfg(feature = "lbfgs")]
mod mle {
    use argmin::core::{
        CostFunction, Error as ArgminError, Executor, Gradient, State,
    };
    use argmin::solver::linesearch::MoreThuenteLineSearch;
    use argmin::solver::quasinewton::LBFGS;
    use nalgebra::DVector;

    use super::RandomProcess;
    use crate::result::{GpError, Result};

    /// History length of the L-BFGS approximation
    const LBFGS_MEMORY: usize = 7;

    /// Random Process which can be optimized to reach a maximum likelihood
    /// estimate with L-BFGS.
    pub trait RandomProcessMle: RandomProcess + Clone {
        /// Run the optimization
        fn optimize(self, max_iters: u64) -> Result<Self> {
            let params = self.parameters();
            let op = RandomProcessMleOp {
                process: self.clone(),
            };
            let linesearch = MoreThuenteLineSearch::new();
            let solver = LBFGS::new(linesearch, LBFGS_MEMORY);

            let res = Executor::new(op, solver)
                .configure(|state| state.param(params).max_iters(max_iters))
                .run()
                .map_err(|e| GpError::Optimizer(e.to_string()))?;

            let best = res.state().get_best_param().cloned().ok_or_else(|| {
                GpError::Optimizer("optimizer returned no parameters".into())
            })?;
            log::debug!(
                "L-BFGS finished after {} iterations",
                res.state().get_iter()
            );
            self.set_parameters(&best)
        }
    }

    impl<P> RandomProcessMle for P where P: RandomProcess + Clone {}

    /// Negated log marginal likelihood as an argmin problem
    pub struct RandomProcessMleOp<P>
    where
        P: RandomProcess,
    {
        process: P,
    }

    impl<P> CostFunction for RandomProcessMleOp<P>
    where
        P: RandomProcess,
    {
        type Param = DVector<f64>;
        type Output = f64;

        fn cost(
            &self,
            param: &Self::Param,
        ) -> std::result::Result<f64, ArgminError> {
            Ok(-self.process.ln_m_with_parameters(param)?.0)
        }
    }

    impl<P> Gradient for RandomProcessMleOp<P>
    where
        P: RandomProcess,
    {
        type Param = DVector<f64>;
        type Gradient = DVector<f64>;

        fn gradient(
            &self,
            param: &Self::Param,
        ) -> std::result::Result<DVector<f64>, ArgminError> {
            Ok(-self.process.ln_m_with_parameters(param)?.1)
        }
    }
}
