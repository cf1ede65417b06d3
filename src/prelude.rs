//! Re-imports for convenience
#[doc(no_inline)]
pub use crate::data::TrainingData;
#[doc(no_inline)]
pub use crate::fit::*;
#[doc(no_inline)]
pub use crate::optim::UpdateRule;
#[doc(no_inline)]
pub use crate::param::{Hyperparameter, HyperparameterRegistry, Transform};
#[doc(no_inline)]
pub use crate::process::gaussian::kernel::{Kernel, RBFKernel, ScaleKernel};
#[doc(no_inline)]
pub use crate::process::gaussian::{
    ExactGp, ExactMarginalLogLikelihood, MeanFunction, Mode,
    MultivariateNormal, NoiseModel,
};
#[doc(no_inline)]
pub use crate::process::RandomProcess;
#[doc(no_inline)]
pub use crate::result::GpError;
