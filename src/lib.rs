//! Exact Gaussian process regression with gradient-based hyperparameter
//! fitting.
//!
//! A model is an [`ExactGp`](process::gaussian::ExactGp): a mean function, a
//! covariance kernel and homoscedastic Gaussian noise over a fixed set of
//! training points. Its hyperparameters live in an explicit
//! [`HyperparameterRegistry`](param::HyperparameterRegistry) of raw values
//! read through positivity-preserving transforms, and are fit by maximizing
//! the exact log marginal likelihood with a first-order optimizer.
//!
//! # Example
//!
//! ```
//! use gpfit::{fit, FitConfig};
//!
//! let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64 / 19.0]).collect();
//! let y: Vec<f64> = x.iter().map(|x| (6.0 * x[0]).sin()).collect();
//!
//! let model = fit(&x, &y, FitConfig::default().with_num_epochs(100)).unwrap();
//!
//! let posterior = model.posterior(&[vec![0.5]]).unwrap();
//! assert!((posterior.mean()[0] - 3.0_f64.sin()).abs() < 0.1);
//! ```

pub mod consts;
pub mod data;
pub mod fit;
pub mod optim;
pub mod param;
pub mod prelude;
pub mod process;
pub mod result;

pub use data::TrainingData;
pub use fit::{fit, FitConfig, FittedModel};
pub use result::{GpError, Result};

doc_comment::doctest!("../README.md");
