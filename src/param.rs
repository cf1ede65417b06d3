//! Constrained hyperparameters
//!
//! Every hyperparameter of a model is stored as an unconstrained raw value
//! `r ∈ ℝ` and read through a monotonic [`Transform`]. Optimizers only ever
//! touch the raw value, so no update can push a parameter outside of its
//! domain.
use std::fmt;

use nalgebra::DVector;
use thiserror::Error;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// Map from an unconstrained raw value to a constrained value
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub enum Transform {
    /// value = raw
    Identity,
    /// value = lower_bound + ln(1 + exp(raw))
    Softplus {
        /// Strict lower bound of the constrained value
        lower_bound: f64,
    },
    /// value = exp(raw)
    Log,
}

/// Numerically stable `ln(1 + exp(x))`
#[inline]
pub fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Logistic sigmoid, the derivative of [`softplus`]
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Inverse of [`softplus`] for `y > 0`
#[inline]
pub fn inv_softplus(y: f64) -> f64 {
    // ln(exp(y) - 1) = y + ln(1 - exp(-y))
    y + (-(-y).exp_m1()).ln()
}

impl Transform {
    /// Softplus transform with a strict lower bound
    #[must_use]
    pub fn softplus(lower_bound: f64) -> Self {
        Self::Softplus { lower_bound }
    }

    /// Lower bound of the constrained domain
    #[must_use]
    pub fn lower_bound(&self) -> f64 {
        match self {
            Self::Identity => f64::NEG_INFINITY,
            Self::Softplus { lower_bound } => *lower_bound,
            Self::Log => 0.0,
        }
    }

    /// Returns `true` if `value` lies in the constrained domain
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value > self.lower_bound()
    }

    /// Constrained value of `raw`
    ///
    /// # Example
    ///
    /// ```
    /// use gpfit::param::Transform;
    ///
    /// let t = Transform::softplus(1E-5);
    /// assert!(t.forward(-1000.0) > 1E-5);
    /// assert!(t.forward(1000.0).is_finite());
    /// ```
    #[must_use]
    pub fn forward(&self, raw: f64) -> f64 {
        match self {
            Self::Identity => raw,
            Self::Softplus { lower_bound } => {
                // Once softplus underflows the value would collapse onto the
                // bound, so keep a few ulps of excess.
                lower_bound + softplus(raw).max(min_excess(*lower_bound))
            }
            Self::Log => raw.exp().max(f64::MIN_POSITIVE),
        }
    }

    /// Raw value that maps to the constrained `value`
    pub fn inverse(&self, value: f64) -> Result<f64, TransformError> {
        if !self.contains(value) {
            return Err(TransformError {
                given: value,
                lower_bound: self.lower_bound(),
            });
        }
        Ok(match self {
            Self::Identity => value,
            Self::Softplus { lower_bound } => inv_softplus(value - lower_bound),
            Self::Log => value.ln(),
        })
    }

    /// d value / d raw evaluated at `raw`
    #[must_use]
    pub fn derivative(&self, raw: f64) -> f64 {
        match self {
            Self::Identity => 1.0,
            Self::Softplus { lower_bound } => {
                if softplus(raw) < min_excess(*lower_bound) {
                    0.0
                } else {
                    sigmoid(raw)
                }
            }
            Self::Log => raw.exp(),
        }
    }
}

/// Smallest excess over `lower_bound` a softplus value is clamped to
fn min_excess(lower_bound: f64) -> f64 {
    (lower_bound.abs() * 4.0 * f64::EPSILON).max(f64::MIN_POSITIVE)
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Softplus { lower_bound } => {
                write!(f, "softplus(lower_bound = {lower_bound})")
            }
            Self::Log => write!(f, "log"),
        }
    }
}

/// A constrained value fell outside of its transform's domain
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("value {given} is outside of the domain ({lower_bound}, inf)")]
pub struct TransformError {
    /// Value given
    pub given: f64,
    /// Lower bound of the domain
    pub lower_bound: f64,
}

/// Errors from constructing or addressing hyperparameters
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub enum ParameterError {
    /// Parameter out of bounds
    #[error(
        "parameter {name} is out of bounds ({lower_bound}, inf), \
         given: {given}"
    )]
    OutOfBounds {
        /// Name of parameter
        name: String,
        /// Value given
        given: f64,
        /// Lower bound on the value
        lower_bound: f64,
    },
    /// Two parameters share a name
    #[error("duplicate hyperparameter name: {0}")]
    Duplicate(String),
    /// A name does not match any registered parameter
    #[error("unknown hyperparameter: {0}")]
    Unknown(String),
    /// Wrong number of raw values given
    #[error("expected {expected} raw values, got {given}")]
    WrongLength {
        /// Number of registered parameters
        expected: usize,
        /// Number of raw values given
        given: usize,
    },
}

/// A named hyperparameter stored through its raw value
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct Hyperparameter {
    name: String,
    raw: f64,
    transform: Transform,
}

impl Hyperparameter {
    /// Create a hyperparameter from its constrained value
    ///
    /// # Example
    ///
    /// ```
    /// use gpfit::param::{Hyperparameter, Transform};
    ///
    /// let noise = Hyperparameter::new("noise", 2.0, Transform::softplus(1E-5))
    ///     .unwrap();
    /// assert::close(noise.value(), 2.0, 1E-12);
    ///
    /// assert!(Hyperparameter::new("noise", 0.0, Transform::softplus(1E-5))
    ///     .is_err());
    /// ```
    pub fn new(
        name: impl Into<String>,
        value: f64,
        transform: Transform,
    ) -> Result<Self, ParameterError> {
        let name = name.into();
        match transform.inverse(value) {
            Ok(raw) => Ok(Self {
                name,
                raw,
                transform,
            }),
            Err(e) => Err(ParameterError::OutOfBounds {
                name,
                given: e.given,
                lower_bound: e.lower_bound,
            }),
        }
    }

    /// Create a hyperparameter directly from its raw value
    #[must_use]
    pub fn from_raw(
        name: impl Into<String>,
        raw: f64,
        transform: Transform,
    ) -> Self {
        Self {
            name: name.into(),
            raw,
            transform,
        }
    }

    /// Name of the parameter
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unconstrained raw value
    pub fn raw(&self) -> f64 {
        self.raw
    }

    /// Transform used to read the parameter
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Constrained value
    pub fn value(&self) -> f64 {
        self.transform.forward(self.raw)
    }

    /// Same parameter with a different raw value
    #[must_use]
    pub fn with_raw(&self, raw: f64) -> Self {
        Self {
            raw,
            ..self.clone()
        }
    }

    /// Same parameter with `prefix.` prepended to its name
    #[must_use]
    pub fn prefixed(&self, prefix: &str) -> Self {
        Self {
            name: format!("{prefix}.{}", self.name),
            ..self.clone()
        }
    }

    /// Convert a derivative with respect to the constrained value into a
    /// derivative with respect to the raw value.
    pub fn raw_gradient(&self, d_value: f64) -> f64 {
        d_value * self.transform.derivative(self.raw)
    }
}

impl fmt::Display for Hyperparameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.value())
    }
}

/// Ordered, explicit list of the hyperparameters of a model
///
/// The order of the registry is the order of every raw parameter vector and
/// every gradient handed around by the model and the optimizers.
#[derive(Clone, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct HyperparameterRegistry {
    entries: Vec<Hyperparameter>,
}

impl HyperparameterRegistry {
    /// Build a registry, checking that names are unique
    pub fn new(entries: Vec<Hyperparameter>) -> Result<Self, ParameterError> {
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.name == entry.name) {
                return Err(ParameterError::Duplicate(entry.name.clone()));
            }
        }
        Ok(Self { entries })
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no parameters
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the parameters in registry order
    pub fn iter(&self) -> std::slice::Iter<'_, Hyperparameter> {
        self.entries.iter()
    }

    /// Names in registry order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(Hyperparameter::name).collect()
    }

    /// Position of `name` in the registry
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Look up a parameter by name
    pub fn get(&self, name: &str) -> Option<&Hyperparameter> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Raw values in registry order
    pub fn raw_values(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.entries.len(),
            self.entries.iter().map(Hyperparameter::raw),
        )
    }

    /// `(name, constrained value)` pairs in registry order
    pub fn constrained_values(&self) -> Vec<(String, f64)> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.value()))
            .collect()
    }

    /// Registry with every raw value replaced
    pub fn with_raw_values(&self, raw: &[f64]) -> Result<Self, ParameterError> {
        if raw.len() != self.entries.len() {
            return Err(ParameterError::WrongLength {
                expected: self.entries.len(),
                given: raw.len(),
            });
        }
        let entries = self
            .entries
            .iter()
            .zip(raw.iter())
            .map(|(e, &r)| e.with_raw(r))
            .collect();
        Ok(Self { entries })
    }

    /// Which parameters an optimizer may update.
    ///
    /// `include = None` selects every parameter; names in `exclude` are then
    /// removed. Every name must be registered.
    pub fn trainable_mask<S: AsRef<str>>(
        &self,
        include: Option<&[S]>,
        exclude: &[S],
    ) -> Result<Vec<bool>, ParameterError> {
        let check = |name: &str| {
            self.index_of(name)
                .ok_or_else(|| ParameterError::Unknown(name.to_string()))
        };

        let mut mask = match include {
            None => vec![true; self.len()],
            Some(names) => {
                let mut mask = vec![false; self.len()];
                for name in names {
                    mask[check(name.as_ref())?] = true;
                }
                mask
            }
        };

        for name in exclude {
            mask[check(name.as_ref())?] = false;
        }
        Ok(mask)
    }
}

impl<'a> IntoIterator for &'a HyperparameterRegistry {
    type Item = &'a Hyperparameter;
    type IntoIter = std::slice::Iter<'a, Hyperparameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Display for HyperparameterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for entry in &self.entries {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{entry}")?;
            first = false;
        }
        Ok(())
    }
}
