//! First-order update rules for fitting raw hyperparameters
//!
//! Each rule minimizes a loss given its gradient with respect to the raw
//! hyperparameter vector. Entries switched off in the trainable mask are
//! never touched.
use nalgebra::DVector;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

use crate::result::{GpError, Result};

/// First-order update rule
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub enum UpdateRule {
    /// raw ← raw - η ∇
    GradientDescent,
    /// Heavy-ball momentum, v ← μ v + ∇; raw ← raw - η v
    Momentum {
        /// Momentum coefficient μ in [0, 1)
        momentum: f64,
    },
    /// Adam with bias-corrected moment estimates
    Adam {
        /// Decay of the first moment estimate
        beta1: f64,
        /// Decay of the second moment estimate
        beta2: f64,
        /// Added to the denominator
        epsilon: f64,
    },
}

impl Default for UpdateRule {
    fn default() -> Self {
        Self::Adam {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1E-8,
        }
    }
}

impl UpdateRule {
    /// Heavy-ball momentum with coefficient 0.9
    pub fn momentum() -> Self {
        Self::Momentum { momentum: 0.9 }
    }

    /// Check the rule's constants
    ///
    /// ```
    /// use gpfit::optim::UpdateRule;
    ///
    /// assert!(UpdateRule::default().validate().is_ok());
    /// assert!(UpdateRule::Momentum { momentum: 1.0 }.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        let in_unit = |x: f64| (0.0..1.0).contains(&x);
        match *self {
            Self::GradientDescent => Ok(()),
            Self::Momentum { momentum } if in_unit(momentum) => Ok(()),
            Self::Momentum { momentum } => Err(GpError::InvalidConfig(
                format!("momentum must be in [0, 1), got {momentum}"),
            )),
            Self::Adam {
                beta1,
                beta2,
                epsilon,
            } => {
                if !in_unit(beta1) || !in_unit(beta2) {
                    Err(GpError::InvalidConfig(format!(
                        "Adam betas must be in [0, 1), got ({beta1}, {beta2})"
                    )))
                } else if !(epsilon.is_finite() && epsilon > 0.0) {
                    Err(GpError::InvalidConfig(format!(
                        "Adam epsilon must be positive, got {epsilon}"
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Accumulated state of an [`UpdateRule`] over a fit
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerState {
    rule: UpdateRule,
    learning_rate: f64,
    /// Number of steps taken
    t: u64,
    /// Velocity for momentum, first moment for Adam
    m: DVector<f64>,
    /// Second moment for Adam
    v: DVector<f64>,
}

impl OptimizerState {
    /// Fresh state for `n` raw parameters
    pub fn new(rule: UpdateRule, learning_rate: f64, n: usize) -> Self {
        Self {
            rule,
            learning_rate,
            t: 0,
            m: DVector::zeros(n),
            v: DVector::zeros(n),
        }
    }

    /// The rule being applied
    pub fn rule(&self) -> UpdateRule {
        self.rule
    }

    /// Number of steps taken so far
    pub fn steps(&self) -> u64 {
        self.t
    }

    /// Take one descent step on `params` along the loss gradient `grad`,
    /// updating only entries where `mask` is `true`.
    ///
    /// # Example
    ///
    /// ```
    /// use gpfit::optim::{OptimizerState, UpdateRule};
    /// use nalgebra::DVector;
    ///
    /// let mut state =
    ///     OptimizerState::new(UpdateRule::GradientDescent, 0.5, 2);
    /// let mut params = DVector::from_column_slice(&[1.0, 1.0]);
    /// let grad = DVector::from_column_slice(&[2.0, 2.0]);
    ///
    /// state.step(&mut params, &grad, &[true, false]);
    /// assert_eq!(params.as_slice(), &[0.0, 1.0]);
    /// ```
    pub fn step(
        &mut self,
        params: &mut DVector<f64>,
        grad: &DVector<f64>,
        mask: &[bool],
    ) {
        self.t += 1;
        let lr = self.learning_rate;
        match self.rule {
            UpdateRule::GradientDescent => {
                for (i, g) in grad.iter().enumerate() {
                    if mask[i] {
                        params[i] -= lr * g;
                    }
                }
            }
            UpdateRule::Momentum { momentum } => {
                for (i, g) in grad.iter().enumerate() {
                    if mask[i] {
                        self.m[i] = momentum * self.m[i] + g;
                        params[i] -= lr * self.m[i];
                    }
                }
            }
            UpdateRule::Adam {
                beta1,
                beta2,
                epsilon,
            } => {
                let t = self.t as i32;
                let bias1 = 1.0 - beta1.powi(t);
                let bias2 = 1.0 - beta2.powi(t);
                for (i, g) in grad.iter().enumerate() {
                    if mask[i] {
                        self.m[i] = beta1 * self.m[i] + (1.0 - beta1) * g;
                        self.v[i] = beta2 * self.v[i] + (1.0 - beta2) * g * g;
                        let m_hat = self.m[i] / bias1;
                        let v_hat = self.v[i] / bias2;
                        params[i] -= lr * m_hat / (v_hat.sqrt() + epsilon);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic_grad(x: &DVector<f64>) -> DVector<f64> {
        // f(x) = Σ (x_i - 3)^2
        x.map(|xi| 2.0 * (xi - 3.0))
    }

    fn minimize(rule: UpdateRule, lr: f64, steps: usize) -> DVector<f64> {
        let mut state = OptimizerState::new(rule, lr, 2);
        let mut x = DVector::from_column_slice(&[0.0, -1.0]);
        for _ in 0..steps {
            let g = quadratic_grad(&x);
            state.step(&mut x, &g, &[true, true]);
        }
        x
    }

    #[test]
    fn gradient_descent_converges_on_quadratic() {
        let x = minimize(UpdateRule::GradientDescent, 0.1, 200);
        assert::close(x[0], 3.0, 1E-6);
        assert::close(x[1], 3.0, 1E-6);
    }

    #[test]
    fn momentum_converges_on_quadratic() {
        let x = minimize(UpdateRule::momentum(), 0.01, 500);
        assert::close(x[0], 3.0, 1E-4);
        assert::close(x[1], 3.0, 1E-4);
    }

    #[test]
    fn adam_converges_on_quadratic() {
        let x = minimize(UpdateRule::default(), 0.1, 1000);
        assert::close(x[0], 3.0, 1E-3);
        assert::close(x[1], 3.0, 1E-3);
    }

    #[test]
    fn first_adam_step_has_magnitude_lr() {
        let mut state = OptimizerState::new(UpdateRule::default(), 0.1, 1);
        let mut x = DVector::from_element(1, 0.0);
        state.step(&mut x, &DVector::from_element(1, 123.0), &[true]);
        assert::close(x[0], -0.1, 1E-9);
        assert_eq!(state.steps(), 1);
    }

    #[test]
    fn masked_entries_never_move() {
        for rule in [
            UpdateRule::GradientDescent,
            UpdateRule::momentum(),
            UpdateRule::default(),
        ] {
            let mut state = OptimizerState::new(rule, 0.1, 2);
            let mut x = DVector::from_column_slice(&[0.0, 0.0]);
            for _ in 0..10 {
                let g = quadratic_grad(&x);
                state.step(&mut x, &g, &[false, true]);
            }
            assert_eq!(x[0], 0.0);
            assert!(x[1] > 0.0);
        }
    }

    #[test]
    fn validate_rejects_bad_constants() {
        let bad = [
            UpdateRule::Momentum { momentum: -0.1 },
            UpdateRule::Adam {
                beta1: 1.0,
                beta2: 0.999,
                epsilon: 1E-8,
            },
            UpdateRule::Adam {
                beta1: 0.9,
                beta2: 0.999,
                epsilon: 0.0,
            },
        ];
        for rule in bad {
            assert!(matches!(rule.validate(), Err(GpError::InvalidConfig(_))));
        }
        assert!(UpdateRule::GradientDescent.validate().is_ok());
    }
}
