//! Problem definition trait and the non-finite residual guard.
//!
//! A [`Problem`] is a nonlinear least-squares problem: a residual vector as a
//! function of a parameter vector. The solvers in [`crate::lm`] and the direct
//! searches in [`crate::search`] all consume this trait.

use std::cell::Cell;

use ndarray::{Array1, Array2};

use crate::error::Result;

/// A trait representing a nonlinear least squares problem.
pub trait Problem {
    /// Evaluate the residuals at the given parameters.
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Get the number of parameters in the problem.
    fn parameter_count(&self) -> usize;

    /// Get the number of residuals in the problem.
    fn residual_count(&self) -> usize;

    /// Evaluate the Jacobian matrix at the given parameters.
    ///
    /// The default implementation uses forward finite differences.
    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        crate::utils::finite_difference::jacobian(self, params, None)
    }

    /// Check if this problem provides a custom Jacobian implementation.
    fn has_custom_jacobian(&self) -> bool {
        false
    }

    /// Evaluate the sum of squared residuals at the given parameters.
    fn eval_cost(&self, params: &Array1<f64>) -> Result<f64> {
        let residuals = self.eval(params)?;
        Ok(residuals.iter().map(|r| r.powi(2)).sum())
    }
}

/// Residual substituted for NaN or infinite values.
pub const DEFAULT_PENALTY: f64 = 1e10;

/// Wraps a problem so that the solver never sees a non-finite residual.
///
/// Each NaN or infinite residual is replaced by a large finite penalty, which
/// makes any step into an invalid region look bad instead of poisoning the
/// linear algebra. The number of guarded evaluations is kept for reporting.
pub struct GuardedProblem<'p, P: Problem + ?Sized> {
    inner: &'p P,
    penalty: f64,
    guarded: Cell<usize>,
}

impl<'p, P: Problem + ?Sized> GuardedProblem<'p, P> {
    pub fn new(inner: &'p P) -> Self {
        Self::with_penalty(inner, DEFAULT_PENALTY)
    }

    pub fn with_penalty(inner: &'p P, penalty: f64) -> Self {
        Self {
            inner,
            penalty,
            guarded: Cell::new(0),
        }
    }

    pub fn inner(&self) -> &P {
        self.inner
    }

    /// Number of evaluations that contained at least one non-finite residual.
    pub fn guarded_evaluations(&self) -> usize {
        self.guarded.get()
    }
}

impl<P: Problem + ?Sized> Problem for GuardedProblem<'_, P> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let mut residuals = self.inner.eval(params)?;
        let mut replaced = false;
        for r in residuals.iter_mut() {
            if !r.is_finite() {
                *r = self.penalty;
                replaced = true;
            }
        }
        if replaced {
            self.guarded.set(self.guarded.get() + 1);
        }
        Ok(residuals)
    }

    fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    fn residual_count(&self) -> usize {
        self.inner.residual_count()
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        let mut jac = if self.inner.has_custom_jacobian() {
            self.inner.jacobian(params)?
        } else {
            crate::utils::finite_difference::jacobian(self, params, None)?
        };
        jac.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
        Ok(jac)
    }

    fn has_custom_jacobian(&self) -> bool {
        true
    }
}
