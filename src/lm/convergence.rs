//! Convergence criteria for the least-squares solvers.

use std::fmt;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Possible convergence states for a solver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    /// The algorithm is still running.
    Running,

    /// The algorithm has converged due to a small parameter change.
    ParameterConvergence,

    /// The algorithm has converged due to a small function value change.
    FunctionValueConvergence,

    /// The algorithm has converged due to a small gradient.
    GradientConvergence,

    /// The algorithm has terminated due to reaching the maximum number of iterations.
    MaxIterationsReached,

    /// No step reduced the cost before the damping parameter hit its ceiling.
    DampingLimitReached,

    /// The algorithm has terminated due to a numerical error.
    NumericalError,
}

impl ConvergenceStatus {
    /// Returns true if the optimization has terminated (either converged or failed).
    pub fn is_terminated(&self) -> bool {
        !matches!(self, ConvergenceStatus::Running)
    }

    /// Returns true if the optimization has converged.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            ConvergenceStatus::ParameterConvergence
                | ConvergenceStatus::FunctionValueConvergence
                | ConvergenceStatus::GradientConvergence
        )
    }

    /// Returns a description of the convergence status.
    pub fn description(&self) -> &'static str {
        match self {
            ConvergenceStatus::Running => "Optimization is still running",
            ConvergenceStatus::ParameterConvergence => "Converged: small parameter change",
            ConvergenceStatus::FunctionValueConvergence => "Converged: small function value change",
            ConvergenceStatus::GradientConvergence => "Converged: small gradient",
            ConvergenceStatus::MaxIterationsReached => "Terminated: maximum iterations reached",
            ConvergenceStatus::DampingLimitReached => {
                "Terminated: damping parameter reached its maximum without reducing the cost"
            }
            ConvergenceStatus::NumericalError => "Terminated: numerical error",
        }
    }
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Criteria for determining when a solver has converged.
#[derive(Debug, Clone)]
pub struct ConvergenceCriteria {
    /// Tolerance for change in parameter values.
    pub xtol: f64,

    /// Tolerance for change in function value.
    pub ftol: f64,

    /// Tolerance for gradient norm.
    pub gtol: f64,

    /// Maximum number of iterations.
    pub max_iterations: usize,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            xtol: 1e-10,
            ftol: 1e-10,
            gtol: 1e-10,
            max_iterations: 200,
        }
    }
}

impl ConvergenceCriteria {
    pub fn new(xtol: f64, ftol: f64, gtol: f64, max_iterations: usize) -> Self {
        Self {
            xtol,
            ftol,
            gtol,
            max_iterations,
        }
    }

    /// Largest parameter change relative to the parameter magnitude (floored at 1).
    pub fn relative_step(params: &Array1<f64>, step: &Array1<f64>) -> f64 {
        step.iter()
            .zip(params.iter())
            .map(|(s, p)| s.abs() / p.abs().max(1.0))
            .fold(0.0, f64::max)
    }

    /// Whether a step is too small to change the parameters meaningfully.
    pub fn step_is_small(&self, params: &Array1<f64>, step: &Array1<f64>) -> bool {
        Self::relative_step(params, step) < self.xtol
    }

    /// Whether the scaled gradient is small enough to stop.
    pub fn gradient_is_small(&self, gradient_norm: f64) -> bool {
        gradient_norm < self.gtol
    }

    /// Checks an accepted step going from `params` / `cost` to `new_params` / `new_cost`.
    pub fn check(
        &self,
        params: &Array1<f64>,
        new_params: &Array1<f64>,
        cost: f64,
        new_cost: f64,
        iterations: usize,
    ) -> ConvergenceStatus {
        let step = new_params - params;
        if self.step_is_small(params, &step) {
            return ConvergenceStatus::ParameterConvergence;
        }

        if (cost - new_cost).abs() <= self.ftol * cost {
            return ConvergenceStatus::FunctionValueConvergence;
        }

        if iterations >= self.max_iterations {
            return ConvergenceStatus::MaxIterationsReached;
        }

        ConvergenceStatus::Running
    }
}

/// Infinity norm of a vector.
pub fn max_norm(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0, |acc: f64, x| acc.max(x.abs()))
}
