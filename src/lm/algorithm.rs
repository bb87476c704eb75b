//! Implementation of the Levenberg-Marquardt algorithm.
//!
//! Marquardt's variant: the normal matrix is damped in proportion to its own
//! diagonal, so the step is invariant to the scale of each parameter.

use std::fmt;

use log::debug;
use ndarray::{Array1, Array2};

use crate::error::{GlobFitError, Result};
use crate::problem::Problem;

use super::config::LmConfig;
use super::convergence::{max_norm, ConvergenceStatus};
use super::step::LmStep;
use super::trust_region::TrustRegion;

/// Result of a least-squares solver run.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Final parameter values
    pub params: Array1<f64>,

    /// Residuals at the final parameters
    pub residuals: Array1<f64>,

    /// Jacobian at the final parameters
    pub jacobian: Array2<f64>,

    /// Sum of squared residuals
    pub cost: f64,

    /// Number of iterations performed
    pub iterations: usize,

    /// Number of residual evaluations
    pub func_evals: usize,

    /// Number of Jacobian evaluations
    pub jac_evals: usize,

    /// Why the solver stopped
    pub status: ConvergenceStatus,
}

impl LmResult {
    pub fn success(&self) -> bool {
        self.status.is_converged()
    }

    pub fn message(&self) -> &'static str {
        self.status.description()
    }
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success())?;
        writeln!(f, "  Message: {}", self.message())?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

pub(crate) fn sum_squares(residuals: &Array1<f64>) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

pub(crate) fn check_dimensions<P: Problem + ?Sized>(
    problem: &P,
    initial_params: &Array1<f64>,
) -> Result<()> {
    let n_params = problem.parameter_count();
    if initial_params.len() != n_params {
        return Err(GlobFitError::DimensionMismatch(format!(
            "Expected {} parameters, got {}",
            n_params,
            initial_params.len()
        )));
    }
    Ok(())
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: LmConfig,
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.config.ftol = ftol;
        self
    }

    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.config.xtol = xtol;
        self
    }

    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.config.gtol = gtol;
        self
    }

    /// Minimize the sum of squared residuals for the given problem.
    ///
    /// Errors are returned only for malformed input or failing residual
    /// evaluations; a run that stops without converging is reported through
    /// [`LmResult::status`].
    pub fn minimize<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
    ) -> Result<LmResult> {
        check_dimensions(problem, &initial_params)?;

        let criteria = self.config.criteria();
        let mut trust_region = TrustRegion::from_config(&self.config);

        let mut params = initial_params;
        let mut residuals = problem.eval(&params)?;
        let mut cost = sum_squares(&residuals);
        let mut jacobian = problem.jacobian(&params)?;
        let mut func_evals = 1;
        let mut jac_evals = 1;
        let mut iterations = 0;

        let mut status = if cost.is_finite() {
            ConvergenceStatus::Running
        } else {
            ConvergenceStatus::NumericalError
        };

        while !status.is_terminated() {
            let jtj = jacobian.t().dot(&jacobian);
            let jtr = jacobian.t().dot(&residuals);

            if criteria.gradient_is_small(max_norm(&jtr)) {
                status = ConvergenceStatus::GradientConvergence;
                break;
            }
            if iterations >= criteria.max_iterations {
                status = ConvergenceStatus::MaxIterationsReached;
                break;
            }
            iterations += 1;

            let step = match LmStep::calculate_step(&jtj, &jtr, trust_region.lambda) {
                Ok(step) => step,
                Err(err) => {
                    debug!("lm: step failed at lambda {:.3e}: {}", trust_region.lambda, err);
                    if trust_region.at_maximum() {
                        status = ConvergenceStatus::DampingLimitReached;
                    }
                    trust_region.increase();
                    continue;
                }
            };

            let new_params = &params + &step.step;
            let new_residuals = problem.eval(&new_params)?;
            func_evals += 1;
            let new_cost = sum_squares(&new_residuals);
            let rho = TrustRegion::gain_ratio(cost, new_cost, step.predicted_reduction);

            debug!(
                "lm: iteration {} cost {:.6e} -> {:.6e} lambda {:.3e} rho {:.3}",
                iterations, cost, new_cost, step.lambda, rho
            );

            if trust_region.update_lambda(rho) {
                status = criteria.check(&params, &new_params, cost, new_cost, iterations);
                params = new_params;
                residuals = new_residuals;
                cost = new_cost;
                jacobian = problem.jacobian(&params)?;
                jac_evals += 1;
            } else if criteria.step_is_small(&params, &step.step) {
                status = ConvergenceStatus::ParameterConvergence;
            } else if trust_region.at_maximum() {
                status = ConvergenceStatus::DampingLimitReached;
            }
        }

        Ok(LmResult {
            params,
            residuals,
            jacobian,
            cost,
            iterations,
            func_evals,
            jac_evals,
            status,
        })
    }
}
