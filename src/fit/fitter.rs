//! The least-squares fit orchestrator.
//!
//! A fit merges the parameters of the active curves, assembles the residuals,
//! picks a backend, runs it behind the NaN guard, estimates errors and, only on
//! convergence, writes the results back into the curves.
//!
//! Configuration problems come back as `Err` and leave everything untouched.
//! Solver trouble (no convergence, singular Jacobian, too few points) comes
//! back as an `Ok` outcome in the `Failed` state, also without write-back.
//!
//! The call is blocking and cannot be cancelled; the direct searches in
//! [`crate::search`] are the cancellable alternative.

use log::{info, warn};
use ndarray::Array1;

use crate::error::{ConfigurationError, GlobFitError, Result};
use crate::lm::{LevenbergMarquardt, LmResult, TrustRegionReflective};
use crate::problem::GuardedProblem;
use crate::residuals::{ResidualAssembler, ResidualFunction, ResidualMode};
use crate::spec::GlobalFitSpec;
use crate::uncertainty::{sigma_intervals, ErrorEstimate, UncertaintyCalculator};

use super::config::FitConfig;
use super::outcome::{FitMethod, FitOutcome, FitState, FittedParameter, Notice, Stage};

/// Runs least-squares fits over a [`GlobalFitSpec`].
#[derive(Debug, Clone)]
pub struct Fitter {
    config: FitConfig,
    state: FitState,
}

impl Default for Fitter {
    fn default() -> Self {
        Self::new(FitConfig::default())
    }
}

impl Fitter {
    pub fn new(config: FitConfig) -> Self {
        Self {
            config,
            state: FitState::Idle,
        }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// State after the most recent call to [`fit`](Self::fit).
    pub fn state(&self) -> &FitState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = FitState::Idle;
    }

    /// Fit the active pairs of `spec`.
    pub fn fit(&mut self, spec: &mut GlobalFitSpec<'_>) -> Result<FitOutcome> {
        self.state = FitState::Idle;

        let (merged, mut notices) = spec.merge()?;
        if merged.is_empty() {
            return Err(ConfigurationError::NoFreeParameters.into());
        }

        let method = FitMethod::select(spec.has_x_errors(), merged.has_finite_bounds());
        if method == FitMethod::OrthogonalDistance {
            let notice = Notice::OdrIgnoresBounds {
                parameters: merged.bounded_names(),
            };
            warn!("{}", notice);
            notices.push(notice);
        }
        let mode = match method {
            FitMethod::OrthogonalDistance => ResidualMode::Orthogonal,
            _ => ResidualMode::Ordinary,
        };

        let residuals = ResidualAssembler::build_with(spec, merged, mode)?;
        let initial = residuals.initial_vector();
        record_invalid_values(&residuals, &initial, Stage::Initial, &mut notices);

        self.state = FitState::Running;
        info!(
            "fitting {} point(s) with {} free parameter(s) using {}",
            residuals.n_points(),
            residuals.n_beta(),
            method
        );

        if residuals.n_points() < residuals.n_beta() {
            let reason = format!(
                "fewer data points ({}) than free parameters ({})",
                residuals.n_points(),
                residuals.n_beta()
            );
            return Ok(self.fail(reason, method, &residuals, &initial, None, notices));
        }

        let solved = self.solve(method, &residuals, initial.clone());
        let result = match solved {
            Ok(result) => result,
            Err(err) => {
                return Ok(self.fail(err.to_string(), method, &residuals, &initial, None, notices));
            }
        };
        let invalid = record_invalid_values(&residuals, &result.params, Stage::Final, &mut notices);
        if invalid == residuals.n_points() {
            let reason = "model produced invalid values at every data point".to_string();
            return Ok(self.fail(reason, method, &residuals, &result.params, Some(&result), notices));
        }

        if !result.success() {
            let reason = result.message().to_string();
            return Ok(self.fail(reason, method, &residuals, &result.params, Some(&result), notices));
        }

        let calculator =
            UncertaintyCalculator::new(residuals.n_points(), residuals.n_beta(), result.cost);
        let estimate = match calculator.estimate(&result.jacobian, residuals.has_y_errors()) {
            Ok(estimate) => estimate,
            Err(GlobFitError::SingularMatrix) => {
                let reason = "singular Jacobian at the solution".to_string();
                return Ok(self.fail(reason, method, &residuals, &result.params, Some(&result), notices));
            }
            Err(err) => {
                return Ok(self.fail(err.to_string(), method, &residuals, &result.params, Some(&result), notices));
            }
        };
        if estimate.dof.is_none() {
            let notice = Notice::ErrorsUndefined {
                reason: format!(
                    "no degrees of freedom ({} point(s), {} free parameter(s))",
                    residuals.n_points(),
                    residuals.n_beta()
                ),
            };
            warn!("{}", notice);
            notices.push(notice);
        }

        let beta = residuals.beta(&result.params).to_vec();
        let merged = residuals.merged();
        {
            let mut curves = spec.active_curves_mut();
            merged.apply(&beta, &mut curves);
            merged.apply_errors(&estimate.posteriori, &estimate.priori, &mut curves);
        }

        let parameters = merged
            .slots()
            .iter()
            .zip(&beta)
            .enumerate()
            .map(|(i, (slot, &value))| {
                let posteriori = estimate.posteriori[i];
                let priori = estimate.priori[i];
                let interval_error = priori.or(posteriori);
                FittedParameter {
                    name: slot.name.clone(),
                    value,
                    error_posteriori: posteriori,
                    error_priori: priori,
                    shared: slot.is_shared(),
                    intervals: sigma_intervals(value, interval_error, &self.config.sigma_levels),
                }
            })
            .collect();

        self.state = FitState::Converged;
        info!(
            "fit converged after {} iteration(s): chi-square {:.6e} ({})",
            result.iterations,
            result.cost,
            result.message()
        );

        Ok(self.outcome(method, parameters, &residuals, &result, Some(estimate), notices))
    }

    fn solve(&self, method: FitMethod, residuals: &ResidualFunction, initial: Array1<f64>) -> Result<LmResult> {
        let guarded = GuardedProblem::with_penalty(residuals, self.config.penalty);
        let result = match method {
            FitMethod::LevenbergMarquardt | FitMethod::OrthogonalDistance => {
                LevenbergMarquardt::with_config(self.config.solver.clone()).minimize(&guarded, initial)
            }
            FitMethod::TrustRegionReflective => {
                let merged = residuals.merged();
                TrustRegionReflective::new(merged.lower(), merged.upper())?
                    .with_config(self.config.solver.clone())
                    .minimize(&guarded, initial)
            }
        }?;
        if guarded.guarded_evaluations() > 0 {
            warn!(
                "{} residual evaluation(s) produced NaN or infinite values",
                guarded.guarded_evaluations()
            );
        }
        Ok(result)
    }

    fn fail(
        &mut self,
        reason: String,
        method: FitMethod,
        residuals: &ResidualFunction,
        params: &Array1<f64>,
        result: Option<&LmResult>,
        notices: Vec<Notice>,
    ) -> FitOutcome {
        warn!("fit failed: {}", reason);
        self.state = FitState::Failed { reason };

        let beta = residuals.beta(params);
        let parameters = residuals
            .merged()
            .slots()
            .iter()
            .zip(beta.iter())
            .map(|(slot, &value)| FittedParameter {
                name: slot.name.clone(),
                value,
                error_posteriori: None,
                error_priori: None,
                shared: slot.is_shared(),
                intervals: Vec::new(),
            })
            .collect();

        match result {
            Some(result) => self.outcome(method, parameters, residuals, result, None, notices),
            None => FitOutcome {
                state: self.state.clone(),
                method,
                parameters,
                chi_square: f64::NAN,
                reduced_chi_square: None,
                dof: None,
                n_points: residuals.n_points(),
                n_free: residuals.n_beta(),
                covariance: None,
                correlation: None,
                iterations: 0,
                evaluations: 0,
                jacobian_evaluations: 0,
                convergence: None,
                notices,
            },
        }
    }

    fn outcome(
        &self,
        method: FitMethod,
        parameters: Vec<FittedParameter>,
        residuals: &ResidualFunction,
        result: &LmResult,
        estimate: Option<ErrorEstimate>,
        notices: Vec<Notice>,
    ) -> FitOutcome {
        let n_points = residuals.n_points();
        let n_free = residuals.n_beta();
        let dof = n_points.checked_sub(n_free).filter(|&d| d > 0);
        let (covariance, correlation) = match estimate {
            Some(e) => (Some(e.covariance), Some(e.correlation)),
            None => (None, None),
        };
        FitOutcome {
            state: self.state.clone(),
            method,
            parameters,
            chi_square: result.cost,
            reduced_chi_square: dof.map(|d| result.cost / d as f64),
            dof,
            n_points,
            n_free,
            covariance,
            correlation,
            iterations: result.iterations,
            evaluations: result.func_evals,
            jacobian_evaluations: result.jac_evals,
            convergence: Some(result.status),
            notices,
        }
    }
}

fn record_invalid_values(
    residuals: &ResidualFunction,
    params: &Array1<f64>,
    stage: Stage,
    notices: &mut Vec<Notice>,
) -> usize {
    let mut total = 0;
    for (curve, count) in residuals.invalid_counts(params) {
        if count > 0 {
            total += count;
            let notice = Notice::InvalidModelValues { curve, count, stage };
            warn!("{}", notice);
            notices.push(notice);
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::Curve;
    use crate::dataset::DataSet;
    use crate::parameters::ParameterSet;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn constant_curve() -> Curve {
        let mut params = ParameterSet::new();
        params.add_param("SN", 1.0).unwrap();
        params.add_fixed("slopeN", 0.0).unwrap();
        Curve::new("norm", "y = SN + slopeN * x", params).unwrap()
    }

    #[test]
    fn test_fixed_parameter_stays_put() {
        let data = DataSet::new("d", array![0.0, 1.0, 2.0], array![1.1, 0.9, 1.05]).unwrap();
        let mut curve = constant_curve();

        let mut fitter = Fitter::default();
        let outcome = {
            let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
            fitter.fit(&mut spec).unwrap()
        };

        assert!(outcome.is_converged(), "{}", outcome);
        assert_eq!(outcome.method, FitMethod::LevenbergMarquardt);
        assert_eq!(outcome.n_free, 1);
        assert_eq!(outcome.dof, Some(2));

        let sn = curve.parameters().get("SN").unwrap();
        assert!(sn.value() >= 0.9 && sn.value() <= 1.1);
        assert_relative_eq!(sn.value(), (1.1 + 0.9 + 1.05) / 3.0, epsilon = 1e-8);
        assert!(sn.error_posteriori().is_some());
        assert!(sn.error_priori().is_none());
        assert_eq!(curve.parameters().get("slopeN").unwrap().value(), 0.0);
        assert!(fitter.state().is_converged());
    }

    #[test]
    fn test_no_free_parameters_is_configuration_error() {
        let data = DataSet::new("d", array![0.0, 1.0], array![1.0, 1.0]).unwrap();
        let mut params = ParameterSet::new();
        params.add_fixed("c", 1.0).unwrap();
        let mut curve = Curve::new("c", "y = c", params).unwrap();

        let mut fitter = Fitter::default();
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        let err = fitter.fit(&mut spec).unwrap_err();
        assert!(matches!(
            err,
            GlobFitError::Configuration(ConfigurationError::NoFreeParameters)
        ));
        assert_eq!(fitter.state(), &FitState::Idle);
    }

    #[test]
    fn test_too_few_points_fails_without_write_back() {
        let data = DataSet::new("d", array![1.0], array![3.0]).unwrap();
        let mut curve = Curve::from_formula("line", "y = a * x + b").unwrap();

        let mut fitter = Fitter::default();
        let outcome = {
            let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
            fitter.fit(&mut spec).unwrap()
        };

        assert!(outcome.state.is_failed());
        assert!(outcome.state.failure_reason().unwrap().contains("fewer data points"));
        assert_eq!(curve.parameters().get("a").unwrap().value(), 1.0);
        assert_eq!(curve.parameters().get("b").unwrap().value(), 1.0);
    }

    #[test]
    fn test_singular_jacobian_fails() {
        // b and c only ever appear as a sum
        let data = DataSet::new("d", array![0.0, 1.0, 2.0, 3.0], array![1.0, 3.0, 5.0, 7.0]).unwrap();
        let mut curve = Curve::from_formula("line", "y = a * x + b + c").unwrap();

        let mut fitter = Fitter::default();
        let outcome = {
            let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
            fitter.fit(&mut spec).unwrap()
        };

        assert!(outcome.state.is_failed(), "{}", outcome);
        assert_eq!(curve.parameters().get("a").unwrap().value(), 1.0);
    }

    #[test]
    fn test_invalid_everywhere_is_reported_as_such() {
        let data = DataSet::new("d", array![1.0, 2.0, 3.0, 4.0], array![1.0, 1.4, 1.7, 2.0]).unwrap();
        let mut params = ParameterSet::new();
        params.add_param("a", -1.0).unwrap();
        let mut curve = Curve::new("root", "y = sqrt(a * x)", params).unwrap();

        let mut fitter = Fitter::default();
        let outcome = {
            let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
            fitter.fit(&mut spec).unwrap()
        };

        assert_eq!(
            outcome.state.failure_reason(),
            Some("model produced invalid values at every data point")
        );
        assert_eq!(curve.parameters().get("a").unwrap().value(), -1.0);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let data = DataSet::new("d", array![-1.0, 1.0, 4.0, 9.0], array![0.0, 2.0, 4.0, 6.0]).unwrap();
        let mut curve = Curve::from_formula("root", "y = a * sqrt(x)").unwrap();

        let mut fitter = Fitter::default();
        let outcome = {
            let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
            fitter.fit(&mut spec).unwrap()
        };

        assert!(outcome.notices.contains(&Notice::InvalidModelValues {
            curve: "root".into(),
            count: 1,
            stage: Stage::Initial,
        }));
        assert!(outcome.notices.contains(&Notice::InvalidModelValues {
            curve: "root".into(),
            count: 1,
            stage: Stage::Final,
        }));
    }
}
