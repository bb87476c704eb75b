//! Direct searches over the sum of squared residuals.
//!
//! Unlike the least-squares fit these never estimate errors, and they can be
//! interrupted: every objective evaluation first checks a [`CancelToken`], and
//! an interrupted search still returns (and writes back) the best vector seen.
//!
//! - [`Minimizer`]: Nelder-Mead (default), Powell, conjugate gradient or BFGS.
//!   Nelder-Mead and Powell keep every trial point inside the bounds; the
//!   gradient methods ignore bounds and say so with a notice.
//! - [`RandomSearch`]: cycles of random perturbations around the best point,
//!   accepting strict improvements only.

mod bfgs;
mod cg;
mod line_search;
mod minimizer;
mod nelder_mead;
mod powell;
mod random_search;

pub use minimizer::{MinimizeConfig, MinimizeMethod, Minimizer};
pub use random_search::{RandomSearch, RandomSearchConfig};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, GlobFitError, Result};
use crate::fit::Notice;
use crate::problem::Problem;
use crate::residuals::{ResidualAssembler, ResidualFunction, ResidualMode};
use crate::spec::GlobalFitSpec;

/// Cooperative cancellation flag, cheap to clone and share across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every search holding this token to stop at its next evaluation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Why a search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchTermination {
    /// Tolerances met
    Converged,
    /// No further decrease could be found along the search direction
    NoProgress,
    /// Iteration limit reached
    MaxIterations,
    /// Evaluation budget exhausted
    MaxEvaluations,
    /// All random-search cycles ran
    CyclesCompleted,
    /// Stopped through the cancel token
    Cancelled,
}

impl fmt::Display for SearchTermination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SearchTermination::Converged => "converged",
            SearchTermination::NoProgress => "no further progress",
            SearchTermination::MaxIterations => "maximum iterations reached",
            SearchTermination::MaxEvaluations => "maximum evaluations reached",
            SearchTermination::CyclesCompleted => "all cycles completed",
            SearchTermination::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Result of a direct search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Best vector found
    pub params: Array1<f64>,
    /// Slot names behind `params`; empty for problem-level searches
    pub names: Vec<String>,
    /// Objective at `params`
    pub cost: f64,
    /// Objective at the starting vector
    pub initial_cost: f64,
    pub evaluations: usize,
    pub iterations: usize,
    pub termination: SearchTermination,
    pub notices: Vec<Notice>,
}

impl SearchOutcome {
    /// Whether the best vector strictly improves on the start.
    pub fn improved(&self) -> bool {
        self.cost < self.initial_cost
    }

    pub fn was_cancelled(&self) -> bool {
        self.termination == SearchTermination::Cancelled
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.params[idx])
    }
}

/// Why an objective evaluation did not produce a value.
pub(crate) enum Interrupt {
    Cancelled,
    Budget,
    Failed(GlobFitError),
}

impl From<GlobFitError> for Interrupt {
    fn from(err: GlobFitError) -> Self {
        Interrupt::Failed(err)
    }
}

/// Sum of squared residuals with evaluation counting, cancellation, an
/// evaluation budget and best-point tracking.
///
/// A non-finite cost is reported as `+inf` so that searches simply move away
/// from invalid regions.
pub(crate) struct Objective<'a, P: Problem + ?Sized> {
    problem: &'a P,
    cancel: &'a CancelToken,
    bounds: Option<(Array1<f64>, Array1<f64>)>,
    max_evaluations: usize,
    evaluations: usize,
    best: Option<(Array1<f64>, f64)>,
    first_cost: Option<f64>,
}

impl<'a, P: Problem + ?Sized> Objective<'a, P> {
    pub(crate) fn new(
        problem: &'a P,
        cancel: &'a CancelToken,
        bounds: Option<(Array1<f64>, Array1<f64>)>,
        max_evaluations: usize,
    ) -> Self {
        Self {
            problem,
            cancel,
            bounds,
            max_evaluations,
            evaluations: 0,
            best: None,
            first_cost: None,
        }
    }

    pub(crate) fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Clamp into the bounds, if this objective has any.
    pub(crate) fn project(&self, x: &Array1<f64>) -> Array1<f64> {
        match &self.bounds {
            Some((lower, upper)) => Array1::from_shape_fn(x.len(), |i| {
                let mut v = x[i];
                if v < lower[i] {
                    v = lower[i];
                }
                if v > upper[i] {
                    v = upper[i];
                }
                v
            }),
            None => x.clone(),
        }
    }

    /// Range of `t` keeping `x + t·d` inside the bounds.
    pub(crate) fn step_range(&self, x: &Array1<f64>, d: &Array1<f64>) -> (f64, f64) {
        let Some((lower, upper)) = &self.bounds else {
            return (f64::NEG_INFINITY, f64::INFINITY);
        };
        let mut lo = f64::NEG_INFINITY;
        let mut hi = f64::INFINITY;
        for i in 0..x.len() {
            if d[i] > 0.0 {
                hi = hi.min((upper[i] - x[i]) / d[i]);
                lo = lo.max((lower[i] - x[i]) / d[i]);
            } else if d[i] < 0.0 {
                hi = hi.min((lower[i] - x[i]) / d[i]);
                lo = lo.max((upper[i] - x[i]) / d[i]);
            }
        }
        (lo.min(0.0), hi.max(0.0))
    }

    pub(crate) fn eval(&mut self, x: &Array1<f64>) -> std::result::Result<f64, Interrupt> {
        if self.cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        if self.evaluations >= self.max_evaluations {
            return Err(Interrupt::Budget);
        }
        self.evaluations += 1;

        let cost = self.problem.eval_cost(x)?;
        let cost = if cost.is_finite() { cost } else { f64::INFINITY };

        if self.first_cost.is_none() {
            self.first_cost = Some(cost);
        }
        let better = match &self.best {
            Some((_, best)) => cost < *best,
            None => true,
        };
        if better {
            self.best = Some((x.clone(), cost));
        }
        Ok(cost)
    }

    /// Turn the final state into an outcome; only evaluation failures are errors.
    pub(crate) fn finish(
        self,
        initial: Array1<f64>,
        iterations: usize,
        result: std::result::Result<SearchTermination, Interrupt>,
        notices: Vec<Notice>,
    ) -> Result<SearchOutcome> {
        let termination = match result {
            Ok(termination) => termination,
            Err(Interrupt::Cancelled) => SearchTermination::Cancelled,
            Err(Interrupt::Budget) => SearchTermination::MaxEvaluations,
            Err(Interrupt::Failed(err)) => return Err(err),
        };
        let evaluations = self.evaluations();
        let initial_cost = self.first_cost.unwrap_or(f64::INFINITY);
        let (params, cost) = self.best.unwrap_or((initial, initial_cost));
        Ok(SearchOutcome {
            params,
            names: Vec::new(),
            cost,
            initial_cost,
            evaluations,
            iterations,
            termination,
            notices,
        })
    }
}

/// Bound arrays when at least one is finite.
pub(crate) fn finite_bounds(
    bounds: Option<(&Array1<f64>, &Array1<f64>)>,
) -> Option<(Array1<f64>, Array1<f64>)> {
    bounds
        .filter(|(lower, upper)| {
            lower.iter().any(|v| v.is_finite()) || upper.iter().any(|v| v.is_finite())
        })
        .map(|(lower, upper)| (lower.clone(), upper.clone()))
}

/// Ordinary residuals of the active pairs, for the direct searches.
///
/// Direct searches always minimize vertical residuals; x-errors play no role.
pub(crate) fn spec_residuals(spec: &GlobalFitSpec<'_>) -> Result<(ResidualFunction, Vec<Notice>)> {
    let (merged, notices) = spec.merge()?;
    if merged.is_empty() {
        return Err(ConfigurationError::NoFreeParameters.into());
    }
    let residuals = ResidualAssembler::build_with(spec, merged, ResidualMode::Ordinary)?;
    Ok((residuals, notices))
}

/// Write the best vector back when it improves on the start.
pub(crate) fn write_back(
    spec: &mut GlobalFitSpec<'_>,
    residuals: &ResidualFunction,
    outcome: &mut SearchOutcome,
    what: &str,
) {
    outcome.names = residuals.merged().layout();
    if outcome.improved() {
        let mut curves = spec.active_curves_mut();
        residuals
            .merged()
            .apply(outcome.params.as_slice().unwrap_or(&[]), &mut curves);
    }
    info!(
        "{} {} after {} evaluation(s): cost {:.6e} -> {:.6e}",
        what, outcome.termination, outcome.evaluations, outcome.initial_cost, outcome.cost
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    struct Shifted;

    impl Problem for Shifted {
        fn eval(&self, p: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(array![p[0] - 1.0, p[1].sqrt()])
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            2
        }
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }

    #[test]
    fn test_objective_tracks_best_and_budget() {
        let cancel = CancelToken::new();
        let mut obj = Objective::new(&Shifted, &cancel, None, 3);

        assert_eq!(obj.eval(&array![3.0, 0.0]).ok(), Some(4.0));
        assert_eq!(obj.eval(&array![2.0, 0.0]).ok(), Some(1.0));
        // sqrt of a negative number costs +inf rather than NaN
        assert_eq!(obj.eval(&array![1.0, -1.0]).ok(), Some(f64::INFINITY));
        assert!(matches!(obj.eval(&array![1.0, 0.0]), Err(Interrupt::Budget)));
        assert_eq!(obj.evaluations(), 3);

        let outcome = obj
            .finish(array![3.0, 0.0], 0, Ok(SearchTermination::Converged), Vec::new())
            .unwrap();
        assert_eq!(outcome.params, array![2.0, 0.0]);
        assert_eq!(outcome.cost, 1.0);
        assert_eq!(outcome.initial_cost, 4.0);
        assert_eq!(outcome.evaluations, 3);
        assert!(outcome.improved());
    }

    #[test]
    fn test_objective_observes_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut obj = Objective::new(&Shifted, &cancel, None, 10);
        assert!(matches!(obj.eval(&array![0.0, 0.0]), Err(Interrupt::Cancelled)));
        let outcome = obj
            .finish(array![0.0, 0.0], 0, Err(Interrupt::Cancelled), Vec::new())
            .unwrap();
        assert_eq!(outcome.termination, SearchTermination::Cancelled);
        assert_eq!(outcome.evaluations, 0);
        assert!(!outcome.improved());
    }

    #[test]
    fn test_projection_and_step_range() {
        let cancel = CancelToken::new();
        let bounds = Some((array![0.0, f64::NEG_INFINITY], array![1.0, 2.0]));
        let obj = Objective::new(&Shifted, &cancel, bounds, 10);

        assert_eq!(obj.project(&array![-1.0, 5.0]), array![0.0, 2.0]);
        let (lo, hi) = obj.step_range(&array![0.5, 0.0], &array![1.0, 0.0]);
        assert_eq!((lo, hi), (-0.5, 0.5));
        let (lo, hi) = obj.step_range(&array![0.5, 0.0], &array![0.0, -1.0]);
        assert_eq!(lo, -2.0);
        assert_eq!(hi, f64::INFINITY);
    }
}
