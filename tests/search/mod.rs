// Tests for direct minimization and random search

use std::cell::Cell;

use approx::assert_relative_eq;
use globfit_rs::parameters::ParameterSet;
use globfit_rs::search::SearchTermination;
use globfit_rs::{
    CancelToken, Curve, DataSet, GlobalFitSpec, MinimizeConfig, MinimizeMethod, Minimizer, Notice,
    Problem, RandomSearch, RandomSearchConfig, Result,
};
use ndarray::{array, Array1};

use crate::test_helpers::{exponential_data, value};

/// Sphere around (1, 2) that trips the cancel token after `limit` evaluations.
struct CancelAfter {
    token: CancelToken,
    limit: usize,
    calls: Cell<usize>,
}

impl Problem for CancelAfter {
    fn eval(&self, p: &Array1<f64>) -> Result<Array1<f64>> {
        self.calls.set(self.calls.get() + 1);
        if self.calls.get() >= self.limit {
            self.token.cancel();
        }
        Ok(array![p[0] - 1.0, p[1] - 2.0])
    }

    fn parameter_count(&self) -> usize {
        2
    }

    fn residual_count(&self) -> usize {
        2
    }
}

fn bounded_slope_curve(max: f64) -> Curve {
    let mut params = ParameterSet::new();
    params.add_param_with_bounds("a", 1.0, 0.0, max).unwrap();
    Curve::new("prop", "y = a * x", params).unwrap()
}

fn slope_two() -> DataSet {
    DataSet::new("slope2", array![1.0, 2.0, 3.0, 4.0], array![2.0, 4.0, 6.0, 8.0]).unwrap()
}

#[test]
fn test_nelder_mead_writes_back_and_clears_errors() {
    let data = exponential_data("d", 2.0, 2.0, 8);
    let mut curve = Curve::from_formula("exp", "y = A * exp(-x / tau)").unwrap();
    curve
        .parameters_mut()
        .get_mut("A")
        .unwrap()
        .set_errors(Some(0.3), Some(0.2));

    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        Minimizer::new(MinimizeConfig::new().with_max_evaluations(2000))
            .run(&mut spec, &CancelToken::new())
            .unwrap()
    };

    assert!(outcome.improved());
    assert_eq!(outcome.names, vec!["A", "tau"]);
    assert_relative_eq!(value(&curve, "A"), 2.0, epsilon = 1e-3);
    assert_relative_eq!(value(&curve, "tau"), 2.0, epsilon = 1e-3);
    assert_eq!(outcome.value("tau"), Some(value(&curve, "tau")));

    let a = curve.parameters().get("A").unwrap();
    assert_eq!(a.error_posteriori(), None);
    assert_eq!(a.error_priori(), None);
}

#[test]
fn test_powell_respects_bounds() {
    let data = slope_two();
    let mut curve = bounded_slope_curve(1.5);

    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        Minimizer::with_method(MinimizeMethod::Powell)
            .run(&mut spec, &CancelToken::new())
            .unwrap()
    };

    assert!(outcome.notices.is_empty());
    assert!(value(&curve, "a") <= 1.5);
    assert_relative_eq!(value(&curve, "a"), 1.5, epsilon = 1e-6);
}

#[test]
fn test_gradient_methods_report_ignored_bounds() {
    let data = slope_two();
    let mut curve = bounded_slope_curve(10.0);

    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        Minimizer::with_method(MinimizeMethod::Bfgs)
            .run(&mut spec, &CancelToken::new())
            .unwrap()
    };

    assert!(outcome.notices.contains(&Notice::BoundsIgnoredByMethod {
        method: "BFGS".to_string(),
        parameters: vec!["a".to_string()],
    }));
    assert_relative_eq!(value(&curve, "a"), 2.0, epsilon = 1e-4);
}

#[test]
fn test_conjugate_gradient_on_problem() {
    let problem = CancelAfter {
        token: CancelToken::new(),
        limit: usize::MAX,
        calls: Cell::new(0),
    };
    let config = MinimizeConfig::new().with_method(MinimizeMethod::ConjugateGradient);
    let outcome = Minimizer::new(config)
        .minimize(&problem, array![5.0, -3.0], None, &problem.token)
        .unwrap();

    assert_eq!(outcome.termination, SearchTermination::Converged);
    assert_relative_eq!(outcome.params[0], 1.0, epsilon = 1e-5);
    assert_relative_eq!(outcome.params[1], 2.0, epsilon = 1e-5);
}

#[test]
fn test_minimizer_cancellation_returns_best_so_far() {
    let problem = CancelAfter {
        token: CancelToken::new(),
        limit: 12,
        calls: Cell::new(0),
    };
    let outcome = Minimizer::default()
        .minimize(&problem, array![5.0, -3.0], None, &problem.token)
        .unwrap();

    assert!(outcome.was_cancelled());
    assert_eq!(outcome.evaluations, 12);
    assert!(outcome.cost <= outcome.initial_cost);
    let cost = (outcome.params[0] - 1.0).powi(2) + (outcome.params[1] - 2.0).powi(2);
    assert_relative_eq!(cost, outcome.cost, epsilon = 1e-12);
}

#[test]
fn test_random_search_cancellation() {
    let problem = CancelAfter {
        token: CancelToken::new(),
        limit: 25,
        calls: Cell::new(0),
    };
    let search = RandomSearch::new(RandomSearchConfig::new().with_seed(11));
    let outcome = search
        .search(&problem, array![0.0, 0.0], None, &problem.token)
        .unwrap();

    assert!(outcome.was_cancelled());
    assert_eq!(outcome.evaluations, 25);
    assert_eq!(outcome.iterations, 2);
    assert!(outcome.cost <= outcome.initial_cost);
}

#[test]
fn test_cancelled_before_start_changes_nothing() {
    let data = exponential_data("d", 2.0, 2.0, 8);
    let mut curve = Curve::from_formula("exp", "y = A * exp(-x / tau)").unwrap();
    let token = CancelToken::new();
    token.cancel();

    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        RandomSearch::default().run(&mut spec, &token).unwrap()
    };

    assert!(outcome.was_cancelled());
    assert_eq!(outcome.evaluations, 0);
    assert!(!outcome.improved());
    assert_eq!(value(&curve, "A"), 1.0);
    assert_eq!(value(&curve, "tau"), 1.0);
}

#[test]
fn test_random_search_zero_amplitude_is_a_no_op() {
    let data = exponential_data("d", 2.0, 2.0, 8);
    let mut curve = Curve::from_formula("exp", "y = A * exp(-x / tau)").unwrap();
    curve
        .parameters_mut()
        .get_mut("A")
        .unwrap()
        .set_errors(Some(0.3), None);

    let config = RandomSearchConfig::new()
        .with_amplitude(0.0)
        .with_escalate(1.0)
        .with_seed(5);
    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        RandomSearch::new(config)
            .run(&mut spec, &CancelToken::new())
            .unwrap()
    };

    assert_eq!(outcome.termination, SearchTermination::CyclesCompleted);
    assert_eq!(outcome.cost, outcome.initial_cost);
    assert_eq!(value(&curve, "A"), 1.0);
    // nothing written back, so the errors survive
    assert_eq!(curve.parameters().get("A").unwrap().error_posteriori(), Some(0.3));
}

#[test]
fn test_random_search_is_reproducible_with_seed() {
    let data = exponential_data("d", 2.0, 2.0, 8);
    let config = RandomSearchConfig::new().with_cycles(30).with_seed(2024);

    let mut first = Curve::from_formula("exp", "y = A * exp(-x / tau)").unwrap();
    let mut second = first.clone();
    for curve in [&mut first, &mut second] {
        let mut spec = GlobalFitSpec::new().with_pair(&data, curve);
        let outcome = RandomSearch::new(config.clone())
            .run(&mut spec, &CancelToken::new())
            .unwrap();
        assert!(outcome.improved());
    }

    assert_eq!(value(&first, "A"), value(&second, "A"));
    assert_eq!(value(&first, "tau"), value(&second, "tau"));
}
