// Tests for least-squares fitting over a GlobalFitSpec

use approx::assert_relative_eq;
use globfit_rs::parameters::ParameterSet;
use globfit_rs::{Curve, DataSet, FitConfig, FitMethod, Fitter, GlobalFitSpec, Notice};
use ndarray::array;

use crate::test_helpers::{exponential_data, noisy_line, value};

#[test]
fn test_weighted_line_a_priori_errors() {
    let data = noisy_line(2.0, 1.0)
        .with_y_errors(array![0.5, 0.5, 0.5, 0.5, 0.5])
        .unwrap();
    let mut curve = Curve::from_formula("line", "y = a * x + b").unwrap();

    let mut fitter = Fitter::default();
    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        fitter.fit(&mut spec).unwrap()
    };

    assert!(outcome.is_converged(), "{}", outcome);
    assert_eq!(outcome.method, FitMethod::LevenbergMarquardt);
    assert_eq!(outcome.dof, Some(3));

    // cov = inv(JᵀJ) with J = [x/σ, 1/σ]: var(a) = 0.025, var(b) = 0.15
    let a = curve.parameters().get("a").unwrap();
    let b = curve.parameters().get("b").unwrap();
    assert_relative_eq!(a.error_priori().unwrap(), 0.025f64.sqrt(), epsilon = 1e-6);
    assert_relative_eq!(b.error_priori().unwrap(), 0.15f64.sqrt(), epsilon = 1e-6);
    assert!(a.error_posteriori().is_some());

    // ordinary least squares on equal weights
    assert_relative_eq!(a.value(), 1.99, epsilon = 1e-6);
    assert_relative_eq!(b.value(), 1.04, epsilon = 1e-6);

    let fitted = outcome.parameter("a").unwrap();
    assert_eq!(fitted.intervals.len(), 2);
    assert_relative_eq!(fitted.intervals[0].upper - fitted.value, 0.025f64.sqrt(), epsilon = 1e-6);
}

#[test]
fn test_shared_parameter_across_datasets() {
    let d1 = exponential_data("d1", 3.0, 2.0, 8);
    let d2 = exponential_data("d2", 5.0, 2.0, 8);
    let mut c1 = Curve::from_formula("c1", "y = A * exp(-x / tau)").unwrap();
    let mut c2 = Curve::from_formula("c2", "y = B * exp(-x / tau)").unwrap();

    let mut fitter = Fitter::default();
    let outcome = {
        let mut spec = GlobalFitSpec::new()
            .with_pair(&d1, &mut c1)
            .with_pair(&d2, &mut c2);
        fitter.fit(&mut spec).unwrap()
    };

    assert!(outcome.is_converged(), "{}", outcome);
    assert_eq!(outcome.n_free, 3);
    assert_eq!(outcome.n_points, 16);
    assert!(outcome.parameter("tau").unwrap().shared);
    assert!(!outcome.parameter("A").unwrap().shared);

    assert_relative_eq!(value(&c1, "A"), 3.0, epsilon = 1e-6);
    assert_relative_eq!(value(&c2, "B"), 5.0, epsilon = 1e-6);
    assert_relative_eq!(value(&c1, "tau"), 2.0, epsilon = 1e-6);
    assert_eq!(value(&c1, "tau"), value(&c2, "tau"));
}

#[test]
fn test_fixed_parameter_in_one_curve_is_constant() {
    let d1 = exponential_data("d1", 3.0, 2.0, 6);
    let mut params = ParameterSet::new();
    params.add_param("A", 1.0).unwrap();
    params.add_fixed("tau", 2.0).unwrap();
    let mut c1 = Curve::new("c1", "y = A * exp(-x / tau)", params).unwrap();

    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&d1, &mut c1);
        Fitter::default().fit(&mut spec).unwrap()
    };
    assert!(outcome.is_converged());
    assert_eq!(outcome.n_free, 1);
    assert_eq!(value(&c1, "tau"), 2.0);
    assert_relative_eq!(value(&c1, "A"), 3.0, epsilon = 1e-8);
}

#[test]
fn test_upper_bound_uses_trust_region_reflective() {
    let data = DataSet::new(
        "slope2",
        array![1.0, 2.0, 3.0, 4.0, 5.0],
        array![2.0, 4.0, 6.0, 8.0, 10.0],
    )
    .unwrap();
    let mut params = ParameterSet::new();
    params.add_param_with_bounds("a", 1.0, f64::NEG_INFINITY, 1.5).unwrap();
    let mut curve = Curve::new("prop", "y = a * x", params).unwrap();

    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        Fitter::default().fit(&mut spec).unwrap()
    };

    assert_eq!(outcome.method, FitMethod::TrustRegionReflective);
    assert!(outcome.is_converged(), "{}", outcome);
    assert!(value(&curve, "a") <= 1.5);
    assert_relative_eq!(value(&curve, "a"), 1.5, epsilon = 1e-6);
}

#[test]
fn test_x_errors_select_orthogonal_distance() {
    let data = noisy_line(2.0, 1.0)
        .with_x_errors(array![0.1, 0.1, 0.1, 0.1, 0.1])
        .unwrap()
        .with_y_errors(array![0.2, 0.2, 0.2, 0.2, 0.2])
        .unwrap();
    let mut params = ParameterSet::new();
    params.add_param_with_bounds("a", 1.0, 0.0, 10.0).unwrap();
    params.add_param("b", 0.0).unwrap();
    let mut curve = Curve::new("line", "y = a * x + b", params).unwrap();

    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        Fitter::default().fit(&mut spec).unwrap()
    };

    assert_eq!(outcome.method, FitMethod::OrthogonalDistance);
    assert!(outcome.notices.contains(&Notice::OdrIgnoresBounds {
        parameters: vec!["a".to_string()],
    }));
    assert!(outcome.is_converged(), "{}", outcome);
    // errors count data points only, not the x-corrections
    assert_eq!(outcome.n_points, 5);
    assert_eq!(outcome.dof, Some(3));
    assert_relative_eq!(value(&curve, "a"), 2.0, epsilon = 0.2);
    assert_relative_eq!(value(&curve, "b"), 1.0, epsilon = 0.5);
    assert!(curve.parameters().get("a").unwrap().error_priori().is_some());
}

#[test]
fn test_no_degrees_of_freedom_leaves_errors_undefined() {
    let data = DataSet::new("two", array![0.0, 1.0], array![1.0, 3.0]).unwrap();
    let mut curve = Curve::from_formula("line", "y = a * x + b").unwrap();

    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        Fitter::default().fit(&mut spec).unwrap()
    };

    assert!(outcome.is_converged(), "{}", outcome);
    assert_eq!(outcome.dof, None);
    assert_eq!(outcome.reduced_chi_square, None);
    assert!(outcome
        .notices
        .iter()
        .any(|n| matches!(n, Notice::ErrorsUndefined { .. })));

    assert_relative_eq!(value(&curve, "a"), 2.0, epsilon = 1e-6);
    assert_relative_eq!(value(&curve, "b"), 1.0, epsilon = 1e-6);
    let a = curve.parameters().get("a").unwrap();
    assert_eq!(a.error_posteriori(), None);
    assert_eq!(a.error_priori(), None);
}

#[test]
fn test_no_degrees_of_freedom_with_y_errors() {
    let data = DataSet::new("one", array![1.0], array![2.0])
        .unwrap()
        .with_y_errors(array![0.5])
        .unwrap();
    let mut curve = Curve::from_formula("level", "y = a").unwrap();

    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        Fitter::default().fit(&mut spec).unwrap()
    };

    assert!(outcome.is_converged(), "{}", outcome);
    assert_eq!(outcome.dof, None);
    assert!(outcome
        .notices
        .iter()
        .any(|n| matches!(n, Notice::ErrorsUndefined { .. })));

    assert_relative_eq!(value(&curve, "a"), 2.0, epsilon = 1e-6);
    let a = curve.parameters().get("a").unwrap();
    assert_eq!(a.error_posteriori(), None);
    assert_eq!(a.error_priori(), None);
    assert!(outcome.parameter("a").unwrap().intervals.is_empty());
}

#[test]
fn test_inactive_pair_is_untouched() {
    let d1 = exponential_data("d1", 3.0, 2.0, 6);
    let d2 = exponential_data("d2", 9.0, 9.0, 6);
    let mut c1 = Curve::from_formula("c1", "y = A * exp(-x / tau)").unwrap();
    let mut c2 = Curve::from_formula("c2", "y = A * exp(-x / tau)").unwrap();

    let outcome = {
        let mut spec = GlobalFitSpec::new()
            .with_pair(&d1, &mut c1)
            .with_inactive_pair(&d2, &mut c2);
        Fitter::default().fit(&mut spec).unwrap()
    };

    assert!(outcome.is_converged());
    assert_eq!(outcome.n_points, 6);
    assert_relative_eq!(value(&c1, "tau"), 2.0, epsilon = 1e-6);
    assert_eq!(value(&c2, "tau"), 1.0);
    assert_eq!(value(&c2, "A"), 1.0);
}

#[test]
fn test_selection_excludes_points() {
    // the outlier at x = 2 is deselected
    let data = DataSet::new("d", array![0.0, 1.0, 2.0, 3.0], array![1.0, 3.0, 50.0, 7.0])
        .unwrap()
        .with_selection(vec![true, true, false, true])
        .unwrap();
    let mut curve = Curve::from_formula("line", "y = a * x + b").unwrap();

    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        Fitter::default().fit(&mut spec).unwrap()
    };
    assert!(outcome.is_converged());
    assert_eq!(outcome.n_points, 3);
    assert_relative_eq!(value(&curve, "a"), 2.0, epsilon = 1e-6);
    assert_relative_eq!(value(&curve, "b"), 1.0, epsilon = 1e-6);
}

#[test]
fn test_outcome_serializes() {
    let data = noisy_line(1.0, 0.0);
    let mut curve = Curve::from_formula("line", "y = a * x + b").unwrap();
    let mut fitter = Fitter::new(FitConfig::new().with_sigma_levels(vec![1.0]));
    let outcome = {
        let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
        fitter.fit(&mut spec).unwrap()
    };

    let json = outcome.to_json().unwrap();
    assert!(json.contains("\"parameters\""));
    assert!(json.contains("\"chi_square\""));
    assert_eq!(outcome.parameter("b").unwrap().intervals.len(), 1);
}

#[test]
fn test_changing_one_dataset_moves_shared_slot() {
    let x = array![0.0, 1.0, 2.0, 3.0];
    let d1 = DataSet::new("d1", x.clone(), x.mapv(|v| 2.0 * v + 1.0)).unwrap();
    let d2 = DataSet::new("d2", x.clone(), x.mapv(|v| 1.0 - v)).unwrap();
    let mut c1 = Curve::from_formula("c1", "y = m1 * x + deltaG0").unwrap();
    let mut c2 = Curve::from_formula("c2", "y = m2 * x + deltaG0").unwrap();

    {
        let mut spec = GlobalFitSpec::new()
            .with_pair(&d1, &mut c1)
            .with_pair(&d2, &mut c2);
        assert!(Fitter::default().fit(&mut spec).unwrap().is_converged());
    }
    assert_relative_eq!(value(&c1, "deltaG0"), 1.0, epsilon = 1e-6);

    // same x grid, so the shared intercept settles halfway between 1 and 3
    let shifted = DataSet::new("d2", x.clone(), x.mapv(|v| 3.0 - v)).unwrap();
    {
        let mut spec = GlobalFitSpec::new()
            .with_pair(&d1, &mut c1)
            .with_pair(&shifted, &mut c2);
        assert!(Fitter::default().fit(&mut spec).unwrap().is_converged());
    }
    assert_relative_eq!(value(&c1, "deltaG0"), 2.0, epsilon = 1e-6);
    assert_eq!(value(&c1, "deltaG0"), value(&c2, "deltaG0"));
}
