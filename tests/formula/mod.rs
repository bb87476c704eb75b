// Tests for the formula language and formula files

use approx::assert_relative_eq;
use globfit_rs::formula::{CompileErrorKind, CompiledFormula, FormulaFile};
use globfit_rs::Curve;
use ndarray::{array, Array1};

const VANT_HOFF: &str = "\
<PARAMETERS>
deltaG0, -2.0000e+01
m, 5.0000e+00
T, 2.9815e+02, 1
<FORMULA>
# two-state unfolding
RT = 8.314e-3 * T
K = exp(-(deltaG0 + m * x) / RT)
y = K / (1 + K)
";

#[test]
fn test_formula_file_to_curve() {
    let file = FormulaFile::parse(VANT_HOFF).unwrap();
    let curve = Curve::from_formula_file("unfold", &file).unwrap();

    assert_eq!(curve.parameters().len(), 3);
    assert!(curve.parameters().get("T").unwrap().fixed());
    assert_eq!(curve.formula().intermediate_names(), &["RT".to_string(), "K".to_string()]);

    // midpoint of the transition at x = -deltaG0 / m
    assert_relative_eq!(curve.evaluate_point(4.0), 0.5, epsilon = 1e-12);
    let y = curve.evaluate(&array![0.0, 4.0, 8.0]);
    assert!(y[0] > 0.5 && y[2] < 0.5);
}

#[test]
fn test_formula_file_written_by_curve_reads_back() {
    let file = FormulaFile::parse(VANT_HOFF).unwrap();
    let curve = Curve::from_formula_file("unfold", &file).unwrap();

    let text = curve.to_formula_file().to_string();
    assert!(text.contains("T, 2.9815e+02, 1"));
    let reread = FormulaFile::parse(&text).unwrap();
    let again = Curve::from_formula_file("unfold", &reread).unwrap();
    assert_eq!(again.parameters().names(), curve.parameters().names());
    assert_eq!(again.evaluate_point(3.0), curve.evaluate_point(3.0));
}

#[test]
fn test_compile_error_reports_line() {
    let err = CompiledFormula::compile("k = a * x\n\ny = k + (b\n").unwrap_err();
    assert_eq!(err.line, 3);
    assert!(matches!(err.kind, CompileErrorKind::Syntax(_)));
    assert!(err.text.contains("(b"));
}

#[test]
fn test_failed_recompile_keeps_last_good_formula() {
    let mut curve = Curve::from_formula("c", "y = a * x").unwrap();
    assert!(curve.set_formula("y = a * ").is_err());
    assert_eq!(curve.source(), "y = a * x");
    assert_relative_eq!(curve.evaluate_point(2.0), 2.0);

    // new names become parameters only through apply_formula
    assert!(curve.set_formula("y = a * x + b").is_err());
    curve.apply_formula("y = a * x + b").unwrap();
    assert!(curve.parameters().contains("b"));
    assert_relative_eq!(curve.evaluate_point(2.0), 3.0);
}

#[test]
fn test_evaluation_is_deterministic() {
    let formula = CompiledFormula::compile("s = sin(w * x)\ny = h * s^2 + c").unwrap();
    let params = [1.3, 2.5, -0.25];
    let x = Array1::linspace(-10.0, 10.0, 10_000);

    let first = formula.evaluate_values(&x, &params);
    let second = formula.evaluate_values(&x, &params);
    assert_eq!(first, second);

    // large inputs agree bit for bit with point-wise evaluation
    for i in (0..x.len()).step_by(997) {
        assert_eq!(first[i], formula.evaluate_point(x[i], &params));
    }
}

#[test]
fn test_invalid_points_are_nan_not_errors() {
    let curve = Curve::from_formula("c", "y = a * sqrt(x) + log(x)").unwrap();
    let y = curve.evaluate(&array![-1.0, 0.0, 1.0]);
    assert!(y[0].is_nan());
    assert!(!y[1].is_finite());
    assert_relative_eq!(y[2], 1.0);
}
