// Tests for merging parameters across curves

use globfit_rs::parameters::ParameterSet;
use globfit_rs::{ConfigurationError, Curve, DataSet, GlobalFitSpec, Notice};
use ndarray::array;

fn declared(name: &str, source: &str, params: &[(&str, f64)]) -> Curve {
    let mut set = ParameterSet::new();
    for (n, v) in params {
        set.add_param(n, *v).unwrap();
    }
    Curve::new(name, source, set).unwrap()
}

#[test]
fn test_shared_slot_follows_first_declaration() {
    let data = DataSet::new("d", array![0.0, 1.0], array![1.0, 2.0]).unwrap();
    // deltaG0 is declared second in the first curve and first in the second
    let mut c1 = declared("c1", "y = m1 * x + deltaG0", &[("m1", 1.0), ("deltaG0", -3.0)]);
    let mut c2 = declared("c2", "y = deltaG0 - m2 * x", &[("deltaG0", -3.0), ("m2", 2.0)]);

    let spec = GlobalFitSpec::new()
        .with_pair(&data, &mut c1)
        .with_pair(&data, &mut c2);
    let (merged, notices) = spec.merge().unwrap();

    assert_eq!(merged.layout(), vec!["m1", "deltaG0", "m2"]);
    assert_eq!(merged.initial_vector(), array![1.0, -3.0, 2.0]);
    assert!(merged.slots()[1].is_shared());
    assert!(!merged.slots()[0].is_shared());
    assert_eq!(merged.curve_values(1, &[10.0, 20.0, 30.0]), vec![20.0, 30.0]);
    assert!(notices.is_empty());
}

#[test]
fn test_inactive_pairs_do_not_contribute() {
    let data = DataSet::new("d", array![0.0, 1.0], array![1.0, 2.0]).unwrap();
    let mut c1 = declared("c1", "y = k * x", &[("k", 1.0)]);
    let mut c2 = declared("c2", "y = k * x + off", &[("k", 5.0), ("off", 0.0)]);

    let mut spec = GlobalFitSpec::new()
        .with_pair(&data, &mut c1)
        .with_inactive_pair(&data, &mut c2);
    let (merged, notices) = spec.merge().unwrap();
    assert_eq!(merged.layout(), vec!["k"]);
    assert!(notices.is_empty());

    spec.set_active(1, true);
    let (merged, notices) = spec.merge().unwrap();
    assert_eq!(merged.layout(), vec!["k", "off"]);
    assert!(notices
        .iter()
        .any(|n| matches!(n, Notice::SharedValueMismatch { name, .. } if name == "k")));
}

#[test]
fn test_disjoint_shared_bounds_are_rejected() {
    let data = DataSet::new("d", array![0.0, 1.0], array![1.0, 2.0]).unwrap();
    let mut c1 = declared("c1", "y = k * x", &[("k", 1.0)]);
    let mut c2 = declared("c2", "y = k + x", &[("k", 1.0)]);
    c1.parameters_mut().get_mut("k").unwrap().set_bounds(0.0, 1.0).unwrap();
    c2.parameters_mut().get_mut("k").unwrap().set_bounds(2.0, 3.0).unwrap();

    let spec = GlobalFitSpec::new()
        .with_pair(&data, &mut c1)
        .with_pair(&data, &mut c2);
    assert!(matches!(
        spec.merge(),
        Err(ConfigurationError::ConflictingBounds { .. })
    ));
}

#[test]
fn test_empty_spec() {
    let spec = GlobalFitSpec::new();
    assert_eq!(spec.merge().unwrap_err(), ConfigurationError::NoActivePairs);
}
