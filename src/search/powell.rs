//! Powell's conjugate direction method.
//!
//! Each line search is confined to the part of the line inside the bounds.

use ndarray::Array1;

use crate::problem::Problem;

use super::line_search::golden_section;
use super::minimizer::Tolerances;
use super::{Interrupt, Objective, SearchTermination};

/// Relative length of the first trial step along a unit direction.
const STEP_SCALE: f64 = 0.05;
const MIN_STEP: f64 = 1e-3;

pub(crate) fn minimize<P: Problem + ?Sized>(
    obj: &mut Objective<'_, P>,
    x0: &Array1<f64>,
    tol: &Tolerances,
    iterations: &mut usize,
) -> Result<SearchTermination, Interrupt> {
    let n = x0.len();
    let mut directions: Vec<Array1<f64>> = (0..n)
        .map(|i| {
            let mut d = Array1::zeros(n);
            d[i] = 1.0;
            d
        })
        .collect();

    let mut x = obj.project(x0);
    let mut fx = obj.eval(&x)?;

    loop {
        if *iterations >= tol.max_iterations {
            return Ok(SearchTermination::MaxIterations);
        }
        *iterations += 1;

        let x_start = x.clone();
        let f_start = fx;
        let mut largest_drop = 0.0;
        let mut largest_idx = 0;

        for (i, direction) in directions.iter().enumerate() {
            let before = fx;
            (x, fx) = line_minimize(obj, &x, fx, direction, tol.xatol)?;
            if before - fx > largest_drop {
                largest_drop = before - fx;
                largest_idx = i;
            }
        }

        let moved = (&x - &x_start)
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if f_start - fx <= tol.fatol && moved <= tol.xatol.max(f64::EPSILON) {
            return Ok(SearchTermination::Converged);
        }
        if 2.0 * (f_start - fx) <= tol.fatol * (f_start.abs() + fx.abs()) + f64::MIN_POSITIVE {
            return Ok(SearchTermination::Converged);
        }

        // Replace the direction of largest decrease by the overall displacement.
        let displacement = &x - &x_start;
        let length = displacement.dot(&displacement).sqrt();
        if length > 0.0 && length.is_finite() {
            let direction = displacement / length;
            (x, fx) = line_minimize(obj, &x, fx, &direction, tol.xatol)?;
            directions.remove(largest_idx);
            directions.push(direction);
        }
    }
}

/// Minimize along a unit `direction`, staying inside the bounds.
fn line_minimize<P: Problem + ?Sized>(
    obj: &mut Objective<'_, P>,
    x: &Array1<f64>,
    fx: f64,
    direction: &Array1<f64>,
    xatol: f64,
) -> Result<(Array1<f64>, f64), Interrupt> {
    let range = obj.step_range(x, direction);
    if range.0 == 0.0 && range.1 == 0.0 {
        return Ok((x.clone(), fx));
    }
    let scale = x.dot(direction).abs();
    let step = (STEP_SCALE * scale).max(MIN_STEP);
    let tolerance = xatol.max(1e-12);
    let (t, f) = golden_section(obj, x, fx, direction, range, step, tolerance)?;
    if t == 0.0 {
        return Ok((x.clone(), fx));
    }
    Ok((obj.project(&(x + &(direction * t))), f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::search::CancelToken;
    use approx::assert_relative_eq;
    use ndarray::array;

    struct Quadratic;

    impl Problem for Quadratic {
        // minimum at (1, -2) with coupled coordinates
        fn eval(&self, p: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(array![p[0] - 1.0, (p[0] + p[1] + 1.0) * 3.0])
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            2
        }
    }

    fn tolerances() -> Tolerances {
        Tolerances {
            xatol: 1e-10,
            fatol: 1e-12,
            gtol: 1e-6,
            max_iterations: 200,
        }
    }

    #[test]
    fn test_coupled_quadratic() {
        let cancel = CancelToken::new();
        let mut obj = Objective::new(&Quadratic, &cancel, None, 10_000);
        let mut iterations = 0;
        let status = minimize(&mut obj, &array![0.0, 0.0], &tolerances(), &mut iterations);
        assert!(matches!(status, Ok(SearchTermination::Converged)));

        let outcome = obj
            .finish(array![0.0, 0.0], iterations, status, Vec::new())
            .unwrap();
        assert_relative_eq!(outcome.params[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(outcome.params[1], -2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_bounds_are_respected() {
        let cancel = CancelToken::new();
        let bounds = Some((array![-10.0, -1.0], array![10.0, 10.0]));
        let mut obj = Objective::new(&Quadratic, &cancel, bounds, 10_000);
        let mut iterations = 0;
        let status = minimize(&mut obj, &array![0.0, 0.0], &tolerances(), &mut iterations);
        let outcome = obj
            .finish(array![0.0, 0.0], iterations, status, Vec::new())
            .unwrap();

        assert!(outcome.params[1] >= -1.0);
        assert!(outcome.cost < outcome.initial_cost);
    }
}
