//! Quasi-Newton minimization with the BFGS inverse-Hessian update.

use ndarray::{Array1, Array2};

use crate::problem::Problem;
use crate::utils::finite_difference::gradient;

use super::line_search::{backtracking, first_step, max_abs, step_is_small};
use super::minimizer::Tolerances;
use super::{Interrupt, Objective, SearchTermination};

/// Curvature pairs with `yᵀs` at or below this are skipped.
const MIN_CURVATURE: f64 = 1e-12;

pub(crate) fn minimize<P: Problem + ?Sized>(
    obj: &mut Objective<'_, P>,
    x0: &Array1<f64>,
    tol: &Tolerances,
    iterations: &mut usize,
) -> Result<SearchTermination, Interrupt> {
    let n = x0.len();
    let mut x = x0.clone();
    let mut fx = obj.eval(&x)?;
    let mut g = gradient(|p| obj.eval(p), &x, None)?;
    let mut h = Array2::<f64>::eye(n);
    let mut scaled = false;

    loop {
        if max_abs(&g) < tol.gtol {
            return Ok(SearchTermination::Converged);
        }
        if *iterations >= tol.max_iterations {
            return Ok(SearchTermination::MaxIterations);
        }
        *iterations += 1;

        let mut d = -h.dot(&g);
        let mut step = backtracking(obj, &x, fx, &g, &d, first_step(&x, &d))?;
        if step.is_none() {
            // The model went stale: restart from steepest descent.
            h = Array2::eye(n);
            scaled = false;
            d = -&g;
            step = backtracking(obj, &x, fx, &g, &d, first_step(&x, &d))?;
        }
        let Some((x_new, f_new)) = step else {
            return Ok(SearchTermination::NoProgress);
        };

        let g_new = gradient(|p| obj.eval(p), &x_new, None)?;
        let converged = step_is_small(&x, &x_new, fx, f_new, tol);

        let s = &x_new - &x;
        let y = &g_new - &g;
        let sy = s.dot(&y);
        if sy > MIN_CURVATURE {
            if !scaled {
                h *= sy / y.dot(&y);
                scaled = true;
            }
            update_inverse_hessian(&mut h, &s, &y, sy);
        }

        x = x_new;
        fx = f_new;
        g = g_new;
        if converged {
            return Ok(SearchTermination::Converged);
        }
    }
}

/// `H ← (I − ρ s yᵀ) H (I − ρ y sᵀ) + ρ s sᵀ` with `ρ = 1 / yᵀs`.
fn update_inverse_hessian(h: &mut Array2<f64>, s: &Array1<f64>, y: &Array1<f64>, sy: f64) {
    let n = s.len();
    let rho = 1.0 / sy;
    let outer = |a: &Array1<f64>, b: &Array1<f64>| Array2::from_shape_fn((n, n), |(i, j)| a[i] * b[j]);

    let left = Array2::<f64>::eye(n) - outer(s, y) * rho;
    let right = Array2::<f64>::eye(n) - outer(y, s) * rho;
    *h = left.dot(&*h).dot(&right) + outer(s, s) * rho;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::search::CancelToken;
    use approx::assert_relative_eq;
    use ndarray::array;

    struct Rosenbrock;

    impl Problem for Rosenbrock {
        fn eval(&self, p: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(array![10.0 * (p[1] - p[0] * p[0]), 1.0 - p[0]])
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            2
        }
    }

    #[test]
    fn test_update_satisfies_secant_condition() {
        let mut h = Array2::<f64>::eye(2);
        let s = array![0.5, -0.2];
        let y = array![1.0, 0.3];
        let sy = s.dot(&y);
        update_inverse_hessian(&mut h, &s, &y, sy);

        let hy = h.dot(&y);
        assert_relative_eq!(hy[0], s[0], epsilon = 1e-12);
        assert_relative_eq!(hy[1], s[1], epsilon = 1e-12);
        assert_relative_eq!(h[[0, 1]], h[[1, 0]], epsilon = 1e-12);
    }

    #[test]
    fn test_rosenbrock() {
        let cancel = CancelToken::new();
        let mut obj = Objective::new(&Rosenbrock, &cancel, None, 20_000);
        let mut iterations = 0;
        let tol = Tolerances {
            xatol: 1e-12,
            fatol: 1e-16,
            gtol: 1e-6,
            max_iterations: 2000,
        };
        let status = minimize(&mut obj, &array![-1.2, 1.0], &tol, &mut iterations);
        assert!(status.is_ok());

        let outcome = obj
            .finish(array![-1.2, 1.0], iterations, status, Vec::new())
            .unwrap();
        assert_relative_eq!(outcome.params[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(outcome.params[1], 1.0, epsilon = 1e-3);
    }
}
