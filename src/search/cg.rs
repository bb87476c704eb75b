//! Nonlinear conjugate gradient (Polak-Ribière, restarted when negative).
//!
//! Gradients come from central differences of the objective, so each
//! iteration costs `2n` evaluations on top of the line search.

use ndarray::Array1;

use crate::problem::Problem;
use crate::utils::finite_difference::gradient;

use super::line_search::{backtracking, first_step, max_abs, step_is_small};
use super::minimizer::Tolerances;
use super::{Interrupt, Objective, SearchTermination};

pub(crate) fn minimize<P: Problem + ?Sized>(
    obj: &mut Objective<'_, P>,
    x0: &Array1<f64>,
    tol: &Tolerances,
    iterations: &mut usize,
) -> Result<SearchTermination, Interrupt> {
    let mut x = x0.clone();
    let mut fx = obj.eval(&x)?;
    let mut g = gradient(|p| obj.eval(p), &x, None)?;
    let mut d = -&g;

    loop {
        if max_abs(&g) < tol.gtol {
            return Ok(SearchTermination::Converged);
        }
        if *iterations >= tol.max_iterations {
            return Ok(SearchTermination::MaxIterations);
        }
        *iterations += 1;

        let mut step = backtracking(obj, &x, fx, &g, &d, first_step(&x, &d))?;
        if step.is_none() {
            // Lost conjugacy: retry along steepest descent.
            d = -&g;
            step = backtracking(obj, &x, fx, &g, &d, first_step(&x, &d))?;
        }
        let Some((x_new, f_new)) = step else {
            return Ok(SearchTermination::NoProgress);
        };

        let g_new = gradient(|p| obj.eval(p), &x_new, None)?;
        let converged = step_is_small(&x, &x_new, fx, f_new, tol);

        let denom = g.dot(&g);
        let beta = if denom > 0.0 {
            (g_new.dot(&(&g_new - &g)) / denom).max(0.0)
        } else {
            0.0
        };
        d = &d * beta - &g_new;
        if g_new.dot(&d) >= 0.0 {
            d = -&g_new;
        }

        x = x_new;
        fx = f_new;
        g = g_new;
        if converged {
            return Ok(SearchTermination::Converged);
        }
    }
}
