//! Nelder-Mead downhill simplex.
//!
//! Every vertex is projected into the bounds before it is evaluated, so the
//! simplex never leaves the feasible box.

use ndarray::Array1;

use crate::problem::Problem;

use super::minimizer::Tolerances;
use super::{Interrupt, Objective, SearchTermination};

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Relative perturbation of the initial simplex.
const NONZERO_DELTA: f64 = 0.05;
/// Absolute perturbation for coordinates starting at zero.
const ZERO_DELTA: f64 = 0.00025;

pub(crate) fn initial_simplex(x0: &Array1<f64>) -> Vec<Array1<f64>> {
    let mut simplex = Vec::with_capacity(x0.len() + 1);
    simplex.push(x0.clone());
    for i in 0..x0.len() {
        let mut vertex = x0.clone();
        vertex[i] = if x0[i] != 0.0 {
            (1.0 + NONZERO_DELTA) * x0[i]
        } else {
            ZERO_DELTA
        };
        simplex.push(vertex);
    }
    simplex
}

pub(crate) fn minimize<P: Problem + ?Sized>(
    obj: &mut Objective<'_, P>,
    x0: &Array1<f64>,
    tol: &Tolerances,
    iterations: &mut usize,
) -> Result<SearchTermination, Interrupt> {
    let n = x0.len();
    let mut simplex: Vec<(Array1<f64>, f64)> = Vec::with_capacity(n + 1);
    for vertex in initial_simplex(x0) {
        let vertex = obj.project(&vertex);
        let f = obj.eval(&vertex)?;
        simplex.push((vertex, f));
    }

    loop {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));

        let (best, f_best) = (&simplex[0].0, simplex[0].1);
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|(v, _)| v.iter().zip(best.iter()).map(|(a, b)| (a - b).abs()))
            .fold(0.0_f64, f64::max);
        let f_spread = simplex[1..]
            .iter()
            .map(|(_, f)| (f - f_best).abs())
            .fold(0.0_f64, f64::max);
        if x_spread <= tol.xatol && f_spread <= tol.fatol {
            return Ok(SearchTermination::Converged);
        }
        if *iterations >= tol.max_iterations {
            return Ok(SearchTermination::MaxIterations);
        }
        *iterations += 1;

        let mut centroid = Array1::<f64>::zeros(n);
        for (vertex, _) in &simplex[..n] {
            centroid += vertex;
        }
        centroid /= n as f64;

        let (worst, f_worst) = simplex[n].clone();
        let f_second_worst = simplex[n - 1].1;

        let reflected = obj.project(&(&centroid + &((&centroid - &worst) * REFLECTION)));
        let f_reflected = obj.eval(&reflected)?;

        if f_reflected < simplex[0].1 {
            let expanded = obj.project(&(&centroid + &((&centroid - &worst) * EXPANSION)));
            let f_expanded = obj.eval(&expanded)?;
            simplex[n] = if f_expanded < f_reflected {
                (expanded, f_expanded)
            } else {
                (reflected, f_reflected)
            };
            continue;
        }
        if f_reflected < f_second_worst {
            simplex[n] = (reflected, f_reflected);
            continue;
        }

        let contracted = if f_reflected < f_worst {
            let outside = obj.project(&(&centroid + &((&reflected - &centroid) * CONTRACTION)));
            let f_outside = obj.eval(&outside)?;
            (f_outside <= f_reflected).then_some((outside, f_outside))
        } else {
            let inside = obj.project(&(&centroid + &((&worst - &centroid) * CONTRACTION)));
            let f_inside = obj.eval(&inside)?;
            (f_inside < f_worst).then_some((inside, f_inside))
        };
        if let Some(vertex) = contracted {
            simplex[n] = vertex;
            continue;
        }

        let anchor = simplex[0].0.clone();
        for vertex in simplex.iter_mut().skip(1) {
            let shrunk = obj.project(&(&anchor + &((&vertex.0 - &anchor) * SHRINK)));
            let f = obj.eval(&shrunk)?;
            *vertex = (shrunk, f);
        }
    }
}
