//! One-dimensional searches shared by the direct minimizers.

use ndarray::Array1;

use crate::problem::Problem;

use super::minimizer::Tolerances;
use super::{Interrupt, Objective};

type Step = std::result::Result<Option<(Array1<f64>, f64)>, Interrupt>;

const ARMIJO_C1: f64 = 1e-4;
const BACKTRACK: f64 = 0.5;
const MAX_BACKTRACKS: usize = 40;

/// Backtracking line search along a descent `direction`.
///
/// Returns the first point satisfying the sufficient-decrease condition, or
/// `None` when the direction does not lead downhill at any tried step.
pub(crate) fn backtracking<P: Problem + ?Sized>(
    obj: &mut Objective<'_, P>,
    x: &Array1<f64>,
    fx: f64,
    gradient: &Array1<f64>,
    direction: &Array1<f64>,
    initial_step: f64,
) -> Step {
    let slope = gradient.dot(direction);
    if slope.is_nan() || slope >= 0.0 {
        return Ok(None);
    }
    let mut t = initial_step;
    for _ in 0..MAX_BACKTRACKS {
        let candidate = x + &(direction * t);
        let fc = obj.eval(&candidate)?;
        if fc <= fx + ARMIJO_C1 * t * slope {
            return Ok(Some((candidate, fc)));
        }
        t *= BACKTRACK;
    }
    Ok(None)
}

/// Largest absolute entry.
pub(crate) fn max_abs(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

/// Trial step length along `direction` for a gradient method: the full step,
/// shortened so that no coordinate moves by more than `max(1, |x|∞)`.
pub(crate) fn first_step(x: &Array1<f64>, direction: &Array1<f64>) -> f64 {
    let longest = max_abs(direction);
    if longest > 0.0 {
        (max_abs(x).max(1.0) / longest).min(1.0)
    } else {
        1.0
    }
}

/// Both the change in cost and the largest coordinate change are within tolerance.
pub(crate) fn step_is_small(
    x: &Array1<f64>,
    x_new: &Array1<f64>,
    fx: f64,
    f_new: f64,
    tol: &Tolerances,
) -> bool {
    (fx - f_new).abs() <= tol.fatol && max_abs(&(x_new - x)) <= tol.xatol
}

const GOLDEN: f64 = 1.618_033_988_749_895;
const INV_GOLDEN: f64 = 0.618_033_988_749_895;
const MAX_EXPANSIONS: usize = 60;
const MAX_SECTIONS: usize = 100;

/// Derivative-free minimization of `f(x + t·d)` for `t` in `range`.
///
/// A bracket is grown from `t = 0` towards the downhill side, then narrowed
/// by golden sections. `fx` is the known value at `t = 0`. Returns the best
/// point seen, which is `x` itself when no direction decreases.
pub(crate) fn golden_section<P: Problem + ?Sized>(
    obj: &mut Objective<'_, P>,
    x: &Array1<f64>,
    fx: f64,
    direction: &Array1<f64>,
    range: (f64, f64),
    initial_step: f64,
    tolerance: f64,
) -> std::result::Result<(f64, f64), Interrupt> {
    let (t_min, t_max) = range;
    let mut line = Line {
        x,
        direction,
        best: (0.0, fx),
    };

    // Pick the downhill side.
    let forward = initial_step.min(t_max);
    let f_forward = if forward > 0.0 {
        line.eval(obj, forward)?
    } else {
        f64::INFINITY
    };

    let (mut a, mut b, mut fb, sign) = if f_forward < fx {
        (0.0, forward, f_forward, 1.0)
    } else {
        let backward = (-initial_step).max(t_min);
        let f_backward = if backward < 0.0 {
            line.eval(obj, backward)?
        } else {
            f64::INFINITY
        };
        if f_backward < fx {
            (0.0, backward, f_backward, -1.0)
        } else {
            // Both neighbours are worse: the minimum lies between them.
            let lo = backward.min(0.0);
            let hi = forward.max(0.0);
            return line.narrow(obj, lo, hi, tolerance);
        }
    };

    // Expand while still going downhill.
    let limit = if sign > 0.0 { t_max } else { t_min };
    let mut c = b;
    for _ in 0..MAX_EXPANSIONS {
        let mut next = b + GOLDEN * (b - a);
        if (sign > 0.0 && next > limit) || (sign < 0.0 && next < limit) {
            next = limit;
        }
        if next == b {
            c = b;
            break;
        }
        let f_next = line.eval(obj, next)?;
        c = next;
        if f_next >= fb {
            break;
        }
        a = b;
        b = next;
        fb = f_next;
    }

    let (lo, hi) = if a < c { (a, c) } else { (c, a) };
    line.narrow(obj, lo, hi, tolerance)
}

/// Points `x + t·direction` with the best `(t, f)` seen so far.
struct Line<'v> {
    x: &'v Array1<f64>,
    direction: &'v Array1<f64>,
    best: (f64, f64),
}

impl Line<'_> {
    fn eval<P: Problem + ?Sized>(
        &mut self,
        obj: &mut Objective<'_, P>,
        t: f64,
    ) -> std::result::Result<f64, Interrupt> {
        let f = obj.eval(&(self.x + &(self.direction * t)))?;
        if f < self.best.1 {
            self.best = (t, f);
        }
        Ok(f)
    }

    fn narrow<P: Problem + ?Sized>(
        &mut self,
        obj: &mut Objective<'_, P>,
        mut lo: f64,
        mut hi: f64,
        tolerance: f64,
    ) -> std::result::Result<(f64, f64), Interrupt> {
        if hi - lo <= 0.0 {
            return Ok(self.best);
        }
        let mut t1 = hi - INV_GOLDEN * (hi - lo);
        let mut t2 = lo + INV_GOLDEN * (hi - lo);
        let mut f1 = self.eval(obj, t1)?;
        let mut f2 = self.eval(obj, t2)?;

        for _ in 0..MAX_SECTIONS {
            if hi - lo <= tolerance * (1.0 + self.best.0.abs()) {
                break;
            }
            if f1 < f2 {
                hi = t2;
                t2 = t1;
                f2 = f1;
                t1 = hi - INV_GOLDEN * (hi - lo);
                f1 = self.eval(obj, t1)?;
            } else {
                lo = t1;
                t1 = t2;
                f1 = f2;
                t2 = lo + INV_GOLDEN * (hi - lo);
                f2 = self.eval(obj, t2)?;
            }
        }
        Ok(self.best)
    }
}
