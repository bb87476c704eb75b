//! Trust-region reflective solver for bound-constrained least squares.
//!
//! Iterates stay strictly inside the box. Each iteration rescales the problem
//! with the Coleman-Li vector `v` (distance to the bound the gradient points
//! at), solves the damped normal equations in the scaled variables, and maps
//! the step back. A step that would leave the box is either truncated just
//! inside the first bound it hits or reflected off that bound, whichever the
//! quadratic model prefers.

use log::debug;
use ndarray::{Array1, Array2};

use crate::error::{GlobFitError, Result};
use crate::problem::Problem;

use super::algorithm::{check_dimensions, sum_squares, LmResult};
use super::config::LmConfig;
use super::convergence::{max_norm, ConvergenceStatus};
use super::step::LmStep;
use super::trust_region::TrustRegion;

/// Fraction of the distance to a bound that a truncated step may cover.
const THETA: f64 = 0.995;

/// Relative offset used to move a point off a bound.
const INTERIOR_STEP: f64 = 1e-10;

/// Bound-constrained Levenberg-Marquardt style solver.
#[derive(Debug, Clone)]
pub struct TrustRegionReflective {
    config: LmConfig,
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl TrustRegionReflective {
    /// Creates a solver for the box `lower <= p <= upper`. Infinite entries are allowed.
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(GlobFitError::DimensionMismatch(format!(
                "{} lower bounds but {} upper bounds",
                lower.len(),
                upper.len()
            )));
        }
        if let Some(i) = (0..lower.len()).find(|&i| lower[i].is_nan() || upper[i].is_nan() || lower[i] > upper[i]) {
            return Err(GlobFitError::InvalidInput(format!(
                "invalid bounds [{}, {}] for parameter {}",
                lower[i], upper[i], i
            )));
        }
        Ok(Self {
            config: LmConfig::default(),
            lower,
            upper,
        })
    }

    pub fn with_config(mut self, config: LmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    pub fn lower(&self) -> &Array1<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &Array1<f64> {
        &self.upper
    }

    /// Minimize the sum of squared residuals inside the bounds.
    ///
    /// The starting point is clamped into the box first.
    pub fn minimize<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
    ) -> Result<LmResult> {
        check_dimensions(problem, &initial_params)?;
        if initial_params.len() != self.lower.len() {
            return Err(GlobFitError::DimensionMismatch(format!(
                "Expected {} bounded parameters, got {}",
                self.lower.len(),
                initial_params.len()
            )));
        }

        let criteria = self.config.criteria();
        let mut trust_region = TrustRegion::from_config(&self.config);

        let mut params = self.strictly_feasible(&initial_params);
        let mut residuals = problem.eval(&params)?;
        let mut cost = sum_squares(&residuals);
        let mut jacobian = problem.jacobian(&params)?;
        let mut func_evals = 1;
        let mut jac_evals = 1;
        let mut iterations = 0;

        let mut status = if cost.is_finite() {
            ConvergenceStatus::Running
        } else {
            ConvergenceStatus::NumericalError
        };

        while !status.is_terminated() {
            let g = jacobian.t().dot(&residuals);
            let (v, dv) = self.scaling_vector(&params, &g);

            if criteria.gradient_is_small(max_norm(&(&v * &g))) {
                status = ConvergenceStatus::GradientConvergence;
                break;
            }
            if iterations >= criteria.max_iterations {
                status = ConvergenceStatus::MaxIterationsReached;
                break;
            }
            iterations += 1;

            let jtj = jacobian.t().dot(&jacobian);
            let d = v.mapv(f64::sqrt);
            // The bound term of the Coleman-Li Hessian, in scaled and unscaled form.
            let c_scaled = &g * &dv;
            let c: Array1<f64> = c_scaled
                .iter()
                .zip(v.iter())
                .map(|(c, v)| if *v > 0.0 { c / v } else { 0.0 })
                .collect();

            let n = params.len();
            let b_scaled = Array2::from_shape_fn((n, n), |(i, j)| {
                let diag = if i == j { c_scaled[i] } else { 0.0 };
                d[i] * jtj[[i, j]] * d[j] + diag
            });
            let g_scaled = &d * &g;

            let scaled_step = match LmStep::calculate_step(&b_scaled, &g_scaled, trust_region.lambda) {
                Ok(step) => step,
                Err(err) => {
                    debug!("trf: step failed at lambda {:.3e}: {}", trust_region.lambda, err);
                    if trust_region.at_maximum() {
                        status = ConvergenceStatus::DampingLimitReached;
                    }
                    trust_region.increase();
                    continue;
                }
            };
            let full_step = &d * &scaled_step.step;
            let step = self.select_step(&params, &full_step, &jtj, &g, &c);
            let predicted = -quadratic_model(&jtj, &g, &c, &step);

            let new_params = self.strictly_feasible(&(&params + &step));
            let new_residuals = problem.eval(&new_params)?;
            func_evals += 1;
            let new_cost = sum_squares(&new_residuals);
            let rho = TrustRegion::gain_ratio(cost, new_cost, predicted);

            debug!(
                "trf: iteration {} cost {:.6e} -> {:.6e} lambda {:.3e} rho {:.3}",
                iterations, cost, new_cost, trust_region.lambda, rho
            );

            if trust_region.update_lambda(rho) {
                status = criteria.check(&params, &new_params, cost, new_cost, iterations);
                params = new_params;
                residuals = new_residuals;
                cost = new_cost;
                jacobian = problem.jacobian(&params)?;
                jac_evals += 1;
            } else if criteria.step_is_small(&params, &step) {
                status = ConvergenceStatus::ParameterConvergence;
            } else if trust_region.at_maximum() {
                status = ConvergenceStatus::DampingLimitReached;
            }
        }

        Ok(LmResult {
            params,
            residuals,
            jacobian,
            cost,
            iterations,
            func_evals,
            jac_evals,
            status,
        })
    }

    /// Coleman-Li scaling: distance to the bound the negative gradient heads
    /// for, or 1 when that bound is infinite. `dv` is its derivative.
    fn scaling_vector(&self, x: &Array1<f64>, g: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        let n = x.len();
        let mut v = Array1::ones(n);
        let mut dv = Array1::zeros(n);
        for i in 0..n {
            if g[i] < 0.0 && self.upper[i].is_finite() {
                v[i] = self.upper[i] - x[i];
                dv[i] = -1.0;
            } else if g[i] > 0.0 && self.lower[i].is_finite() {
                v[i] = x[i] - self.lower[i];
                dv[i] = 1.0;
            }
        }
        (v, dv)
    }

    /// Fraction of `p` that can be taken from `x` before leaving the box, and
    /// the coordinates whose bounds are hit first.
    fn step_to_bound(&self, x: &Array1<f64>, p: &Array1<f64>) -> (f64, Vec<usize>) {
        let steps: Vec<f64> = (0..x.len())
            .map(|i| {
                if p[i] > 0.0 && self.upper[i].is_finite() {
                    (self.upper[i] - x[i]) / p[i]
                } else if p[i] < 0.0 && self.lower[i].is_finite() {
                    (self.lower[i] - x[i]) / p[i]
                } else {
                    f64::INFINITY
                }
            })
            .collect();
        let alpha = steps.iter().copied().fold(f64::INFINITY, f64::min).max(0.0);
        let hits = if alpha.is_finite() {
            (0..steps.len()).filter(|&i| steps[i] <= alpha).collect()
        } else {
            Vec::new()
        };
        (alpha, hits)
    }

    /// Chooses between the full, truncated and reflected step.
    fn select_step(
        &self,
        x: &Array1<f64>,
        p: &Array1<f64>,
        jtj: &Array2<f64>,
        g: &Array1<f64>,
        c: &Array1<f64>,
    ) -> Array1<f64> {
        let (alpha, hits) = self.step_to_bound(x, p);
        if alpha > 1.0 {
            return p.clone();
        }

        let truncated = p * (THETA * alpha);
        let mut best_value = quadratic_model(jtj, g, c, &truncated);
        let mut best = truncated;

        let boundary = p * alpha;
        let mut reflected_dir = p.clone();
        for &i in &hits {
            reflected_dir[i] = -reflected_dir[i];
        }
        let x_boundary = x + &boundary;
        let (to_bound, _) = self.step_to_bound(&x_boundary, &reflected_dir);
        let t_upper = THETA * (1.0 - alpha).min(to_bound);

        if t_upper > 0.0 {
            // Quadratic model along boundary + t * reflected_dir is a t^2 + b t + const.
            let a_dir = reflected_dir.dot(&jtj.dot(&reflected_dir))
                + (c * &reflected_dir * &reflected_dir).sum();
            let b_dir = 2.0 * g.dot(&reflected_dir)
                + 2.0 * boundary.dot(&jtj.dot(&reflected_dir))
                + 2.0 * (c * &boundary * &reflected_dir).sum();
            let t = if a_dir > 0.0 {
                (-b_dir / (2.0 * a_dir)).clamp(0.0, t_upper)
            } else if b_dir < 0.0 {
                t_upper
            } else {
                0.0
            };
            let reflected = &boundary + &(&reflected_dir * t);
            let value = quadratic_model(jtj, g, c, &reflected);
            if value < best_value {
                best_value = value;
                best = reflected;
            }
        }

        debug!("trf: step hits bounds at alpha {:.3e}, model {:.6e}", alpha, best_value);
        best
    }

    /// Clamps into the box and moves points off active bounds.
    fn strictly_feasible(&self, x: &Array1<f64>) -> Array1<f64> {
        let mut out = x.clone();
        for i in 0..out.len() {
            let (lo, hi) = (self.lower[i], self.upper[i]);
            if lo == hi {
                out[i] = lo;
                continue;
            }
            if out[i] <= lo {
                let nudged = lo + INTERIOR_STEP * lo.abs().max(1.0);
                out[i] = if hi.is_finite() { nudged.min(0.5 * (lo + hi)) } else { nudged };
            } else if out[i] >= hi {
                let nudged = hi - INTERIOR_STEP * hi.abs().max(1.0);
                out[i] = if lo.is_finite() { nudged.max(0.5 * (lo + hi)) } else { nudged };
            }
        }
        out
    }
}

/// Change in cost predicted by the Coleman-Li model: `2gᵀs + sᵀJᵀJs + Σ cᵢsᵢ²`.
fn quadratic_model(jtj: &Array2<f64>, g: &Array1<f64>, c: &Array1<f64>, s: &Array1<f64>) -> f64 {
    LmStep::quadratic_model(jtj, g, s) + (c * s * s).sum()
}
