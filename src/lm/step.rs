//! Step calculation for the damped normal equations.
//!
//! Both solvers reduce each iteration to `(A + λ·diag(A)) δ = -g`, where `A`
//! is a Gauss-Newton Hessian approximation and `g` the matching gradient. The
//! system is symmetric positive definite for any positive λ and is solved by a
//! nalgebra Cholesky factorization.

use nalgebra::linalg::Cholesky;
use ndarray::{Array1, Array2};

use crate::error::{GlobFitError, Result};
use crate::utils::matrix_convert::{
    nalgebra_vec_to_ndarray, ndarray_to_nalgebra, ndarray_vec_to_nalgebra,
};

/// Floor for diagonal entries of `A` when forming the damping term.
const MIN_DIAGONAL: f64 = 1e-10;

/// Result of a damped step calculation.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The calculated step vector
    pub step: Array1<f64>,

    /// The reduction in cost predicted by the quadratic model
    pub predicted_reduction: f64,

    /// The damping parameter used to calculate the step
    pub lambda: f64,
}

/// Handles step calculation for the least-squares solvers.
pub struct LmStep;

impl LmStep {
    /// Solves `(A + λ·diag(A)) δ = -g` and reports the model's predicted reduction.
    ///
    /// `a` is `JᵀJ` (possibly augmented) and `g` is `Jᵀr`. Cost is the plain
    /// sum of squared residuals, so the model is `2gᵀδ + δᵀAδ`.
    pub fn calculate_step(a: &Array2<f64>, g: &Array1<f64>, lambda: f64) -> Result<StepResult> {
        let mut damped = a.clone();
        for i in 0..damped.nrows() {
            damped[[i, i]] += lambda * a[[i, i]].max(MIN_DIAGONAL);
        }

        let rhs = g.mapv(|v| -v);
        let step = Self::solve_cholesky(&damped, &rhs)?;
        let predicted_reduction = -Self::quadratic_model(a, g, &step);

        Ok(StepResult {
            step,
            predicted_reduction,
            lambda,
        })
    }

    /// Solves the linear system `A x = b` using Cholesky decomposition.
    pub fn solve_cholesky(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
        if a.iter().any(|v| !v.is_finite()) || b.iter().any(|v| !v.is_finite()) {
            return Err(GlobFitError::LinearAlgebraError(
                "non-finite entries in the normal equations".to_string(),
            ));
        }
        let chol = Cholesky::new(ndarray_to_nalgebra(a)).ok_or_else(|| {
            GlobFitError::LinearAlgebraError("matrix is not positive definite".to_string())
        })?;
        let x = chol.solve(&ndarray_vec_to_nalgebra(b));
        Ok(nalgebra_vec_to_ndarray(&x))
    }

    /// Change in cost predicted by the linear model: `2gᵀδ + δᵀAδ`.
    pub fn quadratic_model(a: &Array2<f64>, g: &Array1<f64>, step: &Array1<f64>) -> f64 {
        2.0 * g.dot(step) + step.dot(&a.dot(step))
    }
}
