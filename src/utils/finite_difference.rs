//! Finite difference methods for numerical differentiation.
//!
//! Step sizes are relative to the magnitude of the coordinate being
//! perturbed, with an absolute floor near zero.

use crate::error::{GlobFitError, Result};
use crate::problem::Problem;
use ndarray::{Array1, Array2};

/// Default relative step for forward differences (about sqrt of machine epsilon).
pub const FORWARD_EPSILON: f64 = 1.49e-8;

/// Default relative step for central differences (about cube root of machine epsilon).
pub const CENTRAL_EPSILON: f64 = 6.06e-6;

/// Step size for perturbing `value` with relative step `eps`.
pub fn step_size(value: f64, eps: f64) -> f64 {
    if value.abs() > 1.0 {
        value.abs() * eps
    } else {
        eps
    }
}

/// Compute the Jacobian matrix using forward finite differences.
///
/// J[i,j] = ∂residual[i]/∂param[j].
pub fn jacobian<P: Problem + ?Sized>(
    problem: &P,
    params: &Array1<f64>,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    let eps = epsilon.unwrap_or(FORWARD_EPSILON);
    let n_params = params.len();
    let n_residuals = problem.residual_count();

    let residuals = problem.eval(params)?;

    if residuals.len() != n_residuals {
        return Err(GlobFitError::DimensionMismatch(format!(
            "Expected {} residuals, got {}",
            n_residuals,
            residuals.len()
        )));
    }

    let mut jac = Array2::zeros((n_residuals, n_params));
    let mut perturbed = params.clone();

    for j in 0..n_params {
        let h = step_size(params[j], eps);
        perturbed[j] = params[j] + h;
        // Use the actual representable step
        let h = perturbed[j] - params[j];

        let residuals_perturbed = problem.eval(&perturbed)?;
        perturbed[j] = params[j];

        let mut column = jac.column_mut(j);
        column.assign(&((&residuals_perturbed - &residuals) / h));
    }

    Ok(jac)
}

/// Compute the gradient of a scalar function using central finite differences.
///
/// The closure may be stateful (for example an evaluation counter) and may fail
/// with any error type, which is passed through unchanged.
pub fn gradient<F, E>(mut f: F, params: &Array1<f64>, epsilon: Option<f64>) -> std::result::Result<Array1<f64>, E>
where
    F: FnMut(&Array1<f64>) -> std::result::Result<f64, E>,
{
    let eps = epsilon.unwrap_or(CENTRAL_EPSILON);
    let n_params = params.len();

    let mut grad = Array1::zeros(n_params);
    let mut probe = params.clone();

    for j in 0..n_params {
        let h = step_size(params[j], eps);

        probe[j] = params[j] + h;
        let f_forward = f(&probe)?;
        probe[j] = params[j] - h;
        let f_backward = f(&probe)?;
        probe[j] = params[j];

        grad[j] = (f_forward - f_backward) / (2.0 * h);
    }

    Ok(grad)
}
