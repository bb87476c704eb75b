//! # Covariance Matrix Calculations
//!
//! Covariance, correlation and standard errors from the Jacobian of a
//! converged least-squares problem.

use nalgebra::linalg::Cholesky;
use ndarray::Array2;

use crate::error::{GlobFitError, Result};
use crate::utils::matrix_convert::{nalgebra_to_ndarray, ndarray_to_nalgebra};

/// Largest accepted `cov[i,i] * (JᵀJ)[i,i]`. This is the variance inflation of
/// parameter `i`; beyond it the column is collinear with the others to within
/// rounding.
const MAX_VARIANCE_INFLATION: f64 = 1e12;

/// Unscaled covariance matrix `inv(JᵀJ)`.
///
/// Fails with [`GlobFitError::SingularMatrix`] when `JᵀJ` is not positive
/// definite, which happens when a parameter has no influence on the residuals
/// or two parameters are perfectly correlated (up to rounding).
pub fn calculate_covariance(jacobian: &Array2<f64>) -> Result<Array2<f64>> {
    if jacobian.iter().any(|v| !v.is_finite()) {
        return Err(GlobFitError::SingularMatrix);
    }
    let jtj = jacobian.t().dot(jacobian);
    let chol = Cholesky::new(ndarray_to_nalgebra(&jtj)).ok_or(GlobFitError::SingularMatrix)?;
    let covar = nalgebra_to_ndarray(&chol.inverse());
    if covar.iter().any(|v| !v.is_finite()) {
        return Err(GlobFitError::SingularMatrix);
    }
    for i in 0..covar.nrows() {
        if covar[[i, i]] * jtj[[i, i]] > MAX_VARIANCE_INFLATION {
            return Err(GlobFitError::SingularMatrix);
        }
    }
    Ok(covar)
}

/// Calculate correlation matrix from covariance matrix.
///
/// `correl[i,j] = covar[i,j] / sqrt(covar[i,i] * covar[j,j])`; rows with a
/// non-positive variance get zero correlation.
pub fn calculate_correlation(covar: &Array2<f64>) -> Array2<f64> {
    let n = covar.nrows();
    Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            return 1.0;
        }
        let denom = (covar[[i, i]] * covar[[j, j]]).sqrt();
        if covar[[i, i]] > 0.0 && covar[[j, j]] > 0.0 && denom > 0.0 {
            covar[[i, j]] / denom
        } else {
            0.0
        }
    })
}

/// Standard errors `sqrt(scale * covar[i,i])`.
///
/// A non-positive or non-finite variance yields `None`, never zero.
pub fn standard_errors_from_covariance(covar: &Array2<f64>, scale: f64) -> Vec<Option<f64>> {
    (0..covar.nrows())
        .map(|i| {
            let variance = covar[[i, i]] * scale;
            if variance > 0.0 && variance.is_finite() {
                Some(variance.sqrt())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    #[test]
    fn test_calculate_covariance() {
        let jacobian = arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        let covar = calculate_covariance(&jacobian).unwrap();

        // JᵀJ = [[35, 44], [44, 56]], det = 24
        assert_relative_eq!(covar[[0, 0]], 56.0 / 24.0, epsilon = 1e-10);
        assert_relative_eq!(covar[[1, 1]], 35.0 / 24.0, epsilon = 1e-10);
        assert_relative_eq!(covar[[0, 1]], -44.0 / 24.0, epsilon = 1e-10);
        assert_relative_eq!(covar[[0, 1]], covar[[1, 0]], epsilon = 1e-12);
    }

    #[test]
    fn test_singular_jacobian() {
        // second parameter has no influence
        let jacobian = arr2(&[[1.0, 0.0], [2.0, 0.0], [3.0, 0.0]]);
        assert!(matches!(
            calculate_covariance(&jacobian),
            Err(GlobFitError::SingularMatrix)
        ));
    }

    #[test]
    fn test_nearly_collinear_columns() {
        let jacobian = arr2(&[[1.0, 1.0, 0.0], [1.0, 1.0 + 1e-12, 1.0], [1.0, 1.0, 2.0]]);
        assert!(matches!(
            calculate_covariance(&jacobian),
            Err(GlobFitError::SingularMatrix)
        ));
    }

    #[test]
    fn test_calculate_correlation() {
        let covar = arr2(&[[0.1, 0.05], [0.05, 0.2]]);
        let correl = calculate_correlation(&covar);

        assert_eq!(correl[[0, 0]], 1.0);
        assert_eq!(correl[[1, 1]], 1.0);
        let expected = 0.05 / (0.1f64 * 0.2f64).sqrt();
        assert_relative_eq!(correl[[0, 1]], expected, epsilon = 1e-12);
        assert_relative_eq!(correl[[1, 0]], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_standard_errors_from_covariance() {
        let covar = arr2(&[[0.1, 0.05], [0.05, 0.0]]);
        let errors = standard_errors_from_covariance(&covar, 2.0);

        assert_relative_eq!(errors[0].unwrap(), 0.2f64.sqrt(), epsilon = 1e-12);
        assert_eq!(errors[1], None);
    }
}
