//! # Uncertainty Calculation
//!
//! Parameter errors from the Jacobian at a converged least-squares solution:
//!
//! - covariance `inv(JᵀJ)` and the matching correlation matrix
//! - a posteriori errors `sqrt(diag(cov) · χ² / (n - p))`, which scale the
//!   covariance by the observed scatter
//! - a priori errors `sqrt(diag(cov))`, meaningful only when the residuals
//!   were weighted by user-supplied y-errors
//! - symmetric sigma intervals
//!
//! With no degrees of freedom left (`n <= p`) the a posteriori errors are
//! undefined and reported as `None`.

mod confidence;
mod covariance;

pub use confidence::{sigma_intervals, sigma_to_probability, ConfidenceInterval};
pub use covariance::{
    calculate_correlation, calculate_covariance, standard_errors_from_covariance,
};

use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{GlobFitError, Result};

/// Parameter error estimates for the free slots of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEstimate {
    /// Number of active data points
    pub n_points: usize,
    /// Number of free parameters
    pub n_free: usize,
    /// Degrees of freedom, `None` when `n_points <= n_free`
    pub dof: Option<usize>,
    /// Chi-square at the solution
    pub chi_square: f64,
    /// Chi-square per degree of freedom
    pub reduced_chi_square: Option<f64>,
    /// Unscaled covariance over the free parameters
    pub covariance: Array2<f64>,
    /// Correlation matrix over the free parameters
    pub correlation: Array2<f64>,
    /// Errors scaled by the reduced chi-square
    pub posteriori: Vec<Option<f64>>,
    /// Errors from the user-supplied weights alone
    pub priori: Vec<Option<f64>>,
}

impl ErrorEstimate {
    pub fn has_posteriori(&self) -> bool {
        self.posteriori.iter().any(Option::is_some)
    }

    pub fn has_priori(&self) -> bool {
        self.priori.iter().any(Option::is_some)
    }
}

/// Calculator for parameter uncertainties.
#[derive(Debug, Clone)]
pub struct UncertaintyCalculator {
    n_points: usize,
    n_free: usize,
    chi_square: f64,
}

impl UncertaintyCalculator {
    /// `n_points` counts data points, not residual rows; for an orthogonal
    /// distance fit the extra rows and columns belong to the x-corrections.
    pub fn new(n_points: usize, n_free: usize, chi_square: f64) -> Self {
        Self {
            n_points,
            n_free,
            chi_square,
        }
    }

    pub fn dof(&self) -> Option<usize> {
        self.n_points.checked_sub(self.n_free).filter(|&dof| dof > 0)
    }

    pub fn reduced_chi_square(&self) -> Option<f64> {
        self.dof().map(|dof| self.chi_square / dof as f64)
    }

    /// Estimate errors from the Jacobian at the solution.
    ///
    /// The Jacobian may carry extra columns after the first `n_free` (the
    /// x-corrections of an orthogonal distance fit); the full matrix is
    /// inverted and the leading block kept.
    pub fn estimate(&self, jacobian: &Array2<f64>, with_priori: bool) -> Result<ErrorEstimate> {
        if jacobian.ncols() < self.n_free {
            return Err(GlobFitError::DimensionMismatch(format!(
                "Jacobian has {} columns, expected at least {}",
                jacobian.ncols(),
                self.n_free
            )));
        }

        let full = calculate_covariance(jacobian)?;
        let covariance = full.slice(s![..self.n_free, ..self.n_free]).to_owned();
        let correlation = calculate_correlation(&covariance);

        let reduced_chi_square = self.reduced_chi_square();
        let posteriori = match reduced_chi_square {
            Some(scale) => standard_errors_from_covariance(&covariance, scale),
            None => vec![None; self.n_free],
        };
        let priori = if with_priori && self.dof().is_some() {
            standard_errors_from_covariance(&covariance, 1.0)
        } else {
            vec![None; self.n_free]
        };

        Ok(ErrorEstimate {
            n_points: self.n_points,
            n_free: self.n_free,
            dof: self.dof(),
            chi_square: self.chi_square,
            reduced_chi_square,
            covariance,
            correlation,
            posteriori,
            priori,
        })
    }
}
