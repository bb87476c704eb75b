//! # Sigma Intervals
//!
//! Symmetric `value ± k·error` intervals for fitted parameters, with the
//! Gaussian coverage probability of each level.

use serde::{Deserialize, Serialize};

/// A symmetric interval around a fitted value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Width in units of the standard error
    pub sigma: f64,
    /// Coverage probability of a normal distribution at this width
    pub probability: f64,
    /// The lower bound of the interval
    pub lower: f64,
    /// The upper bound of the interval
    pub upper: f64,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Intervals for one parameter at each requested sigma level.
///
/// Returns an empty list when the error is undefined.
pub fn sigma_intervals(value: f64, error: Option<f64>, sigmas: &[f64]) -> Vec<ConfidenceInterval> {
    let Some(error) = error else {
        return Vec::new();
    };
    sigmas
        .iter()
        .map(|&sigma| ConfidenceInterval {
            sigma,
            probability: sigma_to_probability(sigma),
            lower: value - sigma * error,
            upper: value + sigma * error,
        })
        .collect()
}

/// Two-sided coverage of a normal distribution within `sigma` standard deviations.
pub fn sigma_to_probability(sigma: f64) -> f64 {
    approximate_erf(sigma.abs() / std::f64::consts::SQRT_2)
}

// Abramowitz and Stegun 7.1.26, absolute error below 1.5e-7
fn approximate_erf(x: f64) -> f64 {
    let x_abs = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x_abs);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    let result = 1.0 - poly * (-x_abs * x_abs).exp();

    if x < 0.0 {
        -result
    } else {
        result
    }
}
