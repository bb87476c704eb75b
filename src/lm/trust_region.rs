//! Damping control shared by the least-squares solvers.
//!
//! The damping parameter adapts to the agreement between the predicted and the
//! actual reduction in cost.

use super::config::LmConfig;

/// Damping-parameter controller.
#[derive(Debug, Clone)]
pub struct TrustRegion {
    /// Current value of the damping parameter
    pub lambda: f64,

    /// Minimum allowed value for the damping parameter
    pub lambda_min: f64,

    /// Maximum allowed value for the damping parameter
    pub lambda_max: f64,

    /// Factor to increase lambda by when step is rejected
    pub lambda_increase_factor: f64,

    /// Factor to decrease lambda by when step is accepted
    pub lambda_decrease_factor: f64,

    /// Minimum gain ratio required to accept a step
    pub min_gain_ratio: f64,

    /// Gain ratio above which lambda is decreased
    pub good_gain_ratio: f64,
}

impl Default for TrustRegion {
    fn default() -> Self {
        Self::from_config(&LmConfig::default())
    }
}

impl TrustRegion {
    pub fn from_config(config: &LmConfig) -> Self {
        Self {
            lambda: config
                .initial_lambda
                .clamp(config.min_lambda, config.max_lambda),
            lambda_min: config.min_lambda,
            lambda_max: config.max_lambda,
            lambda_increase_factor: config.lambda_up_factor,
            lambda_decrease_factor: config.lambda_down_factor,
            min_gain_ratio: 1e-4,
            good_gain_ratio: 0.25,
        }
    }

    /// Updates the damping parameter based on the gain ratio.
    ///
    /// Returns whether the step that produced `gain_ratio` is accepted.
    pub fn update_lambda(&mut self, gain_ratio: f64) -> bool {
        if gain_ratio > self.min_gain_ratio {
            if gain_ratio > self.good_gain_ratio {
                self.lambda = (self.lambda * self.lambda_decrease_factor).max(self.lambda_min);
            }
            true
        } else {
            self.increase();
            false
        }
    }

    /// Increases lambda after a rejected or failed step.
    pub fn increase(&mut self) {
        self.lambda = (self.lambda * self.lambda_increase_factor).min(self.lambda_max);
    }

    pub fn at_maximum(&self) -> bool {
        self.lambda >= self.lambda_max
    }

    /// Ratio of actual to predicted reduction in cost.
    ///
    /// A non-finite new cost or a step with no actual reduction never gives a
    /// positive ratio.
    pub fn gain_ratio(current_cost: f64, new_cost: f64, predicted_reduction: f64) -> f64 {
        if !new_cost.is_finite() {
            return f64::NEG_INFINITY;
        }
        let actual_reduction = current_cost - new_cost;
        if predicted_reduction > 0.0 {
            actual_reduction / predicted_reduction
        } else if actual_reduction > 0.0 {
            1.0
        } else {
            0.0
        }
    }
}
