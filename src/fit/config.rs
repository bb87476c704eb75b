//! Configuration of a least-squares fit.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lm::LmConfig;
use crate::problem::DEFAULT_PENALTY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Solver settings, shared by all three backends
    pub solver: LmConfig,

    /// Residual substituted for NaN or infinite residuals while iterating
    pub penalty: f64,

    /// Widths, in standard errors, of the reported parameter intervals
    pub sigma_levels: Vec<f64>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            solver: LmConfig::default(),
            penalty: DEFAULT_PENALTY,
            sigma_levels: vec![1.0, 2.0],
        }
    }
}

impl FitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_solver(mut self, solver: LmConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.solver.max_iterations = max_iterations;
        self
    }

    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn with_sigma_levels(mut self, sigma_levels: Vec<f64>) -> Self {
        self.sigma_levels = sigma_levels;
        self
    }
}
