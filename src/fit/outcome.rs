//! Fit results, states and the notices a fit can raise.

use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lm::ConvergenceStatus;
use crate::uncertainty::ConfidenceInterval;

/// When during a fit a diagnostic was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// At the starting parameters
    Initial,
    /// At the parameters the solver stopped at
    Final,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Initial => f.write_str("initial"),
            Stage::Final => f.write_str("final"),
        }
    }
}

/// A non-fatal condition worth reporting to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notice {
    /// The fit used orthogonal distance regression, which does not enforce bounds.
    OdrIgnoresBounds { parameters: Vec<String> },

    /// The chosen search method cannot honour bounds.
    BoundsIgnoredByMethod { method: String, parameters: Vec<String> },

    /// A curve produced NaN or infinite values at some of its data points.
    InvalidModelValues {
        curve: String,
        count: usize,
        stage: Stage,
    },

    /// Parameter errors could not be estimated.
    ErrorsUndefined { reason: String },

    /// A shared parameter started from different values in different curves.
    SharedValueMismatch {
        name: String,
        used: f64,
        values: Vec<(String, f64)>,
    },

    /// Parameters declared on a curve that its formula never reads.
    UnusedParameters { curve: String, names: Vec<String> },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::OdrIgnoresBounds { parameters } if parameters.is_empty() => {
                write!(f, "orthogonal distance regression does not enforce parameter bounds")
            }
            Notice::OdrIgnoresBounds { parameters } => write!(
                f,
                "orthogonal distance regression ignored the bounds of: {}",
                parameters.join(", ")
            ),
            Notice::BoundsIgnoredByMethod { method, parameters } => write!(
                f,
                "{} does not support bounds; ignored for: {}",
                method,
                parameters.join(", ")
            ),
            Notice::InvalidModelValues { curve, count, stage } => write!(
                f,
                "curve '{}' has {} invalid model value(s) at the {} parameters",
                curve, count, stage
            ),
            Notice::ErrorsUndefined { reason } => {
                write!(f, "parameter errors are undefined: {}", reason)
            }
            Notice::SharedValueMismatch { name, used, values } => {
                let listed: Vec<String> = values
                    .iter()
                    .map(|(curve, value)| format!("{}={}", curve, value))
                    .collect();
                write!(
                    f,
                    "shared parameter '{}' has different starting values ({}); using {}",
                    name,
                    listed.join(", "),
                    used
                )
            }
            Notice::UnusedParameters { curve, names } => write!(
                f,
                "curve '{}' declares parameters its formula does not use: {}",
                curve,
                names.join(", ")
            ),
        }
    }
}

/// The least-squares backend used for a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitMethod {
    LevenbergMarquardt,
    TrustRegionReflective,
    OrthogonalDistance,
}

impl FitMethod {
    /// x-errors force orthogonal distance regression; otherwise finite bounds
    /// select the trust-region reflective solver.
    pub fn select(has_x_errors: bool, has_finite_bounds: bool) -> Self {
        if has_x_errors {
            FitMethod::OrthogonalDistance
        } else if has_finite_bounds {
            FitMethod::TrustRegionReflective
        } else {
            FitMethod::LevenbergMarquardt
        }
    }

    pub fn honours_bounds(&self) -> bool {
        matches!(self, FitMethod::TrustRegionReflective)
    }
}

impl fmt::Display for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FitMethod::LevenbergMarquardt => "Levenberg-Marquardt",
            FitMethod::TrustRegionReflective => "trust-region reflective",
            FitMethod::OrthogonalDistance => "orthogonal distance regression",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a [`Fitter`](super::Fitter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitState {
    Idle,
    Running,
    Converged,
    Failed { reason: String },
}

impl FitState {
    pub fn is_converged(&self) -> bool {
        matches!(self, FitState::Converged)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FitState::Failed { .. })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            FitState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for FitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitState::Idle => f.write_str("idle"),
            FitState::Running => f.write_str("running"),
            FitState::Converged => f.write_str("converged"),
            FitState::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// One free slot of a finished fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedParameter {
    pub name: String,
    pub value: f64,
    pub error_posteriori: Option<f64>,
    pub error_priori: Option<f64>,
    /// Read by more than one curve
    pub shared: bool,
    pub intervals: Vec<ConfidenceInterval>,
}

/// Everything a fit reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutcome {
    pub state: FitState,
    pub method: FitMethod,
    /// Free slots in vector order; values are only written back on convergence
    pub parameters: Vec<FittedParameter>,
    pub chi_square: f64,
    pub reduced_chi_square: Option<f64>,
    pub dof: Option<usize>,
    pub n_points: usize,
    pub n_free: usize,
    pub covariance: Option<Array2<f64>>,
    pub correlation: Option<Array2<f64>>,
    pub iterations: usize,
    pub evaluations: usize,
    pub jacobian_evaluations: usize,
    pub convergence: Option<ConvergenceStatus>,
    pub notices: Vec<Notice>,
}

impl FitOutcome {
    pub fn is_converged(&self) -> bool {
        self.state.is_converged()
    }

    pub fn parameter(&self, name: &str) -> Option<&FittedParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.parameter(name).map(|p| p.value)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for FitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fit ({}): {}", self.method, self.state)?;
        writeln!(
            f,
            "  points: {}, free parameters: {}, chi-square: {:.6e}",
            self.n_points, self.n_free, self.chi_square
        )?;
        if let Some(redchi) = self.reduced_chi_square {
            writeln!(f, "  reduced chi-square: {:.6e}", redchi)?;
        }
        for p in &self.parameters {
            match p.error_posteriori {
                Some(err) => writeln!(f, "  {} = {:.6e} +/- {:.3e}", p.name, p.value, err)?,
                None => writeln!(f, "  {} = {:.6e}", p.name, p.value)?,
            }
        }
        for notice in &self.notices {
            writeln!(f, "  note: {}", notice)?;
        }
        Ok(())
    }
}
