//! Damped least-squares solvers.
//!
//! [`LevenbergMarquardt`] handles unconstrained problems (and orthogonal
//! distance problems, whose extra variables are unconstrained by nature).
//! [`TrustRegionReflective`] handles problems with finite bounds. Both share
//! [`LmConfig`], the step solver and the damping controller.

pub mod algorithm;
pub mod config;
pub mod convergence;
pub mod reflective;
pub mod step;
pub mod trust_region;

pub use algorithm::{LevenbergMarquardt, LmResult};
pub use config::LmConfig;
pub use convergence::{ConvergenceCriteria, ConvergenceStatus};
pub use reflective::TrustRegionReflective;
pub use step::{LmStep, StepResult};
pub use trust_region::TrustRegion;
