//! # globfit-rs
//!
//! `globfit-rs` fits user-written formulas to several datasets at once, with
//! parameters shared between curves by name.
//!
//! The library provides:
//! - A small formula language (`y = a * exp(-x / tau) + c`) compiled once and
//!   evaluated over whole x arrays
//! - Parameters with bounds and fixed flags, merged across curves into one
//!   global free-parameter vector
//! - Least-squares fitting with Levenberg-Marquardt, trust-region reflective
//!   (bounded) or orthogonal distance regression (x-errors), with a posteriori
//!   and a priori error estimates
//! - Cancellable direct minimization (Nelder-Mead, Powell, CG, BFGS) and
//!   random search for better starting values
//!
//! ## Basic Usage
//!
//! ```
//! use globfit_rs::{Curve, DataSet, Fitter, GlobalFitSpec};
//! use ndarray::array;
//!
//! let data = DataSet::new("decay", array![0.0, 1.0, 2.0, 3.0], array![2.0, 1.2, 0.75, 0.45]).unwrap();
//! let mut curve = Curve::from_formula("exp", "y = a * exp(-k * x)").unwrap();
//!
//! let outcome = {
//!     let mut spec = GlobalFitSpec::new().with_pair(&data, &mut curve);
//!     Fitter::default().fit(&mut spec).unwrap()
//! };
//! assert!(outcome.is_converged());
//! assert!(curve.parameters().get("a").unwrap().error_posteriori().is_some());
//! ```

pub mod error;

// Formula language
pub mod formula;

// Parameter system
pub mod parameters;

// Data model
pub mod curve;
pub mod dataset;
pub mod spec;

// Global parameter merge and residual assembly
pub mod problem;
pub mod registry;
pub mod residuals;

// Solvers
pub mod fit;
pub mod lm;
pub mod search;
pub mod uncertainty;

pub mod utils;

// Re-exports for convenience
pub use curve::Curve;
pub use dataset::DataSet;
pub use error::{ConfigurationError, GlobFitError, Result};
pub use fit::{FitConfig, FitMethod, FitOutcome, FitState, Fitter, Notice};
pub use formula::{CompiledFormula, FormulaFile};
pub use lm::{LevenbergMarquardt, LmConfig, TrustRegionReflective};
pub use parameters::{Bounds, Parameter, ParameterSet};
pub use problem::Problem;
pub use search::{
    CancelToken, MinimizeConfig, MinimizeMethod, Minimizer, RandomSearch, RandomSearchConfig,
    SearchOutcome,
};
pub use spec::GlobalFitSpec;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
