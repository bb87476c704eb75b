//! Least-squares fitting of a [`GlobalFitSpec`](crate::spec::GlobalFitSpec).
//!
//! The backend is chosen per call:
//!
//! - any active dataset with x-errors: orthogonal distance regression
//!   (Levenberg-Marquardt on the augmented residuals; bounds are not enforced
//!   and a [`Notice::OdrIgnoresBounds`] says so)
//! - otherwise, any finite bound on a free parameter: trust-region reflective
//! - otherwise: Levenberg-Marquardt

mod config;
mod fitter;
mod outcome;

pub use config::FitConfig;
pub use fitter::Fitter;
pub use outcome::{FitMethod, FitOutcome, FitState, FittedParameter, Notice, Stage};
