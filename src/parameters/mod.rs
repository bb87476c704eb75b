//! # Parameter System
//!
//! Named scalars of a curve's formula.
//!
//! - [`Parameter`]: value, initial value, fixed flag, bounds and the two error
//!   estimates a fit leaves behind
//! - [`ParameterSet`]: the ordered parameters of one curve
//! - [`Bounds`]: box constraints, with intersection for shared parameters
//!
//! ```rust
//! use globfit_rs::parameters::ParameterSet;
//!
//! let mut params = ParameterSet::new();
//! params.add_param("SN", 1.0).unwrap();
//! params.add_fixed("slopeN", 0.0).unwrap();
//! params.add_param_with_bounds("k", 0.5, 0.0, f64::INFINITY).unwrap();
//!
//! assert_eq!(params.free().len(), 2);
//! ```

pub mod bounds;
pub mod parameter;
pub mod set;

// Re-export key types
pub use bounds::{Bounds, BoundsError};
pub use parameter::{Parameter, ParameterError};
pub use set::{validate_name, ParameterSet};
