//! Parameter definition and implementation
//!
//! A [`Parameter`] is one named scalar of a curve's formula: its current value,
//! the value it was declared with, whether it is held fixed, its bounds, and the
//! two error estimates a completed least-squares fit leaves behind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parameters::bounds::{Bounds, BoundsError};

/// Errors that can occur when working with parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Bounds error: {0}")]
    BoundsError(#[from] BoundsError),

    #[error("Parameter '{name}' not found")]
    ParameterNotFound { name: String },

    #[error("Parameter '{name}' already exists")]
    DuplicateParameter { name: String },

    #[error("'{name}' is reserved for the formula and cannot be a parameter")]
    ReservedName { name: String },

    #[error("'{name}' is not a valid parameter name")]
    InvalidName { name: String },

    #[error("Parameter '{name}' must have a finite value, got {value}")]
    NonFiniteValue { name: String, value: f64 },
}

/// A named scalar of a curve's formula
///
/// Error estimates are `None` until a least-squares fit populates them, and are
/// cleared again by [`reset`](Parameter::reset) and by any write that makes them
/// stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name of the parameter
    pub name: String,

    /// Current value of the parameter
    value: f64,

    /// Value restored by [`reset`](Parameter::reset)
    init_value: f64,

    /// Excluded from the optimized vector when `true`
    #[serde(default)]
    fixed: bool,

    /// Minimum and maximum bounds for the parameter value
    #[serde(default)]
    bounds: Bounds,

    /// Standard error scaled by the residual variance
    #[serde(default)]
    error_posteriori: Option<f64>,

    /// Standard error from the supplied measurement errors alone
    #[serde(default)]
    error_priori: Option<f64>,
}

impl Parameter {
    /// Create a free, unbounded parameter
    ///
    /// # Examples
    ///
    /// ```
    /// use globfit_rs::parameters::Parameter;
    ///
    /// let param = Parameter::new("SN", 1.0);
    /// assert_eq!(param.name(), "SN");
    /// assert_eq!(param.value(), 1.0);
    /// assert!(!param.fixed());
    /// ```
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            init_value: value,
            fixed: false,
            bounds: Bounds::default(),
            error_posteriori: None,
            error_priori: None,
        }
    }

    /// Create a parameter held at `value`
    pub fn fixed_at(name: &str, value: f64) -> Self {
        Self {
            fixed: true,
            ..Self::new(name, value)
        }
    }

    /// Create a free parameter with bounds; the value is clamped into them
    ///
    /// ```
    /// use globfit_rs::parameters::Parameter;
    ///
    /// let param = Parameter::with_bounds("k", 12.0, 0.0, 10.0).unwrap();
    /// assert_eq!(param.value(), 10.0);
    /// ```
    pub fn with_bounds(name: &str, value: f64, min: f64, max: f64) -> Result<Self, ParameterError> {
        let bounds = Bounds::new(min, max)?;
        let value = bounds.clamp(value);

        Ok(Self {
            bounds,
            ..Self::new(name, value)
        })
    }

    /// Get the name of the parameter
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current value of the parameter
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Set the value of the parameter
    ///
    /// Fails if the value lies outside the bounds. Stale error estimates are
    /// cleared.
    pub fn set_value(&mut self, value: f64) -> Result<(), ParameterError> {
        if !self.bounds.is_within_bounds(value) {
            return Err(ParameterError::BoundsError(BoundsError::ValueOutsideBounds {
                value,
                min: self.bounds.min,
                max: self.bounds.max,
            }));
        }

        self.value = value;
        self.clear_errors();
        Ok(())
    }

    /// Overwrite the value with an optimizer result.
    ///
    /// No bounds check: orthogonal-distance fits ignore bounds and their result
    /// is written back as found.
    pub(crate) fn assign_fitted(&mut self, value: f64) {
        self.value = value;
    }

    /// Get the initial value of the parameter
    pub fn init_value(&self) -> f64 {
        self.init_value
    }

    /// Change the value restored by [`reset`](Parameter::reset)
    pub fn set_init_value(&mut self, value: f64) {
        self.init_value = value;
    }

    /// Reset the parameter to its initial value, clamped to the current bounds
    pub fn reset(&mut self) {
        self.value = self.bounds.clamp(self.init_value);
        self.clear_errors();
    }

    /// Whether the parameter is held constant during fits
    pub fn fixed(&self) -> bool {
        self.fixed
    }

    /// Hold the parameter constant (`true`) or let it vary (`false`)
    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    /// Get the minimum allowed value for the parameter
    pub fn min(&self) -> f64 {
        self.bounds.min
    }

    /// Get the maximum allowed value for the parameter
    pub fn max(&self) -> f64 {
        self.bounds.max
    }

    /// Get the bounds of the parameter
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Set the bounds for the parameter, clamping the current value into them
    pub fn set_bounds(&mut self, min: f64, max: f64) -> Result<(), ParameterError> {
        let bounds = Bounds::new(min, max)?;
        self.bounds = bounds;
        self.value = bounds.clamp(self.value);
        Ok(())
    }

    /// Set the minimum bound for the parameter
    pub fn set_min(&mut self, min: f64) -> Result<(), ParameterError> {
        self.set_bounds(min, self.bounds.max)
    }

    /// Set the maximum bound for the parameter
    pub fn set_max(&mut self, max: f64) -> Result<(), ParameterError> {
        self.set_bounds(self.bounds.min, max)
    }

    /// A posteriori standard error from the last fit, if defined
    pub fn error_posteriori(&self) -> Option<f64> {
        self.error_posteriori
    }

    /// A priori standard error from the last fit, if y-errors were supplied
    pub fn error_priori(&self) -> Option<f64> {
        self.error_priori
    }

    /// Store both error estimates
    pub fn set_errors(&mut self, posteriori: Option<f64>, priori: Option<f64>) {
        self.error_posteriori = posteriori;
        self.error_priori = priori;
    }

    /// Forget both error estimates
    pub fn clear_errors(&mut self) {
        self.error_posteriori = None;
        self.error_priori = None;
    }
}
