//! Parameter bounds
//!
//! Box constraints on a single parameter. Infinite limits mean "unbounded" and
//! serialize as `null`, so a bounds table survives a JSON round trip.

use std::f64::{INFINITY, NEG_INFINITY};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when working with parameter bounds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: min ({min}) must not exceed max ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Parameter value {value} is outside bounds: [{min}, {max}]")]
    ValueOutsideBounds { value: f64, min: f64, max: f64 },

    #[error("NaN is not a valid bound")]
    NanBound,
}

/// Represents the bounds constraints on a parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Minimum allowed value for the parameter
    pub min: f64,

    /// Maximum allowed value for the parameter
    pub max: f64,
}

impl Serialize for Bounds {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Bounds", 2)?;

        // Infinite limits are written as null
        let min = if self.min.is_finite() { Some(self.min) } else { None };
        let max = if self.max.is_finite() { Some(self.max) } else { None };
        state.serialize_field("min", &min)?;
        state.serialize_field("max", &max)?;

        state.end()
    }
}

impl<'de> Deserialize<'de> for Bounds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct BoundsHelper {
            #[serde(default)]
            min: Option<f64>,

            #[serde(default)]
            max: Option<f64>,
        }

        let helper = BoundsHelper::deserialize(deserializer)?;

        let min = helper.min.unwrap_or(NEG_INFINITY);
        let max = helper.max.unwrap_or(INFINITY);

        Bounds::new(min, max).map_err(serde::de::Error::custom)
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: NEG_INFINITY,
            max: INFINITY,
        }
    }
}

impl Bounds {
    /// Create a new bounds constraint with min and max values
    ///
    /// # Examples
    ///
    /// ```
    /// use globfit_rs::parameters::Bounds;
    ///
    /// let bounds = Bounds::new(0.0, 10.0).unwrap();
    /// assert_eq!(bounds.min, 0.0);
    /// assert_eq!(bounds.max, 10.0);
    /// assert!(Bounds::new(1.0, 0.0).is_err());
    /// ```
    pub fn new(min: f64, max: f64) -> Result<Self, BoundsError> {
        if min.is_nan() || max.is_nan() {
            return Err(BoundsError::NanBound);
        }
        if min > max {
            return Err(BoundsError::InvalidBounds { min, max });
        }

        Ok(Self { min, max })
    }

    /// Create an unbounded constraint (negative infinity to positive infinity)
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Create a bounds constraint with only a minimum value
    pub fn min_only(min: f64) -> Self {
        Self { min, max: INFINITY }
    }

    /// Create a bounds constraint with only a maximum value
    pub fn max_only(max: f64) -> Self {
        Self {
            min: NEG_INFINITY,
            max,
        }
    }

    /// Check if a value is within the bounds
    pub fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Check if the bounds are finite (both min and max are finite)
    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// Check whether either limit is finite
    pub fn is_bounded(&self) -> bool {
        self.has_lower_bound() || self.has_upper_bound()
    }

    /// Check if the parameter is bounded from below
    pub fn has_lower_bound(&self) -> bool {
        self.min.is_finite()
    }

    /// Check if the parameter is bounded from above
    pub fn has_upper_bound(&self) -> bool {
        self.max.is_finite()
    }

    /// Clamp a value to be within the bounds
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// The tightest bounds satisfying both `self` and `other`.
    ///
    /// Returns `None` when the two intervals do not overlap.
    ///
    /// ```
    /// use globfit_rs::parameters::Bounds;
    ///
    /// let a = Bounds::new(0.0, 5.0).unwrap();
    /// let b = Bounds::min_only(2.0);
    /// assert_eq!(a.intersect(&b), Some(Bounds::new(2.0, 5.0).unwrap()));
    /// assert_eq!(a.intersect(&Bounds::min_only(6.0)), None);
    /// ```
    pub fn intersect(&self, other: &Bounds) -> Option<Bounds> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        if min > max {
            None
        } else {
            Some(Bounds { min, max })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_creation() {
        // Valid bounds
        let bounds = Bounds::new(0.0, 10.0).unwrap();
        assert_eq!(bounds.min, 0.0);
        assert_eq!(bounds.max, 10.0);

        // Invalid bounds (min > max)
        let result = Bounds::new(10.0, 0.0);
        assert!(result.is_err());
        assert_eq!(Bounds::new(f64::NAN, 1.0), Err(BoundsError::NanBound));

        // Degenerate interval pins the value
        let bounds = Bounds::new(3.0, 3.0).unwrap();
        assert_eq!(bounds.clamp(10.0), 3.0);

        let bounds = Bounds::unbounded();
        assert_eq!(bounds.min, NEG_INFINITY);
        assert_eq!(bounds.max, INFINITY);
        assert!(!bounds.is_bounded());

        let bounds = Bounds::min_only(5.0);
        assert!(bounds.has_lower_bound());
        assert!(!bounds.has_upper_bound());
        assert!(bounds.is_bounded());

        let bounds = Bounds::max_only(15.0);
        assert!(!bounds.has_lower_bound());
        assert!(bounds.has_upper_bound());
    }

    #[test]
    fn test_is_within_bounds() {
        let bounds = Bounds::new(0.0, 10.0).unwrap();

        assert!(bounds.is_within_bounds(0.0));
        assert!(bounds.is_within_bounds(5.0));
        assert!(bounds.is_within_bounds(10.0));

        assert!(!bounds.is_within_bounds(-1.0));
        assert!(!bounds.is_within_bounds(11.0));
        assert!(!bounds.is_within_bounds(f64::NAN));
    }

    #[test]
    fn test_clamp() {
        let bounds = Bounds::new(0.0, 10.0).unwrap();

        assert_eq!(bounds.clamp(-5.0), 0.0);
        assert_eq!(bounds.clamp(5.0), 5.0);
        assert_eq!(bounds.clamp(15.0), 10.0);
    }

    #[test]
    fn test_intersect() {
        let a = Bounds::new(0.0, 10.0).unwrap();
        assert_eq!(a.intersect(&Bounds::unbounded()), Some(a));
        assert_eq!(
            a.intersect(&Bounds::max_only(4.0)),
            Some(Bounds::new(0.0, 4.0).unwrap())
        );
        assert_eq!(
            a.intersect(&Bounds::new(10.0, 12.0).unwrap()),
            Some(Bounds::new(10.0, 10.0).unwrap())
        );
        assert_eq!(a.intersect(&Bounds::new(11.0, 12.0).unwrap()), None);
    }

    #[test]
    fn test_serde_infinite_as_null() {
        let json = serde_json::to_string(&Bounds::min_only(1.5)).unwrap();
        assert_eq!(json, r#"{"min":1.5,"max":null}"#);

        let bounds: Bounds = serde_json::from_str(r#"{"max":2.0}"#).unwrap();
        assert_eq!(bounds, Bounds::max_only(2.0));

        assert!(serde_json::from_str::<Bounds>(r#"{"min":3.0,"max":2.0}"#).is_err());
    }
}
