//! Utility functions and helpers for the globfit-rs library.

pub mod finite_difference;
pub mod matrix_convert;

// Re-export commonly used utilities
pub use finite_difference::{gradient, jacobian};
pub use matrix_convert::{
    nalgebra_to_ndarray, nalgebra_vec_to_ndarray, ndarray_to_nalgebra, ndarray_vec_to_nalgebra,
};
