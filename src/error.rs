use thiserror::Error;

use crate::formula::{CompileError, EvalError, FormulaFileError};
use crate::parameters::{BoundsError, ParameterError};

/// Problems with the shape of a fit request, detected before any optimizer runs.
///
/// These never leave side effects behind: parameters and curves are untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// Nothing to fit.
    #[error("no active dataset/curve pair")]
    NoActivePairs,

    /// Every parameter of every active curve is fixed.
    #[error("no free parameters to optimize")]
    NoFreeParameters,

    /// The active datasets have no selected points.
    #[error("no selected data points in the active datasets")]
    NoActivePoints,

    /// Shared parameter whose bounds have an empty intersection across curves.
    #[error(
        "conflicting bounds for shared parameter '{name}': [{lower}, {upper}] does not intersect [{other_lower}, {other_upper}]"
    )]
    ConflictingBounds {
        name: String,
        lower: f64,
        upper: f64,
        other_lower: f64,
        other_upper: f64,
    },

    /// Shared parameter that is fixed in one curve and free in another.
    #[error("shared parameter '{name}' is fixed in curve '{fixed_in}' but free in curve '{free_in}'")]
    ConflictingFixedFlags {
        name: String,
        fixed_in: String,
        free_in: String,
    },

    /// A curve's formula reads a parameter its parameter set no longer declares.
    #[error("curve '{curve}' has no parameter '{name}'")]
    MissingParameter { curve: String, name: String },

    /// Dataset arrays that violate the length or error-model invariants.
    #[error("invalid dataset: {0}")]
    InvalidDataSet(String),
}

/// Error types for the globfit-rs library.
#[derive(Error, Debug)]
pub enum GlobFitError {
    /// A formula failed to compile.
    #[error("Formula error: {0}")]
    Compile(#[from] CompileError),

    /// A formula could not be evaluated against the supplied parameters.
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvalError),

    /// The fit request is malformed.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Error for parameter-related problems.
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    /// Error for invalid bounds.
    #[error("Bounds error: {0}")]
    Bounds(#[from] BoundsError),

    /// A formula file could not be read.
    #[error("Formula file error: {0}")]
    FormulaFile(#[from] FormulaFileError),

    /// Error indicating a mismatch in vector or matrix dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error indicating a singular matrix was encountered.
    #[error("Singular matrix encountered")]
    SingularMatrix,

    /// Error indicating the algorithm failed to converge.
    #[error("Algorithm failed to converge: {0}")]
    ConvergenceFailure(String),

    /// Error during function evaluation.
    #[error("Function evaluation error: {0}")]
    FunctionEvaluation(String),

    /// Invalid input data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Linear algebra error.
    #[error("Linear algebra error: {0}")]
    LinearAlgebraError(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for globfit-rs operations.
pub type Result<T> = std::result::Result<T, GlobFitError>;
