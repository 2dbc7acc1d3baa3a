//! Error types for the outliers crate

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, OutlierError>;

/// Errors surfaced by detector construction, fitting, and scoring
#[derive(Debug, Error)]
pub enum OutlierError {
    /// Invalid hyperparameter, rejected at construction time
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Scoring or prediction requested before a successful fit
    #[error("Detector has not been fitted")]
    NotFitted,

    /// Malformed input data (non-finite entries, empty matrix, ...)
    #[error("Data error: {0}")]
    Data(String),

    /// Input shape does not match the fitted model
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Numerical failure (singular matrix, failed factorization, ...)
    #[error("Computation error: {0}")]
    Computation(String),
}
