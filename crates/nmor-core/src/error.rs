//! Error types for field, flow, sampling and decomposition operations.

use thiserror::Error;

use crate::budget::BudgetExceeded;

/// Main error type for `nmor-core`.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid configuration or argument.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A sampling mode other than the supported ones was requested.
    #[error("Unsupported sampling mode: {0}")]
    UnsupportedSamplingMode(String),

    /// Shape mismatch between two fields or between a field and its data.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Numerical instability (NaN, Inf, singular products).
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Conversion between host arrays and backend tensors failed.
    #[error("Tensor conversion error: {0}")]
    Tensor(String),

    /// A collaborator ran out of time or was cancelled.
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),

    /// I/O error while writing a field.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for `nmor-core` operations.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a numerical instability error.
    pub fn numerical_instability(msg: impl Into<String>) -> Self {
        Self::NumericalInstability(msg.into())
    }

    /// Create a tensor conversion error.
    pub fn tensor(msg: impl Into<String>) -> Self {
        Self::Tensor(msg.into())
    }

    /// Create a shape mismatch error.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
