//! Error types for full-order models, surrogates and reduced models.

use nmor_core::{BudgetExceeded, CoreError};
use nmor_registration::RegistrationError;
use thiserror::Error;

/// Main error type for `nmor-model`.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Invalid configuration or argument.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Training produced a non-finite loss.
    #[error("Training diverged: {0}")]
    Diverged(String),

    /// A normalization range collapsed to a single value.
    #[error("Degenerate normalization: {0}")]
    DegenerateNormalization(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Training ran out of time or was cancelled.
    #[error("Training stopped: {0}")]
    Budget(#[from] BudgetExceeded),

    /// Network weights could not be recorded or restored.
    #[error("Record error: {0}")]
    Record(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The artifact was written by another program.
    #[error("Format mismatch: expected {expected}, found {found}")]
    FormatMismatch {
        expected: &'static str,
        found: String,
    },

    /// The artifact was written by an unsupported version.
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// Conversion between host data and tensors failed.
    #[error("Tensor conversion error: {0}")]
    Tensor(String),
}

/// Result type for `nmor-model` operations.
pub type Result<T> = std::result::Result<T, ModelError>;

impl ModelError {
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn diverged(msg: impl Into<String>) -> Self {
        Self::Diverged(msg.into())
    }

    pub fn degenerate_normalization(msg: impl Into<String>) -> Self {
        Self::DegenerateNormalization(msg.into())
    }

    pub fn record(msg: impl Into<String>) -> Self {
        Self::Record(msg.into())
    }

    pub fn tensor(msg: impl Into<String>) -> Self {
        Self::Tensor(msg.into())
    }

    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Whether the error comes from an exhausted budget.
    pub fn is_budget_exceeded(&self) -> bool {
        match self {
            Self::Budget(_) | Self::Core(CoreError::Budget(_)) => true,
            Self::Registration(err) => err.is_budget_exceeded(),
            _ => false,
        }
    }
}
