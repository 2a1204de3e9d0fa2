//! Error types for the reduction pipeline.

use std::path::PathBuf;

use nmor_core::{CoreError, Parameter};
use nmor_model::ModelError;
use nmor_registration::RegistrationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReductionError {
    /// Invalid configuration, rejected before any computation.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// POD kept no modes.
    #[error("Degenerate basis: {0}")]
    DegenerateBasis(String),

    /// A cached stage does not fit the snapshots it is attached to.
    #[error("Cache mismatch: expected {expected} entries, found {found}")]
    CacheMismatch { expected: usize, found: usize },

    /// Reading or writing a stage cache failed.
    #[error("Cache error at {path}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    /// Registration of one training parameter failed.
    #[error("Registration failed for mu={parameter}: {source}")]
    RegistrationFailed {
        parameter: Parameter,
        #[source]
        source: RegistrationError,
    },

    /// No training restart produced a network.
    #[error("All {0} training restarts failed")]
    AllRestartsFailed(usize),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The registration worker pool could not be built.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

pub type Result<T> = std::result::Result<T, ReductionError>;

impl ReductionError {
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn degenerate_basis(msg: impl Into<String>) -> Self {
        Self::DegenerateBasis(msg.into())
    }

    pub fn cache(path: impl Into<PathBuf>, source: bincode::Error) -> Self {
        Self::Cache {
            path: path.into(),
            source,
        }
    }

    pub fn cache_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::cache(path, Box::new(bincode::ErrorKind::Io(source)))
    }
}
