//! Configuration of a reduction run.

use std::path::PathBuf;
use std::time::Duration;

use nmor_model::TrainerConfig;
use nmor_registration::RegistrationParams;
use serde::{Deserialize, Serialize};

use crate::error::{ReductionError, Result};

/// How the training snapshots are registered against the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStrategy {
    /// Independent registrations on a fixed-size worker pool, always from a zero field.
    IndependentParallel { num_workers: usize },
    /// One registration at a time; with reuse, each starts from the previous result.
    SequentialWarmStart { reuse_vector_fields: bool },
}

impl Default for RegistrationStrategy {
    fn default() -> Self {
        Self::SequentialWarmStart {
            reuse_vector_fields: true,
        }
    }
}

impl RegistrationStrategy {
    /// Strategy for a worker count and a reuse flag.
    ///
    /// Reuse needs sequential registration, so it is dropped with a warning
    /// when more than one worker is requested.
    pub fn from_workers(num_workers: usize, reuse_vector_fields: bool) -> Self {
        if num_workers > 1 {
            if reuse_vector_fields {
                tracing::warn!(
                    "Reusing velocity fields not possible with {} workers ...",
                    num_workers
                );
            }
            Self::IndependentParallel { num_workers }
        } else {
            Self::SequentialWarmStart {
                reuse_vector_fields,
            }
        }
    }
}

/// What happens when registering one training parameter fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop the reduction with the registration error.
    #[default]
    Abort,
    /// Drop the parameter and continue.
    Skip,
    /// Retry from a zero initial field, then abort.
    Retry { attempts: usize },
}

/// Inner product used for POD and coefficient projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProductKind {
    L2,
    /// The regularizing operator of the registration oracle.
    #[default]
    CauchyNavier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionConfig {
    /// Requested number of POD modes.
    pub max_basis_size: usize,
    /// Number of independent network trainings.
    pub restarts: usize,
    pub hidden_layers: Vec<usize>,
    pub registration_params: RegistrationParams,
    pub trainer: TrainerConfig,
    pub strategy: RegistrationStrategy,
    pub product: ProductKind,
    /// Relative POD truncation tolerance.
    pub pod_rtol: f64,
    /// Absolute POD truncation tolerance.
    pub pod_atol: f64,
    /// Load the full solutions from this cache instead of solving.
    pub full_solutions_cache: Option<PathBuf>,
    /// Load the velocity fields from this cache instead of registering.
    pub velocity_fields_cache: Option<PathBuf>,
    /// Directory receiving the caches of computed stages.
    pub write_caches: Option<PathBuf>,
    /// Directory receiving per-parameter registration diagnostics.
    pub intermediate_results: Option<PathBuf>,
    pub registration_failure: FailurePolicy,
    pub registration_timeout: Option<Duration>,
    pub training_timeout: Option<Duration>,
    /// Seed of the training data shuffle and of the restart seeds.
    pub seed: u64,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            max_basis_size: 1,
            restarts: 10,
            hidden_layers: vec![20, 20, 20],
            registration_params: RegistrationParams::new().with_sigma(0.1).with_iterations(20),
            trainer: TrainerConfig::default(),
            strategy: RegistrationStrategy::default(),
            product: ProductKind::default(),
            pod_rtol: 1e-7,
            pod_atol: 0.0,
            full_solutions_cache: None,
            velocity_fields_cache: None,
            write_caches: None,
            intermediate_results: None,
            registration_failure: FailurePolicy::default(),
            registration_timeout: None,
            training_timeout: None,
            seed: 0,
        }
    }
}

impl ReductionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_basis_size(mut self, max_basis_size: usize) -> Self {
        self.max_basis_size = max_basis_size;
        self
    }

    pub fn with_restarts(mut self, restarts: usize) -> Self {
        self.restarts = restarts;
        self
    }

    pub fn with_hidden_layers(mut self, hidden_layers: Vec<usize>) -> Self {
        self.hidden_layers = hidden_layers;
        self
    }

    pub fn with_registration_params(mut self, params: RegistrationParams) -> Self {
        self.registration_params = params;
        self
    }

    pub fn with_trainer(mut self, trainer: TrainerConfig) -> Self {
        self.trainer = trainer;
        self
    }

    pub fn with_strategy(mut self, strategy: RegistrationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_product(mut self, product: ProductKind) -> Self {
        self.product = product;
        self
    }

    pub fn with_pod_tolerances(mut self, rtol: f64, atol: f64) -> Self {
        self.pod_rtol = rtol;
        self.pod_atol = atol;
        self
    }

    pub fn with_full_solutions_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.full_solutions_cache = Some(path.into());
        self
    }

    pub fn with_velocity_fields_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.velocity_fields_cache = Some(path.into());
        self
    }

    pub fn with_write_caches(mut self, dir: impl Into<PathBuf>) -> Self {
        self.write_caches = Some(dir.into());
        self
    }

    pub fn with_intermediate_results(mut self, dir: impl Into<PathBuf>) -> Self {
        self.intermediate_results = Some(dir.into());
        self
    }

    pub fn with_registration_failure(mut self, policy: FailurePolicy) -> Self {
        self.registration_failure = policy;
        self
    }

    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = Some(timeout);
        self
    }

    pub fn with_training_timeout(mut self, timeout: Duration) -> Self {
        self.training_timeout = Some(timeout);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_basis_size < 1 {
            return Err(ReductionError::invalid_configuration(
                "max_basis_size must be at least 1",
            ));
        }
        if self.restarts < 1 {
            return Err(ReductionError::invalid_configuration(
                "restarts must be at least 1",
            ));
        }
        if self.hidden_layers.contains(&0) {
            return Err(ReductionError::invalid_configuration(format!(
                "Hidden layer sizes must be positive, got {:?}",
                self.hidden_layers
            )));
        }
        if let RegistrationStrategy::IndependentParallel { num_workers: 0 } = self.strategy {
            return Err(ReductionError::invalid_configuration(
                "num_workers must be at least 1",
            ));
        }
        if !(self.pod_rtol >= 0.0) || !(self.pod_atol >= 0.0) {
            return Err(ReductionError::invalid_configuration(format!(
                "POD tolerances must be non-negative, got rtol={} atol={}",
                self.pod_rtol, self.pod_atol
            )));
        }
        self.trainer.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReductionConfig::default();
        assert_eq!(config.max_basis_size, 1);
        assert_eq!(config.restarts, 10);
        assert_eq!(config.hidden_layers, vec![20, 20, 20]);
        assert_eq!(config.registration_params.sigma, 0.1);
        assert_eq!(config.registration_params.iterations, 20);
        assert_eq!(config.registration_failure, FailurePolicy::Abort);
        assert_eq!(config.product, ProductKind::CauchyNavier);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_fails_fast() {
        assert!(ReductionConfig::new().with_max_basis_size(0).validate().is_err());
        assert!(ReductionConfig::new().with_restarts(0).validate().is_err());
        assert!(ReductionConfig::new()
            .with_hidden_layers(vec![4, 0])
            .validate()
            .is_err());
        assert!(ReductionConfig::new()
            .with_strategy(RegistrationStrategy::IndependentParallel { num_workers: 0 })
            .validate()
            .is_err());
    }

    #[test]
    fn test_strategy_from_workers() {
        assert_eq!(
            RegistrationStrategy::from_workers(4, true),
            RegistrationStrategy::IndependentParallel { num_workers: 4 }
        );
        assert_eq!(
            RegistrationStrategy::from_workers(1, true),
            RegistrationStrategy::SequentialWarmStart {
                reuse_vector_fields: true
            }
        );
        assert_eq!(
            RegistrationStrategy::from_workers(0, false),
            RegistrationStrategy::SequentialWarmStart {
                reuse_vector_fields: false
            }
        );
    }

    #[test]
    fn test_config_serde() {
        let config = ReductionConfig::new()
            .with_max_basis_size(3)
            .with_registration_failure(FailurePolicy::Retry { attempts: 2 })
            .with_training_timeout(Duration::from_secs(5));
        let bytes = bincode::serialize(&config).unwrap();
        let restored: ReductionConfig = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, config);
    }
}
