//! Command-line options shared by the subcommands and persisted next to a model.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use nmor_core::{CauchyNavierOperator, Restriction};
use nmor_model::AnalyticalModel;
use nmor_reduction::{FailurePolicy, ProductKind, RegistrationStrategy};
use nmor_registration::{ConsoleProgressCallback, RegistrationParams, StationaryVelocityShooting};
use serde::{Deserialize, Serialize};

use crate::burgers;

/// File holding the [`Setup`] of a reduced model.
pub const SETUP_FILE: &str = "setup.json";

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct ExampleArgs {
    /// Number of spatial grid points
    #[arg(long, default_value_t = 100)]
    pub n_x: usize,

    /// Number of time steps
    #[arg(long, default_value_t = 100)]
    pub n_t: usize,

    /// Width of the tanh profile replacing the shock, 0 for a sharp jump
    #[arg(long, default_value_t = 0.0)]
    pub smoothing: f64,
}

impl ExampleArgs {
    pub fn build(&self) -> Result<AnalyticalModel> {
        burgers::moving_shock(self.n_x, self.n_t, self.smoothing)
            .context("Failed to set up the Burgers example")
    }
}

#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct OracleArgs {
    /// Weight of the Laplacian in the Cauchy-Navier operator
    #[arg(long, default_value_t = 0.01)]
    pub alpha: f64,

    /// Power of the Cauchy-Navier operator
    #[arg(long, default_value_t = 1)]
    pub exponent: usize,

    /// Weight of the identity in the Cauchy-Navier operator
    #[arg(long, default_value_t = 1.0)]
    pub gamma: f64,

    /// Steps used to integrate a velocity field over unit time
    #[arg(long, default_value_t = 30)]
    pub time_steps: usize,
}

impl OracleArgs {
    pub fn build(&self) -> Result<StationaryVelocityShooting> {
        let operator = CauchyNavierOperator::new(self.alpha, self.exponent, self.gamma)
            .context("Invalid Cauchy-Navier operator")?;
        let oracle = StationaryVelocityShooting::new(operator)
            .with_time_steps(self.time_steps)
            .context("Invalid number of time steps")?
            .with_callback(Arc::new(ConsoleProgressCallback::default()));
        Ok(oracle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FailureArg {
    Abort,
    Skip,
    Retry,
}

#[derive(Debug, Clone, Args)]
pub struct RegistrationArgs {
    /// Registration parameter `sigma`
    #[arg(long, default_value_t = 0.1)]
    pub sigma: f64,

    /// Maximum number of optimizer iterations per registration
    #[arg(long, default_value_t = 20)]
    pub iterations: usize,

    /// Learning rate of the registration optimizer
    #[arg(long, default_value_t = 0.05)]
    pub registration_learning_rate: f64,

    /// Margin in grid points excluded from the intensity term
    #[arg(long, default_value_t = 0)]
    pub oversampling_size: usize,

    /// Number of parallel registrations
    #[arg(long, default_value_t = 1)]
    pub num_workers: usize,

    /// Start every registration from a zero velocity field
    #[arg(long)]
    pub no_reuse: bool,

    /// Use the L2 product instead of the Cauchy-Navier operator for POD
    #[arg(long)]
    pub l2_product: bool,

    /// What to do when a registration fails
    #[arg(long, value_enum, default_value_t = FailureArg::Abort)]
    pub on_failure: FailureArg,

    /// Retries per parameter with `--on-failure retry`
    #[arg(long, default_value_t = 1)]
    pub retry_attempts: usize,

    /// Time limit per registration in seconds
    #[arg(long)]
    pub registration_timeout: Option<f64>,
}

impl RegistrationArgs {
    pub fn params(&self, shape: [usize; 2]) -> Result<RegistrationParams> {
        let mut params = RegistrationParams::new()
            .with_sigma(self.sigma)
            .with_iterations(self.iterations)
            .with_learning_rate(self.registration_learning_rate);
        if self.oversampling_size > 0 {
            let restriction = Restriction::from_margin(shape, self.oversampling_size)
                .context("Oversampling margin does not fit the grid")?;
            params = params.with_restriction(restriction);
        }
        Ok(params)
    }

    pub fn strategy(&self) -> RegistrationStrategy {
        RegistrationStrategy::from_workers(self.num_workers, !self.no_reuse)
    }

    pub fn product(&self) -> ProductKind {
        if self.l2_product {
            ProductKind::L2
        } else {
            ProductKind::CauchyNavier
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        match self.on_failure {
            FailureArg::Abort => FailurePolicy::Abort,
            FailureArg::Skip => FailurePolicy::Skip,
            FailureArg::Retry => FailurePolicy::Retry {
                attempts: self.retry_attempts,
            },
        }
    }

    pub fn timeout(&self) -> Result<Option<Duration>> {
        self.registration_timeout
            .map(|secs| Duration::try_from_secs_f64(secs).context("Invalid registration timeout"))
            .transpose()
    }
}

/// Everything needed to rebuild the full-order model and the oracle of a saved model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setup {
    pub example: ExampleArgs,
    pub oracle: OracleArgs,
}

impl Setup {
    pub fn save(&self, dir: &Path) -> Result<()> {
        write_json(&dir.join(SETUP_FILE), self)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SETUP_FILE);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration_args() -> RegistrationArgs {
        RegistrationArgs {
            sigma: 0.1,
            iterations: 20,
            registration_learning_rate: 0.05,
            oversampling_size: 0,
            num_workers: 1,
            no_reuse: false,
            l2_product: false,
            on_failure: FailureArg::Abort,
            retry_attempts: 1,
            registration_timeout: None,
        }
    }

    #[test]
    fn test_setup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let setup = Setup {
            example: ExampleArgs {
                n_x: 40,
                n_t: 20,
                smoothing: 0.01,
            },
            oracle: OracleArgs {
                alpha: 0.1,
                exponent: 2,
                gamma: 1.0,
                time_steps: 10,
            },
        };
        setup.save(dir.path()).unwrap();
        let loaded = Setup::load(dir.path()).unwrap();
        assert_eq!(loaded.example.n_x, 40);
        assert_eq!(loaded.oracle.exponent, 2);
        assert!(loaded.oracle.build().is_ok());
    }

    #[test]
    fn test_registration_args_mapping() {
        let mut args = registration_args();
        assert_eq!(
            args.strategy(),
            RegistrationStrategy::SequentialWarmStart {
                reuse_vector_fields: true
            }
        );
        assert_eq!(args.product(), ProductKind::CauchyNavier);
        assert_eq!(args.failure_policy(), FailurePolicy::Abort);

        args.num_workers = 4;
        args.on_failure = FailureArg::Retry;
        args.retry_attempts = 3;
        args.l2_product = true;
        assert_eq!(
            args.strategy(),
            RegistrationStrategy::IndependentParallel { num_workers: 4 }
        );
        assert_eq!(args.failure_policy(), FailurePolicy::Retry { attempts: 3 });
        assert_eq!(args.product(), ProductKind::L2);
    }

    #[test]
    fn test_oversampling_margin() {
        let mut args = registration_args();
        assert!(args.params([20, 10]).unwrap().restriction.is_none());
        args.oversampling_size = 2;
        assert!(args.params([20, 10]).unwrap().restriction.is_some());
        args.oversampling_size = 10;
        assert!(args.params([20, 10]).is_err());
    }

    #[test]
    fn test_invalid_oracle_settings() {
        let oracle = OracleArgs {
            alpha: -1.0,
            exponent: 1,
            gamma: 1.0,
            time_steps: 10,
        };
        assert!(oracle.build().is_err());
    }
}
