//! Registration interface used by the reduction pipeline.

use std::fmt;
use std::time::Duration;

use nmor_core::{
    ExecutionBudget, ProductOperator, Restriction, SamplerOptions, ScalarField,
    TimeDependentVelocityField, VelocityField,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::validation::ValidationConfig;

/// Stop once the energy stalls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub min_improvement: f64,
    pub patience: usize,
}

impl Default for EarlyStopping {
    fn default() -> Self {
        Self {
            min_improvement: 1e-7,
            patience: 20,
        }
    }
}

/// Parameters of a single registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationParams {
    /// Weight of the intensity term is `1 / sigma^2`.
    pub sigma: f64,
    /// Maximum number of optimizer iterations.
    pub iterations: usize,
    pub learning_rate: f64,
    /// Stop when the gradient norm falls below this value.
    pub gradient_tolerance: f64,
    /// Window entering the intensity term; the whole grid if unset.
    pub restriction: Option<Restriction>,
    pub early_stopping: Option<EarlyStopping>,
    pub validation: ValidationConfig,
    /// Iterations between progress log lines.
    pub log_interval: usize,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            sigma: 0.1,
            iterations: 200,
            learning_rate: 0.05,
            gradient_tolerance: 1e-8,
            restriction: None,
            early_stopping: Some(EarlyStopping::default()),
            validation: ValidationConfig::default(),
            log_interval: 50,
        }
    }
}

impl RegistrationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_gradient_tolerance(mut self, tolerance: f64) -> Self {
        self.gradient_tolerance = tolerance;
        self
    }

    pub fn with_restriction(mut self, restriction: Restriction) -> Self {
        self.restriction = Some(restriction);
        self
    }

    pub fn with_early_stopping(mut self, early_stopping: EarlyStopping) -> Self {
        self.early_stopping = Some(early_stopping);
        self
    }

    pub fn without_early_stopping(mut self) -> Self {
        self.early_stopping = None;
        self
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_log_interval(mut self, log_interval: usize) -> Self {
        self.log_interval = log_interval;
        self
    }
}

/// Why the optimization ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    MaxIterations,
    EarlyStopping,
    GradientTolerance,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::MaxIterations => "maximum number of iterations reached",
            StopReason::EarlyStopping => "energy stopped improving",
            StopReason::GradientTolerance => "gradient norm below tolerance",
        };
        f.write_str(text)
    }
}

/// Outcome of a registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResult {
    /// Optimized initial velocity field.
    pub initial_vector_field: VelocityField,
    /// Velocity trajectory generated by the initial field.
    pub vector_fields: TimeDependentVelocityField,
    /// Reference transported along the optimized flow.
    pub transformed_input: ScalarField,
    pub iterations: usize,
    pub time: Duration,
    pub energy_regularizer: f64,
    pub energy_intensity_unscaled: f64,
    pub energy_intensity: f64,
    pub energy: f64,
    pub norm_gradient: f64,
    pub reason_ended: StopReason,
}

impl RegistrationResult {
    /// `||target - transformed_input|| / ||target||`.
    pub fn relative_mapping_error(&self, target: &ScalarField) -> Result<f64> {
        Ok(self.transformed_input.relative_error(target)?)
    }
}

/// Registers a target against a reference by an initial velocity field.
pub trait RegistrationOracle: Send + Sync + fmt::Debug {
    /// Find `v0` such that transporting `reference` along its flow matches `target`.
    ///
    /// `initial` warm-starts the optimization; `None` starts from zero.
    fn register(
        &self,
        reference: &ScalarField,
        target: &ScalarField,
        initial: Option<&VelocityField>,
        params: &RegistrationParams,
        budget: &ExecutionBudget,
    ) -> Result<RegistrationResult>;

    /// Velocity trajectory generated by an initial velocity field.
    fn integrate_forward_vector_field(
        &self,
        initial: &VelocityField,
    ) -> Result<TimeDependentVelocityField>;

    fn sampler_options(&self) -> SamplerOptions;

    /// Inner product on velocity fields used by the regularizer.
    fn product_operator(&self) -> &dyn ProductOperator;

    /// Transport `reference` along the flow generated by `initial`.
    fn transport(&self, reference: &ScalarField, initial: &VelocityField) -> Result<ScalarField> {
        let flow = self
            .integrate_forward_vector_field(initial)?
            .integrate(&self.sampler_options())?;
        Ok(reference.push_forward(&flow)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_builder() {
        let params = RegistrationParams::new()
            .with_sigma(0.05)
            .with_iterations(10)
            .without_early_stopping();
        assert_eq!(params.sigma, 0.05);
        assert_eq!(params.iterations, 10);
        assert!(params.early_stopping.is_none());
    }

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(
            StopReason::MaxIterations.to_string(),
            "maximum number of iterations reached"
        );
    }
}
