//! Validation of registration inputs and numerical stability checks.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};
use nmor_core::{Restriction, ScalarField, VelocityField};
use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, Result};

/// Validation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Gradient norm at which the optimizer clips.
    pub max_gradient_norm: Option<f64>,
    /// Largest admissible velocity component, in grid nodes.
    pub max_velocity: Option<f64>,
    /// Fail on non-finite energies.
    pub check_numerical_stability: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_gradient_norm: Some(1000.0),
            max_velocity: Some(1e6),
            check_numerical_stability: true,
        }
    }
}

impl ValidationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_gradient_norm(mut self, norm: f64) -> Self {
        self.max_gradient_norm = Some(norm);
        self
    }

    pub fn without_gradient_clipping(mut self) -> Self {
        self.max_gradient_norm = None;
        self
    }

    pub fn with_max_velocity(mut self, max_velocity: f64) -> Self {
        self.max_velocity = Some(max_velocity);
        self
    }

    pub fn without_numerical_checks(mut self) -> Self {
        self.check_numerical_stability = false;
        self
    }
}

/// Reference and target must live on the same grid.
pub fn validate_field_shapes(reference: &ScalarField, target: &ScalarField) -> Result<()> {
    if reference.shape() != target.shape() {
        return Err(RegistrationError::ShapeMismatch {
            expected: reference.shape().to_vec(),
            actual: target.shape().to_vec(),
        });
    }
    Ok(())
}

/// A warm-start field must match the grid of the reference.
pub fn validate_initial_field(initial: &VelocityField, shape: [usize; 2]) -> Result<()> {
    if initial.spatial_shape() != shape {
        return Err(RegistrationError::ShapeMismatch {
            expected: vec![2, shape[0], shape[1]],
            actual: initial.shape().to_vec(),
        });
    }
    Ok(())
}

pub fn validate_restriction(restriction: &Restriction, shape: [usize; 2]) -> Result<()> {
    restriction.validate(shape).map_err(RegistrationError::from)
}

pub fn validate_learning_rate(lr: f64) -> Result<()> {
    if !(lr > 0.0) {
        return Err(RegistrationError::invalid_configuration(format!(
            "Learning rate must be positive, got {}",
            lr
        )));
    }
    if lr > 10.0 {
        return Err(RegistrationError::invalid_configuration(format!(
            "Learning rate too large: {}",
            lr
        )));
    }
    Ok(())
}

pub fn validate_iterations(iterations: usize) -> Result<()> {
    if iterations == 0 {
        return Err(RegistrationError::invalid_configuration(
            "Iterations must be positive",
        ));
    }
    if iterations > 1_000_000 {
        return Err(RegistrationError::invalid_configuration(format!(
            "Iterations too large: {}",
            iterations
        )));
    }
    Ok(())
}

/// `sigma` weighs the intensity term as `1 / sigma^2`.
pub fn validate_sigma(sigma: f64) -> Result<()> {
    if !(sigma > 0.0) || !sigma.is_finite() {
        return Err(RegistrationError::invalid_configuration(format!(
            "sigma must be positive and finite, got {}",
            sigma
        )));
    }
    Ok(())
}

pub fn validate_time_steps(time_steps: usize) -> Result<()> {
    if time_steps == 0 {
        return Err(RegistrationError::invalid_configuration(
            "Number of time steps must be positive",
        ));
    }
    Ok(())
}

/// Fail on a non-finite energy term.
pub fn validate_energy(name: &str, value: f64, config: &ValidationConfig) -> Result<()> {
    if config.check_numerical_stability && !value.is_finite() {
        return Err(RegistrationError::numerical_instability(format!(
            "{} became non-finite ({})",
            name, value
        )));
    }
    Ok(())
}

/// Fail if the velocity left the admissible range.
pub fn validate_velocity<B: Backend, const D: usize>(
    velocity: &Tensor<B, D>,
    config: &ValidationConfig,
) -> Result<()> {
    let Some(max_velocity) = config.max_velocity else {
        return Ok(());
    };
    let largest = velocity.clone().abs().max().into_scalar().elem::<f64>();
    if !(largest <= max_velocity) {
        return Err(RegistrationError::numerical_instability(format!(
            "Velocity magnitude {:.6e} exceeds {:.6e}",
            largest, max_velocity
        )));
    }
    Ok(())
}
