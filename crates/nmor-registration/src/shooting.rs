//! Registration by a stationary initial velocity field.
//!
//! The reference `u_ref` is transported along the flow `phi_v` generated by a
//! velocity field `v` held constant in time, and `v` minimizes
//!
//! E(v) = mean(v . L v) + mean_R((u_ref ∘ phi_v - u_target)^2) / sigma^2
//!
//! with `L` the Cauchy-Navier operator and `R` the restriction window. The
//! energy is differentiated with Burn autodiff and minimized with Adam.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use burn::backend::Autodiff;
use burn::grad_clipping::GradientClippingConfig;
use burn::module::{Module, Param};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};
use burn_ndarray::NdArray;
use nmor_core::flow::integrate_stationary;
use nmor_core::interpolation::warp_channels;
use nmor_core::{
    CauchyNavierOperator, ExecutionBudget, ProductOperator, Restriction, SamplerOptions,
    ScalarField, TimeDependentVelocityField, VelocityField,
};

use crate::error::{RegistrationError, Result};
use crate::oracle::{RegistrationOracle, RegistrationParams, RegistrationResult, StopReason};
use crate::progress::{
    ConsoleProgressCallback, EarlyStoppingCallback, ProgressCallback, ProgressTracker,
};
use crate::validation;

/// Backend on which the registration energy is differentiated.
pub type RegistrationBackend = Autodiff<NdArray<f32>>;

/// Trainable initial velocity field `[2, H, W]`.
#[derive(Module, Debug)]
struct InitialVelocity<B: Backend> {
    field: Param<Tensor<B, 3>>,
}

/// Scalar energy terms of one iterate.
struct Energy<B: Backend> {
    regularizer: Tensor<B, 1>,
    intensity_unscaled: Tensor<B, 1>,
    intensity: Tensor<B, 1>,
    total: Tensor<B, 1>,
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Stationary-velocity registration with a Cauchy-Navier regularizer.
#[derive(Clone)]
pub struct StationaryVelocityShooting {
    operator: CauchyNavierOperator,
    time_steps: usize,
    sampler: SamplerOptions,
    callbacks: Vec<Arc<dyn ProgressCallback>>,
}

impl fmt::Debug for StationaryVelocityShooting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationaryVelocityShooting")
            .field("operator", &self.operator)
            .field("time_steps", &self.time_steps)
            .field("sampler", &self.sampler)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Default for StationaryVelocityShooting {
    fn default() -> Self {
        Self {
            operator: CauchyNavierOperator::default(),
            time_steps: 30,
            sampler: SamplerOptions::default(),
            callbacks: Vec::new(),
        }
    }
}

impl StationaryVelocityShooting {
    /// Create a registration with the given regularizer.
    pub fn new(operator: CauchyNavierOperator) -> Self {
        Self {
            operator,
            ..Self::default()
        }
    }

    /// Number of steps used to integrate the velocity over unit time.
    pub fn with_time_steps(mut self, time_steps: usize) -> Result<Self> {
        validation::validate_time_steps(time_steps)?;
        self.time_steps = time_steps;
        Ok(self)
    }

    pub fn with_sampler_options(mut self, sampler: SamplerOptions) -> Self {
        self.sampler = sampler;
        self
    }

    /// Attach a callback notified on every registration.
    pub fn with_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn operator(&self) -> &CauchyNavierOperator {
        &self.operator
    }

    pub fn time_steps(&self) -> usize {
        self.time_steps
    }

    fn energy<B: Backend>(
        &self,
        velocity: Tensor<B, 3>,
        template: Tensor<B, 3>,
        target: Tensor<B, 2>,
        restriction: &Restriction,
        sigma: f64,
    ) -> (Energy<B>, Tensor<B, 2>) {
        let [_, h, w] = template.dims();
        let order = self.sampler.interpolation;

        let displacement = integrate_stationary(velocity.clone(), self.time_steps, order);
        let warped = warp_channels(template, displacement, order).reshape([h, w]);

        let residual = (warped.clone() - target)
            .slice([restriction.axis0.clone(), restriction.axis1.clone()]);
        let intensity_unscaled = residual.powf_scalar(2.0).mean();
        let intensity = intensity_unscaled.clone().div_scalar(sigma * sigma);
        let regularizer = self.operator.energy_tensor(velocity);
        let total = regularizer.clone() + intensity.clone();

        (
            Energy {
                regularizer,
                intensity_unscaled,
                intensity,
                total,
            },
            warped,
        )
    }

    fn validate(
        &self,
        reference: &ScalarField,
        target: &ScalarField,
        initial: Option<&VelocityField>,
        params: &RegistrationParams,
    ) -> Result<Restriction> {
        validation::validate_field_shapes(reference, target)?;
        validation::validate_sigma(params.sigma)?;
        validation::validate_iterations(params.iterations)?;
        validation::validate_learning_rate(params.learning_rate)?;
        let shape = reference.shape();
        if let Some(initial) = initial {
            validation::validate_initial_field(initial, shape)?;
        }
        let restriction = params
            .restriction
            .clone()
            .unwrap_or_else(|| Restriction::full(shape));
        validation::validate_restriction(&restriction, shape)?;
        Ok(restriction)
    }
}

impl RegistrationOracle for StationaryVelocityShooting {
    fn register(
        &self,
        reference: &ScalarField,
        target: &ScalarField,
        initial: Option<&VelocityField>,
        params: &RegistrationParams,
        budget: &ExecutionBudget,
    ) -> Result<RegistrationResult> {
        let restriction = self.validate(reference, target, initial, params)?;
        budget.check()?;

        let started = Instant::now();
        let device = Default::default();
        let [n0, n1] = reference.shape();

        let template = reference
            .to_tensor::<RegistrationBackend>(&device)
            .reshape([1, n0, n1]);
        let target_tensor = target.to_tensor::<RegistrationBackend>(&device);
        let start = match initial {
            Some(field) => field.to_tensor::<RegistrationBackend>(&device),
            None => Tensor::zeros([2, n0, n1], &device),
        };
        let mut module = InitialVelocity {
            field: Param::from_tensor(start),
        };

        let clipping = params
            .validation
            .max_gradient_norm
            .map(|norm| GradientClippingConfig::Norm(norm as f32));
        let mut optimizer = AdamConfig::new().with_grad_clipping(clipping).init();

        let mut tracker = ProgressTracker::new().with_callbacks(self.callbacks.iter().cloned());
        tracker.add_callback(Arc::new(ConsoleProgressCallback::new(params.log_interval)));
        let early_stopping = params
            .early_stopping
            .map(|e| Arc::new(EarlyStoppingCallback::new(e.min_improvement, e.patience)));
        if let Some(callback) = &early_stopping {
            tracker.add_callback(callback.clone());
        }
        tracker.start();

        let mut reason_ended = StopReason::MaxIterations;
        let mut iterations = 0;
        let mut norm_gradient = f64::INFINITY;

        for iteration in 0..params.iterations {
            if let Err(exceeded) = budget.check() {
                tracker.error(&exceeded.to_string());
                return Err(exceeded.into());
            }

            let velocity = module.field.val();
            let (energy, _) = self.energy(
                velocity.clone(),
                template.clone(),
                target_tensor.clone(),
                &restriction,
                params.sigma,
            );
            let energy_value = scalar(energy.total.clone());
            if let Err(err) = validation::validate_energy("energy", energy_value, &params.validation)
            {
                tracker.error(&err.to_string());
                return Err(err);
            }

            let grads = energy.total.backward();
            let gradient = velocity
                .grad(&grads)
                .ok_or_else(|| RegistrationError::optimizer("Velocity field has no gradient"))?;
            norm_gradient = scalar(gradient.powf_scalar(2.0).sum().sqrt());

            if norm_gradient <= params.gradient_tolerance {
                reason_ended = StopReason::GradientTolerance;
                break;
            }

            let grads = GradientsParams::from_grads(grads, &module);
            module = optimizer.step(params.learning_rate, module, grads);
            iterations = iteration + 1;

            tracker.update(
                iterations,
                Some(params.iterations),
                energy_value,
                params.learning_rate,
                &[
                    ("energy_regularizer", scalar(energy.regularizer)),
                    ("energy_intensity", scalar(energy.intensity)),
                    ("norm_gradient", norm_gradient),
                ],
            );

            if early_stopping.as_ref().is_some_and(|e| e.should_stop()) {
                reason_ended = StopReason::EarlyStopping;
                break;
            }
        }

        // Final energies on the optimized field, without gradient tracking
        let velocity = module.field.val().inner();
        validation::validate_velocity(&velocity, &params.validation)?;
        let (energy, warped) = self.energy(
            velocity.clone(),
            template.inner(),
            target_tensor.inner(),
            &restriction,
            params.sigma,
        );
        let energy_value = scalar(energy.total);
        validation::validate_energy("energy", energy_value, &params.validation)?;

        let initial_vector_field = VelocityField::from_tensor(velocity)?;
        let vector_fields = self.integrate_forward_vector_field(&initial_vector_field)?;
        let transformed_input = ScalarField::from_tensor(warped)?;
        tracker.complete(iterations, energy_value, params.learning_rate);

        Ok(RegistrationResult {
            initial_vector_field,
            vector_fields,
            transformed_input,
            iterations,
            time: started.elapsed(),
            energy_regularizer: scalar(energy.regularizer),
            energy_intensity_unscaled: scalar(energy.intensity_unscaled),
            energy_intensity: scalar(energy.intensity),
            energy: energy_value,
            norm_gradient,
            reason_ended,
        })
    }

    fn integrate_forward_vector_field(
        &self,
        initial: &VelocityField,
    ) -> Result<TimeDependentVelocityField> {
        Ok(TimeDependentVelocityField::stationary(
            initial.clone(),
            self.time_steps,
        )?)
    }

    fn sampler_options(&self) -> SamplerOptions {
        self.sampler
    }

    fn product_operator(&self) -> &dyn ProductOperator {
        &self.operator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::HistoryCallback;
    use nmor_core::{CancellationToken, SpaceTimeGrid};
    use std::time::Duration;

    fn bump(grid: &SpaceTimeGrid, center: f64) -> ScalarField {
        grid.sample(|x, _| (-(x - center).powi(2) / 0.02).exp())
    }

    fn oracle() -> StationaryVelocityShooting {
        StationaryVelocityShooting::default()
            .with_time_steps(4)
            .unwrap()
    }

    #[test]
    fn test_identical_fields_give_zero_velocity() {
        let grid = SpaceTimeGrid::unit(16, 6).unwrap();
        let u = bump(&grid, 0.5);
        let params = RegistrationParams::new().with_iterations(10);
        let result = oracle()
            .register(&u, &u, None, &params, &ExecutionBudget::unbounded())
            .unwrap();
        assert_eq!(result.reason_ended, StopReason::GradientTolerance);
        assert_eq!(result.iterations, 0);
        assert!(result.initial_vector_field.norm() < 1e-6);
        assert!(result.relative_mapping_error(&u).unwrap() < 1e-5);
    }

    #[test]
    fn test_registration_reduces_mismatch() {
        let grid = SpaceTimeGrid::unit(24, 4).unwrap();
        let reference = bump(&grid, 0.45);
        let target = bump(&grid, 0.55);
        let params = RegistrationParams::new()
            .with_sigma(0.02)
            .with_iterations(150)
            .with_learning_rate(0.1)
            .without_early_stopping();

        let history = Arc::new(HistoryCallback::new());
        let oracle = oracle().with_callback(history.clone());
        let result = oracle
            .register(&reference, &target, None, &params, &ExecutionBudget::unbounded())
            .unwrap();

        let before = reference.relative_error(&target).unwrap();
        let after = result.relative_mapping_error(&target).unwrap();
        assert!(after < 0.5 * before, "error {after} vs {before}");
        assert_eq!(history.get_history().len(), result.iterations);
        assert!(result.energy.is_finite());
        assert_eq!(result.vector_fields.time_steps(), 4);
    }

    #[test]
    fn test_transport_matches_transformed_input() {
        let grid = SpaceTimeGrid::unit(20, 4).unwrap();
        let reference = bump(&grid, 0.45);
        let target = bump(&grid, 0.5);
        let params = RegistrationParams::new().with_iterations(20);
        let oracle = oracle();
        let result = oracle
            .register(&reference, &target, None, &params, &ExecutionBudget::unbounded())
            .unwrap();
        let transported = oracle
            .transport(&reference, &result.initial_vector_field)
            .unwrap();
        assert!(transported.difference(&result.transformed_input).unwrap().norm() < 1e-4);
    }

    #[test]
    fn test_cancelled_budget_stops_registration() {
        let grid = SpaceTimeGrid::unit(8, 4).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let budget = ExecutionBudget::new(Some(Duration::from_secs(60)), token);
        let err = oracle()
            .register(
                &bump(&grid, 0.4),
                &bump(&grid, 0.6),
                None,
                &RegistrationParams::default(),
                &budget,
            )
            .unwrap_err();
        assert!(err.is_budget_exceeded());
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let a = ScalarField::zeros([8, 4]);
        let b = ScalarField::zeros([4, 8]);
        let err = oracle()
            .register(&a, &b, None, &RegistrationParams::default(), &ExecutionBudget::unbounded())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::ShapeMismatch { .. }));
    }
}
