//! Integration of velocity fields into flows.
//!
//! A [`Flow`] stores the backward sampling map of a deformation as a
//! displacement `d`, so that transporting a field `u` along the flow reads
//! `u(x + d(x))`. Integrating the velocities `v_0, ..., v_{K-1}` over unit
//! time with `dt = 1 / K` composes
//!
//! $\psi_{k+1} = \psi_k \circ (\mathrm{id} - dt\, v_k)$
//!
//! which in displacement form is
//! `d_{k+1}(x) = -dt v_k(x) + d_k(x - dt v_k(x))`.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::field::{tensor_from_values, values_from_tensor, VelocityField};
use crate::interpolation::{warp_channels, InterpolationOrder};
use crate::HostBackend;

/// Options used when integrating and sampling flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SamplerOptions {
    pub interpolation: InterpolationOrder,
}

impl SamplerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpolation(mut self, interpolation: InterpolationOrder) -> Self {
        self.interpolation = interpolation;
        self
    }
}

/// Compose the backward map of a time-dependent velocity field.
///
/// # Arguments
/// * `velocities` - Velocity per time step, each [2, H, W]
/// * `shape` - Grid shape [H, W], used when `velocities` is empty
/// * `order` - Interpolation order for the compositions
///
/// # Returns
/// * Displacement [2, H, W] of the backward map
pub fn integrate_velocities<B: Backend>(
    velocities: Vec<Tensor<B, 3>>,
    shape: [usize; 2],
    device: &B::Device,
    order: InterpolationOrder,
) -> Tensor<B, 3> {
    let steps = velocities.len().max(1);
    let dt = 1.0 / steps as f64;

    let mut displacement = Tensor::zeros([2, shape[0], shape[1]], device);
    for velocity in velocities {
        let step = velocity.mul_scalar(-dt);
        displacement = step.clone() + warp_channels(displacement, step, order);
    }
    displacement
}

/// Backward map of a velocity field held constant over `time_steps` steps.
pub fn integrate_stationary<B: Backend>(
    velocity: Tensor<B, 3>,
    time_steps: usize,
    order: InterpolationOrder,
) -> Tensor<B, 3> {
    let [_, h, w] = velocity.dims();
    let device = velocity.device();
    let velocities = vec![velocity; time_steps.max(1)];
    integrate_velocities(velocities, [h, w], &device, order)
}

/// Velocity fields indexed by time step on `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDependentVelocityField {
    fields: Vec<VelocityField>,
}

impl TimeDependentVelocityField {
    /// Create from per-step fields; all fields must share one shape.
    pub fn new(fields: Vec<VelocityField>) -> Result<Self> {
        let first = fields
            .first()
            .ok_or_else(|| CoreError::invalid_configuration("Need at least one time step"))?;
        let shape = first.shape();
        if let Some(bad) = fields.iter().find(|f| f.shape() != shape) {
            return Err(CoreError::shape_mismatch(&shape, &bad.shape()));
        }
        Ok(Self { fields })
    }

    /// Repeat `velocity` over `time_steps` steps.
    pub fn stationary(velocity: VelocityField, time_steps: usize) -> Result<Self> {
        if time_steps == 0 {
            return Err(CoreError::invalid_configuration(
                "Number of time steps must be positive",
            ));
        }
        Self::new(vec![velocity; time_steps])
    }

    pub fn fields(&self) -> &[VelocityField] {
        &self.fields
    }

    pub fn time_steps(&self) -> usize {
        self.fields.len()
    }

    pub fn spatial_shape(&self) -> [usize; 2] {
        self.fields[0].spatial_shape()
    }

    /// Integrate into a flow.
    pub fn integrate(&self, options: &SamplerOptions) -> Result<Flow> {
        let device = Default::default();
        let velocities: Vec<Tensor<HostBackend, 3>> = self
            .fields
            .iter()
            .map(|f| f.to_tensor::<HostBackend>(&device))
            .collect();
        let displacement = integrate_velocities(
            velocities,
            self.spatial_shape(),
            &device,
            options.interpolation,
        );
        Flow::from_tensor(displacement, *options)
    }
}

/// Backward sampling map of a deformation, stored as a displacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    displacement: Array3<f64>,
    options: SamplerOptions,
}

impl Flow {
    /// The identity flow on a `[n0, n1]` grid.
    pub fn identity(spatial_shape: [usize; 2], options: SamplerOptions) -> Self {
        Self {
            displacement: Array3::zeros((2, spatial_shape[0], spatial_shape[1])),
            options,
        }
    }

    pub fn from_tensor<B: Backend>(displacement: Tensor<B, 3>, options: SamplerOptions) -> Result<Self> {
        let (values, [c, n0, n1]) = values_from_tensor(displacement)?;
        let displacement = Array3::from_shape_vec((c, n0, n1), values)
            .map_err(|e| CoreError::tensor(e.to_string()))?;
        Ok(Self {
            displacement,
            options,
        })
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        let (c, n0, n1) = self.displacement.dim();
        tensor_from_values(self.displacement.iter().copied(), [c, n0, n1], device)
    }

    pub fn displacement(&self) -> &Array3<f64> {
        &self.displacement
    }

    pub fn options(&self) -> &SamplerOptions {
        &self.options
    }

    pub fn spatial_shape(&self) -> [usize; 2] {
        let (_, n0, n1) = self.displacement.dim();
        [n0, n1]
    }

    /// Largest absolute displacement component.
    pub fn max_displacement(&self) -> f64 {
        self.displacement
            .iter()
            .fold(0.0f64, |acc, v| acc.max(v.abs()))
    }
}
