//! Space-time fields sampled on regular grids.
//!
//! Axis 0 of every field is space, axis 1 is time. Host data lives in
//! `ndarray` arrays in `f64`; computations that need gradients or warping go
//! through Burn tensors (`f32`) via the `to_tensor` / `from_tensor` helpers.

pub mod grid;
pub mod restriction;
pub mod scalar;
pub mod vector;

pub use grid::SpaceTimeGrid;
pub use restriction::Restriction;
pub use scalar::ScalarField;
pub use vector::VelocityField;

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::error::{CoreError, Result};

/// Copy host values into a backend tensor of the given shape.
pub(crate) fn tensor_from_values<B: Backend, const D: usize>(
    values: impl Iterator<Item = f64>,
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    let data: Vec<f32> = values.map(|v| v as f32).collect();
    Tensor::from_data(TensorData::new(data, shape), device)
}

/// Read a backend tensor back into host values.
pub(crate) fn values_from_tensor<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> Result<(Vec<f64>, [usize; D])> {
    let dims = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CoreError::tensor(format!("{e:?}")))?;
    Ok((values.into_iter().map(f64::from).collect(), dims))
}
