//! Scalar space-time fields (full-order solutions).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Sub;
use std::path::Path;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use super::{tensor_from_values, values_from_tensor, Restriction};
use crate::error::{CoreError, Result};
use crate::flow::Flow;
use crate::interpolation::warp_channels;
use crate::HostBackend;

/// Scalar function sampled on a `[n0, n1]` grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarField {
    data: Array2<f64>,
}

impl ScalarField {
    pub fn new(data: Array2<f64>) -> Self {
        Self { data }
    }

    pub fn zeros(shape: [usize; 2]) -> Self {
        Self::new(Array2::zeros((shape[0], shape[1])))
    }

    /// Build a field from row-major values.
    pub fn from_flat(shape: [usize; 2], values: Vec<f64>) -> Result<Self> {
        let len = values.len();
        let data = Array2::from_shape_vec((shape[0], shape[1]), values)
            .map_err(|_| CoreError::shape_mismatch(&[shape[0] * shape[1]], &[len]))?;
        Ok(Self::new(data))
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn shape(&self) -> [usize; 2] {
        let (n0, n1) = self.data.dim();
        [n0, n1]
    }

    /// Row-major copy of the values.
    pub fn to_flat(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }

    /// Euclidean norm of all values.
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Euclidean norm of the values inside `restriction`.
    pub fn restricted_norm(&self, restriction: &Restriction) -> Result<f64> {
        restriction.validate(self.shape())?;
        let window = self
            .data
            .slice(s![restriction.axis0.clone(), restriction.axis1.clone()]);
        Ok(window.iter().map(|v| v * v).sum::<f64>().sqrt())
    }

    /// Elementwise difference, checking shapes.
    pub fn difference(&self, other: &ScalarField) -> Result<ScalarField> {
        if self.shape() != other.shape() {
            return Err(CoreError::shape_mismatch(&self.shape(), &other.shape()));
        }
        Ok(Self::new(&self.data - &other.data))
    }

    /// `||self - other|| / ||other||`.
    pub fn relative_error(&self, other: &ScalarField) -> Result<f64> {
        let absolute = self.difference(other)?.norm();
        let reference = other.norm();
        if reference == 0.0 {
            return Ok(absolute);
        }
        Ok(absolute / reference)
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        tensor_from_values(self.data.iter().copied(), self.shape(), device)
    }

    pub fn from_tensor<B: Backend>(tensor: Tensor<B, 2>) -> Result<Self> {
        let (values, shape) = values_from_tensor(tensor)?;
        Self::from_flat(shape, values)
    }

    /// Transport the field along `flow`.
    ///
    /// The value at node `x` is read from `x + flow.displacement(x)`, so the
    /// identity flow returns the field unchanged up to rounding. The warp runs on
    /// the `f32` host backend, so results agree with `f64` input only to about
    /// `1e-7` relative precision.
    pub fn push_forward(&self, flow: &Flow) -> Result<ScalarField> {
        let [n0, n1] = self.shape();
        if flow.spatial_shape() != [n0, n1] {
            return Err(CoreError::shape_mismatch(&[n0, n1], &flow.spatial_shape()));
        }
        let device = Default::default();
        let image = self.to_tensor::<HostBackend>(&device).reshape([1, n0, n1]);
        let displacement = flow.to_tensor::<HostBackend>(&device);
        let warped = warp_channels(image, displacement, flow.options().interpolation);
        Self::from_tensor(warped.reshape([n0, n1]))
    }

    /// Write the values as a tab-separated grid, one line per row of axis 0.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for row in self.data.rows() {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(writer, "{}", line.join("\t"))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// # Panics
/// Panics if the shapes differ; use [`ScalarField::difference`] for a checked version.
impl Sub for &ScalarField {
    type Output = ScalarField;

    fn sub(self, rhs: &ScalarField) -> ScalarField {
        ScalarField::new(&self.data - &rhs.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_and_difference() {
        let a = ScalarField::from_flat([2, 2], vec![3.0, 0.0, 0.0, 4.0]).unwrap();
        let b = ScalarField::zeros([2, 2]);
        assert_eq!(a.norm(), 5.0);
        assert_eq!(a.difference(&b).unwrap().norm(), 5.0);
        assert_eq!((&a - &b).norm(), 5.0);
    }

    #[test]
    fn test_difference_shape_mismatch() {
        let a = ScalarField::zeros([2, 3]);
        let b = ScalarField::zeros([3, 2]);
        assert!(matches!(
            a.difference(&b),
            Err(CoreError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_restricted_norm() {
        let a = ScalarField::from_flat([3, 3], vec![9.0, 9.0, 9.0, 9.0, 2.0, 9.0, 9.0, 9.0, 9.0])
            .unwrap();
        let r = Restriction::from_margin([3, 3], 1).unwrap();
        assert_eq!(a.restricted_norm(&r).unwrap(), 2.0);
    }

    #[test]
    fn test_from_flat_rejects_wrong_length() {
        assert!(ScalarField::from_flat([2, 2], vec![1.0; 3]).is_err());
    }

    #[test]
    fn test_tensor_round_trip() {
        let device = Default::default();
        let a = ScalarField::from_flat([2, 3], vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0]).unwrap();
        let tensor = a.to_tensor::<HostBackend>(&device);
        assert_eq!(tensor.dims(), [2, 3]);
        let back = ScalarField::from_tensor(tensor).unwrap();
        assert_eq!(back, a);
    }
}
