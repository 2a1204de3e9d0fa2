//! Velocity fields: the initial vector fields produced by registration.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::{Add, Mul, Sub};
use std::path::Path;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

use super::{tensor_from_values, values_from_tensor};
use crate::error::{CoreError, Result};

/// Vector field with one component per grid axis, shape `[2, n0, n1]`.
///
/// Components are measured in grid-index units: component 0 moves along
/// axis 0 (space), component 1 along axis 1 (time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityField {
    data: Array3<f64>,
}

impl VelocityField {
    pub fn new(data: Array3<f64>) -> Result<Self> {
        if data.dim().0 != 2 {
            let (c, n0, n1) = data.dim();
            return Err(CoreError::shape_mismatch(&[2, n0, n1], &[c, n0, n1]));
        }
        Ok(Self { data })
    }

    pub fn zeros(spatial_shape: [usize; 2]) -> Self {
        Self {
            data: Array3::zeros((2, spatial_shape[0], spatial_shape[1])),
        }
    }

    /// Build a field from row-major values of length `2 * n0 * n1`.
    pub fn from_flat(spatial_shape: [usize; 2], values: Vec<f64>) -> Result<Self> {
        let len = values.len();
        let data = Array3::from_shape_vec((2, spatial_shape[0], spatial_shape[1]), values)
            .map_err(|_| {
                CoreError::shape_mismatch(&[2 * spatial_shape[0] * spatial_shape[1]], &[len])
            })?;
        Ok(Self { data })
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    /// Shape of the underlying grid, `[n0, n1]`.
    pub fn spatial_shape(&self) -> [usize; 2] {
        let (_, n0, n1) = self.data.dim();
        [n0, n1]
    }

    /// Full shape `[2, n0, n1]`.
    pub fn shape(&self) -> [usize; 3] {
        let (c, n0, n1) = self.data.dim();
        [c, n0, n1]
    }

    /// Number of degrees of freedom.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_flat(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }

    /// Euclidean inner product of the flattened fields.
    pub fn dot(&self, other: &VelocityField) -> f64 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// `self += alpha * other`.
    pub fn add_scaled(&mut self, alpha: f64, other: &VelocityField) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(CoreError::shape_mismatch(&self.shape(), &other.shape()));
        }
        self.data.scaled_add(alpha, &other.data);
        Ok(())
    }

    pub fn scaled(&self, alpha: f64) -> VelocityField {
        Self {
            data: &self.data * alpha,
        }
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        tensor_from_values(self.data.iter().copied(), self.shape(), device)
    }

    pub fn from_tensor<B: Backend>(tensor: Tensor<B, 3>) -> Result<Self> {
        let (values, [c, n0, n1]) = values_from_tensor(tensor)?;
        if c != 2 {
            return Err(CoreError::shape_mismatch(&[2, n0, n1], &[c, n0, n1]));
        }
        Self::from_flat([n0, n1], values)
    }

    /// Write both components as tab-separated grids separated by a blank line.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for (k, component) in self.data.axis_iter(Axis(0)).enumerate() {
            if k > 0 {
                writeln!(writer)?;
            }
            for row in component.rows() {
                let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                writeln!(writer, "{}", line.join("\t"))?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

/// # Panics
/// Panics if the shapes differ.
impl Add for &VelocityField {
    type Output = VelocityField;

    fn add(self, rhs: &VelocityField) -> VelocityField {
        VelocityField {
            data: &self.data + &rhs.data,
        }
    }
}

/// # Panics
/// Panics if the shapes differ.
impl Sub for &VelocityField {
    type Output = VelocityField;

    fn sub(self, rhs: &VelocityField) -> VelocityField {
        VelocityField {
            data: &self.data - &rhs.data,
        }
    }
}

impl Mul<f64> for &VelocityField {
    type Output = VelocityField;

    fn mul(self, rhs: f64) -> VelocityField {
        self.scaled(rhs)
    }
}
