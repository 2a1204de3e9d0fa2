//! Inner products on velocity fields.
//!
//! A product is represented by its symmetric positive definite operator `M`,
//! so that `<u, v>_M = u . (M v)`. POD orthonormalizes with respect to it and
//! reduced coefficients are projections under it.
//!
//! The Cauchy-Navier operator is
//!
//! L = (alpha (-Δ) + gamma I)^exponent
//!
//! with the 5-point Laplacian and homogeneous Dirichlet boundary, applied to
//! each velocity component separately.

use std::fmt;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::field::VelocityField;

/// Symmetric positive definite operator defining an inner product.
pub trait ProductOperator: Send + Sync + fmt::Debug {
    /// Apply the operator to a field.
    fn apply(&self, field: &VelocityField) -> Result<VelocityField>;

    /// Inner product `<a, b>` under the operator.
    fn inner(&self, a: &VelocityField, b: &VelocityField) -> Result<f64> {
        if a.shape() != b.shape() {
            return Err(CoreError::shape_mismatch(&a.shape(), &b.shape()));
        }
        Ok(a.dot(&self.apply(b)?))
    }

    /// Induced norm.
    fn norm(&self, field: &VelocityField) -> Result<f64> {
        Ok(self.inner(field, field)?.max(0.0).sqrt())
    }

    fn name(&self) -> &'static str;
}

/// Euclidean product on the flattened fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct L2Product;

impl ProductOperator for L2Product {
    fn apply(&self, field: &VelocityField) -> Result<VelocityField> {
        Ok(field.clone())
    }

    fn inner(&self, a: &VelocityField, b: &VelocityField) -> Result<f64> {
        if a.shape() != b.shape() {
            return Err(CoreError::shape_mismatch(&a.shape(), &b.shape()));
        }
        Ok(a.dot(b))
    }

    fn name(&self) -> &'static str {
        "l2"
    }
}

/// Differential operator `(alpha (-Δ) + gamma I)^exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CauchyNavierOperator {
    alpha: f64,
    exponent: usize,
    gamma: f64,
}

impl Default for CauchyNavierOperator {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            exponent: 1,
            gamma: 1.0,
        }
    }
}

impl CauchyNavierOperator {
    /// Create a new operator.
    ///
    /// # Arguments
    /// * `alpha` - Weight of the Laplacian, non-negative
    /// * `exponent` - Power of the operator, at least 1
    /// * `gamma` - Weight of the identity, positive
    pub fn new(alpha: f64, exponent: usize, gamma: f64) -> Result<Self> {
        if !(alpha >= 0.0) || !alpha.is_finite() {
            return Err(CoreError::invalid_configuration(format!(
                "alpha must be non-negative, got {alpha}"
            )));
        }
        if exponent < 1 {
            return Err(CoreError::invalid_configuration(
                "exponent must be at least 1",
            ));
        }
        if !(gamma > 0.0) || !gamma.is_finite() {
            return Err(CoreError::invalid_configuration(format!(
                "gamma must be positive, got {gamma}"
            )));
        }
        Ok(Self {
            alpha,
            exponent,
            gamma,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn exponent(&self) -> usize {
        self.exponent
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Apply the operator to a `[C, H, W]` tensor.
    pub fn apply_tensor<B: Backend>(&self, field: Tensor<B, 3>) -> Tensor<B, 3> {
        let mut out = field;
        for _ in 0..self.exponent {
            let laplacian = negative_laplacian(out.clone());
            out = laplacian.mul_scalar(self.alpha) + out.mul_scalar(self.gamma);
        }
        out
    }

    /// Mean of `v . L v` over all entries, as a differentiable scalar.
    pub fn energy_tensor<B: Backend>(&self, field: Tensor<B, 3>) -> Tensor<B, 1> {
        (self.apply_tensor(field.clone()) * field).mean()
    }
}

impl ProductOperator for CauchyNavierOperator {
    fn apply(&self, field: &VelocityField) -> Result<VelocityField> {
        let mut data = field.data().clone();
        for _ in 0..self.exponent {
            for mut component in data.axis_iter_mut(Axis(0)) {
                let laplacian = negative_laplacian_host(component.view());
                component.zip_mut_with(&laplacian, |u, lap| {
                    *u = self.alpha * lap + self.gamma * *u;
                });
            }
        }
        VelocityField::new(data)
    }

    fn name(&self) -> &'static str {
        "cauchy-navier"
    }
}

/// `-Δ` with zero padding outside the grid.
fn negative_laplacian<B: Backend>(field: Tensor<B, 3>) -> Tensor<B, 3> {
    let [c, h, w] = field.dims();
    let device = field.device();

    let zero_row = Tensor::<B, 3>::zeros([c, 1, w], &device);
    let rows = Tensor::cat(vec![zero_row.clone(), field.clone(), zero_row], 1);
    let up = rows.clone().slice([0..c, 0..h, 0..w]);
    let down = rows.slice([0..c, 2..h + 2, 0..w]);

    let zero_col = Tensor::<B, 3>::zeros([c, h, 1], &device);
    let cols = Tensor::cat(vec![zero_col.clone(), field.clone(), zero_col], 2);
    let left = cols.clone().slice([0..c, 0..h, 0..w]);
    let right = cols.slice([0..c, 0..h, 2..w + 2]);

    field.mul_scalar(4.0) - up - down - left - right
}

fn negative_laplacian_host(u: ArrayView2<f64>) -> Array2<f64> {
    let (h, w) = u.dim();
    Array2::from_shape_fn((h, w), |(i, j)| {
        let at = |di: isize, dj: isize| {
            let (ii, jj) = (i as isize + di, j as isize + dj);
            if ii < 0 || jj < 0 || ii >= h as isize || jj >= w as isize {
                0.0
            } else {
                u[[ii as usize, jj as usize]]
            }
        };
        4.0 * u[[i, j]] - at(-1, 0) - at(1, 0) - at(0, -1) - at(0, 1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostBackend;

    fn field(seed: f64) -> VelocityField {
        let values = (0..2 * 5 * 4)
            .map(|i| ((i as f64 + 1.0) * seed).sin())
            .collect();
        VelocityField::from_flat([5, 4], values).unwrap()
    }

    #[test]
    fn test_cauchy_navier_is_symmetric() {
        let op = CauchyNavierOperator::new(0.5, 2, 1.0).unwrap();
        let a = field(0.3);
        let b = field(1.7);
        let ab = op.inner(&a, &b).unwrap();
        let ba = op.inner(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-10 * ab.abs().max(1.0));
    }

    #[test]
    fn test_cauchy_navier_is_positive() {
        let op = CauchyNavierOperator::default();
        let a = field(0.9);
        assert!(op.inner(&a, &a).unwrap() >= a.dot(&a));
    }

    #[test]
    fn test_constant_field_interior() {
        // -Δ of a constant vanishes away from the boundary
        let op = CauchyNavierOperator::new(1.0, 1, 1.0).unwrap();
        let ones = VelocityField::from_flat([4, 4], vec![1.0; 32]).unwrap();
        let out = op.apply(&ones).unwrap();
        assert_eq!(out.data()[[0, 1, 1]], 1.0);
        assert_eq!(out.data()[[1, 0, 0]], 3.0);
    }

    #[test]
    fn test_tensor_matches_host() {
        let device = Default::default();
        let op = CauchyNavierOperator::new(0.2, 2, 0.5).unwrap();
        let a = field(0.4);
        let host = op.apply(&a).unwrap();
        let tensor = op.apply_tensor(a.to_tensor::<HostBackend>(&device));
        let from_tensor = VelocityField::from_tensor(tensor).unwrap();
        let diff = (&host - &from_tensor).norm();
        assert!(diff < 1e-4, "difference {diff}");

        let energy: f32 = op
            .energy_tensor(a.to_tensor::<HostBackend>(&device))
            .into_scalar();
        let expected = op.inner(&a, &a).unwrap() / a.len() as f64;
        assert!((energy as f64 - expected).abs() < 1e-4);
    }

    #[test]
    fn test_l2_product() {
        let a = field(0.2);
        assert!((L2Product.norm(&a).unwrap() - a.norm()).abs() < 1e-12);
        assert!(L2Product
            .inner(&a, &VelocityField::zeros([2, 2]))
            .is_err());
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(CauchyNavierOperator::new(-1.0, 1, 1.0).is_err());
        assert!(CauchyNavierOperator::new(1.0, 0, 1.0).is_err());
        assert!(CauchyNavierOperator::new(1.0, 1, 0.0).is_err());
    }
}
