//! Proper orthogonal decomposition of velocity fields.
//!
//! Uses the method of snapshots: the Gram matrix `G_ij = <f_i, f_j>_M` of the
//! `n` input fields is diagonalized, `G = U Λ U^T`, and mode `i` is
//!
//! phi_i = (1 / sigma_i) sum_j U_ji f_j,  sigma_i = sqrt(lambda_i)
//!
//! The modes are orthonormal under `M` and ordered by decreasing singular
//! value. A final modified Gram-Schmidt pass removes the round-off that the
//! eigen-decomposition leaves in the orthogonality.

use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::field::VelocityField;
use crate::product::ProductOperator;

/// Truncation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PodConfig {
    /// Maximum number of modes.
    pub modes: usize,
    /// Drop modes with `sigma <= rtol * sigma_max`.
    pub rtol: f64,
    /// Drop modes with `sigma <= atol`.
    pub atol: f64,
}

impl Default for PodConfig {
    fn default() -> Self {
        Self {
            modes: 1,
            rtol: 1e-7,
            atol: 0.0,
        }
    }
}

impl PodConfig {
    pub fn new(modes: usize) -> Self {
        Self {
            modes,
            ..Self::default()
        }
    }

    pub fn with_rtol(mut self, rtol: f64) -> Self {
        self.rtol = rtol;
        self
    }

    pub fn with_atol(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }
}

/// Orthonormal modes with their singular values, in descending order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodResult {
    spatial_shape: [usize; 2],
    modes: Vec<VelocityField>,
    singular_values: Vec<f64>,
}

impl PodResult {
    /// Assemble a basis from already orthonormal modes.
    pub fn new(
        spatial_shape: [usize; 2],
        modes: Vec<VelocityField>,
        singular_values: Vec<f64>,
    ) -> Result<Self> {
        if modes.len() != singular_values.len() {
            return Err(CoreError::shape_mismatch(
                &[modes.len()],
                &[singular_values.len()],
            ));
        }
        if let Some(mode) = modes.iter().find(|m| m.spatial_shape() != spatial_shape) {
            return Err(CoreError::shape_mismatch(
                &spatial_shape,
                &mode.spatial_shape(),
            ));
        }
        Ok(Self {
            spatial_shape,
            modes,
            singular_values,
        })
    }

    pub fn modes(&self) -> &[VelocityField] {
        &self.modes
    }

    pub fn singular_values(&self) -> &[f64] {
        &self.singular_values
    }

    pub fn spatial_shape(&self) -> [usize; 2] {
        self.spatial_shape
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Modes as rows of a `(len, field_dim)` matrix.
    pub fn basis_matrix(&self) -> ndarray::Array2<f64> {
        basis_matrix(&self.modes, self.spatial_shape)
    }

    /// Keep the first `k` modes.
    pub fn truncated(&self, k: usize) -> Self {
        let k = k.min(self.len());
        Self {
            spatial_shape: self.spatial_shape,
            modes: self.modes[..k].to_vec(),
            singular_values: self.singular_values[..k].to_vec(),
        }
    }
}

/// Compute up to `config.modes` POD modes of `fields` under `product`.
pub fn pod(
    fields: &[VelocityField],
    config: &PodConfig,
    product: &dyn ProductOperator,
) -> Result<PodResult> {
    let first = fields
        .first()
        .ok_or_else(|| CoreError::invalid_configuration("POD needs at least one field"))?;
    if config.modes < 1 {
        return Err(CoreError::invalid_configuration(
            "Number of POD modes must be at least 1",
        ));
    }
    let shape = first.shape();
    if let Some(bad) = fields.iter().find(|f| f.shape() != shape) {
        return Err(CoreError::shape_mismatch(&shape, &bad.shape()));
    }

    let n = fields.len();
    let applied = fields
        .iter()
        .map(|f| product.apply(f))
        .collect::<Result<Vec<_>>>()?;

    let mut gram = DMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        for j in 0..=i {
            let value = 0.5 * (fields[i].dot(&applied[j]) + fields[j].dot(&applied[i]));
            gram[(i, j)] = value;
            gram[(j, i)] = value;
        }
    }
    if gram.iter().any(|v| !v.is_finite()) {
        return Err(CoreError::numerical_instability(
            "Gram matrix contains non-finite entries",
        ));
    }

    let eigen = SymmetricEigen::new(gram);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let sigma = |i: usize| eigen.eigenvalues[i].max(0.0).sqrt();
    let sigma_max = order.first().map_or(0.0, |&i| sigma(i));

    let mut modes = Vec::new();
    let mut singular_values = Vec::new();
    for &idx in order.iter().take(config.modes) {
        let s = sigma(idx);
        if s <= config.atol || s <= config.rtol * sigma_max || s == 0.0 {
            break;
        }
        let mut mode = VelocityField::zeros(first.spatial_shape());
        for (j, field) in fields.iter().enumerate() {
            mode.add_scaled(eigen.eigenvectors[(j, idx)] / s, field)?;
        }
        modes.push(mode);
        singular_values.push(s);
    }

    let (modes, singular_values) = reorthonormalize(modes, singular_values, product)?;

    if modes.len() < config.modes.min(n) {
        tracing::warn!(
            "POD kept {} of {} requested modes; remaining singular values are numerically zero",
            modes.len(),
            config.modes
        );
    }
    tracing::debug!("POD singular values: {:?}", singular_values);

    PodResult::new(first.spatial_shape(), modes, singular_values)
}

/// Modified Gram-Schmidt under `product`, dropping modes that collapse.
fn reorthonormalize(
    modes: Vec<VelocityField>,
    singular_values: Vec<f64>,
    product: &dyn ProductOperator,
) -> Result<(Vec<VelocityField>, Vec<f64>)> {
    let mut kept: Vec<VelocityField> = Vec::with_capacity(modes.len());
    let mut kept_values = Vec::with_capacity(modes.len());

    for (mut mode, value) in modes.into_iter().zip(singular_values) {
        let initial = product.norm(&mode)?;
        for basis in &kept {
            let coefficient = product.inner(basis, &mode)?;
            mode.add_scaled(-coefficient, basis)?;
        }
        let norm = product.norm(&mode)?;
        if !(norm > 1e-8 * initial) {
            tracing::warn!("Dropping linearly dependent POD mode (sigma = {:.3e})", value);
            continue;
        }
        kept.push(mode.scaled(1.0 / norm));
        kept_values.push(value);
    }
    Ok((kept, kept_values))
}

/// Coefficients `c_i = <phi_i, f>_M` of every field.
pub fn project(
    fields: &[VelocityField],
    basis: &PodResult,
    product: &dyn ProductOperator,
) -> Result<Vec<Vec<f64>>> {
    fields
        .iter()
        .map(|field| {
            let applied = product.apply(field)?;
            basis
                .modes()
                .iter()
                .map(|mode| {
                    if mode.shape() != applied.shape() {
                        return Err(CoreError::shape_mismatch(&mode.shape(), &applied.shape()));
                    }
                    Ok(mode.dot(&applied))
                })
                .collect()
        })
        .collect()
}

/// `sum_i c_i phi_i`; the empty basis reconstructs the zero field.
pub fn reconstruct(coefficients: &[f64], basis: &PodResult) -> Result<VelocityField> {
    if coefficients.len() != basis.len() {
        return Err(CoreError::shape_mismatch(
            &[basis.len()],
            &[coefficients.len()],
        ));
    }
    let mut field = VelocityField::zeros(basis.spatial_shape());
    for (c, mode) in coefficients.iter().zip(basis.modes()) {
        field.add_scaled(*c, mode)?;
    }
    Ok(field)
}

/// Flattened fields as rows of a `(len, 2 * n0 * n1)` matrix.
pub fn basis_matrix(modes: &[VelocityField], spatial_shape: [usize; 2]) -> ndarray::Array2<f64> {
    let width = 2 * spatial_shape[0] * spatial_shape[1];
    let mut matrix = ndarray::Array2::zeros((modes.len(), width));
    for (mut row, mode) in matrix.rows_mut().into_iter().zip(modes) {
        row.iter_mut()
            .zip(mode.data().iter())
            .for_each(|(r, v)| *r = *v);
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::{CauchyNavierOperator, L2Product};

    fn fields() -> Vec<VelocityField> {
        (0..4)
            .map(|k| {
                let values = (0..2 * 6 * 5)
                    .map(|i| ((i as f64 + 1.0) * (k as f64 + 0.5) * 0.37).sin())
                    .collect();
                VelocityField::from_flat([6, 5], values).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_singular_values_descending() {
        let result = pod(&fields(), &PodConfig::new(4), &L2Product).unwrap();
        let s = result.singular_values();
        assert_eq!(s.len(), 4);
        assert!(s.windows(2).all(|w| w[0] >= w[1]));
        assert!(s.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_full_rank_reconstruction() {
        let product = CauchyNavierOperator::default();
        let inputs = fields();
        let basis = pod(&inputs, &PodConfig::new(inputs.len()), &product).unwrap();
        let coefficients = project(&inputs, &basis, &product).unwrap();
        for (field, c) in inputs.iter().zip(&coefficients) {
            let approx = reconstruct(c, &basis).unwrap();
            let error = (&approx - field).norm() / field.norm();
            assert!(error < 1e-6, "relative error {error}");
        }
    }

    #[test]
    fn test_modes_orthonormal_under_product() {
        let product = CauchyNavierOperator::new(0.3, 1, 1.0).unwrap();
        let basis = pod(&fields(), &PodConfig::new(3), &product).unwrap();
        for (i, a) in basis.modes().iter().enumerate() {
            for (j, b) in basis.modes().iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((product.inner(a, b).unwrap() - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_duplicate_fields_drop_modes() {
        let f = fields().remove(0);
        let inputs = vec![f.clone(), f.scaled(2.0), f.scaled(-1.0)];
        let basis = pod(&inputs, &PodConfig::new(3), &L2Product).unwrap();
        assert_eq!(basis.len(), 1);
        assert_eq!(basis.basis_matrix().dim(), (1, 60));
    }

    #[test]
    fn test_zero_fields_give_empty_basis() {
        let inputs = vec![VelocityField::zeros([3, 3]); 2];
        let basis = pod(&inputs, &PodConfig::new(1), &L2Product).unwrap();
        assert!(basis.is_empty());
        let zero = reconstruct(&[], &basis).unwrap();
        assert_eq!(zero.norm(), 0.0);
    }

    #[test]
    fn test_truncation_error_decreases() {
        let inputs = fields();
        let full = pod(&inputs, &PodConfig::new(4), &L2Product).unwrap();
        let mut previous = f64::INFINITY;
        for k in 1..=4 {
            let basis = full.truncated(k);
            let coefficients = project(&inputs, &basis, &L2Product).unwrap();
            let error: f64 = inputs
                .iter()
                .zip(&coefficients)
                .map(|(f, c)| (&reconstruct(c, &basis).unwrap() - f).norm().powi(2))
                .sum();
            assert!(error <= previous + 1e-12);
            previous = error;
        }
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(pod(&[], &PodConfig::new(1), &L2Product).is_err());
        assert!(pod(&fields(), &PodConfig::new(0), &L2Product).is_err());
        let mixed = vec![VelocityField::zeros([2, 2]), VelocityField::zeros([3, 2])];
        assert!(pod(&mixed, &PodConfig::new(1), &L2Product).is_err());
    }
}
