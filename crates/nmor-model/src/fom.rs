//! Full-order models producing space-time solution fields.

use std::fmt;
use std::sync::Arc;

use nmor_core::{CubicParameterSpace, Parameter, ParameterSpace, ScalarField, SpaceTimeGrid};

use crate::error::{ModelError, Result};

/// A high-fidelity solver mapping parameters to space-time solutions.
pub trait FullOrderModel: Send + Sync + fmt::Debug {
    /// Space-time solution for `mu`.
    fn solve(&self, mu: &Parameter) -> Result<ScalarField>;

    fn parameter_space(&self) -> &dyn ParameterSpace;

    /// Reference used when the caller does not pick one.
    fn default_reference_parameter(&self) -> Option<Parameter>;

    /// Number of spatial dimensions of the solutions.
    fn dim(&self) -> usize;

    fn name(&self) -> &str;
}

type ExactSolution = dyn Fn(f64, f64, &Parameter) -> f64 + Send + Sync;

/// Model sampling a closed-form solution `u(x, t; mu)` on a grid.
#[derive(Clone)]
pub struct AnalyticalModel {
    grid: SpaceTimeGrid,
    parameter_space: CubicParameterSpace,
    reference: Option<Parameter>,
    name: String,
    exact_solution: Arc<ExactSolution>,
}

impl fmt::Debug for AnalyticalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyticalModel")
            .field("name", &self.name)
            .field("grid", &self.grid)
            .field("parameter_space", &self.parameter_space)
            .field("reference", &self.reference)
            .finish()
    }
}

impl AnalyticalModel {
    pub fn new<F>(grid: SpaceTimeGrid, parameter_space: CubicParameterSpace, exact_solution: F) -> Self
    where
        F: Fn(f64, f64, &Parameter) -> f64 + Send + Sync + 'static,
    {
        Self {
            grid,
            parameter_space,
            reference: None,
            name: "AnalyticalModel".to_string(),
            exact_solution: Arc::new(exact_solution),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the default reference parameter; it must lie in the parameter space.
    pub fn with_reference_parameter(mut self, reference: Parameter) -> Result<Self> {
        if !self.parameter_space.contains(&reference) {
            return Err(ModelError::invalid_configuration(format!(
                "Reference parameter {} lies outside the parameter space",
                reference
            )));
        }
        self.reference = Some(reference);
        Ok(self)
    }

    pub fn grid(&self) -> &SpaceTimeGrid {
        &self.grid
    }

    pub fn cubic_parameter_space(&self) -> &CubicParameterSpace {
        &self.parameter_space
    }
}

impl FullOrderModel for AnalyticalModel {
    fn solve(&self, mu: &Parameter) -> Result<ScalarField> {
        if mu.dim() != self.parameter_space.dim() {
            return Err(ModelError::shape_mismatch(
                &[self.parameter_space.dim()],
                &[mu.dim()],
            ));
        }
        tracing::info!("Sampling analytical solution for mu={} ...", mu);
        let exact = &self.exact_solution;
        Ok(self.grid.sample(|x, t| exact(x, t, mu)))
    }

    fn parameter_space(&self) -> &dyn ParameterSpace {
        &self.parameter_space
    }

    fn default_reference_parameter(&self) -> Option<Parameter> {
        self.reference.clone()
    }

    fn dim(&self) -> usize {
        1
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> AnalyticalModel {
        AnalyticalModel::new(
            SpaceTimeGrid::unit(11, 6).unwrap(),
            CubicParameterSpace::interval(0.5, 1.5).unwrap(),
            |x, t, mu| {
                let mu = mu.to_vec()[0];
                if x < 0.25 + mu * t / 2.0 {
                    1.0
                } else {
                    0.0
                }
            },
        )
    }

    #[test]
    fn test_solve_samples_grid() {
        let fom = model();
        let u = fom.solve(&Parameter::Scalar(1.0)).unwrap();
        assert_eq!(u.shape(), [11, 6]);
        assert_eq!(u.data()[[0, 0]], 1.0);
        assert_eq!(u.data()[[10, 0]], 0.0);
        // Front at 0.75 for t = 1.
        assert_eq!(u.data()[[7, 5]], 1.0);
        assert_eq!(u.data()[[8, 5]], 0.0);
    }

    #[test]
    fn test_parameter_dimension_is_checked() {
        let fom = model();
        assert!(matches!(
            fom.solve(&Parameter::Vector(vec![1.0, 2.0])),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_reference_parameter() {
        let fom = model();
        assert!(fom.default_reference_parameter().is_none());
        let fom = fom.with_reference_parameter(Parameter::Scalar(1.0)).unwrap();
        assert_eq!(fom.default_reference_parameter(), Some(Parameter::Scalar(1.0)));
        assert!(model()
            .with_reference_parameter(Parameter::Scalar(3.0))
            .is_err());
    }
}
