//! Per-parameter records carried through the pipeline stages.
//!
//! Every stage consumes the records of the previous one, so a parameter and
//! the data derived from it always travel together.

use nmor_core::{Parameter, ScalarField, VelocityField};
use serde::{Deserialize, Serialize};

/// A training parameter with its full-order solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub parameter: Parameter,
    pub solution: ScalarField,
}

impl Snapshot {
    pub fn new(parameter: Parameter, solution: ScalarField) -> Self {
        Self {
            parameter,
            solution,
        }
    }

    pub fn registered(self, velocity_field: VelocityField) -> RegisteredSnapshot {
        RegisteredSnapshot {
            parameter: self.parameter,
            solution: self.solution,
            velocity_field,
        }
    }
}

/// A snapshot with the initial velocity field mapping the reference onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredSnapshot {
    pub parameter: Parameter,
    pub solution: ScalarField,
    pub velocity_field: VelocityField,
}

impl RegisteredSnapshot {
    pub fn reduced(self, coefficients: Vec<f64>) -> ReducedSnapshot {
        ReducedSnapshot {
            parameter: self.parameter,
            velocity_field: self.velocity_field,
            coefficients,
        }
    }
}

/// A registered snapshot with the coefficients of its velocity field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedSnapshot {
    pub parameter: Parameter,
    pub velocity_field: VelocityField,
    pub coefficients: Vec<f64>,
}

/// Registered snapshots plus the parameters dropped on failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrationOutcome {
    pub snapshots: Vec<RegisteredSnapshot>,
    pub skipped: Vec<Parameter>,
}

impl RegistrationOutcome {
    pub fn velocity_fields(&self) -> Vec<VelocityField> {
        self.snapshots
            .iter()
            .map(|s| s.velocity_field.clone())
            .collect()
    }
}
