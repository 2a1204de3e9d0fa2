use ndarray::Array2;
use nmor_core::{Parameter, VelocityField};
use nmor_model::TrainingSample;
use serde::{Deserialize, Serialize};

use crate::records::ReducedSnapshot;

/// Intermediate quantities of a reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionReport {
    /// Basis vectors as rows of a `(basis_size, field_dim)` matrix.
    pub reduced_velocity_fields: Array2<f64>,
    /// Singular values of the kept modes, descending.
    pub singular_values: Vec<f64>,
    /// Registered velocity fields in training order.
    pub full_velocity_fields: Vec<VelocityField>,
    /// Normalized training pairs.
    pub training_data: Vec<TrainingSample>,
    /// Normalized validation pairs.
    pub validation_data: Vec<TrainingSample>,
    pub best_loss: f64,
    /// Validation loss of every restart; `None` for failed restarts.
    pub restart_losses: Vec<Option<f64>>,
    /// Parameters dropped because their registration failed.
    pub skipped_parameters: Vec<Parameter>,
    pub reduced_snapshots: Vec<ReducedSnapshot>,
}

impl ReductionReport {
    pub fn basis_size(&self) -> usize {
        self.reduced_velocity_fields.nrows()
    }

    /// Number of restarts that produced a network.
    pub fn successful_restarts(&self) -> usize {
        self.restart_losses.iter().flatten().count()
    }
}
