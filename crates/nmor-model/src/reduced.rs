//! Reduced space-time model and its persisted artifact.
//!
//! Evaluating the model at `mu` runs
//!
//! mu -> surrogate -> coefficients -> sum_i c_i phi_i = v0 -> flow -> u_ref ∘ flow
//!
//! where the flow is generated by the registration oracle from `v0`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use nmor_core::{reconstruct, Parameter, PodResult, ScalarField, VelocityField};
use nmor_registration::RegistrationOracle;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::network::NetworkConfig;
use crate::normalization::NormalizationStats;
use crate::surrogate::TrainedSurrogate;

pub const ARTIFACT_FORMAT_NAME: &str = "nmor.reduced_spacetime_model";
pub const ARTIFACT_VERSION: u32 = 1;

/// Surrogate for the full-order model built by the reductor.
#[derive(Debug, Clone)]
pub struct ReducedSpacetimeModel {
    reference: ScalarField,
    basis: PodResult,
    surrogate: TrainedSurrogate,
    oracle: Arc<dyn RegistrationOracle>,
}

impl ReducedSpacetimeModel {
    pub fn new(
        reference: ScalarField,
        basis: PodResult,
        surrogate: TrainedSurrogate,
        oracle: Arc<dyn RegistrationOracle>,
    ) -> Result<Self> {
        if basis.len() != surrogate.output_size() {
            return Err(ModelError::shape_mismatch(
                &[basis.len()],
                &[surrogate.output_size()],
            ));
        }
        if basis.spatial_shape() != reference.shape() {
            return Err(ModelError::shape_mismatch(
                &reference.shape(),
                &basis.spatial_shape(),
            ));
        }
        Ok(Self {
            reference,
            basis,
            surrogate,
            oracle,
        })
    }

    pub fn reference(&self) -> &ScalarField {
        &self.reference
    }

    pub fn basis(&self) -> &PodResult {
        &self.basis
    }

    pub fn surrogate(&self) -> &TrainedSurrogate {
        &self.surrogate
    }

    pub fn oracle(&self) -> &Arc<dyn RegistrationOracle> {
        &self.oracle
    }

    pub fn basis_size(&self) -> usize {
        self.basis.len()
    }

    /// Coefficients of the initial velocity field predicted for `mu`.
    pub fn reduced_coefficients(&self, mu: &Parameter) -> Result<Vec<f64>> {
        self.surrogate.evaluate(mu)
    }

    /// Initial velocity field predicted for `mu`.
    pub fn velocity_field(&self, mu: &Parameter) -> Result<VelocityField> {
        let coefficients = self.reduced_coefficients(mu)?;
        Ok(reconstruct(&coefficients, &self.basis)?)
    }

    /// Approximate the full-order solution at `mu`.
    pub fn solve(&self, mu: &Parameter) -> Result<ScalarField> {
        let start = Instant::now();
        let velocity = self.velocity_field(mu)?;
        let flow = self
            .oracle
            .integrate_forward_vector_field(&velocity)?
            .integrate(&self.oracle.sampler_options())?;
        let solution = self.reference.push_forward(&flow)?;
        tracing::debug!(
            "Reduced solve for mu={} took {:.3}s",
            mu,
            start.elapsed().as_secs_f64()
        );
        Ok(solution)
    }

    pub fn to_artifact(&self) -> Result<ReducedModelArtifact> {
        Ok(ReducedModelArtifact {
            format: ARTIFACT_FORMAT_NAME.to_string(),
            version: ARTIFACT_VERSION,
            reference: self.reference.clone(),
            basis: self.basis.clone(),
            network_config: self.surrogate.config().clone(),
            stats: *self.surrogate.stats(),
            network_weights: self.surrogate.weights_to_bytes()?,
        })
    }

    /// Write the model as a bincode artifact.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let artifact = self.to_artifact()?;
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        bincode::serialize_into(&mut writer, &artifact)?;
        writer.flush()?;
        tracing::info!("Saved reduced model to {}", path.as_ref().display());
        Ok(())
    }

    /// Read an artifact written by [`save`](Self::save); the oracle is not persisted.
    pub fn load<P: AsRef<Path>>(path: P, oracle: Arc<dyn RegistrationOracle>) -> Result<Self> {
        // Decoding from the file bytes bounds every length prefix by the file size.
        let bytes = fs::read(path.as_ref())?;
        let artifact: ReducedModelArtifact = bincode::deserialize(&bytes)?;
        artifact.into_model(oracle)
    }
}

/// Versioned, self-contained representation of a [`ReducedSpacetimeModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedModelArtifact {
    pub format: String,
    pub version: u32,
    pub reference: ScalarField,
    pub basis: PodResult,
    pub network_config: NetworkConfig,
    pub stats: NormalizationStats,
    /// Network record encoded by Burn's `BinBytesRecorder`.
    pub network_weights: Vec<u8>,
}

impl ReducedModelArtifact {
    pub fn validate(&self) -> Result<()> {
        if self.format != ARTIFACT_FORMAT_NAME {
            return Err(ModelError::FormatMismatch {
                expected: ARTIFACT_FORMAT_NAME,
                found: self.format.clone(),
            });
        }
        if self.version != ARTIFACT_VERSION {
            return Err(ModelError::VersionMismatch {
                expected: ARTIFACT_VERSION,
                found: self.version,
            });
        }
        Ok(())
    }

    pub fn into_model(self, oracle: Arc<dyn RegistrationOracle>) -> Result<ReducedSpacetimeModel> {
        self.validate()?;
        let surrogate =
            TrainedSurrogate::from_weight_bytes(self.network_weights, self.network_config, self.stats)?;
        ReducedSpacetimeModel::new(self.reference, self.basis, surrogate, oracle)
    }
}
