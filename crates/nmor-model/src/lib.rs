pub mod error;
pub mod fom;
pub mod network;
pub mod normalization;
pub mod reduced;
pub mod surrogate;
pub mod trainer;

pub use error::{ModelError, Result};
pub use fom::{AnalyticalModel, FullOrderModel};
pub use network::{FullyConnectedNetwork, NetworkConfig};
pub use normalization::NormalizationStats;
pub use reduced::{ReducedModelArtifact, ReducedSpacetimeModel, ARTIFACT_FORMAT_NAME, ARTIFACT_VERSION};
pub use surrogate::TrainedSurrogate;
pub use trainer::{Trainer, TrainerConfig, TrainingBackend, TrainingSample};
