pub mod cache;
pub mod config;
pub mod error;
pub mod intermediate;
pub mod records;
pub mod reductor;
pub mod report;

pub use config::{FailurePolicy, ProductKind, ReductionConfig, RegistrationStrategy};
pub use error::{ReductionError, Result};
pub use intermediate::{IntermediateResults, MAPPING_ERRORS_FILE};
pub use records::{ReducedSnapshot, RegisteredSnapshot, RegistrationOutcome, Snapshot};
pub use reductor::{split_training_data, NonlinearNeuralNetworkReductor, RestartsOutcome};
pub use report::ReductionReport;
