pub mod error;
pub mod oracle;
pub mod progress;
pub mod shooting;
pub mod validation;

pub use error::{RegistrationError, Result};
pub use oracle::{EarlyStopping, RegistrationOracle, RegistrationParams, RegistrationResult, StopReason};
pub use progress::{
    ConsoleProgressCallback, EarlyStoppingCallback, HistoryCallback, ProgressCallback, ProgressInfo,
    ProgressTracker,
};
pub use shooting::StationaryVelocityShooting;
pub use validation::ValidationConfig;
