pub mod budget;
pub mod error;
pub mod field;
pub mod flow;
pub mod interpolation;
pub mod parameters;
pub mod pod;
pub mod product;

pub use budget::{BudgetExceeded, CancellationToken, ExecutionBudget};
pub use error::{CoreError, Result};
pub use field::{Restriction, ScalarField, SpaceTimeGrid, VelocityField};
pub use flow::{Flow, SamplerOptions, TimeDependentVelocityField};
pub use interpolation::InterpolationOrder;
pub use parameters::{CubicParameterSpace, Parameter, ParameterSpace, SamplingMode};
pub use pod::{pod, project, reconstruct, PodConfig, PodResult};
pub use product::{CauchyNavierOperator, L2Product, ProductOperator};

/// Backend used for host-side warping and evaluation.
pub type HostBackend = burn_ndarray::NdArray<f32>;
