//! Parameter spaces and parameter sampling.

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A point of a parameter space.
///
/// One-dimensional spaces yield scalars, higher-dimensional ones vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Parameter {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Parameter {
    pub fn dim(&self) -> usize {
        match self {
            Parameter::Scalar(_) => 1,
            Parameter::Vector(values) => values.len(),
        }
    }

    /// Components as a flat vector.
    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Parameter::Scalar(value) => vec![*value],
            Parameter::Vector(values) => values.clone(),
        }
    }

    /// Build a parameter from components, squeezing single values.
    pub fn from_slice(values: &[f64]) -> Self {
        match values {
            [value] => Parameter::Scalar(*value),
            _ => Parameter::Vector(values.to_vec()),
        }
    }

    /// Representation usable inside file names (`0.5` becomes `0_5`).
    pub fn file_tag(&self) -> String {
        self.to_string().replace('.', "_")
    }
}

impl From<f64> for Parameter {
    fn from(value: f64) -> Self {
        Parameter::Scalar(value)
    }
}

impl From<Vec<f64>> for Parameter {
    fn from(values: Vec<f64>) -> Self {
        Parameter::from_slice(&values)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Scalar(value) => write!(f, "{value}"),
            Parameter::Vector(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Strategy used to draw samples from a parameter space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Tensor-product grid of equidistant points.
    #[default]
    Uniform,
}

impl FromStr for SamplingMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uniform" => Ok(SamplingMode::Uniform),
            other => Err(CoreError::UnsupportedSamplingMode(other.to_string())),
        }
    }
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingMode::Uniform => write!(f, "uniform"),
        }
    }
}

/// Set of admissible parameters.
pub trait ParameterSpace: Send + Sync {
    /// Number of parameter components.
    fn dim(&self) -> usize;

    /// Draw at least `num_samples` parameters.
    fn sample(&self, num_samples: usize, mode: SamplingMode) -> Result<Vec<Parameter>>;
}

/// Axis-aligned box `[min_1, max_1] x ... x [min_d, max_d]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubicParameterSpace {
    extents: Vec<(f64, f64)>,
}

impl CubicParameterSpace {
    pub fn new(extents: Vec<(f64, f64)>) -> Result<Self> {
        if extents.is_empty() {
            return Err(CoreError::invalid_configuration(
                "Parameter space needs at least one dimension",
            ));
        }
        if let Some((min, max)) = extents
            .iter()
            .find(|(min, max)| !(min.is_finite() && max.is_finite()) || min > max)
        {
            return Err(CoreError::invalid_configuration(format!(
                "Invalid parameter range [{min}, {max}]"
            )));
        }
        Ok(Self { extents })
    }

    /// One-dimensional interval `[min, max]`.
    pub fn interval(min: f64, max: f64) -> Result<Self> {
        Self::new(vec![(min, max)])
    }

    pub fn extents(&self) -> &[(f64, f64)] {
        &self.extents
    }

    /// Whether `parameter` lies inside the box.
    pub fn contains(&self, parameter: &Parameter) -> bool {
        let values = parameter.to_vec();
        values.len() == self.extents.len()
            && values
                .iter()
                .zip(&self.extents)
                .all(|(v, &(min, max))| min <= *v && *v <= max)
    }

    /// Samples as a `(count, dim)` matrix, first dimension varying slowest.
    pub fn sample_matrix(&self, num_samples: usize, mode: SamplingMode) -> Result<Array2<f64>> {
        match mode {
            SamplingMode::Uniform => self.uniform_grid(num_samples),
        }
    }

    fn uniform_grid(&self, num_samples: usize) -> Result<Array2<f64>> {
        if num_samples < 1 {
            return Err(CoreError::invalid_configuration(
                "Number of samples must be at least 1",
            ));
        }
        let dim = self.extents.len();
        let per_dim = points_per_dimension(num_samples, dim);
        let axes: Vec<Vec<f64>> = self
            .extents
            .iter()
            .map(|&(min, max)| linspace(min, max, per_dim))
            .collect();

        let count = per_dim.pow(dim as u32);
        tracing::info!("Sampling {} parameters uniformly ...", count);

        Ok(Array2::from_shape_fn((count, dim), |(row, col)| {
            // Row-major digit of `row` in base `per_dim`
            let stride = per_dim.pow((dim - 1 - col) as u32);
            axes[col][(row / stride) % per_dim]
        }))
    }
}

impl ParameterSpace for CubicParameterSpace {
    fn dim(&self) -> usize {
        self.extents.len()
    }

    fn sample(&self, num_samples: usize, mode: SamplingMode) -> Result<Vec<Parameter>> {
        let matrix = self.sample_matrix(num_samples, mode)?;
        Ok(matrix
            .rows()
            .into_iter()
            .map(|row| Parameter::from_slice(&row.to_vec()))
            .collect())
    }
}

/// Smallest `k` with `k^dim >= n`.
fn points_per_dimension(n: usize, dim: usize) -> usize {
    let mut k = (n as f64).powf(1.0 / dim as f64).ceil().max(1.0) as usize;
    let reaches = |k: usize| k.checked_pow(dim as u32).map_or(true, |p| p >= n);
    while !reaches(k) {
        k += 1;
    }
    while k > 1 && reaches(k - 1) {
        k -= 1;
    }
    k
}

fn linspace(min: f64, max: f64, count: usize) -> Vec<f64> {
    if count == 1 {
        return vec![min];
    }
    let last = count - 1;
    // Rounding may push interpolated points past `max`; the endpoint is exact.
    (0..count)
        .map(|i| {
            if i == last {
                max
            } else {
                (min + (max - min) * i as f64 / last as f64).clamp(min, max)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_dimensional_samples_are_scalars() {
        let space = CubicParameterSpace::interval(0.5, 1.5).unwrap();
        let samples = space.sample(3, SamplingMode::Uniform).unwrap();
        assert_eq!(
            samples,
            vec![
                Parameter::Scalar(0.5),
                Parameter::Scalar(1.0),
                Parameter::Scalar(1.5)
            ]
        );
    }

    #[test]
    fn test_two_dimensional_ordering() {
        let space = CubicParameterSpace::new(vec![(0.0, 1.0), (10.0, 20.0)]).unwrap();
        let samples = space.sample(3, SamplingMode::Uniform).unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0], Parameter::Vector(vec![0.0, 10.0]));
        assert_eq!(samples[1], Parameter::Vector(vec![0.0, 20.0]));
        assert_eq!(samples[2], Parameter::Vector(vec![1.0, 10.0]));
        assert_eq!(samples[3], Parameter::Vector(vec![1.0, 20.0]));
    }

    #[test]
    fn test_single_point_sits_at_min() {
        let space = CubicParameterSpace::new(vec![(0.25, 0.75), (1.0, 2.0)]).unwrap();
        let matrix = space.sample_matrix(1, SamplingMode::Uniform).unwrap();
        assert_eq!(matrix.dim(), (1, 2));
        assert_eq!(matrix[[0, 0]], 0.25);
        assert_eq!(matrix[[0, 1]], 1.0);
    }

    #[test]
    fn test_samples_stay_inside_box() {
        let max = 3.7972849112051223;
        let space = CubicParameterSpace::new(vec![(0.0, max), (0.0, 0.0)]).unwrap();
        let samples = space.sample(37, SamplingMode::Uniform).unwrap();
        assert!(samples.len() >= 37);
        assert!(samples.iter().all(|p| space.contains(p)));

        let matrix = space.sample_matrix(37, SamplingMode::Uniform).unwrap();
        assert_eq!(matrix[[matrix.nrows() - 1, 0]], max);
        assert!(matrix.column(0).iter().all(|&v| (0.0..=max).contains(&v)));
    }

    #[test]
    fn test_points_per_dimension_exact_powers() {
        assert_eq!(points_per_dimension(8, 3), 2);
        assert_eq!(points_per_dimension(9, 3), 3);
        assert_eq!(points_per_dimension(1000, 3), 10);
        assert_eq!(points_per_dimension(1, 4), 1);
        assert_eq!(points_per_dimension(125, 3), 5);
    }

    #[test]
    fn test_zero_samples_rejected() {
        let space = CubicParameterSpace::interval(0.0, 1.0).unwrap();
        assert!(matches!(
            space.sample(0, SamplingMode::Uniform),
            Err(CoreError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_invalid_extents() {
        assert!(CubicParameterSpace::new(Vec::new()).is_err());
        assert!(CubicParameterSpace::interval(2.0, 1.0).is_err());
        assert!(CubicParameterSpace::interval(0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_sampling_mode_from_str() {
        assert_eq!("uniform".parse::<SamplingMode>().unwrap(), SamplingMode::Uniform);
        assert!(matches!(
            "random".parse::<SamplingMode>(),
            Err(CoreError::UnsupportedSamplingMode(mode)) if mode == "random"
        ));
    }

    #[test]
    fn test_parameter_display_and_tag() {
        assert_eq!(Parameter::Scalar(0.5).file_tag(), "0_5");
        assert_eq!(Parameter::Vector(vec![1.0, 2.5]).to_string(), "[1, 2.5]");
        assert_eq!(Parameter::from(vec![3.0]), Parameter::Scalar(3.0));
    }
}
