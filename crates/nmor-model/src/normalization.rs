//! Min-max scaling of network inputs and outputs.
//!
//! The statistics are global scalars: one range shared by every input
//! component and one shared by every output component, both taken over the
//! union of training and validation samples.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::trainer::TrainingSample;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    min_input: f64,
    max_input: f64,
    min_output: f64,
    max_output: f64,
}

impl NormalizationStats {
    pub fn new(min_input: f64, max_input: f64, min_output: f64, max_output: f64) -> Result<Self> {
        let stats = Self {
            min_input,
            max_input,
            min_output,
            max_output,
        };
        stats.input_span()?;
        stats.output_span()?;
        Ok(stats)
    }

    /// Ranges over the union of `training` and `validation`.
    pub fn compute(training: &[TrainingSample], validation: &[TrainingSample]) -> Result<Self> {
        let samples = || training.iter().chain(validation);
        if samples().next().is_none() {
            return Err(ModelError::invalid_configuration(
                "Cannot compute normalization statistics without samples",
            ));
        }
        let (min_input, max_input) = min_max(samples().flat_map(|s| s.input.iter().copied()));
        let (min_output, max_output) = min_max(samples().flat_map(|s| s.target.iter().copied()));
        Self::new(min_input, max_input, min_output, max_output)
    }

    pub fn min_input(&self) -> f64 {
        self.min_input
    }

    pub fn max_input(&self) -> f64 {
        self.max_input
    }

    pub fn min_output(&self) -> f64 {
        self.min_output
    }

    pub fn max_output(&self) -> f64 {
        self.max_output
    }

    pub fn normalize_input(&self, input: &[f64]) -> Result<Vec<f64>> {
        let span = self.input_span()?;
        Ok(input.iter().map(|x| (x - self.min_input) / span).collect())
    }

    pub fn normalize_output(&self, output: &[f64]) -> Result<Vec<f64>> {
        let span = self.output_span()?;
        Ok(output.iter().map(|y| (y - self.min_output) / span).collect())
    }

    pub fn denormalize_output(&self, output: &[f64]) -> Vec<f64> {
        let span = self.max_output - self.min_output;
        output.iter().map(|y| y * span + self.min_output).collect()
    }

    /// Normalize inputs and targets of every sample.
    pub fn normalize_samples(&self, samples: &[TrainingSample]) -> Result<Vec<TrainingSample>> {
        samples
            .iter()
            .map(|sample| {
                Ok(TrainingSample::new(
                    self.normalize_input(&sample.input)?,
                    self.normalize_output(&sample.target)?,
                ))
            })
            .collect()
    }

    fn input_span(&self) -> Result<f64> {
        span(self.min_input, self.max_input, "input")
    }

    fn output_span(&self) -> Result<f64> {
        span(self.min_output, self.max_output, "output")
    }
}

fn span(min: f64, max: f64, name: &str) -> Result<f64> {
    let span = max - min;
    if !(span > 0.0) || !span.is_finite() {
        return Err(ModelError::degenerate_normalization(format!(
            "{} range [{}, {}] is empty",
            name, min, max
        )));
    }
    Ok(span)
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}
