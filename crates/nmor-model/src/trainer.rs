//! Minibatch training of [`FullyConnectedNetwork`]s.
//!
//! Adam on the mean squared error, with samples reshuffled every epoch by a
//! seeded `ChaCha8Rng`. The network with the lowest validation loss seen so
//! far is kept and returned.

use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor, TensorData};
use burn_ndarray::NdArray;
use nmor_core::ExecutionBudget;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::network::FullyConnectedNetwork;

/// Backend on which surrogates are trained.
pub type TrainingBackend = Autodiff<NdArray<f32>>;

/// One `(input, target)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub input: Vec<f64>,
    pub target: Vec<f64>,
}

impl TrainingSample {
    pub fn new(input: Vec<f64>, target: Vec<f64>) -> Self {
        Self { input, target }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Seed of the per-epoch shuffling.
    pub seed: u64,
    /// Epochs without validation improvement before stopping.
    pub patience: Option<usize>,
    pub log_interval: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            epochs: 1000,
            batch_size: 20,
            seed: 0,
            patience: Some(100),
            log_interval: 100,
        }
    }
}

impl TrainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = Some(patience);
        self
    }

    pub fn without_patience(mut self) -> Self {
        self.patience = None;
        self
    }

    pub fn with_log_interval(mut self, log_interval: usize) -> Self {
        self.log_interval = log_interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) || !self.learning_rate.is_finite() {
            return Err(ModelError::invalid_configuration(format!(
                "Learning rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        if self.epochs == 0 {
            return Err(ModelError::invalid_configuration("Epochs must be positive"));
        }
        if self.batch_size == 0 {
            return Err(ModelError::invalid_configuration(
                "Batch size must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train `network` and return the best validation loss with its network.
    ///
    /// An empty `validation` set scores the network on `training`.
    pub fn train<B: AutodiffBackend>(
        &self,
        mut network: FullyConnectedNetwork<B>,
        training: &[TrainingSample],
        validation: &[TrainingSample],
        budget: &ExecutionBudget,
    ) -> Result<(f64, FullyConnectedNetwork<B::InnerBackend>)> {
        self.config.validate()?;
        if training.is_empty() {
            return Err(ModelError::invalid_configuration(
                "Training set must not be empty",
            ));
        }
        check_sample_shapes(training, validation)?;

        let device = network.devices().into_iter().next().unwrap_or_default();
        let scoring = if validation.is_empty() {
            training
        } else {
            validation
        };
        let (scoring_inputs, scoring_targets) =
            samples_to_tensors::<B::InnerBackend>(scoring, &device);

        let mut optimizer = AdamConfig::new().init::<B, FullyConnectedNetwork<B>>();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut order: Vec<usize> = (0..training.len()).collect();
        let mut best: Option<(f64, FullyConnectedNetwork<B::InnerBackend>)> = None;
        let mut stalled = 0;

        for epoch in 0..self.config.epochs {
            budget.check()?;
            order.shuffle(&mut rng);

            let mut epoch_loss = 0.0;
            for batch in order.chunks(self.config.batch_size) {
                let samples: Vec<TrainingSample> =
                    batch.iter().map(|&i| training[i].clone()).collect();
                let (inputs, targets) = samples_to_tensors::<B>(&samples, &device);
                let loss = mse(network.forward(inputs), targets);
                let value = loss.clone().into_scalar().elem::<f64>();
                if !value.is_finite() {
                    return Err(ModelError::diverged(format!(
                        "Training loss became {} in epoch {}",
                        value, epoch
                    )));
                }
                epoch_loss += value * batch.len() as f64;

                let grads = GradientsParams::from_grads(loss.backward(), &network);
                network = optimizer.step(self.config.learning_rate, network, grads);
            }
            let training_loss = epoch_loss / training.len() as f64;

            let current = network.valid();
            let validation_loss = mse(
                current.forward(scoring_inputs.clone()),
                scoring_targets.clone(),
            )
            .into_scalar()
            .elem::<f64>();
            if !validation_loss.is_finite() {
                return Err(ModelError::diverged(format!(
                    "Validation loss became {} in epoch {}",
                    validation_loss, epoch
                )));
            }

            if self.config.log_interval > 0 && epoch % self.config.log_interval == 0 {
                tracing::debug!(
                    "Epoch {}/{} | training loss: {:.6e} | validation loss: {:.6e}",
                    epoch + 1,
                    self.config.epochs,
                    training_loss,
                    validation_loss
                );
            }

            match &best {
                Some((best_loss, _)) if validation_loss >= *best_loss => stalled += 1,
                _ => {
                    best = Some((validation_loss, current));
                    stalled = 0;
                }
            }
            if let Some(patience) = self.config.patience {
                if stalled >= patience {
                    tracing::debug!(
                        "Stopping after epoch {}: no improvement for {} epochs",
                        epoch + 1,
                        patience
                    );
                    break;
                }
            }
        }

        best.ok_or_else(|| ModelError::diverged("Training finished without a finite loss"))
    }
}

fn mse<B: Backend>(prediction: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
    (prediction - target).powf_scalar(2.0).mean()
}

fn check_sample_shapes(training: &[TrainingSample], validation: &[TrainingSample]) -> Result<()> {
    let first = &training[0];
    for sample in training.iter().chain(validation) {
        if sample.input.len() != first.input.len() {
            return Err(ModelError::shape_mismatch(
                &[first.input.len()],
                &[sample.input.len()],
            ));
        }
        if sample.target.len() != first.target.len() {
            return Err(ModelError::shape_mismatch(
                &[first.target.len()],
                &[sample.target.len()],
            ));
        }
    }
    Ok(())
}

/// Row-stacked `[n, d]` tensors of a non-empty, uniformly shaped sample set.
fn samples_to_tensors<B: Backend>(
    samples: &[TrainingSample],
    device: &B::Device,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let inputs: Vec<&[f64]> = samples.iter().map(|s| s.input.as_slice()).collect();
    let targets: Vec<&[f64]> = samples.iter().map(|s| s.target.as_slice()).collect();
    (rows_to_tensor(&inputs, device), rows_to_tensor(&targets, device))
}

pub(crate) fn rows_to_tensor<B: Backend>(rows: &[&[f64]], device: &B::Device) -> Tensor<B, 2> {
    let width = rows.first().map_or(0, |row| row.len());
    let data: Vec<f32> = rows.iter().flat_map(|row| row.iter().map(|v| *v as f32)).collect();
    Tensor::from_data(TensorData::new(data, [rows.len(), width]), device)
}

pub(crate) fn rows_from_tensor<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<Vec<f64>>> {
    let [_, width] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ModelError::tensor(format!("{e:?}")))?;
    Ok(values
        .chunks(width.max(1))
        .map(|row| row.iter().map(|v| f64::from(*v)).collect())
        .collect())
}
