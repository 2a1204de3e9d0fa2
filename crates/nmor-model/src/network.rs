use burn::{
    module::{Module, Param},
    nn::{Linear, LinearConfig},
    tensor::{activation, backend::Backend, Tensor, TensorData},
};
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Dense network `R^n_0 -> R^n_last` with `tanh` between the layers.
#[derive(Module, Debug)]
pub struct FullyConnectedNetwork<B: Backend> {
    layers: Vec<Linear<B>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Input size, hidden sizes and output size.
    pub layer_sizes: Vec<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            layer_sizes: vec![1, 20, 20, 20, 1],
        }
    }
}

impl NetworkConfig {
    pub fn new(layer_sizes: Vec<usize>) -> Self {
        Self { layer_sizes }
    }

    /// `[input] + hidden + [output]`.
    pub fn from_hidden(input: usize, hidden: &[usize], output: usize) -> Self {
        let mut layer_sizes = Vec::with_capacity(hidden.len() + 2);
        layer_sizes.push(input);
        layer_sizes.extend_from_slice(hidden);
        layer_sizes.push(output);
        Self { layer_sizes }
    }

    pub fn input_size(&self) -> usize {
        self.layer_sizes.first().copied().unwrap_or(0)
    }

    pub fn output_size(&self) -> usize {
        self.layer_sizes.last().copied().unwrap_or(0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.layer_sizes.len() < 2 {
            return Err(ModelError::invalid_configuration(format!(
                "A network needs at least an input and an output layer, got sizes {:?}",
                self.layer_sizes
            )));
        }
        if self.layer_sizes.contains(&0) {
            return Err(ModelError::invalid_configuration(format!(
                "Layer sizes must be positive, got {:?}",
                self.layer_sizes
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<FullyConnectedNetwork<B>> {
        self.validate()?;
        let layers = self
            .layer_sizes
            .windows(2)
            .map(|pair| LinearConfig::new(pair[0], pair[1]).init(device))
            .collect();
        Ok(FullyConnectedNetwork { layers })
    }

    /// Like [`init`](Self::init), with weights and biases drawn from
    /// `U(-1/sqrt(fan_in), 1/sqrt(fan_in))` by a `ChaCha8Rng` seeded with `seed`.
    pub fn init_seeded<B: Backend>(
        &self,
        seed: u64,
        device: &B::Device,
    ) -> Result<FullyConnectedNetwork<B>> {
        self.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let layers = self
            .layer_sizes
            .windows(2)
            .map(|pair| {
                let (fan_in, fan_out) = (pair[0], pair[1]);
                let bound = 1.0 / (fan_in as f32).sqrt();
                let uniform = Uniform::new_inclusive(-bound, bound);
                let weight: Vec<f32> = (0..fan_in * fan_out)
                    .map(|_| uniform.sample(&mut rng))
                    .collect();
                let bias: Vec<f32> = (0..fan_out).map(|_| uniform.sample(&mut rng)).collect();

                let mut linear = LinearConfig::new(fan_in, fan_out).init(device);
                linear.weight = Param::from_tensor(Tensor::from_data(
                    TensorData::new(weight, [fan_in, fan_out]),
                    device,
                ));
                linear.bias = Some(Param::from_tensor(Tensor::from_data(
                    TensorData::new(bias, [fan_out]),
                    device,
                )));
                linear
            })
            .collect();
        Ok(FullyConnectedNetwork { layers })
    }
}

impl<B: Backend> FullyConnectedNetwork<B> {
    /// Evaluate a batch `[batch, input] -> [batch, output]`.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len().saturating_sub(1);
        self.layers
            .iter()
            .enumerate()
            .fold(input, |x, (i, layer)| {
                let x = layer.forward(x);
                if i < last {
                    activation::tanh(x)
                } else {
                    x
                }
            })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}
