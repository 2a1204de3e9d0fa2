//! Trained parameter-to-coefficient map.

use burn::module::Module;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use nmor_core::{HostBackend, Parameter};

use crate::error::{ModelError, Result};
use crate::network::{FullyConnectedNetwork, NetworkConfig};
use crate::normalization::NormalizationStats;
use crate::trainer::{rows_from_tensor, rows_to_tensor};

type NetworkRecord = <FullyConnectedNetwork<HostBackend> as Module<HostBackend>>::Record;
type WeightRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// Network plus the statistics its inputs and outputs were scaled with.
#[derive(Debug, Clone)]
pub struct TrainedSurrogate {
    network: FullyConnectedNetwork<HostBackend>,
    config: NetworkConfig,
    stats: NormalizationStats,
}

impl TrainedSurrogate {
    pub fn new(
        network: FullyConnectedNetwork<HostBackend>,
        config: NetworkConfig,
        stats: NormalizationStats,
    ) -> Self {
        Self {
            network,
            config,
            stats,
        }
    }

    /// Rebuild a surrogate from weights written by [`weights_to_bytes`](Self::weights_to_bytes).
    pub fn from_weight_bytes(
        bytes: Vec<u8>,
        config: NetworkConfig,
        stats: NormalizationStats,
    ) -> Result<Self> {
        let device = Default::default();
        let record: NetworkRecord = Recorder::<HostBackend>::load(&WeightRecorder::default(), bytes, &device)
            .map_err(|e| ModelError::record(e.to_string()))?;
        let network = config.init::<HostBackend>(&device)?.load_record(record);
        Ok(Self::new(network, config, stats))
    }

    pub fn weights_to_bytes(&self) -> Result<Vec<u8>> {
        Recorder::<HostBackend>::record(
            &WeightRecorder::default(),
            self.network.clone().into_record(),
            (),
        )
        .map_err(|e| ModelError::record(e.to_string()))
    }

    pub fn network(&self) -> &FullyConnectedNetwork<HostBackend> {
        &self.network
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn stats(&self) -> &NormalizationStats {
        &self.stats
    }

    /// Number of reduced coefficients produced per parameter.
    pub fn output_size(&self) -> usize {
        self.config.output_size()
    }

    /// Normalize `mu`, evaluate the network, denormalize the result.
    pub fn evaluate(&self, mu: &Parameter) -> Result<Vec<f64>> {
        let input = mu.to_vec();
        if input.len() != self.config.input_size() {
            return Err(ModelError::shape_mismatch(
                &[self.config.input_size()],
                &[input.len()],
            ));
        }
        let normalized = self.stats.normalize_input(&input)?;
        let output = self
            .network
            .forward(rows_to_tensor(&[normalized.as_slice()], &Default::default()));
        let row = rows_from_tensor(output)?
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::tensor("Network returned no output row"))?;
        Ok(self.stats.denormalize_output(&row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surrogate() -> TrainedSurrogate {
        let config = NetworkConfig::from_hidden(1, &[4], 2);
        let network = config.init_seeded::<HostBackend>(9, &Default::default()).unwrap();
        let stats = NormalizationStats::new(0.5, 1.5, -1.0, 3.0).unwrap();
        TrainedSurrogate::new(network, config, stats)
    }

    #[test]
    fn test_evaluate_output_size() {
        let surrogate = surrogate();
        let coefficients = surrogate.evaluate(&Parameter::Scalar(1.0)).unwrap();
        assert_eq!(coefficients.len(), 2);
        assert!(coefficients.iter().all(|c| c.is_finite()));
        assert!(matches!(
            surrogate.evaluate(&Parameter::Vector(vec![1.0, 2.0])),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_weight_bytes_round_trip() {
        let surrogate = surrogate();
        let bytes = surrogate.weights_to_bytes().unwrap();
        let restored = TrainedSurrogate::from_weight_bytes(
            bytes,
            surrogate.config().clone(),
            *surrogate.stats(),
        )
        .unwrap();
        let mu = Parameter::Scalar(0.8);
        assert_eq!(surrogate.evaluate(&mu).unwrap(), restored.evaluate(&mu).unwrap());
    }
}
