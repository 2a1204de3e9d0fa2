//! Registration-based reduction with a neural-network surrogate.
//!
//! 1. solve the full-order model for every training parameter,
//! 2. register every solution against the reference solution,
//! 3. compress the initial velocity fields with POD,
//! 4. project the fields onto the basis,
//! 5. train networks mapping parameters to coefficients, keep the best restart,
//! 6. assemble the [`ReducedSpacetimeModel`].

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nmor_core::{
    pod, project, CancellationToken, ExecutionBudget, HostBackend, L2Product, Parameter,
    PodConfig, PodResult, ProductOperator, ScalarField, VelocityField,
};
use nmor_model::{
    FullOrderModel, FullyConnectedNetwork, NetworkConfig, NormalizationStats,
    ReducedSpacetimeModel, TrainedSurrogate, Trainer, TrainingBackend, TrainingSample,
};
use nmor_registration::RegistrationOracle;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::cache::{self, FULL_SOLUTIONS_FILE, VELOCITY_FIELDS_FILE};
use crate::config::{FailurePolicy, ProductKind, ReductionConfig, RegistrationStrategy};
use crate::error::{ReductionError, Result};
use crate::intermediate::IntermediateResults;
use crate::records::{ReducedSnapshot, RegisteredSnapshot, RegistrationOutcome, Snapshot};
use crate::report::ReductionReport;

/// Outcome of the restarted training.
#[derive(Debug)]
pub struct RestartsOutcome {
    pub network: FullyConnectedNetwork<HostBackend>,
    pub best_loss: f64,
    /// Loss per restart, `None` where the restart failed.
    pub losses: Vec<Option<f64>>,
}

/// Shuffle `samples` and split them into `(validation, training)`.
///
/// With `k = floor(0.1 n) + 1`, validation takes the first `k` shuffled
/// samples and training everything from index `k + 1`; the sample at `k` is
/// used by neither.
pub fn split_training_data(
    mut samples: Vec<TrainingSample>,
    seed: u64,
) -> (Vec<TrainingSample>, Vec<TrainingSample>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    samples.shuffle(&mut rng);
    let n = samples.len();
    let k = (0.1 * n as f64).floor() as usize + 1;
    let training = samples.get(k + 1..).map(<[_]>::to_vec).unwrap_or_default();
    samples.truncate(k);
    (samples, training)
}

fn stage<T>(name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    tracing::info!("{} ...", name);
    let start = Instant::now();
    let result = f();
    match &result {
        Ok(_) => tracing::info!("{} done in {:.2}s", name, start.elapsed().as_secs_f64()),
        Err(err) => tracing::error!("{} failed: {}", name, err),
    }
    result
}

/// Builds a [`ReducedSpacetimeModel`] for a full-order model.
pub struct NonlinearNeuralNetworkReductor {
    fom: Arc<dyn FullOrderModel>,
    training_set: Vec<Parameter>,
    reference_parameter: Parameter,
    reference_solution: ScalarField,
    oracle: Arc<dyn RegistrationOracle>,
    cancellation: CancellationToken,
}

impl NonlinearNeuralNetworkReductor {
    /// Solves the full-order model once for the reference solution.
    pub fn new(
        fom: Arc<dyn FullOrderModel>,
        training_set: Vec<Parameter>,
        reference_parameter: Parameter,
        oracle: Arc<dyn RegistrationOracle>,
    ) -> Result<Self> {
        tracing::info!(
            "Computing reference solution of {} for mu={} ...",
            fom.name(),
            reference_parameter
        );
        let reference_solution = fom.solve(&reference_parameter)?;
        Ok(Self {
            fom,
            training_set,
            reference_parameter,
            reference_solution,
            oracle,
            cancellation: CancellationToken::new(),
        })
    }

    /// Cancel every registration and training started by this reductor through `token`.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn training_set(&self) -> &[Parameter] {
        &self.training_set
    }

    pub fn reference_parameter(&self) -> &Parameter {
        &self.reference_parameter
    }

    pub fn reference_solution(&self) -> &ScalarField {
        &self.reference_solution
    }

    pub fn oracle(&self) -> &Arc<dyn RegistrationOracle> {
        &self.oracle
    }

    pub fn reduce(&self, config: &ReductionConfig) -> Result<(ReducedSpacetimeModel, ReductionReport)> {
        config.validate()?;
        let cache_dir = match &config.write_caches {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Some(dir.as_path())
            }
            None => None,
        };

        let snapshots = stage("Computing full solutions", || {
            self.compute_full_solutions(config.full_solutions_cache.as_deref())
        })?;
        if let (Some(dir), None) = (cache_dir, &config.full_solutions_cache) {
            self.save_full_solutions(&dir.join(FULL_SOLUTIONS_FILE), &snapshots)?;
        }

        let outcome = stage("Computing mappings and vector fields", || {
            match &config.velocity_fields_cache {
                Some(path) => Ok(RegistrationOutcome {
                    snapshots: cache::attach_velocity_fields(
                        snapshots,
                        cache::load_velocity_fields(path)?,
                    )?,
                    skipped: Vec::new(),
                }),
                None => self.register_full_solutions(snapshots, config),
            }
        })?;
        if let (Some(dir), None) = (cache_dir, &config.velocity_fields_cache) {
            self.save_velocity_fields(&dir.join(VELOCITY_FIELDS_FILE), &outcome.snapshots)?;
        }
        let full_velocity_fields = outcome.velocity_fields();
        let product = self.product(config.product);

        let basis = stage("Reducing vector fields using POD", || {
            let pod_config = PodConfig::new(config.max_basis_size)
                .with_rtol(config.pod_rtol)
                .with_atol(config.pod_atol);
            let basis = pod(&full_velocity_fields, &pod_config, product)?;
            if basis.is_empty() {
                return Err(ReductionError::degenerate_basis(format!(
                    "All {} velocity fields vanish under the {} product",
                    full_velocity_fields.len(),
                    product.name()
                )));
            }
            Ok(basis)
        })?;

        tracing::info!("Computing reduced coefficients ...");
        let coefficients = project(&full_velocity_fields, &basis, product)?;
        let reduced: Vec<ReducedSnapshot> = outcome
            .snapshots
            .into_iter()
            .zip(coefficients)
            .map(|(snapshot, c)| snapshot.reduced(c))
            .collect();

        tracing::info!("Approximating mapping from parameters to reduced coefficients ...");
        let samples: Vec<TrainingSample> = reduced
            .iter()
            .map(|r| TrainingSample::new(r.parameter.to_vec(), r.coefficients.clone()))
            .collect();
        let (validation_raw, mut training_raw) = split_training_data(samples, config.seed);
        if training_raw.is_empty() {
            tracing::warn!(
                "No samples left for training, training on the {} validation samples",
                validation_raw.len()
            );
            training_raw = validation_raw.clone();
        }
        let stats = NormalizationStats::compute(&training_raw, &validation_raw)?;
        let training_data = stats.normalize_samples(&training_raw)?;
        let validation_data = stats.normalize_samples(&validation_raw)?;

        let input_dim = reduced.first().map_or(0, |r| r.parameter.dim());
        let network_config = NetworkConfig::from_hidden(input_dim, &config.hidden_layers, basis.len());
        let restarts = stage(
            &format!("Performing {} restarts of neural network training", config.restarts),
            || self.multiple_restarts_training(&training_data, &validation_data, &network_config, config),
        )?;
        tracing::info!("Trained neural network with loss of {:.6e} ...", restarts.best_loss);

        tracing::info!("Building reduced model ...");
        let surrogate = TrainedSurrogate::new(restarts.network, network_config, stats);
        let rom = self.build_rom(basis.clone(), surrogate)?;

        let report = ReductionReport {
            reduced_velocity_fields: basis.basis_matrix(),
            singular_values: basis.singular_values().to_vec(),
            full_velocity_fields,
            training_data,
            validation_data,
            best_loss: restarts.best_loss,
            restart_losses: restarts.losses,
            skipped_parameters: outcome.skipped,
            reduced_snapshots: reduced,
        };
        Ok((rom, report))
    }

    /// Solve every training parameter, or load the snapshots from `cache`.
    pub fn compute_full_solutions(&self, cache: Option<&Path>) -> Result<Vec<Snapshot>> {
        if let Some(path) = cache {
            return cache::load_snapshots(path);
        }
        self.training_set
            .iter()
            .map(|mu| Ok(Snapshot::new(mu.clone(), self.fom.solve(mu)?)))
            .collect()
    }

    /// Register one snapshot against the reference solution.
    pub fn perform_single_registration(
        &self,
        snapshot: &Snapshot,
        initial: Option<&VelocityField>,
        config: &ReductionConfig,
        intermediate: Option<&IntermediateResults>,
    ) -> Result<RegisteredSnapshot> {
        let budget = self.budget(config.registration_timeout);
        let result = self
            .oracle
            .register(
                &self.reference_solution,
                &snapshot.solution,
                initial,
                &config.registration_params,
                &budget,
            )
            .map_err(|source| ReductionError::RegistrationFailed {
                parameter: snapshot.parameter.clone(),
                source,
            })?;
        tracing::info!(
            "Registered mu={} in {} iterations ({:.2}s, {}), energy {:.6e}",
            snapshot.parameter,
            result.iterations,
            result.time.as_secs_f64(),
            result.reason_ended,
            result.energy
        );
        if let Some(intermediate) = intermediate {
            intermediate.record(snapshot, &result)?;
        }
        Ok(snapshot.clone().registered(result.initial_vector_field))
    }

    /// Register all snapshots with the configured strategy and failure policy.
    pub fn register_full_solutions(
        &self,
        snapshots: Vec<Snapshot>,
        config: &ReductionConfig,
    ) -> Result<RegistrationOutcome> {
        let intermediate = config
            .intermediate_results
            .as_ref()
            .map(|dir| IntermediateResults::new(dir))
            .transpose()?;
        let intermediate = intermediate.as_ref();

        let results: Vec<Result<Option<RegisteredSnapshot>>> = match config.strategy {
            RegistrationStrategy::IndependentParallel { num_workers } => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(num_workers)
                    .build()
                    .map_err(|e| ReductionError::ThreadPool(e.to_string()))?;
                tracing::info!("Registering {} snapshots on {} workers ...", snapshots.len(), num_workers);
                pool.install(|| {
                    snapshots
                        .par_iter()
                        .map(|s| self.register_with_policy(s, None, config, intermediate))
                        .collect()
                })
            }
            RegistrationStrategy::SequentialWarmStart {
                reuse_vector_fields,
            } => {
                let mut results = Vec::with_capacity(snapshots.len());
                let mut previous: Option<VelocityField> = None;
                for snapshot in &snapshots {
                    let initial = if reuse_vector_fields {
                        previous.as_ref()
                    } else {
                        None
                    };
                    if initial.is_some() {
                        tracing::info!("Reusing velocity field from previous registration ...");
                    }
                    let result = self.register_with_policy(snapshot, initial, config, intermediate);
                    if let Ok(Some(registered)) = &result {
                        previous = Some(registered.velocity_field.clone());
                    }
                    let failed = result.is_err();
                    results.push(result);
                    if failed {
                        break;
                    }
                }
                results
            }
        };

        let mut outcome = RegistrationOutcome::default();
        for (snapshot, result) in snapshots.iter().zip(results) {
            match result? {
                Some(registered) => outcome.snapshots.push(registered),
                None => outcome.skipped.push(snapshot.parameter.clone()),
            }
        }
        if !outcome.skipped.is_empty() {
            tracing::warn!(
                "Skipped {} of {} parameters after failed registrations",
                outcome.skipped.len(),
                snapshots.len()
            );
        }
        Ok(outcome)
    }

    fn register_with_policy(
        &self,
        snapshot: &Snapshot,
        initial: Option<&VelocityField>,
        config: &ReductionConfig,
        intermediate: Option<&IntermediateResults>,
    ) -> Result<Option<RegisteredSnapshot>> {
        let err = match self.perform_single_registration(snapshot, initial, config, intermediate) {
            Ok(registered) => return Ok(Some(registered)),
            Err(err) => err,
        };
        if self.cancellation.is_cancelled() {
            return Err(err);
        }
        match config.registration_failure {
            FailurePolicy::Abort => Err(err),
            FailurePolicy::Skip => {
                tracing::warn!("Skipping mu={}: {}", snapshot.parameter, err);
                Ok(None)
            }
            FailurePolicy::Retry { attempts } => {
                let mut last = err;
                for attempt in 1..=attempts {
                    tracing::warn!(
                        "Retrying registration of mu={} from zero ({}/{}): {}",
                        snapshot.parameter,
                        attempt,
                        attempts,
                        last
                    );
                    match self.perform_single_registration(snapshot, None, config, intermediate) {
                        Ok(registered) => return Ok(Some(registered)),
                        Err(err) => last = err,
                    }
                    if self.cancellation.is_cancelled() {
                        break;
                    }
                }
                Err(last)
            }
        }
    }

    /// Train `config.restarts` networks and keep the one with the lowest validation loss.
    pub fn multiple_restarts_training(
        &self,
        training: &[TrainingSample],
        validation: &[TrainingSample],
        network_config: &NetworkConfig,
        config: &ReductionConfig,
    ) -> Result<RestartsOutcome> {
        let device = Default::default();
        let mut best: Option<(f64, FullyConnectedNetwork<HostBackend>)> = None;
        let mut losses = Vec::with_capacity(config.restarts);

        for restart in 0..config.restarts {
            let seed = config.seed.wrapping_add(restart as u64 + 1);
            let trainer = Trainer::new(config.trainer.clone().with_seed(seed));
            let budget = self.budget(config.training_timeout);
            let attempt = network_config
                .init_seeded::<TrainingBackend>(seed, &device)
                .and_then(|network| trainer.train(network, training, validation, &budget));

            match attempt {
                Ok((loss, network)) => {
                    tracing::debug!("Restart {}/{}: loss {:.6e}", restart + 1, config.restarts, loss);
                    losses.push(Some(loss));
                    if best.as_ref().map_or(true, |(best_loss, _)| loss < *best_loss) {
                        best = Some((loss, network));
                    }
                }
                Err(err) => {
                    if self.cancellation.is_cancelled() {
                        return Err(err.into());
                    }
                    tracing::warn!("Restart {}/{} failed: {}", restart + 1, config.restarts, err);
                    losses.push(None);
                }
            }
        }

        let (best_loss, network) = best.ok_or(ReductionError::AllRestartsFailed(config.restarts))?;
        Ok(RestartsOutcome {
            network,
            best_loss,
            losses,
        })
    }

    pub fn build_rom(&self, basis: PodResult, surrogate: TrainedSurrogate) -> Result<ReducedSpacetimeModel> {
        Ok(ReducedSpacetimeModel::new(
            self.reference_solution.clone(),
            basis,
            surrogate,
            self.oracle.clone(),
        )?)
    }

    pub fn save_full_solutions(&self, path: &Path, snapshots: &[Snapshot]) -> Result<()> {
        cache::save_snapshots(path, snapshots)
    }

    pub fn save_velocity_fields(&self, path: &Path, snapshots: &[RegisteredSnapshot]) -> Result<()> {
        cache::save_velocity_fields(path, snapshots)
    }

    fn product(&self, kind: ProductKind) -> &dyn ProductOperator {
        match kind {
            ProductKind::L2 => &L2Product,
            ProductKind::CauchyNavier => self.oracle.product_operator(),
        }
    }

    fn budget(&self, timeout: Option<Duration>) -> ExecutionBudget {
        ExecutionBudget::new(timeout, self.cancellation.clone())
    }
}
