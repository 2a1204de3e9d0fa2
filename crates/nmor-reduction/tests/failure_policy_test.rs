use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ndarray::Array3;
use nmor_core::{
    CubicParameterSpace, ExecutionBudget, L2Product, Parameter, ProductOperator, SamplerOptions,
    ScalarField, SpaceTimeGrid, TimeDependentVelocityField, VelocityField,
};
use nmor_model::{AnalyticalModel, FullOrderModel, TrainerConfig};
use nmor_reduction::cache::{FULL_SOLUTIONS_FILE, VELOCITY_FIELDS_FILE};
use nmor_reduction::{
    FailurePolicy, NonlinearNeuralNetworkReductor, ProductKind, ReductionConfig, ReductionError,
    RegistrationStrategy, MAPPING_ERRORS_FILE,
};
use nmor_registration::{
    RegistrationError, RegistrationOracle, RegistrationParams, RegistrationResult, StopReason,
};

const SHAPE: [usize; 2] = [8, 4];

fn mean(field: &ScalarField) -> f64 {
    field.data().mean().unwrap()
}

/// Registers by matching means; the target parameter is recovered as the mean ratio.
#[derive(Debug, Default)]
struct MeanShiftOracle {
    product: L2Product,
    calls: AtomicUsize,
    warm_started: Mutex<Vec<bool>>,
    always_fails: Vec<f64>,
    fails_once: bool,
    failed: Mutex<Vec<f64>>,
}

impl MeanShiftOracle {
    fn failing_for(mu: f64) -> Self {
        Self {
            always_fails: vec![mu],
            ..Self::default()
        }
    }

    fn failing_once() -> Self {
        Self {
            fails_once: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn should_fail(&self, mu: f64) -> bool {
        if self.always_fails.iter().any(|f| (f - mu).abs() < 1e-9) {
            return true;
        }
        if !self.fails_once {
            return false;
        }
        let mut failed = self.failed.lock().unwrap();
        if failed.iter().any(|f| (f - mu).abs() < 1e-9) {
            false
        } else {
            failed.push(mu);
            true
        }
    }
}

impl RegistrationOracle for MeanShiftOracle {
    fn register(
        &self,
        reference: &ScalarField,
        target: &ScalarField,
        initial: Option<&VelocityField>,
        _params: &RegistrationParams,
        _budget: &ExecutionBudget,
    ) -> nmor_registration::Result<RegistrationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.warm_started.lock().unwrap().push(initial.is_some());

        let mu = mean(target) / mean(reference);
        if self.should_fail(mu) {
            return Err(RegistrationError::convergence_failure(format!(
                "no mapping for mu={mu}"
            )));
        }

        let shift = mean(target) - mean(reference);
        let mut data = Array3::zeros((2, SHAPE[0], SHAPE[1]));
        data.index_axis_mut(ndarray::Axis(0), 0).fill(shift);
        let velocity = VelocityField::new(data)?;
        Ok(RegistrationResult {
            vector_fields: TimeDependentVelocityField::stationary(velocity.clone(), 1)?,
            initial_vector_field: velocity,
            transformed_input: reference.clone(),
            iterations: 1,
            time: Duration::ZERO,
            energy_regularizer: 0.0,
            energy_intensity_unscaled: 0.0,
            energy_intensity: 0.0,
            energy: 0.0,
            norm_gradient: 0.0,
            reason_ended: StopReason::MaxIterations,
        })
    }

    fn integrate_forward_vector_field(
        &self,
        initial: &VelocityField,
    ) -> nmor_registration::Result<TimeDependentVelocityField> {
        Ok(TimeDependentVelocityField::stationary(initial.clone(), 1)?)
    }

    fn sampler_options(&self) -> SamplerOptions {
        SamplerOptions::default()
    }

    fn product_operator(&self) -> &dyn ProductOperator {
        &self.product
    }
}

fn fom() -> Arc<dyn FullOrderModel> {
    Arc::new(AnalyticalModel::new(
        SpaceTimeGrid::unit(SHAPE[0], SHAPE[1]).unwrap(),
        CubicParameterSpace::interval(0.5, 2.0).unwrap(),
        |x, _t, mu| mu.to_vec()[0] * (x + 0.5),
    ))
}

fn training_set() -> Vec<Parameter> {
    [0.5, 0.8, 1.2, 1.6, 2.0]
        .into_iter()
        .map(Parameter::Scalar)
        .collect()
}

fn reductor(
    training_set: Vec<Parameter>,
    oracle: &Arc<MeanShiftOracle>,
) -> NonlinearNeuralNetworkReductor {
    let oracle: Arc<dyn RegistrationOracle> = oracle.clone();
    NonlinearNeuralNetworkReductor::new(fom(), training_set, Parameter::Scalar(1.0), oracle)
        .unwrap()
}

fn config() -> ReductionConfig {
    ReductionConfig::new()
        .with_product(ProductKind::L2)
        .with_max_basis_size(1)
        .with_restarts(2)
        .with_hidden_layers(vec![4])
        .with_trainer(TrainerConfig::new().with_epochs(20).with_learning_rate(1e-2))
}

#[test]
fn test_abort_policy_stops_at_first_failure() {
    let oracle = Arc::new(MeanShiftOracle::failing_for(0.8));
    let reductor = reductor(training_set(), &oracle);

    let result = reductor.reduce(&config().with_registration_failure(FailurePolicy::Abort));
    match result {
        Err(ReductionError::RegistrationFailed { parameter, .. }) => {
            assert_eq!(parameter, Parameter::Scalar(0.8));
        }
        other => panic!("expected a registration failure, got {other:?}"),
    }
    assert_eq!(oracle.calls(), 2);
}

#[test]
fn test_skip_policy_drops_failed_parameters() {
    let oracle = Arc::new(MeanShiftOracle::failing_for(0.8));
    let reductor = reductor(training_set(), &oracle);

    let (rom, report) = reductor
        .reduce(&config().with_registration_failure(FailurePolicy::Skip))
        .unwrap();
    assert_eq!(report.skipped_parameters, vec![Parameter::Scalar(0.8)]);
    assert_eq!(report.full_velocity_fields.len(), 4);
    assert_eq!(report.reduced_snapshots.len(), 4);
    assert!(report
        .reduced_snapshots
        .iter()
        .all(|s| s.parameter != Parameter::Scalar(0.8)));
    assert_eq!(rom.basis_size(), 1);
    assert_eq!(oracle.calls(), 5);
}

#[test]
fn test_retry_policy_restarts_from_zero() {
    let oracle = Arc::new(MeanShiftOracle::failing_once());
    let reductor = reductor(training_set(), &oracle);
    let snapshots = reductor.compute_full_solutions(None).unwrap();

    let config = config()
        .with_strategy(RegistrationStrategy::SequentialWarmStart {
            reuse_vector_fields: true,
        })
        .with_registration_failure(FailurePolicy::Retry { attempts: 1 });
    let outcome = reductor.register_full_solutions(snapshots, &config).unwrap();

    assert_eq!(outcome.snapshots.len(), 5);
    assert!(outcome.skipped.is_empty());
    assert_eq!(oracle.calls(), 10);
    let warm_started = oracle.warm_started.lock().unwrap().clone();
    assert!(warm_started.iter().skip(1).step_by(2).all(|w| !w));
    assert!(warm_started.iter().skip(2).step_by(2).all(|w| *w));
}

#[test]
fn test_retry_policy_gives_up() {
    let oracle = Arc::new(MeanShiftOracle::failing_for(1.2));
    let reductor = reductor(training_set(), &oracle);
    let snapshots = reductor.compute_full_solutions(None).unwrap();

    let config = config()
        .with_strategy(RegistrationStrategy::IndependentParallel { num_workers: 2 })
        .with_registration_failure(FailurePolicy::Retry { attempts: 2 });
    let result = reductor.register_full_solutions(snapshots, &config);
    assert!(matches!(
        result,
        Err(ReductionError::RegistrationFailed { parameter: Parameter::Scalar(mu), .. }) if mu == 1.2
    ));
    assert_eq!(oracle.calls(), 4 + 3);
}

#[test]
fn test_caches_replace_solving_and_registration() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(MeanShiftOracle::default());
    let (_, first) = reductor(training_set(), &oracle)
        .reduce(&config().with_write_caches(dir.path()))
        .unwrap();
    assert_eq!(oracle.calls(), 5);
    assert!(dir.path().join(FULL_SOLUTIONS_FILE).exists());
    assert!(dir.path().join(VELOCITY_FIELDS_FILE).exists());

    let cached_oracle = Arc::new(MeanShiftOracle::default());
    let (_, second) = reductor(training_set(), &cached_oracle)
        .reduce(
            &config()
                .with_full_solutions_cache(dir.path().join(FULL_SOLUTIONS_FILE))
                .with_velocity_fields_cache(dir.path().join(VELOCITY_FIELDS_FILE)),
        )
        .unwrap();
    assert_eq!(cached_oracle.calls(), 0);
    assert_eq!(second.full_velocity_fields, first.full_velocity_fields);
    assert_eq!(second.singular_values, first.singular_values);
}

#[test]
fn test_velocity_cache_length_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(MeanShiftOracle::default());
    let short: Vec<Parameter> = training_set().into_iter().take(3).collect();
    reductor(short, &oracle)
        .reduce(&config().with_write_caches(dir.path()))
        .unwrap();

    let result = reductor(training_set(), &oracle)
        .reduce(&config().with_velocity_fields_cache(dir.path().join(VELOCITY_FIELDS_FILE)));
    assert!(matches!(
        result,
        Err(ReductionError::CacheMismatch {
            expected: 5,
            found: 3
        })
    ));
}

#[test]
fn test_invalid_configuration_runs_nothing() {
    let oracle = Arc::new(MeanShiftOracle::default());
    let result = reductor(training_set(), &oracle).reduce(&config().with_max_basis_size(0));
    assert!(matches!(result, Err(ReductionError::InvalidConfiguration(_))));
    assert_eq!(oracle.calls(), 0);
}

#[test]
fn test_training_timeout_fails_every_restart() {
    let oracle = Arc::new(MeanShiftOracle::default());
    let result =
        reductor(training_set(), &oracle).reduce(&config().with_training_timeout(Duration::ZERO));
    assert!(matches!(result, Err(ReductionError::AllRestartsFailed(2))));
}

#[test]
fn test_intermediate_results_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(MeanShiftOracle::default());
    let reductor = reductor(training_set(), &oracle);
    let snapshots = reductor.compute_full_solutions(None).unwrap();

    reductor
        .register_full_solutions(
            snapshots,
            &config().with_intermediate_results(dir.path().join("mappings")),
        )
        .unwrap();

    let results = dir.path().join("mappings");
    let log = std::fs::read_to_string(results.join(MAPPING_ERRORS_FILE)).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("0.5\t"));
    assert_eq!(lines[0].split('\t').count(), 5);
    for tag in ["0_5", "0_8", "1_2", "1_6", "2"] {
        assert!(results.join(format!("full_solution_mu_{tag}.txt")).exists());
        assert!(results.join(format!("mapped_solution_mu_{tag}.txt")).exists());
        assert!(results.join(format!("full_vector_field_mu_{tag}.txt")).exists());
    }
}
