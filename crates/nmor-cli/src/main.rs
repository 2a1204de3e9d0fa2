use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nmor_core::{
    pod, project, reconstruct, Parameter, ParameterSpace, PodConfig, SamplingMode, VelocityField,
};
use nmor_model::{FullOrderModel, ReducedSpacetimeModel, TrainerConfig};
use nmor_reduction::{NonlinearNeuralNetworkReductor, ProductKind, ReductionConfig};
use nmor_registration::RegistrationOracle;
use serde::Serialize;
use tracing::info;

mod burgers;
mod setup;

use setup::{write_json, ExampleArgs, OracleArgs, RegistrationArgs, Setup};

const MODEL_FILE: &str = "model.bin";
const SUMMARY_FILE: &str = "summary.json";

#[derive(Parser)]
#[command(name = "nmor")]
#[command(about = "Nonlinear model-order reduction of the Burgers moving shock")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a reduced model and save it with a summary
    Reduce(ReduceArgs),

    /// Compare a saved reduced model with the full-order model
    Evaluate(EvaluateArgs),

    /// Register sampled solutions and report their compressibility
    Register(RegisterArgs),
}

#[derive(Args)]
struct ReduceArgs {
    #[command(flatten)]
    example: ExampleArgs,

    #[command(flatten)]
    oracle: OracleArgs,

    #[command(flatten)]
    registration: RegistrationArgs,

    /// Number of training parameters
    #[arg(long, default_value_t = 10)]
    num_training_parameters: usize,

    /// Sampling mode for the training parameters
    #[arg(long, default_value_t = SamplingMode::Uniform)]
    sampling_mode: SamplingMode,

    /// Reference parameter; the example's default if unset
    #[arg(long)]
    reference_parameter: Option<f64>,

    /// Maximum dimension of the reduced basis
    #[arg(long, default_value_t = 10)]
    max_basis_size: usize,

    /// Number of training restarts
    #[arg(long, default_value_t = 10)]
    restarts: usize,

    /// Hidden layer sizes, comma separated
    #[arg(long, value_delimiter = ',', default_value = "20,20,20")]
    hidden_layers: Vec<usize>,

    #[arg(long, default_value_t = 1000)]
    epochs: usize,

    /// Learning rate of the network training
    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    #[arg(long, default_value_t = 20)]
    batch_size: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Load full solutions from this cache instead of solving
    #[arg(long)]
    full_solutions_cache: Option<PathBuf>,

    /// Load velocity fields from this cache instead of registering
    #[arg(long)]
    velocity_fields_cache: Option<PathBuf>,

    /// Write stage caches below the output directory
    #[arg(long)]
    write_caches: bool,

    /// Write mapped solutions and mapping errors below the output directory
    #[arg(long)]
    intermediate_results: bool,

    /// Output directory
    #[arg(short, long, default_value = "reduction")]
    output: PathBuf,
}

#[derive(Args)]
struct EvaluateArgs {
    /// Directory written by `reduce`
    model_dir: PathBuf,

    /// Number of test parameters
    #[arg(long, default_value_t = 50)]
    num_test_parameters: usize,

    #[arg(long, default_value_t = SamplingMode::Uniform)]
    sampling_mode: SamplingMode,

    /// Also write reduced, full and difference fields
    #[arg(long)]
    save_solutions: bool,

    /// Output directory; `<model_dir>/test_results` if unset
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct RegisterArgs {
    #[command(flatten)]
    example: ExampleArgs,

    #[command(flatten)]
    oracle: OracleArgs,

    #[command(flatten)]
    registration: RegistrationArgs,

    #[arg(long, default_value_t = 3)]
    num_training_parameters: usize,

    #[arg(long, default_value_t = SamplingMode::Uniform)]
    sampling_mode: SamplingMode,

    #[arg(long)]
    reference_parameter: Option<f64>,

    /// Largest basis size for which projection errors are reported
    #[arg(long, default_value_t = 10)]
    max_basis_size: usize,

    /// Output directory
    #[arg(short, long, default_value = "registration")]
    output: PathBuf,
}

#[derive(Serialize)]
struct ReductionSummary<'a> {
    example: &'a ExampleArgs,
    oracle: &'a OracleArgs,
    config: &'a ReductionConfig,
    training_parameters: &'a [Parameter],
    reference_parameter: &'a Parameter,
    basis_size: usize,
    singular_values: &'a [f64],
    best_loss: f64,
    restart_losses: &'a [Option<f64>],
    skipped_parameters: &'a [Parameter],
    reduction_seconds: f64,
}

#[derive(Serialize)]
struct TestResult {
    parameter: Parameter,
    relative_error: f64,
    time_fom: f64,
    time_rom: f64,
}

#[derive(Serialize)]
struct EvaluationSummary {
    basis_size: usize,
    mean_relative_error: f64,
    max_relative_error: f64,
    mean_speedup: f64,
    results: Vec<TestResult>,
}

#[derive(Serialize)]
struct ProjectionError {
    basis_size: usize,
    mean: f64,
    max: f64,
}

#[derive(Serialize)]
struct RegistrationSummary {
    parameters: Vec<Parameter>,
    skipped_parameters: Vec<Parameter>,
    product: ProductKind,
    singular_values: Vec<f64>,
    projection_errors: Vec<ProjectionError>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reduce(args) => reduce(args)?,
        Commands::Evaluate(args) => evaluate(args)?,
        Commands::Register(args) => register(args)?,
    }

    Ok(())
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
}

fn reference_parameter(fom: &dyn FullOrderModel, value: Option<f64>) -> Result<Parameter> {
    value
        .map(Parameter::Scalar)
        .or_else(|| fom.default_reference_parameter())
        .context("No reference parameter given and the model has no default")
}

fn reduce(args: ReduceArgs) -> Result<()> {
    create_dir(&args.output)?;

    let fom = args.example.build()?;
    let shape = fom.grid().shape();
    let reference = reference_parameter(&fom, args.reference_parameter)?;
    let training_set = fom
        .parameter_space()
        .sample(args.num_training_parameters, args.sampling_mode)?;
    info!(
        "Reducing {} on a {:?} grid with {} training parameters",
        fom.name(),
        shape,
        training_set.len()
    );

    let mut config = ReductionConfig::new()
        .with_max_basis_size(args.max_basis_size)
        .with_restarts(args.restarts)
        .with_hidden_layers(args.hidden_layers.clone())
        .with_registration_params(args.registration.params(shape)?)
        .with_trainer(
            TrainerConfig::new()
                .with_epochs(args.epochs)
                .with_learning_rate(args.learning_rate)
                .with_batch_size(args.batch_size),
        )
        .with_strategy(args.registration.strategy())
        .with_product(args.registration.product())
        .with_registration_failure(args.registration.failure_policy())
        .with_seed(args.seed);
    if let Some(timeout) = args.registration.timeout()? {
        config = config.with_registration_timeout(timeout);
    }
    if let Some(path) = &args.full_solutions_cache {
        config = config.with_full_solutions_cache(path);
    }
    if let Some(path) = &args.velocity_fields_cache {
        config = config.with_velocity_fields_cache(path);
    }
    if args.write_caches {
        config = config.with_write_caches(args.output.join("caches"));
    }
    if args.intermediate_results {
        config = config.with_intermediate_results(args.output.join("mappings"));
    }

    let oracle: Arc<dyn RegistrationOracle> = Arc::new(args.oracle.build()?);
    let fom: Arc<dyn FullOrderModel> = Arc::new(fom);
    let reductor =
        NonlinearNeuralNetworkReductor::new(fom, training_set.clone(), reference.clone(), oracle)?;

    let start = Instant::now();
    let (rom, report) = reductor.reduce(&config).context("Reduction failed")?;
    let reduction_seconds = start.elapsed().as_secs_f64();

    let model_path = args.output.join(MODEL_FILE);
    rom.save(&model_path)
        .with_context(|| format!("Failed to save {}", model_path.display()))?;
    Setup {
        example: args.example.clone(),
        oracle: args.oracle.clone(),
    }
    .save(&args.output)?;

    let summary = ReductionSummary {
        example: &args.example,
        oracle: &args.oracle,
        config: &config,
        training_parameters: &training_set,
        reference_parameter: &reference,
        basis_size: report.basis_size(),
        singular_values: &report.singular_values,
        best_loss: report.best_loss,
        restart_losses: &report.restart_losses,
        skipped_parameters: &report.skipped_parameters,
        reduction_seconds,
    };
    write_json(&args.output.join(SUMMARY_FILE), &summary)?;

    info!(
        "Reduced model with {} modes and loss {:.6e} written to {} ({:.2}s)",
        report.basis_size(),
        report.best_loss,
        args.output.display(),
        reduction_seconds
    );
    Ok(())
}

fn evaluate(args: EvaluateArgs) -> Result<()> {
    let setup = Setup::load(&args.model_dir)?;
    let fom = setup.example.build()?;
    let oracle: Arc<dyn RegistrationOracle> = Arc::new(setup.oracle.build()?);
    let model_path = args.model_dir.join(MODEL_FILE);
    let rom = ReducedSpacetimeModel::load(&model_path, oracle)
        .with_context(|| format!("Failed to load {}", model_path.display()))?;

    let output = args
        .output
        .unwrap_or_else(|| args.model_dir.join("test_results"));
    create_dir(&output)?;

    let parameters = fom
        .parameter_space()
        .sample(args.num_test_parameters, args.sampling_mode)?;
    info!(
        "Evaluating reduced model with {} modes on {} test parameters",
        rom.basis_size(),
        parameters.len()
    );

    let mut results = Vec::with_capacity(parameters.len());
    let mut lines = String::new();
    for mu in parameters {
        let tic = Instant::now();
        let u_red = rom
            .solve(&mu)
            .with_context(|| format!("Reduced solve failed for mu={mu}"))?;
        let time_rom = tic.elapsed().as_secs_f64();

        let tic = Instant::now();
        let u_full = fom.solve(&mu)?;
        let time_fom = tic.elapsed().as_secs_f64();

        let relative_error = u_red.relative_error(&u_full)?;
        info!("mu={}: relative error {:.4e}", mu, relative_error);

        if args.save_solutions {
            let tag = mu.file_tag();
            u_red.save(output.join(format!("result_mu_{tag}.txt")))?;
            u_full.save(output.join(format!("full_solution_mu_{tag}.txt")))?;
            u_red
                .difference(&u_full)?
                .save(output.join(format!("difference_mu_{tag}.txt")))?;
        }

        lines.push_str(&format!("{mu}\t{relative_error}\t{time_fom}\t{time_rom}\n"));
        results.push(TestResult {
            parameter: mu,
            relative_error,
            time_fom,
            time_rom,
        });
    }

    let errors_path = output.join("relative_errors.txt");
    fs::write(&errors_path, lines)
        .with_context(|| format!("Failed to write {}", errors_path.display()))?;

    let count = results.len().max(1) as f64;
    let summary = EvaluationSummary {
        basis_size: rom.basis_size(),
        mean_relative_error: results.iter().map(|r| r.relative_error).sum::<f64>() / count,
        max_relative_error: results.iter().map(|r| r.relative_error).fold(0.0, f64::max),
        mean_speedup: results
            .iter()
            .filter(|r| r.time_rom > 0.0)
            .map(|r| r.time_fom / r.time_rom)
            .sum::<f64>()
            / count,
        results,
    };
    write_json(&output.join(SUMMARY_FILE), &summary)?;

    info!(
        "Mean relative error {:.4e}, maximum {:.4e}",
        summary.mean_relative_error, summary.max_relative_error
    );
    Ok(())
}

/// Relative projection errors of `fields` onto the first `k` modes, for every `k`.
fn projection_errors(
    fields: &[VelocityField],
    max_basis_size: usize,
    reductor: &NonlinearNeuralNetworkReductor,
    product: ProductKind,
) -> Result<(Vec<f64>, Vec<ProjectionError>)> {
    let l2 = nmor_core::L2Product;
    let operator: &dyn nmor_core::ProductOperator = match product {
        ProductKind::L2 => &l2,
        ProductKind::CauchyNavier => reductor.oracle().product_operator(),
    };
    let modes = max_basis_size.min(fields.len());
    let basis = pod(fields, &PodConfig::new(modes), operator)?;

    let mut errors = Vec::with_capacity(basis.len());
    for k in 1..=basis.len() {
        let truncated = basis.truncated(k);
        let coefficients = project(fields, &truncated, operator)?;
        let mut relative = Vec::with_capacity(fields.len());
        for (field, c) in fields.iter().zip(&coefficients) {
            let difference = field - &reconstruct(c, &truncated)?;
            let norm = operator.norm(field)?;
            let error = operator.norm(&difference)?;
            relative.push(if norm > 0.0 { error / norm } else { error });
        }
        let mean = relative.iter().sum::<f64>() / relative.len().max(1) as f64;
        let max = relative.iter().copied().fold(0.0, f64::max);
        info!("Basis size {}: mean projection error {:.4e}, maximum {:.4e}", k, mean, max);
        errors.push(ProjectionError {
            basis_size: k,
            mean,
            max,
        });
    }
    Ok((basis.singular_values().to_vec(), errors))
}

fn register(args: RegisterArgs) -> Result<()> {
    create_dir(&args.output)?;

    let fom = args.example.build()?;
    let shape = fom.grid().shape();
    let reference = reference_parameter(&fom, args.reference_parameter)?;
    let parameters = fom
        .parameter_space()
        .sample(args.num_training_parameters, args.sampling_mode)?;

    let mut config = ReductionConfig::new()
        .with_registration_params(args.registration.params(shape)?)
        .with_strategy(args.registration.strategy())
        .with_registration_failure(args.registration.failure_policy())
        .with_intermediate_results(args.output.join("mappings"));
    if let Some(timeout) = args.registration.timeout()? {
        config = config.with_registration_timeout(timeout);
    }

    let oracle: Arc<dyn RegistrationOracle> = Arc::new(args.oracle.build()?);
    let fom: Arc<dyn FullOrderModel> = Arc::new(fom);
    let reductor = NonlinearNeuralNetworkReductor::new(fom, parameters.clone(), reference, oracle)?;

    let snapshots = reductor.compute_full_solutions(None)?;
    let outcome = reductor
        .register_full_solutions(snapshots, &config)
        .context("Registration failed")?;
    let fields = outcome.velocity_fields();
    if fields.is_empty() {
        anyhow::bail!("No registration succeeded");
    }

    let product = args.registration.product();
    let (singular_values, errors) =
        projection_errors(&fields, args.max_basis_size, &reductor, product)?;

    let singular_values_path = args.output.join("singular_values.txt");
    let text: String = singular_values.iter().map(|s| format!("{s}\n")).collect();
    fs::write(&singular_values_path, text)
        .with_context(|| format!("Failed to write {}", singular_values_path.display()))?;

    let summary = RegistrationSummary {
        parameters,
        skipped_parameters: outcome.skipped,
        product,
        singular_values,
        projection_errors: errors,
    };
    write_json(&args.output.join(SUMMARY_FILE), &summary)?;

    info!("Registration results written to {}", args.output.display());
    Ok(())
}
