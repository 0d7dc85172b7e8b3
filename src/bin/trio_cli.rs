use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use trio_timing::adapter::{DetectorBackend, InstrumentParameters, SyntheticConfig};
use trio_timing::analysis::{evaluate, BeatAsynchrony, EvaluationResult, Instrument};
use trio_timing::batch::BatchOrchestrator;
use trio_timing::catalog::{RecordingCatalog, DEFAULT_RECORDING_ROOT};
use trio_timing::config::AppConfig;
use trio_timing::error::OptimizerError;
use trio_timing::optimizer::{
    new_run_id, optimize, BackendObjective, OptimizationOutcome, ParameterRegistry,
    ParameterSet, ParameterStore, Tuner, DEFAULT_PARAMETER_SPACE,
};
use trio_timing::pipeline::{InstrumentAnnotation, QuantizationStatus, RecordingProcessor};
use trio_timing::report::ErrorSummary;
use trio_timing::PrecomputedBackend;

#[derive(Parser, Debug)]
#[command(
    name = "trio_cli",
    about = "Beat-relative onset quantization and detector tuning for piano-trio recordings"
)]
struct Cli {
    /// Directory of detector dumps and reference annotations (defaults to fixtures/)
    #[arg(long, global = true)]
    recordings_dir: Option<PathBuf>,
    /// JSON configuration file (defaults to assets/timing_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Quantize one recording against its beat grid
    Quantize {
        #[arg(long)]
        recording: String,
        /// Directory of tuned parameter sets; initial values when absent
        #[arg(long)]
        params_dir: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Compare one recording's detected onsets with its reference annotation
    Evaluate {
        #[arg(long)]
        recording: String,
        #[arg(long)]
        params_dir: Option<PathBuf>,
    },
    /// Tune detector parameters against the reference annotations
    Optimize {
        #[arg(long)]
        params_dir: PathBuf,
        /// Tune a single instrument instead of all three
        #[arg(long, value_parser = parse_instrument)]
        instrument: Option<Instrument>,
    },
    /// Annotate every recording in the catalog
    Batch {
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        params_dir: Option<PathBuf>,
        /// Tune parameters first; the batch starts once all are published
        #[arg(long)]
        optimize: bool,
    },
    /// Write synthetic detector dumps and references
    Synth {
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 3)]
        recordings: usize,
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
    /// List recordings on disk
    DumpRecordings,
}

fn parse_instrument(name: &str) -> Result<Instrument, String> {
    Instrument::from_name(name).ok_or_else(|| format!("unknown instrument '{name}'"))
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli
        .config
        .as_deref()
        .map(AppConfig::load_from_file)
        .unwrap_or_else(AppConfig::load);
    let root = cli
        .recordings_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDING_ROOT));
    let catalog = RecordingCatalog::new(&root);
    let backend = Arc::new(
        PrecomputedBackend::from_dir(&root)
            .with_beats_per_measure(config.quantization.beats_per_measure),
    );

    match cli.command {
        Commands::Quantize {
            recording,
            params_dir,
            output,
        } => run_quantize(backend, &config, &recording, params_dir.as_deref(), output),
        Commands::Evaluate {
            recording,
            params_dir,
        } => run_evaluate(backend, &catalog, &config, &recording, params_dir.as_deref()),
        Commands::Optimize {
            params_dir,
            instrument,
        } => run_optimize(backend, &catalog, config, &params_dir, instrument),
        Commands::Batch {
            output,
            params_dir,
            optimize,
        } => run_batch(backend, catalog, config, output, params_dir, optimize),
        Commands::Synth {
            output,
            recordings,
            seed,
        } => run_synth(&output, recordings, seed),
        Commands::DumpRecordings => run_dump(&catalog),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .try_init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")
}

/// Stored sets where present, initial values otherwise
fn load_parameters(params_dir: Option<&Path>) -> Result<InstrumentParameters> {
    let stored = match params_dir {
        Some(dir) => ParameterStore::new(dir).load_all()?,
        None => InstrumentParameters::new(),
    };
    Ok(Instrument::ALL
        .iter()
        .map(|&instrument| {
            stored.get(instrument).cloned().unwrap_or_else(|| {
                ParameterSet::initial(instrument, &DEFAULT_PARAMETER_SPACE)
                    .versioned(0, "initial")
            })
        })
        .collect())
}

fn run_quantize(
    backend: Arc<dyn DetectorBackend>,
    config: &AppConfig,
    recording: &str,
    params_dir: Option<&Path>,
    output_path: Option<PathBuf>,
) -> Result<ExitCode> {
    let parameters = load_parameters(params_dir)?;
    let outcome = RecordingProcessor::new(backend, config).process(recording, &parameters, None);

    let report = QuantizeReportPayload {
        recording_id: &outcome.recording_id,
        status: outcome.status,
        error: outcome.error.as_ref().map(ErrorSummary::from_error),
        pulses: outcome.pulses.len(),
        instruments: &outcome.instruments,
        asynchrony: &outcome.asynchrony,
    };
    emit_json(&report, output_path)?;

    if outcome.status == QuantizationStatus::Failed {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::from(0))
    }
}

fn run_evaluate(
    backend: Arc<dyn DetectorBackend>,
    catalog: &RecordingCatalog,
    config: &AppConfig,
    recording: &str,
    params_dir: Option<&Path>,
) -> Result<ExitCode> {
    let metadata = catalog.metadata(recording)?;
    let reference = catalog
        .load_reference(&metadata)?
        .ok_or_else(|| anyhow!("Recording '{recording}' has no reference annotation"))?;
    let parameters = load_parameters(params_dir)?;
    let detection = backend
        .detect(recording, &parameters)
        .with_context(|| format!("detecting onsets for {recording}"))?;

    let mut results: BTreeMap<Instrument, EvaluationResult> = BTreeMap::new();
    for instrument in Instrument::ALL {
        if !reference.has_instrument(instrument) {
            continue;
        }
        let reference_events = reference.events(instrument)?;
        results.insert(
            instrument,
            evaluate(
                detection.onsets_for(instrument),
                &reference_events,
                config.evaluation.tolerance_seconds,
            ),
        );
    }

    emit_json(
        &EvaluateReportPayload {
            recording_id: recording,
            tolerance_seconds: config.evaluation.tolerance_seconds,
            instruments: results,
        },
        None,
    )?;
    Ok(ExitCode::from(0))
}

fn run_optimize(
    backend: Arc<dyn DetectorBackend>,
    catalog: &RecordingCatalog,
    config: AppConfig,
    params_dir: &Path,
    instrument: Option<Instrument>,
) -> Result<ExitCode> {
    let references = catalog.reference_sets()?;
    let store = ParameterStore::new(params_dir);

    let outcomes: BTreeMap<Instrument, Result<OptimizationOutcome, OptimizerError>> =
        match instrument {
            Some(instrument) => {
                let run_id = new_run_id();
                let refs = references.get(&instrument).cloned().unwrap_or_default();
                let objective =
                    BackendObjective::new(backend, config.evaluation.tolerance_seconds);
                let result = optimize(
                    instrument,
                    refs,
                    &DEFAULT_PARAMETER_SPACE,
                    objective,
                    &config.optimizer,
                );
                if let Ok(outcome) = &result {
                    store.save(&outcome.best, &run_id)?;
                }
                BTreeMap::from([(instrument, result)])
            }
            None => {
                let tuner = Tuner::new(backend, config).with_store(store);
                let registry = ParameterRegistry::new();
                runtime()?.block_on(tuner.optimize_all(references, &registry))?
            }
        };

    let mut any_failed = false;
    let payload: BTreeMap<Instrument, OptimizeResultPayload> = outcomes
        .into_iter()
        .map(|(instrument, result)| {
            let entry = match result {
                Ok(outcome) => OptimizeResultPayload::Finished(outcome),
                Err(err) => {
                    any_failed = true;
                    OptimizeResultPayload::Failed(ErrorSummary::from_error(&err))
                }
            };
            (instrument, entry)
        })
        .collect();
    emit_json(&payload, None)?;

    if any_failed {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::from(0))
    }
}

fn run_batch(
    backend: Arc<dyn DetectorBackend>,
    catalog: RecordingCatalog,
    config: AppConfig,
    output: PathBuf,
    params_dir: Option<PathBuf>,
    tune_first: bool,
) -> Result<ExitCode> {
    let registry = Arc::new(ParameterRegistry::new());
    let rt = runtime()?;

    let summary = if tune_first {
        let references = catalog.reference_sets()?;
        // failed searches publish the initial vector so the batch can start
        let mut tuner = Tuner::new(Arc::clone(&backend), config.clone()).with_initial_fallback();
        if let Some(dir) = &params_dir {
            tuner = tuner.with_store(ParameterStore::new(dir));
        }
        let orchestrator =
            BatchOrchestrator::new(backend, catalog, Arc::clone(&registry), config, output);
        rt.block_on(async {
            let (tuned, summary) = tokio::join!(
                tuner.optimize_all(references, &registry),
                orchestrator.run()
            );
            tuned?;
            summary
        })?
    } else {
        for set in load_parameters(params_dir.as_deref())?.iter() {
            registry.publish(set.clone())?;
        }
        let orchestrator =
            BatchOrchestrator::new(backend, catalog, Arc::clone(&registry), config, output);
        rt.block_on(orchestrator.run())?
    };

    emit_json(&summary, None)?;

    if summary.tuning_errors.is_empty() {
        Ok(ExitCode::from(0))
    } else {
        for (instrument, err) in &summary.tuning_errors {
            eprintln!(
                "Tuning failed for {instrument} (code {}): {}; ran with initial parameters",
                err.code, err.message
            );
        }
        Ok(ExitCode::from(2))
    }
}

fn run_synth(output: &Path, recordings: usize, seed: u64) -> Result<ExitCode> {
    let generated = SyntheticConfig {
        seed,
        recordings,
        ..SyntheticConfig::default()
    }
    .write_to_dir(output)?;
    for recording in generated {
        println!("{}", recording.dump.recording_id);
    }
    Ok(ExitCode::from(0))
}

fn run_dump(catalog: &RecordingCatalog) -> Result<ExitCode> {
    let recordings = catalog.discover()?;
    if recordings.is_empty() {
        println!("No recordings found under {}", catalog.root().display());
        return Ok(ExitCode::from(0));
    }

    for metadata in recordings {
        if let Some(reference) = metadata.reference_path {
            println!("{} -> {}", metadata.id, reference.display());
        } else {
            println!("{}", metadata.id);
        }
    }
    Ok(ExitCode::from(0))
}

fn emit_json<T: Serialize>(payload: &T, output_path: Option<PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(payload)?;
    if let Some(path) = output_path {
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    } else {
        println!("{json}");
    }
    Ok(())
}

#[derive(Serialize)]
struct QuantizeReportPayload<'a> {
    recording_id: &'a str,
    status: QuantizationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorSummary>,
    pulses: usize,
    instruments: &'a [InstrumentAnnotation],
    #[serde(skip_serializing_if = "slice_empty")]
    asynchrony: &'a [BeatAsynchrony],
}

fn slice_empty(points: &&[BeatAsynchrony]) -> bool {
    points.is_empty()
}

#[derive(Serialize)]
struct EvaluateReportPayload<'a> {
    recording_id: &'a str,
    tolerance_seconds: f64,
    instruments: BTreeMap<Instrument, EvaluationResult>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum OptimizeResultPayload {
    Finished(OptimizationOutcome),
    Failed(ErrorSummary),
}
