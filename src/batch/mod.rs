//! Batch orchestrator: applies published parameters across the catalog.
//!
//! The run waits until every instrument's parameter set has been published,
//! then processes recordings concurrently on blocking worker tasks. Each
//! recording is isolated: detection or grid failures are recorded on its
//! outcome and in the report, never aborting the batch.

pub mod writer;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::adapter::{DetectorBackend, InstrumentParameters};
use crate::analysis::Instrument;
use crate::catalog::RecordingCatalog;
use crate::config::AppConfig;
use crate::error::{ErrorCode, OptimizerError};
use crate::optimizer::ParameterRegistry;
use crate::pipeline::{RecordingOutcome, RecordingProcessor};
use crate::report::{ErrorSummary, MetricsReport, StatusCounts};

/// What a batch run produced
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub status_counts: StatusCounts,
    pub output_dir: PathBuf,
    pub report_path: PathBuf,
    /// Instruments that ran with fallback parameters after failed tuning
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tuning_errors: BTreeMap<Instrument, ErrorSummary>,
}

pub struct BatchOrchestrator {
    backend: Arc<dyn DetectorBackend>,
    catalog: Arc<RecordingCatalog>,
    registry: Arc<ParameterRegistry>,
    config: AppConfig,
    output_dir: PathBuf,
}

impl BatchOrchestrator {
    pub fn new(
        backend: Arc<dyn DetectorBackend>,
        catalog: RecordingCatalog,
        registry: Arc<ParameterRegistry>,
        config: AppConfig,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            catalog: Arc::new(catalog),
            registry,
            config,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Wait for parameters, process the catalog, write outputs and the report
    pub async fn run(&self) -> Result<BatchSummary> {
        tracing::info!("waiting for published parameter sets");
        let parameters = Arc::new(self.registry.wait_all().await);
        for set in parameters.iter() {
            tracing::info!(
                instrument = %set.instrument(),
                version = set.version(),
                run_id = set.run_id(),
                "using parameter set"
            );
        }
        let tuning_errors = self.registry.failures();
        for (instrument, err) in &tuning_errors {
            tracing::warn!(
                instrument = %instrument,
                code = err.code(),
                "tuning failed; running with fallback parameters"
            );
        }

        let recordings = self.catalog.discover()?;
        tracing::info!(
            recordings = recordings.len(),
            concurrency = self.config.batch.concurrency,
            "batch started"
        );

        let processor = RecordingProcessor::new(Arc::clone(&self.backend), &self.config);
        let evaluate_references = self.config.batch.evaluate_references;
        let tasks = recordings.into_iter().map(|metadata| {
            let processor = processor.clone();
            let parameters = Arc::clone(&parameters);
            let catalog = Arc::clone(&self.catalog);
            tokio::task::spawn_blocking(move || {
                let reference = if evaluate_references {
                    catalog.load_reference(&metadata).unwrap_or_else(|err| {
                        tracing::warn!(
                            recording_id = %metadata.id,
                            error = %err,
                            "reference unreadable; skipping evaluation"
                        );
                        None
                    })
                } else {
                    None
                };
                processor.process(&metadata.id, &parameters, reference.as_ref())
            })
        });

        let joined: Vec<_> = stream::iter(tasks)
            .buffer_unordered(self.config.batch.concurrency.max(1))
            .collect()
            .await;

        let mut outcomes: Vec<RecordingOutcome> = Vec::with_capacity(joined.len());
        for result in joined {
            outcomes.push(result.context("recording worker panicked")?);
        }
        outcomes.sort_by(|a, b| a.recording_id.cmp(&b.recording_id));

        self.write_outputs(&outcomes, &parameters, &tuning_errors)
    }

    fn write_outputs(
        &self,
        outcomes: &[RecordingOutcome],
        parameters: &InstrumentParameters,
        tuning_errors: &BTreeMap<Instrument, OptimizerError>,
    ) -> Result<BatchSummary> {
        for outcome in outcomes {
            writer::write_recording(&self.output_dir, outcome, parameters)
                .with_context(|| format!("writing outputs for {}", outcome.recording_id))?;
        }

        let report =
            MetricsReport::from_outcomes(outcomes, parameters).with_tuning_errors(tuning_errors);
        let report_path = report.write_to_dir(&self.output_dir)?;

        tracing::info!(
            processed = outcomes.len(),
            succeeded = report.status_counts.succeeded,
            partial = report.status_counts.partial,
            failed = report.status_counts.failed,
            report = %report_path.display(),
            "batch finished"
        );
        Ok(BatchSummary {
            processed: outcomes.len(),
            status_counts: report.status_counts,
            output_dir: self.output_dir.clone(),
            report_path,
            tuning_errors: report.tuning_errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{PrecomputedBackend, SyntheticConfig};
    use crate::optimizer::{ParameterSet, DEFAULT_PARAMETER_SPACE};
    use std::fs;
    use std::time::Duration;

    fn publish_initial(registry: &ParameterRegistry, instruments: &[Instrument]) {
        for &instrument in instruments {
            registry
                .publish(ParameterSet::initial(instrument, &DEFAULT_PARAMETER_SPACE))
                .unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batch_waits_for_parameters_then_writes_outputs() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        SyntheticConfig {
            recordings: 3,
            beats: 16,
            ..SyntheticConfig::default()
        }
        .write_to_dir(input.path())
        .unwrap();

        let registry = Arc::new(ParameterRegistry::new());
        publish_initial(&registry, &[Instrument::Piano, Instrument::Bass]);

        let orchestrator = BatchOrchestrator::new(
            Arc::new(PrecomputedBackend::from_dir(input.path())),
            RecordingCatalog::new(input.path()),
            Arc::clone(&registry),
            AppConfig::default(),
            output.path(),
        );

        let run = tokio::spawn(async move { orchestrator.run().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!run.is_finished());
        assert!(!output.path().join("synth_000").exists());

        publish_initial(&registry, &[Instrument::Drums]);
        let summary = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("batch finished")
            .unwrap()
            .unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.status_counts.total(), 3);
        assert!(summary.report_path.exists());
        for instrument in Instrument::ALL {
            let csv = output
                .path()
                .join("synth_001")
                .join(format!("{instrument}.csv"));
            assert!(fs::read_to_string(csv)
                .unwrap()
                .starts_with(writer::CSV_HEADER));
        }
    }

    #[tokio::test]
    async fn test_failed_recording_does_not_abort_batch() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        SyntheticConfig {
            recordings: 1,
            beats: 8,
            ..SyntheticConfig::default()
        }
        .write_to_dir(input.path())
        .unwrap();
        fs::write(
            input.path().join("broken.detections.json"),
            r#"{"recording_id": "broken", "error": "source separation crashed"}"#,
        )
        .unwrap();

        let registry = Arc::new(ParameterRegistry::new());
        publish_initial(&registry, &Instrument::ALL);
        let summary = BatchOrchestrator::new(
            Arc::new(PrecomputedBackend::from_dir(input.path())),
            RecordingCatalog::new(input.path()),
            registry,
            AppConfig::default(),
            output.path(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.status_counts.failed, 1);

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&summary.report_path).unwrap()).unwrap();
        assert_eq!(report["recordings"][0]["recording_id"], "broken");
        assert_eq!(report["recordings"][0]["error"]["code"], 1001);
        assert!(output.path().join("broken").join("metadata.json").exists());
    }
}
