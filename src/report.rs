//! Metrics report for a batch run.
//!
//! Collects per-recording quantization summaries and reference evaluations,
//! plus per-instrument aggregates (mean of per-recording F-scores and pooled
//! counts), and serializes them as `metrics_report.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapter::InstrumentParameters;
use crate::analysis::{
    AggregateEvaluation, BeatAsynchrony, EvaluationResult, Instrument, QuantizationSummary,
};
use crate::error::{ErrorCode, OptimizerError};
use crate::optimizer::ParameterSet;
use crate::pipeline::{QuantizationStatus, RecordingOutcome};

pub const REPORT_FILE_NAME: &str = "metrics_report.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub code: i32,
    pub message: String,
}

impl ErrorSummary {
    pub fn from_error<E: ErrorCode>(err: &E) -> Self {
        Self {
            code: err.code(),
            message: err.message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMetrics {
    pub summary: QuantizationSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetrics {
    pub recording_id: String,
    pub status: QuantizationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
    pub pulses: usize,
    pub instruments: BTreeMap<Instrument, InstrumentMetrics>,
    #[serde(default)]
    pub asynchrony: Vec<BeatAsynchrony>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.succeeded + self.partial + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Parameter sets the batch ran with
    pub parameters: Vec<ParameterSet>,
    pub status_counts: StatusCounts,
    pub recordings: Vec<RecordingMetrics>,
    /// Reference agreement per instrument over evaluated recordings
    pub aggregate: BTreeMap<Instrument, AggregateEvaluation>,
    /// Instruments whose tuning failed and ran with fallback parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tuning_errors: BTreeMap<Instrument, ErrorSummary>,
}

impl MetricsReport {
    /// Build a report from outcomes; recordings are listed by id
    pub fn from_outcomes(outcomes: &[RecordingOutcome], parameters: &InstrumentParameters) -> Self {
        let mut status_counts = StatusCounts::default();
        let mut recordings: Vec<RecordingMetrics> = outcomes
            .iter()
            .map(|outcome| {
                match outcome.status {
                    QuantizationStatus::Succeeded => status_counts.succeeded += 1,
                    QuantizationStatus::Partial => status_counts.partial += 1,
                    QuantizationStatus::Failed => status_counts.failed += 1,
                }
                RecordingMetrics {
                    recording_id: outcome.recording_id.clone(),
                    status: outcome.status,
                    error: outcome.error.as_ref().map(ErrorSummary::from_error),
                    pulses: outcome.pulses.len(),
                    instruments: outcome
                        .instruments
                        .iter()
                        .map(|annotation| {
                            (
                                annotation.instrument,
                                InstrumentMetrics {
                                    summary: annotation.summary.clone(),
                                    evaluation: annotation.evaluation.clone(),
                                },
                            )
                        })
                        .collect(),
                    asynchrony: outcome.asynchrony.clone(),
                }
            })
            .collect();
        recordings.sort_by(|a, b| a.recording_id.cmp(&b.recording_id));

        let aggregate = Instrument::ALL
            .iter()
            .filter_map(|&instrument| {
                let results: Vec<&EvaluationResult> = recordings
                    .iter()
                    .filter_map(|r| r.instruments.get(&instrument))
                    .filter_map(|m| m.evaluation.as_ref())
                    .collect();
                if results.is_empty() {
                    return None;
                }
                Some((instrument, AggregateEvaluation::from_results(results)))
            })
            .collect();

        Self {
            parameters: parameters.iter().cloned().collect(),
            status_counts,
            recordings,
            aggregate,
            tuning_errors: BTreeMap::new(),
        }
    }

    /// Attach tuning failures behind fallback parameter sets
    pub fn with_tuning_errors(mut self, errors: &BTreeMap<Instrument, OptimizerError>) -> Self {
        self.tuning_errors = errors
            .iter()
            .map(|(&instrument, err)| (instrument, ErrorSummary::from_error(err)))
            .collect();
        self
    }

    /// Write the report as pretty JSON to `dir/metrics_report.json`
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(REPORT_FILE_NAME);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}
