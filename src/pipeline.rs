//! Per-recording processing: detect → quantize → classify → evaluate.
//!
//! A [`RecordingProcessor`] turns one recording id into a
//! [`RecordingOutcome`]. Failures never escape as errors: they are recorded
//! on the outcome so a batch can keep going and report them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adapter::{DetectorBackend, InstrumentParameters};
use crate::analysis::{
    asynchrony_points, evaluate, mean_asynchrony, quantize, BeatAsynchrony, BeatFraction,
    EvaluationResult, Instrument, MatchedEvent, PulseSequence, QuantizationSummary,
};
use crate::catalog::ReferenceAnnotation;
use crate::config::AppConfig;
use crate::error::{log_pipeline_error, PipelineError};

/// Coarse result of quantizing a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationStatus {
    /// Every instrument has at least one onset bound to a pulse
    Succeeded,
    /// A usable grid exists but some instrument has no bound onsets
    Partial,
    /// Detection failed or the recording has no usable beat grid
    Failed,
}

/// Quantized onsets of one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentAnnotation {
    pub instrument: Instrument,
    pub matches: Vec<MatchedEvent>,
    pub summary: QuantizationSummary,
    /// Present when a reference annotation covers this instrument
    pub evaluation: Option<EvaluationResult>,
}

/// Everything produced for one recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingOutcome {
    pub recording_id: String,
    pub status: QuantizationStatus,
    pub pulses: PulseSequence,
    pub instruments: Vec<InstrumentAnnotation>,
    pub asynchrony: Vec<BeatAsynchrony>,
    /// Why the recording failed (or degraded)
    pub error: Option<PipelineError>,
}

impl RecordingOutcome {
    fn failed(recording_id: &str, error: PipelineError) -> Self {
        Self {
            recording_id: recording_id.to_string(),
            status: QuantizationStatus::Failed,
            pulses: PulseSequence::default(),
            instruments: Vec::new(),
            asynchrony: Vec::new(),
            error: Some(error),
        }
    }

    pub fn instrument(&self, instrument: Instrument) -> Option<&InstrumentAnnotation> {
        self.instruments.iter().find(|a| a.instrument == instrument)
    }
}

/// Runs one recording through the detector backend and the analysis engines
#[derive(Clone)]
pub struct RecordingProcessor {
    backend: Arc<dyn DetectorBackend>,
    tolerance: BeatFraction,
    evaluation_tolerance: f64,
}

impl RecordingProcessor {
    pub fn new(backend: Arc<dyn DetectorBackend>, config: &AppConfig) -> Self {
        Self {
            backend,
            tolerance: BeatFraction::new(config.quantization.tolerance_fraction),
            evaluation_tolerance: config.evaluation.tolerance_seconds,
        }
    }

    pub fn process(
        &self,
        recording_id: &str,
        parameters: &InstrumentParameters,
        reference: Option<&ReferenceAnnotation>,
    ) -> RecordingOutcome {
        let detection = match self.backend.detect(recording_id, parameters) {
            Ok(detection) => detection,
            Err(err) => {
                log_pipeline_error(&err, recording_id);
                return RecordingOutcome::failed(recording_id, err);
            }
        };

        let mut instruments = Vec::with_capacity(Instrument::ALL.len());
        let mut points = Vec::new();
        let mut error = None;

        for instrument in Instrument::ALL {
            let events = detection.onsets_for(instrument);
            let matches = quantize(events, &detection.pulses, self.tolerance);
            let summary = QuantizationSummary::from_matches(&matches);

            let evaluation = match reference.filter(|r| r.has_instrument(instrument)) {
                Some(annotation) => match annotation.events(instrument) {
                    Ok(reference_events) => Some(evaluate(
                        events,
                        &reference_events,
                        self.evaluation_tolerance,
                    )),
                    Err(err) => {
                        log_pipeline_error(&err, recording_id);
                        error.get_or_insert(err);
                        None
                    }
                },
                None => None,
            };

            points.extend(asynchrony_points(&matches, &detection.pulses));
            tracing::debug!(
                recording_id,
                instrument = %instrument,
                onsets = summary.total,
                matched = summary.matched,
                demoted = summary.demoted,
                "instrument quantized"
            );
            instruments.push(InstrumentAnnotation {
                instrument,
                matches,
                summary,
                evaluation,
            });
        }

        let status = if detection.pulses.len() < 2 {
            let err = PipelineError::EmptyPulseSequence {
                recording_id: recording_id.to_string(),
            };
            tracing::warn!(
                recording_id,
                pulses = detection.pulses.len(),
                "no usable beat grid; every onset left unmatched"
            );
            error = Some(err);
            QuantizationStatus::Failed
        } else if instruments.iter().all(|a| a.summary.matched > 0) {
            QuantizationStatus::Succeeded
        } else {
            QuantizationStatus::Partial
        };

        tracing::info!(recording_id, status = ?status, "recording processed");
        RecordingOutcome {
            recording_id: recording_id.to_string(),
            status,
            pulses: detection.pulses,
            instruments,
            asynchrony: mean_asynchrony(&points),
            error,
        }
    }
}
