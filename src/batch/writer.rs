// Output writers for batch results
//
// Layout per recording:
//   <out>/<id>/<instrument>.csv   timestamp,metrical_position,matched
//   <out>/<id>/metadata.json      status, grid size, parameter versions

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::adapter::InstrumentParameters;
use crate::analysis::{Instrument, PulseSequence, QuantizationSummary};
use crate::pipeline::{InstrumentAnnotation, QuantizationStatus, RecordingOutcome};
use crate::report::ErrorSummary;

pub const CSV_HEADER: &str = "timestamp,metrical_position,matched";

/// Render one instrument's annotation as CSV
///
/// Every onset is kept; unmatched rows leave `metrical_position` empty.
/// Timestamps use the shortest form that parses back to the same `f64`.
pub fn annotation_csv(annotation: &InstrumentAnnotation, pulses: &PulseSequence) -> String {
    let mut csv = String::with_capacity(32 * (annotation.matches.len() + 1));
    csv.push_str(CSV_HEADER);
    csv.push('\n');

    for matched in &annotation.matches {
        let position = matched
            .pulse_index
            .and_then(|idx| pulses.get(idx))
            .map(|pulse| pulse.metrical_position.to_string())
            .unwrap_or_default();
        // writing to a String cannot fail
        let _ = writeln!(
            csv,
            "{},{},{}",
            matched.event.timestamp(),
            position,
            matched.is_matched()
        );
    }
    csv
}

#[derive(Serialize)]
struct ParameterStamp<'a> {
    instrument: Instrument,
    version: u32,
    run_id: &'a str,
}

#[derive(Serialize)]
struct RecordingMetadataFile<'a> {
    recording_id: &'a str,
    status: QuantizationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorSummary>,
    pulses: usize,
    beats_per_measure: u32,
    parameters: Vec<ParameterStamp<'a>>,
    instruments: Vec<(Instrument, &'a QuantizationSummary)>,
}

/// Write CSV annotations and metadata for one recording
///
/// Returns the files written.
pub fn write_recording(
    out_dir: &Path,
    outcome: &RecordingOutcome,
    parameters: &InstrumentParameters,
) -> Result<Vec<PathBuf>> {
    let dir = out_dir.join(&outcome.recording_id);
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut written = Vec::with_capacity(outcome.instruments.len() + 1);

    for annotation in &outcome.instruments {
        let path = dir.join(format!("{}.csv", annotation.instrument));
        fs::write(&path, annotation_csv(annotation, &outcome.pulses))
            .with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }

    let metadata = RecordingMetadataFile {
        recording_id: &outcome.recording_id,
        status: outcome.status,
        error: outcome.error.as_ref().map(ErrorSummary::from_error),
        pulses: outcome.pulses.len(),
        beats_per_measure: outcome.pulses.beats_per_measure(),
        parameters: parameters
            .iter()
            .map(|set| ParameterStamp {
                instrument: set.instrument(),
                version: set.version(),
                run_id: set.run_id(),
            })
            .collect(),
        instruments: outcome
            .instruments
            .iter()
            .map(|a| (a.instrument, &a.summary))
            .collect(),
    };
    let path = dir.join("metadata.json");
    fs::write(&path, serde_json::to_string_pretty(&metadata)?)
        .with_context(|| format!("writing {}", path.display()))?;
    written.push(path);

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{event_stream, quantize, BeatFraction, EventSource};

    fn annotation(onsets: &[f64], pulses: &PulseSequence) -> InstrumentAnnotation {
        let events =
            event_stream(onsets, Instrument::Bass, EventSource::Algorithmic, "run").unwrap();
        let matches = quantize(&events, pulses, BeatFraction::default());
        InstrumentAnnotation {
            instrument: Instrument::Bass,
            summary: QuantizationSummary::from_matches(&matches),
            matches,
            evaluation: None,
        }
    }

    #[test]
    fn test_csv_keeps_unmatched_rows() {
        let pulses = PulseSequence::new(&[0.5, 1.0, 1.5], 4, Some(0.5)).unwrap();
        let csv = annotation_csv(&annotation(&[0.51, 0.74, 2.0], &pulses), &pulses);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                CSV_HEADER,
                "0.51,1,true",
                "0.74,,false",
                "2,,false",
            ]
        );
    }

    #[test]
    fn test_csv_timestamps_read_back_exactly() {
        let pulses = PulseSequence::new(&[0.5, 1.0, 1.5], 4, Some(0.5)).unwrap();
        let onsets = [0.5012345678901234, 1.0000001, 1.2499999999999998];
        let csv = annotation_csv(&annotation(&onsets, &pulses), &pulses);

        let parsed: Vec<f64> = csv
            .lines()
            .skip(1)
            .map(|line| line.split(',').next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(parsed, onsets.to_vec());
    }

    #[test]
    fn test_write_recording_layout() {
        let dir = tempfile::tempdir().unwrap();
        let pulses = PulseSequence::new(&[0.5, 1.0, 1.5], 4, Some(0.5)).unwrap();
        let outcome = RecordingOutcome {
            recording_id: "take_1".to_string(),
            status: QuantizationStatus::Partial,
            instruments: vec![annotation(&[1.0], &pulses)],
            pulses,
            asynchrony: Vec::new(),
            error: None,
        };

        let written = write_recording(dir.path(), &outcome, &InstrumentParameters::new()).unwrap();
        assert_eq!(written.len(), 2);
        let csv = fs::read_to_string(dir.path().join("take_1").join("bass.csv")).unwrap();
        assert!(csv.starts_with(CSV_HEADER));
        assert!(csv.contains("1,2,true"));

        let metadata: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("take_1").join("metadata.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(metadata["status"], "partial");
        assert_eq!(metadata["pulses"], 3);
    }
}
