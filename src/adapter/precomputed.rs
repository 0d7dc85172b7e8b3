//! Backend replaying detector dumps written by the upstream models.
//!
//! Each recording has a `<id>.detections.json` file holding the raw onset
//! candidates per stem and the beat tracker output. Only the peak-picking
//! stage is re-run here, which makes the dumps cheap to tune against.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::{Candidate, Detection, DetectorBackend, InstrumentParameters, PeakPicking};
use crate::analysis::{event_stream, EventSource, Instrument, PulseSequence};
use crate::catalog::detections_path;
use crate::error::PipelineError;

/// On-disk detector output for one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorDump {
    pub recording_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beats_per_measure: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_downbeat: Option<f64>,
    /// Quarter-note pulse timestamps from the mixture
    #[serde(default)]
    pub pulses: Vec<f64>,
    /// Raw onset candidates per separated stem
    #[serde(default)]
    pub onsets: BTreeMap<Instrument, Vec<Candidate>>,
    /// Set when an upstream stage failed for this recording
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Detector backend over precomputed dumps, in memory or in a directory
pub struct PrecomputedBackend {
    root: Option<PathBuf>,
    dumps: RwLock<HashMap<String, Arc<DetectorDump>>>,
    beats_per_measure: u32,
}

impl PrecomputedBackend {
    /// Read dumps lazily from `root`, caching each after its first use
    pub fn from_dir<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: Some(root.into()),
            dumps: RwLock::new(HashMap::new()),
            beats_per_measure: 4,
        }
    }

    pub fn from_dumps<I: IntoIterator<Item = DetectorDump>>(dumps: I) -> Self {
        let dumps = dumps
            .into_iter()
            .map(|dump| (dump.recording_id.clone(), Arc::new(dump)))
            .collect();
        Self {
            root: None,
            dumps: RwLock::new(dumps),
            beats_per_measure: 4,
        }
    }

    /// Meter assumed when a dump does not declare one
    pub fn with_beats_per_measure(mut self, beats_per_measure: u32) -> Self {
        if beats_per_measure > 0 {
            self.beats_per_measure = beats_per_measure;
        }
        self
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn dump(&self, recording_id: &str) -> Result<Arc<DetectorDump>, PipelineError> {
        if let Ok(cache) = self.dumps.read() {
            if let Some(dump) = cache.get(recording_id) {
                return Ok(Arc::clone(dump));
            }
        }

        let root = self
            .root
            .as_ref()
            .ok_or_else(|| PipelineError::RecordingNotFound {
                recording_id: recording_id.to_string(),
            })?;
        let path = detections_path(root, recording_id);
        let json = fs::read_to_string(&path).map_err(|_| PipelineError::RecordingNotFound {
            recording_id: recording_id.to_string(),
        })?;
        let dump: DetectorDump = serde_json::from_str(&json).map_err(|err| {
            PipelineError::malformed(path.display().to_string(), err.to_string())
        })?;

        let dump = Arc::new(dump);
        if let Ok(mut cache) = self.dumps.write() {
            cache.insert(recording_id.to_string(), Arc::clone(&dump));
        }
        Ok(dump)
    }
}

impl DetectorBackend for PrecomputedBackend {
    fn detect(
        &self,
        recording_id: &str,
        parameters: &InstrumentParameters,
    ) -> Result<Detection, PipelineError> {
        let dump = self.dump(recording_id)?;
        if let Some(reason) = &dump.error {
            return Err(PipelineError::upstream(recording_id, reason.clone()));
        }

        let pulses = PulseSequence::new(
            &dump.pulses,
            dump.beats_per_measure.unwrap_or(self.beats_per_measure),
            dump.first_downbeat,
        )?;

        let mut onsets = BTreeMap::new();
        for instrument in Instrument::ALL {
            let stream_id = format!("{}/{}", recording_id, instrument);
            let mut candidates = dump.onsets.get(&instrument).cloned().unwrap_or_default();
            if let Some(bad) = candidates.iter().find(|c| !c.time.is_finite()) {
                return Err(PipelineError::malformed(
                    stream_id,
                    format!("candidate time {} is not finite", bad.time),
                ));
            }
            candidates.sort_by(|a, b| a.time.total_cmp(&b.time));

            let picking = PeakPicking::from_parameters(parameters.get(instrument));
            let times = picking.pick(&candidates);
            let events = event_stream(&times, instrument, EventSource::Algorithmic, &stream_id)?;
            onsets.insert(instrument, events);
        }

        Ok(Detection {
            recording_id: recording_id.to_string(),
            onsets,
            pulses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::parameters::{ParameterSet, THRESHOLD};

    fn dump(id: &str) -> DetectorDump {
        let mut onsets = BTreeMap::new();
        onsets.insert(
            Instrument::Piano,
            vec![
                Candidate {
                    time: 1.0,
                    strength: 0.9,
                },
                Candidate {
                    time: 0.5,
                    strength: 0.2,
                },
            ],
        );
        DetectorDump {
            recording_id: id.to_string(),
            beats_per_measure: None,
            first_downbeat: Some(0.5),
            pulses: vec![0.5, 1.0, 1.5],
            onsets,
            error: None,
        }
    }

    #[test]
    fn test_detect_applies_peak_picking_per_instrument() {
        let backend = PrecomputedBackend::from_dumps(vec![dump("rec")]);

        let detection = backend.detect("rec", &InstrumentParameters::new()).unwrap();
        assert_eq!(detection.onsets_for(Instrument::Piano).len(), 1);
        assert!(detection.onsets_for(Instrument::Bass).is_empty());
        assert_eq!(detection.pulses.len(), 3);
        assert_eq!(detection.pulses.beats_per_measure(), 4);

        let mut values = BTreeMap::new();
        values.insert(THRESHOLD.to_string(), 0.1);
        let params = InstrumentParameters::single(ParameterSet::new(Instrument::Piano, values));
        let detection = backend.detect("rec", &params).unwrap();
        let times: Vec<f64> = detection
            .onsets_for(Instrument::Piano)
            .iter()
            .map(|e| e.timestamp())
            .collect();
        assert_eq!(times, vec![0.5, 1.0]);
        assert_eq!(
            detection.onsets_for(Instrument::Piano)[0].stream_id(),
            "rec/piano"
        );
    }

    #[test]
    fn test_upstream_failure_is_reported() {
        let mut failed = dump("broken");
        failed.error = Some("separation model crashed".to_string());
        let backend = PrecomputedBackend::from_dumps(vec![failed]);

        let err = backend
            .detect("broken", &InstrumentParameters::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::UpstreamDetectionFailure { .. }));
    }

    #[test]
    fn test_unknown_recording() {
        let backend = PrecomputedBackend::from_dumps(Vec::new());
        let err = backend
            .detect("missing", &InstrumentParameters::new())
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::RecordingNotFound {
                recording_id: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_pulses_rejected() {
        let mut bad = dump("rec");
        bad.pulses = vec![1.0, 0.5];
        let backend = PrecomputedBackend::from_dumps(vec![bad]);
        let err = backend.detect("rec", &InstrumentParameters::new()).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedStream { .. }));
    }

    #[test]
    fn test_reads_dumps_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::to_string(&dump("disk")).unwrap();
        fs::write(dir.path().join("disk.detections.json"), json).unwrap();
        fs::write(dir.path().join("junk.detections.json"), "{not json").unwrap();

        let backend = PrecomputedBackend::from_dir(dir.path()).with_beats_per_measure(3);
        let detection = backend.detect("disk", &InstrumentParameters::new()).unwrap();
        assert_eq!(detection.pulses.beats_per_measure(), 3);

        let err = backend.detect("junk", &InstrumentParameters::new()).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedStream { .. }));
    }
}
