//! Recording catalog for the batch and tuning harnesses.
//!
//! Discovers detector dumps (`<id>.detections.json`) in a directory along with
//! optional human reference annotations (`<id>.reference.json`), and turns the
//! annotations into per-instrument reference sets for the optimizer.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::{event_stream, Event, EventSource, Instrument};
use crate::error::PipelineError;

/// Default location for recording dumps and references.
pub const DEFAULT_RECORDING_ROOT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures");

const DETECTIONS_SUFFIX: &str = ".detections.json";
const REFERENCE_SUFFIX: &str = ".reference.json";

pub fn detections_path(root: &Path, recording_id: &str) -> PathBuf {
    root.join(format!("{recording_id}{DETECTIONS_SUFFIX}"))
}

pub fn reference_path(root: &Path, recording_id: &str) -> PathBuf {
    root.join(format!("{recording_id}{REFERENCE_SUFFIX}"))
}

/// Metadata describing an available recording.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordingMetadata {
    pub id: String,
    pub detections_path: PathBuf,
    pub reference_path: Option<PathBuf>,
}

/// Human-annotated onsets for one recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceAnnotation {
    pub recording_id: String,
    /// Onset timestamps in seconds per instrument
    #[serde(default)]
    pub onsets: BTreeMap<Instrument, Vec<f64>>,
}

impl ReferenceAnnotation {
    pub fn has_instrument(&self, instrument: Instrument) -> bool {
        self.onsets.contains_key(&instrument)
    }

    /// Reference events for one instrument (empty when not annotated)
    pub fn events(&self, instrument: Instrument) -> Result<Vec<Event>, PipelineError> {
        let stream_id = format!("{}/{}/reference", self.recording_id, instrument);
        let timestamps = self
            .onsets
            .get(&instrument)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        event_stream(
            timestamps,
            instrument,
            EventSource::HumanReference,
            &stream_id,
        )
    }
}

/// Reference onsets of one instrument in one recording, used for tuning
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSet {
    pub recording_id: String,
    pub instrument: Instrument,
    pub events: Vec<Event>,
}

impl ReferenceSet {
    pub fn timestamps(&self) -> Vec<f64> {
        self.events.iter().map(Event::timestamp).collect()
    }
}

/// Catalog responsible for discovering recordings on disk.
pub struct RecordingCatalog {
    root: PathBuf,
}

impl RecordingCatalog {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List all recordings by their metadata, sorted by id.
    pub fn discover(&self) -> Result<Vec<RecordingMetadata>> {
        let mut recordings = Vec::new();
        if !self.root.exists() {
            return Ok(recordings);
        }

        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("listing {}", self.root.display()))?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(id) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(DETECTIONS_SUFFIX))
            else {
                continue;
            };
            if id.is_empty() {
                continue;
            }
            let reference = reference_path(&self.root, id);
            recordings.push(RecordingMetadata {
                id: id.to_string(),
                detections_path: entry.path(),
                reference_path: reference.exists().then_some(reference),
            });
        }

        recordings.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(recordings)
    }

    /// Metadata for a single recording id.
    pub fn metadata(&self, recording_id: &str) -> Result<RecordingMetadata> {
        let detections = detections_path(&self.root, recording_id);
        if !detections.exists() {
            return Err(anyhow!(
                "Recording '{recording_id}' not found in {}",
                self.root.display()
            ));
        }
        let reference = reference_path(&self.root, recording_id);
        Ok(RecordingMetadata {
            id: recording_id.to_string(),
            detections_path: detections,
            reference_path: reference.exists().then_some(reference),
        })
    }

    /// Load the reference annotation of a recording, if it has one.
    pub fn load_reference(&self, metadata: &RecordingMetadata) -> Result<Option<ReferenceAnnotation>> {
        let Some(path) = &metadata.reference_path else {
            return Ok(None);
        };
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading reference {}", path.display()))?;
        let mut annotation: ReferenceAnnotation =
            serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))?;
        if annotation.recording_id.is_empty() {
            annotation.recording_id = metadata.id.clone();
        }
        Ok(Some(annotation))
    }

    /// Reference sets per instrument across every annotated recording.
    ///
    /// Recordings whose annotation cannot be read, or whose onsets are out of
    /// order, are skipped with a warning rather than failing the whole set.
    pub fn reference_sets(&self) -> Result<BTreeMap<Instrument, Vec<ReferenceSet>>> {
        let mut sets: BTreeMap<Instrument, Vec<ReferenceSet>> = Instrument::ALL
            .iter()
            .map(|&instrument| (instrument, Vec::new()))
            .collect();

        for metadata in self.discover()? {
            let annotation = match self.load_reference(&metadata) {
                Ok(Some(annotation)) => annotation,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(recording_id = %metadata.id, error = %err, "skipping unreadable reference");
                    continue;
                }
            };

            for instrument in Instrument::ALL {
                if !annotation.has_instrument(instrument) {
                    continue;
                }
                match annotation.events(instrument) {
                    Ok(events) => {
                        if let Some(list) = sets.get_mut(&instrument) {
                            list.push(ReferenceSet {
                                recording_id: metadata.id.clone(),
                                instrument,
                                events,
                            });
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            recording_id = %metadata.id,
                            %instrument,
                            error = %err,
                            "skipping malformed reference stream"
                        );
                    }
                }
            }
        }

        Ok(sets)
    }
}

impl Default for RecordingCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_RECORDING_ROOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_discover_pairs_references() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.detections.json", "{}");
        write(dir.path(), "a.detections.json", "{}");
        write(
            dir.path(),
            "a.reference.json",
            r#"{"recording_id": "a", "onsets": {"piano": [0.5, 1.0]}}"#,
        );
        write(dir.path(), "notes.txt", "ignored");

        let catalog = RecordingCatalog::new(dir.path());
        let recordings = catalog.discover().unwrap();
        let ids: Vec<&str> = recordings.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(recordings[0].reference_path.is_some());
        assert!(recordings[1].reference_path.is_none());
    }

    #[test]
    fn test_missing_root_is_empty() {
        let catalog = RecordingCatalog::new("no/such/dir");
        assert!(catalog.discover().unwrap().is_empty());
        assert!(catalog.metadata("x").is_err());
    }

    #[test]
    fn test_reference_sets_group_by_instrument() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.detections.json", "{}");
        write(
            dir.path(),
            "a.reference.json",
            r#"{"onsets": {"piano": [0.5, 1.0], "drums": []}}"#,
        );
        write(dir.path(), "b.detections.json", "{}");
        write(
            dir.path(),
            "b.reference.json",
            r#"{"recording_id": "b", "onsets": {"piano": [2.0, 1.0], "bass": [0.25]}}"#,
        );

        let sets = RecordingCatalog::new(dir.path()).reference_sets().unwrap();
        // b's piano stream is out of order and skipped
        assert_eq!(sets[&Instrument::Piano].len(), 1);
        assert_eq!(sets[&Instrument::Piano][0].recording_id, "a");
        assert_eq!(sets[&Instrument::Piano][0].timestamps(), vec![0.5, 1.0]);
        assert_eq!(sets[&Instrument::Bass].len(), 1);
        // an explicitly empty annotation is still a usable reference
        assert_eq!(sets[&Instrument::Drums].len(), 1);
        assert!(sets[&Instrument::Drums][0].events.is_empty());
    }

    #[test]
    fn test_reference_events_are_human_source() {
        let mut onsets = BTreeMap::new();
        onsets.insert(Instrument::Bass, vec![0.1, 0.2]);
        let annotation = ReferenceAnnotation {
            recording_id: "r".to_string(),
            onsets,
        };
        let events = annotation.events(Instrument::Bass).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].source(), EventSource::HumanReference);
        assert!(annotation.events(Instrument::Piano).unwrap().is_empty());
    }
}
