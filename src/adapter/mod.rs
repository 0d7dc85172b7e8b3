//! Event source adapters
//!
//! Wraps the external onset and beat detectors behind [`DetectorBackend`].
//! Per recording a backend yields one ordered onset stream per instrument and
//! the mixture-wide pulse sequence, steered by per-instrument parameter sets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::{Event, Instrument, PulseSequence};
use crate::error::PipelineError;
use crate::optimizer::parameters::{ParameterSet, LATENCY, MIN_INTERVAL, THRESHOLD};

pub mod precomputed;
pub mod synthetic;

pub use precomputed::{DetectorDump, PrecomputedBackend};
pub use synthetic::{SyntheticConfig, SyntheticRecording};

/// Per-instrument parameter sets handed to a backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentParameters {
    sets: BTreeMap<Instrument, ParameterSet>,
}

impl InstrumentParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters for a single instrument; the others use backend defaults
    pub fn single(set: ParameterSet) -> Self {
        Self::new().with(set)
    }

    pub fn with(mut self, set: ParameterSet) -> Self {
        self.sets.insert(set.instrument(), set);
        self
    }

    pub fn get(&self, instrument: Instrument) -> Option<&ParameterSet> {
        self.sets.get(&instrument)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterSet> {
        self.sets.values()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl FromIterator<ParameterSet> for InstrumentParameters {
    fn from_iter<T: IntoIterator<Item = ParameterSet>>(iter: T) -> Self {
        iter.into_iter()
            .fold(InstrumentParameters::new(), InstrumentParameters::with)
    }
}

/// Detector output for one recording
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub recording_id: String,
    /// Ordered algorithmic onsets per instrument
    pub onsets: BTreeMap<Instrument, Vec<Event>>,
    pub pulses: PulseSequence,
}

impl Detection {
    pub fn onsets_for(&self, instrument: Instrument) -> &[Event] {
        self.onsets
            .get(&instrument)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Trait implemented by detector integrations.
///
/// Implementations must be shareable across the batch worker pool.
pub trait DetectorBackend: Send + Sync {
    /// Run (or replay) the detectors for `recording_id`
    fn detect(
        &self,
        recording_id: &str,
        parameters: &InstrumentParameters,
    ) -> Result<Detection, PipelineError>;
}

/// A raw onset candidate before peak picking
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Seconds from the start of the recording
    pub time: f64,
    /// Detector activation in `[0, 1]`
    pub strength: f64,
}

/// Tunable peak-picking stage applied to onset candidates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakPicking {
    pub threshold: f64,
    pub min_interval: f64,
    pub latency: f64,
}

impl Default for PeakPicking {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            min_interval: 0.05,
            latency: 0.0,
        }
    }
}

impl PeakPicking {
    /// Read the stage settings from a parameter set, defaulting missing names
    pub fn from_parameters(set: Option<&ParameterSet>) -> Self {
        let defaults = Self::default();
        match set {
            Some(set) => Self {
                threshold: set.get(THRESHOLD).unwrap_or(defaults.threshold),
                min_interval: set.get(MIN_INTERVAL).unwrap_or(defaults.min_interval),
                latency: set.get(LATENCY).unwrap_or(defaults.latency),
            },
            None => defaults,
        }
    }

    /// Select onset times from time-ordered candidates
    ///
    /// Keeps candidates at or above `threshold`, drops any candidate closer
    /// than `min_interval` to the previously kept one, shifts by `latency` and
    /// discards shifted times before zero. The result is non-decreasing.
    pub fn pick(&self, candidates: &[Candidate]) -> Vec<f64> {
        let mut kept: Vec<f64> = Vec::new();
        let mut last: Option<f64> = None;

        for candidate in candidates.iter().filter(|c| c.strength >= self.threshold) {
            if let Some(prev) = last {
                if candidate.time - prev < self.min_interval {
                    continue;
                }
            }
            last = Some(candidate.time);
            let shifted = candidate.time + self.latency;
            if shifted >= 0.0 {
                kept.push(shifted);
            }
        }

        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::parameters::DEFAULT_PARAMETER_SPACE;

    fn candidates(raw: &[(f64, f64)]) -> Vec<Candidate> {
        raw.iter()
            .map(|&(time, strength)| Candidate { time, strength })
            .collect()
    }

    #[test]
    fn test_threshold_filters_weak_candidates() {
        let picking = PeakPicking {
            threshold: 0.5,
            min_interval: 0.0,
            latency: 0.0,
        };
        let picked = picking.pick(&candidates(&[(0.1, 0.4), (0.2, 0.5), (0.3, 0.9)]));
        assert_eq!(picked, vec![0.2, 0.3]);
    }

    #[test]
    fn test_min_interval_suppresses_retriggers() {
        let picking = PeakPicking {
            threshold: 0.0,
            min_interval: 0.05,
            latency: 0.0,
        };
        let picked = picking.pick(&candidates(&[(1.0, 0.9), (1.02, 0.8), (1.06, 0.7)]));
        assert_eq!(picked, vec![1.0, 1.06]);
    }

    #[test]
    fn test_latency_shift_drops_negative_times() {
        let picking = PeakPicking {
            threshold: 0.0,
            min_interval: 0.0,
            latency: -0.25,
        };
        let picked = picking.pick(&candidates(&[(0.125, 0.9), (0.5, 0.9)]));
        assert_eq!(picked, vec![0.25]);
    }

    #[test]
    fn test_from_parameters_defaults_missing_names() {
        let mut values = BTreeMap::new();
        values.insert(THRESHOLD.to_string(), 0.7);
        let set = ParameterSet::new(Instrument::Piano, values);

        let picking = PeakPicking::from_parameters(Some(&set));
        assert_eq!(picking.threshold, 0.7);
        assert_eq!(picking.min_interval, PeakPicking::default().min_interval);
        assert_eq!(PeakPicking::from_parameters(None), PeakPicking::default());
    }

    #[test]
    fn test_instrument_parameters_keyed_by_instrument() {
        let params: InstrumentParameters = Instrument::ALL
            .iter()
            .map(|&i| ParameterSet::initial(i, &DEFAULT_PARAMETER_SPACE))
            .collect();
        assert_eq!(params.len(), 3);
        assert_eq!(
            params.get(Instrument::Drums).map(|s| s.instrument()),
            Some(Instrument::Drums)
        );
        assert!(InstrumentParameters::new().get(Instrument::Bass).is_none());
    }
}
