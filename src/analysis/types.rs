// Timing event types
// Defines instruments, onset events, metrical pulses and their bindings

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipelineError;

/// Instrument class of a separated stem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instrument {
    Piano,
    Bass,
    Drums,
}

impl Instrument {
    /// All instruments in trio order
    pub const ALL: [Instrument; 3] = [Instrument::Piano, Instrument::Bass, Instrument::Drums];

    pub fn as_str(&self) -> &'static str {
        match self {
            Instrument::Piano => "piano",
            Instrument::Bass => "bass",
            Instrument::Drums => "drums",
        }
    }

    /// Parse from the lowercase name used in files and on the command line
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "piano" => Some(Instrument::Piano),
            "bass" => Some(Instrument::Bass),
            "drums" => Some(Instrument::Drums),
            _ => None,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced an onset stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Algorithmic,
    HumanReference,
}

/// A single detected occurrence
///
/// Immutable once created: fields are private and only exposed via getters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    timestamp: f64,
    instrument: Instrument,
    source: EventSource,
    stream_id: String,
}

impl Event {
    pub fn new(
        timestamp: f64,
        instrument: Instrument,
        source: EventSource,
        stream_id: impl Into<String>,
    ) -> Self {
        Event {
            timestamp,
            instrument,
            source,
            stream_id: stream_id.into(),
        }
    }

    /// Timestamp in seconds from the start of the recording
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    pub fn source(&self) -> EventSource {
        self.source
    }

    /// Identifier of the detector run (or annotator) that produced the event
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }
}

/// Build an ordered event stream from raw timestamps
///
/// # Errors
/// `MalformedStream` when a timestamp is non-finite or earlier than its
/// predecessor.
pub fn event_stream(
    timestamps: &[f64],
    instrument: Instrument,
    source: EventSource,
    stream_id: &str,
) -> Result<Vec<Event>, PipelineError> {
    check_ordered(timestamps, stream_id, false)?;
    Ok(timestamps
        .iter()
        .map(|&ts| Event::new(ts, instrument, source, stream_id))
        .collect())
}

/// A quarter-note beat from the mixture-level tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    /// Beat timestamp in seconds
    pub timestamp: f64,
    /// 1-based beat index within the measure
    pub metrical_position: u32,
}

/// Strictly increasing sequence of pulses for one recording
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseSequence {
    pulses: Vec<Pulse>,
    beats_per_measure: u32,
}

impl PulseSequence {
    /// Build a pulse sequence and derive metrical positions
    ///
    /// The pulse nearest to `first_downbeat` is beat 1; positions before it
    /// count backwards modulo `beats_per_measure`. Without a downbeat the
    /// first pulse is taken as beat 1.
    ///
    /// # Errors
    /// `MalformedStream` when timestamps are non-finite, not strictly
    /// increasing, or `beats_per_measure` is zero.
    pub fn new(
        timestamps: &[f64],
        beats_per_measure: u32,
        first_downbeat: Option<f64>,
    ) -> Result<Self, PipelineError> {
        if beats_per_measure == 0 {
            return Err(PipelineError::malformed(
                "pulses",
                "beats_per_measure must be > 0",
            ));
        }
        check_ordered(timestamps, "pulses", true)?;

        let anchor = match first_downbeat {
            Some(downbeat) if !timestamps.is_empty() => nearest_index(timestamps, downbeat),
            _ => 0,
        };

        let bpm = beats_per_measure as i64;
        let pulses = timestamps
            .iter()
            .enumerate()
            .map(|(idx, &timestamp)| {
                let beat = (idx as i64 - anchor as i64).rem_euclid(bpm);
                Pulse {
                    timestamp,
                    metrical_position: beat as u32 + 1,
                }
            })
            .collect();

        Ok(Self {
            pulses,
            beats_per_measure,
        })
    }

    pub fn empty(beats_per_measure: u32) -> Self {
        Self {
            pulses: Vec::new(),
            beats_per_measure,
        }
    }

    pub fn pulses(&self) -> &[Pulse] {
        &self.pulses
    }

    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }

    pub fn beats_per_measure(&self) -> u32 {
        self.beats_per_measure
    }

    pub fn get(&self, index: usize) -> Option<&Pulse> {
        self.pulses.get(index)
    }

    /// Duration of the beat that encloses `timestamp`
    ///
    /// Returns `None` outside `[first, last]` or with fewer than two pulses.
    pub fn enclosing_interval(&self, timestamp: f64) -> Option<(usize, f64)> {
        if self.pulses.len() < 2 {
            return None;
        }
        let first = self.pulses[0].timestamp;
        let last = self.pulses[self.pulses.len() - 1].timestamp;
        if timestamp < first || timestamp > last {
            return None;
        }
        // index of the first pulse strictly after the timestamp, clamped so an
        // event on the last pulse uses the final interval
        let upper = self
            .pulses
            .partition_point(|p| p.timestamp <= timestamp)
            .clamp(1, self.pulses.len() - 1);
        let lower = upper - 1;
        Some((
            lower,
            self.pulses[upper].timestamp - self.pulses[lower].timestamp,
        ))
    }
}

/// Why a MatchedEvent ended up bound or unbound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Bound to its nearest pulse
    Matched,
    /// Within tolerance but another event won the pulse
    Demoted,
    /// Nearest pulse farther than the tolerance
    OutOfTolerance,
    /// Before the first pulse or after the last
    OutsidePulseRange,
    /// The recording has no usable beat grid
    NoPulses,
}

/// An event bound to at most one pulse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedEvent {
    pub event: Event,
    /// Bound pulse; `None` for every non-`Matched` status
    pub pulse_index: Option<usize>,
    /// Nearest pulse considered, kept for auditing unmatched rows
    pub nearest_pulse: Option<usize>,
    /// event timestamp − nearest pulse timestamp, in seconds
    pub offset: Option<f64>,
    pub status: MatchStatus,
}

impl MatchedEvent {
    pub fn is_matched(&self) -> bool {
        self.status == MatchStatus::Matched
    }
}

fn nearest_index(timestamps: &[f64], target: f64) -> usize {
    let upper = timestamps.partition_point(|&t| t < target);
    if upper == 0 {
        return 0;
    }
    if upper == timestamps.len() {
        return timestamps.len() - 1;
    }
    if (target - timestamps[upper - 1]) <= (timestamps[upper] - target) {
        upper - 1
    } else {
        upper
    }
}

fn check_ordered(timestamps: &[f64], stream: &str, strict: bool) -> Result<(), PipelineError> {
    for (idx, &ts) in timestamps.iter().enumerate() {
        if !ts.is_finite() {
            return Err(PipelineError::malformed(
                stream,
                format!("timestamp {} at index {} is not finite", ts, idx),
            ));
        }
        if idx > 0 {
            let prev = timestamps[idx - 1];
            let out_of_order = if strict { ts <= prev } else { ts < prev };
            if out_of_order {
                return Err(PipelineError::malformed(
                    stream,
                    format!("timestamp {} at index {} follows {}", ts, idx, prev),
                ));
            }
        }
    }
    Ok(())
}
