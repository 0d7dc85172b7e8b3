//! Ensemble asynchrony from quantized onsets
//!
//! Expresses every matched onset relative to the local beat so recordings at
//! different tempi can be compared. Offsets are reported both as a fraction of
//! the enclosing beat and as a proportion of the measure, and per-beat means are
//! re-centred on the drums' average position on beat 1.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{Instrument, MatchedEvent, PulseSequence};

/// Position of one matched onset within the beat and the measure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AsynchronyPoint {
    pub instrument: Instrument,
    /// 1-based beat of the bound pulse
    pub metrical_position: u32,
    /// Signed offset divided by the local beat duration
    pub beat_offset: f64,
    /// Signed offset as a proportion of the measure
    pub measure_offset: f64,
    /// Onset position within the measure in `[0, 1)`
    pub measure_position: f64,
}

/// Mean asynchrony for one instrument on one beat of the measure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatAsynchrony {
    pub instrument: Instrument,
    pub metrical_position: u32,
    /// Mean measure-proportional offset, relative to drums on beat 1
    pub mean_offset: f64,
    pub count: usize,
}

/// Convert matched events into beat-relative asynchrony points
///
/// Unmatched events and events without a usable beat duration are skipped.
pub fn asynchrony_points(matches: &[MatchedEvent], pulses: &PulseSequence) -> Vec<AsynchronyPoint> {
    let beats_per_measure = pulses.beats_per_measure().max(1) as f64;

    matches
        .iter()
        .filter(|m| m.is_matched())
        .filter_map(|m| {
            let pulse = pulses.get(m.pulse_index?)?;
            let offset = m.offset?;
            let (_, interval) = pulses.enclosing_interval(m.event.timestamp())?;
            if interval <= 0.0 {
                return None;
            }

            let beat_offset = offset / interval;
            let beat_in_measure = (pulse.metrical_position - 1) as f64 + beat_offset;
            Some(AsynchronyPoint {
                instrument: m.event.instrument(),
                metrical_position: pulse.metrical_position,
                beat_offset,
                measure_offset: beat_offset / beats_per_measure,
                measure_position: (beat_in_measure / beats_per_measure).rem_euclid(1.0),
            })
        })
        .collect()
}

/// Average asynchrony per instrument and beat
///
/// Means are shifted so the drums' mean on beat 1 sits at zero. When no drum
/// onsets land on beat 1 the raw means are returned.
pub fn mean_asynchrony(points: &[AsynchronyPoint]) -> Vec<BeatAsynchrony> {
    let mut groups: BTreeMap<(Instrument, u32), (f64, usize)> = BTreeMap::new();
    for point in points {
        let entry = groups
            .entry((point.instrument, point.metrical_position))
            .or_insert((0.0, 0));
        entry.0 += point.measure_offset;
        entry.1 += 1;
    }

    let shift = groups
        .get(&(Instrument::Drums, 1))
        .map(|(sum, count)| sum / *count as f64)
        .unwrap_or(0.0);

    groups
        .into_iter()
        .map(|((instrument, metrical_position), (sum, count))| BeatAsynchrony {
            instrument,
            metrical_position,
            mean_offset: sum / count as f64 - shift,
            count,
        })
        .collect()
}
