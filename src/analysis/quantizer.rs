//! Quantizer - binds detected onsets to the mixture's quarter-note pulses
//!
//! Each onset is matched to its nearest pulse by binary search over the
//! strictly increasing pulse sequence. A match is accepted only when the
//! absolute offset is within a fraction of the enclosing beat duration, so the
//! window follows tempo drift instead of being an absolute constant.
//!
//! When several onsets claim the same pulse the smallest |offset| wins and
//! ties go to the earlier onset. Losers stay in the output as `Demoted` so
//! downstream consumers can audit them. This greedy nearest-neighbour
//! assignment is intentionally not an optimal bipartite solver: the reference
//! F-score and asynchrony figures were calibrated against it.

use serde::{Deserialize, Serialize};

use super::types::{Event, MatchStatus, MatchedEvent, PulseSequence};

/// Tolerance expressed as a proportion of the local inter-pulse interval
///
/// Values are clamped to `[0.0, 0.5]`: the nearest pulse is never more than
/// half a beat away, so larger fractions accept everything inside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatFraction(f64);

impl BeatFraction {
    pub fn new(fraction: f64) -> Self {
        if fraction.is_nan() {
            return BeatFraction(0.0);
        }
        BeatFraction(fraction.clamp(0.0, 0.5))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Absolute window in seconds for a beat of `interval` seconds
    pub fn window(&self, interval: f64) -> f64 {
        self.0 * interval
    }
}

impl Default for BeatFraction {
    fn default() -> Self {
        BeatFraction(0.25)
    }
}

/// Summary of one quantization pass over a single stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantizationSummary {
    pub total: usize,
    pub matched: usize,
    pub demoted: usize,
    pub out_of_tolerance: usize,
    pub outside_pulse_range: usize,
    pub no_pulses: usize,
}

impl QuantizationSummary {
    pub fn from_matches(matches: &[MatchedEvent]) -> Self {
        let mut summary = QuantizationSummary {
            total: matches.len(),
            ..Default::default()
        };
        for m in matches {
            match m.status {
                MatchStatus::Matched => summary.matched += 1,
                MatchStatus::Demoted => summary.demoted += 1,
                MatchStatus::OutOfTolerance => summary.out_of_tolerance += 1,
                MatchStatus::OutsidePulseRange => summary.outside_pulse_range += 1,
                MatchStatus::NoPulses => summary.no_pulses += 1,
            }
        }
        summary
    }

    pub fn unmatched(&self) -> usize {
        self.total - self.matched
    }

    /// Fraction of events bound to a pulse, 0.0 for an empty stream
    pub fn match_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matched as f64 / self.total as f64
        }
    }
}

/// Quantize an ordered event stream against a pulse sequence
///
/// # Arguments
/// * `events` - Onsets of one instrument from one source, in time order
/// * `pulses` - Strictly increasing quarter-note pulses
/// * `tolerance` - Accepted |offset| as a fraction of the enclosing beat
///
/// # Returns
/// One `MatchedEvent` per input event, in input order. Each pulse is bound to
/// at most one event. With fewer than two pulses there is no beat duration
/// and every event is emitted as `NoPulses`; this is a valid outcome.
pub fn quantize(
    events: &[Event],
    pulses: &PulseSequence,
    tolerance: BeatFraction,
) -> Vec<MatchedEvent> {
    if pulses.len() < 2 {
        return events
            .iter()
            .map(|event| {
                let nearest = pulses.get(0).map(|p| (0, event.timestamp() - p.timestamp));
                MatchedEvent {
                    event: event.clone(),
                    pulse_index: None,
                    nearest_pulse: nearest.map(|(idx, _)| idx),
                    offset: nearest.map(|(_, offset)| offset),
                    status: MatchStatus::NoPulses,
                }
            })
            .collect();
    }

    let grid = pulses.pulses();
    let mut proposals: Vec<Proposal> = Vec::with_capacity(events.len());

    for event in events {
        let ts = event.timestamp();
        let proposal = match pulses.enclosing_interval(ts) {
            None => {
                let nearest = if ts < grid[0].timestamp {
                    0
                } else {
                    grid.len() - 1
                };
                Proposal {
                    nearest,
                    offset: ts - grid[nearest].timestamp,
                    within: false,
                    status: MatchStatus::OutsidePulseRange,
                }
            }
            Some((lower, interval)) => {
                let to_lower = ts - grid[lower].timestamp;
                let to_upper = grid[lower + 1].timestamp - ts;
                // an exact midpoint resolves to the earlier pulse
                let nearest = if to_lower <= to_upper { lower } else { lower + 1 };
                let offset = ts - grid[nearest].timestamp;
                let within = offset.abs() <= tolerance.window(interval);
                Proposal {
                    nearest,
                    offset,
                    within,
                    status: if within {
                        MatchStatus::Matched
                    } else {
                        MatchStatus::OutOfTolerance
                    },
                }
            }
        };
        proposals.push(proposal);
    }

    // winner per pulse: smallest |offset|, then earliest arrival
    let mut winners: Vec<Option<usize>> = vec![None; grid.len()];
    for (idx, proposal) in proposals.iter().enumerate() {
        if !proposal.within {
            continue;
        }
        let slot = &mut winners[proposal.nearest];
        match *slot {
            None => *slot = Some(idx),
            Some(current) => {
                if proposal.offset.abs() < proposals[current].offset.abs() {
                    *slot = Some(idx);
                }
            }
        }
    }

    events
        .iter()
        .zip(proposals)
        .enumerate()
        .map(|(idx, (event, proposal))| {
            let won = proposal.within && winners[proposal.nearest] == Some(idx);
            let status = if proposal.within && !won {
                MatchStatus::Demoted
            } else {
                proposal.status
            };
            MatchedEvent {
                event: event.clone(),
                pulse_index: won.then_some(proposal.nearest),
                nearest_pulse: Some(proposal.nearest),
                offset: Some(proposal.offset),
                status,
            }
        })
        .collect()
}

struct Proposal {
    nearest: usize,
    offset: f64,
    within: bool,
    status: MatchStatus,
}
