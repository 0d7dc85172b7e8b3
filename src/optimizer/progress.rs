// Progress reporting for the parameter search
//
// SearchProgress is broadcast after every coordinate step so a CLI or log
// consumer can follow long tuning runs.

use serde::{Deserialize, Serialize};

use crate::analysis::Instrument;

/// Why the search stopped (or that it has not yet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Running,
    /// A full sweep gained less than the minimum improvement
    Converged,
    /// The sweep limit was reached first
    SweepLimit,
    /// Stopped by a cancellation token after a coordinate step
    Cancelled,
}

impl SearchStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, SearchStatus::Running)
    }
}

/// Snapshot of the search after one coordinate step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchProgress {
    pub instrument: Instrument,
    /// 1-based sweep the step belonged to
    pub sweep: u32,
    /// Parameter that was just line-searched
    pub parameter: String,
    pub best_score: f64,
    /// Objective evaluations so far (one per candidate vector)
    pub evaluations: usize,
    pub status: SearchStatus,
}

/// Best score at the end of a sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRecord {
    pub sweep: u32,
    pub best_score: f64,
    /// Gain over the score at the start of the sweep
    pub improvement: f64,
}
