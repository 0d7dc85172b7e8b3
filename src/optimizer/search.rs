// Coordinate-wise line search over detector parameters
//
// State is explicit so the search can be driven one coordinate at a time:
// best grid vector, best aggregate score, completed sweeps and the cursor
// of the next coordinate. Values live on the grid `initial + k * step`, kept
// as integer offsets so repeated moves never drift off the grid.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::analysis::Instrument;
use crate::catalog::ReferenceSet;
use crate::config::OptimizerConfig;
use crate::error::{ErrorCode, OptimizerError};

use super::objective::Objective;
use super::parameters::{ParameterRange, ParameterSet, ParameterSpace};
use super::progress::{SearchProgress, SearchStatus, SweepRecord};

/// Shared flag used to stop a running search between steps
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Result of a finished search for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub instrument: Instrument,
    pub best: ParameterSet,
    /// Mean per-recording F-score of `best`
    pub best_score: f64,
    /// Mean per-recording F-score of the initial vector
    pub baseline_score: f64,
    pub status: SearchStatus,
    pub sweeps: u32,
    pub evaluations: usize,
    pub available_recordings: usize,
    /// Recordings the objective could score at the initial vector
    pub usable_recordings: usize,
    pub history: Vec<SweepRecord>,
}

struct Axis {
    name: String,
    range: ParameterRange,
    lower: i64,
    upper: i64,
}

/// Bounded coordinate search for one instrument
pub struct CoordinateSearch<O: Objective> {
    instrument: Instrument,
    space: ParameterSpace,
    references: Vec<ReferenceSet>,
    objective: O,
    config: OptimizerConfig,
    axes: Vec<Axis>,
    best: Vec<i64>,
    best_score: f64,
    baseline_score: f64,
    sweep_start_score: f64,
    sweeps: u32,
    cursor: usize,
    evaluations: usize,
    usable_recordings: usize,
    history: Vec<SweepRecord>,
    status: SearchStatus,
    cancel: CancellationToken,
    progress: Option<broadcast::Sender<SearchProgress>>,
}

impl<O: Objective> CoordinateSearch<O> {
    /// Prepare a search and score the initial vector
    ///
    /// # Errors
    /// - `InsufficientReferenceData` with no reference recordings, or when no
    ///   recording can be scored at the initial vector
    /// - `ParameterOutOfRange` when an initial value lies outside its range
    pub fn new(
        instrument: Instrument,
        references: Vec<ReferenceSet>,
        space: ParameterSpace,
        objective: O,
        config: OptimizerConfig,
    ) -> Result<Self, OptimizerError> {
        if references.is_empty() {
            return Err(OptimizerError::InsufficientReferenceData {
                instrument: instrument.to_string(),
                available: 0,
                usable: 0,
            });
        }
        space.validate(&space.initial_values())?;

        let axes: Vec<Axis> = space
            .iter()
            .map(|(name, range)| {
                let (lower, upper) = range.step_bounds();
                Axis {
                    name: name.clone(),
                    range: *range,
                    lower,
                    upper,
                }
            })
            .collect();
        let origin = vec![0; axes.len()];

        let mut search = Self {
            instrument,
            space,
            references,
            objective,
            config,
            axes,
            best: origin,
            best_score: 0.0,
            baseline_score: 0.0,
            sweep_start_score: 0.0,
            sweeps: 0,
            cursor: 0,
            evaluations: 0,
            usable_recordings: 0,
            history: Vec::new(),
            status: SearchStatus::Running,
            cancel: CancellationToken::new(),
            progress: None,
        };

        let origin = search.best.clone();
        match search.score(&origin)? {
            Some((score, usable)) => {
                search.best_score = score;
                search.baseline_score = score;
                search.sweep_start_score = score;
                search.usable_recordings = usable;
            }
            None => {
                return Err(OptimizerError::InsufficientReferenceData {
                    instrument: instrument.to_string(),
                    available: search.references.len(),
                    usable: 0,
                });
            }
        }

        tracing::debug!(
            instrument = %instrument,
            baseline = search.baseline_score,
            usable = search.usable_recordings,
            "coordinate search initialised"
        );
        Ok(search)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, tx: broadcast::Sender<SearchProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn status(&self) -> SearchStatus {
        self.status
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    pub fn best_parameters(&self) -> ParameterSet {
        self.parameter_set(&self.best)
    }

    pub fn sweeps(&self) -> u32 {
        self.sweeps
    }

    pub fn history(&self) -> &[SweepRecord] {
        &self.history
    }

    /// Line-search the next coordinate
    ///
    /// Tries `+step` first and keeps walking while the aggregate strictly
    /// improves; only when the first `+step` fails is `-step` tried. Finishing
    /// the last coordinate closes the sweep and checks convergence.
    pub fn step(&mut self) -> Result<SearchStatus, OptimizerError> {
        if self.status.is_finished() {
            return Ok(self.status);
        }

        let parameter = match self.axes.get(self.cursor) {
            Some(axis) => axis.name.clone(),
            None => String::new(),
        };
        let sweep = self.sweeps + 1;

        if self.cursor < self.axes.len() {
            self.line_search(self.cursor)?;
            self.cursor += 1;
        }
        if self.cursor >= self.axes.len() {
            self.finish_sweep();
        }

        if let Some(tx) = &self.progress {
            // no subscribers is fine
            let _ = tx.send(SearchProgress {
                instrument: self.instrument,
                sweep,
                parameter,
                best_score: self.best_score,
                evaluations: self.evaluations,
                status: self.status,
            });
        }

        Ok(self.status)
    }

    /// Step until the search finishes or the token is cancelled
    ///
    /// Cancellation takes effect after the current coordinate step; the
    /// outcome then carries `SearchStatus::Cancelled` and the best vector
    /// found so far.
    pub fn run(mut self) -> Result<OptimizationOutcome, OptimizerError> {
        loop {
            if self.step()?.is_finished() {
                break;
            }
            if self.cancel.is_cancelled() {
                self.status = SearchStatus::Cancelled;
                tracing::warn!(
                    instrument = %self.instrument,
                    sweeps = self.sweeps,
                    best_score = self.best_score,
                    "coordinate search cancelled; keeping best vector so far"
                );
                break;
            }
        }

        tracing::info!(
            instrument = %self.instrument,
            best_score = self.best_score,
            baseline = self.baseline_score,
            sweeps = self.sweeps,
            evaluations = self.evaluations,
            status = ?self.status,
            "coordinate search finished"
        );
        Ok(self.into_outcome())
    }

    fn into_outcome(self) -> OptimizationOutcome {
        OptimizationOutcome {
            instrument: self.instrument,
            best: self.parameter_set(&self.best),
            best_score: self.best_score,
            baseline_score: self.baseline_score,
            status: self.status,
            sweeps: self.sweeps,
            evaluations: self.evaluations,
            available_recordings: self.references.len(),
            usable_recordings: self.usable_recordings,
            history: self.history,
        }
    }

    fn line_search(&mut self, index: usize) -> Result<(), OptimizerError> {
        for direction in [1i64, -1] {
            let mut moved = false;
            loop {
                let next = self.best[index] + direction;
                let axis = &self.axes[index];
                if next < axis.lower || next > axis.upper {
                    break;
                }

                let mut candidate = self.best.clone();
                candidate[index] = next;
                match self.score(&candidate)? {
                    Some((score, _)) if score > self.best_score => {
                        self.best = candidate;
                        self.best_score = score;
                        moved = true;
                    }
                    _ => break,
                }
            }
            if moved {
                break;
            }
        }
        Ok(())
    }

    fn finish_sweep(&mut self) {
        self.sweeps += 1;
        let improvement = self.best_score - self.sweep_start_score;
        self.history.push(SweepRecord {
            sweep: self.sweeps,
            best_score: self.best_score,
            improvement,
        });

        if improvement < self.config.min_improvement {
            self.status = SearchStatus::Converged;
        } else if self.sweeps >= self.config.max_sweeps.max(1) {
            self.status = SearchStatus::SweepLimit;
        } else {
            self.cursor = 0;
            self.sweep_start_score = self.best_score;
        }
    }

    /// Mean F-score over the recordings the objective could score
    ///
    /// `None` when every recording failed; such a vector never improves.
    fn score(&mut self, offsets: &[i64]) -> Result<Option<(f64, usize)>, OptimizerError> {
        let set = self.parameter_set(offsets);
        self.space.validate(set.values())?;
        self.evaluations += 1;

        let mut total = 0.0;
        let mut usable = 0usize;
        for reference in &self.references {
            match self.objective.evaluate(&set, reference) {
                Ok(result) => {
                    total += result.f_score;
                    usable += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        instrument = %self.instrument,
                        recording_id = %reference.recording_id,
                        code = err.code(),
                        reason = %err.message(),
                        "recording excluded from aggregate"
                    );
                }
            }
        }

        if usable == 0 {
            return Ok(None);
        }
        Ok(Some((total / usable as f64, usable)))
    }

    fn parameter_set(&self, offsets: &[i64]) -> ParameterSet {
        let values = self
            .axes
            .iter()
            .zip(offsets)
            .map(|(axis, &offset)| (axis.name.clone(), axis.range.value_at(offset)))
            .collect();
        ParameterSet::new(self.instrument, values)
    }
}

/// Run a complete search for one instrument
pub fn optimize<O: Objective>(
    instrument: Instrument,
    references: Vec<ReferenceSet>,
    space: &ParameterSpace,
    objective: O,
    config: &OptimizerConfig,
) -> Result<OptimizationOutcome, OptimizerError> {
    CoordinateSearch::new(instrument, references, space.clone(), objective, config.clone())?.run()
}

#[cfg(test)]
#[path = "search_tests.rs"]
mod tests;
