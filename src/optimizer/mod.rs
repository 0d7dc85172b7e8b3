// Parameter optimizer - per-instrument tuning of detector knobs
//
// Architecture:
// - parameters: ParameterSet / ParameterSpace and the default search space
// - objective: scoring seam (closures or a re-run detector backend)
// - search: bounded coordinate search with explicit state
// - progress: per-step progress and sweep history
// - store: versioned parameter files
// - registry: write-once publication consumed by the batch orchestrator

pub mod objective;
pub mod parameters;
pub mod progress;
pub mod registry;
pub mod search;
pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::broadcast;

use crate::adapter::DetectorBackend;
use crate::analysis::Instrument;
use crate::catalog::ReferenceSet;
use crate::config::AppConfig;
use crate::error::{log_optimizer_error, OptimizerError};

pub use objective::{BackendObjective, Objective};
pub use parameters::{ParameterRange, ParameterSet, ParameterSpace, DEFAULT_PARAMETER_SPACE};
pub use progress::{SearchProgress, SearchStatus, SweepRecord};
pub use registry::ParameterRegistry;
pub use search::{optimize, CancellationToken, CoordinateSearch, OptimizationOutcome};
pub use store::ParameterStore;

/// Run identifier derived from the wall clock
pub fn new_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("run-{millis}")
}

/// Tunes all instruments in parallel against a detector backend
///
/// Each instrument's search runs on its own blocking task. Finished sets are
/// persisted (when a store is configured) and then published to the registry.
/// A failed search is returned to the caller and nothing is published for
/// that instrument, unless [`with_initial_fallback`](Self::with_initial_fallback)
/// was set: then the space's initial vector is published together with the
/// failure, see [`ParameterRegistry::publish_fallback`].
pub struct Tuner {
    backend: Arc<dyn DetectorBackend>,
    space: ParameterSpace,
    config: AppConfig,
    run_id: String,
    store: Option<Arc<ParameterStore>>,
    cancel: CancellationToken,
    progress: Option<broadcast::Sender<SearchProgress>>,
    initial_fallback: bool,
}

impl Tuner {
    pub fn new(backend: Arc<dyn DetectorBackend>, config: AppConfig) -> Self {
        Self {
            backend,
            space: DEFAULT_PARAMETER_SPACE.clone(),
            config,
            run_id: new_run_id(),
            store: None,
            cancel: CancellationToken::new(),
            progress: None,
            initial_fallback: false,
        }
    }

    pub fn with_space(mut self, space: ParameterSpace) -> Self {
        self.space = space;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_store(mut self, store: ParameterStore) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, tx: broadcast::Sender<SearchProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Publish the initial vector for instruments whose search fails
    pub fn with_initial_fallback(mut self) -> Self {
        self.initial_fallback = true;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Optimize every instrument and publish the results
    ///
    /// # Errors
    /// Only infrastructure failures (a panicked search task, an unwritable
    /// parameter store). Per-instrument search failures are returned in the map.
    pub async fn optimize_all(
        &self,
        mut references: BTreeMap<Instrument, Vec<ReferenceSet>>,
        registry: &ParameterRegistry,
    ) -> Result<BTreeMap<Instrument, Result<OptimizationOutcome, OptimizerError>>> {
        let handles: Vec<_> = Instrument::ALL
            .iter()
            .map(|&instrument| {
                let refs = references.remove(&instrument).unwrap_or_default();
                let objective = BackendObjective::new(
                    Arc::clone(&self.backend),
                    self.config.evaluation.tolerance_seconds,
                );
                let space = self.space.clone();
                let config = self.config.optimizer.clone();
                let cancel = self.cancel.clone();
                let progress = self.progress.clone();

                tokio::task::spawn_blocking(move || {
                    if cancel.is_cancelled() {
                        return Err(OptimizerError::Cancelled {
                            instrument: instrument.to_string(),
                        });
                    }
                    let mut search =
                        CoordinateSearch::new(instrument, refs, space, objective, config)?
                            .with_cancellation(cancel);
                    if let Some(tx) = progress {
                        search = search.with_progress(tx);
                    }
                    search.run()
                })
            })
            .collect();

        let mut outcomes = BTreeMap::new();
        for (instrument, joined) in Instrument::ALL.iter().zip(join_all(handles).await) {
            let result =
                joined.with_context(|| format!("optimizer task for {instrument} panicked"))?;
            self.publish(*instrument, &result, registry)?;
            outcomes.insert(*instrument, result);
        }
        Ok(outcomes)
    }

    fn publish(
        &self,
        instrument: Instrument,
        result: &Result<OptimizationOutcome, OptimizerError>,
        registry: &ParameterRegistry,
    ) -> Result<()> {
        let published = match result {
            Ok(outcome) => {
                let set = match &self.store {
                    Some(store) => store.save(&outcome.best, &self.run_id)?,
                    None => outcome.best.versioned(0, self.run_id.clone()),
                };
                registry.publish(set)
            }
            Err(err) => {
                log_optimizer_error(err, &format!("optimize_all/{instrument}"));
                if !self.initial_fallback {
                    return Ok(());
                }
                tracing::warn!(
                    instrument = %instrument,
                    "publishing initial parameters in place of failed search"
                );
                let set = ParameterSet::initial(instrument, &self.space).versioned(0, "initial");
                registry.publish_fallback(set, err.clone())
            }
        };

        // a set published ahead of time (e.g. loaded from disk) wins
        if let Err(err) = published {
            tracing::warn!(instrument = %instrument, error = %err, "keeping earlier parameter set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{PrecomputedBackend, SyntheticConfig, SyntheticRecording};

    fn synthetic_references(
        recordings: &[SyntheticRecording],
    ) -> BTreeMap<Instrument, Vec<ReferenceSet>> {
        Instrument::ALL
            .iter()
            .map(|&instrument| {
                let sets = recordings
                    .iter()
                    .map(|r| ReferenceSet {
                        recording_id: r.dump.recording_id.clone(),
                        instrument,
                        events: r.reference.events(instrument).unwrap(),
                    })
                    .collect();
                (instrument, sets)
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_optimize_all_publishes_every_instrument() {
        let recordings = SyntheticConfig {
            recordings: 2,
            beats: 16,
            ..SyntheticConfig::default()
        }
        .generate();
        let backend = Arc::new(PrecomputedBackend::from_dumps(
            recordings.iter().map(|r| r.dump.clone()),
        ));
        let mut references = synthetic_references(&recordings);
        references.insert(Instrument::Bass, Vec::new());

        let dir = tempfile::tempdir().unwrap();
        let registry = ParameterRegistry::new();
        let tuner = Tuner::new(backend, AppConfig::default())
            .with_run_id("test-run")
            .with_store(ParameterStore::new(dir.path()))
            .with_initial_fallback();

        let outcomes = tuner.optimize_all(references, &registry).await.unwrap();

        assert!(registry.is_complete());
        let piano = outcomes[&Instrument::Piano].as_ref().unwrap();
        assert!(piano.best_score >= piano.baseline_score);
        assert_eq!(registry.get(Instrument::Piano).unwrap().version(), 1);
        assert_eq!(registry.get(Instrument::Piano).unwrap().run_id(), "test-run");

        // bass had no references: error reported, initial vector published
        // with the failure attached
        assert!(matches!(
            outcomes[&Instrument::Bass],
            Err(OptimizerError::InsufficientReferenceData { .. })
        ));
        let bass = registry.get(Instrument::Bass).unwrap();
        assert_eq!(bass.run_id(), "initial");
        assert_eq!(bass.values(), &DEFAULT_PARAMETER_SPACE.initial_values());
        assert!(!ParameterStore::new(dir.path())
            .path_for(Instrument::Bass)
            .exists());
        assert_eq!(
            registry.failures().keys().collect::<Vec<_>>(),
            vec![&Instrument::Bass]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_search_is_not_replaced_by_default() {
        let recordings = SyntheticConfig {
            recordings: 1,
            beats: 8,
            ..SyntheticConfig::default()
        }
        .generate();
        let backend = Arc::new(PrecomputedBackend::from_dumps(
            recordings.iter().map(|r| r.dump.clone()),
        ));
        let mut references = synthetic_references(&recordings);
        references.remove(&Instrument::Drums);

        let registry = ParameterRegistry::new();
        let outcomes = Tuner::new(backend, AppConfig::default())
            .optimize_all(references, &registry)
            .await
            .unwrap();

        assert!(outcomes[&Instrument::Drums].is_err());
        assert!(registry.get(Instrument::Drums).is_none());
        assert!(registry.get(Instrument::Piano).is_some());
        assert!(!registry.is_complete());
        assert!(registry.failures().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reports_error() {
        let recordings = SyntheticConfig {
            recordings: 1,
            beats: 8,
            ..SyntheticConfig::default()
        }
        .generate();
        let backend = Arc::new(PrecomputedBackend::from_dumps(
            recordings.iter().map(|r| r.dump.clone()),
        ));
        let token = CancellationToken::new();
        token.cancel();

        let registry = ParameterRegistry::new();
        let outcomes = Tuner::new(backend, AppConfig::default())
            .with_cancellation(token)
            .optimize_all(synthetic_references(&recordings), &registry)
            .await
            .unwrap();

        assert!(outcomes
            .values()
            .all(|r| matches!(r, Err(OptimizerError::Cancelled { .. }))));
        assert!(registry.get(Instrument::Piano).is_none());
    }

    #[test]
    fn test_run_id_format() {
        assert!(new_run_id().starts_with("run-"));
    }
}
