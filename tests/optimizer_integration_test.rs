//! Integration tests for detector parameter tuning
//!
//! These tests run the full optimizer path against synthetic detector dumps
//! on disk: reference discovery, per-instrument coordinate search, versioned
//! persistence and publication to the registry.

use std::sync::Arc;

use trio_timing::adapter::SyntheticConfig;
use trio_timing::analysis::Instrument;
use trio_timing::catalog::RecordingCatalog;
use trio_timing::config::AppConfig;
use trio_timing::optimizer::{
    optimize, BackendObjective, ParameterRegistry, ParameterStore, SearchStatus, Tuner,
    DEFAULT_PARAMETER_SPACE,
};
use trio_timing::PrecomputedBackend;

fn synthetic_catalog(dir: &std::path::Path) -> RecordingCatalog {
    SyntheticConfig {
        recordings: 2,
        beats: 16,
        ..SyntheticConfig::default()
    }
    .write_to_dir(dir)
    .expect("synthetic recordings written");
    RecordingCatalog::new(dir)
}

#[test]
fn test_single_instrument_search_never_loses_to_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = synthetic_catalog(dir.path());
    let references = catalog.reference_sets().unwrap();
    let config = AppConfig::default();

    let outcome = optimize(
        Instrument::Drums,
        references[&Instrument::Drums].clone(),
        &DEFAULT_PARAMETER_SPACE,
        BackendObjective::new(
            Arc::new(PrecomputedBackend::from_dir(dir.path())),
            config.evaluation.tolerance_seconds,
        ),
        &config.optimizer,
    )
    .expect("drums search finishes");

    assert!(outcome.status.is_finished());
    assert_eq!(outcome.usable_recordings, 2);
    assert!(outcome.best_score >= outcome.baseline_score);
    assert!(outcome.sweeps <= config.optimizer.max_sweeps);
    for (name, value) in outcome.best.values() {
        let range = DEFAULT_PARAMETER_SPACE.get(name).expect("known parameter");
        assert!(range.contains(*value), "{name}={value} out of range");
    }
    let scores: Vec<f64> = outcome.history.iter().map(|r| r.best_score).collect();
    assert!(scores.windows(2).all(|w| w[1] >= w[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn test_tuning_twice_bumps_stored_versions() {
    let input = tempfile::tempdir().unwrap();
    let params = tempfile::tempdir().unwrap();
    let catalog = synthetic_catalog(input.path());
    let backend = Arc::new(PrecomputedBackend::from_dir(input.path()));

    for (round, run_id) in ["first", "second"].iter().enumerate() {
        let registry = ParameterRegistry::new();
        let tuner = Tuner::new(backend.clone(), AppConfig::default())
            .with_run_id(*run_id)
            .with_store(ParameterStore::new(params.path()));
        let outcomes = tuner
            .optimize_all(catalog.reference_sets().unwrap(), &registry)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(registry.is_complete());
        for instrument in Instrument::ALL {
            let outcome = outcomes[&instrument].as_ref().expect("search succeeded");
            assert_ne!(outcome.status, SearchStatus::Running);
            let published = registry.get(instrument).unwrap();
            assert_eq!(published.version(), round as u32 + 1);
            assert_eq!(published.run_id(), *run_id);
        }
    }

    let stored = ParameterStore::new(params.path()).load_all().unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|set| set.version() == 2));
}
