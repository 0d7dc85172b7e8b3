//! Versioned persistence of converged parameter sets.
//!
//! One `<instrument>.params.json` file per instrument. Every save bumps the
//! version recorded in the previous file so downstream outputs can cite exactly
//! which tuning run produced them.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::parameters::ParameterSet;
use crate::adapter::InstrumentParameters;
use crate::analysis::Instrument;

pub struct ParameterStore {
    root: PathBuf,
}

impl ParameterStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, instrument: Instrument) -> PathBuf {
        self.root.join(format!("{instrument}.params.json"))
    }

    /// Load the persisted set for `instrument`, if one exists.
    pub fn load(&self, instrument: Instrument) -> Result<Option<ParameterSet>> {
        let path = self.path_for(instrument);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("reading parameters {}", path.display()))?;
        let set: ParameterSet =
            serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))?;
        if set.instrument() != instrument {
            return Err(anyhow!(
                "{} holds parameters for {}, expected {}",
                path.display(),
                set.instrument(),
                instrument
            ));
        }
        Ok(Some(set))
    }

    /// Every persisted set; instruments without a file are omitted.
    pub fn load_all(&self) -> Result<InstrumentParameters> {
        let mut params = InstrumentParameters::new();
        for instrument in Instrument::ALL {
            if let Some(set) = self.load(instrument)? {
                params = params.with(set);
            }
        }
        Ok(params)
    }

    /// Persist `set` under the next version number and return the stored copy.
    pub fn save(&self, set: &ParameterSet, run_id: &str) -> Result<ParameterSet> {
        let previous = self.load(set.instrument())?.map(|s| s.version()).unwrap_or(0);
        let stored = set.versioned(previous + 1, run_id);

        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating {}", self.root.display()))?;
        let path = self.path_for(set.instrument());
        let json = serde_json::to_string_pretty(&stored)?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;

        tracing::info!(
            instrument = %stored.instrument(),
            version = stored.version(),
            run_id,
            path = %path.display(),
            "parameters persisted"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::parameters::DEFAULT_PARAMETER_SPACE;

    #[test]
    fn test_save_increments_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParameterStore::new(dir.path().join("params"));
        let set = ParameterSet::initial(Instrument::Piano, &DEFAULT_PARAMETER_SPACE);

        assert!(store.load(Instrument::Piano).unwrap().is_none());

        let first = store.save(&set, "run-a").unwrap();
        assert_eq!(first.version(), 1);
        let second = store.save(&set, "run-b").unwrap();
        assert_eq!(second.version(), 2);

        let loaded = store.load(Instrument::Piano).unwrap().unwrap();
        assert_eq!(loaded, second);
        assert_eq!(loaded.run_id(), "run-b");
        assert_eq!(loaded.values(), set.values());
    }

    #[test]
    fn test_load_all_skips_missing_instruments() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParameterStore::new(dir.path());
        store
            .save(
                &ParameterSet::initial(Instrument::Drums, &DEFAULT_PARAMETER_SPACE),
                "run",
            )
            .unwrap();

        let params = store.load_all().unwrap();
        assert_eq!(params.len(), 1);
        assert!(params.get(Instrument::Drums).is_some());
        assert!(store.path_for(Instrument::Drums).ends_with("drums.params.json"));
    }

    #[test]
    fn test_mismatched_instrument_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParameterStore::new(dir.path());
        let bass = ParameterSet::initial(Instrument::Bass, &DEFAULT_PARAMETER_SPACE);
        fs::write(
            store.path_for(Instrument::Piano),
            serde_json::to_string(&bass).unwrap(),
        )
        .unwrap();
        assert!(store.load(Instrument::Piano).is_err());
    }
}
