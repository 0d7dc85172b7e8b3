// ParameterRegistry: publication point for converged parameter sets
//
// Single Responsibility: hand each instrument's parameter set from the
// optimizer to the batch orchestrator exactly once.
//
// One watch channel per instrument holds `None` until the set is published.
// Publication is write-once; consumers await every instrument before any
// recording is processed. A set published in place of a failed search
// carries the failure, so consumers can report it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use super::parameters::ParameterSet;
use crate::adapter::InstrumentParameters;
use crate::analysis::Instrument;
use crate::error::{log_optimizer_error, OptimizerError};

type Slot = watch::Sender<Option<Arc<ParameterSet>>>;

/// Write-once store of published parameter sets, shared via `Arc`
///
/// # Example
/// ```ignore
/// let registry = Arc::new(ParameterRegistry::new());
/// registry.publish(outcome.best)?;
/// // elsewhere
/// let params = registry.wait_all().await;
/// ```
pub struct ParameterRegistry {
    slots: BTreeMap<Instrument, Slot>,
    failures: Mutex<BTreeMap<Instrument, OptimizerError>>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        let slots = Instrument::ALL
            .iter()
            .map(|&instrument| (instrument, watch::channel(None).0))
            .collect();
        Self {
            slots,
            failures: Mutex::new(BTreeMap::new()),
        }
    }

    /// Publish the set for its instrument
    ///
    /// # Errors
    /// `AlreadyPublished` when the instrument already has a set; the first
    /// publication is kept.
    pub fn publish(&self, set: ParameterSet) -> Result<Arc<ParameterSet>, OptimizerError> {
        let instrument = set.instrument();
        let set = Arc::new(set);
        let published = match self.slots.get(&instrument) {
            Some(slot) => slot.send_if_modified(|current| {
                if current.is_some() {
                    return false;
                }
                *current = Some(Arc::clone(&set));
                true
            }),
            None => false,
        };

        if !published {
            let err = OptimizerError::AlreadyPublished {
                instrument: instrument.to_string(),
            };
            log_optimizer_error(&err, "publish_parameters");
            return Err(err);
        }

        tracing::info!(
            instrument = %instrument,
            version = set.version(),
            run_id = set.run_id(),
            "parameter set published"
        );
        Ok(set)
    }

    /// Publish `set` in place of a search that failed with `cause`
    ///
    /// The cause is recorded before the set becomes visible, so anyone
    /// released by [`wait_all`](Self::wait_all) also sees it in
    /// [`failures`](Self::failures). Nothing is recorded if the instrument
    /// already had a set.
    pub fn publish_fallback(
        &self,
        set: ParameterSet,
        cause: OptimizerError,
    ) -> Result<Arc<ParameterSet>, OptimizerError> {
        let instrument = set.instrument();
        if self.get(instrument).is_some() {
            return self.publish(set);
        }
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(instrument, cause);
        }
        let published = self.publish(set);
        if published.is_err() {
            if let Ok(mut failures) = self.failures.lock() {
                failures.remove(&instrument);
            }
        }
        published
    }

    /// Search failures behind fallback publications
    pub fn failures(&self) -> BTreeMap<Instrument, OptimizerError> {
        self.failures
            .lock()
            .map(|failures| failures.clone())
            .unwrap_or_default()
    }

    /// Published set for `instrument`, without waiting
    pub fn get(&self, instrument: Instrument) -> Option<Arc<ParameterSet>> {
        self.slots
            .get(&instrument)
            .and_then(|slot| slot.borrow().clone())
    }

    pub fn is_complete(&self) -> bool {
        Instrument::ALL.iter().all(|&i| self.get(i).is_some())
    }

    /// Wait until `instrument` has a published set
    pub async fn wait_for(&self, instrument: Instrument) -> Option<Arc<ParameterSet>> {
        let slot = self.slots.get(&instrument)?;
        let mut rx = slot.subscribe();
        let published = rx.wait_for(|value| value.is_some()).await.ok()?;
        published.clone()
    }

    /// Wait until every instrument has a published set
    pub async fn wait_all(&self) -> InstrumentParameters {
        let mut params = InstrumentParameters::new();
        for instrument in Instrument::ALL {
            if let Some(set) = self.wait_for(instrument).await {
                params = params.with(set.as_ref().clone());
            }
        }
        params
    }
}

impl Default for ParameterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
