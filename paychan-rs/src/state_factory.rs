use crate::{
    error::Error, max_value_tracker::MaxValueTracker, store::Store, transfer_log::TransferLog,
};
use std::sync::Arc;

/// Mints transfer logs and max-value trackers that all share one store, so
/// backend-owned state gets the same atomicity guarantees as the engine's
/// own ledger. Keys are base64url strings chosen by the caller; keeping
/// them disjoint is the caller's responsibility.
#[derive(Clone)]
pub struct StateFactory {
    store: Arc<dyn Store>,
}

impl StateFactory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn transfer_log(&self, key: &str) -> Result<TransferLog, Error> {
        TransferLog::open(self.store.clone(), key).await
    }

    pub async fn max_value_tracker(&self, key: &str) -> Result<MaxValueTracker, Error> {
        MaxValueTracker::open(self.store.clone(), key).await
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }
}
