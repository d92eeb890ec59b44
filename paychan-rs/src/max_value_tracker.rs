use crate::{decimal::parse_amount, error::Error, store::Store};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A tracked `(value, data)` pair, e.g. a settlement claim and the amount it
/// secures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaxEntry {
    pub value: String,
    pub data: Value,
}

impl MaxEntry {
    /// What an empty tracker reads as.
    pub fn zero() -> Self {
        Self { value: "0".to_string(), data: Value::Null }
    }
}

/// Monotone best-so-far register. `value` never decreases over the
/// tracker's lifetime, whatever the interleaving of writers; this is the
/// primitive guarding the best incoming claim across concurrent
/// settlements.
#[derive(Clone)]
pub struct MaxValueTracker(Arc<MaxValueTrackerInner>);

impl std::ops::Deref for MaxValueTracker {
    type Target = MaxValueTrackerInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct MaxValueTrackerInner {
    key: Option<String>,
    store: Arc<dyn Store>,
    state: Mutex<Option<MaxEntry>>,
}

impl MaxValueTracker {
    pub fn ephemeral(store: Arc<dyn Store>) -> Self {
        Self(Arc::new(MaxValueTrackerInner { key: None, store, state: Mutex::new(None) }))
    }

    /// Open the tracker bound to `key`, restoring the persisted maximum.
    pub async fn open(store: Arc<dyn Store>, key: &str) -> Result<Self, Error> {
        let state = match store.get(key).await? {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(crate::StoreError::Codec)?),
            None => None,
        };
        Ok(Self(Arc::new(MaxValueTrackerInner {
            key: Some(key.to_string()),
            store,
            state: Mutex::new(state),
        })))
    }

    /// Install `entry` iff its value is strictly greater than the current
    /// maximum, returning the entry that was displaced; otherwise leave the
    /// state alone and hand `entry` straight back.
    pub async fn set_if_max(&self, entry: MaxEntry) -> Result<MaxEntry, Error> {
        let candidate = parse_amount(&entry.value)?;
        let (previous, serialized) = {
            let mut state = self.state.lock();
            let current = state.clone().unwrap_or_else(MaxEntry::zero);
            if candidate <= parse_amount(&current.value)? {
                return Ok(entry)
            }
            let serialized = serde_json::to_string(&entry).map_err(crate::StoreError::Codec)?;
            *state = Some(entry);
            (current, serialized)
        };
        self.persist(&candidate, &serialized).await?;
        Ok(previous)
    }

    // swap loop keeps the persisted value monotone even when concurrent
    // writers' store operations land out of commit order
    async fn persist(
        &self,
        candidate: &bigdecimal::BigDecimal,
        serialized: &str,
    ) -> Result<(), Error> {
        let Some(key) = &self.key else { return Ok(()) };
        loop {
            let current = self.store.get(key).await?;
            if let Some(raw) = &current {
                let existing: MaxEntry =
                    serde_json::from_str(raw).map_err(crate::StoreError::Codec)?;
                if candidate <= &parse_amount(&existing.value)? {
                    return Ok(())
                }
            }
            if self.store.compare_and_swap(key, current.as_deref(), serialized).await? {
                return Ok(())
            }
        }
    }

    pub fn get_max(&self) -> Option<MaxEntry> {
        self.state.lock().clone()
    }
}
