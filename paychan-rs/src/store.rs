use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::HashMap, path::Path, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o: {0}")]
    Backend(#[from] sled::Error),
    #[error("store codec: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Atomic named-record key/value storage. `compare_and_swap` is the
/// read-modify-write primitive the ledger builds its per-record atomicity
/// on; both variants must behave identically under single-process use.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Write `value` iff the current value equals `expected` (`None` meaning
    /// absent). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<dyn Store> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        if entries.get(key).map(|v| v.as_str()) != expected {
            return Ok(false)
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }
}

/// Durable store on an embedded `sled` database.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<dyn Store>, StoreError> {
        let db = sled::open(path)?;
        Ok(Arc::new(Self { db }))
    }

    /// Backed by a temporary directory, for tests.
    pub fn temporary() -> Result<Arc<dyn Store>, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Arc::new(Self { db }))
    }
}

#[async_trait]
impl Store for SledStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.db.get(key)?;
        Ok(value.map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.db.insert(key, value.as_bytes())?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError> {
        let result =
            self.db.compare_and_swap(key, expected.map(|v| v.as_bytes()), Some(value.as_bytes()))?;
        Ok(result.is_ok())
    }
}
