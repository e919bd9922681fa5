//! In-memory capability stores
//!
//! `MemoryCapabilityStore` satisfies the store contract without any external
//! dependencies and doubles as the default backend for short-lived control
//! planes. `FailingCapabilityStore` rejects every call and exists so callers
//! can prove that backend failures surface instead of being swallowed.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryCapabilityStore
// ---------------------------------------------------------------------------

/// In-memory store backed by a `BTreeMap<key, record>`.
#[derive(Debug, Default)]
pub struct MemoryCapabilityStore {
    records: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl MemoryCapabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> StorageResult<std::sync::MutexGuard<'_, BTreeMap<String, serde_json::Value>>> {
        self.records
            .lock()
            .map_err(|e| StorageError::Backend(format!("memory store poisoned: {e}")))
    }
}

#[async_trait]
impl CapabilityStore for MemoryCapabilityStore {
    async fn put(&self, key: &str, record: serde_json::Value) -> StorageResult<()> {
        validate_key(key)?;
        self.lock()?.insert(key.to_string(), record);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<serde_json::Value> {
        validate_key(key)?;
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.lock()?.remove(key);
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> StorageResult<Vec<StoredRecord>> {
        let records = self.lock()?;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| StoredRecord {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FailingCapabilityStore
// ---------------------------------------------------------------------------

/// A store whose every operation fails with `StorageError::Backend`.
#[derive(Debug, Clone)]
pub struct FailingCapabilityStore {
    reason: String,
}

impl FailingCapabilityStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn err(&self) -> StorageError {
        StorageError::Backend(self.reason.clone())
    }
}

#[async_trait]
impl CapabilityStore for FailingCapabilityStore {
    async fn put(&self, _key: &str, _record: serde_json::Value) -> StorageResult<()> {
        Err(self.err())
    }

    async fn get(&self, _key: &str) -> StorageResult<serde_json::Value> {
        Err(self.err())
    }

    async fn delete(&self, _key: &str) -> StorageResult<()> {
        Err(self.err())
    }

    async fn list_by_prefix(&self, _prefix: &str) -> StorageResult<Vec<StoredRecord>> {
        Err(self.err())
    }
}
