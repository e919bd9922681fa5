//! SurrealDB-backed capability store
//!
//! Records live in one `records` table keyed by a unique `key` field. The
//! record body is kept as a JSON string so arbitrary documents round-trip
//! without depending on SurrealDB's value mapping.
//!
//! Supports in-memory (`mem://`) and remote (`ws://`, `wss://`) endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::storage_traits::{validate_key, CapabilityStore, StorageResult, StoredRecord};

const NAMESPACE: &str = "capctl";
const DATABASE: &str = "main";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbRecord {
    key: String,
    payload: String,
}

impl DbRecord {
    fn into_stored(self) -> StorageResult<StoredRecord> {
        Ok(StoredRecord {
            value: serde_json::from_str(&self.payload)?,
            key: self.key,
        })
    }
}

/// SurrealDB implementation of [`CapabilityStore`].
#[derive(Clone)]
pub struct SurrealCapabilityStore {
    db: Surreal<Any>,
}

impl SurrealCapabilityStore {
    /// Connect to an in-memory SurrealDB instance and set up the schema.
    #[instrument(skip_all)]
    pub async fn setup_db() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to `endpoint` (any engine URL SurrealDB understands).
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &str) -> StorageResult<Self> {
        info!("Connecting to SurrealDB");

        let db = surrealdb::engine::any::connect(endpoint)
            .await
            .map_err(|e| {
                StorageError::Connection(format!("failed to connect to {endpoint}: {e}"))
            })?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { db };
        store.init_schema().await?;
        info!("SurrealDB connected and schema initialized");
        Ok(store)
    }

    async fn init_schema(&self) -> StorageResult<()> {
        debug!("Initializing capctl schema");

        let schema = r#"
            DEFINE TABLE records SCHEMAFULL;
            DEFINE FIELD key ON records TYPE string;
            DEFINE FIELD payload ON records TYPE string;
            DEFINE FIELD updated_at ON records TYPE datetime;
            DEFINE INDEX idx_record_key ON records FIELDS key UNIQUE;
        "#;

        self.db
            .query(schema)
            .await
            .map_err(|e| StorageError::SchemaSetup(e.to_string()))?
            .check()
            .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl CapabilityStore for SurrealCapabilityStore {
    #[instrument(skip(self, record), fields(key = %key))]
    async fn put(&self, key: &str, record: serde_json::Value) -> StorageResult<()> {
        validate_key(key)?;
        let payload = serde_json::to_string(&record)?;

        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                DELETE records WHERE key = $key;
                CREATE records CONTENT { key: $key, payload: $payload, updated_at: time::now() };
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("key", key.to_string()))
            .bind(("payload", payload))
            .await?
            .check()?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<serde_json::Value> {
        validate_key(key)?;
        let mut result = self
            .db
            .query("SELECT key, payload FROM records WHERE key = $key")
            .bind(("key", key.to_string()))
            .await?;

        let rows: Vec<DbRecord> = result.take(0)?;
        match rows.into_iter().next() {
            Some(row) => Ok(row.into_stored()?.value),
            None => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.db
            .query("DELETE records WHERE key = $key")
            .bind(("key", key.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> StorageResult<Vec<StoredRecord>> {
        let mut result = self
            .db
            .query(
                "SELECT key, payload FROM records WHERE string::starts_with(key, $prefix) ORDER BY key",
            )
            .bind(("prefix", prefix.to_string()))
            .await?;

        let rows: Vec<DbRecord> = result.take(0)?;
        rows.into_iter().map(DbRecord::into_stored).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn surreal_roundtrip_and_prefix() {
        let store = SurrealCapabilityStore::setup_db().await.unwrap();
        store
            .put("capability/svc-a", serde_json::json!({"v": 1}))
            .await
            .unwrap();
        store
            .put("capability/svc-a", serde_json::json!({"v": 2}))
            .await
            .unwrap();
        store
            .put("policy/low", serde_json::json!({"tier": "low"}))
            .await
            .unwrap();

        assert_eq!(
            store.get("capability/svc-a").await.unwrap(),
            serde_json::json!({"v": 2})
        );
        let caps = store.list_by_prefix("capability/").await.unwrap();
        assert_eq!(caps.len(), 1);

        store.delete("capability/svc-a").await.unwrap();
        assert!(matches!(
            store.get("capability/svc-a").await,
            Err(StorageError::NotFound { .. })
        ));
    }
}
