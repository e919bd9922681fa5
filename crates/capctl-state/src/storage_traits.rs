//! Storage trait definitions for capctl
//!
//! The control plane persists every record (capabilities, scorecards,
//! policies, budgets, executions) through a single key/value contract:
//! - `put(key, record)` / `get(key)` / `delete(key)`
//! - `list_by_prefix(prefix)` for collection scans
//!
//! The contract is backend-agnostic. Implementations must give strong
//! read-after-write consistency within one process. In-memory fakes live in
//! the `fakes` module; `fs_store` and `surreal_store` are durable backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::Serialization(format!(
                "invalid content digest: {s}"
            )));
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A record returned by prefix scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub value: serde_json::Value,
}

/// Reject keys the durable backends cannot map safely.
///
/// Keys are `/`-separated segments; empty segments and `.` / `..` are refused.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..")
        || key.contains('\\')
        || key.contains('\0');
    if bad {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CapabilityStore
// ---------------------------------------------------------------------------

/// Key/value persistence contract for the control plane.
///
/// Guarantees:
/// - `get` after `put` on the same key returns the last written value.
/// - `delete` of an absent key is a no-op.
/// - `list_by_prefix` returns records sorted by key.
#[async_trait]
pub trait CapabilityStore: Send + Sync {
    /// Insert or replace the record stored under `key`.
    async fn put(&self, key: &str, record: serde_json::Value) -> StorageResult<()>;

    /// Fetch a record. Returns `StorageError::NotFound` if absent.
    async fn get(&self, key: &str) -> StorageResult<serde_json::Value>;

    /// Remove a record. No-op if absent.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// All records whose key starts with `prefix`, ordered by key.
    async fn list_by_prefix(&self, prefix: &str) -> StorageResult<Vec<StoredRecord>>;

    /// Whether a record exists under `key`.
    async fn contains(&self, key: &str) -> StorageResult<bool> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_lowercase_hex() {
        let d = ContentDigest::from_bytes(b"payload");
        assert_eq!(d.as_str().len(), 64);
        assert_eq!(d.short().len(), 12);
        assert!(d.as_str().chars().all(|c| !c.is_ascii_uppercase()));
    }

    #[test]
    fn digest_try_from_rejects_short() {
        assert!(ContentDigest::try_from("abc".to_string()).is_err());
    }

    #[test]
    fn digest_serde_validates() {
        let d = ContentDigest::from_bytes(b"x");
        let json = serde_json::to_string(&d).unwrap();
        let back: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
        assert!(serde_json::from_str::<ContentDigest>("\"zz\"").is_err());
    }

    #[test]
    fn validate_key_rules() {
        assert!(validate_key("capability/svc-a").is_ok());
        assert!(validate_key("scorecard/svc-a/1.0.0").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("capability//x").is_err());
        assert!(validate_key("capability/../etc").is_err());
        assert!(validate_key("a\\b").is_err());
    }
}
