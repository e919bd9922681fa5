//! Error types for capctl-state

use thiserror::Error;

/// Errors raised by capability store backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record is stored under the key.
    #[error("record not found: {key}")]
    NotFound { key: String },

    /// Keys must be non-empty and free of path traversal segments.
    #[error("invalid store key: {key}")]
    InvalidKey { key: String },

    /// Backend connection error
    #[error("store connection failed: {0}")]
    Connection(String),

    /// Backend query / IO failure
    #[error("store backend error: {0}")]
    Backend(String),

    /// Schema setup error
    #[error("schema setup failed: {0}")]
    SchemaSetup(String),

    /// Record could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
