//! capctl-state: persistence layer for the capability promotion control plane
//!
//! Every record the control plane owns goes through the [`CapabilityStore`]
//! key/value contract. The core never depends on a concrete backend.
//!
//! ## Backends
//!
//! - `MemoryCapabilityStore`: process-local, used by tests and ephemeral runs
//! - `FsCapabilityStore`: one JSON document per key under a root directory
//! - `SurrealCapabilityStore`: SurrealDB `records` table (in-memory or remote)

mod error;
pub mod fakes;
pub mod fs_store;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use fakes::{FailingCapabilityStore, MemoryCapabilityStore};
pub use fs_store::FsCapabilityStore;
pub use storage_traits::{
    validate_key, CapabilityStore, ContentDigest, StorageResult, StoredRecord,
};
pub use surreal_store::SurrealCapabilityStore;
