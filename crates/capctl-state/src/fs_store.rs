use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{validate_key, CapabilityStore, StorageResult, StoredRecord};

/// Filesystem-backed store: one pretty-printed JSON document per key.
///
/// Layout: `<root>/records/<key segments...>.json`, so `capability/svc-a`
/// lands in `records/capability/svc-a.json`.
pub struct FsCapabilityStore {
    records_dir: PathBuf,
}

impl FsCapabilityStore {
    /// Create a new store rooted at `root`. Creates `root/records/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let records_dir = root.as_ref().join("records");
        fs::create_dir_all(&records_dir)?;
        Ok(Self { records_dir })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        let mut path = self.records_dir.clone();
        for seg in key.split('/') {
            path.push(seg);
        }
        let mut os = path.into_os_string();
        os.push(".json");
        PathBuf::from(os)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.records_dir).ok()?;
        let mut segs: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let last = segs.pop()?;
        segs.push(last.strip_suffix(".json")?.to_string());
        Some(segs.join("/"))
    }

    fn collect(&self, dir: &Path, out: &mut Vec<PathBuf>) -> StorageResult<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect(&path, out)?;
            } else if path.extension().is_some_and(|e| e == "json") {
                out.push(path);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CapabilityStore for FsCapabilityStore {
    async fn put(&self, key: &str, record: serde_json::Value) -> StorageResult<()> {
        validate_key(key)?;
        let path = self.record_path(key);
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey {
                key: key.to_string(),
            })?
            .to_path_buf();
        fs::create_dir_all(&parent)?;

        // Atomic write: temp file in the same directory, then rename.
        let bytes = serde_json::to_vec_pretty(&record)?;
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(key = %key, bytes = bytes.len(), "record written");
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<serde_json::Value> {
        validate_key(key)?;
        let path = self.record_path(key);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list_by_prefix(&self, prefix: &str) -> StorageResult<Vec<StoredRecord>> {
        let mut paths = Vec::new();
        self.collect(&self.records_dir, &mut paths)?;

        let mut out = Vec::new();
        for path in paths {
            let Some(key) = self.key_for(&path) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let bytes = fs::read(&path)?;
            out.push(StoredRecord {
                key,
                value: serde_json::from_slice(&bytes)?,
            });
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}
