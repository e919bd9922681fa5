//! Policy registry with file loading and hot reload.
//!
//! Policy documents are either TOML (a `[[policy]]` array) or JSON (an array
//! of policies, or an object with a `policy` array). A document that fails
//! validation never replaces the active set.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use capctl_state::CapabilityStore;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::error::{CapctlError, Result};
use crate::domain::policy::{PolicySet, PromotionPolicy};
use crate::obs;

const POLICY_PREFIX: &str = "policy/";

#[derive(Debug, Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    policy: Vec<PromotionPolicy>,
}

/// Parse a policy document. `json` selects the JSON reader, otherwise TOML.
pub fn parse_policies(text: &str, json: bool) -> Result<PolicySet> {
    let policies = if json {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| CapctlError::Config(format!("invalid policy JSON: {e}")))?;
        if value.is_array() {
            serde_json::from_value::<Vec<PromotionPolicy>>(value)
        } else {
            serde_json::from_value::<PolicyDocument>(value).map(|d| d.policy)
        }
        .map_err(|e| CapctlError::Config(format!("invalid policy JSON: {e}")))?
    } else {
        toml::from_str::<PolicyDocument>(text)
            .map_err(|e| CapctlError::Config(format!("invalid policy TOML: {e}")))?
            .policy
    };
    if policies.is_empty() {
        return Err(CapctlError::Config("policy document defines no policies".into()));
    }
    PolicySet::from_policies(policies)
}

/// Read and parse a policy file, choosing the format by extension.
pub fn load_policy_file(path: &Path) -> Result<PolicySet> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CapctlError::Config(format!("cannot read {}: {e}", path.display())))?;
    let json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    parse_policies(&text, json)
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

struct Active {
    set: PolicySet,
    modified: Option<SystemTime>,
}

pub struct PolicyRegistry {
    store: Arc<dyn CapabilityStore>,
    source: Option<PathBuf>,
    active: RwLock<Active>,
}

impl PolicyRegistry {
    pub fn new(store: Arc<dyn CapabilityStore>, set: PolicySet) -> Self {
        Self {
            store,
            source: None,
            active: RwLock::new(Active {
                set,
                modified: None,
            }),
        }
    }

    /// Registry seeded with the built-in `low`/`medium`/`high`/`critical` tiers.
    pub fn standard(store: Arc<dyn CapabilityStore>) -> Self {
        Self::new(store, PolicySet::standard())
    }

    /// Registry backed by a policy file that [`reload_if_changed`] watches.
    ///
    /// [`reload_if_changed`]: PolicyRegistry::reload_if_changed
    pub fn from_file(store: Arc<dyn CapabilityStore>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let set = load_policy_file(&path)?;
        info!(path = %path.display(), policies = set.len(), "policies loaded");
        Ok(Self {
            store,
            active: RwLock::new(Active {
                set,
                modified: modified(&path),
            }),
            source: Some(path),
        })
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Active policy `id`. Inactive and unknown policies are `PolicyNotFound`.
    pub async fn get(&self, id: &str) -> Result<PromotionPolicy> {
        self.active
            .read()
            .await
            .set
            .get(id)
            .filter(|p| p.active)
            .cloned()
            .ok_or_else(|| CapctlError::PolicyNotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<PromotionPolicy> {
        self.active.read().await.set.iter().cloned().collect()
    }

    /// Swap in a new set and mirror it to the store.
    pub async fn replace(&self, set: PolicySet) -> Result<()> {
        let previous: Vec<String> = {
            let mut active = self.active.write().await;
            let previous = active.set.iter().map(|p| p.id.clone()).collect();
            active.set = set;
            previous
        };
        self.persist(&previous).await
    }

    /// Reload the backing file if its mtime changed. Returns whether the set
    /// was replaced; an invalid document keeps the previous set and errors.
    pub async fn reload_if_changed(&self) -> Result<bool> {
        let Some(path) = &self.source else {
            return Ok(false);
        };
        let current = modified(path);
        {
            let mut active = self.active.write().await;
            if current == active.modified {
                return Ok(false);
            }
            active.modified = current;
        }
        match load_policy_file(path) {
            Ok(set) => {
                info!(path = %path.display(), policies = set.len(), "policies reloaded");
                self.replace(set).await?;
                Ok(true)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "policy reload rejected; keeping previous set");
                Err(e)
            }
        }
    }

    /// Write every active policy under `policy/<id>`, dropping ids in
    /// `previous` that are no longer present.
    async fn persist(&self, previous: &[String]) -> Result<()> {
        let policies = self.list().await;
        for policy in &policies {
            let key = policy.store_key();
            if let Err(e) = self.store.put(&key, serde_json::to_value(policy)?).await {
                obs::emit_store_error(&key, &e);
                return Err(e.into());
            }
        }
        for id in previous {
            if policies.iter().any(|p| &p.id == id) {
                continue;
            }
            let key = format!("{POLICY_PREFIX}{id}");
            if let Err(e) = self.store.delete(&key).await {
                obs::emit_store_error(&key, &e);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Mirror the active set to the store.
    pub async fn sync(&self) -> Result<()> {
        self.persist(&[]).await
    }

    /// Load policies persisted by an earlier run. File-backed registries
    /// keep the file as the source of truth and only re-sync the store.
    pub async fn hydrate(&self) -> Result<usize> {
        if self.source.is_some() {
            self.sync().await?;
            return Ok(self.active.read().await.set.len());
        }
        let records = self.store.list_by_prefix(POLICY_PREFIX).await?;
        if records.is_empty() {
            self.sync().await?;
            return Ok(self.active.read().await.set.len());
        }
        let mut policies = Vec::with_capacity(records.len());
        for r in records {
            policies.push(serde_json::from_value::<PromotionPolicy>(r.value)?);
        }
        let set = PolicySet::from_policies(policies)?;
        let n = set.len();
        self.active.write().await.set = set;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capctl_state::MemoryCapabilityStore;
    use std::io::Write;
    use crate::domain::policy::GateType;

    const TOML_DOC: &str = r#"
[[policy]]
id = "standard"
name = "Standard"
tier = "medium"

[policy.criteria]
min_overall = 0.75

[[policy.gates]]
name = "quality-checks"
type = "automatic"
conditions = [{ condition = "overall_threshold" }]
"#;

    #[test]
    fn test_parse_toml_and_json() {
        let set = parse_policies(TOML_DOC, false).unwrap();
        let p = set.get("standard").unwrap();
        assert_eq!(p.criteria.min_overall, 0.75);
        assert_eq!(p.gates.len(), 1);

        let json = serde_json::to_string(&set.clone().into_policies()).unwrap();
        assert_eq!(parse_policies(&json, true).unwrap(), set);
        assert!(parse_policies("[]", true).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_scores() {
        let bad = TOML_DOC.replace("min_overall = 0.75", "min_overall = 1.5");
        assert!(matches!(
            parse_policies(&bad, false).unwrap_err(),
            CapctlError::Config(_)
        ));
    }

    #[tokio::test]
    async fn test_inactive_policy_is_not_found() {
        let mut policies = PolicySet::standard().into_policies();
        for p in &mut policies {
            if p.id == "low" {
                p.active = false;
            }
        }
        let reg = PolicyRegistry::new(
            Arc::new(MemoryCapabilityStore::new()),
            PolicySet::from_policies(policies).unwrap(),
        );
        assert!(matches!(
            reg.get("low").await.unwrap_err(),
            CapctlError::PolicyNotFound(_)
        ));
        assert!(reg.get("medium").await.is_ok());
        assert!(reg.get("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.toml");
        std::fs::write(&path, TOML_DOC).unwrap();
        let store = Arc::new(MemoryCapabilityStore::new());
        let reg = PolicyRegistry::from_file(store.clone(), &path).unwrap();
        reg.hydrate().await.unwrap();
        assert!(store.contains("policy/standard").await.unwrap());
        assert!(!reg.reload_if_changed().await.unwrap());

        // Force a different mtime regardless of filesystem granularity.
        reg.active.write().await.modified = None;
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"[[policy]]\nid = \"broken\"\ntier = \"medium\"\n[policy.criteria]\nmin_safety = 7.0\n")
            .unwrap();
        drop(f);
        assert!(reg.reload_if_changed().await.is_err());
        assert!(reg.get("standard").await.is_ok());
        assert!(reg.get("broken").await.is_err());

        reg.active.write().await.modified = None;
        std::fs::write(&path, TOML_DOC.replace("\"standard\"", "\"renamed\"")).unwrap();
        assert!(reg.reload_if_changed().await.unwrap());
        assert!(reg.get("renamed").await.is_ok());
        assert!(!store.contains("policy/standard").await.unwrap());
    }

    #[test]
    fn test_shipped_policy_file_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/policies.toml");
        let set = load_policy_file(&path).unwrap();
        let ids: Vec<&str> = set.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["high", "low", "medium"]);
        let high = set.get("high").unwrap();
        assert!(high.gates.iter().any(|g| g.gate_type == GateType::Manual));
        assert!(high.budget.enforce);
    }
}
