//! Capability registry.
//!
//! Owns capability identity, content hashing, registration validation and
//! versioning. Composes the dependency graph and the compatibility matrix,
//! which are derived state rebuilt by [`CapabilityRegistry::hydrate`].
//!
//! Lock order: `capabilities` before `matrix`. The graph lock is never held
//! together with another lock. `writes` serializes mutating calls so the
//! checks a registration performs still hold when it commits.

pub mod compat;
pub mod graph;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use capctl_state::{CapabilityStore, ContentDigest};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use crate::constitutional::ConstitutionalService;
use crate::domain::capability::{
    capability_key, revision_key, Capability, CapabilityStatus, PromotionRecord,
    RegistrationRequest, RegistrationResult, RegistrationStatus,
};
use crate::domain::constitution::{ConstitutionalVerdict, ValidationAction, Verdict};
use crate::domain::error::{CapctlError, Result};
use crate::obs;

pub use compat::{evaluate_pair, CompatibilityEntry, CompatibilityMatrix};
pub use graph::DependencyGraph;

pub const DEFAULT_QUERY_LIMIT: usize = 50;
pub const MAX_QUERY_LIMIT: usize = 500;

const CAPABILITY_PREFIX: &str = "capability/";

/// Query filter. Every populated field must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityFilter {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub capability_type: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub status: Option<CapabilityStatus>,
    /// All tags must be present.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Only capabilities that declare this dependency.
    #[serde(default)]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl CapabilityFilter {
    fn matches(&self, cap: &Capability) -> bool {
        let m = &cap.manifest;
        self.id.as_deref().map_or(true, |id| m.id == id)
            && self
                .capability_type
                .as_deref()
                .map_or(true, |t| m.capability_type == t)
            && self.version.as_deref().map_or(true, |v| m.version == v)
            && self.status.map_or(true, |s| cap.status == s)
            && self.tags.iter().all(|t| m.tags.contains(t))
            && self
                .depends_on
                .as_deref()
                .map_or(true, |d| m.dependencies.iter().any(|x| x == d))
            && cap.metadata_matches(&self.metadata)
    }

    fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub items: Vec<Capability>,
    /// Matches before pagination.
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

pub struct CapabilityRegistry {
    store: Arc<dyn CapabilityStore>,
    constitution: Option<Arc<ConstitutionalService>>,
    capabilities: RwLock<HashMap<String, Capability>>,
    graph: RwLock<DependencyGraph>,
    matrix: RwLock<CompatibilityMatrix>,
    writes: Mutex<()>,
}

impl CapabilityRegistry {
    pub fn new(store: Arc<dyn CapabilityStore>) -> Self {
        Self {
            store,
            constitution: None,
            capabilities: RwLock::new(HashMap::new()),
            graph: RwLock::new(DependencyGraph::new()),
            matrix: RwLock::new(CompatibilityMatrix::new()),
            writes: Mutex::new(()),
        }
    }

    pub fn with_constitution(mut self, service: Arc<ConstitutionalService>) -> Self {
        self.constitution = Some(service);
        self
    }

    pub fn store(&self) -> &Arc<dyn CapabilityStore> {
        &self.store
    }

    /// Register a new capability or a new revision of an existing one.
    #[instrument(skip(self, request), fields(capability_id = %request.manifest.id))]
    pub async fn register(&self, request: RegistrationRequest) -> Result<RegistrationResult> {
        let _w = self.writes.lock().await;

        let RegistrationRequest {
            mut manifest,
            source,
            provenance,
            validation,
            metadata,
            force_update,
        } = request;
        manifest.metadata.extend(metadata);
        manifest.validate()?;
        let hash = manifest.content_hash()?;
        let now = Utc::now();
        let id = manifest.id.clone();

        let existing = self.capabilities.read().await.get(&id).cloned();
        if let Some(prev) = &existing {
            if prev.content_hash == hash {
                debug!("identical payload already registered");
                return Ok(RegistrationResult {
                    registration_id: registration_id(&id, &hash, &prev.updated_at.to_rfc3339()),
                    capability_id: id,
                    version: prev.manifest.version.clone(),
                    content_hash: hash,
                    status: RegistrationStatus::AlreadyRegistered,
                    warnings: Vec::new(),
                    registered_at: prev.updated_at,
                });
            }
            if prev.manifest.version == manifest.version && !force_update {
                return Err(CapctlError::InvalidRequest(format!(
                    "payload of {id}@{} changed; register it under a new version",
                    manifest.version
                )));
            }
        }

        let mut warnings = Vec::new();
        let conflicting = self.conflicting_ids(&manifest.id, &manifest.conflicts).await;
        if !conflicting.is_empty() {
            if !force_update {
                return Err(CapctlError::Conflict {
                    capability: id,
                    ids: conflicting,
                });
            }
            warnings.push(format!(
                "forced registration despite conflicts with: {}",
                conflicting.join(", ")
            ));
        }

        if let Some(path) = self
            .graph
            .read()
            .await
            .find_cycle(&id, &manifest.dependencies)
        {
            return Err(CapctlError::CyclicDependency { path });
        }

        {
            let caps = self.capabilities.read().await;
            for dep in &manifest.dependencies {
                if !caps.contains_key(dep) {
                    warnings.push(format!("dependency {dep} is not registered"));
                }
            }
        }

        let mut cap = Capability::from_manifest(manifest, hash.clone(), now);
        cap.source = source;
        cap.provenance = provenance;
        cap.validation = validation;
        if let Some(prev) = &existing {
            cap.created_at = prev.created_at;
            cap.promotion_history = prev.promotion_history.clone();
        }

        if let Some(service) = &self.constitution {
            let verdict = service
                .validate(ValidationAction::Register, &cap, false)
                .await?;
            match verdict.verdict {
                Verdict::Rejected => {
                    return Err(CapctlError::ConstitutionalRejected {
                        capability: id,
                        verdict: verdict.verdict,
                        violations: verdict.violations,
                    });
                }
                Verdict::Conditional => warnings.push(format!(
                    "constitutional approval is conditional: {}",
                    verdict.conditions.join("; ")
                )),
                Verdict::Approved => {}
            }
            cap.constitutional = Some(verdict);
        }

        if let Some(prev) = &existing {
            self.store
                .put(&revision_key(prev.id(), &prev.content_hash), serde_json::to_value(prev)?)
                .await?;
        }
        self.store
            .put(&cap.store_key(), serde_json::to_value(&cap)?)
            .await?;

        self.graph
            .write()
            .await
            .set_dependencies(&id, &cap.manifest.dependencies)?;
        {
            let mut caps = self.capabilities.write().await;
            caps.insert(id.clone(), cap.clone());
            self.matrix
                .write()
                .await
                .recompute_row(&cap, caps.values(), now);
        }

        let status = if existing.is_some() {
            RegistrationStatus::Updated
        } else {
            RegistrationStatus::Registered
        };
        obs::emit_capability_registered(
            &id,
            cap.version(),
            if existing.is_some() { "updated" } else { "registered" },
            warnings.len(),
        );
        for w in &warnings {
            warn!(capability_id = %id, warning = %w, "registration warning");
        }

        Ok(RegistrationResult {
            registration_id: registration_id(&id, &hash, &now.to_rfc3339()),
            capability_id: id,
            version: cap.manifest.version.clone(),
            content_hash: hash,
            status,
            warnings,
            registered_at: now,
        })
    }

    /// Registered ids that `id` conflicts with, in either direction.
    async fn conflicting_ids(&self, id: &str, declared: &[String]) -> Vec<String> {
        let caps = self.capabilities.read().await;
        let mut out: Vec<String> = caps
            .values()
            .filter(|c| c.id() != id)
            .filter(|c| {
                declared.iter().any(|d| d == c.id())
                    || c.manifest.conflicts.iter().any(|x| x == id)
            })
            .map(|c| c.id().to_string())
            .collect();
        out.sort();
        out
    }

    /// Latest record for `id`. Only the latest version is addressable.
    pub async fn get(&self, id: &str, version: Option<&str>) -> Result<Capability> {
        let caps = self.capabilities.read().await;
        let cap = caps
            .get(id)
            .ok_or_else(|| CapctlError::not_found("capability", id))?;
        if let Some(requested) = version {
            if requested != cap.version() {
                return Err(CapctlError::VersionLookupUnsupported {
                    id: id.to_string(),
                    requested: requested.to_string(),
                    latest: cap.version().to_string(),
                });
            }
        }
        Ok(cap.clone())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.capabilities.read().await.contains_key(id)
    }

    pub async fn query(&self, filter: &CapabilityFilter) -> QueryResult {
        let caps = self.capabilities.read().await;
        let mut matched: Vec<&Capability> = caps.values().filter(|c| filter.matches(c)).collect();
        matched.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id().cmp(b.id()))
        });
        let limit = filter.effective_limit();
        QueryResult {
            total: matched.len(),
            items: matched
                .into_iter()
                .skip(filter.offset)
                .take(limit)
                .cloned()
                .collect(),
            offset: filter.offset,
            limit,
        }
    }

    /// All capabilities ordered by id.
    pub async fn list(&self) -> Vec<Capability> {
        let mut all: Vec<Capability> = self.capabilities.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    pub async fn len(&self) -> usize {
        self.capabilities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.capabilities.read().await.is_empty()
    }

    /// Remove a capability. Archived revisions stay in the store.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<Capability> {
        let _w = self.writes.lock().await;
        if !self.contains(id).await {
            return Err(CapctlError::not_found("capability", id));
        }
        let dependents = self.graph.read().await.dependents_of(id);
        if !dependents.is_empty() {
            return Err(CapctlError::HasDependents {
                id: id.to_string(),
                dependents,
            });
        }

        self.store.delete(&capability_key(id)).await?;
        self.graph.write().await.remove(id);
        let removed = {
            let mut caps = self.capabilities.write().await;
            let removed = caps.remove(id);
            self.matrix.write().await.remove(id);
            removed
        };
        obs::emit_capability_deleted(id);
        removed.ok_or_else(|| CapctlError::not_found("capability", id))
    }

    pub async fn dependencies(&self, id: &str) -> Result<Vec<String>> {
        self.ensure_exists(id).await?;
        Ok(self.graph.read().await.dependencies_of(id))
    }

    pub async fn dependents(&self, id: &str) -> Result<Vec<String>> {
        self.ensure_exists(id).await?;
        Ok(self.graph.read().await.dependents_of(id))
    }

    pub async fn transitive_dependents(&self, id: &str) -> Result<Vec<String>> {
        self.ensure_exists(id).await?;
        Ok(self.graph.read().await.transitive_dependents_of(id))
    }

    /// Longest dependency chain below `id`.
    pub async fn depth(&self, id: &str) -> Result<usize> {
        self.ensure_exists(id).await?;
        self.graph.read().await.depth(id)
    }

    pub async fn check_compatibility(&self, a: &str, b: &str) -> Result<CompatibilityEntry> {
        let caps = self.capabilities.read().await;
        let ca = caps
            .get(a)
            .ok_or_else(|| CapctlError::not_found("capability", a))?;
        let cb = caps
            .get(b)
            .ok_or_else(|| CapctlError::not_found("capability", b))?;
        if let Some(entry) = self.matrix.read().await.get(a, b) {
            return Ok(entry.clone());
        }
        Ok(evaluate_pair(ca, cb, Utc::now()))
    }

    pub async fn graph_is_symmetric(&self) -> bool {
        self.graph.read().await.is_symmetric()
    }

    pub async fn set_status(&self, id: &str, status: CapabilityStatus) -> Result<Capability> {
        self.update(id, |cap| cap.status = status).await
    }

    /// Append a finished promotion to the capability's history.
    pub async fn record_promotion(&self, id: &str, record: PromotionRecord) -> Result<Capability> {
        self.update(id, move |cap| {
            if record.outcome == crate::domain::promotion::ExecutionStatus::Completed {
                cap.status = CapabilityStatus::Promoted;
            }
            cap.promotion_history.push(record);
        })
        .await
    }

    pub async fn set_constitutional(&self, id: &str, verdict: ConstitutionalVerdict) -> Result<Capability> {
        self.update(id, move |cap| cap.constitutional = Some(verdict))
            .await
    }

    async fn update<F>(&self, id: &str, f: F) -> Result<Capability>
    where
        F: FnOnce(&mut Capability),
    {
        let updated = {
            let mut caps = self.capabilities.write().await;
            let cap = caps
                .get_mut(id)
                .ok_or_else(|| CapctlError::not_found("capability", id))?;
            f(cap);
            cap.updated_at = Utc::now();
            cap.clone()
        };
        let key = updated.store_key();
        if let Err(e) = self.store.put(&key, serde_json::to_value(&updated)?).await {
            obs::emit_store_error(&key, &e);
            return Err(e.into());
        }
        Ok(updated)
    }

    async fn ensure_exists(&self, id: &str) -> Result<()> {
        if self.contains(id).await {
            Ok(())
        } else {
            Err(CapctlError::not_found("capability", id))
        }
    }

    /// Rebuild in-memory state (records, graph, matrix) from the store.
    pub async fn hydrate(&self) -> Result<usize> {
        let _w = self.writes.lock().await;
        let records = self.store.list_by_prefix(CAPABILITY_PREFIX).await?;
        let mut loaded = HashMap::new();
        for record in records {
            match serde_json::from_value::<Capability>(record.value) {
                Ok(cap) => {
                    loaded.insert(cap.id().to_string(), cap);
                }
                Err(e) => warn!(key = %record.key, error = %e, "skipping unreadable capability record"),
            }
        }

        let mut graph = DependencyGraph::new();
        let mut ids: Vec<&String> = loaded.keys().collect();
        ids.sort();
        for id in ids {
            if let Err(e) = graph.set_dependencies(id, &loaded[id].manifest.dependencies) {
                warn!(capability_id = %id, error = %e, "dropping dependency edges during hydrate");
            }
        }

        let now = Utc::now();
        let mut matrix = CompatibilityMatrix::new();
        for cap in loaded.values() {
            matrix.recompute_row(cap, loaded.values(), now);
        }

        let count = loaded.len();
        *self.graph.write().await = graph;
        let mut caps = self.capabilities.write().await;
        *caps = loaded;
        *self.matrix.write().await = matrix;
        Ok(count)
    }
}

fn registration_id(id: &str, hash: &str, at: &str) -> String {
    let digest = ContentDigest::from_bytes(format!("{id}:{hash}:{at}").as_bytes());
    format!("reg-{}", digest.short())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constitutional::StaticConstitutionalValidator;
    use crate::domain::capability::CapabilityManifest;
    use capctl_state::MemoryCapabilityStore;

    fn registry() -> (CapabilityRegistry, Arc<MemoryCapabilityStore>) {
        let store = Arc::new(MemoryCapabilityStore::new());
        (CapabilityRegistry::new(store.clone()), store)
    }

    fn req(m: CapabilityManifest) -> RegistrationRequest {
        RegistrationRequest::new(m)
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (reg, store) = registry();
        let m = CapabilityManifest::new("svc-a", "Service A", "1.0.0");
        let first = reg.register(req(m.clone())).await.unwrap();
        assert_eq!(first.status, RegistrationStatus::Registered);
        assert!(first.registration_id.starts_with("reg-"));
        let stored_before = store.get("capability/svc-a").await.unwrap();

        let again = reg.register(req(m)).await.unwrap();
        assert_eq!(again.status, RegistrationStatus::AlreadyRegistered);
        assert_eq!(again.content_hash, first.content_hash);
        assert_eq!(store.get("capability/svc-a").await.unwrap(), stored_before);
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn test_changed_payload_requires_version_bump() {
        let (reg, store) = registry();
        let v1 = CapabilityManifest::new("svc-a", "A", "1.0.0");
        let first = reg.register(req(v1.clone())).await.unwrap();

        let changed = v1.clone().with_tag("edge");
        let err = reg.register(req(changed.clone())).await.unwrap_err();
        assert!(matches!(err, CapctlError::InvalidRequest(_)));

        let mut bumped = changed;
        bumped.version = "1.1.0".into();
        let second = reg.register(req(bumped)).await.unwrap();
        assert_eq!(second.status, RegistrationStatus::Updated);
        assert_eq!(reg.get("svc-a", None).await.unwrap().version(), "1.1.0");
        assert!(store
            .contains(&revision_key("svc-a", &first.content_hash))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_conflict_blocks_unless_forced() {
        let (reg, _) = registry();
        reg.register(req(CapabilityManifest::new("svc-d", "D", "1.0.0")))
            .await
            .unwrap();
        let c = CapabilityManifest::new("svc-c", "C", "1.0.0").with_conflict("svc-d");
        match reg.register(req(c.clone())).await.unwrap_err() {
            CapctlError::Conflict { ids, .. } => assert_eq!(ids, vec!["svc-d".to_string()]),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(!reg.contains("svc-c").await);

        let forced = reg.register(req(c).forced()).await.unwrap();
        assert_eq!(forced.status, RegistrationStatus::Registered);
        assert!(!forced.warnings.is_empty());
        for (x, y) in [("svc-c", "svc-d"), ("svc-d", "svc-c")] {
            let e = reg.check_compatibility(x, y).await.unwrap();
            assert!(!e.compatible);
            assert_eq!(e.confidence, 1.0);
        }
    }

    #[tokio::test]
    async fn test_reverse_conflict_is_detected() {
        let (reg, _) = registry();
        reg.register(req(
            CapabilityManifest::new("svc-d", "D", "1.0.0").with_conflict("svc-c"),
        ))
        .await
        .unwrap();
        let err = reg
            .register(req(CapabilityManifest::new("svc-c", "C", "1.0.0")))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_cycle_rejected_even_when_forced() {
        let (reg, _) = registry();
        reg.register(req(CapabilityManifest::new("c", "C", "1.0.0")))
            .await
            .unwrap();
        reg.register(req(CapabilityManifest::new("b", "B", "1.0.0").with_dependency("c")))
            .await
            .unwrap();
        reg.register(req(CapabilityManifest::new("a", "A", "1.0.0").with_dependency("b")))
            .await
            .unwrap();

        let closing = CapabilityManifest::new("c", "C", "1.0.1").with_dependency("a");
        let err = reg.register(req(closing).forced()).await.unwrap_err();
        assert!(matches!(err, CapctlError::CyclicDependency { .. }));
        assert_eq!(reg.get("c", None).await.unwrap().version(), "1.0.0");
        assert_eq!(reg.depth("a").await.unwrap(), 2);
        assert!(reg.graph_is_symmetric().await);
    }

    #[tokio::test]
    async fn test_missing_dependency_is_a_warning() {
        let (reg, _) = registry();
        let res = reg
            .register(req(
                CapabilityManifest::new("svc-a", "A", "1.0.0").with_dependency("svc-missing"),
            ))
            .await
            .unwrap();
        assert_eq!(res.warnings.len(), 1);
        assert!(res.warnings[0].contains("svc-missing"));
    }

    #[tokio::test]
    async fn test_delete_refused_with_dependents() {
        let (reg, store) = registry();
        reg.register(req(CapabilityManifest::new("base", "Base", "1.0.0")))
            .await
            .unwrap();
        reg.register(req(
            CapabilityManifest::new("app", "App", "1.0.0").with_dependency("base"),
        ))
        .await
        .unwrap();

        let err = reg.delete("base").await.unwrap_err();
        assert!(matches!(err, CapctlError::HasDependents { .. }));
        assert!(err.is_conflict());

        reg.delete("app").await.unwrap();
        reg.delete("base").await.unwrap();
        assert!(reg.is_empty().await);
        assert!(!store.contains("capability/base").await.unwrap());
        assert!(reg.graph_is_symmetric().await);
        assert!(reg.get("base", None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_get_other_version_unsupported() {
        let (reg, _) = registry();
        reg.register(req(CapabilityManifest::new("svc-a", "A", "2.0.0")))
            .await
            .unwrap();
        assert!(reg.get("svc-a", Some("2.0.0")).await.is_ok());
        assert!(matches!(
            reg.get("svc-a", Some("1.0.0")).await.unwrap_err(),
            CapctlError::VersionLookupUnsupported { .. }
        ));
    }

    #[tokio::test]
    async fn test_query_filters_and_paginates() {
        let (reg, _) = registry();
        for i in 0..5 {
            let mut m = CapabilityManifest::new(format!("svc-{i}"), "S", "1.0.0").with_tag("edge");
            if i % 2 == 0 {
                m = m.with_tag("gpu");
            }
            reg.register(req(m)).await.unwrap();
        }

        let gpu = reg
            .query(&CapabilityFilter {
                tags: vec!["edge".into(), "gpu".into()],
                ..Default::default()
            })
            .await;
        assert_eq!(gpu.total, 3);

        let page = reg
            .query(&CapabilityFilter {
                offset: 2,
                limit: Some(2),
                ..Default::default()
            })
            .await;
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);

        let unbounded = reg
            .query(&CapabilityFilter {
                limit: Some(10_000),
                ..Default::default()
            })
            .await;
        assert_eq!(unbounded.limit, MAX_QUERY_LIMIT);
    }

    #[tokio::test]
    async fn test_constitutional_rejection_persists_nothing() {
        let store = Arc::new(MemoryCapabilityStore::new());
        let validator = Arc::new(StaticConstitutionalValidator::rejecting(&["pii export"]));
        let reg = CapabilityRegistry::new(store.clone())
            .with_constitution(Arc::new(ConstitutionalService::new(validator)));
        let err = reg
            .register(req(CapabilityManifest::new("svc-x", "X", "1.0.0")))
            .await
            .unwrap_err();
        assert!(matches!(err, CapctlError::ConstitutionalRejected { .. }));
        assert!(!store.contains("capability/svc-x").await.unwrap());
        assert!(!reg.contains("svc-x").await);
    }

    #[tokio::test]
    async fn test_hydrate_rebuilds_graph_and_matrix() {
        let (reg, store) = registry();
        reg.register(req(CapabilityManifest::new("base", "Base", "1.0.0")))
            .await
            .unwrap();
        reg.register(req(
            CapabilityManifest::new("app", "App", "1.0.0")
                .with_dependency("base")
                .with_conflict("legacy"),
        ))
        .await
        .unwrap();
        reg.register(req(CapabilityManifest::new("legacy", "L", "1.0.0")).forced())
            .await
            .unwrap();

        let fresh = CapabilityRegistry::new(store);
        assert_eq!(fresh.hydrate().await.unwrap(), 3);
        assert_eq!(fresh.dependents("base").await.unwrap(), vec!["app".to_string()]);
        assert!(!fresh.check_compatibility("legacy", "app").await.unwrap().compatible);
        assert!(fresh.graph_is_symmetric().await);
    }

    #[tokio::test]
    async fn test_set_status_persists() {
        let (reg, store) = registry();
        reg.register(req(CapabilityManifest::new("svc-a", "A", "1.0.0")))
            .await
            .unwrap();
        reg.set_status("svc-a", CapabilityStatus::Suspended)
            .await
            .unwrap();
        let raw = store.get("capability/svc-a").await.unwrap();
        assert_eq!(raw["status"], "suspended");
        assert!(reg.set_status("nope", CapabilityStatus::Tested).await.is_err());
    }
}
