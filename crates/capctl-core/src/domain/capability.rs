//! Capability records and registration payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::constitution::ConstitutionalVerdict;
use crate::domain::digest::content_hash;
use crate::domain::error::{CapctlError, Result};
use crate::domain::promotion::{ExecutionStatus, Stage};
use crate::domain::semver::Semver;

/// Risk tier of a capability or promotion policy.
///
/// Higher tiers demand stricter policies.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskTier {
    type Err = CapctlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CapctlError::InvalidRequest(format!("unknown risk tier: {s}")))
    }
}

/// Lifecycle status of a registered capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    #[default]
    Registered,
    Tested,
    Promoted,
    Suspended,
    Deprecated,
}

impl CapabilityStatus {
    pub const ALL: [CapabilityStatus; 5] = [
        Self::Registered,
        Self::Tested,
        Self::Promoted,
        Self::Suspended,
        Self::Deprecated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Tested => "tested",
            Self::Promoted => "promoted",
            Self::Suspended => "suspended",
            Self::Deprecated => "deprecated",
        }
    }

    /// Whether new promotions may start from this status.
    pub fn is_promotable(self) -> bool {
        !matches!(self, Self::Suspended | Self::Deprecated)
    }
}

impl std::fmt::Display for CapabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CapabilityStatus {
    type Err = CapctlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| CapctlError::InvalidRequest(format!("unknown capability status: {s}")))
    }
}

/// The content-addressed part of a capability: everything its hash covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub capability_type: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub specification: serde_json::Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub cost_center: Option<String>,
    #[serde(default)]
    pub risk_tier: RiskTier,
}

impl CapabilityManifest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capability_type: "service".to_string(),
            version: version.into(),
            description: String::new(),
            specification: serde_json::Value::Null,
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            cost_center: None,
            risk_tier: RiskTier::Low,
        }
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn with_conflict(mut self, id: impl Into<String>) -> Self {
        self.conflicts.push(id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_risk_tier(mut self, tier: RiskTier) -> Self {
        self.risk_tier = tier;
        self
    }

    pub fn with_cost_center(mut self, cost_center: impl Into<String>) -> Self {
        self.cost_center = Some(cost_center.into());
        self
    }

    pub fn with_specification(mut self, spec: serde_json::Value) -> Self {
        self.specification = spec;
        self
    }

    /// Check required fields and relationship sanity.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(CapctlError::InvalidRequest(
                "capability id must not be empty".into(),
            ));
        }
        if self.id.contains('/') || self.id.contains('\\') || self.id == "." || self.id == ".." {
            return Err(CapctlError::InvalidRequest(format!(
                "capability id contains reserved characters: {}",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(CapctlError::InvalidRequest(
                "capability name must not be empty".into(),
            ));
        }
        if !Semver::is_valid(&self.version) {
            return Err(CapctlError::InvalidRequest(format!(
                "version {:?} is not valid semver (MAJOR.MINOR.PATCH)",
                self.version
            )));
        }
        if self.dependencies.iter().any(|d| d == &self.id) {
            return Err(CapctlError::InvalidRequest(format!(
                "capability {} cannot depend on itself",
                self.id
            )));
        }
        if self.conflicts.iter().any(|c| c == &self.id) {
            return Err(CapctlError::InvalidRequest(format!(
                "capability {} cannot conflict with itself",
                self.id
            )));
        }
        if let Some(both) = self
            .dependencies
            .iter()
            .find(|d| self.conflicts.contains(d))
        {
            return Err(CapctlError::InvalidRequest(format!(
                "{both} is declared as both a dependency and a conflict"
            )));
        }
        Ok(())
    }

    /// SHA-256 of the canonical JSON of the full manifest.
    pub fn content_hash(&self) -> Result<String> {
        content_hash(&serde_json::to_value(self)?)
    }
}

/// One finished promotion in a capability's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub execution_id: String,
    pub version: String,
    pub target_stage: Stage,
    pub outcome: ExecutionStatus,
    pub at: DateTime<Utc>,
}

/// A registered capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(flatten)]
    pub manifest: CapabilityManifest,
    pub content_hash: String,
    pub status: CapabilityStatus,
    #[serde(default)]
    pub constitutional: Option<ConstitutionalVerdict>,
    #[serde(default)]
    pub scorecard_ref: Option<String>,
    #[serde(default)]
    pub promotion_history: Vec<PromotionRecord>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub provenance: Option<serde_json::Value>,
    /// Validation evidence supplied at registration.
    #[serde(default)]
    pub validation: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn capability_key(id: &str) -> String {
    format!("capability/{id}")
}

pub fn revision_key(id: &str, content_hash: &str) -> String {
    format!("capability-revision/{id}/{content_hash}")
}

impl Capability {
    /// Build a fresh record for `manifest` with the given hash.
    pub fn from_manifest(manifest: CapabilityManifest, content_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            scorecard_ref: Some(crate::domain::scorecard::scorecard_key(
                &manifest.id,
                &manifest.version,
            )),
            manifest,
            content_hash,
            status: CapabilityStatus::Registered,
            constitutional: None,
            promotion_history: Vec::new(),
            source: None,
            provenance: None,
            validation: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn store_key(&self) -> String {
        capability_key(&self.manifest.id)
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// Whether every `(key, value)` pair is present in the metadata.
    pub fn metadata_matches(&self, wanted: &BTreeMap<String, String>) -> bool {
        wanted
            .iter()
            .all(|(k, v)| self.manifest.metadata.get(k) == Some(v))
    }
}

/// Input to capability registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub manifest: CapabilityManifest,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub provenance: Option<serde_json::Value>,
    #[serde(default)]
    pub validation: Option<serde_json::Value>,
    /// Extra metadata merged into the manifest metadata before hashing.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub force_update: bool,
}

impl RegistrationRequest {
    pub fn new(manifest: CapabilityManifest) -> Self {
        Self {
            manifest,
            source: None,
            provenance: None,
            validation: None,
            metadata: BTreeMap::new(),
            force_update: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force_update = true;
        self
    }
}

/// How a registration call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Registered,
    Updated,
    AlreadyRegistered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub registration_id: String,
    pub capability_id: String,
    pub version: String,
    pub content_hash: String,
    pub status: RegistrationStatus,
    pub warnings: Vec<String>,
    pub registered_at: DateTime<Utc>,
}
