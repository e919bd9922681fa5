//! Constitutional validator integration.
//!
//! The governance service is external; this module defines its contract,
//! an HTTP client for it, a static implementation for offline runs, and a
//! verdict cache keyed by capability content hash.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::domain::capability::Capability;
use crate::domain::constitution::{
    ConstitutionalVerdict, CourtScores, ValidationAction, ValidationRequest, Verdict,
};
use crate::domain::error::{CapctlError, Result};
use crate::obs;

/// A service that judges capabilities against the platform constitution.
#[async_trait]
pub trait ConstitutionalValidator: Send + Sync {
    async fn validate(&self, request: &ValidationRequest) -> Result<ConstitutionalVerdict>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Calls `POST {endpoint}/v1/validate` with a JSON [`ValidationRequest`].
pub struct HttpConstitutionalValidator {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpConstitutionalValidator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("capctl/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| CapctlError::Validator(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ConstitutionalValidator for HttpConstitutionalValidator {
    #[instrument(skip(self, request), fields(capability_id = %request.capability_id))]
    async fn validate(&self, request: &ValidationRequest) -> Result<ConstitutionalVerdict> {
        let url = format!("{}/v1/validate", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| CapctlError::Validator(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CapctlError::Validator(format!(
                "{url} returned HTTP {status}"
            )));
        }
        response
            .json::<ConstitutionalVerdict>()
            .await
            .map_err(|e| CapctlError::Validator(format!("invalid verdict from {url}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Static validator
// ---------------------------------------------------------------------------

/// Returns a configured verdict per capability, or a default verdict.
pub struct StaticConstitutionalValidator {
    default: ConstitutionalVerdict,
    overrides: Mutex<HashMap<String, ConstitutionalVerdict>>,
    calls: AtomicUsize,
    validity: chrono::Duration,
}

impl StaticConstitutionalValidator {
    pub fn new(verdict: Verdict, score: f64) -> Self {
        Self {
            default: static_verdict(verdict, score, Vec::new(), Utc::now()),
            overrides: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            validity: chrono::Duration::hours(24),
        }
    }

    pub fn approving() -> Self {
        Self::new(Verdict::Approved, 0.95)
    }

    pub fn rejecting(violations: &[&str]) -> Self {
        let mut v = Self::new(Verdict::Rejected, 0.2);
        v.default.violations = violations.iter().map(|s| s.to_string()).collect();
        v
    }

    /// How long returned verdicts stay valid.
    pub fn with_validity(mut self, validity: chrono::Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn set_verdict(&self, capability_id: &str, verdict: Verdict, score: f64, violations: &[&str]) {
        let v = static_verdict(
            verdict,
            score,
            violations.iter().map(|s| s.to_string()).collect(),
            Utc::now(),
        );
        if let Ok(mut map) = self.overrides.lock() {
            map.insert(capability_id.to_string(), v);
        }
    }

    /// Number of validation calls served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

fn static_verdict(
    verdict: Verdict,
    score: f64,
    violations: Vec<String>,
    now: DateTime<Utc>,
) -> ConstitutionalVerdict {
    ConstitutionalVerdict {
        courts: CourtScores {
            technical: score,
            ethical: score,
            operational: score,
        },
        overall_score: score,
        verdict,
        conditions: if verdict == Verdict::Conditional {
            vec!["manual review of rollout telemetry".into()]
        } else {
            Vec::new()
        },
        violations,
        audit_trail: vec!["static validator".into()],
        valid_until: now,
    }
}

#[async_trait]
impl ConstitutionalValidator for StaticConstitutionalValidator {
    async fn validate(&self, request: &ValidationRequest) -> Result<ConstitutionalVerdict> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut verdict = self
            .overrides
            .lock()
            .map_err(|e| CapctlError::Validator(format!("static validator poisoned: {e}")))?
            .get(&request.capability_id)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        let now = Utc::now();
        verdict.valid_until = now
            .checked_add_signed(self.validity)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        verdict
            .audit_trail
            .push(format!("{:?} {} at {}", request.action, request.capability_id, now.to_rfc3339()));
        Ok(verdict)
    }
}

// ---------------------------------------------------------------------------
// Service + cache
// ---------------------------------------------------------------------------

/// Fronts a validator with a verdict cache keyed by `id@content_hash`.
pub struct ConstitutionalService {
    validator: Arc<dyn ConstitutionalValidator>,
    cache: RwLock<HashMap<String, ConstitutionalVerdict>>,
}

fn cache_key(capability: &Capability) -> String {
    format!("{}@{}", capability.id(), capability.content_hash)
}

impl ConstitutionalService {
    pub fn new(validator: Arc<dyn ConstitutionalValidator>) -> Self {
        Self {
            validator,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Cached verdict for this exact capability revision, if still valid.
    pub async fn cached(&self, capability: &Capability, now: DateTime<Utc>) -> Option<ConstitutionalVerdict> {
        self.cache
            .read()
            .await
            .get(&cache_key(capability))
            .filter(|v| !v.is_expired_at(now))
            .cloned()
    }

    /// Validate `capability`, serving from cache unless `force_refresh` or
    /// the cached verdict has expired.
    #[instrument(skip(self, capability), fields(capability_id = %capability.id(), action = ?action))]
    pub async fn validate(
        &self,
        action: ValidationAction,
        capability: &Capability,
        force_refresh: bool,
    ) -> Result<ConstitutionalVerdict> {
        let now = Utc::now();
        if !force_refresh {
            if let Some(hit) = self.cached(capability, now).await {
                debug!("constitutional verdict served from cache");
                return Ok(hit);
            }
        }

        let request = ValidationRequest {
            action,
            capability_id: capability.id().to_string(),
            capability: serde_json::to_value(&capability.manifest)?,
            context: serde_json::json!({
                "content_hash": capability.content_hash,
                "status": capability.status,
            }),
        };
        let verdict = self.validator.validate(&request).await?;
        if verdict.verdict == Verdict::Rejected {
            obs::emit_constitutional_rejected(capability.id(), &format!("{action:?}"), &verdict.violations);
        } else if verdict.verdict == Verdict::Conditional {
            warn!(
                capability_id = %capability.id(),
                conditions = ?verdict.conditions,
                "constitutional approval is conditional"
            );
        }
        self.cache
            .write()
            .await
            .insert(cache_key(capability), verdict.clone());
        Ok(verdict)
    }

    /// Drop cached verdicts for every revision of `capability_id`.
    pub async fn invalidate(&self, capability_id: &str) {
        let prefix = format!("{capability_id}@");
        self.cache.write().await.retain(|k, _| !k.starts_with(&prefix));
    }

    /// Remove expired verdicts; returns how many were dropped.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, v| !v.is_expired_at(now));
        before - cache.len()
    }
}
