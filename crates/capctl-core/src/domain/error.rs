//! Error taxonomy for the capability control plane.

use capctl_state::StorageError;

use crate::domain::constitution::Verdict;
use crate::rollout::RolloutError;

/// Control plane errors.
#[derive(Debug, thiserror::Error)]
pub enum CapctlError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("capability {capability} conflicts with: {}", .ids.join(", "))]
    Conflict { capability: String, ids: Vec<String> },

    #[error("capability {id} has dependents: {}", .dependents.join(", "))]
    HasDependents { id: String, dependents: Vec<String> },

    #[error("cyclic dependency: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("version lookup unsupported: requested {id}@{requested}, latest is {latest}")]
    VersionLookupUnsupported {
        id: String,
        requested: String,
        latest: String,
    },

    #[error("promotion policy not found: {0}")]
    PolicyNotFound(String),

    #[error("criteria not met: {message}")]
    CriteriaNotMet {
        metric: String,
        actual: f64,
        threshold: f64,
        message: String,
    },

    #[error("budget exceeded for {cost_center}: remaining {remaining:.2} < required {required:.2}")]
    BudgetExceeded {
        cost_center: String,
        remaining: f64,
        required: f64,
    },

    #[error("constitutional validation rejected {capability}: verdict {verdict}{}", fmt_violations(.violations))]
    ConstitutionalRejected {
        capability: String,
        verdict: Verdict,
        violations: Vec<String>,
    },

    #[error("gate {gate} failed: {reason}")]
    GateFailed { gate: String, reason: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("duplicate approval from {approver} on execution {execution_id}")]
    DuplicateApproval {
        approver: String,
        execution_id: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("constitutional validator error: {0}")]
    Validator(String),

    #[error("worker panicked: {0}")]
    PanicRecovered(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("rollout error: {0}")]
    Rollout(#[from] RolloutError),
}

fn fmt_violations(violations: &[String]) -> String {
    if violations.is_empty() {
        String::new()
    } else {
        format!(" ({})", violations.join("; "))
    }
}

impl CapctlError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Conflict-class errors: the request clashes with current registry state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::HasDependents { .. } | Self::CyclicDependency { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::PolicyNotFound(_)
        ) || matches!(self, Self::Storage(StorageError::NotFound { .. }))
    }
}

/// Result type for control plane operations.
pub type Result<T> = std::result::Result<T, CapctlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_lists_ids() {
        let err = CapctlError::Conflict {
            capability: "svc-c".into(),
            ids: vec!["svc-d".into(), "svc-e".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("svc-c"));
        assert!(msg.contains("svc-d, svc-e"));
        assert!(err.is_conflict());
    }

    #[test]
    fn test_budget_exceeded_formats_amounts() {
        let err = CapctlError::BudgetExceeded {
            cost_center: "team-x".into(),
            remaining: 500.0,
            required: 1000.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("500.00"));
        assert!(msg.contains("1000.00"));
    }

    #[test]
    fn test_cycle_path_rendering() {
        let err = CapctlError::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");
    }

    #[test]
    fn test_constitutional_rejection_includes_violations() {
        let err = CapctlError::ConstitutionalRejected {
            capability: "svc-x".into(),
            verdict: Verdict::Rejected,
            violations: vec!["exfiltrates user data".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("REJECTED"));
        assert!(msg.contains("exfiltrates user data"));
    }

    #[test]
    fn test_storage_not_found_counts_as_not_found() {
        let err: CapctlError = StorageError::NotFound {
            key: "capability/x".into(),
        }
        .into();
        assert!(err.is_not_found());
    }
}
