//! Promotion requests and executions.
//!
//! Execution status only moves forward: every change goes through
//! [`PromotionExecution::transition`], which refuses to leave a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::{CapctlError, Result};
use crate::domain::policy::{GateType, PromotionPolicy, RolloutStrategy};

/// Deployment stage, ordered from earliest to latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Development,
    Testing,
    Staging,
    Production,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Self::Development,
        Self::Testing,
        Self::Staging,
        Self::Production,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = CapctlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| CapctlError::InvalidRequest(format!("unknown stage: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub capability_id: String,
    pub version: String,
    pub source_stage: Stage,
    pub target_stage: Stage,
    pub policy_id: String,
    pub requested_by: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Overrides the capability's own cost center.
    #[serde(default)]
    pub cost_center: Option<String>,
}

impl PromotionRequest {
    pub fn new(
        capability_id: impl Into<String>,
        version: impl Into<String>,
        policy_id: impl Into<String>,
    ) -> Self {
        Self {
            capability_id: capability_id.into(),
            version: version.into(),
            source_stage: Stage::Staging,
            target_stage: Stage::Production,
            policy_id: policy_id.into(),
            requested_by: "capctl".into(),
            reason: None,
            cost_center: None,
        }
    }

    pub fn with_stages(mut self, source: Stage, target: Stage) -> Self {
        self.source_stage = source;
        self.target_stage = target;
        self
    }

    pub fn with_cost_center(mut self, cost_center: impl Into<String>) -> Self {
        self.cost_center = Some(cost_center.into());
        self
    }

    pub fn requested_by(mut self, who: impl Into<String>) -> Self {
        self.requested_by = who.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let missing = [
            ("capability_id", self.capability_id.as_str()),
            ("version", self.version.as_str()),
            ("policy_id", self.policy_id.as_str()),
            ("requested_by", self.requested_by.as_str()),
        ]
        .into_iter()
        .find(|(_, v)| v.trim().is_empty());
        if let Some((field, _)) = missing {
            return Err(CapctlError::InvalidRequest(format!(
                "{field} must not be empty"
            )));
        }
        if self.target_stage <= self.source_stage {
            return Err(CapctlError::InvalidRequest(format!(
                "target stage {} must come after source stage {}",
                self.target_stage, self.source_stage
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
    Rejected,
    RolledBack,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 8] = [
        Self::Pending,
        Self::Running,
        Self::AwaitingApproval,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Rejected,
        Self::RolledBack,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Rejected | Self::RolledBack
        )
    }

    /// The single source of truth for allowed status changes.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running | Cancelled | Rejected | Failed) => true,
            (Running, AwaitingApproval) => true,
            (Running, Completed | Failed | Cancelled | Rejected | RolledBack) => true,
            (AwaitingApproval, Running | Cancelled | Failed | Rejected) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = CapctlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| CapctlError::InvalidRequest(format!("unknown execution status: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
    Skipped,
}

impl GateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: String,
    pub gate_type: GateType,
    pub status: GateStatus,
    pub reason: Option<String>,
    /// Per-condition detail lines.
    pub details: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

/// An approval event on a manual gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: String,
    pub gate: String,
    pub decision: ApprovalDecision,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl Approval {
    pub fn approve(approver: impl Into<String>, gate: impl Into<String>) -> Self {
        Self {
            approver: approver.into(),
            gate: gate.into(),
            decision: ApprovalDecision::Approve,
            conditions: Vec::new(),
            comment: None,
            decided_at: Utc::now(),
        }
    }

    pub fn reject(
        approver: impl Into<String>,
        gate: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            decision: ApprovalDecision::Reject,
            comment: Some(comment.into()),
            ..Self::approve(approver, gate)
        }
    }
}

/// Runtime health sample for a capability at a given traffic share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub success_rate: f64,
    pub error_rate: f64,
    pub latency_p95_ms: f64,
    pub throughput_rps: f64,
    pub constitutional_pass: bool,
}

impl TelemetrySample {
    pub fn healthy() -> Self {
        Self {
            success_rate: 0.999,
            error_rate: 0.001,
            latency_p95_ms: 120.0,
            throughput_rps: 250.0,
            constitutional_pass: true,
        }
    }

    pub fn degraded(error_rate: f64) -> Self {
        Self {
            success_rate: 1.0 - error_rate,
            error_rate,
            ..Self::healthy()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutState {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    RolledBack,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub index: usize,
    pub traffic_percent: u32,
    pub sample: Option<TelemetrySample>,
    pub passed: bool,
    pub issues: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutProgress {
    pub strategy: RolloutStrategy,
    pub state: RolloutState,
    pub planned_phases: Vec<u32>,
    pub current_phase: usize,
    /// Fraction of planned phases completed, in [0, 1].
    pub progress: f64,
    pub traffic_percent: u32,
    pub last_good_percent: u32,
    pub issues: Vec<String>,
    pub phases: Vec<PhaseRecord>,
}

impl RolloutProgress {
    pub fn new(strategy: RolloutStrategy, planned_phases: Vec<u32>) -> Self {
        Self {
            strategy,
            state: RolloutState::NotStarted,
            planned_phases,
            current_phase: 0,
            progress: 0.0,
            traffic_percent: 0,
            last_good_percent: 0,
            issues: Vec::new(),
            phases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// A promotion in flight (or finished).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionExecution {
    pub id: String,
    pub request: PromotionRequest,
    /// Policy snapshot taken at request time.
    pub policy: PromotionPolicy,
    pub cost_center: String,
    pub status: ExecutionStatus,
    pub current_gate: usize,
    pub gate_results: Vec<GateResult>,
    /// When the current manual gate started waiting.
    pub gate_opened_at: Option<DateTime<Utc>>,
    pub approvals: Vec<Approval>,
    pub rollout: Option<RolloutProgress>,
    pub risk_score: f64,
    pub allocation_id: Option<String>,
    pub error: Option<String>,
    pub log: Vec<ExecutionLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PromotionExecution {
    pub fn new(
        request: PromotionRequest,
        policy: PromotionPolicy,
        cost_center: String,
        risk_score: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut exec = Self {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            policy,
            cost_center,
            status: ExecutionStatus::Pending,
            current_gate: 0,
            gate_results: Vec::new(),
            gate_opened_at: None,
            approvals: Vec::new(),
            rollout: None,
            risk_score,
            allocation_id: None,
            error: None,
            log: Vec::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        exec.append_log(
            now,
            format!(
                "promotion of {}@{} requested by {} under policy {}",
                exec.request.capability_id,
                exec.request.version,
                exec.request.requested_by,
                exec.policy.id
            ),
        );
        exec
    }

    pub fn store_key(&self) -> String {
        execution_key(&self.id)
    }

    pub fn append_log(&mut self, at: DateTime<Utc>, message: impl Into<String>) {
        self.log.push(ExecutionLogEntry {
            at,
            message: message.into(),
        });
        self.updated_at = at;
    }

    /// Move to `next`, logging the change. Fails `InvalidState` when the
    /// transition is not allowed (including any move out of a terminal state).
    pub fn transition(
        &mut self,
        next: ExecutionStatus,
        now: DateTime<Utc>,
        note: impl Into<String>,
    ) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CapctlError::InvalidState(format!(
                "execution {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        let note = note.into();
        let from = self.status;
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        if note.is_empty() {
            self.append_log(now, format!("{from} -> {next}"));
        } else {
            self.append_log(now, format!("{from} -> {next}: {note}"));
        }
        Ok(())
    }

    /// Set the terminal error message and move to `next`.
    pub fn fail_with(
        &mut self,
        next: ExecutionStatus,
        now: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Result<()> {
        let error = error.into();
        self.transition(next, now, error.clone())?;
        self.error = Some(error);
        Ok(())
    }

    pub fn current_gate_spec(&self) -> Option<&crate::domain::policy::GateSpec> {
        self.policy.gates.get(self.current_gate)
    }

    /// Approvals recorded against `gate`.
    pub fn approvals_for<'a>(&'a self, gate: &'a str) -> impl Iterator<Item = &'a Approval> + 'a {
        self.approvals.iter().filter(move |a| a.gate == gate)
    }
}

pub fn execution_key(id: &str) -> String {
    format!("execution/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::PolicySet;

    fn exec() -> PromotionExecution {
        let policy = PolicySet::standard().get("low").unwrap().clone();
        PromotionExecution::new(
            PromotionRequest::new("svc-a", "1.0.0", "low"),
            policy,
            "default".into(),
            0.2,
            Utc::now(),
        )
    }

    #[test]
    fn test_request_validation() {
        assert!(PromotionRequest::new("svc-a", "1.0.0", "low").validate().is_ok());
        assert!(PromotionRequest::new("", "1.0.0", "low").validate().is_err());
        assert!(PromotionRequest::new("svc-a", "1.0.0", "")
            .validate()
            .is_err());
        let backwards = PromotionRequest::new("svc-a", "1.0.0", "low")
            .with_stages(Stage::Production, Stage::Staging);
        assert!(backwards.validate().is_err());
        let same = PromotionRequest::new("svc-a", "1.0.0", "low")
            .with_stages(Stage::Staging, Stage::Staging);
        assert!(same.validate().is_err());
    }

    #[test]
    fn test_terminal_states_are_sinks() {
        for terminal in ExecutionStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for next in ExecutionStatus::ALL {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} must be refused"
                );
            }
        }
    }

    #[test]
    fn test_transition_logs_and_stamps_finish() {
        let mut e = exec();
        let now = Utc::now();
        e.transition(ExecutionStatus::Running, now, "").unwrap();
        assert!(e.finished_at.is_none());
        e.fail_with(ExecutionStatus::Failed, now, "gate x failed").unwrap();
        assert_eq!(e.error.as_deref(), Some("gate x failed"));
        assert!(e.finished_at.is_some());
        assert!(e.log.last().unwrap().message.contains("running -> failed"));

        let err = e
            .transition(ExecutionStatus::Running, now, "")
            .unwrap_err();
        assert!(matches!(err, CapctlError::InvalidState(_)));
        assert_eq!(e.status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_approval_pause_cycle_allowed() {
        let mut e = exec();
        let now = Utc::now();
        e.transition(ExecutionStatus::Running, now, "").unwrap();
        e.transition(ExecutionStatus::AwaitingApproval, now, "").unwrap();
        e.transition(ExecutionStatus::Running, now, "").unwrap();
        e.transition(ExecutionStatus::Completed, now, "").unwrap();
    }
}
