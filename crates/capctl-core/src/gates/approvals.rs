//! Manual gate approvals: vote admission and tallying.

use chrono::{DateTime, Utc};

use crate::domain::error::{CapctlError, Result};
use crate::domain::policy::{GateSpec, GateType};
use crate::domain::promotion::{Approval, ApprovalDecision, GateStatus};

/// Check that `approval` may be recorded on `spec`.
///
/// # Errors
///
/// `InvalidState` if the gate is not manual or the names differ,
/// `InvalidRequest` if the approver is outside the allow-list,
/// `DuplicateApproval` if the approver already voted on this gate.
pub fn admit<'a>(
    execution_id: &str,
    spec: &GateSpec,
    approval: &Approval,
    existing: impl IntoIterator<Item = &'a Approval>,
) -> Result<()> {
    if spec.gate_type != GateType::Manual {
        return Err(CapctlError::InvalidState(format!(
            "gate {} is {} and does not take approvals",
            spec.name, spec.gate_type
        )));
    }
    if approval.gate != spec.name {
        return Err(CapctlError::InvalidState(format!(
            "execution {execution_id} is waiting on gate {}, not {}",
            spec.name, approval.gate
        )));
    }
    if approval.approver.trim().is_empty() {
        return Err(CapctlError::InvalidRequest("approver must not be empty".into()));
    }
    if !spec.approvers.is_empty() && !spec.approvers.contains(&approval.approver) {
        return Err(CapctlError::InvalidRequest(format!(
            "{} is not an allowed approver for gate {}",
            approval.approver, spec.name
        )));
    }
    if existing
        .into_iter()
        .any(|a| a.gate == approval.gate && a.approver == approval.approver)
    {
        return Err(CapctlError::DuplicateApproval {
            approver: approval.approver.clone(),
            execution_id: execution_id.to_string(),
        });
    }
    Ok(())
}

/// Where a manual gate stands.
#[derive(Debug, Clone, PartialEq)]
pub struct Tally {
    pub status: GateStatus,
    pub approvals: u32,
    pub reason: Option<String>,
}

/// When a gate opened at `opened` times out. `None` means never: the
/// deadline lies beyond what a timestamp can hold.
pub fn gate_deadline(opened: DateTime<Utc>, timeout_secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(timeout_secs).ok()?;
    opened.checked_add_signed(chrono::Duration::try_seconds(secs)?)
}

/// Resolve a manual gate from its votes.
///
/// Any rejection wins, then the approval count, then the timeout.
pub fn tally<'a>(
    spec: &GateSpec,
    votes: impl IntoIterator<Item = &'a Approval>,
    opened_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Tally {
    let votes: Vec<&Approval> = votes.into_iter().filter(|a| a.gate == spec.name).collect();

    if let Some(reject) = votes
        .iter()
        .find(|a| a.decision == ApprovalDecision::Reject)
    {
        let reason = match &reject.comment {
            Some(c) => format!("rejected by {}: {c}", reject.approver),
            None => format!("rejected by {}", reject.approver),
        };
        return Tally {
            status: GateStatus::Rejected,
            approvals: 0,
            reason: Some(reason),
        };
    }

    let mut approvers: Vec<&str> = votes.iter().map(|a| a.approver.as_str()).collect();
    approvers.sort_unstable();
    approvers.dedup();
    let count = approvers.len() as u32;
    if count >= spec.min_approvals.max(1) {
        return Tally {
            status: GateStatus::Approved,
            approvals: count,
            reason: None,
        };
    }

    let timed_out = opened_at
        .and_then(|opened| gate_deadline(opened, spec.timeout_secs))
        .is_some_and(|deadline| now >= deadline);
    if timed_out {
        return Tally {
            status: GateStatus::Timeout,
            approvals: count,
            reason: Some(format!(
                "timed out after {}s with {count}/{} approvals",
                spec.timeout_secs, spec.min_approvals
            )),
        };
    }

    Tally {
        status: GateStatus::Pending,
        approvals: count,
        reason: None,
    }
}
