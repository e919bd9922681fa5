//! Structured observability hooks for capability and promotion lifecycle
//! events.
//!
//! This module provides:
//! - Execution-scoped tracing spans via the `ExecutionSpan` RAII guard
//! - Emission functions for registry, promotion, gate and rollout events
//!
//! Events are emitted at `info!` level (filter with `CAPCTL_LOG`).
//! For JSON output, set `CAPCTL_LOG_FORMAT=json`.

use tracing::{info, warn};

use crate::metrics::METRICS;

/// RAII guard that enters an execution-scoped span.
///
/// ```ignore
/// let _span = ExecutionSpan::enter("exec-1", "svc-a");
/// // tracing calls below carry execution_id and capability_id
/// ```
pub struct ExecutionSpan {
    _span: tracing::span::EnteredSpan,
}

impl ExecutionSpan {
    pub fn enter(execution_id: &str, capability_id: &str) -> Self {
        let span = tracing::info_span!(
            "capctl.execution",
            execution_id = %execution_id,
            capability_id = %capability_id
        );
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_capability_registered(id: &str, version: &str, status: &str, warnings: usize) {
    METRICS.inc_registrations();
    info!(
        event = "capability.registered",
        capability_id = %id,
        version = %version,
        status = %status,
        warnings = warnings,
    );
}

pub fn emit_capability_deleted(id: &str) {
    info!(event = "capability.deleted", capability_id = %id);
}

/// Constitutional rejection (warning level).
pub fn emit_constitutional_rejected(id: &str, action: &str, violations: &[String]) {
    METRICS.inc_constitutional_rejections();
    warn!(
        event = "constitutional.rejected",
        capability_id = %id,
        action = %action,
        violations = ?violations,
    );
}

pub fn emit_promotion_requested(execution_id: &str, capability_id: &str, policy_id: &str, risk: f64) {
    METRICS.inc_promotions_requested();
    info!(
        event = "promotion.requested",
        execution_id = %execution_id,
        capability_id = %capability_id,
        policy_id = %policy_id,
        risk_score = risk,
    );
}

/// High risk score; informational, never blocks.
pub fn emit_risk_alert(capability_id: &str, risk: f64, threshold: f64) {
    warn!(
        event = "promotion.risk_alert",
        capability_id = %capability_id,
        risk_score = risk,
        threshold = threshold,
    );
}

pub fn emit_gate_evaluated(execution_id: &str, gate: &str, status: &str) {
    METRICS.inc_gate_evaluations();
    info!(
        event = "gate.evaluated",
        execution_id = %execution_id,
        gate = %gate,
        status = %status,
    );
}

pub fn emit_rollout_phase(execution_id: &str, phase: usize, traffic_percent: u32, passed: bool) {
    info!(
        event = "rollout.phase",
        execution_id = %execution_id,
        phase = phase,
        traffic_percent = traffic_percent,
        passed = passed,
    );
}

pub fn emit_rollback(execution_id: &str, to_percent: u32, reason: &str) {
    METRICS.inc_rollbacks();
    warn!(
        event = "rollout.rollback",
        execution_id = %execution_id,
        to_percent = to_percent,
        reason = %reason,
    );
}

pub fn emit_execution_finished(execution_id: &str, status: &str, duration_ms: u64) {
    match status {
        "completed" => METRICS.inc_promotions_completed(),
        "failed" | "rejected" | "rolled_back" => METRICS.inc_promotions_failed(),
        _ => {}
    }
    info!(
        event = "execution.finished",
        execution_id = %execution_id,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_panic_recovered(execution_id: &str, message: &str) {
    METRICS.inc_panics_recovered();
    warn!(
        event = "worker.panic_recovered",
        execution_id = %execution_id,
        message = %message,
    );
}

/// Store write failed after the in-memory state changed (warning level).
pub fn emit_store_error(key: &str, error: &dyn std::fmt::Display) {
    warn!(event = "store.error", key = %key, error = %error);
}
