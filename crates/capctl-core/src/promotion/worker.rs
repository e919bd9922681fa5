//! Promotion worker: drives one execution through its gates and rollout.
//!
//! A worker run ends when the execution reaches a terminal state or pauses
//! on a manual gate. Paused executions are re-enqueued by the approval path.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::constitutional::ConstitutionalService;
use crate::domain::capability::{Capability, PromotionRecord};
use crate::domain::error::{CapctlError, Result};
use crate::domain::policy::{GateSpec, GateType};
use crate::domain::promotion::{
    ExecutionStatus, GateResult, GateStatus, PromotionExecution, RolloutProgress,
};
use crate::gates::{self, GateContext};
use crate::obs;
use crate::promotion::budget::BudgetLedger;
use crate::promotion::executions::ExecutionBook;
use crate::registry::CapabilityRegistry;
use crate::rollout::{RolloutError, RolloutOrchestrator, RolloutTarget};
use crate::scorecard::ScorecardEvaluator;

/// How a worker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    Finished(ExecutionStatus),
    /// Waiting on a manual gate.
    Paused,
    /// Already terminal when the worker picked it up.
    Skipped,
}

pub struct PromotionWorker {
    registry: Arc<CapabilityRegistry>,
    scorecards: Arc<ScorecardEvaluator>,
    budgets: Arc<BudgetLedger>,
    executions: Arc<ExecutionBook>,
    orchestrator: Arc<RolloutOrchestrator>,
    constitution: Option<Arc<ConstitutionalService>>,
}

enum GateStep {
    Passed(GateResult),
    Failed(GateResult, ExecutionStatus),
    Paused,
}

impl PromotionWorker {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        scorecards: Arc<ScorecardEvaluator>,
        budgets: Arc<BudgetLedger>,
        executions: Arc<ExecutionBook>,
        orchestrator: Arc<RolloutOrchestrator>,
    ) -> Self {
        Self {
            registry,
            scorecards,
            budgets,
            executions,
            orchestrator,
            constitution: None,
        }
    }

    pub fn with_constitution(mut self, service: Arc<ConstitutionalService>) -> Self {
        self.constitution = Some(service);
        self
    }

    /// Advance the execution as far as it can go. Its cancel signal lives
    /// only while this call runs.
    #[instrument(skip(self))]
    pub async fn drive(&self, execution_id: &str) -> Result<DriveOutcome> {
        let outcome = self.advance(execution_id).await;
        self.executions.drop_signal(execution_id).await;
        outcome
    }

    async fn advance(&self, execution_id: &str) -> Result<DriveOutcome> {
        let now = Utc::now();
        let started = self
            .executions
            .update(execution_id, |e| match e.status {
                s if s.is_terminal() => Ok(false),
                ExecutionStatus::Pending => {
                    e.transition(ExecutionStatus::Running, now, "worker started")?;
                    Ok(true)
                }
                ExecutionStatus::AwaitingApproval => {
                    e.transition(ExecutionStatus::Running, now, "resumed")?;
                    Ok(true)
                }
                _ => Ok(true),
            })
            .await?;
        let (true, exec) = started else {
            debug!("execution already terminal");
            return Ok(DriveOutcome::Skipped);
        };

        let cancel = self.executions.cancel_signal(execution_id).await;
        let capability = self
            .registry
            .get(&exec.request.capability_id, None)
            .await?;

        for index in exec.current_gate..exec.policy.gates.len() {
            let current = self.executions.get(execution_id).await?;
            let cancelled = *cancel.borrow();
            if cancelled || current.status.is_terminal() {
                return Ok(DriveOutcome::Finished(current.status));
            }
            let spec = &exec.policy.gates[index];
            match self.run_gate(&current, &capability, spec).await? {
                GateStep::Passed(result) => {
                    obs::emit_gate_evaluated(execution_id, &spec.name, result.status.as_str());
                    let stamp = Utc::now();
                    self.executions
                        .update(execution_id, |e| {
                            if e.status.is_terminal() {
                                return Ok(());
                            }
                            e.append_log(stamp, format!("gate {} {}", result.gate, result.status));
                            e.gate_results.push(result);
                            e.current_gate = index + 1;
                            e.gate_opened_at = None;
                            Ok(())
                        })
                        .await?;
                }
                GateStep::Failed(result, status) => {
                    obs::emit_gate_evaluated(execution_id, &spec.name, result.status.as_str());
                    let err = CapctlError::GateFailed {
                        gate: spec.name.clone(),
                        reason: result.reason.clone().unwrap_or_else(|| result.status.to_string()),
                    };
                    return self
                        .finish(execution_id, status, Some(err.to_string()), Some(result))
                        .await;
                }
                GateStep::Paused => return Ok(DriveOutcome::Paused),
            }
        }

        let current = self.executions.get(execution_id).await?;
        if *cancel.borrow() || current.status.is_terminal() {
            return Ok(DriveOutcome::Finished(current.status));
        }
        self.run_rollout(&exec, cancel).await
    }

    async fn run_gate(
        &self,
        exec: &PromotionExecution,
        capability: &Capability,
        spec: &GateSpec,
    ) -> Result<GateStep> {
        let now = Utc::now();
        if !spec.required {
            return Ok(GateStep::Passed(gates::skipped(spec, now)));
        }
        if spec.gate_type == GateType::Manual {
            let t = gates::tally(spec, exec.approvals_for(&spec.name), exec.gate_opened_at, now);
            return match t.status {
                GateStatus::Approved => Ok(GateStep::Passed(gates::manual_result(spec, &t, now))),
                GateStatus::Rejected => Ok(GateStep::Failed(
                    gates::manual_result(spec, &t, now),
                    ExecutionStatus::Rejected,
                )),
                GateStatus::Timeout => Ok(GateStep::Failed(
                    gates::manual_result(spec, &t, now),
                    ExecutionStatus::Failed,
                )),
                _ => {
                    self.executions
                        .update(&exec.id, |e| {
                            if e.gate_opened_at.is_none() {
                                e.gate_opened_at = Some(now);
                            }
                            e.transition(
                                ExecutionStatus::AwaitingApproval,
                                now,
                                format!(
                                    "gate {} waiting for {}/{} approvals",
                                    spec.name, t.approvals, spec.min_approvals
                                ),
                            )
                        })
                        .await?;
                    info!(gate = %spec.name, "execution paused for approval");
                    Ok(GateStep::Paused)
                }
            };
        }

        let card = self.scorecards.get_or_initialize(capability).await?;
        let verdict = match &self.constitution {
            Some(service) => service
                .cached(capability, now)
                .await
                .or_else(|| capability.constitutional.clone()),
            None => capability.constitutional.clone(),
        };
        let telemetry = if spec.gate_type == GateType::Conditional
            && spec.conditions.iter().any(|c| c.is_telemetry())
        {
            match self
                .orchestrator
                .telemetry()
                .sample(capability.id(), capability.version(), 0)
                .await
            {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(gate = %spec.name, error = %e, "telemetry unavailable for gate");
                    None
                }
            }
        } else {
            None
        };
        let ctx = GateContext {
            scorecard: &card,
            criteria: &exec.policy.criteria,
            constitutional: verdict.as_ref(),
            constitutional_policy: &exec.policy.constitutional,
            telemetry: telemetry.as_ref(),
        };
        let result = gates::evaluate_gate(spec, &ctx, now);
        Ok(match result.status {
            GateStatus::Approved => GateStep::Passed(result),
            _ => GateStep::Failed(result, ExecutionStatus::Failed),
        })
    }

    async fn run_rollout(
        &self,
        exec: &PromotionExecution,
        cancel: tokio::sync::watch::Receiver<bool>,
    ) -> Result<DriveOutcome> {
        let target = RolloutTarget {
            execution_id: exec.id.clone(),
            capability_id: exec.request.capability_id.clone(),
            version: exec.request.version.clone(),
        };
        let book = self.executions.clone();
        let id = exec.id.clone();
        let on_progress = move |progress: RolloutProgress| {
            let book = book.clone();
            let id = id.clone();
            async move {
                let now = Utc::now();
                let recorded = book
                    .update(&id, move |e| {
                        if e.status.is_terminal() {
                            return Ok(());
                        }
                        e.rollout = Some(progress);
                        e.updated_at = now;
                        Ok(())
                    })
                    .await;
                if let Err(e) = recorded {
                    warn!(execution_id = %id, error = %e, "rollout progress not recorded");
                }
            }
        };

        let report = self
            .orchestrator
            .run(&target, &exec.policy.rollout, cancel, on_progress)
            .await;
        match report.error {
            None => {
                self.finish(&exec.id, ExecutionStatus::Completed, None, None)
                    .await
            }
            Some(RolloutError::Cancelled { .. }) => {
                let current = self.executions.get(&exec.id).await?;
                Ok(DriveOutcome::Finished(current.status))
            }
            Some(e @ RolloutError::PhaseFailed { .. }) => {
                self.finish(
                    &exec.id,
                    ExecutionStatus::RolledBack,
                    Some(format!("rolled back: {e}")),
                    None,
                )
                .await
            }
            Some(e) => {
                self.finish(
                    &exec.id,
                    ExecutionStatus::Failed,
                    Some(format!("rollout aborted: {e}")),
                    None,
                )
                .await
            }
        }
    }

    /// Move the execution to a terminal `status` and settle its side effects.
    /// An execution that is already terminal is left alone.
    async fn finish(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
        gate: Option<GateResult>,
    ) -> Result<DriveOutcome> {
        let now = Utc::now();
        let (changed, exec) = self
            .executions
            .update(execution_id, |e| {
                if e.status.is_terminal() {
                    return Ok(false);
                }
                if let Some(g) = gate {
                    e.gate_results.push(g);
                }
                match error {
                    Some(err) => e.fail_with(status, now, err)?,
                    None => e.transition(status, now, "promotion completed")?,
                }
                Ok(true)
            })
            .await?;
        if !changed {
            self.executions.drop_signal(execution_id).await;
            return Ok(DriveOutcome::Finished(exec.status));
        }

        if let Some(allocation) = &exec.allocation_id {
            let settled = if status == ExecutionStatus::Completed {
                self.budgets.commit(allocation).await
            } else {
                self.budgets.release(allocation).await
            };
            if let Err(e) = settled {
                warn!(allocation_id = %allocation, error = %e, "budget settlement failed");
            }
        }

        let record = PromotionRecord {
            execution_id: exec.id.clone(),
            version: exec.request.version.clone(),
            target_stage: exec.request.target_stage,
            outcome: status,
            at: now,
        };
        if let Err(e) = self
            .registry
            .record_promotion(&exec.request.capability_id, record)
            .await
        {
            warn!(capability_id = %exec.request.capability_id, error = %e, "promotion history not recorded");
        }

        let elapsed = (now - exec.created_at).num_milliseconds().max(0) as u64;
        obs::emit_execution_finished(execution_id, status.as_str(), elapsed);
        self.executions.drop_signal(execution_id).await;
        Ok(DriveOutcome::Finished(status))
    }

    /// Fail an execution whose worker returned an error.
    pub async fn fail_with_error(&self, execution_id: &str, error: &CapctlError) {
        if let Err(e) = self
            .finish(execution_id, ExecutionStatus::Failed, Some(error.to_string()), None)
            .await
        {
            warn!(execution_id = %execution_id, error = %e, "could not mark execution failed");
        }
    }

    /// Fail an execution whose worker panicked.
    pub async fn fail_with_panic(&self, execution_id: &str, message: &str) {
        obs::emit_panic_recovered(execution_id, message);
        let err = CapctlError::PanicRecovered(message.to_string());
        self.fail_with_error(execution_id, &err).await;
    }
}
