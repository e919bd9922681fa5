//! Promotion intake: the synchronous checks that decide whether a promotion
//! may start, plus the operator operations on executions already in flight.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::constitutional::ConstitutionalService;
use crate::domain::capability::CapabilityStatus;
use crate::domain::constitution::{ValidationAction, Verdict};
use crate::domain::error::{CapctlError, Result};
use crate::domain::promotion::{
    Approval, ApprovalDecision, ExecutionStatus, GateStatus, PromotionExecution, PromotionRequest,
};
use crate::gates;
use crate::obs;
use crate::promotion::budget::BudgetLedger;
use crate::promotion::criteria;
use crate::promotion::executions::{ExecutionBook, ExecutionFilter};
use crate::promotion::policies::PolicyRegistry;
use crate::registry::CapabilityRegistry;
use crate::scheduler::PromotionQueue;
use crate::scorecard::ScorecardEvaluator;

/// Cost center used when neither the request nor the capability names one.
pub const DEFAULT_COST_CENTER: &str = "default";

pub struct PromotionEngine {
    registry: Arc<CapabilityRegistry>,
    scorecards: Arc<ScorecardEvaluator>,
    policies: Arc<PolicyRegistry>,
    budgets: Arc<BudgetLedger>,
    executions: Arc<ExecutionBook>,
    queue: Arc<PromotionQueue>,
    constitution: Option<Arc<ConstitutionalService>>,
}

impl PromotionEngine {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        scorecards: Arc<ScorecardEvaluator>,
        policies: Arc<PolicyRegistry>,
        budgets: Arc<BudgetLedger>,
        executions: Arc<ExecutionBook>,
        queue: Arc<PromotionQueue>,
    ) -> Self {
        Self {
            registry,
            scorecards,
            policies,
            budgets,
            executions,
            queue,
            constitution: None,
        }
    }

    pub fn with_constitution(mut self, service: Arc<ConstitutionalService>) -> Self {
        self.constitution = Some(service);
        self
    }

    /// Run every intake check and, if they all pass, create and enqueue a
    /// pending execution. Gates and rollout run later on a worker.
    #[instrument(skip(self, request), fields(capability_id = %request.capability_id, policy_id = %request.policy_id))]
    pub async fn request_promotion(&self, request: PromotionRequest) -> Result<PromotionExecution> {
        request.validate()?;
        let capability = self
            .registry
            .get(&request.capability_id, Some(&request.version))
            .await?;
        if !capability.status.is_promotable() {
            return Err(CapctlError::InvalidState(format!(
                "capability {} is {} and cannot be promoted",
                capability.id(),
                capability.status
            )));
        }
        if let Some(active) = self.executions.active_for(capability.id()).await {
            return Err(CapctlError::InvalidState(format!(
                "capability {} already has promotion {active} in flight",
                capability.id()
            )));
        }

        let policy = self.policies.get(&request.policy_id).await?;
        if policy.tier < capability.manifest.risk_tier {
            return Err(CapctlError::InvalidRequest(format!(
                "policy {} covers {} risk but {} is {}",
                policy.id,
                policy.tier.as_str(),
                capability.id(),
                capability.manifest.risk_tier.as_str()
            )));
        }

        let card = self.scorecards.get_or_initialize(&capability).await?;
        criteria::evaluate(&policy.criteria, &card)?;

        let cost_center = request
            .cost_center
            .clone()
            .or_else(|| capability.manifest.cost_center.clone())
            .unwrap_or_else(|| DEFAULT_COST_CENTER.to_string());
        if policy.budget.enforce {
            self.budgets
                .check(&cost_center, policy.budget.monthly_cap)
                .await?;
        }

        let model = self.scorecards.model();
        let risk = model.risk_score(&card.scores, capability.manifest.risk_tier);
        if risk >= model.risk_alert_threshold {
            obs::emit_risk_alert(capability.id(), risk, model.risk_alert_threshold);
        }

        if policy.constitutional.required {
            let service = self.constitution.as_ref().ok_or_else(|| {
                CapctlError::Validator(format!(
                    "policy {} requires constitutional review but no validator is configured",
                    policy.id
                ))
            })?;
            let verdict = service
                .validate(ValidationAction::Promote, &capability, false)
                .await?;
            self.registry
                .set_constitutional(capability.id(), verdict.clone())
                .await?;
            let rules = &policy.constitutional;
            if !verdict.passes(rules.accept_conditional, rules.min_score) {
                let mut violations = verdict.violations.clone();
                if verdict.verdict != Verdict::Rejected && verdict.overall_score < rules.min_score {
                    violations.push(format!(
                        "constitutional score {:.2} below minimum {:.2}",
                        verdict.overall_score, rules.min_score
                    ));
                }
                if verdict.verdict == Verdict::Conditional && !rules.accept_conditional {
                    violations.push(format!("policy {} does not accept conditional verdicts", policy.id));
                }
                self.registry
                    .set_status(capability.id(), CapabilityStatus::Suspended)
                    .await?;
                warn!(
                    capability_id = %capability.id(),
                    verdict = %verdict.verdict,
                    "constitutional review blocked promotion; capability suspended"
                );
                return Err(CapctlError::ConstitutionalRejected {
                    capability: capability.id().to_string(),
                    verdict: verdict.verdict,
                    violations,
                });
            }
        }

        let now = Utc::now();
        let mut exec = PromotionExecution::new(request, policy, cost_center, risk, now);
        let estimated = exec.policy.budget.estimated_cost;
        if exec.policy.budget.enforce && estimated > 0.0 {
            let allocation = self
                .budgets
                .reserve(&exec.cost_center, capability.id(), Some(&exec.id), estimated)
                .await?;
            exec.append_log(
                now,
                format!("reserved {estimated:.2} from {}", exec.cost_center),
            );
            exec.allocation_id = Some(allocation.id);
        }

        if let Err(e) = self.executions.insert_if_idle(exec.clone()).await {
            if let Some(a) = &exec.allocation_id {
                if let Err(release) = self.budgets.release(a).await {
                    warn!(allocation_id = %a, error = %release, "budget release failed");
                }
            }
            return Err(e);
        }
        self.queue.push(&exec.id).await;
        obs::emit_promotion_requested(&exec.id, capability.id(), &exec.policy.id, risk);
        Ok(exec)
    }

    pub async fn get_execution(&self, id: &str) -> Result<PromotionExecution> {
        self.executions.get(id).await
    }

    pub async fn list_executions(&self, filter: &ExecutionFilter) -> Vec<PromotionExecution> {
        self.executions.list(filter).await
    }

    /// Cancel a pending, running or paused execution.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &str, reason: &str) -> Result<PromotionExecution> {
        let now = Utc::now();
        let ((), exec) = self
            .executions
            .update(id, |e| {
                if e.status.is_terminal() {
                    return Err(CapctlError::InvalidState(format!(
                        "execution {id} is already {}",
                        e.status
                    )));
                }
                e.fail_with(ExecutionStatus::Cancelled, now, format!("cancelled: {reason}"))
            })
            .await?;
        self.executions.signal_cancel(id).await;
        self.queue.remove(id).await;
        if let Some(a) = &exec.allocation_id {
            if let Err(e) = self.budgets.release(a).await {
                warn!(allocation_id = %a, error = %e, "budget release failed");
            }
        }
        let elapsed = (now - exec.created_at).num_milliseconds().max(0) as u64;
        obs::emit_execution_finished(id, exec.status.as_str(), elapsed);
        Ok(exec)
    }

    /// Record an approval event on the execution's current manual gate.
    /// Once the gate resolves either way the execution is re-enqueued.
    #[instrument(skip(self, approval), fields(approver = %approval.approver, gate = %approval.gate))]
    pub async fn approve(&self, id: &str, approval: Approval) -> Result<PromotionExecution> {
        let now = Utc::now();
        let (resolved, exec) = self
            .executions
            .update(id, |e| {
                if e.status != ExecutionStatus::AwaitingApproval {
                    return Err(CapctlError::InvalidState(format!(
                        "execution {id} is {} and not awaiting approval",
                        e.status
                    )));
                }
                let spec = e.current_gate_spec().cloned().ok_or_else(|| {
                    CapctlError::InvalidState(format!("execution {id} has no open gate"))
                })?;
                gates::admit(&e.id, &spec, &approval, &e.approvals)?;
                let verb = match approval.decision {
                    ApprovalDecision::Approve => "approved",
                    ApprovalDecision::Reject => "rejected",
                };
                e.append_log(now, format!("{} {verb} gate {}", approval.approver, spec.name));
                e.approvals.push(approval);
                let t = gates::tally(&spec, e.approvals_for(&spec.name), e.gate_opened_at, now);
                Ok(t.status != GateStatus::Pending)
            })
            .await?;
        if resolved {
            info!(execution_id = %id, "manual gate resolved; resuming");
            self.queue.push(id).await;
        }
        Ok(exec)
    }

    /// Re-enqueue paused executions whose manual gate has timed out so the
    /// worker can fail them. Returns the affected ids.
    pub async fn sweep_approval_timeouts(&self, now: DateTime<Utc>) -> Vec<String> {
        let paused = self
            .executions
            .list(&ExecutionFilter {
                status: Some(ExecutionStatus::AwaitingApproval),
                ..Default::default()
            })
            .await;
        let mut expired = Vec::new();
        for e in paused {
            let Some(spec) = e.current_gate_spec() else {
                continue;
            };
            let t = gates::tally(spec, e.approvals_for(&spec.name), e.gate_opened_at, now);
            if t.status == GateStatus::Timeout && self.queue.push(&e.id).await {
                expired.push(e.id.clone());
            }
        }
        expired
    }

    /// Recompute the risk of every live execution from current scorecards.
    /// Returns how many executions changed.
    pub async fn revalidate_risk(&self) -> Result<usize> {
        let model = self.scorecards.model().clone();
        let live: Vec<PromotionExecution> = self
            .executions
            .list(&ExecutionFilter::default())
            .await
            .into_iter()
            .filter(|e| !e.status.is_terminal())
            .collect();
        let mut changed = 0;
        for e in live {
            let cap_id = &e.request.capability_id;
            let (Ok(cap), Ok(card)) = (
                self.registry.get(cap_id, None).await,
                self.scorecards.get(cap_id, &e.request.version).await,
            ) else {
                continue;
            };
            let risk = model.risk_score(&card.scores, cap.manifest.risk_tier);
            if risk >= model.risk_alert_threshold {
                obs::emit_risk_alert(cap_id, risk, model.risk_alert_threshold);
            }
            if (risk - e.risk_score).abs() < f64::EPSILON {
                continue;
            }
            let now = Utc::now();
            let updated = self
                .executions
                .update(&e.id, |x| {
                    if x.status.is_terminal() {
                        return Ok(false);
                    }
                    x.append_log(now, format!("risk re-scored {:.2} -> {risk:.2}", x.risk_score));
                    x.risk_score = risk;
                    Ok(true)
                })
                .await?;
            if updated.0 {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Re-validate capabilities whose constitutional verdict has expired.
    /// A rejection suspends the capability. Returns how many were suspended.
    pub async fn revalidate_constitutional(&self, now: DateTime<Utc>) -> Result<usize> {
        let Some(service) = &self.constitution else {
            return Ok(0);
        };
        service.purge_expired(now).await;
        let mut suspended = 0;
        for cap in self.registry.list().await {
            if !cap.status.is_promotable() {
                continue;
            }
            let Some(previous) = &cap.constitutional else {
                continue;
            };
            if !previous.is_expired_at(now) {
                continue;
            }
            let verdict = match service
                .validate(ValidationAction::Revalidate, &cap, true)
                .await
            {
                Ok(v) => v,
                Err(e) => {
                    warn!(capability_id = %cap.id(), error = %e, "constitutional revalidation failed");
                    continue;
                }
            };
            let rejected = verdict.verdict == Verdict::Rejected;
            self.registry.set_constitutional(cap.id(), verdict).await?;
            if rejected {
                self.registry
                    .set_status(cap.id(), CapabilityStatus::Suspended)
                    .await?;
                suspended += 1;
            }
        }
        Ok(suspended)
    }

    /// Drop executions that finished more than `retention` ago.
    pub async fn cleanup_terminal(&self, retention: chrono::Duration) -> Result<usize> {
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return Ok(0);
        };
        let removed = self.executions.remove_terminal_before(cutoff).await?;
        if !removed.is_empty() {
            info!(removed = removed.len(), "terminal executions cleaned up");
        }
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constitutional::StaticConstitutionalValidator;
    use crate::domain::capability::{CapabilityManifest, RegistrationRequest, RiskTier};
    use crate::domain::constitution::{ConstitutionalVerdict, CourtScores};
    use crate::domain::policy::GateSpec;
    use crate::domain::scorecard::Dimension;
    use crate::scorecard::signals::StaticSignalSource;
    use crate::domain::scoring::ScoringModel;
    use capctl_state::MemoryCapabilityStore;

    struct Fixture {
        engine: PromotionEngine,
        registry: Arc<CapabilityRegistry>,
        scorecards: Arc<ScorecardEvaluator>,
        budgets: Arc<BudgetLedger>,
        executions: Arc<ExecutionBook>,
        queue: Arc<PromotionQueue>,
    }

    fn fixture(validator: Option<StaticConstitutionalValidator>) -> Fixture {
        let store = Arc::new(MemoryCapabilityStore::new());
        let registry = Arc::new(CapabilityRegistry::new(store.clone()));
        let scorecards = Arc::new(ScorecardEvaluator::new(
            store.clone(),
            ScoringModel::default(),
            Arc::new(StaticSignalSource::default()),
        ));
        let policies = Arc::new(PolicyRegistry::standard(store.clone()));
        let budgets = Arc::new(BudgetLedger::new(store.clone()));
        let executions = Arc::new(ExecutionBook::new(store));
        let queue = Arc::new(PromotionQueue::new());
        let mut engine = PromotionEngine::new(
            registry.clone(),
            scorecards.clone(),
            policies,
            budgets.clone(),
            executions.clone(),
            queue.clone(),
        );
        if let Some(v) = validator {
            engine = engine.with_constitution(Arc::new(ConstitutionalService::new(Arc::new(v))));
        }
        Fixture {
            engine,
            registry,
            scorecards,
            budgets,
            executions,
            queue,
        }
    }

    async fn scored(f: &Fixture, id: &str, score: f64) {
        let m = CapabilityManifest::new(id, id, "1.0.0");
        f.registry.register(RegistrationRequest::new(m)).await.unwrap();
        let cap = f.registry.get(id, None).await.unwrap();
        f.scorecards.initialize(&cap).await.unwrap();
        for d in Dimension::ALL {
            f.scorecards.update_dimension(id, "1.0.0", d, score).await.unwrap();
        }
        let snapshot = crate::scorecard::signals::SignalSnapshot {
            test_coverage: Some(score),
            ..Default::default()
        };
        f.scorecards.update_metrics(&cap, &snapshot).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_creates_pending_and_enqueues() {
        let f = fixture(None);
        scored(&f, "svc-a", 0.85).await;
        let exec = f
            .engine
            .request_promotion(PromotionRequest::new("svc-a", "1.0.0", "low"))
            .await
            .unwrap();
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert_eq!(exec.cost_center, DEFAULT_COST_CENTER);
        assert_eq!(f.queue.len().await, 1);

        let again = f
            .engine
            .request_promotion(PromotionRequest::new("svc-a", "1.0.0", "low"))
            .await
            .unwrap_err();
        assert!(matches!(again, CapctlError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_unknown_policy_and_tier_mismatch() {
        let f = fixture(None);
        scored(&f, "svc-a", 0.85).await;
        assert!(matches!(
            f.engine
                .request_promotion(PromotionRequest::new("svc-a", "1.0.0", "nope"))
                .await
                .unwrap_err(),
            CapctlError::PolicyNotFound(_)
        ));

        let m = CapabilityManifest::new("svc-risky", "svc-risky", "1.0.0").with_risk_tier(RiskTier::High);
        f.registry.register(RegistrationRequest::new(m)).await.unwrap();
        assert!(matches!(
            f.engine
                .request_promotion(PromotionRequest::new("svc-risky", "1.0.0", "low"))
                .await
                .unwrap_err(),
            CapctlError::InvalidRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_budget_is_not_found_when_enforced() {
        let f = fixture(None);
        scored(&f, "svc-a", 0.9).await;
        let err = f
            .engine
            .request_promotion(PromotionRequest::new("svc-a", "1.0.0", "medium").with_cost_center("team-x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        f.budgets.set_budget("team-x", 2000.0).await.unwrap();
        let exec = f
            .engine
            .request_promotion(PromotionRequest::new("svc-a", "1.0.0", "medium").with_cost_center("team-x"))
            .await
            .unwrap();
        assert!(exec.allocation_id.is_some());
        assert_eq!(f.budgets.get("team-x").await.unwrap().used, 50.0);

        let cancelled = f.engine.cancel(&exec.id, "operator").await.unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert_eq!(f.budgets.get("team-x").await.unwrap().used, 0.0);
        assert!(f.queue.is_empty().await);
        assert!(matches!(
            f.engine.cancel(&exec.id, "again").await.unwrap_err(),
            CapctlError::InvalidState(_)
        ));
    }

    #[tokio::test]
    async fn test_constitutional_rejection_suspends() {
        let f = fixture(Some(StaticConstitutionalValidator::rejecting(&["unsafe egress"])));
        scored(&f, "svc-a", 0.97).await;
        f.budgets.set_budget("default", 100_000.0).await.unwrap();
        let err = f
            .engine
            .request_promotion(PromotionRequest::new("svc-a", "1.0.0", "high"))
            .await
            .unwrap_err();
        match err {
            CapctlError::ConstitutionalRejected { violations, .. } => {
                assert!(violations.iter().any(|v| v.contains("unsafe egress")))
            }
            other => panic!("unexpected {other:?}"),
        }
        let cap = f.registry.get("svc-a", None).await.unwrap();
        assert_eq!(cap.status, CapabilityStatus::Suspended);
        assert!(cap.constitutional.is_some());
    }

    #[tokio::test]
    async fn test_required_review_without_validator() {
        let f = fixture(None);
        scored(&f, "svc-a", 0.97).await;
        f.budgets.set_budget("default", 100_000.0).await.unwrap();
        assert!(matches!(
            f.engine
                .request_promotion(PromotionRequest::new("svc-a", "1.0.0", "high"))
                .await
                .unwrap_err(),
            CapctlError::Validator(_)
        ));
    }

    #[tokio::test]
    async fn test_approve_requires_pause() {
        let f = fixture(None);
        scored(&f, "svc-a", 0.85).await;
        let exec = f
            .engine
            .request_promotion(PromotionRequest::new("svc-a", "1.0.0", "low"))
            .await
            .unwrap();
        let err = f
            .engine
            .approve(&exec.id, Approval::approve("alice", "release-approval"))
            .await
            .unwrap_err();
        assert!(matches!(err, CapctlError::InvalidState(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_admit_one() {
        let f = fixture(None);
        scored(&f, "svc-a", 0.9).await;
        f.budgets.set_budget("team-x", 2000.0).await.unwrap();
        let request = || PromotionRequest::new("svc-a", "1.0.0", "medium").with_cost_center("team-x");

        let (a, b) = tokio::join!(
            f.engine.request_promotion(request()),
            f.engine.request_promotion(request()),
        );
        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(CapctlError::InvalidState(_)))));
        assert_eq!(f.executions.len().await, 1);
        assert_eq!(f.queue.len().await, 1);
        assert_eq!(f.budgets.get("team-x").await.unwrap().used, 50.0);
    }

    #[tokio::test]
    async fn test_sweep_requeues_expired_manual_gates() {
        let f = fixture(None);
        scored(&f, "svc-a", 0.85).await;
        let exec = f
            .engine
            .request_promotion(PromotionRequest::new("svc-a", "1.0.0", "low"))
            .await
            .unwrap();
        f.queue.remove(&exec.id).await;
        let opened = Utc::now();
        f.executions
            .update(&exec.id, |e| {
                e.policy.gates = vec![GateSpec::manual("release-approval", 1).with_timeout_secs(60)];
                e.transition(ExecutionStatus::Running, opened, "worker started")?;
                e.gate_opened_at = Some(opened);
                e.transition(ExecutionStatus::AwaitingApproval, opened, "waiting")
            })
            .await
            .unwrap();

        let early = opened + chrono::Duration::seconds(30);
        assert!(f.engine.sweep_approval_timeouts(early).await.is_empty());
        assert!(f.queue.is_empty().await);

        let late = opened + chrono::Duration::seconds(61);
        assert_eq!(f.engine.sweep_approval_timeouts(late).await, vec![exec.id.clone()]);
        assert_eq!(f.queue.len().await, 1);
        assert!(f.engine.sweep_approval_timeouts(late).await.is_empty());
    }

    fn verdict(verdict: Verdict, valid_until: DateTime<Utc>) -> ConstitutionalVerdict {
        ConstitutionalVerdict {
            courts: CourtScores {
                technical: 0.9,
                ethical: 0.9,
                operational: 0.9,
            },
            overall_score: 0.9,
            verdict,
            conditions: Vec::new(),
            violations: Vec::new(),
            audit_trail: Vec::new(),
            valid_until,
        }
    }

    #[tokio::test]
    async fn test_revalidation_suspends_on_rejection() {
        let validator = StaticConstitutionalValidator::approving();
        validator.set_verdict("svc-a", Verdict::Rejected, 0.1, &["data exfiltration"]);
        let f = fixture(Some(validator));
        scored(&f, "svc-a", 0.9).await;
        scored(&f, "svc-b", 0.9).await;
        scored(&f, "svc-c", 0.9).await;
        let now = Utc::now();
        let expired = now - chrono::Duration::hours(1);
        f.registry
            .set_constitutional("svc-a", verdict(Verdict::Approved, expired))
            .await
            .unwrap();
        f.registry
            .set_constitutional("svc-b", verdict(Verdict::Approved, expired))
            .await
            .unwrap();
        f.registry
            .set_constitutional("svc-c", verdict(Verdict::Approved, now + chrono::Duration::days(1)))
            .await
            .unwrap();

        assert_eq!(f.engine.revalidate_constitutional(now).await.unwrap(), 1);

        let a = f.registry.get("svc-a", None).await.unwrap();
        assert_eq!(a.status, CapabilityStatus::Suspended);
        let a_verdict = a.constitutional.unwrap();
        assert_eq!(a_verdict.verdict, Verdict::Rejected);
        assert!(a_verdict.violations.iter().any(|v| v.contains("exfiltration")));

        let b = f.registry.get("svc-b", None).await.unwrap();
        assert_ne!(b.status, CapabilityStatus::Suspended);
        assert!(b.constitutional.unwrap().valid_until > now);

        let c = f.registry.get("svc-c", None).await.unwrap();
        assert_eq!(c.constitutional.unwrap().valid_until, now + chrono::Duration::days(1));
    }

    #[tokio::test]
    async fn test_revalidation_without_validator_is_noop() {
        let f = fixture(None);
        scored(&f, "svc-a", 0.9).await;
        f.registry
            .set_constitutional("svc-a", verdict(Verdict::Approved, Utc::now() - chrono::Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(f.engine.revalidate_constitutional(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_terminal_respects_retention() {
        let f = fixture(None);
        scored(&f, "svc-a", 0.85).await;
        scored(&f, "svc-b", 0.85).await;
        scored(&f, "svc-c", 0.85).await;
        let request = |id: &str| PromotionRequest::new(id, "1.0.0", "low");
        let old = f.engine.request_promotion(request("svc-a")).await.unwrap();
        let recent = f.engine.request_promotion(request("svc-b")).await.unwrap();
        let live = f.engine.request_promotion(request("svc-c")).await.unwrap();

        let long_ago = Utc::now() - chrono::Duration::days(30);
        f.executions
            .update(&old.id, |e| e.fail_with(ExecutionStatus::Failed, long_ago, "gate failed"))
            .await
            .unwrap();
        f.engine.cancel(&recent.id, "operator").await.unwrap();

        let week = chrono::Duration::try_days(7).unwrap();
        assert_eq!(f.engine.cleanup_terminal(week).await.unwrap(), 1);
        assert!(f.engine.get_execution(&old.id).await.unwrap_err().is_not_found());
        assert!(f.engine.get_execution(&recent.id).await.is_ok());
        assert!(f.engine.get_execution(&live.id).await.is_ok());

        let forever = chrono::Duration::try_days(365 * 1_000_000).unwrap();
        assert_eq!(f.engine.cleanup_terminal(forever).await.unwrap(), 0);
        assert_eq!(f.executions.len().await, 2);
    }
}
