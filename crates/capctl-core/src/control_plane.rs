//! The assembled control plane.
//!
//! [`ControlPlaneBuilder`] wires one store into every component; the
//! resulting [`ControlPlane`] is the entry point used by the CLI and the
//! daemon. [`ControlPlane::start`] spawns the scheduler and the maintenance
//! loops; [`ControlPlane::shutdown`] stops them.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use capctl_state::CapabilityStore;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::ControlPlaneConfig;
use crate::constitutional::{
    ConstitutionalService, ConstitutionalValidator, HttpConstitutionalValidator,
};
use crate::domain::capability::{Capability, RegistrationRequest, RegistrationResult, RegistrationStatus};
use crate::domain::error::{CapctlError, Result};
use crate::domain::policy::PolicySet;
use crate::domain::promotion::{Approval, ExecutionStatus, PromotionExecution, PromotionRequest};
use crate::domain::scorecard::CapabilityScorecard;
use crate::metrics::{MetricsSnapshot, METRICS};
use crate::obs::ExecutionSpan;
use crate::promotion::{
    BudgetLedger, ExecutionBook, ExecutionFilter, PolicyRegistry, PromotionEngine, PromotionWorker,
};
use crate::registry::CapabilityRegistry;
use crate::rollout::{
    InMemoryTrafficController, RolloutOrchestrator, ScriptedTelemetrySource, TelemetrySource,
    TrafficController,
};
use crate::scheduler::{PromotionQueue, Scheduler};
use crate::scorecard::{ScorecardEvaluator, SignalSource, StaticSignalSource};

/// Counts reported by [`ControlPlane::hydrate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HydrateReport {
    pub capabilities: usize,
    pub scorecards: usize,
    pub policies: usize,
    pub budgets: usize,
    pub allocations: usize,
    pub executions: usize,
    pub requeued: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlPlaneStats {
    pub metrics: MetricsSnapshot,
    pub capabilities: usize,
    pub scorecards: usize,
    pub queued: usize,
    pub active_workers: usize,
    pub executions: BTreeMap<String, usize>,
}

#[derive(Default)]
pub struct ControlPlaneBuilder {
    config: ControlPlaneConfig,
    store: Option<Arc<dyn CapabilityStore>>,
    validator: Option<Arc<dyn ConstitutionalValidator>>,
    signals: Option<Arc<dyn SignalSource>>,
    traffic: Option<Arc<dyn TrafficController>>,
    telemetry: Option<Arc<dyn TelemetrySource>>,
    policies: Option<PolicySet>,
}

impl ControlPlaneBuilder {
    pub fn new(config: ControlPlaneConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Use this store instead of opening the configured backend.
    pub fn with_store(mut self, store: Arc<dyn CapabilityStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this validator instead of the configured HTTP endpoint.
    pub fn with_validator(mut self, validator: Arc<dyn ConstitutionalValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_signal_source(mut self, signals: Arc<dyn SignalSource>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn with_traffic(mut self, traffic: Arc<dyn TrafficController>) -> Self {
        self.traffic = Some(traffic);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySource>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Use this policy set instead of the configured file or the built-in tiers.
    pub fn with_policies(mut self, set: PolicySet) -> Self {
        self.policies = Some(set);
        self
    }

    pub async fn build(self) -> Result<ControlPlane> {
        let config = self.config;
        config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => config.store.open().await?,
        };

        let validator: Option<Arc<dyn ConstitutionalValidator>> = match self.validator {
            Some(v) => Some(v),
            None => match config.validator.endpoint.as_deref() {
                Some(endpoint) => Some(Arc::new(HttpConstitutionalValidator::new(
                    endpoint,
                    config.validator.timeout(),
                )?)),
                None => None,
            },
        };
        let constitution = validator.map(|v| Arc::new(ConstitutionalService::new(v)));

        let mut registry = CapabilityRegistry::new(store.clone());
        if let Some(service) = &constitution {
            registry = registry.with_constitution(service.clone());
        }
        let registry = Arc::new(registry);

        let signals: Arc<dyn SignalSource> = match self.signals {
            Some(signals) => signals,
            None => Arc::new(StaticSignalSource::default()),
        };
        let scorecards = Arc::new(
            ScorecardEvaluator::new(store.clone(), config.scoring.clone(), signals)
                .with_history_window(config.scorecard.history_window)
                .with_interval_secs(config.scorecard.evaluation_interval_secs),
        );

        let policies = Arc::new(match (self.policies, config.policy_file.as_ref()) {
            (Some(set), _) => PolicyRegistry::new(store.clone(), set),
            (None, Some(path)) => PolicyRegistry::from_file(store.clone(), path)?,
            (None, None) => PolicyRegistry::standard(store.clone()),
        });

        let budgets = Arc::new(BudgetLedger::new(store.clone()));
        let executions = Arc::new(ExecutionBook::new(store.clone()));
        let queue = Arc::new(PromotionQueue::new());

        let traffic: Arc<dyn TrafficController> = match self.traffic {
            Some(traffic) => traffic,
            None => Arc::new(InMemoryTrafficController::new()),
        };
        let telemetry: Arc<dyn TelemetrySource> = match self.telemetry {
            Some(telemetry) => telemetry,
            None => Arc::new(ScriptedTelemetrySource::healthy()),
        };
        let orchestrator = Arc::new(RolloutOrchestrator::new(traffic, telemetry));

        let mut worker = PromotionWorker::new(
            registry.clone(),
            scorecards.clone(),
            budgets.clone(),
            executions.clone(),
            orchestrator,
        );
        let mut engine = PromotionEngine::new(
            registry.clone(),
            scorecards.clone(),
            policies.clone(),
            budgets.clone(),
            executions.clone(),
            queue.clone(),
        );
        if let Some(service) = &constitution {
            worker = worker.with_constitution(service.clone());
            engine = engine.with_constitution(service.clone());
        }
        let scheduler = Arc::new(Scheduler::new(
            queue.clone(),
            Arc::new(worker),
            config.scheduler.max_concurrent,
        ));

        let (shutdown, _) = watch::channel(false);
        Ok(ControlPlane {
            config,
            store,
            registry,
            scorecards,
            policies,
            budgets,
            executions,
            queue,
            engine: Arc::new(engine),
            scheduler,
            constitution,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

pub struct ControlPlane {
    config: ControlPlaneConfig,
    store: Arc<dyn CapabilityStore>,
    registry: Arc<CapabilityRegistry>,
    scorecards: Arc<ScorecardEvaluator>,
    policies: Arc<PolicyRegistry>,
    budgets: Arc<BudgetLedger>,
    executions: Arc<ExecutionBook>,
    queue: Arc<PromotionQueue>,
    engine: Arc<PromotionEngine>,
    scheduler: Arc<Scheduler>,
    constitution: Option<Arc<ConstitutionalService>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ControlPlane {
    pub fn builder(config: ControlPlaneConfig) -> ControlPlaneBuilder {
        ControlPlaneBuilder::new(config)
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CapabilityStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn scorecards(&self) -> &Arc<ScorecardEvaluator> {
        &self.scorecards
    }

    pub fn policies(&self) -> &Arc<PolicyRegistry> {
        &self.policies
    }

    pub fn budgets(&self) -> &Arc<BudgetLedger> {
        &self.budgets
    }

    pub fn engine(&self) -> &Arc<PromotionEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn queue(&self) -> &Arc<PromotionQueue> {
        &self.queue
    }

    /// Load every component from the store and re-enqueue executions that
    /// were pending or running when the previous process stopped.
    #[instrument(skip(self))]
    pub async fn hydrate(&self) -> Result<HydrateReport> {
        let capabilities = self.registry.hydrate().await?;
        let scorecards = self.scorecards.hydrate().await?;
        let policies = self.policies.hydrate().await?;
        let (budgets, allocations) = self.budgets.hydrate().await?;
        let executions = self.executions.hydrate().await?;

        let mut requeued = 0;
        for exec in self.executions.list(&ExecutionFilter::default()).await {
            if matches!(exec.status, ExecutionStatus::Pending | ExecutionStatus::Running)
                && self.queue.push(&exec.id).await
            {
                requeued += 1;
            }
        }
        requeued += self.engine.sweep_approval_timeouts(Utc::now()).await.len();

        let report = HydrateReport {
            capabilities,
            scorecards,
            policies,
            budgets,
            allocations,
            executions,
            requeued,
        };
        info!(?report, "control plane hydrated");
        Ok(report)
    }

    /// Register a capability and make sure its version has a scorecard.
    pub async fn register(&self, request: RegistrationRequest) -> Result<RegistrationResult> {
        let result = self.registry.register(request).await?;
        if result.status != RegistrationStatus::AlreadyRegistered {
            let cap = self
                .registry
                .get(&result.capability_id, Some(&result.version))
                .await?;
            self.scorecards.get_or_initialize(&cap).await?;
        }
        Ok(result)
    }

    pub async fn get_capability(&self, id: &str, version: Option<&str>) -> Result<Capability> {
        self.registry.get(id, version).await
    }

    /// Delete a capability together with its scorecards and cached verdict.
    pub async fn delete(&self, id: &str) -> Result<Capability> {
        let removed = self.registry.delete(id).await?;
        self.scorecards.remove(id).await?;
        if let Some(service) = &self.constitution {
            service.invalidate(id).await;
        }
        Ok(removed)
    }

    /// Collect fresh signals and re-score one capability version.
    pub async fn evaluate_scorecard(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<CapabilityScorecard> {
        let cap = self.registry.get(id, version).await?;
        self.scorecards.evaluate(&cap).await
    }

    pub async fn request_promotion(&self, request: PromotionRequest) -> Result<PromotionExecution> {
        let exec = self.engine.request_promotion(request).await?;
        {
            let _span = ExecutionSpan::enter(&exec.id, &exec.request.capability_id);
            info!(policy_id = %exec.policy.id, risk = exec.risk_score, "promotion queued");
        }
        Ok(exec)
    }

    pub async fn approve(&self, execution_id: &str, approval: Approval) -> Result<PromotionExecution> {
        self.engine.approve(execution_id, approval).await
    }

    pub async fn cancel(&self, execution_id: &str, reason: &str) -> Result<PromotionExecution> {
        self.engine.cancel(execution_id, reason).await
    }

    pub async fn execution(&self, execution_id: &str) -> Result<PromotionExecution> {
        self.engine.get_execution(execution_id).await
    }

    pub async fn executions(&self, filter: &ExecutionFilter) -> Vec<PromotionExecution> {
        self.engine.list_executions(filter).await
    }

    /// Drive queued executions on this task until nothing is left to run.
    /// Executions paused on a manual gate stay paused.
    pub async fn run_pending(&self) {
        self.scheduler.run_until_idle().await;
    }

    /// Remove executions that have been terminal longer than the retention window.
    pub async fn cleanup(&self) -> Result<usize> {
        match self.config.maintenance.retention() {
            Some(retention) => self.engine.cleanup_terminal(retention).await,
            None => Ok(0),
        }
    }

    pub async fn stats(&self) -> ControlPlaneStats {
        let executions = self
            .executions
            .counts()
            .await
            .into_iter()
            .map(|(status, n)| (status.as_str().to_string(), n))
            .collect();
        ControlPlaneStats {
            metrics: METRICS.snapshot(),
            capabilities: self.registry.len().await,
            scorecards: self.scorecards.len().await,
            queued: self.queue.len().await,
            active_workers: self.scheduler.active_count().await,
            executions,
        }
    }

    /// Spawn the scheduler and every enabled maintenance loop.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("control plane already started");
            return;
        }

        let scheduler = self.scheduler.clone();
        let tick = Duration::from_secs(self.config.scheduler.tick_interval_secs);
        let rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { scheduler.run(tick, rx).await }));

        let m = self.config.maintenance.clone();

        let cp = self.clone();
        tasks.extend(self.spawn_loop("scorecard_sweep", m.scorecard_sweep_secs, move || {
            let cp = cp.clone();
            async move { cp.evaluate_due_scorecards().await }
        }));

        let cp = self.clone();
        tasks.extend(self.spawn_loop("budget_reconcile", m.budget_reconcile_secs, move || {
            let cp = cp.clone();
            async move {
                if let Err(e) = cp.budgets.reconcile(Utc::now()).await {
                    warn!(error = %e, "budget reconciliation failed");
                }
            }
        }));

        let cp = self.clone();
        tasks.extend(self.spawn_loop("risk_revalidation", m.risk_revalidation_secs, move || {
            let cp = cp.clone();
            async move {
                if let Err(e) = cp.engine.revalidate_risk().await {
                    warn!(error = %e, "risk revalidation failed");
                }
            }
        }));

        let cp = self.clone();
        tasks.extend(self.spawn_loop(
            "constitutional_revalidation",
            m.constitutional_revalidation_secs,
            move || {
                let cp = cp.clone();
                async move {
                    if let Some(service) = &cp.constitution {
                        service.purge_expired(Utc::now()).await;
                    }
                    if let Err(e) = cp.engine.revalidate_constitutional(Utc::now()).await {
                        warn!(error = %e, "constitutional revalidation failed");
                    }
                }
            },
        ));

        let cp = self.clone();
        tasks.extend(self.spawn_loop("approval_sweep", m.approval_sweep_secs, move || {
            let cp = cp.clone();
            async move {
                let expired = cp.engine.sweep_approval_timeouts(Utc::now()).await;
                if !expired.is_empty() {
                    info!(count = expired.len(), "approval gates timed out");
                }
            }
        }));

        let cp = self.clone();
        tasks.extend(self.spawn_loop("policy_reload", m.policy_reload_secs, move || {
            let cp = cp.clone();
            async move {
                if let Err(e) = cp.policies.reload_if_changed().await {
                    warn!(error = %e, "policy reload rejected; keeping previous policies");
                }
            }
        }));

        let cp = self.clone();
        tasks.extend(self.spawn_loop("cleanup", m.cleanup_interval_secs, move || {
            let cp = cp.clone();
            async move {
                if let Err(e) = cp.cleanup().await {
                    warn!(error = %e, "execution cleanup failed");
                }
            }
        }));

        tasks.extend(self.spawn_loop("metrics_flush", m.metrics_flush_secs, || async {
            METRICS.flush()
        }));

        info!(tasks = tasks.len(), "control plane started");
    }

    /// Stop every loop. Workers get `grace` to finish before they are
    /// aborted; aborted executions resume on the next [`hydrate`](Self::hydrate).
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for t in tasks {
            if let Err(e) = t.await {
                warn!(error = %e, "control plane task ended abnormally");
            }
        }

        let idle = async {
            while self.scheduler.active_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(grace, idle).await.is_err() {
            warn!("workers still running after grace period; aborting");
            self.scheduler.abort_all().await;
        } else {
            self.scheduler.join_all().await;
        }
        METRICS.flush();
        info!("control plane stopped");
    }

    async fn evaluate_due_scorecards(&self) {
        let due = self.scorecards.due_for_evaluation(Utc::now()).await;
        for (id, version) in due {
            let cap = match self.registry.get(&id, Some(&version)).await {
                Ok(cap) => cap,
                Err(e) if e.is_not_found() || matches!(e, CapctlError::VersionLookupUnsupported { .. }) => {
                    debug!(capability_id = %id, version = %version, error = %e, "retiring scorecard of superseded version");
                    if let Err(e) = self.scorecards.retire(&id, &version).await {
                        warn!(capability_id = %id, version = %version, error = %e, "scorecard not retired");
                    }
                    continue;
                }
                Err(e) => {
                    warn!(capability_id = %id, version = %version, error = %e, "skipping scheduled evaluation");
                    continue;
                }
            };
            if let Err(e) = self.scorecards.evaluate(&cap).await {
                warn!(capability_id = %id, version = %version, error = %e, "scheduled evaluation failed");
            }
        }
    }

    fn spawn_loop<F, Fut>(&self, name: &'static str, every_secs: u64, mut f: F) -> Option<JoinHandle<()>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if every_secs == 0 {
            debug!(task = name, "maintenance loop disabled");
            return None;
        }
        let mut shutdown = self.shutdown.subscribe();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(every_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => f().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(task = name, "maintenance loop stopped");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constitutional::StaticConstitutionalValidator;
    use crate::domain::capability::CapabilityManifest;
    use capctl_state::MemoryCapabilityStore;

    fn request(id: &str, version: &str) -> RegistrationRequest {
        RegistrationRequest::new(CapabilityManifest::new(id, id, version))
    }

    async fn plane() -> ControlPlane {
        ControlPlane::builder(ControlPlaneConfig::default())
            .with_store(Arc::new(MemoryCapabilityStore::new()))
            .with_validator(Arc::new(StaticConstitutionalValidator::approving()))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_initializes_scorecard() {
        let cp = plane().await;
        cp.register(request("svc-a", "1.0.0")).await.unwrap();
        let card = cp.scorecards().get("svc-a", "1.0.0").await.unwrap();
        assert_eq!(card.capability_id, "svc-a");
        assert_eq!(cp.stats().await.scorecards, 1);
    }

    #[tokio::test]
    async fn test_superseded_scorecards_leave_schedule() {
        let cp = plane().await;
        cp.register(request("svc-a", "1.0.0")).await.unwrap();
        cp.register(request("svc-a", "1.1.0")).await.unwrap();
        assert_eq!(cp.scorecards().due_for_evaluation(Utc::now()).await.len(), 2);

        cp.evaluate_due_scorecards().await;
        assert!(cp.scorecards().due_for_evaluation(Utc::now()).await.is_empty());
        let old = cp.scorecards().get("svc-a", "1.0.0").await.unwrap();
        assert_eq!(old.next_evaluation, chrono::DateTime::<Utc>::MAX_UTC);
        let current = cp.scorecards().get("svc-a", "1.1.0").await.unwrap();
        assert!(current.next_evaluation > Utc::now());

        assert!(!cp.scorecards().retire("svc-a", "1.0.0").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_removes_scorecards() {
        let cp = plane().await;
        cp.register(request("svc-a", "1.0.0")).await.unwrap();
        cp.delete("svc-a").await.unwrap();
        assert!(cp.scorecards().get("svc-a", "1.0.0").await.is_err());
        assert!(cp.get_capability("svc-a", None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_hydrate_reloads_from_store() {
        let store: Arc<dyn CapabilityStore> = Arc::new(MemoryCapabilityStore::new());
        let first = ControlPlane::builder(ControlPlaneConfig::default())
            .with_store(store.clone())
            .build()
            .await
            .unwrap();
        first.register(request("svc-a", "1.0.0")).await.unwrap();
        first.budgets().set_budget("ops", 100.0).await.unwrap();

        let second = ControlPlane::builder(ControlPlaneConfig::default())
            .with_store(store)
            .build()
            .await
            .unwrap();
        let report = second.hydrate().await.unwrap();
        assert_eq!(report.capabilities, 1);
        assert_eq!(report.scorecards, 1);
        assert_eq!(report.budgets, 1);
        assert_eq!(report.requeued, 0);
        assert!(second.get_capability("svc-a", Some("1.0.0")).await.is_ok());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let cp = Arc::new(plane().await);
        cp.start().await;
        cp.start().await;
        cp.shutdown(Duration::from_secs(1)).await;
        assert!(cp.tasks.lock().await.is_empty());
    }
}
