//! Phased rollout driver with rollback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::domain::policy::RolloutConfig;
use crate::domain::promotion::{PhaseRecord, RolloutProgress, RolloutState};
use crate::obs;
use crate::rollout::error::RolloutError;
use crate::rollout::strategy::{check_sample, plan_phases};
use crate::rollout::traffic::{TelemetrySource, TrafficController};

/// What is being rolled out.
#[derive(Debug, Clone)]
pub struct RolloutTarget {
    pub execution_id: String,
    pub capability_id: String,
    pub version: String,
}

/// Final progress plus the error that ended the rollout, if any.
#[derive(Debug, Clone)]
pub struct RolloutReport {
    pub progress: RolloutProgress,
    pub error: Option<RolloutError>,
}

impl RolloutReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.progress.state == RolloutState::Completed
    }
}

/// Sleep for `duration` unless `cancel` flips to true first.
///
/// Returns `true` when cancelled. A dropped sender never cancels.
pub async fn cancellable_wait(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }
    if duration.is_zero() {
        return false;
    }
    let cancelled = async {
        let result = cancel.wait_for(|c| *c).await.map(|_| ());
        match result {
            Ok(()) => {}
            Err(_) => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancelled => true,
    }
}

pub struct RolloutOrchestrator {
    traffic: Arc<dyn TrafficController>,
    telemetry: Arc<dyn TelemetrySource>,
}

impl RolloutOrchestrator {
    pub fn new(traffic: Arc<dyn TrafficController>, telemetry: Arc<dyn TelemetrySource>) -> Self {
        Self { traffic, telemetry }
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetrySource> {
        &self.telemetry
    }

    /// Drive every phase of `config`, calling `on_progress` after each one.
    ///
    /// A failing phase rolls traffic back to the last good percentage and
    /// ends in `RolledBack`. Cancellation and infrastructure errors roll back
    /// the same way and end in `Aborted`.
    #[instrument(skip_all, fields(execution_id = %target.execution_id, strategy = %config.strategy))]
    pub async fn run<F, Fut>(
        &self,
        target: &RolloutTarget,
        config: &RolloutConfig,
        mut cancel: watch::Receiver<bool>,
        mut on_progress: F,
    ) -> RolloutReport
    where
        F: FnMut(RolloutProgress) -> Fut,
        Fut: Future<Output = ()>,
    {
        let phases = match plan_phases(config) {
            Ok(p) => p,
            Err(e) => {
                let mut progress = RolloutProgress::new(config.strategy, Vec::new());
                progress.state = RolloutState::Aborted;
                progress.issues.push(e.to_string());
                on_progress(progress.clone()).await;
                return RolloutReport {
                    progress,
                    error: Some(e),
                };
            }
        };
        let interval = Duration::from_secs(config.monitoring_interval_secs);
        let total = phases.len();
        let mut progress = RolloutProgress::new(config.strategy, phases.clone());
        progress.state = RolloutState::InProgress;
        info!(phases = total, "rollout started");

        for (index, percent) in phases.into_iter().enumerate() {
            if *cancel.borrow() {
                let err = RolloutError::Cancelled {
                    traffic_percent: progress.traffic_percent,
                };
                return self.abort(target, progress, err, RolloutState::Aborted, &mut on_progress).await;
            }

            progress.current_phase = index;
            if let Err(e) = self
                .traffic
                .route(&target.capability_id, &target.version, percent)
                .await
            {
                return self.abort(target, progress, e, RolloutState::Aborted, &mut on_progress).await;
            }
            progress.traffic_percent = percent;

            if cancellable_wait(interval, &mut cancel).await {
                let err = RolloutError::Cancelled {
                    traffic_percent: percent,
                };
                return self.abort(target, progress, err, RolloutState::Aborted, &mut on_progress).await;
            }

            let sample = match self
                .telemetry
                .sample(&target.capability_id, &target.version, percent)
                .await
            {
                Ok(s) => s,
                Err(e) => {
                    return self.abort(target, progress, e, RolloutState::Aborted, &mut on_progress).await;
                }
            };

            let issues = check_sample(&config.success, &sample);
            let passed = issues.is_empty();
            progress.phases.push(PhaseRecord {
                index,
                traffic_percent: percent,
                sample: Some(sample),
                passed,
                issues: issues.clone(),
                completed_at: Utc::now(),
            });
            obs::emit_rollout_phase(&target.execution_id, index, percent, passed);

            if !passed {
                progress.issues.extend(issues.iter().cloned());
                let err = RolloutError::PhaseFailed {
                    phase: index,
                    traffic_percent: percent,
                    issues,
                };
                return self.abort(target, progress, err, RolloutState::RolledBack, &mut on_progress).await;
            }

            progress.last_good_percent = percent;
            progress.progress = (index + 1) as f64 / total as f64;
            on_progress(progress.clone()).await;
        }

        progress.state = RolloutState::Completed;
        progress.progress = 1.0;
        on_progress(progress.clone()).await;
        info!(traffic_percent = progress.traffic_percent, "rollout completed");
        RolloutReport {
            progress,
            error: None,
        }
    }

    async fn abort<F, Fut>(
        &self,
        target: &RolloutTarget,
        mut progress: RolloutProgress,
        error: RolloutError,
        state: RolloutState,
        on_progress: &mut F,
    ) -> RolloutReport
    where
        F: FnMut(RolloutProgress) -> Fut,
        Fut: Future<Output = ()>,
    {
        let to = progress.last_good_percent;
        let reason = error.to_string();
        match self
            .traffic
            .route(&target.capability_id, &target.version, to)
            .await
        {
            Ok(()) => progress.traffic_percent = to,
            Err(e) => {
                warn!(error = %e, to_percent = to, "rollback routing failed");
                progress.issues.push(format!("rollback to {to}% failed: {e}"));
            }
        }
        obs::emit_rollback(&target.execution_id, to, &reason);
        if !progress.issues.contains(&reason) {
            progress.issues.push(reason);
        }
        progress.state = state;
        on_progress(progress.clone()).await;
        RolloutReport {
            progress,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::RolloutStrategy;
    use crate::domain::promotion::TelemetrySample;
    use crate::rollout::traffic::{InMemoryTrafficController, ScriptedTelemetrySource};
    use std::sync::Mutex;

    fn target() -> RolloutTarget {
        RolloutTarget {
            execution_id: "exec-1".into(),
            capability_id: "svc-a".into(),
            version: "1.0.0".into(),
        }
    }

    #[tokio::test]
    async fn test_canary_completes_all_phases() {
        let traffic = Arc::new(InMemoryTrafficController::new());
        let orch = RolloutOrchestrator::new(traffic.clone(), Arc::new(ScriptedTelemetrySource::healthy()));
        let (_tx, rx) = watch::channel(false);
        let updates = Arc::new(Mutex::new(0usize));
        let counter = updates.clone();

        let report = orch
            .run(&target(), &RolloutConfig::canary(5, 5, 100).with_interval_secs(0), rx, |_| {
                let counter = counter.clone();
                async move {
                    *counter.lock().unwrap() += 1;
                }
            })
            .await;

        assert!(report.succeeded());
        assert_eq!(report.progress.phases.len(), 20);
        assert_eq!(report.progress.traffic_percent, 100);
        assert_eq!(traffic.current("svc-a", "1.0.0"), Some(100));
        assert_eq!(*updates.lock().unwrap(), 21);
    }

    #[tokio::test]
    async fn test_failing_phase_rolls_back_to_last_good() {
        let traffic = Arc::new(InMemoryTrafficController::new());
        let telemetry = ScriptedTelemetrySource::healthy().with_sample_at(40, TelemetrySample::degraded(0.2));
        let orch = RolloutOrchestrator::new(traffic.clone(), Arc::new(telemetry));
        let (_tx, rx) = watch::channel(false);

        let report = orch
            .run(&target(), &RolloutConfig::canary(10, 30, 100).with_interval_secs(0), rx, |_| async {})
            .await;

        assert_eq!(report.progress.state, RolloutState::RolledBack);
        assert!(matches!(
            report.error,
            Some(RolloutError::PhaseFailed { phase: 1, traffic_percent: 40, .. })
        ));
        assert_eq!(report.progress.last_good_percent, 10);
        assert_eq!(traffic.current("svc-a", "1.0.0"), Some(10));
    }

    #[tokio::test]
    async fn test_first_phase_failure_rolls_back_to_zero() {
        let traffic = Arc::new(InMemoryTrafficController::new());
        let telemetry = ScriptedTelemetrySource::new(TelemetrySample::degraded(0.5));
        let orch = RolloutOrchestrator::new(traffic.clone(), Arc::new(telemetry));
        let (_tx, rx) = watch::channel(false);
        let cfg = RolloutConfig::with_strategy(RolloutStrategy::Immediate).with_interval_secs(0);
        let report = orch.run(&target(), &cfg, rx, |_| async {}).await;
        assert_eq!(report.progress.state, RolloutState::RolledBack);
        assert_eq!(traffic.current("svc-a", "1.0.0"), Some(0));
    }

    #[tokio::test]
    async fn test_cancel_during_monitoring_wait() {
        let traffic = Arc::new(InMemoryTrafficController::new());
        let orch = RolloutOrchestrator::new(traffic.clone(), Arc::new(ScriptedTelemetrySource::healthy()));
        let (tx, rx) = watch::channel(false);
        let cfg = RolloutConfig::canary(10, 10, 100).with_interval_secs(30);

        let handle = tokio::spawn(async move { orch.run(&target(), &cfg, rx, |_| async {}).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("rollout should stop promptly")
            .unwrap();
        assert_eq!(report.progress.state, RolloutState::Aborted);
        assert!(matches!(report.error, Some(RolloutError::Cancelled { .. })));
        assert_eq!(traffic.current("svc-a", "1.0.0"), Some(0));
    }

    #[tokio::test]
    async fn test_traffic_error_aborts() {
        let traffic = Arc::new(InMemoryTrafficController::failing_at(50));
        let orch = RolloutOrchestrator::new(traffic.clone(), Arc::new(ScriptedTelemetrySource::healthy()));
        let (_tx, rx) = watch::channel(false);
        let cfg = RolloutConfig::with_strategy(RolloutStrategy::Rolling).with_interval_secs(0);
        let report = orch.run(&target(), &cfg, rx, |_| async {}).await;
        assert_eq!(report.progress.state, RolloutState::Aborted);
        assert!(matches!(report.error, Some(RolloutError::Traffic(_))));
        assert_eq!(traffic.current("svc-a", "1.0.0"), Some(25));
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_cancel() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(!cancellable_wait(Duration::from_millis(10), &mut rx).await);
    }
}
