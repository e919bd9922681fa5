//! Traffic routing and runtime telemetry integration points.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::promotion::TelemetrySample;
use crate::rollout::error::{RolloutError, RolloutResult};

/// Shifts a share of production traffic to a capability version.
#[async_trait]
pub trait TrafficController: Send + Sync {
    async fn route(&self, capability_id: &str, version: &str, percent: u32) -> RolloutResult<()>;
}

/// Samples runtime health for a capability version at a traffic share.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn sample(
        &self,
        capability_id: &str,
        version: &str,
        traffic_percent: u32,
    ) -> RolloutResult<TelemetrySample>;
}

fn route_key(capability_id: &str, version: &str) -> String {
    format!("{capability_id}@{version}")
}

/// Records routing decisions in memory.
#[derive(Default)]
pub struct InMemoryTrafficController {
    routes: Mutex<HashMap<String, u32>>,
    history: Mutex<Vec<(String, u32)>>,
    fail_at: Option<u32>,
}

impl InMemoryTrafficController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse any route to exactly `percent`.
    pub fn failing_at(percent: u32) -> Self {
        Self {
            fail_at: Some(percent),
            ..Self::default()
        }
    }

    pub fn current(&self, capability_id: &str, version: &str) -> Option<u32> {
        self.routes
            .lock()
            .ok()?
            .get(&route_key(capability_id, version))
            .copied()
    }

    /// Every `(capability@version, percent)` routed so far, in order.
    pub fn history(&self) -> Vec<(String, u32)> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TrafficController for InMemoryTrafficController {
    async fn route(&self, capability_id: &str, version: &str, percent: u32) -> RolloutResult<()> {
        if self.fail_at == Some(percent) {
            return Err(RolloutError::Traffic(format!(
                "router refused {percent}% for {capability_id}@{version}"
            )));
        }
        let key = route_key(capability_id, version);
        self.routes
            .lock()
            .map_err(|e| RolloutError::Traffic(e.to_string()))?
            .insert(key.clone(), percent);
        self.history
            .lock()
            .map_err(|e| RolloutError::Traffic(e.to_string()))?
            .push((key, percent));
        Ok(())
    }
}

/// Serves queued samples first, then per-percent overrides, then a default.
pub struct ScriptedTelemetrySource {
    default: TelemetrySample,
    by_percent: Mutex<HashMap<u32, TelemetrySample>>,
    queue: Mutex<VecDeque<TelemetrySample>>,
}

impl Default for ScriptedTelemetrySource {
    fn default() -> Self {
        Self::healthy()
    }
}

impl ScriptedTelemetrySource {
    pub fn new(default: TelemetrySample) -> Self {
        Self {
            default,
            by_percent: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn healthy() -> Self {
        Self::new(TelemetrySample::healthy())
    }

    pub fn with_sample_at(self, percent: u32, sample: TelemetrySample) -> Self {
        if let Ok(mut map) = self.by_percent.lock() {
            map.insert(percent, sample);
        }
        self
    }

    pub fn push(&self, sample: TelemetrySample) {
        if let Ok(mut q) = self.queue.lock() {
            q.push_back(sample);
        }
    }
}

#[async_trait]
impl TelemetrySource for ScriptedTelemetrySource {
    async fn sample(
        &self,
        _capability_id: &str,
        _version: &str,
        traffic_percent: u32,
    ) -> RolloutResult<TelemetrySample> {
        if let Some(next) = self
            .queue
            .lock()
            .map_err(|e| RolloutError::Telemetry(e.to_string()))?
            .pop_front()
        {
            return Ok(next);
        }
        let by_percent = self
            .by_percent
            .lock()
            .map_err(|e| RolloutError::Telemetry(e.to_string()))?;
        Ok(by_percent
            .get(&traffic_percent)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_controller_tracks_routes() {
        let c = InMemoryTrafficController::new();
        c.route("svc-a", "1.0.0", 10).await.unwrap();
        c.route("svc-a", "1.0.0", 40).await.unwrap();
        assert_eq!(c.current("svc-a", "1.0.0"), Some(40));
        assert_eq!(c.history().len(), 2);

        let f = InMemoryTrafficController::failing_at(40);
        assert!(f.route("svc-a", "1.0.0", 40).await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_source_order() {
        let s = ScriptedTelemetrySource::healthy().with_sample_at(50, TelemetrySample::degraded(0.3));
        s.push(TelemetrySample::degraded(0.1));
        assert_eq!(s.sample("a", "1", 50).await.unwrap().error_rate, 0.1);
        assert_eq!(s.sample("a", "1", 50).await.unwrap().error_rate, 0.3);
        assert_eq!(s.sample("a", "1", 10).await.unwrap(), TelemetrySample::healthy());
    }
}
