//! Signal collection and the signal → dimension transforms.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::capability::Capability;
use crate::domain::error::{CapctlError, Result};
use crate::domain::scorecard::{RawMetrics, VulnerabilityCounts};
use crate::domain::scoring::{clamp_unit, SignalTargets};

/// One collection of raw signals. `None` means "not measured this time".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSnapshot {
    pub test_coverage: Option<f64>,
    pub tests_passed: Option<u64>,
    pub tests_failed: Option<u64>,
    pub vulnerabilities: Option<VulnerabilityCounts>,
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
    pub throughput_rps: Option<f64>,
    pub error_rate: Option<f64>,
    pub cost_per_1k_calls: Option<f64>,
    pub constitutional_score: Option<f64>,
}

impl SignalSnapshot {
    pub fn carries_quality(&self) -> bool {
        self.test_coverage.is_some() || self.tests_passed.is_some() || self.tests_failed.is_some()
    }

    pub fn carries_performance(&self) -> bool {
        self.latency_p95_ms.is_some() || self.error_rate.is_some()
    }

    /// Overlay every measured signal onto `metrics`.
    pub fn merge_into(&self, metrics: &mut RawMetrics) {
        if let Some(v) = self.test_coverage {
            metrics.test_coverage = Some(clamp_unit(v));
        }
        if let Some(v) = self.tests_passed {
            metrics.tests_passed = v;
        }
        if let Some(v) = self.tests_failed {
            metrics.tests_failed = v;
        }
        if let Some(v) = self.vulnerabilities {
            metrics.vulnerabilities = v;
        }
        macro_rules! overlay {
            ($($f:ident),*) => { $( if self.$f.is_some() { metrics.$f = self.$f; } )* };
        }
        overlay!(
            latency_p50_ms,
            latency_p95_ms,
            latency_p99_ms,
            throughput_rps,
            cost_per_1k_calls
        );
        if let Some(v) = self.error_rate {
            metrics.error_rate = Some(clamp_unit(v));
        }
    }
}

/// Where raw signals come from: test runners, scanners, benchmarks, billing.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn collect(&self, capability: &Capability) -> Result<SignalSnapshot>;
}

/// Serves fixed snapshots, per capability or a shared default.
#[derive(Default)]
pub struct StaticSignalSource {
    default: SignalSnapshot,
    per_capability: Mutex<HashMap<String, SignalSnapshot>>,
}

impl StaticSignalSource {
    pub fn new(default: SignalSnapshot) -> Self {
        Self {
            default,
            per_capability: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, capability_id: &str, snapshot: SignalSnapshot) {
        if let Ok(mut map) = self.per_capability.lock() {
            map.insert(capability_id.to_string(), snapshot);
        }
    }
}

#[async_trait]
impl SignalSource for StaticSignalSource {
    async fn collect(&self, capability: &Capability) -> Result<SignalSnapshot> {
        let map = self
            .per_capability
            .lock()
            .map_err(|e| CapctlError::InvalidState(format!("signal source poisoned: {e}")))?;
        Ok(map
            .get(capability.id())
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

pub fn quality_score(coverage: f64, pass_rate: f64) -> f64 {
    clamp_unit(0.6 * clamp_unit(coverage) + 0.4 * clamp_unit(pass_rate))
}

pub fn safety_score(v: &VulnerabilityCounts) -> f64 {
    let penalty = 0.5 * v.critical as f64
        + 0.2 * v.high as f64
        + 0.05 * v.medium as f64
        + 0.01 * v.low as f64;
    clamp_unit(1.0 - penalty)
}

pub fn performance_score(latency_p95_ms: f64, error_rate: f64, targets: &SignalTargets) -> f64 {
    let latency = if latency_p95_ms <= 0.0 {
        1.0
    } else {
        (targets.latency_p95_ms / latency_p95_ms).min(1.0)
    };
    let errors = 1.0 - (10.0 * clamp_unit(error_rate)).min(1.0);
    clamp_unit(0.6 * latency + 0.4 * errors)
}

pub fn cost_score(cost_per_1k_calls: f64, targets: &SignalTargets) -> f64 {
    if cost_per_1k_calls <= 0.0 {
        return 1.0;
    }
    clamp_unit(targets.cost_per_1k_calls / cost_per_1k_calls)
}
