//! Capability scorecards: per-version dimension scores, grade and trend.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One scoring dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Performance,
    Safety,
    Quality,
    Cost,
    Constitutional,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Self::Performance,
        Self::Safety,
        Self::Quality,
        Self::Cost,
        Self::Constitutional,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Safety => "safety",
            Self::Quality => "quality",
            Self::Cost => "cost",
            Self::Constitutional => "constitutional",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dimension {
    type Err = crate::domain::error::CapctlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| {
                crate::domain::error::CapctlError::InvalidRequest(format!(
                    "unknown score dimension: {s}"
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub performance: f64,
    pub safety: f64,
    pub quality: f64,
    pub cost: f64,
    pub constitutional: f64,
}

impl DimensionScores {
    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Performance => self.performance,
            Dimension::Safety => self.safety,
            Dimension::Quality => self.quality,
            Dimension::Cost => self.cost,
            Dimension::Constitutional => self.constitutional,
        }
    }

    pub fn set(&mut self, dimension: Dimension, value: f64) {
        let slot = match dimension {
            Dimension::Performance => &mut self.performance,
            Dimension::Safety => &mut self.safety,
            Dimension::Quality => &mut self.quality,
            Dimension::Cost => &mut self.cost,
            Dimension::Constitutional => &mut self.constitutional,
        };
        *slot = value;
    }
}

/// Letter grade. `A` is best; ordering follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl VulnerabilityCounts {
    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low
    }
}

/// Raw metric aggregates behind the dimension scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMetrics {
    /// Fraction of code covered by tests, in [0, 1].
    pub test_coverage: Option<f64>,
    pub tests_passed: u64,
    pub tests_failed: u64,
    pub vulnerabilities: VulnerabilityCounts,
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
    pub throughput_rps: Option<f64>,
    pub error_rate: Option<f64>,
    pub cost_per_1k_calls: Option<f64>,
}

impl RawMetrics {
    /// Passed / (passed + failed); `None` when no tests ran.
    pub fn pass_rate(&self) -> Option<f64> {
        let total = self.tests_passed + self.tests_failed;
        (total > 0).then(|| self.tests_passed as f64 / total as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationEntry {
    pub evaluated_at: DateTime<Utc>,
    pub overall: f64,
    pub scores: DimensionScores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityScorecard {
    pub capability_id: String,
    pub version: String,
    pub scores: DimensionScores,
    pub overall: f64,
    pub grade: Grade,
    pub metrics: RawMetrics,
    pub history: VecDeque<EvaluationEntry>,
    pub history_window: usize,
    pub trend: Trend,
    pub recommendations: Vec<String>,
    pub alerts: Vec<String>,
    pub last_evaluated: Option<DateTime<Utc>>,
    pub next_evaluation: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CapabilityScorecard {
    /// A fresh scorecard: all zeros, due for evaluation at `now`.
    pub fn empty(
        capability_id: impl Into<String>,
        version: impl Into<String>,
        history_window: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            capability_id: capability_id.into(),
            version: version.into(),
            scores: DimensionScores::default(),
            overall: 0.0,
            grade: Grade::F,
            metrics: RawMetrics::default(),
            history: VecDeque::new(),
            history_window: history_window.max(1),
            trend: Trend::Stable,
            recommendations: Vec::new(),
            alerts: Vec::new(),
            last_evaluated: None,
            next_evaluation: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append an evaluation, evicting the oldest entry beyond the window.
    pub fn push_history(&mut self, entry: EvaluationEntry) {
        self.history.push_back(entry);
        while self.history.len() > self.history_window {
            self.history.pop_front();
        }
    }

    pub fn store_key(&self) -> String {
        scorecard_key(&self.capability_id, &self.version)
    }
}

pub fn scorecard_key(capability_id: &str, version: &str) -> String {
    format!("scorecard/{capability_id}/{version}")
}
