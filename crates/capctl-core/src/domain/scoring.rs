//! Shared scoring model: dimension weights, tier weights, grade thresholds
//! and signal targets. Both the scorecard evaluator and the promotion engine
//! read from the same model.

use serde::{Deserialize, Serialize};

use crate::domain::capability::RiskTier;
use crate::domain::error::{CapctlError, Result};
use crate::domain::scorecard::{Dimension, DimensionScores, Grade};

/// Round to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Clamp into [0, 1]; NaN maps to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionWeights {
    pub performance: f64,
    pub safety: f64,
    pub quality: f64,
    pub cost: f64,
    pub constitutional: f64,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            performance: 0.25,
            safety: 0.25,
            quality: 0.20,
            cost: 0.15,
            constitutional: 0.15,
        }
    }
}

impl DimensionWeights {
    pub fn weight(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Performance => self.performance,
            Dimension::Safety => self.safety,
            Dimension::Quality => self.quality,
            Dimension::Cost => self.cost,
            Dimension::Constitutional => self.constitutional,
        }
    }

    pub fn total(&self) -> f64 {
        Dimension::ALL.iter().map(|d| self.weight(*d)).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierWeights {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for TierWeights {
    fn default() -> Self {
        Self {
            low: 0.1,
            medium: 0.3,
            high: 0.6,
            critical: 0.9,
        }
    }
}

/// Minimum overall score for each letter grade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeThresholds {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            a: 0.90,
            b: 0.80,
            c: 0.70,
            d: 0.60,
        }
    }
}

/// Reference values used to turn raw signals into [0, 1] scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalTargets {
    pub latency_p95_ms: f64,
    pub cost_per_1k_calls: f64,
}

impl Default for SignalTargets {
    fn default() -> Self {
        Self {
            latency_p95_ms: 200.0,
            cost_per_1k_calls: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringModel {
    pub weights: DimensionWeights,
    pub tier_weights: TierWeights,
    pub grades: GradeThresholds,
    pub targets: SignalTargets,
    /// Dimensions below this get a recommendation.
    pub recommendation_threshold: f64,
    /// Dimensions below this raise an alert.
    pub alert_threshold: f64,
    /// Overall drop versus the previous evaluation that raises an alert.
    pub overall_drop_alert: f64,
    /// Risk score at or above this is logged as an alert.
    pub risk_alert_threshold: f64,
}

impl Default for ScoringModel {
    fn default() -> Self {
        Self {
            weights: DimensionWeights::default(),
            tier_weights: TierWeights::default(),
            grades: GradeThresholds::default(),
            targets: SignalTargets::default(),
            recommendation_threshold: 0.70,
            alert_threshold: 0.50,
            overall_drop_alert: 0.10,
            risk_alert_threshold: 0.70,
        }
    }
}

impl ScoringModel {
    pub fn validate(&self) -> Result<()> {
        for d in Dimension::ALL {
            let w = self.weights.weight(d);
            if !(0.0..=1.0).contains(&w) {
                return Err(CapctlError::Config(format!(
                    "weight for {d} must be within [0, 1], got {w}"
                )));
            }
        }
        if (self.weights.total() - 1.0).abs() > 1e-6 {
            return Err(CapctlError::Config(format!(
                "dimension weights must sum to 1.0, got {:.3}",
                self.weights.total()
            )));
        }
        let g = &self.grades;
        if !(g.a >= g.b && g.b >= g.c && g.c >= g.d) {
            return Err(CapctlError::Config(
                "grade thresholds must be non-increasing from A to D".into(),
            ));
        }
        if self.targets.latency_p95_ms <= 0.0 || self.targets.cost_per_1k_calls <= 0.0 {
            return Err(CapctlError::Config("signal targets must be positive".into()));
        }
        Ok(())
    }

    /// Weighted overall score, clamped and rounded to two decimals.
    pub fn overall(&self, scores: &DimensionScores) -> f64 {
        let sum: f64 = Dimension::ALL
            .iter()
            .map(|d| clamp_unit(scores.get(*d)) * self.weights.weight(*d))
            .sum();
        round2(clamp_unit(sum))
    }

    pub fn grade(&self, overall: f64) -> Grade {
        let g = &self.grades;
        if overall >= g.a {
            Grade::A
        } else if overall >= g.b {
            Grade::B
        } else if overall >= g.c {
            Grade::C
        } else if overall >= g.d {
            Grade::D
        } else {
            Grade::F
        }
    }

    pub fn tier_weight(&self, tier: RiskTier) -> f64 {
        match tier {
            RiskTier::Low => self.tier_weights.low,
            RiskTier::Medium => self.tier_weights.medium,
            RiskTier::High => self.tier_weights.high,
            RiskTier::Critical => self.tier_weights.critical,
        }
    }

    /// Promotion risk: mean of the safety, quality and constitutional gaps
    /// plus the tier weight, rounded to two decimals.
    pub fn risk_score(&self, scores: &DimensionScores, tier: RiskTier) -> f64 {
        let parts = [
            1.0 - clamp_unit(scores.safety),
            1.0 - clamp_unit(scores.quality),
            1.0 - clamp_unit(scores.constitutional),
            self.tier_weight(tier),
        ];
        round2(parts.iter().sum::<f64>() / parts.len() as f64)
    }
}
