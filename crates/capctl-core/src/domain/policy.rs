//! Promotion policies: criteria, gate lists, rollout and budget settings.
//!
//! Policies are read-mostly. An execution snapshots its policy at request
//! time, so a hot reload never changes a promotion that is already in flight.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::capability::RiskTier;
use crate::domain::error::{CapctlError, Result};

/// Largest duration, in seconds, that timestamps can be offset by.
pub const MAX_DURATION_SECS: u64 = i64::MAX as u64 / 1000;

fn default_true() -> bool {
    true
}

/// Minimum scores and hard limits a capability must meet before promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionCriteria {
    pub min_performance: f64,
    pub min_safety: f64,
    pub min_quality: f64,
    pub min_cost: f64,
    pub min_constitutional: f64,
    pub min_overall: f64,
    pub min_test_coverage: f64,
    pub max_vulnerabilities: u32,
}

impl Default for PromotionCriteria {
    fn default() -> Self {
        Self::uniform(0.7, 0.7, 0.7, 5)
    }
}

impl PromotionCriteria {
    /// Same floor on every dimension.
    pub fn uniform(dimension_floor: f64, overall: f64, coverage: f64, max_vulns: u32) -> Self {
        Self {
            min_performance: dimension_floor,
            min_safety: dimension_floor,
            min_quality: dimension_floor,
            min_cost: dimension_floor,
            min_constitutional: dimension_floor,
            min_overall: overall,
            min_test_coverage: coverage,
            max_vulnerabilities: max_vulns,
        }
    }

    fn unit_fields(&self) -> [(&'static str, f64); 7] {
        [
            ("min_performance", self.min_performance),
            ("min_safety", self.min_safety),
            ("min_quality", self.min_quality),
            ("min_cost", self.min_cost),
            ("min_constitutional", self.min_constitutional),
            ("min_overall", self.min_overall),
            ("min_test_coverage", self.min_test_coverage),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    Automatic,
    Manual,
    Conditional,
}

impl std::fmt::Display for GateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::Manual => write!(f, "manual"),
            Self::Conditional => write!(f, "conditional"),
        }
    }
}

/// A named boolean condition checked by automatic and conditional gates.
///
/// Score thresholds fall back to the policy criteria when `min`/`max` is
/// omitted. Telemetry conditions only make sense on conditional gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum GateCondition {
    PerformanceThreshold { min: Option<f64> },
    SafetyThreshold { min: Option<f64> },
    QualityThreshold { min: Option<f64> },
    CostThreshold { min: Option<f64> },
    OverallThreshold { min: Option<f64> },
    ConstitutionalApproval,
    TestCoverage { min: Option<f64> },
    MaxVulnerabilities { max: Option<u32> },
    ErrorRateBelow { max: f64 },
    LatencyP95Below { max_ms: f64 },
    SuccessRateAbove { min: f64 },
    ThroughputAbove { min: f64 },
}

impl GateCondition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PerformanceThreshold { .. } => "performance_threshold",
            Self::SafetyThreshold { .. } => "safety_threshold",
            Self::QualityThreshold { .. } => "quality_threshold",
            Self::CostThreshold { .. } => "cost_threshold",
            Self::OverallThreshold { .. } => "overall_threshold",
            Self::ConstitutionalApproval => "constitutional_approval",
            Self::TestCoverage { .. } => "test_coverage",
            Self::MaxVulnerabilities { .. } => "max_vulnerabilities",
            Self::ErrorRateBelow { .. } => "error_rate_below",
            Self::LatencyP95Below { .. } => "latency_p95_below",
            Self::SuccessRateAbove { .. } => "success_rate_above",
            Self::ThroughputAbove { .. } => "throughput_above",
        }
    }

    pub fn is_telemetry(&self) -> bool {
        matches!(
            self,
            Self::ErrorRateBelow { .. }
                | Self::LatencyP95Below { .. }
                | Self::SuccessRateAbove { .. }
                | Self::ThroughputAbove { .. }
        )
    }

    fn unit_threshold(&self) -> Option<f64> {
        match self {
            Self::PerformanceThreshold { min }
            | Self::SafetyThreshold { min }
            | Self::QualityThreshold { min }
            | Self::CostThreshold { min }
            | Self::OverallThreshold { min }
            | Self::TestCoverage { min } => *min,
            Self::ErrorRateBelow { max } => Some(*max),
            Self::SuccessRateAbove { min } => Some(*min),
            _ => None,
        }
    }
}

/// One checkpoint in a policy's ordered gate list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub gate_type: GateType,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub conditions: Vec<GateCondition>,
    /// Distinct approvers needed by a manual gate.
    #[serde(default = "GateSpec::default_min_approvals")]
    pub min_approvals: u32,
    /// Allowed approvers; empty means anyone.
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default = "GateSpec::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl GateSpec {
    fn default_min_approvals() -> u32 {
        1
    }

    fn default_timeout_secs() -> u64 {
        24 * 60 * 60
    }

    pub fn automatic(name: impl Into<String>, conditions: Vec<GateCondition>) -> Self {
        Self {
            name: name.into(),
            gate_type: GateType::Automatic,
            required: true,
            conditions,
            min_approvals: Self::default_min_approvals(),
            approvers: Vec::new(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }

    pub fn manual(name: impl Into<String>, min_approvals: u32) -> Self {
        Self {
            gate_type: GateType::Manual,
            min_approvals,
            ..Self::automatic(name, Vec::new())
        }
    }

    pub fn conditional(name: impl Into<String>, conditions: Vec<GateCondition>) -> Self {
        Self {
            gate_type: GateType::Conditional,
            ..Self::automatic(name, conditions)
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_approvers(mut self, approvers: &[&str]) -> Self {
        self.approvers = approvers.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStrategy {
    #[default]
    Canary,
    BlueGreen,
    Rolling,
    Immediate,
}

impl std::fmt::Display for RolloutStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Canary => write!(f, "canary"),
            Self::BlueGreen => write!(f, "blue_green"),
            Self::Rolling => write!(f, "rolling"),
            Self::Immediate => write!(f, "immediate"),
        }
    }
}

/// Per-phase health requirements during rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuccessCriteria {
    pub min_success_rate: f64,
    pub max_error_rate: f64,
    pub max_latency_p95_ms: f64,
    pub min_throughput_rps: Option<f64>,
    pub require_constitutional: bool,
}

impl Default for SuccessCriteria {
    fn default() -> Self {
        Self {
            min_success_rate: 0.99,
            max_error_rate: 0.01,
            max_latency_p95_ms: 500.0,
            min_throughput_rps: None,
            require_constitutional: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    pub strategy: RolloutStrategy,
    pub initial_percent: u32,
    pub increment_percent: u32,
    pub max_percent: u32,
    pub monitoring_interval_secs: u64,
    /// Explicit phase list for blue-green / rolling / immediate.
    pub phases: Option<Vec<u32>>,
    pub success: SuccessCriteria,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            strategy: RolloutStrategy::Canary,
            initial_percent: 5,
            increment_percent: 5,
            max_percent: 100,
            monitoring_interval_secs: 60,
            phases: None,
            success: SuccessCriteria::default(),
        }
    }
}

impl RolloutConfig {
    pub fn canary(initial: u32, increment: u32, max: u32) -> Self {
        Self {
            strategy: RolloutStrategy::Canary,
            initial_percent: initial,
            increment_percent: increment,
            max_percent: max,
            ..Self::default()
        }
    }

    pub fn with_strategy(strategy: RolloutStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.monitoring_interval_secs = secs;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetPolicy {
    pub enforce: bool,
    /// Remaining budget required before a promotion may start.
    pub monthly_cap: f64,
    /// Amount reserved per promotion.
    pub estimated_cost: f64,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            enforce: false,
            monthly_cap: 0.0,
            estimated_cost: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstitutionalPolicy {
    pub required: bool,
    pub accept_conditional: bool,
    pub min_score: f64,
}

/// A promotion policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionPolicy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tier: RiskTier,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub criteria: PromotionCriteria,
    #[serde(default)]
    pub gates: Vec<GateSpec>,
    #[serde(default)]
    pub rollout: RolloutConfig,
    #[serde(default)]
    pub budget: BudgetPolicy,
    #[serde(default)]
    pub constitutional: ConstitutionalPolicy,
}

impl PromotionPolicy {
    pub fn store_key(&self) -> String {
        format!("policy/{}", self.id)
    }

    /// Reject policies that cannot be evaluated consistently.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(CapctlError::Config(format!("policy {}: {msg}", self.id)));

        if self.id.trim().is_empty() || self.id.contains('/') {
            return Err(CapctlError::Config(format!(
                "policy id {:?} must be a non-empty key segment",
                self.id
            )));
        }
        for (field, value) in self.criteria.unit_fields() {
            if !(0.0..=1.0).contains(&value) {
                return fail(format!("{field} = {value} is outside [0, 1]"));
            }
        }
        if !(0.0..=1.0).contains(&self.constitutional.min_score) {
            return fail(format!(
                "constitutional.min_score = {} is outside [0, 1]",
                self.constitutional.min_score
            ));
        }

        let mut names = HashSet::new();
        for gate in &self.gates {
            if gate.name.trim().is_empty() {
                return fail("gate names must not be empty".into());
            }
            if !names.insert(gate.name.as_str()) {
                return fail(format!("duplicate gate name {}", gate.name));
            }
            if gate.timeout_secs > MAX_DURATION_SECS {
                return fail(format!(
                    "gate {} timeout_secs {} exceeds {MAX_DURATION_SECS}",
                    gate.name, gate.timeout_secs
                ));
            }
            if gate.gate_type == GateType::Manual {
                if gate.min_approvals == 0 {
                    return fail(format!("manual gate {} needs min_approvals >= 1", gate.name));
                }
                if !gate.approvers.is_empty() && (gate.approvers.len() as u32) < gate.min_approvals
                {
                    return fail(format!(
                        "manual gate {} allows {} approvers but needs {}",
                        gate.name,
                        gate.approvers.len(),
                        gate.min_approvals
                    ));
                }
            }
            for cond in &gate.conditions {
                if cond.is_telemetry() && gate.gate_type != GateType::Conditional {
                    return fail(format!(
                        "gate {}: {} is only valid on conditional gates",
                        gate.name,
                        cond.name()
                    ));
                }
                if let Some(t) = cond.unit_threshold() {
                    if !(0.0..=1.0).contains(&t) {
                        return fail(format!(
                            "gate {}: {} threshold {t} is outside [0, 1]",
                            gate.name,
                            cond.name()
                        ));
                    }
                }
            }
        }

        let r = &self.rollout;
        if r.strategy == RolloutStrategy::Canary {
            if r.max_percent == 0 || r.max_percent > 100 {
                return fail(format!("canary max_percent {} must be in 1..=100", r.max_percent));
            }
            if r.initial_percent == 0 || r.initial_percent > r.max_percent {
                return fail(format!(
                    "canary initial_percent {} must be in 1..={}",
                    r.initial_percent, r.max_percent
                ));
            }
            if r.increment_percent == 0 {
                return fail("canary increment_percent must be positive".into());
            }
        }
        if let Some(phases) = &r.phases {
            if phases.is_empty() {
                return fail("rollout phase list must not be empty".into());
            }
            if phases.iter().any(|p| *p > 100) {
                return fail("rollout phases must be percentages in 0..=100".into());
            }
            if phases.windows(2).any(|w| w[0] > w[1]) {
                return fail("rollout phases must be non-decreasing".into());
            }
        }
        let s = &r.success;
        for (field, value) in [
            ("min_success_rate", s.min_success_rate),
            ("max_error_rate", s.max_error_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return fail(format!("rollout.success.{field} = {value} is outside [0, 1]"));
            }
        }

        for (field, value) in [
            ("monthly_cap", self.budget.monthly_cap),
            ("estimated_cost", self.budget.estimated_cost),
        ] {
            if !value.is_finite() || value < 0.0 {
                return fail(format!("budget.{field} = {value} must be a non-negative number"));
            }
        }
        Ok(())
    }
}

/// A validated collection of policies keyed by ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicySet {
    policies: BTreeMap<String, PromotionPolicy>,
}

impl PolicySet {
    pub fn from_policies(policies: Vec<PromotionPolicy>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for policy in policies {
            policy.validate()?;
            if map.contains_key(&policy.id) {
                return Err(CapctlError::Config(format!(
                    "duplicate policy id {}",
                    policy.id
                )));
            }
            map.insert(policy.id.clone(), policy);
        }
        Ok(Self { policies: map })
    }

    pub fn get(&self, id: &str) -> Option<&PromotionPolicy> {
        self.policies.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PromotionPolicy> {
        self.policies.values()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn into_policies(self) -> Vec<PromotionPolicy> {
        self.policies.into_values().collect()
    }

    /// Built-in tiers: `low`, `medium`, `high`, `critical`.
    pub fn standard() -> Self {
        let quality_checks = || {
            GateSpec::automatic(
                "quality-checks",
                vec![
                    GateCondition::OverallThreshold { min: None },
                    GateCondition::TestCoverage { min: None },
                    GateCondition::MaxVulnerabilities { max: None },
                ],
            )
        };
        let runtime_health = || {
            GateSpec::conditional(
                "runtime-health",
                vec![
                    GateCondition::ErrorRateBelow { max: 0.05 },
                    GateCondition::LatencyP95Below { max_ms: 500.0 },
                ],
            )
        };

        let low = PromotionPolicy {
            id: "low".into(),
            name: "Low risk".into(),
            description: "Automatic checks, immediate rollout".into(),
            tier: RiskTier::Low,
            active: true,
            criteria: PromotionCriteria::uniform(0.60, 0.70, 0.60, 10),
            gates: vec![quality_checks()],
            rollout: RolloutConfig::with_strategy(RolloutStrategy::Immediate)
                .with_interval_secs(30),
            budget: BudgetPolicy::default(),
            constitutional: ConstitutionalPolicy::default(),
        };

        let medium = PromotionPolicy {
            id: "medium".into(),
            name: "Medium risk".into(),
            description: "Automatic and runtime checks, gradual canary".into(),
            tier: RiskTier::Medium,
            active: true,
            criteria: PromotionCriteria::uniform(0.70, 0.80, 0.70, 3),
            gates: vec![quality_checks(), runtime_health()],
            rollout: RolloutConfig::canary(10, 30, 100).with_interval_secs(120),
            budget: BudgetPolicy {
                enforce: true,
                monthly_cap: 1000.0,
                estimated_cost: 50.0,
            },
            constitutional: ConstitutionalPolicy::default(),
        };

        let high = PromotionPolicy {
            id: "high".into(),
            name: "High risk".into(),
            description: "Human approval and constitutional review, slow canary".into(),
            tier: RiskTier::High,
            active: true,
            criteria: PromotionCriteria::uniform(0.90, 0.90, 0.80, 0),
            gates: vec![
                quality_checks(),
                GateSpec::manual("release-approval", 1),
                runtime_health(),
            ],
            rollout: RolloutConfig::canary(5, 5, 100).with_interval_secs(300),
            budget: BudgetPolicy {
                enforce: true,
                monthly_cap: 5000.0,
                estimated_cost: 200.0,
            },
            constitutional: ConstitutionalPolicy {
                required: true,
                accept_conditional: true,
                min_score: 0.70,
            },
        };

        let critical = PromotionPolicy {
            id: "critical".into(),
            name: "Critical".into(),
            description: "Two approvers, strict constitutional review, minimal canary steps"
                .into(),
            tier: RiskTier::Critical,
            active: true,
            criteria: PromotionCriteria::uniform(0.95, 0.95, 0.90, 0),
            gates: vec![
                quality_checks(),
                GateSpec::automatic(
                    "constitutional-review",
                    vec![GateCondition::ConstitutionalApproval],
                ),
                GateSpec::manual("release-approval", 2).with_timeout_secs(48 * 60 * 60),
                runtime_health(),
            ],
            rollout: RolloutConfig {
                success: SuccessCriteria {
                    require_constitutional: true,
                    ..SuccessCriteria::default()
                },
                ..RolloutConfig::canary(1, 4, 100).with_interval_secs(600)
            },
            budget: BudgetPolicy {
                enforce: true,
                monthly_cap: 10000.0,
                estimated_cost: 500.0,
            },
            constitutional: ConstitutionalPolicy {
                required: true,
                accept_conditional: false,
                min_score: 0.85,
            },
        };

        let mut policies = BTreeMap::new();
        for p in [low, medium, high, critical] {
            policies.insert(p.id.clone(), p);
        }
        Self { policies }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_policies_validate() {
        let set = PolicySet::standard();
        assert_eq!(set.len(), 4);
        for p in set.iter() {
            p.validate().unwrap();
        }
        assert_eq!(set.get("high").unwrap().criteria.min_performance, 0.90);
        assert!(set.get("low").unwrap().gates.iter().all(|g| g.gate_type != GateType::Manual));
    }

    #[test]
    fn test_duplicate_gate_names_rejected() {
        let mut p = PolicySet::standard().get("low").unwrap().clone();
        p.gates.push(p.gates[0].clone());
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate gate name"));
    }

    #[test]
    fn test_out_of_range_score_rejected() {
        let mut p = PolicySet::standard().get("medium").unwrap().clone();
        p.criteria.min_quality = 1.5;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_invalid_canary_rejected() {
        let mut p = PolicySet::standard().get("high").unwrap().clone();
        p.rollout.increment_percent = 0;
        assert!(p.validate().is_err());
        p.rollout = RolloutConfig::canary(50, 5, 20);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_telemetry_condition_only_on_conditional_gate() {
        let mut p = PolicySet::standard().get("low").unwrap().clone();
        p.gates[0]
            .conditions
            .push(GateCondition::ErrorRateBelow { max: 0.1 });
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_gate_timeout_bounded() {
        let mut p = PolicySet::standard().get("high").unwrap().clone();
        let manual = p
            .gates
            .iter()
            .position(|g| g.gate_type == GateType::Manual)
            .unwrap();
        p.gates[manual].timeout_secs = MAX_DURATION_SECS;
        p.validate().unwrap();
        p.gates[manual].timeout_secs = u64::MAX;
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn test_budget_amounts_must_be_finite() {
        let base = PolicySet::standard().get("low").unwrap().clone();
        for bad in [f64::NAN, f64::INFINITY, -1.0] {
            let mut p = base.clone();
            p.budget.monthly_cap = bad;
            assert!(p.validate().is_err(), "monthly_cap {bad} accepted");
            let mut p = base.clone();
            p.budget.estimated_cost = bad;
            assert!(p.validate().is_err(), "estimated_cost {bad} accepted");
        }
    }

    #[test]
    fn test_duplicate_policy_ids_rejected() {
        let low = PolicySet::standard().get("low").unwrap().clone();
        assert!(PolicySet::from_policies(vec![low.clone(), low]).is_err());
    }

    #[test]
    fn test_gate_condition_wire_format() {
        let json = serde_json::json!({"condition": "test_coverage", "min": 0.8});
        let cond: GateCondition = serde_json::from_value(json).unwrap();
        assert_eq!(cond, GateCondition::TestCoverage { min: Some(0.8) });
        let json = serde_json::json!({"condition": "overall_threshold"});
        let cond: GateCondition = serde_json::from_value(json).unwrap();
        assert_eq!(cond, GateCondition::OverallThreshold { min: None });
    }
}
