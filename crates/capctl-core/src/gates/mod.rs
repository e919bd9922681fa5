//! Gate evaluation.
//!
//! Automatic and conditional gates are pure functions of the scorecard, the
//! constitutional verdict and (for conditional gates) a telemetry sample.
//! Manual gates are resolved from approval events in [`approvals`].

pub mod approvals;

use chrono::{DateTime, Utc};

use crate::domain::constitution::ConstitutionalVerdict;
use crate::domain::policy::{
    ConstitutionalPolicy, GateCondition, GateSpec, GateType, PromotionCriteria,
};
use crate::domain::promotion::{GateResult, GateStatus, TelemetrySample};
use crate::domain::scorecard::CapabilityScorecard;

pub use approvals::{admit, tally, Tally};

/// Inputs available to automatic and conditional gates.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub scorecard: &'a CapabilityScorecard,
    pub criteria: &'a PromotionCriteria,
    pub constitutional: Option<&'a ConstitutionalVerdict>,
    pub constitutional_policy: &'a ConstitutionalPolicy,
    pub telemetry: Option<&'a TelemetrySample>,
}

fn at_least(name: &str, actual: f64, threshold: f64) -> Result<String, String> {
    if actual >= threshold {
        Ok(format!("{name}: {actual:.2} >= {threshold:.2}"))
    } else {
        Err(format!("{name}: {actual:.2} below {threshold:.2}"))
    }
}

/// Evaluate one condition. `Ok` carries a detail line, `Err` the failure.
pub fn check_condition(cond: &GateCondition, ctx: &GateContext<'_>) -> Result<String, String> {
    let scores = &ctx.scorecard.scores;
    let c = ctx.criteria;
    let name = cond.name();
    match cond {
        GateCondition::PerformanceThreshold { min } => {
            at_least(name, scores.performance, min.unwrap_or(c.min_performance))
        }
        GateCondition::SafetyThreshold { min } => {
            at_least(name, scores.safety, min.unwrap_or(c.min_safety))
        }
        GateCondition::QualityThreshold { min } => {
            at_least(name, scores.quality, min.unwrap_or(c.min_quality))
        }
        GateCondition::CostThreshold { min } => at_least(name, scores.cost, min.unwrap_or(c.min_cost)),
        GateCondition::OverallThreshold { min } => {
            at_least(name, ctx.scorecard.overall, min.unwrap_or(c.min_overall))
        }
        GateCondition::TestCoverage { min } => at_least(
            name,
            ctx.scorecard.metrics.test_coverage.unwrap_or(0.0),
            min.unwrap_or(c.min_test_coverage),
        ),
        GateCondition::MaxVulnerabilities { max } => {
            let limit = max.unwrap_or(c.max_vulnerabilities);
            let found = ctx.scorecard.metrics.vulnerabilities.total();
            if found <= limit {
                Ok(format!("{name}: {found} <= {limit}"))
            } else {
                Err(format!("{name}: {found} vulnerabilities exceed {limit}"))
            }
        }
        GateCondition::ConstitutionalApproval => {
            let policy = ctx.constitutional_policy;
            match ctx.constitutional {
                None => Err(format!("{name}: no constitutional verdict")),
                Some(v) if v.passes(policy.accept_conditional, policy.min_score) => Ok(format!(
                    "{name}: {} with score {:.2}",
                    v.verdict, v.overall_score
                )),
                Some(v) => Err(format!(
                    "{name}: {} with score {:.2} (min {:.2})",
                    v.verdict, v.overall_score, policy.min_score
                )),
            }
        }
        GateCondition::ErrorRateBelow { max } => telemetry(ctx, name, |s| {
            (s.error_rate < *max, format!("error rate {:.3} vs {max:.3}", s.error_rate))
        }),
        GateCondition::LatencyP95Below { max_ms } => telemetry(ctx, name, |s| {
            (
                s.latency_p95_ms < *max_ms,
                format!("p95 {:.0}ms vs {max_ms:.0}ms", s.latency_p95_ms),
            )
        }),
        GateCondition::SuccessRateAbove { min } => telemetry(ctx, name, |s| {
            (s.success_rate > *min, format!("success rate {:.3} vs {min:.3}", s.success_rate))
        }),
        GateCondition::ThroughputAbove { min } => telemetry(ctx, name, |s| {
            (
                s.throughput_rps > *min,
                format!("throughput {:.1} rps vs {min:.1}", s.throughput_rps),
            )
        }),
    }
}

fn telemetry<F>(ctx: &GateContext<'_>, name: &str, check: F) -> Result<String, String>
where
    F: FnOnce(&TelemetrySample) -> (bool, String),
{
    let Some(sample) = ctx.telemetry else {
        return Err(format!("{name}: no telemetry sample"));
    };
    let (ok, detail) = check(sample);
    if ok {
        Ok(format!("{name}: {detail}"))
    } else {
        Err(format!("{name}: {detail}"))
    }
}

/// Evaluate an automatic or conditional gate. All conditions must hold.
///
/// Every condition is checked so the result carries full details; the
/// reason names the first failure.
pub fn evaluate_gate(spec: &GateSpec, ctx: &GateContext<'_>, now: DateTime<Utc>) -> GateResult {
    debug_assert!(spec.gate_type != GateType::Manual);
    let mut details = Vec::with_capacity(spec.conditions.len());
    let mut first_failure = None;
    for cond in &spec.conditions {
        match check_condition(cond, ctx) {
            Ok(line) => details.push(line),
            Err(line) => {
                if first_failure.is_none() {
                    first_failure = Some(line.clone());
                }
                details.push(line);
            }
        }
    }
    GateResult {
        gate: spec.name.clone(),
        gate_type: spec.gate_type,
        status: if first_failure.is_some() {
            GateStatus::Rejected
        } else {
            GateStatus::Approved
        },
        reason: first_failure,
        details,
        evaluated_at: now,
    }
}

/// Result for a non-required gate that was not evaluated.
pub fn skipped(spec: &GateSpec, now: DateTime<Utc>) -> GateResult {
    GateResult {
        gate: spec.name.clone(),
        gate_type: spec.gate_type,
        status: GateStatus::Skipped,
        reason: Some("gate is not required".into()),
        details: Vec::new(),
        evaluated_at: now,
    }
}

/// Result for a manual gate once its tally is final.
pub fn manual_result(spec: &GateSpec, tally: &Tally, now: DateTime<Utc>) -> GateResult {
    GateResult {
        gate: spec.name.clone(),
        gate_type: GateType::Manual,
        status: tally.status,
        reason: tally.reason.clone(),
        details: vec![format!(
            "{}/{} approvals",
            tally.approvals, spec.min_approvals
        )],
        evaluated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::constitution::{CourtScores, Verdict};
    use crate::domain::scorecard::{DimensionScores, VulnerabilityCounts};

    fn card(score: f64) -> CapabilityScorecard {
        let mut c = CapabilityScorecard::empty("svc-a", "1.0.0", 30, Utc::now());
        c.scores = DimensionScores {
            performance: score,
            safety: score,
            quality: score,
            cost: score,
            constitutional: score,
        };
        c.overall = score;
        c.metrics.test_coverage = Some(score);
        c
    }

    fn verdict(v: Verdict, score: f64) -> ConstitutionalVerdict {
        ConstitutionalVerdict {
            courts: CourtScores {
                technical: score,
                ethical: score,
                operational: score,
            },
            overall_score: score,
            verdict: v,
            conditions: Vec::new(),
            violations: Vec::new(),
            audit_trail: Vec::new(),
            valid_until: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn test_automatic_gate_uses_policy_defaults() {
        let scorecard = card(0.85);
        let criteria = PromotionCriteria::uniform(0.7, 0.8, 0.7, 3);
        let policy = ConstitutionalPolicy::default();
        let ctx = GateContext {
            scorecard: &scorecard,
            criteria: &criteria,
            constitutional: None,
            constitutional_policy: &policy,
            telemetry: None,
        };
        let gate = GateSpec::automatic(
            "quality-checks",
            vec![
                GateCondition::OverallThreshold { min: None },
                GateCondition::TestCoverage { min: None },
                GateCondition::MaxVulnerabilities { max: None },
            ],
        );
        let r = evaluate_gate(&gate, &ctx, Utc::now());
        assert_eq!(r.status, GateStatus::Approved);
        assert_eq!(r.details.len(), 3);

        let strict = GateSpec::automatic(
            "strict",
            vec![GateCondition::PerformanceThreshold { min: Some(0.9) }],
        );
        let r = evaluate_gate(&strict, &ctx, Utc::now());
        assert_eq!(r.status, GateStatus::Rejected);
        assert!(r.reason.unwrap().contains("0.90"));
    }

    #[test]
    fn test_vulnerability_limit() {
        let mut scorecard = card(0.9);
        scorecard.metrics.vulnerabilities = VulnerabilityCounts {
            high: 2,
            ..Default::default()
        };
        let criteria = PromotionCriteria::uniform(0.7, 0.7, 0.7, 1);
        let policy = ConstitutionalPolicy::default();
        let ctx = GateContext {
            scorecard: &scorecard,
            criteria: &criteria,
            constitutional: None,
            constitutional_policy: &policy,
            telemetry: None,
        };
        assert!(check_condition(&GateCondition::MaxVulnerabilities { max: None }, &ctx).is_err());
        assert!(check_condition(&GateCondition::MaxVulnerabilities { max: Some(2) }, &ctx).is_ok());
    }

    #[test]
    fn test_constitutional_condition() {
        let scorecard = card(0.9);
        let criteria = PromotionCriteria::default();
        let policy = ConstitutionalPolicy {
            required: true,
            accept_conditional: false,
            min_score: 0.8,
        };
        let conditional = verdict(Verdict::Conditional, 0.9);
        let approved = verdict(Verdict::Approved, 0.9);
        let mut ctx = GateContext {
            scorecard: &scorecard,
            criteria: &criteria,
            constitutional: None,
            constitutional_policy: &policy,
            telemetry: None,
        };
        let cond = GateCondition::ConstitutionalApproval;
        assert!(check_condition(&cond, &ctx).is_err());
        ctx.constitutional = Some(&conditional);
        assert!(check_condition(&cond, &ctx).is_err());
        ctx.constitutional = Some(&approved);
        assert!(check_condition(&cond, &ctx).is_ok());
    }

    #[test]
    fn test_conditional_gate_needs_telemetry() {
        let scorecard = card(0.9);
        let criteria = PromotionCriteria::default();
        let policy = ConstitutionalPolicy::default();
        let gate = GateSpec::conditional(
            "runtime-health",
            vec![
                GateCondition::ErrorRateBelow { max: 0.05 },
                GateCondition::LatencyP95Below { max_ms: 500.0 },
            ],
        );
        let mut ctx = GateContext {
            scorecard: &scorecard,
            criteria: &criteria,
            constitutional: None,
            constitutional_policy: &policy,
            telemetry: None,
        };
        assert_eq!(evaluate_gate(&gate, &ctx, Utc::now()).status, GateStatus::Rejected);

        let healthy = TelemetrySample::healthy();
        ctx.telemetry = Some(&healthy);
        assert_eq!(evaluate_gate(&gate, &ctx, Utc::now()).status, GateStatus::Approved);

        let bad = TelemetrySample::degraded(0.2);
        ctx.telemetry = Some(&bad);
        let r = evaluate_gate(&gate, &ctx, Utc::now());
        assert_eq!(r.status, GateStatus::Rejected);
        assert!(r.reason.unwrap().starts_with("error_rate_below"));
    }
}
