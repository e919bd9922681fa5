//! Promotion criteria evaluation.

use crate::domain::error::{CapctlError, Result};
use crate::domain::policy::PromotionCriteria;
use crate::domain::scorecard::CapabilityScorecard;

fn below(metric: &str, label: &str, actual: f64, threshold: f64) -> CapctlError {
    CapctlError::CriteriaNotMet {
        metric: metric.to_string(),
        actual,
        threshold,
        message: format!("{label} {actual:.2} below threshold {threshold:.2}"),
    }
}

/// Check `card` against `criteria` in a fixed order; the first miss wins.
///
/// Order: performance, safety, quality, cost, constitutional, overall,
/// test coverage, vulnerabilities.
pub fn evaluate(criteria: &PromotionCriteria, card: &CapabilityScorecard) -> Result<()> {
    let s = &card.scores;
    let checks = [
        ("performance", "performance score", s.performance, criteria.min_performance),
        ("safety", "safety score", s.safety, criteria.min_safety),
        ("quality", "quality score", s.quality, criteria.min_quality),
        ("cost", "cost score", s.cost, criteria.min_cost),
        (
            "constitutional",
            "constitutional score",
            s.constitutional,
            criteria.min_constitutional,
        ),
        ("overall", "overall score", card.overall, criteria.min_overall),
        (
            "test_coverage",
            "test coverage",
            card.metrics.test_coverage.unwrap_or(0.0),
            criteria.min_test_coverage,
        ),
    ];
    for (metric, label, actual, threshold) in checks {
        if actual < threshold {
            return Err(below(metric, label, actual, threshold));
        }
    }

    let vulns = card.metrics.vulnerabilities.total();
    if vulns > criteria.max_vulnerabilities {
        return Err(CapctlError::CriteriaNotMet {
            metric: "vulnerabilities".into(),
            actual: vulns as f64,
            threshold: criteria.max_vulnerabilities as f64,
            message: format!(
                "vulnerabilities {vulns} exceed maximum {}",
                criteria.max_vulnerabilities
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::scorecard::{DimensionScores, VulnerabilityCounts};
    use chrono::Utc;

    fn card(performance: f64, rest: f64) -> CapabilityScorecard {
        let mut c = CapabilityScorecard::empty("svc-b", "2.0.0", 30, Utc::now());
        c.scores = DimensionScores {
            performance,
            safety: rest,
            quality: rest,
            cost: rest,
            constitutional: rest,
        };
        c.overall = rest;
        c.metrics.test_coverage = Some(rest);
        c
    }

    #[test]
    fn test_first_failure_is_reported() {
        let criteria = PromotionCriteria::uniform(0.9, 0.9, 0.8, 0);
        let err = evaluate(&criteria, &card(0.60, 0.5)).unwrap_err();
        match &err {
            CapctlError::CriteriaNotMet {
                metric,
                actual,
                threshold,
                ..
            } => {
                assert_eq!(metric, "performance");
                assert_eq!(*actual, 0.60);
                assert_eq!(*threshold, 0.9);
            }
            other => panic!("expected criteria failure, got {other:?}"),
        }
        let msg = err.to_string();
        assert!(msg.contains("performance"));
        assert!(msg.contains("0.60"));
        assert!(msg.contains("0.90"));
    }

    #[test]
    fn test_all_met() {
        let criteria = PromotionCriteria::uniform(0.6, 0.7, 0.6, 10);
        assert!(evaluate(&criteria, &card(0.85, 0.85)).is_ok());
    }

    #[test]
    fn test_missing_coverage_counts_as_zero() {
        let criteria = PromotionCriteria::uniform(0.6, 0.7, 0.6, 10);
        let mut c = card(0.85, 0.85);
        c.metrics.test_coverage = None;
        let err = evaluate(&criteria, &c).unwrap_err();
        assert!(err.to_string().contains("test coverage"));
    }

    #[test]
    fn test_vulnerabilities_checked_last() {
        let criteria = PromotionCriteria::uniform(0.6, 0.7, 0.6, 1);
        let mut c = card(0.85, 0.85);
        c.metrics.vulnerabilities = VulnerabilityCounts {
            medium: 2,
            ..Default::default()
        };
        match evaluate(&criteria, &c).unwrap_err() {
            CapctlError::CriteriaNotMet { metric, .. } => assert_eq!(metric, "vulnerabilities"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
