//! Phase planning and per-phase success checks.

use crate::domain::policy::{RolloutConfig, RolloutStrategy, SuccessCriteria};
use crate::domain::promotion::TelemetrySample;
use crate::rollout::error::{RolloutError, RolloutResult};

pub const DEFAULT_BLUE_GREEN_PHASES: [u32; 2] = [0, 100];
pub const DEFAULT_ROLLING_PHASES: [u32; 4] = [25, 50, 75, 100];
pub const DEFAULT_IMMEDIATE_PHASES: [u32; 1] = [100];

/// Traffic percentages for each phase, in order.
pub fn plan_phases(config: &RolloutConfig) -> RolloutResult<Vec<u32>> {
    let phases = match config.strategy {
        RolloutStrategy::Canary => canary_phases(
            config.initial_percent,
            config.increment_percent,
            config.max_percent,
        )?,
        RolloutStrategy::BlueGreen => config
            .phases
            .clone()
            .unwrap_or_else(|| DEFAULT_BLUE_GREEN_PHASES.to_vec()),
        RolloutStrategy::Rolling => config
            .phases
            .clone()
            .unwrap_or_else(|| DEFAULT_ROLLING_PHASES.to_vec()),
        RolloutStrategy::Immediate => config
            .phases
            .clone()
            .unwrap_or_else(|| DEFAULT_IMMEDIATE_PHASES.to_vec()),
    };
    if phases.is_empty() {
        return Err(RolloutError::InvalidConfig(format!(
            "{} rollout has no phases",
            config.strategy
        )));
    }
    if let Some(p) = phases.iter().find(|p| **p > 100) {
        return Err(RolloutError::InvalidConfig(format!(
            "phase traffic {p}% exceeds 100%"
        )));
    }
    Ok(phases)
}

/// Canary steps from `initial` by `increment`, clamped to `max`.
pub fn canary_phases(initial: u32, increment: u32, max: u32) -> RolloutResult<Vec<u32>> {
    if increment == 0 {
        return Err(RolloutError::InvalidConfig(
            "canary increment must be positive".into(),
        ));
    }
    if max == 0 || max > 100 {
        return Err(RolloutError::InvalidConfig(format!(
            "canary max percent must be within 1..=100, got {max}"
        )));
    }
    if initial == 0 || initial > max {
        return Err(RolloutError::InvalidConfig(format!(
            "canary initial percent must be within 1..={max}, got {initial}"
        )));
    }
    let mut phases = Vec::new();
    let mut current = initial;
    loop {
        phases.push(current.min(max));
        if current >= max {
            break;
        }
        current = current.saturating_add(increment);
    }
    Ok(phases)
}

/// Issues with `sample` under `criteria`; empty means the phase passed.
pub fn check_sample(criteria: &SuccessCriteria, sample: &TelemetrySample) -> Vec<String> {
    let mut issues = Vec::new();
    if sample.success_rate < criteria.min_success_rate {
        issues.push(format!(
            "success rate {:.3} below {:.3}",
            sample.success_rate, criteria.min_success_rate
        ));
    }
    if sample.error_rate > criteria.max_error_rate {
        issues.push(format!(
            "error rate {:.3} above {:.3}",
            sample.error_rate, criteria.max_error_rate
        ));
    }
    if sample.latency_p95_ms > criteria.max_latency_p95_ms {
        issues.push(format!(
            "p95 latency {:.0}ms above {:.0}ms",
            sample.latency_p95_ms, criteria.max_latency_p95_ms
        ));
    }
    if let Some(min) = criteria.min_throughput_rps {
        if sample.throughput_rps < min {
            issues.push(format!(
                "throughput {:.1} rps below {min:.1}",
                sample.throughput_rps
            ));
        }
    }
    if criteria.require_constitutional && !sample.constitutional_pass {
        issues.push("constitutional runtime check failed".into());
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canary_five_by_five_has_twenty_phases() {
        let phases = plan_phases(&RolloutConfig::canary(5, 5, 100)).unwrap();
        assert_eq!(phases.len(), 20);
        assert_eq!(phases.first(), Some(&5));
        assert_eq!(phases.last(), Some(&100));
    }

    #[test]
    fn test_canary_clamps_to_max() {
        assert_eq!(canary_phases(10, 30, 100).unwrap(), vec![10, 40, 70, 100]);
        assert_eq!(canary_phases(1, 4, 10).unwrap(), vec![1, 5, 9, 10]);
        assert_eq!(canary_phases(50, 10, 50).unwrap(), vec![50]);
    }

    #[test]
    fn test_canary_rejects_bad_params() {
        assert!(canary_phases(5, 0, 100).is_err());
        assert!(canary_phases(0, 5, 100).is_err());
        assert!(canary_phases(60, 5, 50).is_err());
        assert!(canary_phases(5, 5, 101).is_err());
    }

    #[test]
    fn test_default_phase_lists() {
        let bg = plan_phases(&RolloutConfig::with_strategy(RolloutStrategy::BlueGreen)).unwrap();
        assert_eq!(bg, vec![0, 100]);
        let rolling = plan_phases(&RolloutConfig::with_strategy(RolloutStrategy::Rolling)).unwrap();
        assert_eq!(rolling, vec![25, 50, 75, 100]);
        let now = plan_phases(&RolloutConfig::with_strategy(RolloutStrategy::Immediate)).unwrap();
        assert_eq!(now, vec![100]);

        let mut custom = RolloutConfig::with_strategy(RolloutStrategy::Rolling);
        custom.phases = Some(vec![]);
        assert!(plan_phases(&custom).is_err());
    }

    #[test]
    fn test_check_sample() {
        let criteria = SuccessCriteria::default();
        assert!(check_sample(&criteria, &TelemetrySample::healthy()).is_empty());
        let issues = check_sample(&criteria, &TelemetrySample::degraded(0.2));
        assert_eq!(issues.len(), 2);

        let strict = SuccessCriteria {
            min_throughput_rps: Some(1000.0),
            require_constitutional: true,
            ..SuccessCriteria::default()
        };
        let mut sample = TelemetrySample::healthy();
        sample.constitutional_pass = false;
        assert_eq!(check_sample(&strict, &sample).len(), 2);
    }
}
