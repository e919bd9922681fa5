//! Error types for rollout execution.

/// Errors produced while shifting traffic through rollout phases.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RolloutError {
    #[error("phase {phase} at {traffic_percent}% failed: {}", .issues.join("; "))]
    PhaseFailed {
        phase: usize,
        traffic_percent: u32,
        issues: Vec<String>,
    },

    #[error("rollout cancelled at {traffic_percent}%")]
    Cancelled { traffic_percent: u32 },

    #[error("traffic routing failed: {0}")]
    Traffic(String),

    #[error("telemetry unavailable: {0}")]
    Telemetry(String),

    #[error("invalid rollout config: {0}")]
    InvalidConfig(String),
}

/// Result type for rollout operations.
pub type RolloutResult<T> = std::result::Result<T, RolloutError>;
