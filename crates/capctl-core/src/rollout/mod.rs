//! Phased rollout: strategies, traffic/telemetry integration points and the
//! orchestrator that drives phases with rollback.

pub mod error;
pub mod orchestrator;
pub mod strategy;
pub mod traffic;

pub use error::{RolloutError, RolloutResult};
pub use orchestrator::{cancellable_wait, RolloutOrchestrator, RolloutReport, RolloutTarget};
pub use strategy::{canary_phases, check_sample, plan_phases};
pub use traffic::{
    InMemoryTrafficController, ScriptedTelemetrySource, TelemetrySource, TrafficController,
};
