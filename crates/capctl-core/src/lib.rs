//! capctl core library
//!
//! Capability registry, scorecards, promotion engine, gates, phased rollout
//! and the control plane that schedules them.

pub mod config;
pub mod constitutional;
pub mod control_plane;
pub mod domain;
pub mod gates;
pub mod metrics;
pub mod obs;
pub mod promotion;
pub mod registry;
pub mod rollout;
pub mod scheduler;
pub mod scorecard;
pub mod telemetry;

pub use config::{
    ControlPlaneConfig, LoggingConfig, MaintenanceConfig, SchedulerConfig, ScorecardConfig,
    StoreBackend, StoreConfig, ValidatorConfig,
};

pub use constitutional::{
    ConstitutionalService, ConstitutionalValidator, HttpConstitutionalValidator,
    StaticConstitutionalValidator,
};

pub use control_plane::{ControlPlane, ControlPlaneBuilder, ControlPlaneStats, HydrateReport};

pub use domain::{
    Approval, ApprovalDecision, Capability, CapabilityManifest, CapabilityScorecard,
    CapabilityStatus, CapctlError, ConstitutionalVerdict, Dimension, ExecutionStatus, GateSpec,
    GateStatus, GateType, Grade, PolicySet, PromotionExecution, PromotionPolicy, PromotionRequest,
    RegistrationRequest, RegistrationResult, RegistrationStatus, Result, RiskTier,
    RolloutStrategy, ScoringModel, Stage, TelemetrySample, Verdict,
};

pub use metrics::{MetricsSnapshot, METRICS};

pub use promotion::{
    BudgetLedger, DriveOutcome, ExecutionBook, ExecutionFilter, PolicyRegistry, PromotionEngine,
    PromotionWorker, DEFAULT_COST_CENTER,
};

pub use registry::{CapabilityFilter, CapabilityRegistry, CompatibilityEntry, QueryResult};

pub use rollout::{
    InMemoryTrafficController, RolloutError, RolloutOrchestrator, ScriptedTelemetrySource,
    TelemetrySource, TrafficController,
};

pub use scheduler::{PromotionQueue, Scheduler};

pub use scorecard::{ScorecardEvaluator, SignalSnapshot, SignalSource, StaticSignalSource};

pub use telemetry::init_tracing;
