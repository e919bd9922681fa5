//! Domain types for the capability control plane.

pub mod budget;
pub mod capability;
pub mod constitution;
pub mod digest;
pub mod error;
pub mod policy;
pub mod promotion;
pub mod scorecard;
pub mod scoring;
pub mod semver;

pub use budget::{AllocationState, Budget, BudgetAllocation};
pub use capability::{
    Capability, CapabilityManifest, CapabilityStatus, PromotionRecord, RegistrationRequest,
    RegistrationResult, RegistrationStatus, RiskTier,
};
pub use constitution::{
    ConstitutionalVerdict, CourtScores, ValidationAction, ValidationRequest, Verdict,
};
pub use error::{CapctlError, Result};
pub use policy::{
    BudgetPolicy, ConstitutionalPolicy, GateCondition, GateSpec, GateType, PolicySet,
    PromotionCriteria, PromotionPolicy, RolloutConfig, RolloutStrategy, SuccessCriteria,
};
pub use promotion::{
    Approval, ApprovalDecision, ExecutionStatus, GateResult, GateStatus, PhaseRecord,
    PromotionExecution, PromotionRequest, RolloutProgress, RolloutState, Stage, TelemetrySample,
};
pub use scorecard::{
    CapabilityScorecard, Dimension, DimensionScores, Grade, RawMetrics, Trend,
    VulnerabilityCounts,
};
pub use scoring::ScoringModel;
pub use semver::Semver;
