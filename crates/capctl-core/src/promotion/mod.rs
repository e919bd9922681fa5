//! Promotion pipeline: intake checks, budgets, policies, executions and the
//! worker that drives gates and rollout.

pub mod budget;
pub mod criteria;
pub mod engine;
pub mod executions;
pub mod policies;
pub mod worker;

pub use budget::BudgetLedger;
pub use engine::{PromotionEngine, DEFAULT_COST_CENTER};
pub use executions::{ExecutionBook, ExecutionFilter};
pub use policies::{load_policy_file, parse_policies, PolicyRegistry};
pub use worker::{DriveOutcome, PromotionWorker};
