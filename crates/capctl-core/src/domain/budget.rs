//! Cost-center budgets and per-promotion allocations.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Budget period label, e.g. `2026-10`.
pub fn period_of(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

/// Monthly budget for one cost center.
///
/// `used` never exceeds `total`; reservations that would push it past the
/// total are refused by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub cost_center: String,
    pub period: String,
    pub total: f64,
    pub used: f64,
    pub updated_at: DateTime<Utc>,
}

impl Budget {
    pub fn new(cost_center: impl Into<String>, total: f64, now: DateTime<Utc>) -> Self {
        Self {
            cost_center: cost_center.into(),
            period: period_of(now),
            total,
            used: 0.0,
            updated_at: now,
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.total - self.used).max(0.0)
    }

    pub fn store_key(&self) -> String {
        budget_key(&self.cost_center)
    }
}

pub fn budget_key(cost_center: &str) -> String {
    format!("budget/{cost_center}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationState {
    Reserved,
    Committed,
    Released,
}

/// Budget reserved for one capability's promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub id: String,
    pub cost_center: String,
    pub period: String,
    pub capability_id: String,
    pub execution_id: Option<String>,
    pub amount: f64,
    pub state: AllocationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BudgetAllocation {
    pub fn store_key(&self) -> String {
        allocation_key(&self.id)
    }

    /// Whether the allocation still counts against its budget.
    pub fn is_charged(&self) -> bool {
        matches!(self.state, AllocationState::Reserved | AllocationState::Committed)
    }
}

pub fn allocation_key(id: &str) -> String {
    format!("allocation/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_period_label() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(period_of(at), "2026-03");
    }

    #[test]
    fn test_remaining_never_negative() {
        let mut b = Budget::new("team-x", 100.0, Utc::now());
        b.used = 150.0;
        assert_eq!(b.remaining(), 0.0);
        b.used = 40.0;
        assert_eq!(b.remaining(), 60.0);
    }
}
