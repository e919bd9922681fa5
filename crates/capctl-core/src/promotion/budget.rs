//! Cost-center budget ledger.
//!
//! Reserving an allocation adds to `used`; releasing subtracts it again;
//! committing leaves `used` unchanged. `reconcile` recomputes `used` from the
//! charged allocations of the current period.

use std::collections::HashMap;
use std::sync::Arc;

use capctl_state::CapabilityStore;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::budget::{period_of, AllocationState, Budget, BudgetAllocation};
use crate::domain::error::{CapctlError, Result};
use crate::obs;

pub struct BudgetLedger {
    store: Arc<dyn CapabilityStore>,
    budgets: RwLock<HashMap<String, Budget>>,
    allocations: RwLock<HashMap<String, BudgetAllocation>>,
}

impl BudgetLedger {
    pub fn new(store: Arc<dyn CapabilityStore>) -> Self {
        Self {
            store,
            budgets: RwLock::new(HashMap::new()),
            allocations: RwLock::new(HashMap::new()),
        }
    }

    /// Create or resize the budget of `cost_center`. Usage is kept, so the
    /// new total may not drop below what is already used.
    pub async fn set_budget(&self, cost_center: &str, total: f64) -> Result<Budget> {
        if cost_center.trim().is_empty() || cost_center.contains('/') {
            return Err(CapctlError::InvalidRequest(format!(
                "invalid cost center {cost_center:?}"
            )));
        }
        if !(total.is_finite() && total >= 0.0) {
            return Err(CapctlError::InvalidRequest(format!(
                "budget total must be a non-negative amount, got {total}"
            )));
        }
        let now = Utc::now();
        let mut budgets = self.budgets.write().await;
        let mut budget = budgets
            .get(cost_center)
            .cloned()
            .unwrap_or_else(|| Budget::new(cost_center, total, now));
        if total < budget.used {
            return Err(CapctlError::InvalidRequest(format!(
                "budget total {total:.2} for {cost_center} is below the {:.2} already used",
                budget.used
            )));
        }
        budget.total = total;
        budget.updated_at = now;
        self.persist_budget(&budget).await?;
        budgets.insert(cost_center.to_string(), budget.clone());
        Ok(budget)
    }

    pub async fn get(&self, cost_center: &str) -> Result<Budget> {
        self.budgets
            .read()
            .await
            .get(cost_center)
            .cloned()
            .ok_or_else(|| CapctlError::not_found("budget", cost_center))
    }

    pub async fn list(&self) -> Vec<Budget> {
        let mut all: Vec<Budget> = self.budgets.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.cost_center.cmp(&b.cost_center));
        all
    }

    /// Fail `BudgetExceeded` unless at least `required` remains.
    pub async fn check(&self, cost_center: &str, required: f64) -> Result<Budget> {
        let budget = self.get(cost_center).await?;
        if budget.remaining() < required {
            return Err(CapctlError::BudgetExceeded {
                cost_center: cost_center.to_string(),
                remaining: budget.remaining(),
                required,
            });
        }
        Ok(budget)
    }

    /// Reserve `amount` against `cost_center` for one promotion.
    pub async fn reserve(
        &self,
        cost_center: &str,
        capability_id: &str,
        execution_id: Option<&str>,
        amount: f64,
    ) -> Result<BudgetAllocation> {
        let now = Utc::now();
        let (budget, allocation) = {
            let mut budgets = self.budgets.write().await;
            let budget = budgets
                .get_mut(cost_center)
                .ok_or_else(|| CapctlError::not_found("budget", cost_center))?;
            if amount > budget.remaining() {
                return Err(CapctlError::BudgetExceeded {
                    cost_center: cost_center.to_string(),
                    remaining: budget.remaining(),
                    required: amount,
                });
            }
            budget.used += amount;
            budget.updated_at = now;
            let allocation = BudgetAllocation {
                id: uuid::Uuid::new_v4().to_string(),
                cost_center: cost_center.to_string(),
                period: budget.period.clone(),
                capability_id: capability_id.to_string(),
                execution_id: execution_id.map(str::to_string),
                amount,
                state: AllocationState::Reserved,
                created_at: now,
                updated_at: now,
            };
            self.allocations
                .write()
                .await
                .insert(allocation.id.clone(), allocation.clone());
            (budget.clone(), allocation)
        };
        self.persist_budget(&budget).await?;
        self.persist_allocation(&allocation).await?;
        info!(
            cost_center = %cost_center,
            capability_id = %capability_id,
            amount = amount,
            remaining = budget.remaining(),
            "budget reserved"
        );
        Ok(allocation)
    }

    /// Mark a reservation as spent.
    pub async fn commit(&self, allocation_id: &str) -> Result<BudgetAllocation> {
        let allocation = {
            let mut allocations = self.allocations.write().await;
            let a = allocations
                .get_mut(allocation_id)
                .ok_or_else(|| CapctlError::not_found("allocation", allocation_id))?;
            match a.state {
                AllocationState::Committed => return Ok(a.clone()),
                AllocationState::Released => {
                    return Err(CapctlError::InvalidState(format!(
                        "allocation {allocation_id} was already released"
                    )))
                }
                AllocationState::Reserved => {}
            }
            a.state = AllocationState::Committed;
            a.updated_at = Utc::now();
            a.clone()
        };
        self.persist_allocation(&allocation).await?;
        Ok(allocation)
    }

    /// Return a reservation to its budget. Releasing twice is a no-op.
    pub async fn release(&self, allocation_id: &str) -> Result<BudgetAllocation> {
        let now = Utc::now();
        let (allocation, budget) = {
            let mut budgets = self.budgets.write().await;
            let mut allocations = self.allocations.write().await;
            let a = allocations
                .get_mut(allocation_id)
                .ok_or_else(|| CapctlError::not_found("allocation", allocation_id))?;
            match a.state {
                AllocationState::Released => return Ok(a.clone()),
                AllocationState::Committed => {
                    return Err(CapctlError::InvalidState(format!(
                        "allocation {allocation_id} is committed"
                    )))
                }
                AllocationState::Reserved => {}
            }
            a.state = AllocationState::Released;
            a.updated_at = now;
            let budget = budgets.get_mut(&a.cost_center).and_then(|b| {
                if b.period != a.period {
                    return None;
                }
                b.used = (b.used - a.amount).max(0.0);
                b.updated_at = now;
                Some(b.clone())
            });
            (a.clone(), budget)
        };
        self.persist_allocation(&allocation).await?;
        if let Some(b) = budget {
            self.persist_budget(&b).await?;
        }
        Ok(allocation)
    }

    pub async fn allocation(&self, allocation_id: &str) -> Result<BudgetAllocation> {
        self.allocations
            .read()
            .await
            .get(allocation_id)
            .cloned()
            .ok_or_else(|| CapctlError::not_found("allocation", allocation_id))
    }

    /// Roll budgets into the period of `now` and recompute `used` from
    /// charged allocations. Returns how many budgets changed.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<usize> {
        let period = period_of(now);
        let changed: Vec<Budget> = {
            let mut budgets = self.budgets.write().await;
            let allocations = self.allocations.read().await;
            let mut changed = Vec::new();
            for budget in budgets.values_mut() {
                let used: f64 = allocations
                    .values()
                    .filter(|a| {
                        a.cost_center == budget.cost_center && a.period == period && a.is_charged()
                    })
                    .map(|a| a.amount)
                    .sum();
                if budget.period != period || (budget.used - used).abs() > 1e-9 {
                    if budget.period == period {
                        warn!(
                            cost_center = %budget.cost_center,
                            recorded = budget.used,
                            computed = used,
                            "budget usage drifted; reconciling"
                        );
                    }
                    budget.period = period.clone();
                    budget.used = used;
                    budget.updated_at = now;
                    changed.push(budget.clone());
                }
            }
            changed
        };
        for b in &changed {
            self.persist_budget(b).await?;
        }
        Ok(changed.len())
    }

    pub async fn hydrate(&self) -> Result<(usize, usize)> {
        let budget_records = self.store.list_by_prefix("budget/").await?;
        let allocation_records = self.store.list_by_prefix("allocation/").await?;
        let mut budgets = self.budgets.write().await;
        let mut allocations = self.allocations.write().await;
        budgets.clear();
        allocations.clear();
        for r in budget_records {
            match serde_json::from_value::<Budget>(r.value) {
                Ok(b) => {
                    budgets.insert(b.cost_center.clone(), b);
                }
                Err(e) => warn!(key = %r.key, error = %e, "skipping unreadable budget"),
            }
        }
        for r in allocation_records {
            match serde_json::from_value::<BudgetAllocation>(r.value) {
                Ok(a) => {
                    allocations.insert(a.id.clone(), a);
                }
                Err(e) => warn!(key = %r.key, error = %e, "skipping unreadable allocation"),
            }
        }
        Ok((budgets.len(), allocations.len()))
    }

    async fn persist_budget(&self, budget: &Budget) -> Result<()> {
        let key = budget.store_key();
        if let Err(e) = self.store.put(&key, serde_json::to_value(budget)?).await {
            obs::emit_store_error(&key, &e);
            return Err(e.into());
        }
        Ok(())
    }

    async fn persist_allocation(&self, allocation: &BudgetAllocation) -> Result<()> {
        let key = allocation.store_key();
        if let Err(e) = self.store.put(&key, serde_json::to_value(allocation)?).await {
            obs::emit_store_error(&key, &e);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capctl_state::MemoryCapabilityStore;

    fn ledger() -> (BudgetLedger, Arc<MemoryCapabilityStore>) {
        let store = Arc::new(MemoryCapabilityStore::new());
        (BudgetLedger::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_check_against_cap() {
        let (l, _) = ledger();
        l.set_budget("team-x", 500.0).await.unwrap();
        match l.check("team-x", 1000.0).await.unwrap_err() {
            CapctlError::BudgetExceeded {
                remaining,
                required,
                ..
            } => {
                assert_eq!(remaining, 500.0);
                assert_eq!(required, 1000.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(l.check("team-x", 400.0).await.is_ok());
        assert!(l.check("nobody", 1.0).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_reserve_commit_release() {
        let (l, store) = ledger();
        l.set_budget("team-x", 100.0).await.unwrap();
        let a = l.reserve("team-x", "svc-a", Some("e1"), 60.0).await.unwrap();
        assert_eq!(l.get("team-x").await.unwrap().remaining(), 40.0);
        assert!(l.reserve("team-x", "svc-b", None, 50.0).await.is_err());

        l.release(&a.id).await.unwrap();
        assert_eq!(l.get("team-x").await.unwrap().remaining(), 100.0);
        l.release(&a.id).await.unwrap();
        assert_eq!(l.get("team-x").await.unwrap().remaining(), 100.0);
        assert!(l.commit(&a.id).await.is_err());

        let b = l.reserve("team-x", "svc-b", None, 30.0).await.unwrap();
        let committed = l.commit(&b.id).await.unwrap();
        assert_eq!(committed.state, AllocationState::Committed);
        assert_eq!(l.get("team-x").await.unwrap().used, 30.0);
        assert!(l.release(&b.id).await.is_err());
        assert!(store.contains(&committed.store_key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_repairs_drift() {
        let (l, store) = ledger();
        l.set_budget("team-x", 100.0).await.unwrap();
        l.reserve("team-x", "svc-a", None, 20.0).await.unwrap();
        assert_eq!(l.reconcile(Utc::now()).await.unwrap(), 0);

        let mut drifted = l.get("team-x").await.unwrap();
        drifted.used = 90.0;
        store
            .put(&drifted.store_key(), serde_json::to_value(&drifted).unwrap())
            .await
            .unwrap();
        l.hydrate().await.unwrap();
        assert_eq!(l.reconcile(Utc::now()).await.unwrap(), 1);
        assert_eq!(l.get("team-x").await.unwrap().used, 20.0);
    }

    #[tokio::test]
    async fn test_rejects_bad_budget() {
        let (l, _) = ledger();
        assert!(l.set_budget("team-x", -1.0).await.is_err());
        assert!(l.set_budget("team-x", f64::NAN).await.is_err());
        assert!(l.set_budget("team-x", f64::INFINITY).await.is_err());
        assert!(l.set_budget("", 1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_total_cannot_drop_below_used() {
        let (l, _) = ledger();
        l.set_budget("team-x", 100.0).await.unwrap();
        l.reserve("team-x", "svc-a", None, 60.0).await.unwrap();

        let err = l.set_budget("team-x", 50.0).await.unwrap_err();
        assert!(matches!(err, CapctlError::InvalidRequest(_)));
        let b = l.get("team-x").await.unwrap();
        assert_eq!(b.total, 100.0);
        assert_eq!(b.used, 60.0);

        assert_eq!(l.set_budget("team-x", 60.0).await.unwrap().remaining(), 0.0);
    }
}
