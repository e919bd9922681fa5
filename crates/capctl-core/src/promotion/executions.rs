//! Execution book: in-memory index of promotion executions, persisted to the
//! store on every change, plus per-execution cancellation signals.

use std::collections::HashMap;
use std::sync::Arc;

use capctl_state::CapabilityStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, warn};

use crate::domain::error::{CapctlError, Result};
use crate::domain::promotion::{execution_key, ExecutionStatus, PromotionExecution};
use crate::obs;

const EXECUTION_PREFIX: &str = "execution/";

/// Filter for [`ExecutionBook::list`]. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionFilter {
    pub status: Option<ExecutionStatus>,
    pub capability_id: Option<String>,
}

impl ExecutionFilter {
    pub fn matches(&self, exec: &PromotionExecution) -> bool {
        self.status.map_or(true, |s| exec.status == s)
            && self
                .capability_id
                .as_deref()
                .map_or(true, |id| exec.request.capability_id == id)
    }
}

pub struct ExecutionBook {
    store: Arc<dyn CapabilityStore>,
    executions: RwLock<HashMap<String, PromotionExecution>>,
    cancels: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl ExecutionBook {
    pub fn new(store: Arc<dyn CapabilityStore>) -> Self {
        Self {
            store,
            executions: RwLock::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, exec: PromotionExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        self.persist(&exec).await?;
        executions.insert(exec.id.clone(), exec);
        Ok(())
    }

    /// Insert `exec` unless its capability already has a non-terminal
    /// execution. The check and the insert happen under one lock.
    pub async fn insert_if_idle(&self, exec: PromotionExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        let capability_id = &exec.request.capability_id;
        if let Some(active) = executions
            .values()
            .find(|e| &e.request.capability_id == capability_id && !e.status.is_terminal())
        {
            return Err(CapctlError::InvalidState(format!(
                "capability {capability_id} already has active execution {}",
                active.id
            )));
        }
        self.persist(&exec).await?;
        executions.insert(exec.id.clone(), exec);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<PromotionExecution> {
        self.executions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CapctlError::not_found("execution", id))
    }

    /// Matching executions, newest first.
    pub async fn list(&self, filter: &ExecutionFilter) -> Vec<PromotionExecution> {
        let mut out: Vec<PromotionExecution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Apply `f` to a copy of the execution and keep the result only if `f`
    /// succeeds and the copy is persisted. The write lock is held until the
    /// store accepts the record.
    pub async fn update<T, F>(&self, id: &str, f: F) -> Result<(T, PromotionExecution)>
    where
        F: FnOnce(&mut PromotionExecution) -> Result<T>,
    {
        let mut executions = self.executions.write().await;
        let current = executions
            .get_mut(id)
            .ok_or_else(|| CapctlError::not_found("execution", id))?;
        let mut draft = current.clone();
        let out = f(&mut draft)?;
        self.persist(&draft).await?;
        *current = draft.clone();
        Ok((out, draft))
    }

    /// Id of a non-terminal execution for `capability_id`, if any.
    pub async fn active_for(&self, capability_id: &str) -> Option<String> {
        self.executions
            .read()
            .await
            .values()
            .find(|e| e.request.capability_id == capability_id && !e.status.is_terminal())
            .map(|e| e.id.clone())
    }

    /// Count of executions per status.
    pub async fn counts(&self) -> HashMap<ExecutionStatus, usize> {
        let mut counts = HashMap::new();
        for e in self.executions.read().await.values() {
            *counts.entry(e.status).or_insert(0) += 1;
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }

    /// Receiver for the execution's cancel signal, creating it on first use.
    pub async fn cancel_signal(&self, id: &str) -> watch::Receiver<bool> {
        let mut cancels = self.cancels.lock().await;
        cancels
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    /// Flip the cancel signal of a running execution; its waits return
    /// immediately. Executions nobody is driving have no signal to flip.
    pub async fn signal_cancel(&self, id: &str) {
        if let Some(tx) = self.cancels.lock().await.get(id) {
            tx.send_replace(true);
        }
    }

    pub async fn drop_signal(&self, id: &str) {
        self.cancels.lock().await.remove(id);
    }

    /// Number of live cancel signals.
    pub async fn signal_count(&self) -> usize {
        self.cancels.lock().await.len()
    }

    /// Delete executions that have been terminal since before `cutoff`.
    pub async fn remove_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let expired: Vec<String> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.status.is_terminal() && e.finished_at.is_some_and(|t| t < cutoff))
            .map(|e| e.id.clone())
            .collect();
        for id in &expired {
            let key = execution_key(id);
            if let Err(e) = self.store.delete(&key).await {
                obs::emit_store_error(&key, &e);
                return Err(e.into());
            }
            self.executions.write().await.remove(id);
            self.drop_signal(id).await;
            debug!(execution_id = %id, "terminal execution cleaned up");
        }
        Ok(expired)
    }

    pub async fn hydrate(&self) -> Result<usize> {
        let records = self.store.list_by_prefix(EXECUTION_PREFIX).await?;
        let mut executions = self.executions.write().await;
        executions.clear();
        for r in records {
            match serde_json::from_value::<PromotionExecution>(r.value) {
                Ok(e) => {
                    executions.insert(e.id.clone(), e);
                }
                Err(e) => warn!(key = %r.key, error = %e, "skipping unreadable execution"),
            }
        }
        Ok(executions.len())
    }

    async fn persist(&self, exec: &PromotionExecution) -> Result<()> {
        let key = exec.store_key();
        if let Err(e) = self.store.put(&key, serde_json::to_value(exec)?).await {
            obs::emit_store_error(&key, &e);
            return Err(e.into());
        }
        Ok(())
    }
}
