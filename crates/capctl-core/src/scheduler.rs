//! Promotion queue and bounded worker pool.
//!
//! Each tick pops queued execution ids while a semaphore permit is free and
//! spawns one worker task per id. Ids that cannot get a permit stay queued.
//! A panic inside a worker is caught and recorded on the execution.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{watch, Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::promotion::worker::{DriveOutcome, PromotionWorker};

pub const DEFAULT_MAX_CONCURRENT: usize = 8;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);

/// FIFO of execution ids waiting for a worker. Pushing an id that is
/// already queued is a no-op.
#[derive(Default)]
pub struct PromotionQueue {
    ids: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl PromotionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the id was already queued.
    pub async fn push(&self, id: &str) -> bool {
        let mut ids = self.ids.lock().await;
        if ids.iter().any(|q| q == id) {
            return false;
        }
        ids.push_back(id.to_string());
        drop(ids);
        self.notify.notify_one();
        true
    }

    pub async fn pop(&self) -> Option<String> {
        self.ids.lock().await.pop_front()
    }

    pub async fn push_front(&self, id: String) {
        let mut ids = self.ids.lock().await;
        if !ids.contains(&id) {
            ids.push_front(id);
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        let mut ids = self.ids.lock().await;
        let before = ids.len();
        ids.retain(|q| q != id);
        before != ids.len()
    }

    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.ids.lock().await.iter().cloned().collect()
    }

    /// Resolves after the next push.
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub struct Scheduler {
    queue: Arc<PromotionQueue>,
    worker: Arc<PromotionWorker>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    active: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(queue: Arc<PromotionQueue>, worker: Arc<PromotionWorker>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            queue,
            worker,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Dispatch queued executions while permits are available. Returns the
    /// number of workers spawned.
    pub async fn tick(&self) -> usize {
        self.reap().await;
        let mut spawned = 0;
        loop {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                break;
            };
            let Some(id) = self.queue.pop().await else {
                break;
            };

            let mut active = self.active.lock().await;
            if active.get(&id).is_some_and(|h| !h.is_finished()) {
                // Still running from an earlier dispatch; retry next tick.
                drop(active);
                self.queue.push_front(id).await;
                break;
            }

            let worker = self.worker.clone();
            let task_id = id.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(worker.drive(&task_id)).catch_unwind().await;
                match outcome {
                    Ok(Ok(DriveOutcome::Paused)) => {
                        debug!(execution_id = %task_id, "worker paused on manual gate")
                    }
                    Ok(Ok(outcome)) => {
                        debug!(execution_id = %task_id, outcome = ?outcome, "worker finished")
                    }
                    Ok(Err(e)) => {
                        warn!(execution_id = %task_id, error = %e, "worker failed");
                        worker.fail_with_error(&task_id, &e).await;
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        worker.fail_with_panic(&task_id, &message).await;
                    }
                }
            });
            active.insert(id, handle);
            spawned += 1;
        }
        if spawned > 0 {
            debug!(spawned, "scheduler tick dispatched workers");
        }
        spawned
    }

    /// Forget handles of finished workers.
    pub async fn reap(&self) -> usize {
        let mut active = self.active.lock().await;
        let before = active.len();
        active.retain(|_, h| !h.is_finished());
        before - active.len()
    }

    pub async fn active_count(&self) -> usize {
        self.active
            .lock()
            .await
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Wait for every spawned worker to finish.
    pub async fn join_all(&self) {
        let handles: Vec<JoinHandle<()>> = self.active.lock().await.drain().map(|(_, h)| h).collect();
        for h in handles {
            if let Err(e) = h.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "worker task ended abnormally");
                }
            }
        }
    }

    /// Abort every running worker.
    pub async fn abort_all(&self) {
        for (id, h) in self.active.lock().await.drain() {
            h.abort();
            debug!(execution_id = %id, "worker aborted");
        }
    }

    /// Tick and wait until the queue is empty and no worker is running.
    pub async fn run_until_idle(&self) {
        loop {
            self.tick().await;
            self.join_all().await;
            if self.queue.is_empty().await {
                break;
            }
        }
    }

    /// Tick every `interval` or whenever something is queued, until
    /// `shutdown` flips to true.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(max_concurrent = self.max_concurrent, interval_secs = interval.as_secs(), "scheduler started");
        loop {
            self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.queue.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_dedupes_and_removes() {
        let q = PromotionQueue::new();
        assert!(q.push("a").await);
        assert!(!q.push("a").await);
        assert!(q.push("b").await);
        assert_eq!(q.len().await, 2);
        assert!(q.remove("a").await);
        assert!(!q.remove("a").await);
        assert_eq!(q.pop().await.as_deref(), Some("b"));
        assert!(q.is_empty().await);
    }

    #[test]
    fn test_panic_message_variants() {
        let s: Box<dyn Any + Send> = Box::new("static boom");
        assert_eq!(panic_message(s.as_ref()), "static boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(owned.as_ref()), "owned boom");
        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
