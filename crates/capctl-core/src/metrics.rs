//! Global atomic counters for control plane observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. on a maintenance tick).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations, no locking.
pub struct Metrics {
    registrations: AtomicU64,
    promotions_requested: AtomicU64,
    promotions_completed: AtomicU64,
    promotions_failed: AtomicU64,
    rollbacks: AtomicU64,
    gate_evaluations: AtomicU64,
    panics_recovered: AtomicU64,
    constitutional_rejections: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub registrations: u64,
    pub promotions_requested: u64,
    pub promotions_completed: u64,
    pub promotions_failed: u64,
    pub rollbacks: u64,
    pub gate_evaluations: u64,
    pub panics_recovered: u64,
    pub constitutional_rejections: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            registrations: AtomicU64::new(0),
            promotions_requested: AtomicU64::new(0),
            promotions_completed: AtomicU64::new(0),
            promotions_failed: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            gate_evaluations: AtomicU64::new(0),
            panics_recovered: AtomicU64::new(0),
            constitutional_rejections: AtomicU64::new(0),
        }
    }

    counter!(inc_registrations, registrations);
    counter!(inc_promotions_requested, promotions_requested);
    counter!(inc_promotions_completed, promotions_completed);
    counter!(inc_promotions_failed, promotions_failed);
    counter!(inc_rollbacks, rollbacks);
    counter!(inc_gate_evaluations, gate_evaluations);
    counter!(inc_panics_recovered, panics_recovered);
    counter!(inc_constitutional_rejections, constitutional_rejections);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            registrations: self.registrations.load(Ordering::Relaxed),
            promotions_requested: self.promotions_requested.load(Ordering::Relaxed),
            promotions_completed: self.promotions_completed.load(Ordering::Relaxed),
            promotions_failed: self.promotions_failed.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            gate_evaluations: self.gate_evaluations.load(Ordering::Relaxed),
            panics_recovered: self.panics_recovered.load(Ordering::Relaxed),
            constitutional_rejections: self.constitutional_rejections.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (maintenance tick, shutdown)
    /// rather than on every increment.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            registrations = s.registrations,
            promotions_requested = s.promotions_requested,
            promotions_completed = s.promotions_completed,
            promotions_failed = s.promotions_failed,
            rollbacks = s.rollbacks,
            gate_evaluations = s.gate_evaluations,
            panics_recovered = s.panics_recovered,
            constitutional_rejections = s.constitutional_rejections,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for c in [
            &self.registrations,
            &self.promotions_requested,
            &self.promotions_completed,
            &self.promotions_failed,
            &self.rollbacks,
            &self.gate_evaluations,
            &self.panics_recovered,
            &self.constitutional_rejections,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}
