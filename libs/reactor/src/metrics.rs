//! Reactor Metrics
//!
//! Relaxed atomic counters for the reactor's moving parts, with a
//! cloneable snapshot for reporting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Reactor-wide metrics
#[derive(Debug, Default)]
pub struct ReactorMetrics {
    pub proxies_created: AtomicU64,
    pub isolates_created: AtomicU64,
    pub actors_destroyed: AtomicU64,
    pub isolates_destroyed: AtomicU64,

    pub actions_executed: AtomicU64,
    pub actions_canceled: AtomicU64,
    pub actions_failed: AtomicU64,
    pub batches_executed: AtomicU64,
    pub handler_failures: AtomicU64,
}

impl ReactorMetrics {
    pub fn record_action_executed(&self) {
        self.actions_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_canceled(&self) {
        self.actions_canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_failed(&self) {
        self.actions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of all counters
    pub fn snapshot(&self) -> ReactorStats {
        ReactorStats {
            proxies_created: self.proxies_created.load(Ordering::Relaxed),
            isolates_created: self.isolates_created.load(Ordering::Relaxed),
            actors_destroyed: self.actors_destroyed.load(Ordering::Relaxed),
            isolates_destroyed: self.isolates_destroyed.load(Ordering::Relaxed),
            actions_executed: self.actions_executed.load(Ordering::Relaxed),
            actions_canceled: self.actions_canceled.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
            batches_executed: self.batches_executed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`ReactorMetrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorStats {
    pub proxies_created: u64,
    pub isolates_created: u64,
    pub actors_destroyed: u64,
    pub isolates_destroyed: u64,
    pub actions_executed: u64,
    pub actions_canceled: u64,
    pub actions_failed: u64,
    pub batches_executed: u64,
    pub handler_failures: u64,
}
