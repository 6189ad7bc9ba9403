//! Per-application counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by an application when metrics are enabled.
#[derive(Debug, Default)]
pub(crate) struct AppMetrics {
    pub pages_created: AtomicU64,
    pub pages_closed: AtomicU64,
    pub sessions_expired: AtomicU64,
    pub initial_renders: AtomicU64,
    pub update_renders: AtomicU64,
    pub no_change_renders: AtomicU64,
    pub actions_dispatched: AtomicU64,
    pub action_failures: AtomicU64,
}

impl AppMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_created: self.pages_created.load(Ordering::Relaxed),
            pages_closed: self.pages_closed.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            initial_renders: self.initial_renders.load(Ordering::Relaxed),
            update_renders: self.update_renders.load(Ordering::Relaxed),
            no_change_renders: self.no_change_renders.load(Ordering::Relaxed),
            actions_dispatched: self.actions_dispatched.load(Ordering::Relaxed),
            action_failures: self.action_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of an application's counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub pages_created: u64,
    pub pages_closed: u64,
    pub sessions_expired: u64,
    pub initial_renders: u64,
    pub update_renders: u64,
    pub no_change_renders: u64,
    pub actions_dispatched: u64,
    pub action_failures: u64,
}
