//! Lock-free in-memory metrics for the mapper process.
//!
//! Plain atomics, single-writer-per-counter, readable from any thread
//! without locking — the same shape the surrounding fabric uses for its
//! own control-plane process.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide metrics instance.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    pub agents_registered: AtomicU64,
    pub agents_reaped: AtomicU64,
    pub jobs_created: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_cancelled: AtomicU64,
    pub replies_dropped_unknown_token: AtomicU64,
    pub requests_offline_parked: AtomicU64,
    pub requests_no_targets: AtomicU64,
    pub offline_redeliveries: AtomicU64,
    pub malformed_envelopes: AtomicU64,
    pub broker_errors: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            agents_registered: AtomicU64::new(0),
            agents_reaped: AtomicU64::new(0),
            jobs_created: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_cancelled: AtomicU64::new(0),
            replies_dropped_unknown_token: AtomicU64::new(0),
            requests_offline_parked: AtomicU64::new(0),
            requests_no_targets: AtomicU64::new(0),
            offline_redeliveries: AtomicU64::new(0),
            malformed_envelopes: AtomicU64::new(0),
            broker_errors: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            agents_registered: self.agents_registered.load(Ordering::Relaxed),
            agents_reaped: self.agents_reaped.load(Ordering::Relaxed),
            jobs_created: self.jobs_created.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            replies_dropped_unknown_token: self.replies_dropped_unknown_token.load(Ordering::Relaxed),
            requests_offline_parked: self.requests_offline_parked.load(Ordering::Relaxed),
            requests_no_targets: self.requests_no_targets.load(Ordering::Relaxed),
            offline_redeliveries: self.offline_redeliveries.load(Ordering::Relaxed),
            malformed_envelopes: self.malformed_envelopes.load(Ordering::Relaxed),
            broker_errors: self.broker_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub agents_registered: u64,
    pub agents_reaped: u64,
    pub jobs_created: u64,
    pub jobs_completed: u64,
    pub jobs_cancelled: u64,
    pub replies_dropped_unknown_token: u64,
    pub requests_offline_parked: u64,
    pub requests_no_targets: u64,
    pub offline_redeliveries: u64,
    pub malformed_envelopes: u64,
    pub broker_errors: u64,
}
