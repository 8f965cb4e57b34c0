//! Process-wide atomic counters for the approval gate.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. from the periodic sweeper).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Relaxed atomic counters. No allocation, no locking.
pub struct Metrics {
    actions_created: AtomicU64,
    actions_approved: AtomicU64,
    actions_denied: AtomicU64,
    actions_expired: AtomicU64,
    tokens_consumed: AtomicU64,
    tokens_rejected: AtomicU64,
    mfa_pushes_sent: AtomicU64,
    mfa_pushes_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            actions_created: AtomicU64::new(0),
            actions_approved: AtomicU64::new(0),
            actions_denied: AtomicU64::new(0),
            actions_expired: AtomicU64::new(0),
            tokens_consumed: AtomicU64::new(0),
            tokens_rejected: AtomicU64::new(0),
            mfa_pushes_sent: AtomicU64::new(0),
            mfa_pushes_failed: AtomicU64::new(0),
        }
    }

    pub fn inc_created(&self) {
        self.actions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_approved(&self) {
        self.actions_approved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_denied(&self) {
        self.actions_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_expired(&self, n: u64) {
        self.actions_expired.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_consumed(&self) {
        self.tokens_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.tokens_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pushes_sent(&self) {
        self.mfa_pushes_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Provider errors and timeouts, not explicit denials.
    pub fn inc_pushes_failed(&self) {
        self.mfa_pushes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            actions_created = s.actions_created,
            actions_approved = s.actions_approved,
            actions_denied = s.actions_denied,
            actions_expired = s.actions_expired,
            tokens_consumed = s.tokens_consumed,
            tokens_rejected = s.tokens_rejected,
            mfa_pushes_sent = s.mfa_pushes_sent,
            mfa_pushes_failed = s.mfa_pushes_failed,
        );
    }

    /// Read every counter at once.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            actions_created: self.actions_created.load(Ordering::Relaxed),
            actions_approved: self.actions_approved.load(Ordering::Relaxed),
            actions_denied: self.actions_denied.load(Ordering::Relaxed),
            actions_expired: self.actions_expired.load(Ordering::Relaxed),
            tokens_consumed: self.tokens_consumed.load(Ordering::Relaxed),
            tokens_rejected: self.tokens_rejected.load(Ordering::Relaxed),
            mfa_pushes_sent: self.mfa_pushes_sent.load(Ordering::Relaxed),
            mfa_pushes_failed: self.mfa_pushes_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub actions_created: u64,
    pub actions_approved: u64,
    pub actions_denied: u64,
    pub actions_expired: u64,
    pub tokens_consumed: u64,
    pub tokens_rejected: u64,
    pub mfa_pushes_sent: u64,
    pub mfa_pushes_failed: u64,
}
