//! Global atomic counters for hackeval observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. on shutdown or a daemon tick).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations, no locking.
pub struct Metrics {
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    sandbox_runs: AtomicU64,
    sandbox_kills: AtomicU64,
    checker_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            sandbox_runs: AtomicU64::new(0),
            sandbox_kills: AtomicU64::new(0),
            checker_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_jobs_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_submitted", "counter incremented");
    }

    pub fn inc_jobs_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_completed", "counter incremented");
    }

    pub fn inc_jobs_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_failed", "counter incremented");
    }

    pub fn inc_sandbox_runs(&self) {
        self.sandbox_runs.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sandbox_runs", "counter incremented");
    }

    /// A run was stopped by a limit (time, memory, output).
    pub fn inc_sandbox_kills(&self) {
        self.sandbox_kills.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sandbox_kills", "counter incremented");
    }

    pub fn inc_checker_failures(&self) {
        self.checker_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "checker_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            jobs_submitted = self.jobs_submitted(),
            jobs_completed = self.jobs_completed(),
            jobs_failed = self.jobs_failed(),
            sandbox_runs = self.sandbox_runs(),
            sandbox_kills = self.sandbox_kills(),
            checker_failures = self.checker_failures(),
        );
    }

    pub fn jobs_submitted(&self) -> u64 {
        self.jobs_submitted.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn sandbox_runs(&self) -> u64 {
        self.sandbox_runs.load(Ordering::Relaxed)
    }

    pub fn sandbox_kills(&self) -> u64 {
        self.sandbox_kills.load(Ordering::Relaxed)
    }

    pub fn checker_failures(&self) -> u64 {
        self.checker_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.jobs_submitted.store(0, Ordering::Relaxed);
        self.jobs_completed.store(0, Ordering::Relaxed);
        self.jobs_failed.store(0, Ordering::Relaxed);
        self.sandbox_runs.store(0, Ordering::Relaxed);
        self.sandbox_kills.store(0, Ordering::Relaxed);
        self.checker_failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_jobs_submitted();
        m.inc_jobs_submitted();
        m.inc_jobs_completed();
        m.inc_sandbox_runs();
        m.inc_sandbox_kills();
        m.inc_checker_failures();
        m.inc_checker_failures();
        m.inc_checker_failures();
        assert_eq!(m.jobs_submitted(), 2);
        assert_eq!(m.jobs_completed(), 1);
        assert_eq!(m.jobs_failed(), 0);
        assert_eq!(m.sandbox_runs(), 1);
        assert_eq!(m.sandbox_kills(), 1);
        assert_eq!(m.checker_failures(), 3);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_jobs_failed();
        m.inc_sandbox_runs();
        m.reset();
        assert_eq!(m.jobs_failed(), 0);
        assert_eq!(m.sandbox_runs(), 0);
    }
}
