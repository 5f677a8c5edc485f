//! Lock contention metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for lock acquisition and contention.
///
/// Thread-safe counters using atomic operations for lock-free updates.
#[derive(Debug, Default)]
pub struct LockMetrics {
    /// Successful acquisitions
    pub acquisitions: AtomicU64,

    /// Acquisitions that had to wait for another holder
    pub contended: AtomicU64,

    /// Acquisitions that gave up after the configured timeout
    pub timeouts: AtomicU64,

    /// Explicit or drop-driven releases
    pub releases: AtomicU64,

    /// Total time spent waiting for locks (nanoseconds)
    pub wait_time_ns: AtomicU64,
}

impl LockMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_acquired(&self, waited: Duration, contended: bool) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        if contended {
            self.contended.fetch_add(1, Ordering::Relaxed);
        }
        self.wait_time_ns
            .fetch_add(u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    #[inline]
    pub fn record_timeout(&self, waited: Duration) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        self.wait_time_ns
            .fetch_add(u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    #[inline]
    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> LockMetricsSnapshot {
        LockMetricsSnapshot {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            wait_time_ns: self.wait_time_ns.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.acquisitions.store(0, Ordering::Relaxed);
        self.contended.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.releases.store(0, Ordering::Relaxed);
        self.wait_time_ns.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of lock metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockMetricsSnapshot {
    pub acquisitions: u64,
    pub contended: u64,
    pub timeouts: u64,
    pub releases: u64,
    pub wait_time_ns: u64,
}

impl LockMetricsSnapshot {
    /// Fraction of acquisitions that had to wait (0.0 to 1.0)
    pub fn contention_rate(&self) -> f64 {
        if self.acquisitions == 0 {
            0.0
        } else {
            self.contended as f64 / self.acquisitions as f64
        }
    }

    /// Average wait per attempt, successful or not
    pub fn average_wait(&self) -> Duration {
        let attempts = self.acquisitions + self.timeouts;
        if attempts == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.wait_time_ns / attempts)
        }
    }

    /// Locks currently held (acquired but not yet released)
    pub fn held(&self) -> u64 {
        self.acquisitions.saturating_sub(self.releases)
    }
}
