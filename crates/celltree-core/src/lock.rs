//! Named mutual-exclusion locks for tree mutations.
//!
//! The document store has no locks of its own, so every mutating tree
//! operation serializes through a process-wide registry of named locks.
//!
//! # Granularity
//!
//! - **Dav locks** are keyed by Box id: every MKCOL, PUT, PROPPATCH, ACL,
//!   DELETE and MOVE inside one Box is totally ordered by acquisition.
//! - **Cell locks** are keyed by Cell id and guard cell-level operations.
//!
//! Different keys never contend: the registry is a `DashMap`, so there is no
//! global serialization point.
//!
//! # Release
//!
//! [`LockGuard::release`] is idempotent and the guard releases on drop, so
//! every exit path of a critical section (including `?` and a dropped future)
//! gives the lock back. Locks are not re-entrant; acquiring a key the current
//! task already holds waits until the timeout and fails with
//! [`DavError::LockTimeout`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace, warn};

use crate::error::{DavError, DavResult};
use crate::lock_metrics::LockMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockCategory {
    Cell,
    Dav,
}

impl LockCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            LockCategory::Cell => "cell",
            LockCategory::Dav => "dav",
        }
    }
}

/// Lock name: `(category, primary key, optional sub key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey {
    pub category: LockCategory,
    pub primary: String,
    pub sub: Option<String>,
}

impl LockKey {
    pub fn new(category: LockCategory, primary: impl Into<String>, sub: Option<&str>) -> Self {
        Self {
            category,
            primary: primary.into(),
            sub: sub.map(str::to_string),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub {
            Some(ref sub) => write!(f, "{}:{}:{}", self.category.as_str(), self.primary, sub),
            None => write!(f, "{}:{}", self.category.as_str(), self.primary),
        }
    }
}

/// Registry of named locks with bounded waits.
#[derive(Debug)]
pub struct LockManager {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    timeout: Duration,
    metrics: Arc<LockMetrics>,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
            metrics: Arc::new(LockMetrics::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn metrics(&self) -> &LockMetrics {
        &self.metrics
    }

    fn lock_for(&self, key: &LockKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock named by `(category, primary, sub)`.
    ///
    /// Waits at most the configured timeout.
    pub async fn acquire(&self, category: LockCategory, primary: &str, sub: Option<&str>) -> DavResult<LockGuard> {
        let key = LockKey::new(category, primary, sub);
        let lock = self.lock_for(&key);
        let started = Instant::now();

        // Fast path: uncontended
        if let Ok(guard) = Arc::clone(&lock).try_lock_owned() {
            self.metrics.record_acquired(started.elapsed(), false);
            trace!(%key, "Lock acquired");
            return Ok(LockGuard::new(key, guard, Arc::clone(&self.metrics)));
        }

        debug!(%key, "Waiting for lock");
        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => {
                let waited = started.elapsed();
                self.metrics.record_acquired(waited, true);
                debug!(%key, waited_ms = waited.as_millis(), "Lock acquired after wait");
                Ok(LockGuard::new(key, guard, Arc::clone(&self.metrics)))
            }
            Err(_) => {
                let waited = started.elapsed();
                self.metrics.record_timeout(waited);
                warn!(%key, waited_ms = waited.as_millis(), "Lock acquisition timed out");
                Err(DavError::LockTimeout {
                    key: key.to_string(),
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Remove locks nobody holds or waits on.
    ///
    /// A lock whose `Arc` is only referenced by the registry is idle.
    pub fn cleanup_unused_locks(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of registered locks.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

/// Held lock. Released by [`release`](Self::release) or on drop.
#[derive(Debug)]
pub struct LockGuard {
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
    metrics: Arc<LockMetrics>,
}

impl LockGuard {
    fn new(key: LockKey, guard: OwnedMutexGuard<()>, metrics: Arc<LockMetrics>) -> Self {
        Self {
            key,
            guard: Some(guard),
            metrics,
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }

    /// Give the lock back. Calling again is a no-op.
    pub fn release(&mut self) {
        if self.guard.take().is_some() {
            self.metrics.record_release();
            trace!(key = %self.key, "Lock released");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}
