//! Metadata cache for Cell and Box lookups.
//!
//! Every request resolves its Cell and Box by name, so those documents are
//! cached behind a [`CacheBackend`]. The cache is strictly advisory: a
//! backend failure on read counts as a miss and falls back to the store, and
//! failures on write or clear are logged and swallowed. Mutations of Cells
//! and Boxes clear the affected entries while still holding their lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::control::{BoxDoc, CellDoc, ControlStore};
use crate::error::DavResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Cell(String),
    Box { cell_id: String, name: String },
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Cell(name) => write!(f, "cell:{name}"),
            CacheKey::Box { cell_id, name } => write!(f, "box:{cell_id}:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedMeta {
    Cell(CellDoc),
    Box(BoxDoc),
}

#[derive(Debug, Error)]
#[error("cache backend failure: {0}")]
pub struct CacheBackendError(pub String);

/// Storage behind the metadata cache.
pub trait CacheBackend: Send + Sync + fmt::Debug {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedMeta>, CacheBackendError>;

    fn set(&self, key: CacheKey, value: CachedMeta) -> Result<(), CacheBackendError>;

    fn clear(&self, key: &CacheKey) -> Result<(), CacheBackendError>;

    /// Drop every Box entry of a Cell.
    fn clear_cell_boxes(&self, cell_id: &str) -> Result<(), CacheBackendError>;
}

/// In-process backend on a moka TTL cache.
#[derive(Debug, Clone)]
pub struct MokaBackend {
    inner: moka::sync::Cache<CacheKey, CachedMeta>,
}

impl MokaBackend {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            inner: moka::sync::Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build(),
        }
    }

    /// Approximate number of entries.
    pub fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MokaBackend {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedMeta>, CacheBackendError> {
        Ok(self.inner.get(key))
    }

    fn set(&self, key: CacheKey, value: CachedMeta) -> Result<(), CacheBackendError> {
        self.inner.insert(key, value);
        Ok(())
    }

    fn clear(&self, key: &CacheKey) -> Result<(), CacheBackendError> {
        self.inner.invalidate(key);
        Ok(())
    }

    fn clear_cell_boxes(&self, cell_id: &str) -> Result<(), CacheBackendError> {
        let cell_id = cell_id.to_string();
        self.inner
            .invalidate_entries_if(move |k, _| matches!(k, CacheKey::Box { cell_id: c, .. } if *c == cell_id))
            .map(|_| ())
            .map_err(|e| CacheBackendError(e.to_string()))
    }
}

/// Lock-free cache counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
}

impl CacheStatsSnapshot {
    /// Fraction of lookups served from the cache (0.0 with no lookups).
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }
}

/// Advisory cache over a [`CacheBackend`].
#[derive(Debug)]
pub struct MetadataCache {
    backend: Box<dyn CacheBackend>,
    stats: CacheStats,
}

impl MetadataCache {
    pub fn new(backend: Box<dyn CacheBackend>) -> Self {
        Self {
            backend,
            stats: CacheStats::default(),
        }
    }

    pub fn moka(ttl: Duration, capacity: u64) -> Self {
        Self::new(Box::new(MokaBackend::new(ttl, capacity)))
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    fn failed(&self, op: &str, key: &dyn fmt::Display, e: &CacheBackendError) {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        warn!(op, %key, error = %e, "Metadata cache unavailable, continuing without it");
    }

    /// Lookup; backend failures read as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<CachedMeta> {
        match self.backend.get(key) {
            Ok(Some(value)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                trace!(%key, "Cache hit");
                Some(value)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                trace!(%key, "Cache miss");
                None
            }
            Err(e) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.failed("get", key, &e);
                None
            }
        }
    }

    pub fn set(&self, key: CacheKey, value: CachedMeta) {
        let display = key.to_string();
        if let Err(e) = self.backend.set(key, value) {
            self.failed("set", &display, &e);
        }
    }

    pub fn clear(&self, key: &CacheKey) {
        match self.backend.clear(key) {
            Ok(()) => debug!(%key, "Cache entry cleared"),
            Err(e) => self.failed("clear", key, &e),
        }
    }

    /// Clear a Cell entry and all of its Box entries.
    pub fn clear_cell(&self, cell: &CellDoc) {
        self.clear(&CacheKey::Cell(cell.name.clone()));
        if let Err(e) = self.backend.clear_cell_boxes(&cell.id) {
            self.failed("clear_cell_boxes", &cell.id, &e);
        }
    }

    pub fn clear_box(&self, box_doc: &BoxDoc) {
        self.clear(&CacheKey::Box {
            cell_id: box_doc.cell_id.clone(),
            name: box_doc.name.clone(),
        });
    }

    /// Read-through Cell lookup by name.
    pub async fn cell_by_name(&self, control: &ControlStore, name: &str) -> DavResult<Option<CellDoc>> {
        let key = CacheKey::Cell(name.to_string());
        if let Some(CachedMeta::Cell(cell)) = self.get(&key) {
            return Ok(Some(cell));
        }
        let found = control.find_cell(name).await?;
        if let Some(ref cell) = found {
            self.set(key, CachedMeta::Cell(cell.clone()));
        }
        Ok(found)
    }

    /// Read-through Box lookup by name.
    pub async fn box_by_name(&self, control: &ControlStore, cell_id: &str, name: &str) -> DavResult<Option<BoxDoc>> {
        let key = CacheKey::Box {
            cell_id: cell_id.to_string(),
            name: name.to_string(),
        };
        if let Some(CachedMeta::Box(box_doc)) = self.get(&key) {
            return Ok(Some(box_doc));
        }
        let found = control.find_box(cell_id, name).await?;
        if let Some(ref box_doc) = found {
            self.set(key, CachedMeta::Box(box_doc.clone()));
        }
        Ok(found)
    }
}
