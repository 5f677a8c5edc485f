//! Per-cell reference counting and status.
//!
//! Every request that works inside a Cell holds a [`CellReference`] for its
//! duration. Cell deletion waits until it is the only holder, then flips the
//! Cell into [`CellStatus::BulkDeletion`] so new requests are turned away.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::error::{ConflictReason, DavContext, DavError, DavResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellStatus {
    #[default]
    Normal,
    BulkDeletion,
}

fn cell_busy(cell_id: &str) -> DavError {
    DavError::conflict(ConflictReason::CellBusy, DavContext::new().with_cell(cell_id))
}

#[derive(Debug, Default)]
pub struct CellAccessTracker {
    references: DashMap<String, Arc<AtomicUsize>>,
    statuses: DashMap<String, CellStatus>,
}

impl CellAccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request against `cell_id`.
    ///
    /// Fails with `CellBusy` while the Cell is being deleted.
    pub fn enter(self: &Arc<Self>, cell_id: &str) -> DavResult<CellReference> {
        let counter = Arc::clone(
            self.references
                .entry(cell_id.to_string())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                .value(),
        );
        counter.fetch_add(1, Ordering::SeqCst);
        let reference = CellReference {
            cell_id: cell_id.to_string(),
            counter,
        };
        if self.status(cell_id) == CellStatus::BulkDeletion {
            debug!(cell_id, "Cell is being deleted; request refused");
            return Err(cell_busy(cell_id));
        }
        trace!(cell_id, "Cell reference taken");
        Ok(reference)
    }

    pub fn reference_count(&self, cell_id: &str) -> usize {
        self.references
            .get(cell_id)
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }

    pub fn status(&self, cell_id: &str) -> CellStatus {
        self.statuses.get(cell_id).map(|s| *s).unwrap_or_default()
    }

    /// Wait until the caller's reference is the only one left.
    pub async fn wait_until_exclusive(&self, cell_id: &str, retries: u32, interval: Duration) -> DavResult<()> {
        for _ in 0..retries {
            if self.reference_count(cell_id) <= 1 {
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
        if self.reference_count(cell_id) <= 1 {
            return Ok(());
        }
        warn!(
            cell_id,
            references = self.reference_count(cell_id),
            "Cell still in use; giving up"
        );
        Err(cell_busy(cell_id))
    }

    /// Mark the Cell as being deleted until the returned guard drops.
    pub fn begin_bulk_deletion(self: &Arc<Self>, cell_id: &str) -> BulkDeletionGuard {
        self.statuses.insert(cell_id.to_string(), CellStatus::BulkDeletion);
        debug!(cell_id, "Cell status set to bulk deletion");
        BulkDeletionGuard {
            tracker: Arc::clone(self),
            cell_id: cell_id.to_string(),
        }
    }

    /// Drop bookkeeping for cells nobody references.
    pub fn cleanup(&self) {
        self.references.retain(|_, c| c.load(Ordering::SeqCst) > 0);
    }
}

/// A request's hold on a Cell. Released on drop.
#[derive(Debug)]
pub struct CellReference {
    cell_id: String,
    counter: Arc<AtomicUsize>,
}

impl CellReference {
    pub fn cell_id(&self) -> &str {
        &self.cell_id
    }
}

impl Drop for CellReference {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        trace!(cell_id = %self.cell_id, "Cell reference released");
    }
}

/// Restores [`CellStatus::Normal`] when dropped, on success or failure.
#[derive(Debug)]
pub struct BulkDeletionGuard {
    tracker: Arc<CellAccessTracker>,
    cell_id: String,
}

impl Drop for BulkDeletionGuard {
    fn drop(&mut self) {
        self.tracker.statuses.remove(&self.cell_id);
        debug!(cell_id = %self.cell_id, "Cell status restored");
    }
}
