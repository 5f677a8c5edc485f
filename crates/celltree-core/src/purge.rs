//! Background removal of a deleted Cell's data.
//!
//! Cell deletion only removes the Cell document and returns; everything the
//! Cell owned is removed here, off the request path. A purge never stops at
//! the first failure: each failed item is logged and the purge moves on.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::blob::{BinaryDataAccessor, BlobError};
use crate::control::ControlStore;
use crate::node::ResourceNode;
use crate::query::{ScopeFilter, SearchRequest};
use crate::store::{DocType, DocumentStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeJob {
    pub cell_id: String,
    pub cell_name: String,
}

/// What a purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub documents: usize,
    pub nodes: usize,
    pub blobs: usize,
    pub control_objects: usize,
    pub failures: usize,
}

/// Removes all data owned by one Cell.
#[derive(Debug, Clone)]
pub struct Purger {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BinaryDataAccessor>,
    control: ControlStore,
    page_size: usize,
}

impl Purger {
    pub fn new(store: Arc<dyn DocumentStore>, blobs: Arc<dyn BinaryDataAccessor>, top_num: usize) -> Self {
        Self {
            control: ControlStore::new(Arc::clone(&store), top_num),
            store,
            blobs,
            page_size: top_num,
        }
    }

    #[instrument(level = "info", skip_all, fields(cell = %job.cell_name, cell_id = %job.cell_id))]
    pub async fn purge(&self, job: &PurgeJob) -> PurgeReport {
        let mut report = PurgeReport::default();
        for doc_type in [DocType::Snapshot, DocType::EventLog] {
            self.purge_documents(&job.cell_id, doc_type, &mut report).await;
        }
        self.purge_nodes(&job.cell_id, &mut report).await;
        report.control_objects = self.control.delete_cell_objects(&job.cell_id).await;
        info!(
            documents = report.documents,
            nodes = report.nodes,
            blobs = report.blobs,
            control_objects = report.control_objects,
            failures = report.failures,
            "Cell purged"
        );
        report
    }

    fn page(&self, cell_id: &str) -> SearchRequest {
        SearchRequest::scoped(ScopeFilter::new(cell_id)).size(self.page_size)
    }

    async fn purge_documents(&self, cell_id: &str, doc_type: DocType, report: &mut PurgeReport) {
        loop {
            let hits = match self.store.search(doc_type, &self.page(cell_id)).await {
                Ok(hits) if !hits.is_empty() => hits,
                Ok(_) => return,
                Err(e) => {
                    warn!(cell_id, %doc_type, error = %e, "Search failed during purge");
                    report.failures += 1;
                    return;
                }
            };
            let mut progress = false;
            for hit in hits {
                match self.store.delete(doc_type, &hit.id, None).await {
                    Ok(()) => {
                        report.documents += 1;
                        progress = true;
                    }
                    Err(e) => {
                        warn!(cell_id, %doc_type, id = %hit.id, error = %e, "Failed to purge document");
                        report.failures += 1;
                    }
                }
            }
            if !progress {
                return;
            }
        }
    }

    async fn purge_nodes(&self, cell_id: &str, report: &mut PurgeReport) {
        loop {
            let hits = match self.store.search(DocType::DavNode, &self.page(cell_id)).await {
                Ok(hits) if !hits.is_empty() => hits,
                Ok(_) => return,
                Err(e) => {
                    warn!(cell_id, error = %e, "Node search failed during purge");
                    report.failures += 1;
                    return;
                }
            };
            let mut progress = false;
            for hit in hits {
                let is_file = ResourceNode::from_document(hit.doc).is_ok_and(|n| n.file().is_some());
                if is_file {
                    match self.blobs.delete(&hit.id).await {
                        Ok(()) => report.blobs += 1,
                        Err(BlobError::NotFound { .. }) => {}
                        Err(e) => {
                            warn!(cell_id, id = %hit.id, error = %e, "Failed to purge content");
                            report.failures += 1;
                        }
                    }
                }
                match self.store.delete(DocType::DavNode, &hit.id, None).await {
                    Ok(()) => {
                        report.nodes += 1;
                        progress = true;
                    }
                    Err(e) => {
                        warn!(cell_id, id = %hit.id, error = %e, "Failed to purge node");
                        report.failures += 1;
                    }
                }
            }
            if !progress {
                return;
            }
        }
    }
}

/// Supervised background task running purge jobs in submission order.
#[derive(Debug)]
pub struct PurgeWorker {
    sender: Mutex<Option<mpsc::UnboundedSender<PurgeJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    completed: watch::Receiver<u64>,
}

impl PurgeWorker {
    /// Start the worker. Must be called inside a Tokio runtime.
    pub fn spawn(purger: Purger) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<PurgeJob>();
        let (done_tx, completed) = watch::channel(0u64);
        let handle = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                purger.purge(&job).await;
                done_tx.send_modify(|n| *n += 1);
            }
            debug!("Purge worker stopped");
        });
        Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            completed,
        }
    }

    /// Queue a job. Returns false once the worker has shut down.
    pub fn submit(&self, job: PurgeJob) -> bool {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => {
                warn!(cell = %job.cell_name, "Purge worker is shut down; job dropped");
                false
            }
        }
    }

    /// Count of finished jobs, updated after each one.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.completed.clone()
    }

    /// Finish queued jobs, then stop.
    pub async fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Purge worker ended abnormally");
        }
    }
}

impl Drop for PurgeWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}
