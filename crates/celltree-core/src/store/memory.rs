//! In-process document store backed by `DashMap`.
//!
//! Each document lives under a `(DocType, id)` key; version checks and writes
//! happen while holding that key's shard entry, so concurrent writers to one
//! document serialize the same way a real index does. Deleting a document
//! leaves a tombstone with its last version, so a later create under the same
//! id continues the version sequence instead of restarting at 1. The whole
//! store can be written to and restored from a JSON snapshot file.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, trace};

use super::{BulkItemResult, BulkOp, DocType, DocumentStore, StoreError, Version, Versioned};
use crate::query::SearchRequest;

#[derive(Debug, Clone)]
struct StoredDoc {
    version: Version,
    doc: Value,
}

/// Countdown of writes to let through before failing the next ones.
#[derive(Debug, Default, Clone, Copy)]
struct FailurePlan {
    skip: usize,
    fail: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    doc_type: DocType,
    id: String,
    version: Version,
    #[serde(default)]
    doc: Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    deleted: bool,
}

/// Thread-safe in-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: DashMap<(DocType, String), StoredDoc>,
    /// Last version of each deleted document.
    tombstones: DashMap<(DocType, String), Version>,
    failures: Mutex<FailurePlan>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `skip` writes succeed, then fail the following `fail` writes.
    ///
    /// Bulk items count individually. Used to exercise partial-failure paths.
    pub fn inject_write_failures(&self, skip: usize, fail: usize) {
        let mut plan = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        *plan = FailurePlan { skip, fail };
    }

    /// Number of stored documents of one type.
    pub fn count_type(&self, doc_type: DocType) -> usize {
        self.docs.iter().filter(|e| e.key().0 == doc_type).count()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Write every document to `path` as JSON (atomic via rename).
    #[instrument(level = "debug", skip(self), fields(path = %path.display()))]
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let mut records: Vec<SnapshotRecord> = self
            .docs
            .iter()
            .map(|e| SnapshotRecord {
                doc_type: e.key().0,
                id: e.key().1.clone(),
                version: e.value().version,
                doc: e.value().doc.clone(),
                deleted: false,
            })
            .chain(self.tombstones.iter().map(|e| SnapshotRecord {
                doc_type: e.key().0,
                id: e.key().1.clone(),
                version: *e.value(),
                doc: Value::Null,
                deleted: true,
            }))
            .collect();
        records.sort_by(|a, b| (a.doc_type, &a.id).cmp(&(b.doc_type, &b.id)));

        let bytes = serde_json::to_vec_pretty(&records)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::Backend(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::Backend(format!("renaming {}: {e}", tmp.display())))?;
        debug!(documents = records.len(), "Snapshot saved");
        Ok(())
    }

    /// Restore a store from a snapshot written by [`save_snapshot`](Self::save_snapshot).
    #[instrument(level = "debug", fields(path = %path.display()))]
    pub async fn load_snapshot(path: &Path) -> Result<Self, StoreError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::Backend(format!("reading {}: {e}", path.display())))?;
        let records: Vec<SnapshotRecord> = serde_json::from_slice(&bytes)?;
        let store = Self::new();
        for r in records {
            if r.deleted {
                store.tombstones.insert((r.doc_type, r.id), r.version);
                continue;
            }
            store.docs.insert(
                (r.doc_type, r.id),
                StoredDoc {
                    version: r.version,
                    doc: r.doc,
                },
            );
        }
        debug!(documents = store.len(), "Snapshot loaded");
        Ok(store)
    }

    fn check_injected_failure(&self, op: &str, id: &str) -> Result<(), StoreError> {
        let mut plan = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if plan.skip > 0 {
            plan.skip -= 1;
            return Ok(());
        }
        if plan.fail > 0 {
            plan.fail -= 1;
            return Err(StoreError::Backend(format!("injected failure on {op} of '{id}'")));
        }
        Ok(())
    }

    fn write_create(
        &self,
        doc_type: DocType,
        id: &str,
        doc: Value,
        expected: Option<Version>,
    ) -> Result<Version, StoreError> {
        self.check_injected_failure("create", id)?;
        let key = (doc_type, id.to_string());
        match self.docs.entry(key.clone()) {
            Entry::Occupied(mut e) => {
                let current = e.get().version;
                if expected.is_some_and(|v| v != current) {
                    return Err(StoreError::VersionConflict {
                        doc_type,
                        id: id.to_string(),
                        expected,
                        actual: Some(current),
                    });
                }
                let version = current + 1;
                e.insert(StoredDoc { version, doc });
                Ok(version)
            }
            Entry::Vacant(e) => {
                if expected.is_some() {
                    return Err(StoreError::VersionConflict {
                        doc_type,
                        id: id.to_string(),
                        expected,
                        actual: None,
                    });
                }
                // Lock order is always docs entry, then tombstone entry
                let version = self.tombstones.remove(&key).map_or(1, |(_, last)| last + 1);
                e.insert(StoredDoc { version, doc });
                Ok(version)
            }
        }
    }

    fn write_update(
        &self,
        doc_type: DocType,
        id: &str,
        doc: Value,
        expected: Option<Version>,
    ) -> Result<Version, StoreError> {
        self.check_injected_failure("update", id)?;
        match self.docs.entry((doc_type, id.to_string())) {
            Entry::Occupied(mut e) => {
                let current = e.get().version;
                if expected.is_some_and(|v| v != current) {
                    return Err(StoreError::VersionConflict {
                        doc_type,
                        id: id.to_string(),
                        expected,
                        actual: Some(current),
                    });
                }
                let version = current + 1;
                e.insert(StoredDoc { version, doc });
                Ok(version)
            }
            Entry::Vacant(_) => Err(StoreError::NotFound {
                doc_type,
                id: id.to_string(),
            }),
        }
    }

    fn write_delete(&self, doc_type: DocType, id: &str, expected: Option<Version>) -> Result<(), StoreError> {
        self.check_injected_failure("delete", id)?;
        match self.docs.entry((doc_type, id.to_string())) {
            Entry::Occupied(e) => {
                let current = e.get().version;
                if expected.is_some_and(|v| v != current) {
                    return Err(StoreError::VersionConflict {
                        doc_type,
                        id: id.to_string(),
                        expected,
                        actual: Some(current),
                    });
                }
                let (key, _) = e.remove_entry();
                self.tombstones.insert(key, current);
                Ok(())
            }
            Entry::Vacant(_) => Err(StoreError::NotFound {
                doc_type,
                id: id.to_string(),
            }),
        }
    }

    fn matching(&self, doc_type: DocType, request: &SearchRequest) -> Vec<Versioned<Value>> {
        let mut hits: Vec<Versioned<Value>> = self
            .docs
            .iter()
            .filter(|e| e.key().0 == doc_type && request.matches(&e.value().doc))
            .map(|e| Versioned::new(e.key().1.clone(), e.value().version, e.value().doc.clone()))
            .collect();
        hits.sort_by(|a, b| request.compare(&a.doc, &b.doc).then_with(|| a.id.cmp(&b.id)));
        hits
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, doc_type: DocType, id: &str) -> Result<Option<Versioned<Value>>, StoreError> {
        Ok(self
            .docs
            .get(&(doc_type, id.to_string()))
            .map(|e| Versioned::new(id, e.version, e.doc.clone())))
    }

    async fn create(
        &self,
        doc_type: DocType,
        id: Option<&str>,
        doc: Value,
        expected: Option<Version>,
    ) -> Result<(String, Version), StoreError> {
        let id = id.map_or_else(|| uuid::Uuid::new_v4().simple().to_string(), str::to_string);
        let version = self.write_create(doc_type, &id, doc, expected)?;
        trace!(%doc_type, %id, version, "Document created");
        Ok((id, version))
    }

    async fn update(
        &self,
        doc_type: DocType,
        id: &str,
        doc: Value,
        expected: Option<Version>,
    ) -> Result<Version, StoreError> {
        let version = self.write_update(doc_type, id, doc, expected)?;
        trace!(%doc_type, %id, version, "Document updated");
        Ok(version)
    }

    async fn delete(&self, doc_type: DocType, id: &str, expected: Option<Version>) -> Result<(), StoreError> {
        self.write_delete(doc_type, id, expected)?;
        trace!(%doc_type, %id, "Document deleted");
        Ok(())
    }

    async fn search(
        &self,
        doc_type: DocType,
        request: &SearchRequest,
    ) -> Result<Vec<Versioned<Value>>, StoreError> {
        let mut hits = self.matching(doc_type, request);
        if let Some(size) = request.page_size() {
            hits.truncate(size);
        }
        Ok(hits)
    }

    async fn count(&self, doc_type: DocType, request: &SearchRequest) -> Result<u64, StoreError> {
        Ok(self.matching(doc_type, request).len() as u64)
    }

    async fn bulk(&self, ops: Vec<BulkOp>) -> Result<Vec<BulkItemResult>, StoreError> {
        let results = ops
            .into_iter()
            .map(|op| {
                let id = op.id().to_string();
                let result = match op {
                    BulkOp::Index { doc_type, id, doc } => {
                        self.write_create(doc_type, &id, doc, None).map(Some)
                    }
                    BulkOp::Update {
                        doc_type,
                        id,
                        doc,
                        expected,
                    } => self.write_update(doc_type, &id, doc, expected).map(Some),
                    BulkOp::Delete {
                        doc_type,
                        id,
                        expected,
                    } => self.write_delete(doc_type, &id, expected).map(|()| None),
                };
                BulkItemResult { id, result }
            })
            .collect();
        Ok(results)
    }
}
