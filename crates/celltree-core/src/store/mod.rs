//! Document store accessor with optimistic concurrency.
//!
//! The backing store is a schema-less JSON document index without
//! transactions or locks. Every document carries a version that starts at 1
//! and increases by exactly one per successful write. A document re-created
//! under the id of a deleted one continues from the deleted version, so a
//! version is never reused for one id. Writes that pass an
//! expected version fail with [`StoreError::VersionConflict`] when the stored
//! version differs; writes without one are unconditional and are only used on
//! paths already serialized by the [`LockManager`](crate::lock::LockManager).

mod memory;

pub use memory::MemoryDocumentStore;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::query::SearchRequest;

/// Store-assigned document version.
pub type Version = u64;

/// Document types (one index/type per kind of record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Cell,
    Box,
    DavNode,
    Role,
    ExtCell,
    Relation,
    ExtRole,
    Link,
    EventLog,
    Snapshot,
}

impl DocType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocType::Cell => "cell",
            DocType::Box => "box",
            DocType::DavNode => "dav_node",
            DocType::Role => "role",
            DocType::ExtCell => "ext_cell",
            DocType::Relation => "relation",
            DocType::ExtRole => "ext_role",
            DocType::Link => "link",
            DocType::EventLog => "event_log",
            DocType::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub id: String,
    pub version: Version,
    pub doc: T,
}

impl<T> Versioned<T> {
    pub fn new(id: impl Into<String>, version: Version, doc: T) -> Self {
        Self {
            id: id.into(),
            version,
            doc,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            id: self.id,
            version: self.version,
            doc: f(self.doc),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{doc_type} document '{id}' not found")]
    NotFound { doc_type: DocType, id: String },

    #[error("{doc_type} document '{id}' version conflict (expected {expected:?}, found {actual:?})")]
    VersionConflict {
        doc_type: DocType,
        id: String,
        expected: Option<Version>,
        actual: Option<Version>,
    },

    #[error("store operation '{op}' timed out")]
    Timeout { op: String },

    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One write inside a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOp {
    /// Create or overwrite a document with an explicit id.
    Index {
        doc_type: DocType,
        id: String,
        doc: Value,
    },
    Update {
        doc_type: DocType,
        id: String,
        doc: Value,
        expected: Option<Version>,
    },
    Delete {
        doc_type: DocType,
        id: String,
        expected: Option<Version>,
    },
}

impl BulkOp {
    pub fn id(&self) -> &str {
        match self {
            BulkOp::Index { id, .. } | BulkOp::Update { id, .. } | BulkOp::Delete { id, .. } => id,
        }
    }
}

/// Per-item outcome of a bulk request. Deletes report `None` on success.
#[derive(Debug)]
pub struct BulkItemResult {
    pub id: String,
    pub result: Result<Option<Version>, StoreError>,
}

/// CRUD and search over a versioned JSON document store.
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    async fn get(&self, doc_type: DocType, id: &str) -> Result<Option<Versioned<Value>>, StoreError>;

    /// Create a document, assigning an id when none is given.
    ///
    /// With `expected` set, the current version must match (a missing
    /// document never matches); without it the write is unconditional.
    /// Re-creating a deleted id yields a version above its last one.
    async fn create(
        &self,
        doc_type: DocType,
        id: Option<&str>,
        doc: Value,
        expected: Option<Version>,
    ) -> Result<(String, Version), StoreError>;

    async fn update(
        &self,
        doc_type: DocType,
        id: &str,
        doc: Value,
        expected: Option<Version>,
    ) -> Result<Version, StoreError>;

    async fn delete(&self, doc_type: DocType, id: &str, expected: Option<Version>) -> Result<(), StoreError>;

    async fn search(
        &self,
        doc_type: DocType,
        request: &SearchRequest,
    ) -> Result<Vec<Versioned<Value>>, StoreError>;

    async fn count(&self, doc_type: DocType, request: &SearchRequest) -> Result<u64, StoreError>;

    /// Apply independent writes. Items succeed or fail individually.
    async fn bulk(&self, ops: Vec<BulkOp>) -> Result<Vec<BulkItemResult>, StoreError>;
}

/// Fetch and deserialize a typed document.
pub async fn get_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    doc_type: DocType,
    id: &str,
) -> Result<Option<Versioned<T>>, StoreError> {
    match store.get(doc_type, id).await? {
        Some(v) => {
            let doc = serde_json::from_value(v.doc)?;
            Ok(Some(Versioned::new(v.id, v.version, doc)))
        }
        None => Ok(None),
    }
}

/// Search and deserialize typed documents.
pub async fn search_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    doc_type: DocType,
    request: &SearchRequest,
) -> Result<Vec<Versioned<T>>, StoreError> {
    store
        .search(doc_type, request)
        .await?
        .into_iter()
        .map(|v| {
            let doc = serde_json::from_value(v.doc)?;
            Ok(Versioned::new(v.id, v.version, doc))
        })
        .collect()
}

/// Serialize a record for storage.
pub fn to_document<T: Serialize>(record: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(record)?)
}
