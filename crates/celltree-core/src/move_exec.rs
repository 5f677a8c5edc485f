//! MOVE execution.
//!
//! A move rewrites up to four documents: the source parent (unlink), the
//! destination parent (link), the moved node (new `parent_id`) and an
//! overwritten destination node (delete). The store has no multi-document
//! transactions, so the writes go out as one version-checked bulk request and
//! every item that succeeded is restored from its snapshot when any item fails.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::blob::{BinaryDataAccessor, BlobError};
use crate::error::{DavContext, DavError, DavResult, ServerErrorReason};
use crate::node::ResourceNode;
use crate::store::{BulkOp, DocType, DocumentStore, StoreError, Versioned};

/// Everything the executor needs, read under the Box lock.
#[derive(Debug, Clone)]
pub struct MovePlan {
    pub node: Versioned<ResourceNode>,
    pub source_parent: Versioned<ResourceNode>,
    pub source_name: String,
    /// `None` when the node stays in its parent (rename).
    pub destination_parent: Option<Versioned<ResourceNode>>,
    pub destination_name: String,
    /// Existing node at the destination, replaced by the move.
    pub overwritten: Option<Versioned<ResourceNode>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Updated,
    Deleted,
}

/// Pre-move image of one document, kept for rollback.
#[derive(Debug, Clone)]
struct Snapshot {
    id: String,
    kind: WriteKind,
    before: Value,
}

#[derive(Debug, Clone)]
pub struct MoveExecutor {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BinaryDataAccessor>,
}

impl MoveExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, blobs: Arc<dyn BinaryDataAccessor>) -> Self {
        Self { store, blobs }
    }

    /// Apply the move. Returns the moved node as stored.
    #[instrument(level = "debug", skip_all, fields(node = %plan.node.id, to = %plan.destination_name))]
    pub async fn execute(&self, plan: MovePlan) -> DavResult<Versioned<ResourceNode>> {
        let context = DavContext::new().with_node_id(plan.node.id.clone());
        let mut ops = Vec::with_capacity(4);
        let mut snapshots = Vec::with_capacity(4);

        let mut moved = plan.node.doc.clone();
        let mut source_parent = plan.source_parent.doc.clone();
        unlink(&mut source_parent, &plan.source_name, &context)?;

        match plan.destination_parent {
            None => {
                link(&mut source_parent, &plan.destination_name, &moved.id, &context)?;
                source_parent.touch();
                push_update(&mut ops, &mut snapshots, &plan.source_parent, &source_parent)?;
            }
            Some(ref destination_parent) => {
                source_parent.touch();
                push_update(&mut ops, &mut snapshots, &plan.source_parent, &source_parent)?;

                let mut target = destination_parent.doc.clone();
                link(&mut target, &plan.destination_name, &moved.id, &context)?;
                target.touch();
                moved.parent_id = Some(target.id.clone());
                push_update(&mut ops, &mut snapshots, destination_parent, &target)?;
            }
        }

        moved.touch();
        let node_index = ops.len();
        push_update(&mut ops, &mut snapshots, &plan.node, &moved)?;

        if let Some(ref overwritten) = plan.overwritten {
            ops.push(BulkOp::Delete {
                doc_type: DocType::DavNode,
                id: overwritten.id.clone(),
                expected: Some(overwritten.version),
            });
            snapshots.push(Snapshot {
                id: overwritten.id.clone(),
                kind: WriteKind::Deleted,
                before: overwritten.doc.to_document()?,
            });
        }

        let results = self.store.bulk(ops).await?;

        let mut succeeded = Vec::new();
        let mut first_failure: Option<StoreError> = None;
        let mut node_version = None;
        for (index, (item, snapshot)) in results.into_iter().zip(snapshots).enumerate() {
            match item.result {
                Ok(version) => {
                    if index == node_index {
                        node_version = version;
                    }
                    succeeded.push(snapshot);
                }
                Err(e) => {
                    warn!(id = %item.id, error = %e, "Move write failed");
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
        }

        if let Some(failure) = first_failure {
            return Err(self.roll_back(succeeded, failure, context).await);
        }

        let version = node_version.ok_or_else(|| {
            DavError::server_error(
                ServerErrorReason::Inconsistency("bulk update returned no version".into()),
                context.clone(),
            )
        })?;

        if let Some(overwritten) = plan.overwritten
            && overwritten.doc.file().is_some()
        {
            match self.blobs.delete(&overwritten.id).await {
                Ok(()) | Err(BlobError::NotFound { .. }) => {}
                Err(e) => warn!(id = %overwritten.id, error = %e, "Failed to delete overwritten content"),
            }
        }

        info!(node = %moved.id, version, "Move completed");
        Ok(Versioned::new(moved.id.clone(), version, moved))
    }

    /// Restore every succeeded write. Returns the error to report.
    async fn roll_back(&self, succeeded: Vec<Snapshot>, failure: StoreError, context: DavContext) -> DavError {
        let mut complete = true;
        for snapshot in succeeded {
            let result = match snapshot.kind {
                WriteKind::Updated => self
                    .store
                    .update(DocType::DavNode, &snapshot.id, snapshot.before.clone(), None)
                    .await
                    .map(|_| ()),
                WriteKind::Deleted => self
                    .store
                    .create(DocType::DavNode, Some(&snapshot.id), snapshot.before.clone(), None)
                    .await
                    .map(|_| ()),
            };
            match result {
                Ok(()) => debug!(id = %snapshot.id, "Move write rolled back"),
                Err(e) => {
                    complete = false;
                    error!(
                        id = %snapshot.id,
                        snapshot = %snapshot.before,
                        error = %e,
                        "Rollback of move write failed; document must be restored manually"
                    );
                }
            }
        }

        if !complete {
            return DavError::server_error(ServerErrorReason::RollbackFailed, context);
        }
        warn!(%context, cause = %failure, "Move rolled back");
        match failure {
            StoreError::VersionConflict { .. } => DavError::PreconditionFailed { context },
            _ => DavError::server_error(ServerErrorReason::MoveRolledBack, context),
        }
    }
}

fn push_update(
    ops: &mut Vec<BulkOp>,
    snapshots: &mut Vec<Snapshot>,
    before: &Versioned<ResourceNode>,
    after: &ResourceNode,
) -> DavResult<()> {
    ops.push(BulkOp::Update {
        doc_type: DocType::DavNode,
        id: before.id.clone(),
        doc: after.to_document()?,
        expected: Some(before.version),
    });
    snapshots.push(Snapshot {
        id: before.id.clone(),
        kind: WriteKind::Updated,
        before: before.doc.to_document()?,
    });
    Ok(())
}

fn unlink(parent: &mut ResourceNode, name: &str, context: &DavContext) -> DavResult<()> {
    let children = parent.children_mut().ok_or_else(|| not_collection(context))?;
    if children.remove(name).is_none() {
        return Err(DavError::not_found(context.clone()));
    }
    Ok(())
}

fn link(parent: &mut ResourceNode, name: &str, id: &str, context: &DavContext) -> DavResult<()> {
    let children = parent.children_mut().ok_or_else(|| not_collection(context))?;
    children.insert(name.to_string(), id.to_string());
    Ok(())
}

fn not_collection(context: &DavContext) -> DavError {
    DavError::server_error(
        ServerErrorReason::Inconsistency("parent of a moved node is not a collection".into()),
        context.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::destination::load_node;
    use crate::node::{CollectionKind, FileMeta};
    use crate::store::{MemoryDocumentStore, to_document};
    use bytes::Bytes;

    struct Fixture {
        store: Arc<MemoryDocumentStore>,
        blobs: Arc<MemoryBlobStore>,
        root: ResourceNode,
        docs: ResourceNode,
        file: ResourceNode,
        other: ResourceNode,
    }

    fn file_node(parent: &ResourceNode) -> ResourceNode {
        ResourceNode::new_file(
            "c1",
            "b1",
            &parent.id,
            FileMeta {
                content_type: "text/plain".into(),
                content_length: 3,
            },
        )
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryDocumentStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut root = ResourceNode::box_root("c1", "b1");
        let docs = ResourceNode::collection("c1", "b1", &root.id, CollectionKind::WebDav);
        let file = file_node(&root);
        let other = file_node(&root);
        let children = root.children_mut().unwrap();
        children.insert("docs".into(), docs.id.clone());
        children.insert("a.txt".into(), file.id.clone());
        children.insert("b.txt".into(), other.id.clone());
        for node in [&root, &docs, &file, &other] {
            store
                .create(DocType::DavNode, Some(&node.id), to_document(node).unwrap(), None)
                .await
                .unwrap();
        }
        blobs.create(&other.id, Bytes::from_static(b"old")).await.unwrap();
        Fixture {
            store,
            blobs,
            root,
            docs,
            file,
            other,
        }
    }

    impl Fixture {
        fn executor(&self) -> MoveExecutor {
            MoveExecutor::new(self.store.clone(), self.blobs.clone())
        }

        async fn get(&self, node: &ResourceNode) -> Versioned<ResourceNode> {
            load_node(&*self.store, &node.id).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_move_into_other_collection() {
        let f = fixture().await;
        let plan = MovePlan {
            node: f.get(&f.file).await,
            source_parent: f.get(&f.root).await,
            source_name: "a.txt".into(),
            destination_parent: Some(f.get(&f.docs).await),
            destination_name: "moved.txt".into(),
            overwritten: None,
        };
        let moved = f.executor().execute(plan).await.unwrap();
        assert_eq!(moved.version, 2);
        assert_eq!(moved.doc.parent_id.as_deref(), Some(f.docs.id.as_str()));

        let root = f.get(&f.root).await.doc;
        assert!(root.child_id("a.txt").is_none());
        let docs = f.get(&f.docs).await.doc;
        assert_eq!(docs.child_id("moved.txt"), Some(f.file.id.as_str()));
    }

    #[tokio::test]
    async fn test_rename_with_overwrite_deletes_target_and_content() {
        let f = fixture().await;
        let plan = MovePlan {
            node: f.get(&f.file).await,
            source_parent: f.get(&f.root).await,
            source_name: "a.txt".into(),
            destination_parent: None,
            destination_name: "b.txt".into(),
            overwritten: Some(f.get(&f.other).await),
        };
        f.executor().execute(plan).await.unwrap();

        let root = f.get(&f.root).await.doc;
        assert_eq!(root.child_id("b.txt"), Some(f.file.id.as_str()));
        assert!(root.child_id("a.txt").is_none());
        assert!(load_node(&*f.store, &f.other.id).await.unwrap().is_none());
        assert!(!f.blobs.contains(&f.other.id));
    }

    #[tokio::test]
    async fn test_partial_failure_is_rolled_back() {
        let f = fixture().await;
        let before_root = f.get(&f.root).await.doc;
        let before_docs = f.get(&f.docs).await.doc;
        let plan = MovePlan {
            node: f.get(&f.file).await,
            source_parent: f.get(&f.root).await,
            source_name: "a.txt".into(),
            destination_parent: Some(f.get(&f.docs).await),
            destination_name: "moved.txt".into(),
            overwritten: None,
        };
        // Source parent succeeds, destination parent fails, node succeeds.
        f.store.inject_write_failures(1, 1);
        let err = f.executor().execute(plan).await.unwrap_err();
        assert!(matches!(
            err,
            DavError::ServerError {
                reason: ServerErrorReason::MoveRolledBack,
                ..
            }
        ));

        assert_eq!(f.get(&f.root).await.doc.children(), before_root.children());
        assert_eq!(f.get(&f.docs).await.doc.children(), before_docs.children());
        assert_eq!(f.get(&f.file).await.doc.parent_id.as_deref(), Some(f.root.id.as_str()));
    }

    #[tokio::test]
    async fn test_rolled_back_overwrite_restores_target_with_newer_version() {
        let f = fixture().await;
        for _ in 0..2 {
            f.store
                .update(DocType::DavNode, &f.other.id, to_document(&f.other).unwrap(), None)
                .await
                .unwrap();
        }
        let before = f.get(&f.other).await;
        assert_eq!(before.version, 3);
        let plan = MovePlan {
            node: f.get(&f.file).await,
            source_parent: f.get(&f.root).await,
            source_name: "a.txt".into(),
            destination_parent: None,
            destination_name: "b.txt".into(),
            overwritten: Some(before.clone()),
        };
        // Parent write fails; node update and target delete go through
        f.store.inject_write_failures(0, 1);
        let err = f.executor().execute(plan).await.unwrap_err();
        assert!(matches!(
            err,
            DavError::ServerError {
                reason: ServerErrorReason::MoveRolledBack,
                ..
            }
        ));

        let restored = f.get(&f.other).await;
        assert!(restored.version > before.version, "version went from {} to {}", before.version, restored.version);
        assert!(f.blobs.contains(&f.other.id));
        let stale = f
            .store
            .update(DocType::DavNode, &f.other.id, to_document(&f.other).unwrap(), Some(1))
            .await;
        assert!(matches!(stale, Err(StoreError::VersionConflict { .. })));
        assert_eq!(f.get(&f.root).await.doc.child_id("b.txt"), Some(f.other.id.as_str()));
    }

    #[tokio::test]
    async fn test_stale_version_reports_precondition_failure() {
        let f = fixture().await;
        let stale_node = f.get(&f.file).await;
        f.store
            .update(DocType::DavNode, &f.file.id, to_document(&f.file).unwrap(), None)
            .await
            .unwrap();
        let plan = MovePlan {
            node: stale_node,
            source_parent: f.get(&f.root).await,
            source_name: "a.txt".into(),
            destination_parent: None,
            destination_name: "renamed.txt".into(),
            overwritten: None,
        };
        let err = f.executor().execute(plan).await.unwrap_err();
        assert!(err.is_precondition_failure());
        assert_eq!(f.get(&f.root).await.doc.child_id("a.txt"), Some(f.file.id.as_str()));
    }
}
