//! Engine wiring.
//!
//! [`Engine`] owns one handle of each shared service and is the only place
//! they are constructed. Everything below it receives an explicit
//! [`EngineContext`].

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::auth::{AccessContext, TransCellToken, TrustResolver};
use crate::blob::{BinaryDataAccessor, MemoryBlobStore};
use crate::cache::MetadataCache;
use crate::cell::CellAccessTracker;
use crate::acl::Acl;
use crate::component::{AclTranslator, NodeScope, ResourceComponent};
use crate::config::{ConfigError, EngineConfig};
use crate::control::{BoxDoc, CellDoc, ControlStore, UNIT_SCOPE};
use crate::destination::load_node;
use crate::error::{ConflictReason, DavContext, DavError, DavResult};
use crate::lock::{LockCategory, LockManager};
use crate::move_exec::MoveExecutor;
use crate::path::ResourcePath;
use crate::purge::{PurgeJob, PurgeWorker, Purger};
use crate::store::{DocType, DocumentStore, MemoryDocumentStore};

/// Shared services handed to every component.
#[derive(Debug)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BinaryDataAccessor>,
    pub locks: LockManager,
    pub cache: MetadataCache,
    pub control: ControlStore,
    pub cells: Arc<CellAccessTracker>,
    pub mover: MoveExecutor,
}

#[derive(Debug)]
pub struct Engine {
    ctx: Arc<EngineContext>,
    purge: PurgeWorker,
}

impl Engine {
    /// Build an engine over `store` and `blobs`.
    ///
    /// Spawns the purge worker, so this must run inside a Tokio runtime.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BinaryDataAccessor>,
    ) -> Result<Self, ConfigError> {
        let cache = MetadataCache::moka(config.cache_ttl(), config.cache_capacity);
        Self::with_cache(config, store, blobs, cache)
    }

    pub fn with_cache(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BinaryDataAccessor>,
        cache: MetadataCache,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let purge = PurgeWorker::spawn(Purger::new(Arc::clone(&store), Arc::clone(&blobs), config.top_num));
        let ctx = EngineContext {
            locks: LockManager::new(config.lock_timeout()),
            control: ControlStore::new(Arc::clone(&store), config.top_num),
            cells: Arc::new(CellAccessTracker::new()),
            mover: MoveExecutor::new(Arc::clone(&store), Arc::clone(&blobs)),
            cache,
            store,
            blobs,
            config,
        };
        debug!(unit_url = %ctx.config.unit_url, "Engine started");
        Ok(Self {
            ctx: Arc::new(ctx),
            purge,
        })
    }

    /// Engine over in-memory document and blob stores.
    pub fn in_memory(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::new(
            config,
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStore::new()),
        )
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn control(&self) -> &ControlStore {
        &self.ctx.control
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.ctx.cache
    }

    pub fn locks(&self) -> &LockManager {
        &self.ctx.locks
    }

    pub fn cells(&self) -> &Arc<CellAccessTracker> {
        &self.ctx.cells
    }

    /// Count of completed purge jobs.
    pub fn purge_progress(&self) -> watch::Receiver<u64> {
        self.purge.subscribe()
    }

    pub fn trust_resolver(&self) -> TrustResolver {
        TrustResolver::new(self.ctx.control.clone(), self.ctx.config.unit_url.clone())
    }

    /// Look up a Cell by name through the metadata cache.
    pub async fn cell(&self, name: &str) -> DavResult<CellDoc> {
        self.ctx
            .cache
            .cell_by_name(&self.ctx.control, name)
            .await?
            .ok_or_else(|| DavError::not_found(DavContext::new().with_cell(name)))
    }

    /// Look up a Box of `cell` by name through the metadata cache.
    pub async fn box_of(&self, cell: &CellDoc, name: &str) -> DavResult<BoxDoc> {
        self.ctx
            .cache
            .box_by_name(&self.ctx.control, &cell.id, name)
            .await?
            .ok_or_else(|| DavError::not_found(DavContext::new().with_cell(cell.name.clone()).with_box(name)))
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn create_cell(&self, name: &str) -> DavResult<CellDoc> {
        let _lock = self.ctx.locks.acquire(LockCategory::Cell, UNIT_SCOPE, Some(name)).await?;
        let cell = self
            .ctx
            .control
            .create_cell(name, &self.ctx.config.cell_url(name))
            .await?;
        self.ctx.cache.clear_cell(&cell);
        Ok(cell)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn create_box(&self, cell_name: &str, box_name: &str, schema: Option<&str>) -> DavResult<BoxDoc> {
        let cell = self.cell(cell_name).await?;
        let _reference = self.ctx.cells.enter(&cell.id)?;
        let _lock = self.ctx.locks.acquire(LockCategory::Cell, &cell.id, None).await?;
        let box_doc = self.ctx.control.create_box(&cell, box_name, schema).await?;
        self.ctx.cache.clear_box(&box_doc);
        Ok(box_doc)
    }

    /// Delete an empty Box. Roles or relations defined in it, or any
    /// resource under its root, keep it alive.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete_box(&self, cell_name: &str, box_name: &str) -> DavResult<()> {
        let cell = self.cell(cell_name).await?;
        let _reference = self.ctx.cells.enter(&cell.id)?;
        let _cell_lock = self.ctx.locks.acquire(LockCategory::Cell, &cell.id, None).await?;
        let box_doc = self.box_of(&cell, box_name).await?;
        let _box_lock = self.ctx.locks.acquire(LockCategory::Dav, &box_doc.id, None).await?;

        let context = DavContext::new().with_cell(cell.name.clone()).with_box(box_name);
        let root = load_node(self.ctx.store.as_ref(), &box_doc.root_node_id).await?;
        if root.is_some_and(|r| r.doc.child_count() > 0) {
            return Err(DavError::conflict(ConflictReason::HasChildren, context));
        }
        for doc_type in [DocType::Role, DocType::Relation] {
            if self.ctx.control.count_in_box(&cell.id, &box_doc.id, doc_type).await? > 0 {
                return Err(DavError::conflict(ConflictReason::HasChildren, context));
            }
        }
        self.ctx.control.delete_box_docs(&box_doc).await?;
        self.ctx.cache.clear_box(&box_doc);
        Ok(())
    }

    /// Open the resource at `path`, loaded.
    ///
    /// The returned component holds a reference on its Cell until dropped.
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub async fn open(&self, path: &ResourcePath) -> DavResult<ResourceComponent> {
        let cell = self.cell(&path.cell).await?;
        let reference = self.ctx.cells.enter(&cell.id)?;
        let box_doc = self.box_of(&cell, &path.box_name).await?;
        let scope = NodeScope::new(cell, box_doc, reference);
        let mut component = ResourceComponent::new(Arc::clone(&self.ctx), scope, path.clone());
        component.load().await?;
        Ok(component)
    }

    /// Components for every prefix of `path`, Box root first.
    pub async fn resolve(&self, path: &ResourcePath) -> DavResult<Vec<ResourceComponent>> {
        let root = self
            .open(&ResourcePath::new(path.cell.clone(), path.box_name.clone(), Vec::new()))
            .await?;
        let mut chain = Vec::with_capacity(path.segments.len() + 1);
        chain.push(root);
        for segment in &path.segments {
            let Some(last) = chain.last() else { break };
            let mut next = last.child(segment);
            next.load().await?;
            chain.push(next);
        }
        Ok(chain)
    }

    /// Access context for a trans-cell token presented to `cell_name`.
    pub async fn access_for_token(&self, cell_name: &str, token: &TransCellToken) -> DavResult<AccessContext> {
        let cell = self.cell(cell_name).await?;
        let roles = self.trust_resolver().resolve(&cell, token).await?;
        Ok(AccessContext::from_token(token, &roles))
    }

    /// Replace the Cell-level ACL, stored on the Cell root node.
    ///
    /// Role hrefs resolve against `<cellUrl>__role/__/` and only cell
    /// privileges are accepted.
    #[instrument(level = "debug", skip(self, acl), fields(aces = acl.aces.len()))]
    pub async fn set_cell_acl(&self, name: &str, acl: &Acl) -> DavResult<()> {
        let cell = self.cell(name).await?;
        let _reference = self.ctx.cells.enter(&cell.id)?;
        let context = DavContext::new().with_cell(cell.name.clone());
        let stored = AclTranslator::new(&self.ctx, &cell, None, context.clone())
            .to_stored(acl)
            .await?;

        let _lock = self.ctx.locks.acquire(LockCategory::Cell, &cell.id, None).await?;
        let root = load_node(self.ctx.store.as_ref(), &cell.root_node_id)
            .await?
            .ok_or_else(|| DavError::not_found(context))?;
        let mut doc = root.doc;
        doc.acl = Some(stored);
        doc.touch();
        let version = self
            .ctx
            .store
            .update(DocType::DavNode, &doc.id, doc.to_document()?, Some(root.version))
            .await?;
        info!(cell = %cell.name, version, "Cell ACL updated");
        Ok(())
    }

    /// The Cell-level ACL as served, relative to `<cellUrl>__role/__/`.
    pub async fn cell_acl(&self, name: &str) -> DavResult<Acl> {
        let cell = self.cell(name).await?;
        let _reference = self.ctx.cells.enter(&cell.id)?;
        let context = DavContext::new().with_cell(cell.name.clone());
        let root = load_node(self.ctx.store.as_ref(), &cell.root_node_id)
            .await?
            .ok_or_else(|| DavError::not_found(context.clone()))?;
        AclTranslator::new(&self.ctx, &cell, None, context)
            .to_wire(root.doc.acl)
            .await
    }

    /// Delete a Cell. The Cell disappears immediately; its data is purged in
    /// the background.
    #[instrument(level = "info", skip(self))]
    pub async fn delete_cell(&self, name: &str) -> DavResult<()> {
        let cell = self.cell(name).await?;
        let cells = &self.ctx.cells;
        let config = &self.ctx.config;
        let reference = cells.enter(&cell.id)?;
        cells
            .wait_until_exclusive(&cell.id, config.cell_lock_retry_count, config.cell_lock_retry_interval())
            .await?;
        let _lock = self.ctx.locks.acquire(LockCategory::Cell, &cell.id, None).await?;

        let status = cells.begin_bulk_deletion(&cell.id);
        // Requests that entered before the status flipped must drain.
        cells
            .wait_until_exclusive(&cell.id, config.cell_lock_retry_count, config.cell_lock_retry_interval())
            .await?;
        self.ctx.control.delete_cell_doc(&cell.id).await?;
        self.ctx.cache.clear_cell(&cell);
        drop(status);
        drop(reference);

        let queued = self.purge.submit(PurgeJob {
            cell_id: cell.id.clone(),
            cell_name: cell.name.clone(),
        });
        info!(cell = %cell.name, id = %cell.id, purge_queued = queued, "Cell deleted");
        Ok(())
    }

    /// Finish queued purges and stop the worker.
    pub async fn shutdown(&self) {
        self.purge.shutdown().await;
        self.ctx.locks.cleanup_unused_locks();
        self.ctx.cells.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::CollectionKind;

    fn config() -> EngineConfig {
        EngineConfig {
            unit_url: "https://unit.example/".into(),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_cell_and_box_lifecycle() {
        let engine = Engine::in_memory(config()).unwrap();
        let cell = engine.create_cell("alice").await.unwrap();
        assert_eq!(cell.url, "https://unit.example/alice/");
        assert!(matches!(
            engine.create_cell("alice").await,
            Err(DavError::Conflict {
                reason: ConflictReason::AlreadyExists,
                ..
            })
        ));

        engine.create_box("alice", "box1", None).await.unwrap();
        let path = ResourcePath::parse("/alice/box1/").unwrap();
        let root = engine.open(&path).await.unwrap();
        assert!(root.exists());
        assert_eq!(engine.cells().reference_count(&cell.id), 1);
        drop(root);
        assert_eq!(engine.cells().reference_count(&cell.id), 0);

        engine.delete_box("alice", "box1").await.unwrap();
        assert!(matches!(engine.open(&path).await, Err(DavError::NotFound { .. })));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_empty_box_is_kept() {
        let engine = Engine::in_memory(config()).unwrap();
        engine.create_cell("alice").await.unwrap();
        engine.create_box("alice", "box1", None).await.unwrap();
        let mut col = engine
            .open(&ResourcePath::parse("/alice/box1/docs").unwrap())
            .await
            .unwrap();
        col.mkcol(CollectionKind::WebDav).await.unwrap();
        drop(col);

        assert!(matches!(
            engine.delete_box("alice", "box1").await,
            Err(DavError::Conflict {
                reason: ConflictReason::HasChildren,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_resolve_returns_prefix_chain() {
        let engine = Engine::in_memory(config()).unwrap();
        engine.create_cell("alice").await.unwrap();
        engine.create_box("alice", "box1", None).await.unwrap();
        let mut col = engine
            .open(&ResourcePath::parse("/alice/box1/a").unwrap())
            .await
            .unwrap();
        col.mkcol(CollectionKind::WebDav).await.unwrap();

        let chain = engine
            .resolve(&ResourcePath::parse("/alice/box1/a/b").unwrap())
            .await
            .unwrap();
        assert_eq!(chain.len(), 3);
        assert!(chain[0].exists());
        assert!(chain[1].exists());
        assert!(!chain[2].exists());
        assert_eq!(chain[2].url(), "https://unit.example/alice/box1/a/b");
    }

    #[tokio::test]
    async fn test_delete_cell_refuses_while_in_use() {
        let mut cfg = config();
        cfg.cell_lock_retry_count = 2;
        cfg.cell_lock_retry_interval_ms = 1;
        let engine = Engine::in_memory(cfg).unwrap();
        engine.create_cell("alice").await.unwrap();
        engine.create_box("alice", "box1", None).await.unwrap();
        let held = engine.open(&ResourcePath::parse("/alice/box1/").unwrap()).await.unwrap();

        assert!(matches!(
            engine.delete_cell("alice").await,
            Err(DavError::Conflict {
                reason: ConflictReason::CellBusy,
                ..
            })
        ));
        drop(held);
        engine.delete_cell("alice").await.unwrap();
        assert!(matches!(engine.cell("alice").await, Err(DavError::NotFound { .. })));
        engine.shutdown().await;
    }
}
