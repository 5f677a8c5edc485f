//! Tree operations on a single path inside a Box.
//!
//! A [`ResourceComponent`] names a path and caches the nodes last loaded for
//! it. Every mutation follows the same protocol:
//!
//! 1. take the Box lock
//! 2. reload the path from the Box root by id
//! 3. verify preconditions against the fresh nodes
//! 4. mutate copies and write them back with the loaded version
//! 5. release the lock (the guard releases on any exit path)
//!
//! Reads never take a lock.

use std::sync::Arc;

use bytes::Bytes;
use hyper::StatusCode;
use tracing::{debug, info, instrument, warn};

use crate::acl::{
    Acl, Ace, Principal, Privilege, RoleUrl, StoredAce, StoredAcl, StoredPrincipal, normalize_cell_url,
    relative_role_href, resolve_href, role_base_url,
};
use crate::auth::AccessContext;
use crate::blob::BlobError;
use crate::cell::CellReference;
use crate::control::{BoxDoc, CellDoc};
use crate::destination::{PathHierarchy, load_node};
use crate::engine::EngineContext;
use crate::error::{
    BadRequestReason, ConflictReason, DavContext, DavError, DavResult, ForbiddenReason, ServerErrorReason,
};
use crate::etag::{format_etag, if_match, if_none_match_hits};
use crate::lock::{LockCategory, LockGuard};
use crate::move_exec::MovePlan;
use crate::node::{CollectionKind, FileMeta, NodeBody, NodeKind, ResourceNode, SERVICE_SOURCE_NAME, property_key};
use crate::path::ResourcePath;
use crate::range::{self, RangeRequest};
use crate::store::{DocType, Version, Versioned};

/// The Cell and Box a component lives in, plus the request's hold on the Cell.
#[derive(Debug, Clone)]
pub struct NodeScope {
    pub cell: Arc<CellDoc>,
    pub box_doc: Arc<BoxDoc>,
    reference: Arc<CellReference>,
}

impl NodeScope {
    pub fn new(cell: CellDoc, box_doc: BoxDoc, reference: CellReference) -> Self {
        Self {
            cell: Arc::new(cell),
            box_doc: Arc::new(box_doc),
            reference: Arc::new(reference),
        }
    }

    pub fn cell_reference(&self) -> &CellReference {
        &self.reference
    }
}

/// Result of a PUT or MOVE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// True when the write created a resource that did not exist before.
    pub created: bool,
    pub etag: String,
    pub location: String,
}

impl WriteOutcome {
    pub fn status(&self) -> StatusCode {
        if self.created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        }
    }
}

/// Result of a GET on a file.
#[derive(Debug, Clone)]
pub struct GetResponse {
    pub status: StatusCode,
    pub etag: String,
    pub content_type: String,
    /// Size of the whole object, not of the returned slice.
    pub content_length: u64,
    pub content_range: Option<String>,
    pub body: Bytes,
}

/// One PROPPATCH instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropOp {
    Set {
        name: String,
        namespace: String,
        value: String,
    },
    Remove {
        name: String,
        namespace: String,
    },
}

impl PropOp {
    fn key(&self) -> DavResult<String> {
        let (name, namespace) = match self {
            PropOp::Set { name, namespace, .. } | PropOp::Remove { name, namespace } => (name, namespace),
        };
        if name.trim().is_empty() {
            return Err(DavError::bad_request(
                BadRequestReason::InvalidProperty("property name is empty".into()),
                DavContext::new(),
            ));
        }
        Ok(property_key(name, namespace))
    }
}

/// Per-property PROPPATCH result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropStat {
    pub key: String,
    pub status: StatusCode,
}

/// Entry of a collection listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub kind: NodeKind,
    pub etag: String,
    pub content_length: Option<u64>,
}

/// Handle for one path inside a Box.
#[derive(Debug, Clone)]
pub struct ResourceComponent {
    ctx: Arc<EngineContext>,
    scope: NodeScope,
    path: ResourcePath,
    loaded: Option<PathHierarchy>,
}

impl ResourceComponent {
    pub(crate) fn new(ctx: Arc<EngineContext>, scope: NodeScope, path: ResourcePath) -> Self {
        Self {
            ctx,
            scope,
            path,
            loaded: None,
        }
    }

    /// Handle for a child path. Nothing is loaded yet.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        Self::new(Arc::clone(&self.ctx), self.scope.clone(), self.path.join(name))
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn scope(&self) -> &NodeScope {
        &self.scope
    }

    /// Absolute URL of this resource on the unit.
    pub fn url(&self) -> String {
        format!("{}{}", self.ctx.config.unit_url.trim_end_matches('/'), self.path)
    }

    /// Whether the node existed at the last load.
    pub fn exists(&self) -> bool {
        self.current().is_some()
    }

    pub fn node(&self) -> Option<&ResourceNode> {
        self.current().map(|n| &n.doc)
    }

    pub fn version(&self) -> Option<Version> {
        self.current().map(|n| n.version)
    }

    pub fn etag(&self) -> Option<String> {
        self.current().map(|n| format_etag(n.version, n.doc.updated))
    }

    fn current(&self) -> Option<&Versioned<ResourceNode>> {
        self.loaded.as_ref().and_then(PathHierarchy::target)
    }

    fn context(&self) -> DavContext {
        self.path.context()
    }

    /// Reload the path from the Box root.
    pub async fn load(&mut self) -> DavResult<()> {
        let hierarchy =
            PathHierarchy::load(self.ctx.store.as_ref(), &self.scope.box_doc.root_node_id, &self.path).await?;
        self.loaded = Some(hierarchy);
        Ok(())
    }

    async fn lock(&self) -> DavResult<LockGuard> {
        self.ctx
            .locks
            .acquire(LockCategory::Dav, &self.scope.box_doc.id, None)
            .await
    }

    async fn reload_existing(&mut self) -> DavResult<(Versioned<ResourceNode>, PathHierarchy)> {
        self.load().await?;
        let hierarchy = self.loaded.clone().ok_or_else(|| DavError::not_found(self.context()))?;
        let node = hierarchy
            .target()
            .cloned()
            .ok_or_else(|| DavError::not_found(self.context()))?;
        Ok((node, hierarchy))
    }

    fn check_if_match(&self, node: &Versioned<ResourceNode>, header: Option<&str>) -> DavResult<()> {
        if if_match(header, &format_etag(node.version, node.doc.updated)) {
            Ok(())
        } else {
            Err(DavError::PreconditionFailed {
                context: self.context(),
            })
        }
    }

    async fn write_node(&self, node: &ResourceNode, expected: Version) -> DavResult<Version> {
        let version = self
            .ctx
            .store
            .update(DocType::DavNode, &node.id, node.to_document()?, Some(expected))
            .await?;
        Ok(version)
    }

    async fn insert_node(&self, node: &ResourceNode) -> DavResult<Version> {
        let (_, version) = self
            .ctx
            .store
            .create(DocType::DavNode, Some(&node.id), node.to_document()?, None)
            .await?;
        Ok(version)
    }

    /// Undo a node insert whose parent link failed.
    async fn discard_node(&self, id: &str) {
        if let Err(e) = self.ctx.store.delete(DocType::DavNode, id, None).await {
            warn!(path = %self.path, id, error = %e, "Failed to discard unlinked node");
        }
    }

    /// Add `name → child_id` to `parent` and persist it.
    async fn link_child(&self, parent: &Versioned<ResourceNode>, name: &str, child_id: &str) -> DavResult<Version> {
        let mut doc = parent.doc.clone();
        let children = doc.children_mut().ok_or_else(|| {
            DavError::conflict(ConflictReason::ParentNotCollection, self.context())
        })?;
        children.insert(name.to_string(), child_id.to_string());
        doc.touch();
        self.write_node(&doc, parent.version).await
    }

    fn writable_parent<'a>(&self, hierarchy: &'a PathHierarchy) -> DavResult<&'a Versioned<ResourceNode>> {
        let parent = hierarchy
            .parent()
            .ok_or_else(|| DavError::conflict(ConflictReason::ParentMissing, self.context()))?;
        match parent.doc.kind() {
            NodeKind::BoxRoot | NodeKind::WebDavCollection => Ok(parent),
            _ => Err(DavError::conflict(ConflictReason::ParentNotCollection, self.context())),
        }
    }

    /// Whether this path is the fixed `__src` child of a Service collection.
    fn is_service_source(&self, parent: &Versioned<ResourceNode>) -> bool {
        parent.doc.kind() == NodeKind::ServiceCollection && self.path.name() == Some(SERVICE_SOURCE_NAME)
    }

    /// Create a collection at this path.
    #[instrument(level = "debug", skip(self), fields(path = %self.path))]
    pub async fn mkcol(&mut self, kind: CollectionKind) -> DavResult<()> {
        let _guard = self.lock().await?;
        self.load().await?;
        let hierarchy = self.loaded.clone().ok_or_else(|| DavError::not_found(self.context()))?;
        if hierarchy.target().is_some() {
            return Err(DavError::conflict(ConflictReason::AlreadyExists, self.context()));
        }
        let parent = self.writable_parent(&hierarchy)?;
        let config = &self.ctx.config;
        if self.path.segments.len() > config.max_collection_depth {
            return Err(DavError::bad_request(
                BadRequestReason::DepthExceeded {
                    max: config.max_collection_depth,
                },
                self.context(),
            ));
        }
        if parent.doc.child_count() >= config.max_child_resources {
            return Err(DavError::bad_request(
                BadRequestReason::TooManyChildren {
                    max: config.max_child_resources,
                },
                self.context(),
            ));
        }
        if hierarchy
            .parent_chain()
            .get(1)
            .is_some_and(|g| g.kind() == NodeKind::ServiceCollection)
        {
            return Err(DavError::forbidden(ForbiddenReason::CollectionInServiceSource, self.context()));
        }

        let cell_id = &self.scope.cell.id;
        let box_id = &self.scope.box_doc.id;
        let mut node = ResourceNode::collection(cell_id, box_id, &parent.id, kind);
        let mut created = Vec::with_capacity(2);
        if kind == CollectionKind::Service {
            let source = ResourceNode::collection(cell_id, box_id, &node.id, CollectionKind::WebDav);
            if let Some(children) = node.children_mut() {
                children.insert(SERVICE_SOURCE_NAME.to_string(), source.id.clone());
            }
            self.insert_node(&source).await?;
            created.push(source.id);
        }
        if let Err(e) = self.insert_node(&node).await {
            for id in &created {
                self.discard_node(id).await;
            }
            return Err(e);
        }
        created.push(node.id.clone());

        let name = self.path.name().unwrap_or_default().to_string();
        if let Err(e) = self.link_child(parent, &name, &node.id).await {
            for id in &created {
                self.discard_node(id).await;
            }
            return Err(e);
        }
        self.load().await?;
        info!(path = %self.path, kind = node.kind().as_str(), "Collection created");
        Ok(())
    }

    /// Create or replace the file at this path.
    #[instrument(level = "debug", skip(self, body), fields(path = %self.path, size = body.len()))]
    pub async fn put(&mut self, content_type: &str, body: Bytes, if_match_header: Option<&str>) -> DavResult<WriteOutcome> {
        let _guard = self.lock().await?;
        self.load().await?;
        let hierarchy = self.loaded.clone().ok_or_else(|| DavError::not_found(self.context()))?;

        let outcome = match hierarchy.target() {
            Some(existing) => self.update_file(existing, content_type, body, if_match_header).await?,
            None => {
                if if_match_header.is_some() {
                    return Err(DavError::PreconditionFailed {
                        context: self.context(),
                    });
                }
                self.create_file(&hierarchy, content_type, body).await?
            }
        };
        self.load().await?;
        Ok(outcome)
    }

    async fn update_file(
        &self,
        existing: &Versioned<ResourceNode>,
        content_type: &str,
        body: Bytes,
        if_match_header: Option<&str>,
    ) -> DavResult<WriteOutcome> {
        if existing.doc.file().is_none() {
            return Err(DavError::bad_request(BadRequestReason::NotAFile, self.context()));
        }
        self.check_if_match(existing, if_match_header)?;

        let length = self.ctx.blobs.update(&existing.id, body).await?;
        let mut doc = existing.doc.clone();
        doc.body = NodeBody::File {
            file: FileMeta {
                content_type: content_type.to_string(),
                content_length: length,
            },
        };
        doc.touch();
        let version = self.write_node(&doc, existing.version).await?;
        info!(path = %self.path, version, length, "File updated");
        Ok(WriteOutcome {
            created: false,
            etag: format_etag(version, doc.updated),
            location: self.url(),
        })
    }

    async fn create_file(&self, hierarchy: &PathHierarchy, content_type: &str, body: Bytes) -> DavResult<WriteOutcome> {
        let Some(parent) = hierarchy.parent() else {
            return Err(DavError::not_found(self.context()));
        };
        let parent = match parent.doc.kind() {
            NodeKind::BoxRoot | NodeKind::WebDavCollection => parent,
            _ => return Err(DavError::conflict(ConflictReason::ParentNotCollection, self.context())),
        };
        let max = self.ctx.config.max_child_resources;
        if parent.doc.child_count() >= max {
            return Err(DavError::bad_request(BadRequestReason::TooManyChildren { max }, self.context()));
        }

        let mut node = ResourceNode::new_file(
            &self.scope.cell.id,
            &self.scope.box_doc.id,
            &parent.id,
            FileMeta {
                content_type: content_type.to_string(),
                content_length: 0,
            },
        );
        let length = self.ctx.blobs.create(&node.id, body).await?;
        if let NodeBody::File { ref mut file } = node.body {
            file.content_length = length;
        }
        let version = match self.insert_node(&node).await {
            Ok(version) => version,
            Err(e) => {
                self.discard_blob(&node.id).await;
                return Err(e);
            }
        };
        let name = self.path.name().unwrap_or_default().to_string();
        if let Err(e) = self.link_child(parent, &name, &node.id).await {
            self.discard_node(&node.id).await;
            self.discard_blob(&node.id).await;
            return Err(e);
        }
        info!(path = %self.path, length, "File created");
        Ok(WriteOutcome {
            created: true,
            etag: format_etag(version, node.updated),
            location: self.url(),
        })
    }

    async fn discard_blob(&self, id: &str) {
        match self.ctx.blobs.delete(id).await {
            Ok(()) | Err(BlobError::NotFound { .. }) => {}
            Err(e) => warn!(path = %self.path, id, error = %e, "Failed to discard content"),
        }
    }

    /// Read the file, honoring `Range` and `If-None-Match`.
    #[instrument(level = "debug", skip(self), fields(path = %self.path))]
    pub async fn get(&mut self, range_header: Option<&str>, if_none_match: Option<&str>) -> DavResult<GetResponse> {
        self.load().await?;
        let node = self
            .current()
            .cloned()
            .ok_or_else(|| DavError::not_found(self.context()))?;
        let Some(file) = node.doc.file() else {
            return Err(DavError::bad_request(BadRequestReason::NotAFile, self.context()));
        };
        let etag = format_etag(node.version, node.doc.updated);
        if if_none_match_hits(if_none_match, &etag) {
            return Err(DavError::NotModified {
                context: self.context(),
            });
        }

        let size = match self.ctx.blobs.size(&node.id).await {
            Ok(size) => size,
            Err(BlobError::NotFound { .. }) => return Err(self.content_missing().await),
            Err(e) => return Err(e.into()),
        };

        let (status, content_range, body) = match range::parse(range_header, size) {
            RangeRequest::Full => (StatusCode::OK, None, self.read_blob(&node.id, None).await?),
            RangeRequest::Partial(r) => (
                StatusCode::PARTIAL_CONTENT,
                Some(r.content_range(size)),
                self.read_blob(&node.id, Some((r.start, r.end))).await?,
            ),
            RangeRequest::Multiple(count) => {
                return Err(DavError::NotImplemented {
                    what: format!("multipart byte ranges ({count} requested)"),
                });
            }
            RangeRequest::Unsatisfiable => return Err(DavError::RangeNotSatisfiable { size }),
        };
        debug!(path = %self.path, status = status.as_u16(), bytes = body.len(), "File read");
        Ok(GetResponse {
            status,
            etag,
            content_type: file.content_type.clone(),
            content_length: size,
            content_range,
            body,
        })
    }

    async fn read_blob(&mut self, id: &str, range: Option<(u64, u64)>) -> DavResult<Bytes> {
        let read = match range {
            None => self.ctx.blobs.get(id).await,
            Some((start, end)) => self.ctx.blobs.get_range(id, start, end).await,
        };
        match read {
            Ok(bytes) => Ok(bytes),
            Err(BlobError::NotFound { .. }) => Err(self.content_missing().await),
            Err(e) => Err(e.into()),
        }
    }

    /// Content vanished under a read: gone if the node went too, else transient.
    async fn content_missing(&mut self) -> DavError {
        match self.load().await {
            Ok(()) if !self.exists() => DavError::not_found(self.context()),
            Ok(()) => DavError::Unavailable {
                context: self.context(),
            },
            Err(e) => e,
        }
    }

    /// Set and remove dead properties.
    #[instrument(level = "debug", skip(self, ops), fields(path = %self.path, ops = ops.len()))]
    pub async fn proppatch(&mut self, ops: &[PropOp]) -> DavResult<Vec<PropStat>> {
        let keys = ops.iter().map(PropOp::key).collect::<DavResult<Vec<_>>>()?;
        let _guard = self.lock().await?;
        let (node, _) = self.reload_existing().await?;

        let mut doc = node.doc.clone();
        let mut stats = Vec::with_capacity(ops.len());
        for (op, key) in ops.iter().zip(keys) {
            let status = match op {
                PropOp::Set { value, .. } => {
                    doc.properties.insert(key.clone(), value.clone());
                    StatusCode::OK
                }
                PropOp::Remove { .. } => {
                    if doc.properties.remove(&key).is_some() {
                        StatusCode::OK
                    } else {
                        StatusCode::NOT_FOUND
                    }
                }
            };
            stats.push(PropStat { key, status });
        }
        doc.touch();
        let version = self.write_node(&doc, node.version).await?;
        self.load().await?;
        info!(path = %self.path, version, properties = stats.len(), "Properties updated");
        Ok(stats)
    }

    fn acl_translator(&self) -> AclTranslator<'_> {
        AclTranslator::new(
            &self.ctx,
            &self.scope.cell,
            Some(self.scope.box_doc.name.as_str()),
            self.context(),
        )
    }

    /// Replace the ACL of this node.
    #[instrument(level = "debug", skip(self, acl), fields(path = %self.path, aces = acl.aces.len()))]
    pub async fn set_acl(&mut self, acl: &Acl) -> DavResult<()> {
        let stored = self.acl_translator().to_stored(acl).await?;
        let _guard = self.lock().await?;
        let (node, _) = self.reload_existing().await?;
        let mut doc = node.doc.clone();
        doc.acl = Some(stored);
        doc.touch();
        let version = self.write_node(&doc, node.version).await?;
        self.load().await?;
        info!(path = %self.path, version, "ACL updated");
        Ok(())
    }

    /// The ACL as served: role hrefs relative to this Box's role base.
    /// Entries for deleted roles are dropped.
    #[instrument(level = "debug", skip(self), fields(path = %self.path))]
    pub async fn acl(&mut self) -> DavResult<Acl> {
        self.load().await?;
        let node = self
            .current()
            .cloned()
            .ok_or_else(|| DavError::not_found(self.context()))?;
        self.acl_translator().to_wire(node.doc.acl).await
    }

    /// Delete the resource.
    #[instrument(level = "debug", skip(self), fields(path = %self.path))]
    pub async fn delete(&mut self, if_match_header: Option<&str>) -> DavResult<()> {
        let _guard = self.lock().await?;
        let (node, hierarchy) = self.reload_existing().await?;
        let Some(parent) = hierarchy.parent() else {
            return Err(DavError::bad_request(
                BadRequestReason::InvalidPath("a Box root cannot be deleted".into()),
                self.context(),
            ));
        };
        self.check_if_match(&node, if_match_header)?;
        if self.is_service_source(parent) {
            return Err(DavError::forbidden(ForbiddenReason::ServiceSourceFixed, self.context()));
        }

        match node.doc.kind() {
            NodeKind::ServiceCollection => self.delete_service_source(&node).await?,
            kind if kind.is_collection() && node.doc.child_count() > 0 => {
                return Err(DavError::conflict(ConflictReason::HasChildren, self.context()));
            }
            _ => {}
        }

        let name = self.path.name().unwrap_or_default();
        let mut parent_doc = parent.doc.clone();
        let listed = parent_doc
            .children_mut()
            .is_some_and(|children| children.remove(name).is_some());
        if !listed {
            return Err(DavError::not_found(self.context()));
        }
        parent_doc.touch();
        self.write_node(&parent_doc, parent.version).await?;
        self.ctx
            .store
            .delete(DocType::DavNode, &node.id, Some(node.version))
            .await?;
        self.loaded = None;

        if node.doc.file().is_some() {
            match self.ctx.blobs.delete(&node.id).await {
                Ok(()) | Err(BlobError::NotFound { .. }) => {}
                Err(e) => {
                    warn!(path = %self.path, error = %e, "Node deleted but its content was not");
                    return Err(DavError::server_error(
                        ServerErrorReason::BlobDeleteFailed(e.to_string()),
                        self.context().with_node_id(node.id.clone()),
                    ));
                }
            }
        }
        info!(path = %self.path, kind = node.doc.kind().as_str(), "Resource deleted");
        Ok(())
    }

    async fn delete_service_source(&self, service: &Versioned<ResourceNode>) -> DavResult<()> {
        let inconsistent = |why: &str| {
            DavError::server_error(
                ServerErrorReason::Inconsistency(why.to_string()),
                self.context().with_node_id(service.id.clone()),
            )
        };
        if service
            .doc
            .children()
            .is_some_and(|c| c.keys().any(|k| k != SERVICE_SOURCE_NAME))
        {
            return Err(DavError::conflict(ConflictReason::HasChildren, self.context()));
        }
        let source_id = service
            .doc
            .child_id(SERVICE_SOURCE_NAME)
            .ok_or_else(|| inconsistent("service collection has no source collection"))?;
        let source = load_node(self.ctx.store.as_ref(), source_id)
            .await?
            .ok_or_else(|| inconsistent("service source collection is missing"))?;
        if source.doc.kind() != NodeKind::WebDavCollection {
            return Err(inconsistent("service source is not a collection"));
        }
        if source.doc.child_count() > 0 {
            return Err(DavError::conflict(ConflictReason::HasChildren, self.context()));
        }
        self.ctx
            .store
            .delete(DocType::DavNode, &source.id, Some(source.version))
            .await?;
        Ok(())
    }

    /// Move (or rename) this resource to `destination` within the same Box.
    #[instrument(level = "debug", skip(self, access), fields(from = %self.path, to = %destination))]
    pub async fn move_to(
        &mut self,
        destination: &ResourcePath,
        overwrite: bool,
        if_match_header: Option<&str>,
        access: &AccessContext,
    ) -> DavResult<WriteOutcome> {
        if !self.path.same_box(destination) {
            return Err(DavError::bad_request(BadRequestReason::CrossBoxMove, destination.context()));
        }
        let _guard = self.lock().await?;
        let (node, hierarchy) = self.reload_existing().await?;
        self.check_if_match(&node, if_match_header)?;
        let Some(source_parent) = hierarchy.parent().cloned() else {
            return Err(DavError::bad_request(
                BadRequestReason::InvalidPath("a Box root cannot be moved".into()),
                self.context(),
            ));
        };
        if self.is_service_source(&source_parent) {
            return Err(DavError::forbidden(ForbiddenReason::ServiceSourceFixed, self.context()));
        }

        let target = PathHierarchy::load(self.ctx.store.as_ref(), &self.scope.box_doc.root_node_id, destination).await?;
        target.validate(overwrite, &node.doc, self.ctx.config.max_child_resources)?;
        if !access.has_privilege(&target.parent_chain(), Privilege::Bind) {
            return Err(DavError::forbidden(
                ForbiddenReason::AccessDenied(Privilege::Bind.as_str().to_string()),
                destination.context(),
            ));
        }
        let Some(destination_parent) = target.parent().cloned() else {
            return Err(DavError::conflict(ConflictReason::ParentMissing, destination.context()));
        };
        let overwritten = target.target().cloned();
        let created = overwritten.is_none();

        let plan = MovePlan {
            destination_parent: (destination_parent.id != source_parent.id).then_some(destination_parent),
            source_parent,
            source_name: self.path.name().unwrap_or_default().to_string(),
            destination_name: destination.name().unwrap_or_default().to_string(),
            overwritten,
            node,
        };
        let moved = self.ctx.mover.execute(plan).await?;

        let from = std::mem::replace(&mut self.path, destination.clone());
        self.load().await?;
        info!(%from, to = %self.path, overwrote = !created, "Resource moved");
        Ok(WriteOutcome {
            created,
            etag: format_etag(moved.version, moved.doc.updated),
            location: self.url(),
        })
    }

    /// Names, kinds and ETags of the children (empty for a file).
    #[instrument(level = "debug", skip(self), fields(path = %self.path))]
    pub async fn list_children(&mut self) -> DavResult<Vec<ChildEntry>> {
        self.load().await?;
        let node = self
            .current()
            .cloned()
            .ok_or_else(|| DavError::not_found(self.context()))?;
        let Some(children) = node.doc.children() else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::with_capacity(children.len());
        for (name, id) in children {
            match load_node(self.ctx.store.as_ref(), id).await? {
                Some(child) => entries.push(ChildEntry {
                    name: name.clone(),
                    kind: child.doc.kind(),
                    etag: format_etag(child.version, child.doc.updated),
                    content_length: child.doc.file().map(|f| f.content_length),
                }),
                None => warn!(path = %self.path, child = %name, id = %id, "Listed child is not stored"),
            }
        }
        Ok(entries)
    }
}

/// Translates ACLs between role hrefs and role ids for one Cell.
///
/// Hrefs are relative to the role base of one Box, or of the Cell itself
/// (`<cellUrl>__role/__/`) when `box_name` is `None`. A Cell-level ACL takes
/// only cell privileges; every other ACL only box privileges.
pub(crate) struct AclTranslator<'a> {
    ctx: &'a EngineContext,
    cell: &'a CellDoc,
    box_name: Option<&'a str>,
    context: DavContext,
}

impl<'a> AclTranslator<'a> {
    pub(crate) fn new(ctx: &'a EngineContext, cell: &'a CellDoc, box_name: Option<&'a str>, context: DavContext) -> Self {
        Self {
            ctx,
            cell,
            box_name,
            context,
        }
    }

    fn cell_level(&self) -> bool {
        self.box_name.is_none()
    }

    fn base(&self) -> String {
        role_base_url(&self.cell.url, self.box_name)
    }

    pub(crate) async fn to_stored(&self, acl: &Acl) -> DavResult<StoredAcl> {
        let cell_level = self.cell_level();
        acl.validate(cell_level)?;
        let cell_url = normalize_cell_url(&self.cell.url);
        let base = acl.base.clone().unwrap_or_else(|| self.base());

        let mut aces = Vec::with_capacity(acl.aces.len());
        for ace in &acl.aces {
            let privileges = acl.parse_privileges(ace, cell_level)?;
            let principal = match ace.principal {
                Principal::All => StoredPrincipal::All,
                Principal::Href(ref href) => StoredPrincipal::Role(self.role_id_for_href(&base, &cell_url, href).await?),
            };
            aces.push(StoredAce { principal, privileges });
        }
        Ok(StoredAcl {
            require_schema_authz: acl.schema_authz()?,
            aces,
        })
    }

    async fn role_id_for_href(&self, base: &str, cell_url: &str, href: &str) -> DavResult<String> {
        let role_not_found =
            || DavError::bad_request(BadRequestReason::RoleNotFound(href.to_string()), self.context.clone());
        let role_url = resolve_href(base, href)
            .as_deref()
            .and_then(RoleUrl::parse)
            .ok_or_else(role_not_found)?;
        if role_url.cell_url != cell_url {
            return Err(role_not_found());
        }

        let cell_id = &self.cell.id;
        let box_id = match role_url.box_name {
            None => None,
            Some(ref name) => {
                let found = self
                    .ctx
                    .cache
                    .box_by_name(&self.ctx.control, cell_id, name)
                    .await?
                    .ok_or_else(|| {
                        DavError::bad_request(BadRequestReason::BoxNotFound(name.clone()), self.context.clone())
                    })?;
                Some(found.id)
            }
        };
        let role = self
            .ctx
            .control
            .find_role(cell_id, box_id.as_deref(), &role_url.name)
            .await?
            .ok_or_else(role_not_found)?;
        Ok(role.id)
    }

    /// Wire form of `stored`, dropping entries whose role (or its Box) is gone.
    pub(crate) async fn to_wire(&self, stored: Option<StoredAcl>) -> DavResult<Acl> {
        let mut served = Acl {
            base: Some(self.base()),
            ..Acl::default()
        };
        let Some(stored) = stored else {
            return Ok(served);
        };
        served.require_schema_authz = stored.require_schema_authz.map(|a| a.as_str().to_string());

        let control = &self.ctx.control;
        for ace in stored.aces {
            let principal = match ace.principal {
                StoredPrincipal::All => Principal::All,
                StoredPrincipal::Role(ref id) => {
                    let Some(role) = control.get_role(id).await? else {
                        debug!(role_id = %id, "Dropping ACE of deleted role");
                        continue;
                    };
                    let role_box = match role.box_id {
                        None => None,
                        Some(ref box_id) => match control.get_box(box_id).await? {
                            Some(b) => Some(b.name),
                            None => {
                                debug!(role_id = %id, "Dropping ACE of role in deleted box");
                                continue;
                            }
                        },
                    };
                    Principal::Href(relative_role_href(self.box_name, role_box.as_deref(), &role.name))
                }
            };
            served.aces.push(Ace {
                principal,
                privileges: ace.privileges.iter().map(|p| p.as_str().to_string()).collect(),
            });
        }
        Ok(served)
    }
}
