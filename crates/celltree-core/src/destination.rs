//! Path hierarchy loading and MOVE destination validation.

use tracing::trace;

use crate::error::{BadRequestReason, ConflictReason, DavError, DavResult, ForbiddenReason, ServerErrorReason};
use crate::node::{NodeKind, ResourceNode, SERVICE_SOURCE_NAME};
use crate::path::ResourcePath;
use crate::store::{DocType, DocumentStore, Versioned, get_as};

/// Load a node by id, treating an undecodable document as an error.
pub async fn load_node(store: &dyn DocumentStore, id: &str) -> DavResult<Option<Versioned<ResourceNode>>> {
    Ok(get_as::<ResourceNode>(store, DocType::DavNode, id).await?)
}

/// The existing prefix of a path, loaded from the Box root.
#[derive(Debug, Clone)]
pub struct PathHierarchy {
    path: ResourcePath,
    /// `nodes[0]` is the Box root, `nodes[i]` the node at segment `i - 1`.
    /// Loading stops at the first segment that does not exist.
    nodes: Vec<Versioned<ResourceNode>>,
}

impl PathHierarchy {
    pub async fn load(store: &dyn DocumentStore, box_root_id: &str, path: &ResourcePath) -> DavResult<Self> {
        let root = load_node(store, box_root_id).await?.ok_or_else(|| {
            DavError::server_error(
                ServerErrorReason::Inconsistency(format!("box root node {box_root_id} is missing")),
                path.context(),
            )
        })?;
        let mut nodes = vec![root];
        for segment in &path.segments {
            let Some(child_id) = nodes.last().and_then(|n| n.doc.child_id(segment)).map(str::to_string) else {
                break;
            };
            match load_node(store, &child_id).await? {
                Some(child) => nodes.push(child),
                None => {
                    trace!(%path, segment = %segment, "Destination child listed but not stored");
                    break;
                }
            }
        }
        Ok(Self {
            path: path.clone(),
            nodes,
        })
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The node currently at the path.
    pub fn target(&self) -> Option<&Versioned<ResourceNode>> {
        if self.nodes.len() == self.path.segments.len() + 1 {
            self.nodes.last()
        } else {
            None
        }
    }

    /// The collection holding (or that would hold) the node at the path.
    pub fn parent(&self) -> Option<&Versioned<ResourceNode>> {
        let depth = self.path.segments.len();
        if depth == 0 { None } else { self.nodes.get(depth - 1) }
    }

    /// Docs from the parent up to the Box root, for ACL evaluation.
    pub fn parent_chain(&self) -> Vec<ResourceNode> {
        let depth = self.path.segments.len().min(self.nodes.len());
        self.nodes[..depth].iter().rev().map(|n| n.doc.clone()).collect()
    }

    /// Docs from the node itself (when present) up to the Box root.
    pub fn target_chain(&self) -> Vec<ResourceNode> {
        self.nodes.iter().rev().map(|n| n.doc.clone()).collect()
    }

    fn grandparent(&self) -> Option<&Versioned<ResourceNode>> {
        let depth = self.path.segments.len();
        if depth < 2 { None } else { self.nodes.get(depth - 2) }
    }

    /// Check the move of `source` to this path as a MOVE destination.
    pub fn validate(&self, overwrite: bool, source: &ResourceNode, max_children: usize) -> DavResult<()> {
        let ctx = self.path.context();
        if self.path.segments.is_empty() {
            return Err(DavError::forbidden(ForbiddenReason::OverwriteCollection, ctx));
        }
        let Some(parent) = self.parent() else {
            return Err(DavError::conflict(ConflictReason::ParentMissing, ctx));
        };

        let parent_kind = parent.doc.kind();
        let destination = self.target();
        if let Some(existing) = destination {
            if !overwrite {
                return Err(DavError::PreconditionFailed { context: ctx });
            }
            if parent_kind == NodeKind::ServiceCollection && self.path.name() == Some(SERVICE_SOURCE_NAME) {
                return Err(DavError::forbidden(ForbiddenReason::OverwriteServiceSource, ctx));
            }
            if existing.doc.kind() != NodeKind::File {
                return Err(DavError::forbidden(ForbiddenReason::OverwriteCollection, ctx));
            }
        } else {
            match parent_kind {
                NodeKind::ODataCollection => {
                    return Err(DavError::forbidden(ForbiddenReason::MoveIntoODataCollection, ctx));
                }
                NodeKind::File => return Err(DavError::forbidden(ForbiddenReason::MoveIntoFile, ctx)),
                NodeKind::ServiceCollection => {
                    return Err(DavError::forbidden(ForbiddenReason::MoveIntoServiceCollection, ctx));
                }
                _ => {}
            }
        }

        if self
            .grandparent()
            .is_some_and(|g| g.doc.kind() == NodeKind::ServiceCollection)
            && source.kind() != NodeKind::File
        {
            return Err(DavError::forbidden(ForbiddenReason::CollectionInServiceSource, ctx));
        }

        if destination.is_none() && parent.doc.child_count() >= max_children {
            return Err(DavError::bad_request(
                BadRequestReason::TooManyChildren { max: max_children },
                ctx,
            ));
        }

        let ancestors = &self.nodes[..self.path.segments.len()];
        if ancestors.iter().any(|n| n.id == source.id) {
            return Err(DavError::conflict(ConflictReason::MoveIntoSelf, ctx));
        }

        if destination.is_some_and(|d| d.id == source.id) {
            return Err(DavError::not_found(ctx));
        }
        Ok(())
    }
}
