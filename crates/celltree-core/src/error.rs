//! Error taxonomy for tree operations.
//!
//! Every failure a [`ResourceComponent`](crate::component::ResourceComponent)
//! operation can report is a [`DavError`]. Each variant carries a
//! [`DavContext`] describing where the failure happened and maps onto exactly
//! one HTTP status via [`DavError::status`], which is what the protocol layer
//! sitting above this crate answers with.

use hyper::StatusCode;
use thiserror::Error;

use crate::blob::BlobError;
use crate::store::StoreError;

/// Location information attached to errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavContext {
    /// Cell name
    pub cell: Option<String>,
    /// Box name
    pub box_name: Option<String>,
    /// Path below the Box (slash separated)
    pub path: Option<String>,
    /// Node id in the document store
    pub node_id: Option<String>,
}

impl DavContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cell(mut self, cell: impl Into<String>) -> Self {
        self.cell = Some(cell.into());
        self
    }

    pub fn with_box(mut self, box_name: impl Into<String>) -> Self {
        self.box_name = Some(box_name.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }
}

impl std::fmt::Display for DavContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();

        if let Some(ref cell) = self.cell {
            parts.push(format!("cell '{cell}'"));
        }
        if let Some(ref box_name) = self.box_name {
            parts.push(format!("box '{box_name}'"));
        }
        if let Some(ref path) = self.path {
            parts.push(format!("path '/{path}'"));
        }
        if let Some(ref id) = self.node_id {
            let display_id = if id.len() > 12 {
                format!("{}...", &id[..12])
            } else {
                id.clone()
            };
            parts.push(format!("node {display_id}"));
        }

        if parts.is_empty() {
            write!(f, "(no context)")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Why a request conflicts with the current tree state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictReason {
    #[error("parent collection does not exist")]
    ParentMissing,
    #[error("parent is not a collection")]
    ParentNotCollection,
    #[error("resource already exists")]
    AlreadyExists,
    #[error("collection has children")]
    HasChildren,
    #[error("cell is being accessed by other requests")]
    CellBusy,
    #[error("link already exists")]
    LinkConflict,
    #[error("cannot move a collection beneath itself")]
    MoveIntoSelf,
}

/// Why a request is malformed or exceeds a configured limit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BadRequestReason {
    #[error("collection depth exceeds the maximum of {max}")]
    DepthExceeded { max: usize },
    #[error("collection already holds the maximum of {max} children")]
    TooManyChildren { max: usize },
    #[error("invalid ACL: {0}")]
    InvalidAcl(String),
    #[error("role not found: {0}")]
    RoleNotFound(String),
    #[error("box linked by role not found: {0}")]
    BoxNotFound(String),
    #[error("invalid property: {0}")]
    InvalidProperty(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("resource is not a file")]
    NotAFile,
    #[error("destination must be in the same box")]
    CrossBoxMove,
}

/// Why an otherwise well-formed request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForbiddenReason {
    #[error("collections cannot be overwritten")]
    OverwriteCollection,
    #[error("the service source collection cannot be overwritten")]
    OverwriteServiceSource,
    #[error("the service source collection cannot be deleted or moved on its own")]
    ServiceSourceFixed,
    #[error("resources cannot be moved into an OData collection")]
    MoveIntoODataCollection,
    #[error("resources cannot be moved beneath a file")]
    MoveIntoFile,
    #[error("resources cannot be moved into a service collection")]
    MoveIntoServiceCollection,
    #[error("the service source collection cannot contain collections")]
    CollectionInServiceSource,
    #[error("required privilege '{0}' is not granted")]
    AccessDenied(String),
}

/// Server-side failures that leave the tree in a detectable state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerErrorReason {
    #[error("data inconsistency: {0}")]
    Inconsistency(String),
    #[error("binary content could not be deleted: {0}")]
    BlobDeleteFailed(String),
    #[error("move failed and was rolled back")]
    MoveRolledBack,
    #[error("move failed and rollback did not complete")]
    RollbackFailed,
}

#[derive(Debug, Error)]
pub enum DavError {
    #[error("Resource not found: {context}")]
    NotFound { context: DavContext },

    #[error("Conflict for {context}: {reason}")]
    Conflict {
        reason: ConflictReason,
        context: DavContext,
    },

    #[error("Bad request for {context}: {reason}")]
    BadRequest {
        reason: BadRequestReason,
        context: DavContext,
    },

    #[error("Forbidden for {context}: {reason}")]
    Forbidden {
        reason: ForbiddenReason,
        context: DavContext,
    },

    #[error("Precondition failed for {context}")]
    PreconditionFailed { context: DavContext },

    #[error("Not modified: {context}")]
    NotModified { context: DavContext },

    #[error("Not implemented: {what}")]
    NotImplemented { what: String },

    #[error("Requested range not satisfiable (content length {size})")]
    RangeNotSatisfiable { size: u64 },

    #[error("Server error for {context}: {reason}")]
    ServerError {
        reason: ServerErrorReason,
        context: DavContext,
    },

    #[error("Content temporarily unavailable for {context}")]
    Unavailable { context: DavContext },

    #[error("Timed out after {waited_ms}ms waiting for lock {key}")]
    LockTimeout { key: String, waited_ms: u64 },

    /// Document store error (boxed to reduce enum size).
    #[error("Document store error: {0}")]
    Store(Box<StoreError>),

    /// Binary content error (boxed to reduce enum size).
    #[error("Binary content error: {0}")]
    Blob(Box<BlobError>),
}

impl DavError {
    pub fn not_found(context: DavContext) -> Self {
        DavError::NotFound { context }
    }

    pub fn conflict(reason: ConflictReason, context: DavContext) -> Self {
        DavError::Conflict { reason, context }
    }

    pub fn bad_request(reason: BadRequestReason, context: DavContext) -> Self {
        DavError::BadRequest { reason, context }
    }

    pub fn forbidden(reason: ForbiddenReason, context: DavContext) -> Self {
        DavError::Forbidden { reason, context }
    }

    pub fn server_error(reason: ServerErrorReason, context: DavContext) -> Self {
        DavError::ServerError { reason, context }
    }

    /// HTTP status the protocol layer answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            DavError::NotFound { .. } => StatusCode::NOT_FOUND,
            DavError::Conflict {
                reason: ConflictReason::AlreadyExists,
                ..
            } => StatusCode::METHOD_NOT_ALLOWED,
            DavError::Conflict { .. } => StatusCode::CONFLICT,
            DavError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            DavError::Forbidden { .. } => StatusCode::FORBIDDEN,
            DavError::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            DavError::NotModified { .. } => StatusCode::NOT_MODIFIED,
            DavError::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            DavError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            DavError::Unavailable { .. } | DavError::LockTimeout { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DavError::ServerError { .. } | DavError::Store(_) | DavError::Blob(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// True for errors caused by a concurrent modification racing this request.
    pub fn is_precondition_failure(&self) -> bool {
        matches!(self, DavError::PreconditionFailed { .. })
    }
}

/// Result type for tree operations.
pub type DavResult<T> = Result<T, DavError>;

// Version conflicts surface as precondition failures; no write is retried.
impl From<StoreError> for DavError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VersionConflict { ref id, .. } => DavError::PreconditionFailed {
                context: DavContext::new().with_node_id(id.clone()),
            },
            StoreError::NotFound { ref id, .. } => DavError::NotFound {
                context: DavContext::new().with_node_id(id.clone()),
            },
            StoreError::Timeout { .. } => DavError::Unavailable {
                context: DavContext::new(),
            },
            other => DavError::Store(Box::new(other)),
        }
    }
}

impl From<BlobError> for DavError {
    fn from(e: BlobError) -> Self {
        DavError::Blob(Box::new(e))
    }
}
