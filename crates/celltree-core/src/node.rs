//! Persisted record for one tree entry.
//!
//! A node is exactly one of a collection (with children) or a file (with
//! content metadata); [`NodeBody`] makes the two mutually exclusive. Nodes
//! reference each other only by id: a parent lists `name → child id` and a
//! child stores its `parent_id`. Live handles are never kept across a reload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acl::StoredAcl;
use crate::store::StoreError;

/// Name of the fixed source sub-collection of a service collection.
pub const SERVICE_SOURCE_NAME: &str = "__src";

/// Kind of a node, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    CellRoot,
    BoxRoot,
    WebDavCollection,
    ODataCollection,
    ServiceCollection,
    File,
}

impl NodeKind {
    pub fn is_collection(self) -> bool {
        !matches!(self, NodeKind::File)
    }

    pub fn is_root(self) -> bool {
        matches!(self, NodeKind::CellRoot | NodeKind::BoxRoot)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::CellRoot => "cell-root",
            NodeKind::BoxRoot => "box-root",
            NodeKind::WebDavCollection => "collection",
            NodeKind::ODataCollection => "odata-collection",
            NodeKind::ServiceCollection => "service-collection",
            NodeKind::File => "file",
        }
    }
}

/// Collection kinds that MKCOL may create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    WebDav,
    OData,
    Service,
}

impl From<CollectionKind> for NodeKind {
    fn from(kind: CollectionKind) -> Self {
        match kind {
            CollectionKind::WebDav => NodeKind::WebDavCollection,
            CollectionKind::OData => NodeKind::ODataCollection,
            CollectionKind::Service => NodeKind::ServiceCollection,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub content_type: String,
    pub content_length: u64,
}

pub type Children = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum NodeBody {
    CellRoot {
        #[serde(default)]
        children: Children,
    },
    BoxRoot {
        #[serde(default)]
        children: Children,
    },
    WebDavCollection {
        #[serde(default)]
        children: Children,
    },
    ODataCollection {
        #[serde(default)]
        children: Children,
    },
    ServiceCollection {
        #[serde(default)]
        children: Children,
    },
    File {
        file: FileMeta,
    },
}

impl NodeBody {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeBody::CellRoot { .. } => NodeKind::CellRoot,
            NodeBody::BoxRoot { .. } => NodeKind::BoxRoot,
            NodeBody::WebDavCollection { .. } => NodeKind::WebDavCollection,
            NodeBody::ODataCollection { .. } => NodeKind::ODataCollection,
            NodeBody::ServiceCollection { .. } => NodeKind::ServiceCollection,
            NodeBody::File { .. } => NodeKind::File,
        }
    }
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Dead-property key: `localName@namespace`.
pub fn property_key(local_name: &str, namespace: &str) -> String {
    format!("{local_name}@{namespace}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: String,
    pub cell_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub body: NodeBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<StoredAcl>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub published: i64,
    pub updated: i64,
}

impl ResourceNode {
    fn new(cell_id: &str, box_id: Option<&str>, parent_id: Option<&str>, body: NodeBody) -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            cell_id: cell_id.to_string(),
            box_id: box_id.map(str::to_string),
            parent_id: parent_id.map(str::to_string),
            body,
            acl: None,
            properties: BTreeMap::new(),
            published: now,
            updated: now,
        }
    }

    pub fn cell_root(cell_id: &str) -> Self {
        Self::new(cell_id, None, None, NodeBody::CellRoot {
            children: Children::new(),
        })
    }

    pub fn box_root(cell_id: &str, box_id: &str) -> Self {
        Self::new(cell_id, Some(box_id), None, NodeBody::BoxRoot {
            children: Children::new(),
        })
    }

    pub fn collection(cell_id: &str, box_id: &str, parent_id: &str, kind: CollectionKind) -> Self {
        let body = match kind {
            CollectionKind::WebDav => NodeBody::WebDavCollection {
                children: Children::new(),
            },
            CollectionKind::OData => NodeBody::ODataCollection {
                children: Children::new(),
            },
            CollectionKind::Service => NodeBody::ServiceCollection {
                children: Children::new(),
            },
        };
        Self::new(cell_id, Some(box_id), Some(parent_id), body)
    }

    pub fn new_file(cell_id: &str, box_id: &str, parent_id: &str, file: FileMeta) -> Self {
        Self::new(cell_id, Some(box_id), Some(parent_id), NodeBody::File { file })
    }

    pub fn kind(&self) -> NodeKind {
        self.body.kind()
    }

    pub fn is_collection(&self) -> bool {
        self.kind().is_collection()
    }

    pub fn children(&self) -> Option<&Children> {
        match &self.body {
            NodeBody::CellRoot { children }
            | NodeBody::BoxRoot { children }
            | NodeBody::WebDavCollection { children }
            | NodeBody::ODataCollection { children }
            | NodeBody::ServiceCollection { children } => Some(children),
            NodeBody::File { .. } => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Children> {
        match &mut self.body {
            NodeBody::CellRoot { children }
            | NodeBody::BoxRoot { children }
            | NodeBody::WebDavCollection { children }
            | NodeBody::ODataCollection { children }
            | NodeBody::ServiceCollection { children } => Some(children),
            NodeBody::File { .. } => None,
        }
    }

    pub fn child_id(&self, name: &str) -> Option<&str> {
        self.children().and_then(|c| c.get(name)).map(String::as_str)
    }

    pub fn child_count(&self) -> usize {
        self.children().map_or(0, Children::len)
    }

    pub fn file(&self) -> Option<&FileMeta> {
        match &self.body {
            NodeBody::File { file } => Some(file),
            _ => None,
        }
    }

    /// Record a mutation. `updated` never moves backwards.
    pub fn touch(&mut self) {
        self.updated = now_millis().max(self.updated);
    }

    pub fn to_document(&self) -> Result<Value, StoreError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_document(doc: Value) -> Result<Self, StoreError> {
        Ok(serde_json::from_value(doc)?)
    }
}
