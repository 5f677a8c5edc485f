//! Control objects: Cells, Boxes, Roles, ExtCells, Relations, ExtRoles and
//! the links between them.
//!
//! Control objects live in the same document store as tree nodes, one
//! document type each. Links are unordered pairs of typed keys stored with
//! the smaller [`DocType`] first, so a pair has exactly one representation.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{ConflictReason, DavContext, DavError, DavResult};
use crate::node::{ResourceNode, now_millis};
use crate::query::{FIELD_BOX_ID, Query, ScopeFilter, SearchRequest};
use crate::store::{DocType, DocumentStore, get_as, search_as, to_document};

/// Scope key of Cell documents. Cells belong to the unit, not to a cell.
pub const UNIT_SCOPE: &str = "__unit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellDoc {
    pub id: String,
    #[serde(rename = "cell_id")]
    pub scope: String,
    pub name: String,
    /// Absolute cell URL with a trailing slash.
    pub url: String,
    pub root_node_id: String,
    pub published: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxDoc {
    pub id: String,
    pub cell_id: String,
    pub name: String,
    /// Schema (application cell) URL, when bound to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub root_node_id: String,
    pub published: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDoc {
    pub id: String,
    pub cell_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtCellDoc {
    pub id: String,
    pub cell_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDoc {
    pub id: String,
    pub cell_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtRoleDoc {
    pub id: String,
    pub cell_id: String,
    pub relation_id: String,
    /// Role URL in the external cell.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDoc {
    pub id: String,
    pub cell_id: String,
    pub t1: DocType,
    pub k1: String,
    pub t2: DocType,
    pub k2: String,
}

/// A typed key: `(document type, id)`.
pub type LinkEnd<'a> = (DocType, &'a str);

impl LinkDoc {
    fn normalized(cell_id: &str, a: LinkEnd<'_>, b: LinkEnd<'_>) -> Self {
        let ((t1, k1), (t2, k2)) = if (a.0, a.1) <= (b.0, b.1) { (a, b) } else { (b, a) };
        Self {
            id: format!("{t1}.{k1}.{t2}.{k2}"),
            cell_id: cell_id.to_string(),
            t1,
            k1: k1.to_string(),
            t2,
            k2: k2.to_string(),
        }
    }
}

/// Document types deleted when a Cell is purged, in deletion order.
pub const CELL_CONTROL_TYPES: [DocType; 7] = [
    DocType::Link,
    DocType::ExtRole,
    DocType::Relation,
    DocType::ExtCell,
    DocType::Role,
    DocType::Box,
    DocType::Cell,
];

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Typed access to control objects.
#[derive(Debug, Clone)]
pub struct ControlStore {
    store: Arc<dyn DocumentStore>,
    top_num: usize,
}

impl ControlStore {
    pub fn new(store: Arc<dyn DocumentStore>, top_num: usize) -> Self {
        Self { store, top_num }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn top_num(&self) -> usize {
        self.top_num
    }

    async fn insert<T: Serialize>(&self, doc_type: DocType, id: &str, record: &T) -> DavResult<()> {
        self.store
            .create(doc_type, Some(id), to_document(record)?, None)
            .await?;
        Ok(())
    }

    async fn first<T: DeserializeOwned>(&self, doc_type: DocType, request: SearchRequest) -> DavResult<Option<T>> {
        let hits = search_as::<T>(&*self.store, doc_type, &request.size(1)).await?;
        Ok(hits.into_iter().next().map(|v| v.doc))
    }

    async fn all<T: DeserializeOwned>(&self, doc_type: DocType, request: SearchRequest) -> DavResult<Vec<T>> {
        let hits = search_as::<T>(&*self.store, doc_type, &request.capped(self.top_num)).await?;
        Ok(hits.into_iter().map(|v| v.doc).collect())
    }

    async fn get<T: DeserializeOwned>(&self, doc_type: DocType, id: &str) -> DavResult<Option<T>> {
        Ok(get_as::<T>(&*self.store, doc_type, id).await?.map(|v| v.doc))
    }

    fn box_filter(box_id: Option<&str>) -> Query {
        match box_id {
            Some(id) => Query::term(FIELD_BOX_ID, id),
            None => Query::missing(FIELD_BOX_ID),
        }
    }

    // ------------------------------------------------------------------
    // Cells
    // ------------------------------------------------------------------

    /// Create a Cell and its root node.
    #[instrument(level = "debug", skip(self))]
    pub async fn create_cell(&self, name: &str, url: &str) -> DavResult<CellDoc> {
        if self.find_cell(name).await?.is_some() {
            return Err(DavError::conflict(
                ConflictReason::AlreadyExists,
                DavContext::new().with_cell(name),
            ));
        }
        let id = new_id();
        let root = ResourceNode::cell_root(&id);
        self.insert(DocType::DavNode, &root.id, &root).await?;

        let cell = CellDoc {
            id,
            scope: UNIT_SCOPE.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            root_node_id: root.id,
            published: now_millis(),
        };
        self.insert(DocType::Cell, &cell.id, &cell).await?;
        info!(cell = name, id = %cell.id, "Cell created");
        Ok(cell)
    }

    pub async fn find_cell(&self, name: &str) -> DavResult<Option<CellDoc>> {
        let request = SearchRequest::scoped(ScopeFilter::new(UNIT_SCOPE)).filter(Query::term("name", name));
        self.first(DocType::Cell, request).await
    }

    pub async fn get_cell(&self, id: &str) -> DavResult<Option<CellDoc>> {
        self.get(DocType::Cell, id).await
    }

    pub async fn list_cells(&self) -> DavResult<Vec<CellDoc>> {
        let request = SearchRequest::scoped(ScopeFilter::new(UNIT_SCOPE)).sort("name", crate::query::SortOrder::Asc);
        self.all(DocType::Cell, request).await
    }

    /// Remove only the Cell document; everything it owns is left to the purge.
    pub async fn delete_cell_doc(&self, cell_id: &str) -> DavResult<()> {
        self.store.delete(DocType::Cell, cell_id, None).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Boxes
    // ------------------------------------------------------------------

    /// Create a Box and its root node.
    #[instrument(level = "debug", skip(self, cell), fields(cell = %cell.name))]
    pub async fn create_box(&self, cell: &CellDoc, name: &str, schema: Option<&str>) -> DavResult<BoxDoc> {
        if self.find_box(&cell.id, name).await?.is_some() {
            return Err(DavError::conflict(
                ConflictReason::AlreadyExists,
                DavContext::new().with_cell(cell.name.clone()).with_box(name),
            ));
        }
        let id = new_id();
        let root = ResourceNode::box_root(&cell.id, &id);
        self.insert(DocType::DavNode, &root.id, &root).await?;

        let box_doc = BoxDoc {
            id,
            cell_id: cell.id.clone(),
            name: name.to_string(),
            schema: schema.map(str::to_string),
            root_node_id: root.id,
            published: now_millis(),
        };
        self.insert(DocType::Box, &box_doc.id, &box_doc).await?;
        info!(box_name = name, id = %box_doc.id, "Box created");
        Ok(box_doc)
    }

    pub async fn find_box(&self, cell_id: &str, name: &str) -> DavResult<Option<BoxDoc>> {
        let request = SearchRequest::scoped(ScopeFilter::new(cell_id)).filter(Query::term("name", name));
        self.first(DocType::Box, request).await
    }

    pub async fn get_box(&self, id: &str) -> DavResult<Option<BoxDoc>> {
        self.get(DocType::Box, id).await
    }

    pub async fn list_boxes(&self, cell_id: &str) -> DavResult<Vec<BoxDoc>> {
        let request = SearchRequest::scoped(ScopeFilter::new(cell_id)).sort("name", crate::query::SortOrder::Asc);
        self.all(DocType::Box, request).await
    }

    /// Remove a Box document and its root node.
    pub async fn delete_box_docs(&self, box_doc: &BoxDoc) -> DavResult<()> {
        self.store.delete(DocType::DavNode, &box_doc.root_node_id, None).await?;
        self.store.delete(DocType::Box, &box_doc.id, None).await?;
        info!(box_name = %box_doc.name, id = %box_doc.id, "Box deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------

    pub async fn create_role(&self, cell_id: &str, box_id: Option<&str>, name: &str) -> DavResult<RoleDoc> {
        if self.find_role(cell_id, box_id, name).await?.is_some() {
            return Err(DavError::conflict(ConflictReason::AlreadyExists, DavContext::new()));
        }
        let role = RoleDoc {
            id: new_id(),
            cell_id: cell_id.to_string(),
            box_id: box_id.map(str::to_string),
            name: name.to_string(),
        };
        self.insert(DocType::Role, &role.id, &role).await?;
        debug!(role = name, id = %role.id, "Role created");
        Ok(role)
    }

    pub async fn find_role(&self, cell_id: &str, box_id: Option<&str>, name: &str) -> DavResult<Option<RoleDoc>> {
        let request = SearchRequest::scoped(ScopeFilter::new(cell_id))
            .filter(Query::term("name", name))
            .filter(Self::box_filter(box_id));
        self.first(DocType::Role, request).await
    }

    pub async fn get_role(&self, id: &str) -> DavResult<Option<RoleDoc>> {
        self.get(DocType::Role, id).await
    }

    pub async fn list_roles(&self, cell_id: &str) -> DavResult<Vec<RoleDoc>> {
        let request = SearchRequest::scoped(ScopeFilter::new(cell_id)).sort("name", crate::query::SortOrder::Asc);
        self.all(DocType::Role, request).await
    }

    /// Delete a Role and every link that references it.
    pub async fn delete_role(&self, role: &RoleDoc) -> DavResult<()> {
        for link in self.links_of(&role.cell_id, (DocType::Role, &role.id)).await? {
            self.store.delete(DocType::Link, &link.id, None).await?;
        }
        self.store.delete(DocType::Role, &role.id, None).await?;
        debug!(role = %role.name, id = %role.id, "Role deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // ExtCells, Relations, ExtRoles
    // ------------------------------------------------------------------

    pub async fn create_ext_cell(&self, cell_id: &str, url: &str) -> DavResult<ExtCellDoc> {
        if !self.find_ext_cells(cell_id, &[url.to_string()]).await?.is_empty() {
            return Err(DavError::conflict(ConflictReason::AlreadyExists, DavContext::new()));
        }
        let ext = ExtCellDoc {
            id: new_id(),
            cell_id: cell_id.to_string(),
            url: url.to_string(),
        };
        self.insert(DocType::ExtCell, &ext.id, &ext).await?;
        Ok(ext)
    }

    /// ExtCells registered under any of `urls`.
    pub async fn find_ext_cells(&self, cell_id: &str, urls: &[String]) -> DavResult<Vec<ExtCellDoc>> {
        let request =
            SearchRequest::scoped(ScopeFilter::new(cell_id)).filter(Query::terms("url", urls.iter().map(String::as_str)));
        self.all(DocType::ExtCell, request).await
    }

    pub async fn create_relation(&self, cell_id: &str, box_id: Option<&str>, name: &str) -> DavResult<RelationDoc> {
        if self.find_relation(cell_id, box_id, name).await?.is_some() {
            return Err(DavError::conflict(ConflictReason::AlreadyExists, DavContext::new()));
        }
        let relation = RelationDoc {
            id: new_id(),
            cell_id: cell_id.to_string(),
            box_id: box_id.map(str::to_string),
            name: name.to_string(),
        };
        self.insert(DocType::Relation, &relation.id, &relation).await?;
        Ok(relation)
    }

    pub async fn find_relation(&self, cell_id: &str, box_id: Option<&str>, name: &str) -> DavResult<Option<RelationDoc>> {
        let request = SearchRequest::scoped(ScopeFilter::new(cell_id))
            .filter(Query::term("name", name))
            .filter(Self::box_filter(box_id));
        self.first(DocType::Relation, request).await
    }

    pub async fn create_ext_role(&self, cell_id: &str, relation_id: &str, url: &str) -> DavResult<ExtRoleDoc> {
        let ext_role = ExtRoleDoc {
            id: new_id(),
            cell_id: cell_id.to_string(),
            relation_id: relation_id.to_string(),
            url: url.to_string(),
        };
        self.insert(DocType::ExtRole, &ext_role.id, &ext_role).await?;
        Ok(ext_role)
    }

    pub async fn ext_roles_of_relation(&self, cell_id: &str, relation_id: &str) -> DavResult<Vec<ExtRoleDoc>> {
        let request = SearchRequest::scoped(ScopeFilter::new(cell_id)).filter(Query::term("relation_id", relation_id));
        self.all(DocType::ExtRole, request).await
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Link two control objects. Linking an existing pair is a conflict.
    pub async fn link(&self, cell_id: &str, a: LinkEnd<'_>, b: LinkEnd<'_>) -> DavResult<LinkDoc> {
        let link = LinkDoc::normalized(cell_id, a, b);
        if self.store.get(DocType::Link, &link.id).await?.is_some() {
            return Err(DavError::conflict(ConflictReason::LinkConflict, DavContext::new()));
        }
        self.insert(DocType::Link, &link.id, &link).await?;
        debug!(link = %link.id, "Link created");
        Ok(link)
    }

    pub async fn unlink(&self, cell_id: &str, a: LinkEnd<'_>, b: LinkEnd<'_>) -> DavResult<()> {
        let link = LinkDoc::normalized(cell_id, a, b);
        self.store.delete(DocType::Link, &link.id, None).await?;
        debug!(link = %link.id, "Link removed");
        Ok(())
    }

    async fn links_of(&self, cell_id: &str, end: LinkEnd<'_>) -> DavResult<Vec<LinkDoc>> {
        let (t, k) = end;
        let request = SearchRequest::scoped(ScopeFilter::new(cell_id)).filter(Query::or(vec![
            Query::and(vec![Query::term("t1", t.as_str()), Query::term("k1", k)]),
            Query::and(vec![Query::term("t2", t.as_str()), Query::term("k2", k)]),
        ]));
        self.all(DocType::Link, request).await
    }

    /// Ids of `to_type` objects linked to `from`, at most `top_num`.
    pub async fn linked_ids(&self, cell_id: &str, from: LinkEnd<'_>, to_type: DocType) -> DavResult<Vec<String>> {
        let (from_type, from_id) = from;
        let forward = Query::and(vec![
            Query::term("t1", from_type.as_str()),
            Query::term("k1", from_id),
            Query::term("t2", to_type.as_str()),
        ]);
        let backward = Query::and(vec![
            Query::term("t2", from_type.as_str()),
            Query::term("k2", from_id),
            Query::term("t1", to_type.as_str()),
        ]);
        let request = SearchRequest::scoped(ScopeFilter::new(cell_id)).filter(Query::or(vec![forward, backward]));
        let links: Vec<LinkDoc> = self.all(DocType::Link, request).await?;
        Ok(links
            .into_iter()
            .filter_map(|l| {
                if l.t1 == from_type && l.k1 == from_id && l.t2 == to_type {
                    Some(l.k2)
                } else if l.t2 == from_type && l.k2 == from_id && l.t1 == to_type {
                    Some(l.k1)
                } else {
                    None
                }
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Purge
    // ------------------------------------------------------------------

    /// Delete every control object of a Cell, page by page. Item failures are
    /// logged and skipped; returns the number of deleted documents.
    pub async fn delete_cell_objects(&self, cell_id: &str) -> usize {
        let mut deleted = 0;
        for doc_type in CELL_CONTROL_TYPES {
            let scope = if doc_type == DocType::Cell {
                ScopeFilter::new(UNIT_SCOPE)
            } else {
                ScopeFilter::new(cell_id)
            };
            let mut request = SearchRequest::scoped(scope).capped(self.top_num);
            if doc_type == DocType::Cell {
                request = request.filter(Query::term("id", cell_id));
            }
            loop {
                let page = match self.store.search(doc_type, &request).await {
                    Ok(page) => page,
                    Err(e) => {
                        warn!(cell_id, %doc_type, error = %e, "Control object search failed during purge");
                        break;
                    }
                };
                if page.is_empty() {
                    break;
                }
                let mut progress = false;
                for hit in page {
                    match self.store.delete(doc_type, &hit.id, None).await {
                        Ok(()) => {
                            deleted += 1;
                            progress = true;
                        }
                        Err(e) => warn!(cell_id, %doc_type, id = %hit.id, error = %e, "Failed to purge control object"),
                    }
                }
                if !progress {
                    break;
                }
            }
        }
        deleted
    }

    /// Documents of `doc_type` owned by `box_id` (used by box deletion checks).
    pub async fn count_in_box(&self, cell_id: &str, box_id: &str, doc_type: DocType) -> DavResult<u64> {
        let request = SearchRequest::scoped(ScopeFilter::new(cell_id).with_box(box_id));
        Ok(self.store.count(doc_type, &request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStore;

    fn control() -> ControlStore {
        ControlStore::new(Arc::new(MemoryDocumentStore::new()), 100)
    }

    #[tokio::test]
    async fn test_cell_and_box_creation() {
        let control = control();
        let cell = control.create_cell("cellA", "https://unit.example/cellA/").await.unwrap();
        assert_eq!(control.find_cell("cellA").await.unwrap(), Some(cell.clone()));
        assert!(matches!(
            control.create_cell("cellA", "x").await,
            Err(DavError::Conflict {
                reason: ConflictReason::AlreadyExists,
                ..
            })
        ));

        let box1 = control.create_box(&cell, "box1", None).await.unwrap();
        assert_eq!(control.find_box(&cell.id, "box1").await.unwrap(), Some(box1.clone()));
        let root = control.store().get(DocType::DavNode, &box1.root_node_id).await.unwrap().unwrap();
        assert_eq!(root.doc["node_type"], "box_root");
        assert_eq!(root.doc["box_id"], box1.id.as_str());
    }

    #[tokio::test]
    async fn test_roles_are_scoped_by_box() {
        let control = control();
        let cell = control.create_cell("cellA", "https://unit.example/cellA/").await.unwrap();
        let default = control.create_role(&cell.id, None, "reader").await.unwrap();
        let boxed = control.create_role(&cell.id, Some("b1"), "reader").await.unwrap();
        assert_ne!(default.id, boxed.id);
        assert_eq!(control.find_role(&cell.id, None, "reader").await.unwrap(), Some(default));
        assert_eq!(control.find_role(&cell.id, Some("b1"), "reader").await.unwrap(), Some(boxed));
        assert!(control.find_role(&cell.id, Some("b2"), "reader").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_links_are_unordered_and_unique() {
        let control = control();
        let cell = control.create_cell("cellA", "https://unit.example/cellA/").await.unwrap();
        let role = control.create_role(&cell.id, None, "reader").await.unwrap();
        let ext = control.create_ext_cell(&cell.id, "https://unit.example/cellB/").await.unwrap();

        control
            .link(&cell.id, (DocType::ExtCell, &ext.id), (DocType::Role, &role.id))
            .await
            .unwrap();
        assert!(matches!(
            control
                .link(&cell.id, (DocType::Role, &role.id), (DocType::ExtCell, &ext.id))
                .await,
            Err(DavError::Conflict {
                reason: ConflictReason::LinkConflict,
                ..
            })
        ));

        let from_ext = control
            .linked_ids(&cell.id, (DocType::ExtCell, &ext.id), DocType::Role)
            .await
            .unwrap();
        assert_eq!(from_ext, vec![role.id.clone()]);
        let from_role = control
            .linked_ids(&cell.id, (DocType::Role, &role.id), DocType::ExtCell)
            .await
            .unwrap();
        assert_eq!(from_role, vec![ext.id.clone()]);

        control.delete_role(&role).await.unwrap();
        assert!(
            control
                .linked_ids(&cell.id, (DocType::ExtCell, &ext.id), DocType::Role)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_delete_cell_objects_leaves_other_cells() {
        let control = control();
        let a = control.create_cell("cellA", "https://unit.example/cellA/").await.unwrap();
        let b = control.create_cell("cellB", "https://unit.example/cellB/").await.unwrap();
        control.create_box(&a, "box1", None).await.unwrap();
        control.create_role(&a.id, None, "reader").await.unwrap();
        control.create_role(&b.id, None, "reader").await.unwrap();

        let deleted = control.delete_cell_objects(&a.id).await;
        assert_eq!(deleted, 3);
        assert!(control.find_cell("cellA").await.unwrap().is_none());
        assert!(control.find_cell("cellB").await.unwrap().is_some());
        assert_eq!(control.list_roles(&b.id).await.unwrap().len(), 1);
    }
}
