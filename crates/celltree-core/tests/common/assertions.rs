//! Custom assertions for engine integration tests.

use celltree_core::node::ResourceNode;
use celltree_core::query::{ScopeFilter, SearchRequest};
use celltree_core::store::{DocType, DocumentStore, search_as};
use celltree_core::{DavError, DavResult};
use hyper::StatusCode;

use crate::common::TestEngine;

/// Assert that `result` failed with `status`.
pub fn assert_status<T: std::fmt::Debug>(result: DavResult<T>, status: StatusCode) {
    match result {
        Ok(v) => panic!("Expected {status}, got Ok({v:?})"),
        Err(e) => assert_eq!(e.status(), status, "Unexpected error: {e}"),
    }
}

pub fn assert_not_found<T: std::fmt::Debug>(result: DavResult<T>) {
    match result {
        Err(DavError::NotFound { .. }) => {}
        other => panic!("Expected NotFound, got {other:?}"),
    }
}

/// Every listed child must exist and point back at the collection listing it.
pub async fn assert_tree_integrity(t: &TestEngine) {
    let cell = t.engine.cell(crate::common::CELL).await.expect("cell");
    let store: &dyn DocumentStore = t.store.as_ref();
    let nodes = search_as::<ResourceNode>(
        store,
        DocType::DavNode,
        &SearchRequest::scoped(ScopeFilter::new(&cell.id)).size(10_000),
    )
    .await
    .expect("search nodes");

    for node in &nodes {
        let Some(children) = node.doc.children() else { continue };
        for (name, child_id) in children {
            let child = nodes
                .iter()
                .find(|n| &n.id == child_id)
                .unwrap_or_else(|| panic!("child '{name}' of {} is not stored", node.id));
            assert_eq!(
                child.doc.parent_id.as_deref(),
                Some(node.id.as_str()),
                "child '{name}' does not point back at its collection"
            );
        }
    }
}
