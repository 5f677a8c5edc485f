//! Cell deletion: exclusivity, bulk-deletion status and background purge.

mod common;

use std::time::Duration;

use celltree_core::cell::CellStatus;
use celltree_core::error::ConflictReason;
use celltree_core::store::DocType;
use celltree_core::{DavError, EngineConfig};
use common::{CELL, TestEngine};
use hyper::StatusCode;

async fn wait_for_purges(t: &TestEngine, count: u64) {
    let mut progress = t.engine.purge_progress();
    tokio::time::timeout(Duration::from_secs(10), progress.wait_for(|n| *n >= count))
        .await
        .expect("purge did not finish")
        .expect("purge worker stopped");
}

#[tokio::test]
async fn test_delete_cell_purges_its_data() {
    let t = TestEngine::new().await;
    t.mkcol("docs").await.unwrap();
    t.put("docs/a.txt", b"a").await.unwrap();
    t.put("b.txt", b"b").await.unwrap();
    let cell = t.engine.cell(CELL).await.unwrap();
    t.engine.control().create_role(&cell.id, None, "reader").await.unwrap();

    t.engine.create_cell("bob").await.unwrap();
    t.engine.create_box("bob", "box1", None).await.unwrap();
    t.engine
        .open(&celltree_core::ResourcePath::parse("/bob/box1/keep.txt").unwrap())
        .await
        .unwrap()
        .put("text/plain", bytes::Bytes::from_static(b"keep"), None)
        .await
        .unwrap();

    t.engine.delete_cell(CELL).await.unwrap();
    assert!(matches!(t.engine.cell(CELL).await, Err(DavError::NotFound { .. })));
    assert_eq!(t.engine.cells().status(&cell.id), CellStatus::Normal);

    wait_for_purges(&t, 1).await;
    assert_eq!(t.blobs.len(), 1);
    // bob keeps its cell root, box root and file
    assert_eq!(t.store.count_type(DocType::DavNode), 3);
    assert_eq!(t.store.count_type(DocType::Role), 0);
    assert_eq!(t.store.count_type(DocType::Box), 1);
    assert_eq!(t.store.count_type(DocType::Cell), 1);

    // The name is free again
    t.engine.create_cell(CELL).await.unwrap();
    t.engine.shutdown().await;
}

#[tokio::test]
async fn test_cell_busy_while_requests_are_open() {
    let t = TestEngine::with_config(EngineConfig {
        cell_lock_retry_count: 3,
        cell_lock_retry_interval_ms: 5,
        ..EngineConfig::default()
    })
    .await;
    let open_request = t.open("").await;

    let result = t.engine.delete_cell(CELL).await;
    assert!(matches!(
        result,
        Err(DavError::Conflict {
            reason: ConflictReason::CellBusy,
            ..
        })
    ));
    assert_eq!(result.unwrap_err().status(), StatusCode::CONFLICT);

    // The failed attempt leaves the cell usable
    let cell = t.engine.cell(CELL).await.unwrap();
    assert_eq!(t.engine.cells().status(&cell.id), CellStatus::Normal);
    t.mkcol("still-here").await.unwrap();

    drop(open_request);
    t.engine.delete_cell(CELL).await.unwrap();
}

#[tokio::test]
async fn test_requests_are_refused_during_bulk_deletion() {
    let t = TestEngine::new().await;
    let cell = t.engine.cell(CELL).await.unwrap();

    let status = t.engine.cells().begin_bulk_deletion(&cell.id);
    let refused = t.engine.open(&t.path("a.txt")).await;
    assert!(matches!(
        refused,
        Err(DavError::Conflict {
            reason: ConflictReason::CellBusy,
            ..
        })
    ));
    drop(status);
    assert!(t.engine.open(&t.path("a.txt")).await.is_ok());
}
