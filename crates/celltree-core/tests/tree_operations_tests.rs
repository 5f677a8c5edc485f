//! MKCOL, PUT, GET, PROPPATCH and DELETE against an in-memory engine.

mod common;

use bytes::Bytes;
use celltree_core::auth::AccessContext;
use celltree_core::component::PropOp;
use celltree_core::error::{BadRequestReason, ConflictReason, ForbiddenReason};
use celltree_core::node::{CollectionKind, NodeKind, SERVICE_SOURCE_NAME};
use celltree_core::store::DocType;
use celltree_core::{DavError, EngineConfig};
use common::{TestEngine, assert_not_found, assert_status, assert_tree_integrity};
use hyper::StatusCode;

// ============================================================================
// MKCOL / PUT
// ============================================================================

#[tokio::test]
async fn test_mkcol_then_put_creates_with_etag() {
    let t = TestEngine::new().await;
    t.mkcol("docs").await.unwrap();

    let outcome = t.put("docs/a.txt", b"hello").await.unwrap();
    assert_eq!(outcome.status(), StatusCode::CREATED);
    assert!(outcome.etag.starts_with("\"1-"), "unexpected etag {}", outcome.etag);
    assert_eq!(outcome.location, "https://unit.example/alice/box1/docs/a.txt");

    let file = t.open("docs/a.txt").await;
    assert_eq!(file.etag(), Some(outcome.etag));
    assert_eq!(file.node().unwrap().file().unwrap().content_length, 5);
    assert_eq!(t.read("docs/a.txt").await.unwrap(), Bytes::from_static(b"hello"));
    assert_tree_integrity(&t).await;
}

#[tokio::test]
async fn test_put_if_match_star_replaces_content() {
    let t = TestEngine::new().await;
    let first = t.put("a.txt", b"one").await.unwrap();

    let mut file = t.open("a.txt").await;
    let second = file
        .put("text/plain", Bytes::from_static(b"second"), Some("*"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::NO_CONTENT);
    assert_ne!(second.etag, first.etag);
    assert_eq!(file.etag(), Some(second.etag.clone()));
    assert_eq!(file.node().unwrap().file().unwrap().content_type, "text/plain");
    assert_eq!(t.read("a.txt").await.unwrap(), Bytes::from_static(b"second"));

    // The first ETag is stale now
    let stale = t
        .open("a.txt")
        .await
        .put("text/plain", Bytes::from_static(b"x"), Some(&first.etag))
        .await;
    assert_status(stale, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_put_if_match_on_missing_resource_fails() {
    let t = TestEngine::new().await;
    let result = t
        .open("new.txt")
        .await
        .put("text/plain", Bytes::from_static(b"x"), Some("*"))
        .await;
    assert_status(result, StatusCode::PRECONDITION_FAILED);
    assert!(!t.exists("new.txt").await);
}

#[tokio::test]
async fn test_put_errors() {
    let t = TestEngine::new().await;
    t.mkcol("docs").await.unwrap();

    assert_not_found(t.put("missing/a.txt", b"x").await);
    assert!(matches!(
        t.put("docs", b"x").await,
        Err(DavError::BadRequest {
            reason: BadRequestReason::NotAFile,
            ..
        })
    ));
}

#[tokio::test]
async fn test_mkcol_errors() {
    let t = TestEngine::new().await;
    t.mkcol("docs").await.unwrap();

    assert_status(t.mkcol("docs").await, StatusCode::METHOD_NOT_ALLOWED);
    assert!(matches!(
        t.mkcol("nope/inner").await,
        Err(DavError::Conflict {
            reason: ConflictReason::ParentMissing,
            ..
        })
    ));
    t.put("file.txt", b"x").await.unwrap();
    assert_status(t.mkcol("file.txt/inner").await, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_depth_and_child_limits() {
    let t = TestEngine::with_config(EngineConfig {
        max_collection_depth: 2,
        max_child_resources: 2,
        ..EngineConfig::default()
    })
    .await;

    t.mkcol("a").await.unwrap();
    t.mkcol("a/b").await.unwrap();
    assert!(matches!(
        t.mkcol("a/b/c").await,
        Err(DavError::BadRequest {
            reason: BadRequestReason::DepthExceeded { max: 2 },
            ..
        })
    ));

    t.put("x", b"1").await.unwrap();
    assert!(matches!(
        t.put("y", b"2").await,
        Err(DavError::BadRequest {
            reason: BadRequestReason::TooManyChildren { max: 2 },
            ..
        })
    ));
    // Replacing an existing child does not count against the limit
    t.put("x", b"3").await.unwrap();
}

#[tokio::test]
async fn test_service_collection_has_source() {
    let t = TestEngine::new().await;
    t.open("svc").await.mkcol(CollectionKind::Service).await.unwrap();

    let children = t.open("svc").await.list_children().await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, SERVICE_SOURCE_NAME);
    assert_eq!(children[0].kind, NodeKind::WebDavCollection);

    t.put("svc/__src/main.js", b"code").await.unwrap();
    assert!(matches!(
        t.mkcol("svc/__src/lib").await,
        Err(DavError::Forbidden {
            reason: ForbiddenReason::CollectionInServiceSource,
            ..
        })
    ));
    assert_status(t.put("svc/other.js", b"x").await, StatusCode::CONFLICT);
    assert_tree_integrity(&t).await;
}

// ============================================================================
// GET
// ============================================================================

#[tokio::test]
async fn test_get_ranges() {
    let t = TestEngine::new().await;
    t.put("digits", b"0123456789").await.unwrap();
    let mut file = t.open("digits").await;

    let whole = file.get(None, None).await.unwrap();
    assert_eq!(whole.status, StatusCode::OK);
    assert_eq!(whole.content_length, 10);
    assert!(whole.content_range.is_none());

    let part = file.get(Some("bytes=2-4"), None).await.unwrap();
    assert_eq!(part.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(part.body, Bytes::from_static(b"234"));
    assert_eq!(part.content_range.as_deref(), Some("bytes 2-4/10"));

    let garbage = file.get(Some("lines=1-2"), None).await.unwrap();
    assert_eq!(garbage.status, StatusCode::OK);

    assert_status(file.get(Some("bytes=0-1,4-5"), None).await, StatusCode::NOT_IMPLEMENTED);
    assert_status(file.get(Some("bytes=20-30"), None).await, StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_get_if_none_match() {
    let t = TestEngine::new().await;
    let put = t.put("a.txt", b"abc").await.unwrap();
    let mut file = t.open("a.txt").await;
    assert_status(file.get(None, Some(&put.etag)).await, StatusCode::NOT_MODIFIED);
    assert!(file.get(None, Some("\"0-0\"")).await.is_ok());
}

#[tokio::test]
async fn test_get_with_missing_content_is_unavailable() {
    let t = TestEngine::new().await;
    t.put("a.txt", b"abc").await.unwrap();
    let mut file = t.open("a.txt").await;
    let id = file.node().unwrap().id.clone();
    t.blobs.remove_raw(&id);

    assert!(matches!(file.get(None, None).await, Err(DavError::Unavailable { .. })));
    assert_not_found(t.open("missing.txt").await.get(None, None).await);
}

// ============================================================================
// PROPPATCH
// ============================================================================

#[tokio::test]
async fn test_proppatch_statuses() {
    let t = TestEngine::new().await;
    t.put("a.txt", b"x").await.unwrap();
    let mut file = t.open("a.txt").await;
    let before = file.etag();

    let stats = file
        .proppatch(&[
            PropOp::Set {
                name: "author".into(),
                namespace: "urn:x".into(),
                value: "<author>me</author>".into(),
            },
            PropOp::Remove {
                name: "absent".into(),
                namespace: "urn:x".into(),
            },
        ])
        .await
        .unwrap();
    assert_eq!(stats[0].key, "author@urn:x");
    assert_eq!(stats[0].status, StatusCode::OK);
    assert_eq!(stats[1].status, StatusCode::NOT_FOUND);
    assert_ne!(file.etag(), before);
    assert_eq!(
        file.node().unwrap().properties.get("author@urn:x").map(String::as_str),
        Some("<author>me</author>")
    );

    let removed = file
        .proppatch(&[PropOp::Remove {
            name: "author".into(),
            namespace: "urn:x".into(),
        }])
        .await
        .unwrap();
    assert_eq!(removed[0].status, StatusCode::OK);
    assert!(file.node().unwrap().properties.is_empty());

    assert_not_found(t.open("missing").await.proppatch(&[]).await);
}

// ============================================================================
// DELETE
// ============================================================================

#[tokio::test]
async fn test_delete_non_empty_collection_conflicts() {
    let t = TestEngine::new().await;
    t.mkcol("docs").await.unwrap();
    t.put("docs/a.txt", b"x").await.unwrap();

    assert_status(t.open("docs").await.delete(None).await, StatusCode::CONFLICT);

    t.open("docs/a.txt").await.delete(None).await.unwrap();
    t.open("docs").await.delete(None).await.unwrap();
    assert!(!t.exists("docs").await);
    assert!(t.blobs.is_empty());
    assert_tree_integrity(&t).await;
}

#[tokio::test]
async fn test_delete_already_unlinked_is_not_found() {
    let t = TestEngine::new().await;
    t.put("a.txt", b"x").await.unwrap();
    let mut first = t.open("a.txt").await;
    let mut second = t.open("a.txt").await;

    first.delete(None).await.unwrap();
    assert_not_found(second.delete(None).await);
}

#[tokio::test]
async fn test_delete_if_match() {
    let t = TestEngine::new().await;
    t.put("a.txt", b"x").await.unwrap();
    let mut file = t.open("a.txt").await;
    assert_status(file.delete(Some("\"9-9\"")).await, StatusCode::PRECONDITION_FAILED);
    let etag = file.etag().unwrap();
    file.delete(Some(&etag)).await.unwrap();
}

#[tokio::test]
async fn test_delete_service_collection_removes_source() {
    let t = TestEngine::new().await;
    t.open("svc").await.mkcol(CollectionKind::Service).await.unwrap();
    t.put("svc/__src/main.js", b"code").await.unwrap();
    assert_status(t.open("svc").await.delete(None).await, StatusCode::CONFLICT);

    t.open("svc/__src/main.js").await.delete(None).await.unwrap();
    let nodes_before = t.store.count_type(DocType::DavNode);
    t.open("svc").await.delete(None).await.unwrap();
    assert_eq!(t.store.count_type(DocType::DavNode), nodes_before - 2);
}

#[tokio::test]
async fn test_service_source_cannot_be_deleted_or_moved() {
    let t = TestEngine::new().await;
    t.open("svc").await.mkcol(CollectionKind::Service).await.unwrap();
    t.mkcol("elsewhere").await.unwrap();

    let fixed = |result: Result<_, DavError>| {
        matches!(
            result,
            Err(DavError::Forbidden {
                reason: ForbiddenReason::ServiceSourceFixed,
                ..
            })
        )
    };
    assert!(fixed(t.open("svc/__src").await.delete(None).await));
    assert!(fixed(
        t.open("svc/__src")
            .await
            .move_to(&t.path("elsewhere/src"), false, None, &AccessContext::Owner)
            .await
            .map(|_| ())
    ));
    assert!(t.exists("svc/__src").await);
    assert_tree_integrity(&t).await;

    // The Service collection stays deletable as a unit
    t.open("svc").await.delete(None).await.unwrap();
    assert!(!t.exists("svc").await);
    assert_tree_integrity(&t).await;
}

#[tokio::test]
async fn test_delete_reports_blob_failure_after_metadata() {
    let t = TestEngine::new().await;
    t.put("a.txt", b"x").await.unwrap();
    t.blobs.set_fail_deletes(true);

    let result = t.open("a.txt").await.delete(None).await;
    assert_status(result, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!t.exists("a.txt").await);
    assert_eq!(t.blobs.len(), 1);
}
