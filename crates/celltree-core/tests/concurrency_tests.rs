//! Concurrent mutations inside one Box.
//!
//! Mutations are serialized by the Box lock, so racing writers must never
//! lose an update to their shared parent collection.
//!
//! The `stress_*` tests run only with the `stress` feature:
//!
//! ```bash
//! cargo test -p celltree-core --features stress --test concurrency_tests
//! ```

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use celltree_core::lock::LockCategory;
use celltree_core::node::CollectionKind;
use celltree_core::{DavError, EngineConfig};
use common::{BOX, CELL, TestEngine, assert_tree_integrity};
use tokio::task::JoinSet;

const TEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_puts_to_one_collection() {
    let t = Arc::new(TestEngine::new().await);
    t.mkcol("shared").await.unwrap();

    let mut tasks = JoinSet::new();
    for i in 0..16 {
        let t = Arc::clone(&t);
        tasks.spawn(async move {
            let name = format!("shared/file-{i}.txt");
            t.put(&name, format!("content {i}").as_bytes()).await
        });
    }
    tokio::time::timeout(TEST_TIMEOUT, async {
        while let Some(result) = tasks.join_next().await {
            result.expect("task panicked").expect("put failed");
        }
    })
    .await
    .expect("parallel puts deadlocked");

    let listed: BTreeSet<String> = t
        .open("shared")
        .await
        .list_children()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(listed.len(), 16);
    assert_eq!(t.read("shared/file-7.txt").await.unwrap(), Bytes::from("content 7"));
    assert_tree_integrity(&t).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_mkcol_has_one_winner() {
    let t = Arc::new(TestEngine::new().await);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let t = Arc::clone(&t);
        tasks.spawn(async move { t.open("dir").await.mkcol(CollectionKind::WebDav).await });
    }
    let mut created = 0;
    let mut rejected = 0;
    while let Some(result) = tasks.join_next().await {
        match result.expect("task panicked") {
            Ok(()) => created += 1,
            Err(e) => {
                assert_eq!(e.status(), hyper::StatusCode::METHOD_NOT_ALLOWED, "unexpected error {e}");
                rejected += 1;
            }
        }
    }
    assert_eq!(created, 1);
    assert_eq!(rejected, 7);
    assert_tree_integrity(&t).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_of_one_file_all_apply() {
    let t = Arc::new(TestEngine::new().await);
    t.put("counter", b"0").await.unwrap();

    let mut tasks = JoinSet::new();
    for i in 0..10 {
        let t = Arc::clone(&t);
        tasks.spawn(async move {
            t.open("counter")
                .await
                .put("text/plain", Bytes::from(i.to_string()), Some("*"))
                .await
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("task panicked").expect("update failed");
    }
    // One create plus ten serialized updates
    assert_eq!(t.open("counter").await.version(), Some(11));
}

#[tokio::test]
async fn test_held_box_lock_times_out_writers() {
    let t = TestEngine::with_config(EngineConfig {
        lock_timeout_ms: 50,
        ..EngineConfig::default()
    })
    .await;
    let cell = t.engine.cell(CELL).await.unwrap();
    let box_doc = t.engine.box_of(&cell, BOX).await.unwrap();

    let mut held = t
        .engine
        .locks()
        .acquire(LockCategory::Dav, &box_doc.id, None)
        .await
        .unwrap();
    let blocked = t.mkcol("docs").await;
    assert!(matches!(blocked, Err(DavError::LockTimeout { .. })));
    assert_eq!(blocked.unwrap_err().status(), hyper::StatusCode::SERVICE_UNAVAILABLE);

    // Reads do not lock
    assert!(t.open("").await.exists());

    held.release();
    t.mkcol("docs").await.unwrap();
    assert_eq!(t.engine.locks().metrics().snapshot().timeouts, 1);
}

// ============================================================================
// Stress tests
// ============================================================================

/// Engine on its own multi-thread runtime, shared by worker threads that
/// each drive a current-thread runtime.
#[cfg(feature = "stress")]
fn stress_engine() -> (tokio::runtime::Runtime, Arc<TestEngine>) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let t = rt.block_on(TestEngine::with_config(EngineConfig {
        lock_timeout_ms: 60_000,
        ..EngineConfig::default()
    }));
    (rt, Arc::new(t))
}

#[test]
#[cfg(feature = "stress")]
fn stress_true_parallel_box_lock_contention() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    const THREAD_COUNT: usize = 16;
    const ITERATIONS: usize = 500;

    let (rt, t) = stress_engine();
    let box_id = rt.block_on(async {
        let cell = t.engine.cell(CELL).await.unwrap();
        t.engine.box_of(&cell, BOX).await.unwrap().id
    });
    let holders = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREAD_COUNT)
        .map(|_| {
            let t = Arc::clone(&t);
            let box_id = box_id.clone();
            let holders = Arc::clone(&holders);
            let violations = Arc::clone(&violations);
            thread::spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                rt.block_on(async {
                    for _ in 0..ITERATIONS {
                        let _guard = t
                            .engine
                            .locks()
                            .acquire(LockCategory::Dav, &box_id, None)
                            .await
                            .unwrap();
                        if holders.fetch_add(1, Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::task::yield_now().await;
                        holders.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    assert_eq!(violations.load(Ordering::SeqCst), 0, "two holders of one Box lock");
    assert_eq!(t.engine.locks().metrics().snapshot().timeouts, 0);
}

#[test]
#[cfg(feature = "stress")]
fn stress_parallel_writers_keep_tree_consistent() {
    use std::thread;

    const THREAD_COUNT: usize = 8;
    const FILES_PER_THREAD: usize = 50;

    let (rt, t) = stress_engine();
    rt.block_on(async {
        t.mkcol("shared").await.unwrap();
        t.put("counter", b"0").await.unwrap();
    });

    let handles: Vec<_> = (0..THREAD_COUNT)
        .map(|worker| {
            let t = Arc::clone(&t);
            thread::spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                rt.block_on(async {
                    for i in 0..FILES_PER_THREAD {
                        t.put(&format!("shared/w{worker}-{i}.txt"), b"x").await.unwrap();
                        t.open("counter")
                            .await
                            .put("text/plain", Bytes::from(format!("{worker}-{i}")), Some("*"))
                            .await
                            .unwrap();
                    }
                });
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    rt.block_on(async {
        let listed = t.open("shared").await.list_children().await.unwrap();
        assert_eq!(listed.len(), THREAD_COUNT * FILES_PER_THREAD);
        let updates = (THREAD_COUNT * FILES_PER_THREAD) as u64;
        assert_eq!(t.open("counter").await.version(), Some(1 + updates));
        assert_tree_integrity(&t).await;
    });
}
