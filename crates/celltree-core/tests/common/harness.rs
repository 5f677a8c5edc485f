//! In-memory engine with one Cell and one Box ready to use.

use std::sync::Arc;

use bytes::Bytes;
use celltree_core::blob::MemoryBlobStore;
use celltree_core::component::WriteOutcome;
use celltree_core::node::CollectionKind;
use celltree_core::store::MemoryDocumentStore;
use celltree_core::{DavResult, Engine, EngineConfig, ResourceComponent, ResourcePath};
use tracing_subscriber::EnvFilter;

pub const UNIT_URL: &str = "https://unit.example/";
pub const CELL: &str = "alice";
pub const BOX: &str = "box1";

/// Route engine logs to the test writer. `RUST_LOG` overrides the default
/// `warn` level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

pub struct TestEngine {
    pub engine: Engine,
    pub store: Arc<MemoryDocumentStore>,
    pub blobs: Arc<MemoryBlobStore>,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(mut config: EngineConfig) -> Self {
        init_tracing();
        config.unit_url = UNIT_URL.to_string();
        let store = Arc::new(MemoryDocumentStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let engine = Engine::new(config, store.clone(), blobs.clone()).expect("valid config");
        engine.create_cell(CELL).await.expect("create cell");
        engine.create_box(CELL, BOX, None).await.expect("create box");
        Self { engine, store, blobs }
    }

    /// Path under the test Box, e.g. `"docs/a.txt"`.
    pub fn path(&self, under_box: &str) -> ResourcePath {
        ResourcePath::parse(&format!("/{CELL}/{BOX}/{under_box}")).expect("valid path")
    }

    pub async fn open(&self, under_box: &str) -> ResourceComponent {
        self.engine.open(&self.path(under_box)).await.expect("open")
    }

    pub async fn mkcol(&self, under_box: &str) -> DavResult<()> {
        self.open(under_box).await.mkcol(CollectionKind::WebDav).await
    }

    pub async fn put(&self, under_box: &str, content: &[u8]) -> DavResult<WriteOutcome> {
        self.open(under_box)
            .await
            .put("application/octet-stream", Bytes::copy_from_slice(content), None)
            .await
    }

    pub async fn read(&self, under_box: &str) -> DavResult<Bytes> {
        Ok(self.open(under_box).await.get(None, None).await?.body)
    }

    pub async fn exists(&self, under_box: &str) -> bool {
        self.open(under_box).await.exists()
    }
}
