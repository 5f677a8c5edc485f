//! Local state directory.
//!
//! ```text
//! <state_dir>/
//!   documents.json   document store snapshot
//!   blobs/           binary content, one file per resource
//!   celltree.lock    held exclusively while a command runs
//! ```
//!
//! The document store lives in memory for the duration of one command and
//! is written back on close. The lock file keeps two CLI processes from
//! overwriting each other's snapshot.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use fs2::FileExt;
use thiserror::Error;

use celltree_core::blob::FileBlobStore;
use celltree_core::store::{DocumentStore, MemoryDocumentStore};
use celltree_core::{Engine, EngineConfig};

const SNAPSHOT_FILE: &str = "documents.json";
const BLOB_DIR: &str = "blobs";
const LOCK_FILE: &str = "celltree.lock";

/// Default timeout for acquiring the state directory lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no celltree state at {0} (run `celltree init` first)")]
    NotInitialized(PathBuf),

    #[error("state at {0} is already initialized")]
    AlreadyInitialized(PathBuf),

    #[error("timed out after {timeout:?} waiting for {path}; another celltree process may be running")]
    Locked { path: PathBuf, timeout: Duration },
}

/// An opened state directory with a running engine.
pub struct Workspace {
    engine: Engine,
    store: Arc<MemoryDocumentStore>,
    snapshot_path: PathBuf,
    lock_file: File,
}

impl Workspace {
    /// Create the directory layout with an empty snapshot.
    pub async fn init(dir: &Path) -> Result<()> {
        let snapshot_path = dir.join(SNAPSHOT_FILE);
        if snapshot_path.exists() {
            return Err(StateError::AlreadyInitialized(dir.to_path_buf()).into());
        }
        tokio::fs::create_dir_all(dir.join(BLOB_DIR))
            .await
            .with_context(|| format!("Failed to create state dir: {}", dir.display()))?;
        MemoryDocumentStore::new()
            .save_snapshot(&snapshot_path)
            .await
            .context("Failed to write empty snapshot")?;
        tracing::info!(dir = %dir.display(), "State directory initialized");
        Ok(())
    }

    /// Lock the directory, load the snapshot and start an engine over it.
    pub async fn open(dir: &Path, config: EngineConfig) -> Result<Self> {
        let snapshot_path = dir.join(SNAPSHOT_FILE);
        if !snapshot_path.exists() {
            return Err(StateError::NotInitialized(dir.to_path_buf()).into());
        }
        let lock_file = lock_dir(dir).await?;

        let store = Arc::new(
            MemoryDocumentStore::load_snapshot(&snapshot_path)
                .await
                .with_context(|| format!("Failed to load snapshot: {}", snapshot_path.display()))?,
        );
        let blobs = Arc::new(FileBlobStore::new(dir.join(BLOB_DIR)));
        let engine = Engine::new(config, Arc::clone(&store) as Arc<dyn DocumentStore>, blobs).context("Invalid engine configuration")?;
        tracing::debug!(dir = %dir.display(), documents = store.len(), "State directory opened");

        Ok(Self {
            engine,
            store,
            snapshot_path,
            lock_file,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Drain background work, then persist the snapshot when `save` is set.
    pub async fn close(self, save: bool) -> Result<()> {
        self.engine.shutdown().await;
        if save {
            self.store
                .save_snapshot(&self.snapshot_path)
                .await
                .with_context(|| format!("Failed to save snapshot: {}", self.snapshot_path.display()))?;
        }
        if let Err(e) = FileExt::unlock(&self.lock_file) {
            tracing::warn!("Failed to release state lock: {}", e);
        }
        Ok(())
    }
}

async fn lock_dir(dir: &Path) -> Result<File> {
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

    let start = Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if start.elapsed() > LOCK_TIMEOUT {
                    return Err(StateError::Locked {
                        path,
                        timeout: LOCK_TIMEOUT,
                    }
                    .into());
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to lock: {}", path.display())),
        }
    }
}
