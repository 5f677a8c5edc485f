//! Binary content storage keyed by node id.
//!
//! File content lives outside the document store behind the narrow
//! [`BinaryDataAccessor`] interface. Two implementations are provided:
//! [`MemoryBlobStore`] for tests and embedding, and [`FileBlobStore`], which
//! writes each blob to a fanned-out directory tree using write-then-rename.

use std::fmt;
use std::io;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("binary content '{id}' not found")]
    NotFound { id: String },

    #[error("binary content '{id}' could not be accessed: {source}")]
    Access {
        id: String,
        #[source]
        source: io::Error,
    },
}

impl BlobError {
    fn from_io(id: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            BlobError::NotFound { id: id.to_string() }
        } else {
            BlobError::Access {
                id: id.to_string(),
                source,
            }
        }
    }
}

/// Byte-stream storage keyed by opaque id.
#[async_trait]
pub trait BinaryDataAccessor: Send + Sync + fmt::Debug {
    /// Store new content; returns the byte length written.
    async fn create(&self, id: &str, data: Bytes) -> Result<u64, BlobError>;

    /// Replace existing content; returns the byte length written.
    async fn update(&self, id: &str, data: Bytes) -> Result<u64, BlobError>;

    async fn get(&self, id: &str) -> Result<Bytes, BlobError>;

    /// Inclusive byte range `start..=end`.
    async fn get_range(&self, id: &str, start: u64, end: u64) -> Result<Bytes, BlobError>;

    async fn size(&self, id: &str) -> Result<u64, BlobError>;

    /// Filesystem location, for accessors that have one.
    fn path(&self, id: &str) -> Option<PathBuf>;

    async fn delete(&self, id: &str) -> Result<(), BlobError>;
}

fn slice_range(data: &Bytes, start: u64, end: u64) -> Bytes {
    let len = data.len();
    let start = usize::try_from(start).unwrap_or(len).min(len);
    let end = usize::try_from(end.saturating_add(1)).unwrap_or(len).min(len);
    data.slice(start..end.max(start))
}

/// In-memory accessor.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Bytes>,
    fail_deletes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent delete fail with an access error.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.blobs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Drop content behind the engine's back (simulates a raced delete).
    pub fn remove_raw(&self, id: &str) {
        self.blobs.remove(id);
    }
}

#[async_trait]
impl BinaryDataAccessor for MemoryBlobStore {
    async fn create(&self, id: &str, data: Bytes) -> Result<u64, BlobError> {
        let len = data.len() as u64;
        self.blobs.insert(id.to_string(), data);
        Ok(len)
    }

    async fn update(&self, id: &str, data: Bytes) -> Result<u64, BlobError> {
        self.create(id, data).await
    }

    async fn get(&self, id: &str) -> Result<Bytes, BlobError> {
        self.blobs
            .get(id)
            .map(|b| b.clone())
            .ok_or_else(|| BlobError::NotFound { id: id.to_string() })
    }

    async fn get_range(&self, id: &str, start: u64, end: u64) -> Result<Bytes, BlobError> {
        let data = self.get(id).await?;
        Ok(slice_range(&data, start, end))
    }

    async fn size(&self, id: &str) -> Result<u64, BlobError> {
        self.get(id).await.map(|b| b.len() as u64)
    }

    fn path(&self, _id: &str) -> Option<PathBuf> {
        None
    }

    async fn delete(&self, id: &str) -> Result<(), BlobError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BlobError::Access {
                id: id.to_string(),
                source: io::Error::other("delete refused"),
            });
        }
        self.blobs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound { id: id.to_string() })
    }
}

/// On-disk accessor rooted at a directory.
///
/// Blob `abcdef...` lives at `<root>/ab/cd/abcdef...`.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        let a = id.get(0..2).unwrap_or("__");
        let b = id.get(2..4).unwrap_or("__");
        self.root.join(a).join(b).join(id)
    }

    async fn write(&self, id: &str, data: Bytes) -> Result<u64, BlobError> {
        let path = self.blob_path(id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::from_io(id, e))?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| BlobError::from_io(id, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| BlobError::from_io(id, e))?;
        trace!(id, bytes = data.len(), "Blob written");
        Ok(data.len() as u64)
    }
}

#[async_trait]
impl BinaryDataAccessor for FileBlobStore {
    async fn create(&self, id: &str, data: Bytes) -> Result<u64, BlobError> {
        self.write(id, data).await
    }

    async fn update(&self, id: &str, data: Bytes) -> Result<u64, BlobError> {
        self.write(id, data).await
    }

    async fn get(&self, id: &str) -> Result<Bytes, BlobError> {
        tokio::fs::read(self.blob_path(id))
            .await
            .map(Bytes::from)
            .map_err(|e| BlobError::from_io(id, e))
    }

    async fn get_range(&self, id: &str, start: u64, end: u64) -> Result<Bytes, BlobError> {
        let mut file = tokio::fs::File::open(self.blob_path(id))
            .await
            .map_err(|e| BlobError::from_io(id, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| BlobError::from_io(id, e))?
            .len();
        if start >= size {
            return Ok(Bytes::new());
        }
        let end = end.min(size - 1);
        let len = usize::try_from(end - start + 1).map_err(|e| BlobError::Access {
            id: id.to_string(),
            source: io::Error::other(e),
        })?;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| BlobError::from_io(id, e))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| BlobError::from_io(id, e))?;
        Ok(Bytes::from(buf))
    }

    async fn size(&self, id: &str) -> Result<u64, BlobError> {
        tokio::fs::metadata(self.blob_path(id))
            .await
            .map(|m| m.len())
            .map_err(|e| BlobError::from_io(id, e))
    }

    fn path(&self, id: &str) -> Option<PathBuf> {
        Some(self.blob_path(id))
    }

    async fn delete(&self, id: &str) -> Result<(), BlobError> {
        tokio::fs::remove_file(self.blob_path(id))
            .await
            .map_err(|e| BlobError::from_io(id, e))?;
        debug!(id, "Blob deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_ranges() {
        let store = MemoryBlobStore::new();
        assert_eq!(store.create("a", Bytes::from_static(b"hello world")).await.unwrap(), 11);
        assert_eq!(&store.get_range("a", 0, 4).await.unwrap()[..], b"hello");
        assert_eq!(&store.get_range("a", 6, 100).await.unwrap()[..], b"world");
        assert_eq!(store.size("a").await.unwrap(), 11);
        store.delete("a").await.unwrap();
        assert!(matches!(store.get("a").await, Err(BlobError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_memory_store_failing_delete() {
        let store = MemoryBlobStore::new();
        store.create("a", Bytes::from_static(b"x")).await.unwrap();
        store.set_fail_deletes(true);
        assert!(matches!(store.delete("a").await, Err(BlobError::Access { .. })));
        assert!(store.contains("a"));
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_range() {
        let temp = TempDir::new().unwrap();
        let store = FileBlobStore::new(temp.path());
        let id = "0123456789abcdef";
        store.create(id, Bytes::from_static(b"0123456789")).await.unwrap();
        assert_eq!(store.size(id).await.unwrap(), 10);
        assert_eq!(&store.get_range(id, 2, 5).await.unwrap()[..], b"2345");
        assert_eq!(&store.get_range(id, 8, 50).await.unwrap()[..], b"89");

        let path = store.path(id).unwrap();
        assert!(path.starts_with(temp.path().join("01").join("23")));

        assert_eq!(store.update(id, Bytes::from_static(b"new")).await.unwrap(), 3);
        assert_eq!(&store.get(id).await.unwrap()[..], b"new");

        store.delete(id).await.unwrap();
        assert!(matches!(store.size(id).await, Err(BlobError::NotFound { .. })));
        assert!(matches!(store.delete(id).await, Err(BlobError::NotFound { .. })));
    }
}
