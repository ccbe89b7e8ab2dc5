//! # Blob Store
//!
//! Source PDFs live in a blob store addressed by the item's storage path.
//! Fulfillment only reads from it; the upload path writes.
//!
//! ```text
//! ┌──────────────────┐      get(path)      ┌─────────────────────────────┐
//! │ FulfillmentSvc   │ ──────────────────► │ dyn BlobStore               │
//! └──────────────────┘                     │  ├─ LocalBlobStore (fs)     │
//!                                          │  └─ MemoryBlobStore (tests) │
//!                                          └─────────────────────────────┘
//! ```
//!
//! Storage paths are never shown to clients. They are relative, slash
//! separated and may not climb out of the store root.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

/// Blob store errors.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    #[error("Blob I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Byte storage for item files.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    async fn get(&self, path: &str) -> BlobResult<Vec<u8>>;

    async fn exists(&self, path: &str) -> BlobResult<bool>;

    /// Deleting a missing blob succeeds.
    async fn delete(&self, path: &str) -> BlobResult<()>;

    /// Stores `bytes` at `path`, replacing any previous blob. Returns a locator.
    async fn put(&self, bytes: Vec<u8>, path: &str) -> BlobResult<String>;
}

/// Rejects empty, absolute and parent-relative paths.
fn checked(path: &str) -> BlobResult<&Path> {
    let candidate = Path::new(path);
    let normal = !path.is_empty() && candidate.components().all(|c| matches!(c, Component::Normal(_)));

    if normal {
        Ok(candidate)
    } else {
        Err(BlobError::InvalidPath(path.to_string()))
    }
}

// =============================================================================
// Local filesystem
// =============================================================================

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalBlobStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> BlobResult<PathBuf> {
        Ok(self.root.join(checked(path)?))
    }
}

fn io_error(path: &str, source: std::io::Error) -> BlobError {
    if source.kind() == std::io::ErrorKind::NotFound {
        BlobError::NotFound(path.to_string())
    } else {
        BlobError::Io {
            path: path.to_string(),
            source,
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn get(&self, path: &str) -> BlobResult<Vec<u8>> {
        let full = self.resolve(path)?;
        let bytes = fs::read(&full).await.map_err(|e| io_error(path, e))?;
        debug!(path, size = bytes.len(), "Blob read");
        Ok(bytes)
    }

    async fn exists(&self, path: &str) -> BlobResult<bool> {
        let full = self.resolve(path)?;
        fs::try_exists(&full).await.map_err(|e| io_error(path, e))
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(path, e)),
        }
    }

    async fn put(&self, bytes: Vec<u8>, path: &str) -> BlobResult<String> {
        let full = self.resolve(path)?;
        if let Some(dir) = full.parent() {
            fs::create_dir_all(dir).await.map_err(|e| io_error(path, e))?;
        }

        let mut file = fs::File::create(&full).await.map_err(|e| io_error(path, e))?;
        file.write_all(&bytes).await.map_err(|e| io_error(path, e))?;
        file.flush().await.map_err(|e| io_error(path, e))?;

        debug!(path, size = bytes.len(), "Blob written");
        Ok(path.to_string())
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Process-local blob store for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, path: &str) -> BlobResult<Vec<u8>> {
        checked(path)?;
        self.blobs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> BlobResult<bool> {
        checked(path)?;
        Ok(self.blobs.read().await.contains_key(path))
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        checked(path)?;
        self.blobs.write().await.remove(path);
        Ok(())
    }

    async fn put(&self, bytes: Vec<u8>, path: &str) -> BlobResult<String> {
        checked(path)?;
        self.blobs.write().await.insert(path.to_string(), bytes);
        Ok(format!("memory://{}", path))
    }
}
