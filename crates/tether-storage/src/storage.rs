//! Storage Abstraction
//!
//! Provides a unified interface for file storage backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tether_core::TetherError;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Unknown storage: {0}")]
    UnknownStorage(String),
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for TetherError {
    fn from(err: StorageError) -> Self {
        TetherError::Storage(err.to_string())
    }
}

/// Storage trait - unified interface for storage backends
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store data under an id, replacing any existing content
    async fn upload(&self, id: &str, data: Bytes) -> StorageResult<()>;

    /// Retrieve data by id
    async fn open(&self, id: &str) -> StorageResult<Bytes>;

    /// Check if id exists
    async fn exists(&self, id: &str) -> StorageResult<bool>;

    /// Delete data by id. Deleting a missing id succeeds.
    async fn delete(&self, id: &str) -> StorageResult<()>;

    /// URL for direct access
    fn url(&self, id: &str) -> String;

    /// Get storage name for logging
    fn name(&self) -> &str;
}

/// Local filesystem storage
pub struct FileSystemStorage {
    /// Root directory for storage
    root: PathBuf,
    /// Base URL for generating URLs
    base_url: String,
}

impl FileSystemStorage {
    /// Create a new filesystem storage
    pub fn new(root: impl AsRef<Path>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            base_url: base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an id to a full path
    fn resolve_path(&self, id: &str) -> StorageResult<PathBuf> {
        // Prevent directory traversal
        if id.is_empty() || id.contains("..") || id.starts_with('/') || id.starts_with('\\') {
            return Err(StorageError::InvalidPath(id.to_string()));
        }

        Ok(self.root.join(id))
    }

    /// Ensure parent directory exists
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FileSystemStorage {
    #[instrument(skip(self, data), fields(storage = "filesystem"))]
    async fn upload(&self, id: &str, data: Bytes) -> StorageResult<()> {
        let path = self.resolve_path(id)?;
        self.ensure_parent(&path).await?;

        let mut file = fs::File::create(&path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;

        debug!(path = ?path, size = data.len(), "File stored");
        Ok(())
    }

    #[instrument(skip(self), fields(storage = "filesystem"))]
    async fn open(&self, id: &str) -> StorageResult<Bytes> {
        let path = self.resolve_path(id)?;

        if !fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(id.to_string()));
        }

        let mut file = fs::File::open(&path).await?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer).await?;

        Ok(Bytes::from(buffer))
    }

    async fn exists(&self, id: &str) -> StorageResult<bool> {
        let path = self.resolve_path(id)?;
        Ok(fs::try_exists(&path).await?)
    }

    #[instrument(skip(self), fields(storage = "filesystem"))]
    async fn delete(&self, id: &str) -> StorageResult<()> {
        let path = self.resolve_path(id)?;

        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
            debug!(path = ?path, "File deleted");
        }

        Ok(())
    }

    fn url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url, id)
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}

/// In-memory storage
pub struct MemoryStorage {
    files: RwLock<HashMap<String, Bytes>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload(&self, id: &str, data: Bytes) -> StorageResult<()> {
        let mut files = self.files.write().await;
        files.insert(id.to_string(), data);
        Ok(())
    }

    async fn open(&self, id: &str) -> StorageResult<Bytes> {
        let files = self.files.read().await;
        files
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn exists(&self, id: &str) -> StorageResult<bool> {
        let files = self.files.read().await;
        Ok(files.contains_key(id))
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        let mut files = self.files.write().await;
        files.remove(id);
        Ok(())
    }

    fn url(&self, id: &str) -> String {
        format!("memory://{}", id)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Generate a unique location, keeping the original extension
pub fn generate_location(filename: Option<&str>) -> String {
    let uuid = Uuid::new_v4().simple();
    let ext = filename
        .and_then(|f| Path::new(f).extension())
        .and_then(|s| s.to_str())
        .unwrap_or("");

    if ext.is_empty() {
        format!("{}", uuid)
    } else {
        format!("{}.{}", uuid, ext.to_lowercase())
    }
}
