//! Uploader
//!
//! Routes uploads to named storages and extracts file metadata.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use tether_core::config::{StorageBackend, StorageConfig};
use tether_core::{TetherResult, Value};
use tracing::{debug, info, instrument};

use crate::file::{Upload, UploadedFile};
use crate::storage::{generate_location, FileSystemStorage, MemoryStorage, Storage, StorageError};

/// Registry of storages plus the keys of the cache and permanent storage
#[derive(Clone)]
pub struct Uploader {
    storages: HashMap<String, Arc<dyn Storage>>,
    cache_key: String,
    store_key: String,
}

impl Uploader {
    pub fn new(cache: Arc<dyn Storage>, store: Arc<dyn Storage>) -> Self {
        let mut storages = HashMap::new();
        storages.insert("cache".to_string(), cache);
        storages.insert("store".to_string(), store);

        Self {
            storages,
            cache_key: "cache".to_string(),
            store_key: "store".to_string(),
        }
    }

    /// Uploader with in-memory cache and store
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), Arc::new(MemoryStorage::new()))
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        let (cache, store): (Arc<dyn Storage>, Arc<dyn Storage>) = match config.backend {
            StorageBackend::Memory => (
                Arc::new(MemoryStorage::new()),
                Arc::new(MemoryStorage::new()),
            ),
            StorageBackend::Filesystem => {
                let root = Path::new(&config.root);
                (
                    Arc::new(FileSystemStorage::new(
                        root.join(&config.cache_prefix),
                        format!("/{}", config.cache_prefix),
                    )),
                    Arc::new(FileSystemStorage::new(
                        root.join(&config.store_prefix),
                        format!("/{}", config.store_prefix),
                    )),
                )
            }
        };

        let mut storages = HashMap::new();
        storages.insert(config.cache_prefix.clone(), cache);
        storages.insert(config.store_prefix.clone(), store);

        Self {
            storages,
            cache_key: config.cache_prefix.clone(),
            store_key: config.store_prefix.clone(),
        }
    }

    /// Register an additional storage under `key`
    pub fn with_storage(mut self, key: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        self.storages.insert(key.into(), storage);
        self
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    pub fn storage(&self, key: &str) -> Result<&Arc<dyn Storage>, StorageError> {
        self.storages
            .get(key)
            .ok_or_else(|| StorageError::UnknownStorage(key.to_string()))
    }

    /// Upload content to the storage registered under `storage_key`
    #[instrument(skip(self, upload), fields(filename = ?upload.filename))]
    pub async fn upload(
        &self,
        upload: &Upload,
        storage_key: &str,
        location: Option<&str>,
    ) -> TetherResult<UploadedFile> {
        let storage = self.storage(storage_key)?;
        let location = location
            .map(str::to_string)
            .unwrap_or_else(|| generate_location(upload.filename.as_deref()));

        storage.upload(&location, upload.data.clone()).await?;
        debug!(storage = storage_key, id = %location, size = upload.size(), "File uploaded");

        Ok(UploadedFile::new(location, storage_key).with_metadata(Self::extract_metadata(upload)))
    }

    /// Copy an uploaded file into another storage, keeping its metadata
    #[instrument(skip(self, file), fields(from = %file.storage, id = %file.id))]
    pub async fn copy(
        &self,
        file: &UploadedFile,
        storage_key: &str,
        location: Option<&str>,
    ) -> TetherResult<UploadedFile> {
        let data = self.open(file).await?;
        let target = self.storage(storage_key)?;
        let location = location
            .map(str::to_string)
            .unwrap_or_else(|| generate_location(file.filename().or(Some(file.id.as_str()))));

        target.upload(&location, data).await?;
        info!(to = storage_key, id = %location, "File copied");

        Ok(UploadedFile::new(location, storage_key).with_metadata(file.metadata.clone()))
    }

    pub async fn open(&self, file: &UploadedFile) -> TetherResult<bytes::Bytes> {
        Ok(self.storage(&file.storage)?.open(&file.id).await?)
    }

    pub async fn exists(&self, file: &UploadedFile) -> TetherResult<bool> {
        Ok(self.storage(&file.storage)?.exists(&file.id).await?)
    }

    pub async fn delete(&self, file: &UploadedFile) -> TetherResult<()> {
        self.storage(&file.storage)?.delete(&file.id).await?;
        debug!(storage = %file.storage, id = %file.id, "File deleted");
        Ok(())
    }

    pub fn url(&self, file: &UploadedFile) -> TetherResult<String> {
        Ok(self.storage(&file.storage)?.url(&file.id))
    }

    /// Calculate SHA256 digest
    fn calculate_digest(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    fn extract_metadata(upload: &Upload) -> BTreeMap<String, Value> {
        let mime_type = upload.mime_type.clone().or_else(|| {
            upload
                .filename
                .as_ref()
                .map(|f| mime_guess::from_path(f).first_or_octet_stream().to_string())
        });

        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_string(), json!(upload.filename));
        metadata.insert("size".to_string(), json!(upload.size()));
        metadata.insert("mime_type".to_string(), json!(mime_type));
        metadata.insert(
            "sha256".to_string(),
            json!(Self::calculate_digest(&upload.data)),
        );
        metadata
    }
}
