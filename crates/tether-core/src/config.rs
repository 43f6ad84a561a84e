//! Configuration types and loading

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TetherError;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Hook installation options
    pub attachment: AttachmentOptions,

    /// Storage configuration
    pub storage: StorageConfig,
}

/// Which record hooks an attachment installs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AttachmentOptions {
    /// Copy attacher validation errors into the record's errors
    pub validations: bool,
    /// Save, finalize, and destroy attachments from record save/destroy
    pub callbacks: bool,
}

impl Default for AttachmentOptions {
    fn default() -> Self {
        Self {
            validations: true,
            callbacks: true,
        }
    }
}

impl AttachmentOptions {
    pub fn validations(mut self, enabled: bool) -> Self {
        self.validations = enabled;
        self
    }

    pub fn callbacks(mut self, enabled: bool) -> Self {
        self.callbacks = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Filesystem,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the filesystem backend
    pub root: String,
    /// Storage key and directory of temporary uploads
    pub cache_prefix: String,
    /// Storage key and directory of permanent uploads
    pub store_prefix: String,
    /// Maximum attachment size in bytes
    pub max_file_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            root: "/tmp/tether".to_string(),
            cache_prefix: "cache".to_string(),
            store_prefix: "store".to_string(),
            max_file_size: 100 * 1024 * 1024, // 100 MB
        }
    }
}

impl TetherConfig {
    /// Load configuration from `TETHER_*` environment variables
    pub fn from_env() -> Result<Self, TetherError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from a variable lookup, starting from defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TetherError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let parse_bool = |key: &str, v: String| -> Result<bool, TetherError> {
            match v.as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(TetherError::Config(format!("invalid boolean for {}: {}", key, v))),
            }
        };

        if let Some(v) = lookup("TETHER_VALIDATIONS") {
            config.attachment.validations = parse_bool("TETHER_VALIDATIONS", v)?;
        }
        if let Some(v) = lookup("TETHER_CALLBACKS") {
            config.attachment.callbacks = parse_bool("TETHER_CALLBACKS", v)?;
        }

        if let Some(backend) = lookup("TETHER_STORAGE_BACKEND") {
            config.storage.backend = match backend.as_str() {
                "memory" => StorageBackend::Memory,
                "filesystem" => StorageBackend::Filesystem,
                other => {
                    return Err(TetherError::Config(format!(
                        "unknown storage backend: {}",
                        other
                    )))
                }
            };
        }
        if let Some(root) = lookup("TETHER_STORAGE_ROOT") {
            config.storage.root = root;
        }
        if let Some(size) = lookup("TETHER_MAX_FILE_SIZE") {
            config.storage.max_file_size = size
                .parse()
                .map_err(|_| TetherError::Config(format!("invalid max file size: {}", size)))?;
        }

        debug!(backend = ?config.storage.backend, root = %config.storage.root, "Configuration loaded");
        Ok(config)
    }

    /// Load configuration from a file layered with `TETHER__` environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TetherError> {
        debug!(path = %path.as_ref().display(), "Loading configuration");
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("TETHER").separator("__"))
            .build()
            .map_err(|e| TetherError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| TetherError::Config(e.to_string()))
    }
}
