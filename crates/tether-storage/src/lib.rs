//! # tether-storage
//!
//! File storage handling for Tether.
//!
//! ## Features
//!
//! - Storage abstraction (in-memory, local filesystem)
//! - Uploaded file descriptors persisted in record columns
//! - Pluggable column serializers
//! - An uploader routing files between the cache and permanent storages
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_storage::{Upload, Uploader};
//!
//! let uploader = Uploader::memory();
//! let cached = uploader
//!     .upload(&Upload::new("hello").filename("hello.txt"), uploader.cache_key(), None)
//!     .await?;
//! let stored = uploader.copy(&cached, uploader.store_key(), None).await?;
//! ```

pub mod file;
pub mod serializer;
pub mod storage;
pub mod uploader;

pub use file::{Upload, UploadedFile};
pub use serializer::{ColumnSerializer, JsonSerializer};
pub use storage::{
    generate_location, FileSystemStorage, MemoryStorage, Storage, StorageError, StorageResult,
};
pub use uploader::Uploader;
