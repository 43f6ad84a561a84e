//! Uploaded file descriptors
//!
//! `UploadedFile` is what gets serialized into a record's `<name>_data`
//! column: the storage it lives in, its id within that storage, and the
//! metadata extracted at upload time.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tether_core::{TetherResult, Value};

/// A file uploaded to one of the uploader's storages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Location within the storage
    pub id: String,
    /// Key of the storage holding the file
    pub storage: String,
    /// Extracted metadata (filename, size, mime_type, sha256)
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl UploadedFile {
    pub fn new(id: impl Into<String>, storage: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            storage: storage.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Parse a descriptor from its mapping form
    pub fn from_data(data: Value) -> TetherResult<Self> {
        Ok(serde_json::from_value(data)?)
    }

    /// Mapping form, as stored in hash-typed columns
    pub fn data(&self) -> Value {
        json!({
            "id": self.id,
            "storage": self.storage,
            "metadata": self.metadata,
        })
    }

    pub fn storage_key(&self) -> &str {
        &self.storage
    }

    pub fn size(&self) -> Option<u64> {
        self.metadata.get("size").and_then(Value::as_u64)
    }

    pub fn filename(&self) -> Option<&str> {
        self.metadata.get("filename").and_then(Value::as_str)
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.metadata.get("mime_type").and_then(Value::as_str)
    }

    pub fn sha256(&self) -> Option<&str> {
        self.metadata.get("sha256").and_then(Value::as_str)
    }
}

/// Content to be uploaded, with optional hints about its origin
#[derive(Debug, Clone)]
pub struct Upload {
    pub data: Bytes,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
}

impl Upload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            filename: None,
            mime_type: None,
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
