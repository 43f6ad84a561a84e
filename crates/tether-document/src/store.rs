//! Document store
//!
//! Raw storage of top-level documents keyed by collection and identity.
//! Embedded documents live inside their root's value and are never stored
//! on their own.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Map;
use tether_core::{RecordId, TetherError, TetherResult, Value};
use tokio::sync::RwLock;
use tracing::debug;

/// Storage backend for documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Find a document by identity
    async fn find(&self, collection: &str, id: &RecordId) -> TetherResult<Option<Value>>;

    /// Insert a new document; fails if the identity is taken
    async fn insert(&self, collection: &str, id: &RecordId, document: Value) -> TetherResult<()>;

    /// Overwrite top-level keys of a document. Returns false if it does not exist.
    async fn set_fields(
        &self,
        collection: &str,
        id: &RecordId,
        fields: Map<String, Value>,
    ) -> TetherResult<bool>;

    /// Set one field on every document of a collection
    async fn update_all(&self, collection: &str, field: &str, value: Value) -> TetherResult<usize>;

    /// Delete a document. Returns true if it existed.
    async fn delete(&self, collection: &str, id: &RecordId) -> TetherResult<bool>;

    /// Count documents in a collection
    async fn count(&self, collection: &str) -> TetherResult<usize>;
}

/// In-memory document store
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<RecordId, Value>>>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find(&self, collection: &str, id: &RecordId) -> TetherResult<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn insert(&self, collection: &str, id: &RecordId, document: Value) -> TetherResult<()> {
        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();

        if documents.contains_key(id) {
            return Err(TetherError::Persistence(format!(
                "duplicate key in {}: {}",
                collection, id
            )));
        }

        documents.insert(id.clone(), document);
        debug!(collection, id = %id, "Document inserted");
        Ok(())
    }

    async fn set_fields(
        &self,
        collection: &str,
        id: &RecordId,
        fields: Map<String, Value>,
    ) -> TetherResult<bool> {
        let mut collections = self.collections.write().await;
        let Some(Value::Object(document)) = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
        else {
            return Ok(false);
        };

        for (key, value) in fields {
            document.insert(key, value);
        }
        Ok(true)
    }

    async fn update_all(&self, collection: &str, field: &str, value: Value) -> TetherResult<usize> {
        let mut collections = self.collections.write().await;
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut count = 0;
        for document in documents.values_mut() {
            if let Value::Object(map) = document {
                map.insert(field.to_string(), value.clone());
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> TetherResult<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .and_then(|documents| documents.remove(id))
            .is_some())
    }

    async fn count(&self, collection: &str) -> TetherResult<usize> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map(BTreeMap::len).unwrap_or(0))
    }
}
