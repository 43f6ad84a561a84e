//! Model definitions
//!
//! A `ModelDef` describes one document type: the collection it lives in,
//! its typed fields, the relations embedding other models, and the
//! callbacks registered for each lifecycle event.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tether_core::{
    Callback, Capabilities, Event, FieldType, RecordId, RecordType, TetherError, TetherResult,
    Value,
};
use tracing::debug;

use crate::document::Document;
use crate::store::DocumentStore;

/// Cardinality of an embedded relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    One,
    Many,
}

/// An embedded relation from a parent model to a child model
#[derive(Clone)]
pub struct Relation {
    pub model: Arc<ModelDef>,
    pub kind: RelationKind,
    /// Run the child's save and destroy callbacks when the parent's run
    pub cascade_callbacks: bool,
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("model", &self.model.name())
            .field("kind", &self.kind)
            .field("cascade_callbacks", &self.cascade_callbacks)
            .finish()
    }
}

type CallbackList = Vec<(Event, Arc<dyn Callback<Document>>)>;

/// Definition of a document model
pub struct ModelDef {
    name: String,
    collection: String,
    store: Arc<dyn DocumentStore>,
    fields: RwLock<BTreeMap<String, FieldType>>,
    relations: RwLock<BTreeMap<String, Relation>>,
    callbacks: RwLock<CallbackList>,
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("fields", &*self.fields.read())
            .field("relations", &*self.relations.read())
            .field("callbacks", &self.callbacks.read().len())
            .finish()
    }
}

impl ModelDef {
    /// Start defining a model stored in `store`
    pub fn builder(name: impl Into<String>, store: Arc<dyn DocumentStore>) -> ModelDefBuilder {
        let name = name.into();
        ModelDefBuilder {
            collection: format!("{}s", name.to_lowercase()),
            name,
            store,
            fields: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.read().get(name).copied()
    }

    /// Declare or retype a field
    pub fn set_field_type(&self, name: impl Into<String>, field_type: FieldType) {
        self.fields.write().insert(name.into(), field_type);
    }

    /// Declare an embedded relation to `child`
    pub fn embeds(
        &self,
        relation: impl Into<String>,
        child: &Arc<ModelDef>,
        kind: RelationKind,
        cascade_callbacks: bool,
    ) {
        self.relations.write().insert(
            relation.into(),
            Relation {
                model: Arc::clone(child),
                kind,
                cascade_callbacks,
            },
        );
    }

    pub fn relation(&self, name: &str) -> Option<Relation> {
        self.relations.read().get(name).cloned()
    }

    pub(crate) fn relations(&self) -> BTreeMap<String, Relation> {
        self.relations.read().clone()
    }

    pub(crate) fn cascading_relations(&self) -> Vec<String> {
        self.relations
            .read()
            .iter()
            .filter(|(_, relation)| relation.cascade_callbacks)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Callbacks for `event`, in registration order
    pub(crate) fn callbacks(&self, event: Event) -> Vec<Arc<dyn Callback<Document>>> {
        self.callbacks
            .read()
            .iter()
            .filter(|(registered, _)| *registered == event)
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    /// Build a new, unsaved document
    pub fn new_document(self: &Arc<Self>) -> Document {
        Document::new(self)
    }

    /// Load a top-level document by identity
    pub async fn find(self: &Arc<Self>, id: &RecordId) -> TetherResult<Document> {
        let raw = self
            .store
            .find(&self.collection, id)
            .await?
            .ok_or_else(|| TetherError::not_found(self.name.clone(), id))?;

        Document::from_raw(self, raw, None)
    }

    /// Set a field on every stored document, bypassing callbacks
    pub async fn update_all(&self, field: &str, value: Value) -> TetherResult<usize> {
        let count = self.store.update_all(&self.collection, field, value).await?;
        debug!(model = %self.name, field, count, "Documents updated");
        Ok(count)
    }

    pub async fn count(&self) -> TetherResult<usize> {
        self.store.count(&self.collection).await
    }
}

impl RecordType for ModelDef {
    type Record = Document;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::FULL
    }

    fn register(&self, event: Event, callback: Arc<dyn Callback<Document>>) {
        debug!(model = %self.name, event = %event, "Callback registered");
        self.callbacks.write().push((event, callback));
    }
}

/// Builder for `ModelDef`
pub struct ModelDefBuilder {
    name: String,
    collection: String,
    store: Arc<dyn DocumentStore>,
    fields: BTreeMap<String, FieldType>,
}

impl ModelDefBuilder {
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    pub fn build(self) -> Arc<ModelDef> {
        Arc::new(ModelDef {
            name: self.name,
            collection: self.collection,
            store: self.store,
            fields: RwLock::new(self.fields),
            relations: RwLock::new(BTreeMap::new()),
            callbacks: RwLock::new(Vec::new()),
        })
    }
}
