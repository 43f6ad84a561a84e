//! Documents
//!
//! A `Document` is one instance of a `ModelDef`. Top-level documents are
//! stored by identity; embedded documents are written by rewriting the
//! relation inside their root, located through the chain of parents.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Map;
use tether_core::{
    Capabilities, Event, Extensions, FieldType, Record, RecordId, TetherError, TetherResult,
    ValidationErrors, Value,
};
use tracing::{debug, instrument};

use crate::model::{ModelDef, RelationKind};
use crate::raw::{self, Segment, ID_KEY};

/// Link from an embedded document to the document holding it
#[derive(Clone)]
pub(crate) struct Embedding {
    /// Parent without its own children
    parent: Box<Document>,
    relation: String,
}

/// A document instance
pub struct Document {
    model: Arc<ModelDef>,
    id: RecordId,
    attributes: BTreeMap<String, Value>,
    embedded: BTreeMap<String, Vec<Document>>,
    embedding: Option<Embedding>,
    new_record: bool,
    destroyed: bool,
    /// Attributes and relations assigned since the last write
    changed: BTreeSet<String>,
    errors: ValidationErrors,
    extensions: Extensions,
}

impl Clone for Document {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            id: self.id.clone(),
            attributes: self.attributes.clone(),
            embedded: self.embedded.clone(),
            embedding: self.embedding.clone(),
            new_record: self.new_record,
            destroyed: self.destroyed,
            changed: self.changed.clone(),
            errors: self.errors.clone(),
            extensions: Extensions::new(),
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("model", &self.model.name())
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("embedded", &self.embedded)
            .field("new_record", &self.new_record)
            .finish()
    }
}

impl Document {
    pub(crate) fn new(model: &Arc<ModelDef>) -> Self {
        Self {
            model: Arc::clone(model),
            id: RecordId::generate(),
            attributes: BTreeMap::new(),
            embedded: BTreeMap::new(),
            embedding: None,
            new_record: true,
            destroyed: false,
            changed: BTreeSet::new(),
            errors: ValidationErrors::new(),
            extensions: Extensions::new(),
        }
    }

    /// Build a persisted document from its stored form
    pub(crate) fn from_raw(
        model: &Arc<ModelDef>,
        raw: Value,
        embedding: Option<Embedding>,
    ) -> TetherResult<Self> {
        let Value::Object(map) = raw else {
            return Err(TetherError::Persistence(format!(
                "malformed {} document",
                model.name()
            )));
        };

        let relations = model.relations();
        let mut document = Document::new(model);
        document.new_record = false;
        document.embedding = embedding;

        let mut nested = Vec::new();
        for (key, value) in map {
            if key == ID_KEY {
                let id = value.as_str().ok_or_else(|| {
                    TetherError::Persistence(format!("{} document without _id", model.name()))
                })?;
                document.id = RecordId::new(id);
            } else if let Some(relation) = relations.get(&key) {
                nested.push((key, Arc::clone(&relation.model), value));
            } else {
                document.attributes.insert(key, value);
            }
        }

        for (relation, child_model, value) in nested {
            let items = match value {
                Value::Null => Vec::new(),
                Value::Array(items) => items,
                item => vec![item],
            };

            let mut children = Vec::with_capacity(items.len());
            for item in items {
                let embedding = Embedding {
                    parent: Box::new(document.snapshot()),
                    relation: relation.clone(),
                };
                children.push(Document::from_raw(&child_model, item, Some(embedding))?);
            }
            document.embedded.insert(relation, children);
        }

        Ok(document)
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn model(&self) -> &Arc<ModelDef> {
        &self.model
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        if self.attributes.get(name) != Some(&value) {
            self.changed.insert(name.to_string());
        }
        self.attributes.insert(name.to_string(), value);
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub fn is_new_record(&self) -> bool {
        self.new_record
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Whether anything in this document or its children awaits writing
    pub fn has_changes(&self) -> bool {
        self.new_record
            || !self.changed.is_empty()
            || self.embedded.values().flatten().any(Document::has_changes)
    }

    pub fn embedded(&self, relation: &str) -> &[Document] {
        self.embedded.get(relation).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn embedded_mut(&mut self, relation: &str) -> &mut [Document] {
        match self.embedded.get_mut(relation) {
            Some(children) => children.as_mut_slice(),
            None => &mut [],
        }
    }

    /// Set the document of a one-relation, replacing any previous one
    pub fn embed_one(&mut self, relation: &str, child: Document) -> TetherResult<&mut Document> {
        self.embed(relation, RelationKind::One, child)
    }

    /// Append a document to a many-relation
    pub fn embed_many(&mut self, relation: &str, child: Document) -> TetherResult<&mut Document> {
        self.embed(relation, RelationKind::Many, child)
    }

    fn embed(
        &mut self,
        relation: &str,
        kind: RelationKind,
        mut child: Document,
    ) -> TetherResult<&mut Document> {
        let definition = self.model.relation(relation).ok_or_else(|| {
            TetherError::Persistence(format!(
                "{} has no embedded relation {}",
                self.model.name(),
                relation
            ))
        })?;
        if definition.kind != kind {
            return Err(TetherError::Persistence(format!(
                "{}.{} is a {:?} relation",
                self.model.name(),
                relation,
                definition.kind
            )));
        }

        child.embedding = Some(Embedding {
            parent: Box::new(self.snapshot()),
            relation: relation.to_string(),
        });
        self.changed.insert(relation.to_string());

        let children = self.embedded.entry(relation.to_string()).or_default();
        if kind == RelationKind::One {
            children.clear();
        }
        children.push(child);
        let last = children.len() - 1;
        Ok(&mut children[last])
    }

    /// Copy under a fresh identity, as a new record
    pub fn duplicate(&self) -> Document {
        self.duplicate_under(RecordId::generate(), self.embedding.clone())
    }

    fn duplicate_under(&self, id: RecordId, embedding: Option<Embedding>) -> Document {
        let mut copy = Document {
            model: Arc::clone(&self.model),
            id,
            attributes: self.attributes.clone(),
            embedded: BTreeMap::new(),
            embedding,
            new_record: true,
            destroyed: false,
            changed: self.attributes.keys().cloned().collect(),
            errors: ValidationErrors::new(),
            extensions: Extensions::new(),
        };

        let parent = copy.snapshot();
        for (relation, children) in &self.embedded {
            let copies = children
                .iter()
                .map(|child| {
                    child.duplicate_under(
                        RecordId::generate(),
                        Some(Embedding {
                            parent: Box::new(parent.clone()),
                            relation: relation.clone(),
                        }),
                    )
                })
                .collect();
            copy.changed.insert(relation.clone());
            copy.embedded.insert(relation.clone(), copies);
        }
        copy
    }

    /// Stored form, including embedded documents
    pub fn to_raw(&self) -> Value {
        let mut map = Map::new();
        map.insert(ID_KEY.to_string(), Value::String(self.id.to_string()));
        for (name, value) in &self.attributes {
            map.insert(name.clone(), value.clone());
        }
        for relation in self.embedded.keys() {
            map.insert(relation.clone(), self.relation_raw(relation));
        }
        Value::Object(map)
    }

    fn relation_raw(&self, relation: &str) -> Value {
        let children = self.embedded(relation);
        match self.model.relation(relation).map(|r| r.kind) {
            Some(RelationKind::One) => children
                .first()
                .map(Document::to_raw)
                .unwrap_or(Value::Null),
            _ => Value::Array(children.iter().map(Document::to_raw).collect()),
        }
    }

    fn snapshot(&self) -> Document {
        Document {
            model: Arc::clone(&self.model),
            id: self.id.clone(),
            attributes: self.attributes.clone(),
            embedded: BTreeMap::new(),
            embedding: self.embedding.clone(),
            new_record: self.new_record,
            destroyed: self.destroyed,
            changed: BTreeSet::new(),
            errors: ValidationErrors::new(),
            extensions: Extensions::new(),
        }
    }

    /// Root of the embedding chain and the path from it down to `self`
    fn path(&self) -> (&Document, Vec<Segment>) {
        let mut segments = Vec::new();
        let mut current = self;
        while let Some(embedding) = &current.embedding {
            segments.push((embedding.relation.clone(), current.id.clone()));
            current = embedding.parent.as_ref();
        }
        segments.reverse();
        (current, segments)
    }

    fn not_found(&self) -> TetherError {
        TetherError::not_found(self.model.name(), &self.id)
    }

    async fn load_root(&self) -> TetherResult<(&Document, Vec<Segment>, Value)> {
        let (root, path) = self.path();
        let raw = root
            .model
            .store()
            .find(root.model.collection(), &root.id)
            .await?
            .ok_or_else(|| root.not_found())?;
        Ok((root, path, raw))
    }

    async fn fetch_raw(&self) -> TetherResult<Value> {
        if self.embedding.is_none() {
            return self
                .model
                .store()
                .find(self.model.collection(), &self.id)
                .await?
                .ok_or_else(|| self.not_found());
        }

        let (_, path, raw) = self.load_root().await?;
        raw::locate(&raw, &path)
            .cloned()
            .ok_or_else(|| self.not_found())
    }

    /// Write the first relation on the path back into the root
    async fn store_root_relation(
        &self,
        root: &Document,
        path: &[Segment],
        raw: &Value,
    ) -> TetherResult<()> {
        let Some((top, _)) = path.first() else {
            return Ok(());
        };

        let mut fields = Map::new();
        fields.insert(top.clone(), raw.get(top.as_str()).cloned().unwrap_or(Value::Null));
        let matched = root
            .model
            .store()
            .set_fields(root.model.collection(), &root.id, fields)
            .await?;

        if matched {
            Ok(())
        } else {
            Err(root.not_found())
        }
    }

    fn dirty_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        for name in &self.changed {
            if !self.embedded.contains_key(name) {
                let value = self.attributes.get(name).cloned().unwrap_or(Value::Null);
                fields.insert(name.clone(), value);
            }
        }
        for (relation, children) in &self.embedded {
            if self.changed.contains(relation) || children.iter().any(Document::has_changes) {
                fields.insert(relation.clone(), self.relation_raw(relation));
            }
        }
        fields
    }

    fn mark_persisted(&mut self) {
        self.new_record = false;
        self.changed.clear();
        for child in self.embedded.values_mut().flatten() {
            child.mark_persisted();
        }
    }

    async fn write(&mut self) -> TetherResult<()> {
        let store = Arc::clone(self.model.store());
        let collection = self.model.collection();

        if let Some(embedding) = &self.embedding {
            let many = embedding
                .parent
                .model
                .relation(&embedding.relation)
                .map(|r| r.kind == RelationKind::Many)
                .unwrap_or(true);

            let (root, path, mut raw) = self.load_root().await?;
            let Some(((relation, _), parent_path)) = path.split_last() else {
                return Err(self.not_found());
            };
            let container = raw::locate_mut(&mut raw, parent_path)
                .ok_or_else(|| embedding.parent.not_found())?;
            if !raw::upsert(container, relation, many, self.to_raw()) {
                return Err(embedding.parent.not_found());
            }

            self.store_root_relation(root, &path, &raw).await?;
        } else if self.new_record {
            store.insert(collection, &self.id, self.to_raw()).await?;
        } else {
            let fields = self.dirty_fields();
            if !fields.is_empty() && !store.set_fields(collection, &self.id, fields).await? {
                return Err(self.not_found());
            }
        }

        self.mark_persisted();
        Ok(())
    }

    /// Run callbacks for `event`, then on children of cascading relations
    fn run_callbacks(&mut self, event: Event) -> BoxFuture<'_, TetherResult<()>> {
        async move {
            for callback in self.model.callbacks(event) {
                callback.call(self).await?;
            }

            if matches!(
                event,
                Event::BeforeSave | Event::AfterSave | Event::AfterDestroy
            ) {
                for relation in self.model.cascading_relations() {
                    if let Some(children) = self.embedded.get_mut(&relation) {
                        for child in children.iter_mut() {
                            child.run_callbacks(event).await?;
                        }
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Run validation callbacks. Returns whether the document is valid.
    pub async fn validate(&mut self) -> TetherResult<bool> {
        self.errors.clear();
        for callback in self.model.callbacks(Event::Validate) {
            callback.call(self).await?;
        }
        Ok(self.errors.is_empty())
    }

    /// Validate (unless skipped), run save callbacks, and write.
    ///
    /// Returns `false` without writing when validation fails.
    #[instrument(skip(self), fields(model = %self.model.name(), id = %self.id))]
    pub async fn save(&mut self, validate: bool) -> TetherResult<bool> {
        if self.destroyed {
            return Err(TetherError::Persistence(format!(
                "cannot save destroyed {}",
                self.model.name()
            )));
        }

        if validate && !self.validate().await? {
            debug!(errors = ?self.errors.full_messages(), "Validation failed");
            return Ok(false);
        }

        self.run_callbacks(Event::BeforeSave).await?;
        self.write().await?;
        debug!("Document saved");
        self.run_callbacks(Event::AfterSave).await?;
        Ok(true)
    }

    /// Replace in-memory state with what is stored
    #[instrument(skip(self), fields(model = %self.model.name(), id = %self.id))]
    pub async fn reload(&mut self) -> TetherResult<()> {
        let raw = self.fetch_raw().await?;
        let fresh = Document::from_raw(&self.model, raw, self.embedding.clone())?;

        self.attributes = fresh.attributes;
        self.embedded = fresh.embedded;
        self.new_record = false;
        self.destroyed = false;
        self.changed.clear();
        self.errors.clear();

        for callback in self.model.callbacks(Event::AfterReload) {
            callback.call(self).await?;
        }
        Ok(())
    }

    /// Remove the document from the store and run destroy callbacks
    #[instrument(skip(self), fields(model = %self.model.name(), id = %self.id))]
    pub async fn destroy(&mut self) -> TetherResult<()> {
        if let Some(embedding) = &self.embedding {
            let (root, path, mut raw) = self.load_root().await?;
            if let Some(((relation, _), parent_path)) = path.split_last() {
                if let Some(container) = raw::locate_mut(&mut raw, parent_path) {
                    raw::remove(container, relation, &self.id);
                }
            }
            self.store_root_relation(root, &path, &raw).await?;
            debug!(relation = %embedding.relation, "Embedded document removed");
        } else {
            self.model
                .store()
                .delete(self.model.collection(), &self.id)
                .await?;
        }

        self.destroyed = true;
        self.run_callbacks(Event::AfterDestroy).await
    }
}

#[async_trait]
impl Record for Document {
    fn capabilities() -> Capabilities {
        Capabilities::FULL
    }

    fn model_name(&self) -> &str {
        self.model.name()
    }

    fn identity(&self) -> Option<&RecordId> {
        Some(&self.id)
    }

    fn is_persisted(&self) -> bool {
        !self.new_record && !self.destroyed
    }

    fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }

    fn parent(&self) -> Option<&Self> {
        self.embedding.as_ref().map(|embedding| embedding.parent.as_ref())
    }

    fn children(&self) -> Vec<&Self> {
        self.embedded.values().flatten().collect()
    }

    fn read_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).cloned()
    }

    fn write_attribute(&mut self, name: &str, value: Value) {
        self.set(name, value);
    }

    fn field_type(&self, name: &str) -> Option<FieldType> {
        self.model.field_type(name)
    }

    fn add_error(&mut self, attribute: &str, message: &str) {
        self.errors.add(attribute, message);
    }

    fn extensions(&self) -> Option<&Extensions> {
        Some(&self.extensions)
    }

    fn extensions_mut(&mut self) -> Option<&mut Extensions> {
        Some(&mut self.extensions)
    }

    fn duplicate_with_identity(&self) -> TetherResult<Self> {
        Ok(self.duplicate_under(self.id.clone(), self.embedding.clone()))
    }

    async fn reload(&mut self) -> TetherResult<()> {
        Document::reload(self).await
    }

    async fn save(&mut self, validate: bool) -> TetherResult<bool> {
        Document::save(self, validate).await
    }
}
