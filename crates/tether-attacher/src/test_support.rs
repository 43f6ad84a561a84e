//! Shared fixtures for attacher tests

use std::sync::Arc;

use parking_lot::Mutex;
use tether_core::{
    callback_fn, Callback, Capabilities, Event, FieldType, Record, RecordType, TetherResult, Value,
};
use tether_document::{DocumentStore, MemoryDocumentStore, ModelDef, RelationKind};
use tether_storage::{ColumnSerializer, JsonSerializer, MemoryStorage, Upload, Uploader};

use crate::attacher::Attacher;
use crate::context::AttachmentContext;
use crate::validation::ValidationRules;

pub(crate) struct Fixture {
    pub user: Arc<ModelDef>,
    pub photo: Arc<ModelDef>,
    pub store: Arc<MemoryStorage>,
    pub context: AttachmentContext,
}

/// `User` (avatar in a text column) embedding `Photo` (image in a hash column)
/// once as `photo` and many times, with cascading callbacks, as `photos`
pub(crate) fn fixture() -> Fixture {
    init_tracing();

    let documents: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    let user = ModelDef::builder("User", Arc::clone(&documents))
        .field("name", FieldType::String)
        .field("avatar_data", FieldType::String)
        .build();
    let photo = ModelDef::builder("Photo", documents)
        .field("title", FieldType::String)
        .field("image_data", FieldType::Hash)
        .build();
    user.embeds("photo", &photo, RelationKind::One, false);
    user.embeds("photos", &photo, RelationKind::Many, true);

    let store = Arc::new(MemoryStorage::new());
    let uploader = Uploader::new(Arc::new(MemoryStorage::new()), store.clone());
    let context = AttachmentContext::new(uploader).with_rules(ValidationRules::none());

    Fixture {
        user,
        photo,
        store,
        context,
    }
}

/// Route logs to the test harness; `RUST_LOG` selects the level
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Fixture {
    pub fn attacher<R: Record>(&self, record: &R, name: &str) -> Attacher {
        Attacher::from_model(record, name, self.context.clone()).unwrap()
    }

    /// Users without a name fail validation
    pub fn require_name(&self) {
        self.user.register(
            Event::Validate,
            callback_fn(|user: &mut tether_document::Document| {
                if user.get("name").map(Value::is_null).unwrap_or(true) {
                    user.add_error("name", "can't be blank");
                }
                Ok(())
            }),
        );
    }

    /// Counter of user after-save callbacks
    pub fn count_after_save(&self) -> Arc<Mutex<usize>> {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        self.user.register(
            Event::AfterSave,
            callback_fn(move |_: &mut tether_document::Document| {
                *counter.lock() += 1;
                Ok(())
            }),
        );
        calls
    }
}

pub(crate) fn upload(content: &str) -> Upload {
    Upload::new(content.to_string()).filename("file.txt")
}

/// Serializer storing JSON behind a fixed prefix
pub(crate) struct PrefixSerializer;

impl ColumnSerializer for PrefixSerializer {
    fn dump(&self, data: &Value) -> TetherResult<String> {
        Ok(format!("tether:{}", JsonSerializer.dump(data)?))
    }

    fn load(&self, raw: &str) -> TetherResult<Value> {
        JsonSerializer.load(raw.strip_prefix("tether:").unwrap_or(raw))
    }
}

/// Record with attribute access only
#[derive(Debug, Clone, Default)]
pub(crate) struct Plain {
    pub image_data: Option<Value>,
}

impl Record for Plain {
    fn capabilities() -> Capabilities {
        Capabilities::NONE
    }

    fn model_name(&self) -> &str {
        "Plain"
    }

    fn read_attribute(&self, name: &str) -> Option<Value> {
        match name {
            "image_data" => self.image_data.clone(),
            _ => None,
        }
    }

    fn write_attribute(&mut self, name: &str, value: Value) {
        if name == "image_data" {
            self.image_data = Some(value);
        }
    }
}

/// Type descriptor for `Plain` recording every registration it receives
#[derive(Default)]
pub(crate) struct PlainType {
    pub registered: Mutex<Vec<Event>>,
}

impl RecordType for PlainType {
    type Record = Plain;

    fn name(&self) -> String {
        "Plain".to_string()
    }

    fn register(&self, event: Event, _callback: Arc<dyn Callback<Plain>>) {
        self.registered.lock().push(event);
    }
}
