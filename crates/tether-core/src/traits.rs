//! Record capability traits
//!
//! A host persistence framework plugs into Tether by implementing `Record`
//! for its record type and `RecordType` for the type descriptor that carries
//! callback registrations. Everything beyond attribute access is optional:
//! the default method bodies report `NotImplemented`, and `Capabilities`
//! tells callers up front which parts a type actually supports.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TetherError;
use crate::result::TetherResult;
use crate::types::{Extensions, FieldType, RecordId, Value};

/// Record lifecycle points a callback can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {
    Validate,
    BeforeSave,
    AfterSave,
    AfterDestroy,
    AfterReload,
}

impl Event {
    pub const ALL: [Event; 5] = [
        Event::Validate,
        Event::BeforeSave,
        Event::AfterSave,
        Event::AfterDestroy,
        Event::AfterReload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::BeforeSave => "before_save",
            Self::AfterSave => "after_save",
            Self::AfterDestroy => "after_destroy",
            Self::AfterReload => "after_reload",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional operations a record type supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub validate_hooks: bool,
    pub save_hooks: bool,
    pub destroy_hooks: bool,
    pub reload_hooks: bool,
    /// Single-document reload by identity and validation-skipping save
    pub atomic: bool,
}

impl Capabilities {
    /// Plain records: attribute access only
    pub const NONE: Capabilities = Capabilities {
        validate_hooks: false,
        save_hooks: false,
        destroy_hooks: false,
        reload_hooks: false,
        atomic: false,
    };

    pub const FULL: Capabilities = Capabilities {
        validate_hooks: true,
        save_hooks: true,
        destroy_hooks: true,
        reload_hooks: true,
        atomic: true,
    };

    /// Whether callbacks for `event` can be registered
    pub fn supports(&self, event: Event) -> bool {
        match event {
            Event::Validate => self.validate_hooks,
            Event::BeforeSave | Event::AfterSave => self.save_hooks,
            Event::AfterDestroy => self.destroy_hooks,
            Event::AfterReload => self.reload_hooks,
        }
    }
}

/// A host record that can carry attachments
#[async_trait]
pub trait Record: Clone + Send + Sync + 'static {
    /// Capabilities shared by every record of this type
    fn capabilities() -> Capabilities;

    /// Type name, used to match embedded records after a reload
    fn model_name(&self) -> &str;

    fn identity(&self) -> Option<&RecordId> {
        None
    }

    /// Whether the record has been written to (or loaded from) the database
    fn is_persisted(&self) -> bool {
        false
    }

    fn is_embedded(&self) -> bool {
        false
    }

    /// Parent of an embedded record
    fn parent(&self) -> Option<&Self> {
        None
    }

    /// Directly embedded children across all relations
    fn children(&self) -> Vec<&Self> {
        Vec::new()
    }

    fn read_attribute(&self, name: &str) -> Option<Value>;

    fn write_attribute(&mut self, name: &str, value: Value);

    fn field_type(&self, _name: &str) -> Option<FieldType> {
        None
    }

    fn add_error(&mut self, _attribute: &str, _message: &str) {}

    fn extensions(&self) -> Option<&Extensions> {
        None
    }

    fn extensions_mut(&mut self) -> Option<&mut Extensions> {
        None
    }

    /// Copy carrying the same identity, detached from this instance
    fn duplicate_with_identity(&self) -> TetherResult<Self> {
        Err(TetherError::not_implemented(
            "duplicate_with_identity",
            self.model_name(),
        ))
    }

    /// Re-read this record from the database by identity
    async fn reload(&mut self) -> TetherResult<()> {
        Err(TetherError::not_implemented("reload", self.model_name()))
    }

    /// Write the record, optionally running validations first.
    ///
    /// Returns `false` when validation fails and nothing was written.
    async fn save(&mut self, _validate: bool) -> TetherResult<bool> {
        Err(TetherError::not_implemented("save", self.model_name()))
    }
}

/// Lifecycle callback registered on a record type
#[async_trait]
pub trait Callback<R: Send>: Send + Sync {
    async fn call(&self, record: &mut R) -> TetherResult<()>;
}

/// Adapter running a synchronous closure as a `Callback`
pub struct FnCallback<F>(F);

#[async_trait]
impl<R, F> Callback<R> for FnCallback<F>
where
    R: Send + 'static,
    F: Fn(&mut R) -> TetherResult<()> + Send + Sync,
{
    async fn call(&self, record: &mut R) -> TetherResult<()> {
        (self.0)(record)
    }
}

/// Wrap a synchronous closure as a shareable callback
pub fn callback_fn<R, F>(f: F) -> Arc<dyn Callback<R>>
where
    R: Send + 'static,
    F: Fn(&mut R) -> TetherResult<()> + Send + Sync + 'static,
{
    Arc::new(FnCallback(f))
}

/// Descriptor of a record type that accepts callback registrations
pub trait RecordType: Send + Sync {
    type Record: Record;

    fn name(&self) -> String;

    fn capabilities(&self) -> Capabilities {
        <Self::Record as Record>::capabilities()
    }

    /// Register a callback; only called for events in `capabilities()`
    fn register(&self, event: Event, callback: Arc<dyn Callback<Self::Record>>);
}
