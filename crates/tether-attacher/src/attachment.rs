//! Attachment installation
//!
//! An `Attachment` names one attachment attribute and wires its attacher into
//! a record type's lifecycle. Each record instance keeps its attacher in an
//! extension slot, created on first access and dropped again on reload.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::config::AttachmentOptions;
use tether_core::{Callback, Event, Record, RecordType, TetherError, TetherResult};
use tether_storage::{Upload, UploadedFile};
use tracing::{debug, info};

use crate::atomic::AtomicOptions;
use crate::attacher::Attacher;
use crate::context::AttachmentContext;

/// Option a registration depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requirement {
    Validations,
    Callbacks,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookKind {
    CopyErrors,
    WriteColumn,
    FinalizeAndPersist,
    DestroyAttached,
    DiscardAttacher,
}

const REGISTRATIONS: &[(Event, Requirement, HookKind)] = &[
    (Event::Validate, Requirement::Validations, HookKind::CopyErrors),
    (Event::BeforeSave, Requirement::Callbacks, HookKind::WriteColumn),
    (Event::AfterSave, Requirement::Callbacks, HookKind::FinalizeAndPersist),
    (Event::AfterDestroy, Requirement::Callbacks, HookKind::DestroyAttached),
    (Event::AfterReload, Requirement::Always, HookKind::DiscardAttacher),
];

impl Requirement {
    fn met(self, options: &AttachmentOptions) -> bool {
        match self {
            Self::Validations => options.validations,
            Self::Callbacks => options.callbacks,
            Self::Always => true,
        }
    }
}

/// A named attachment attribute
#[derive(Debug, Clone)]
pub struct Attachment {
    name: String,
    context: AttachmentContext,
}

impl Attachment {
    pub fn new(name: impl Into<String>, context: AttachmentContext) -> Self {
        Self {
            name: name.into(),
            context,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &AttachmentContext {
        &self.context
    }

    /// Register lifecycle hooks on `record_type`.
    ///
    /// Only events the type supports are registered. Returns the number of
    /// hooks installed; zero for types without lifecycle support.
    pub fn install<T: RecordType>(&self, record_type: &T, options: &AttachmentOptions) -> usize {
        let capabilities = record_type.capabilities();
        let mut installed = 0;

        for &(event, requirement, kind) in REGISTRATIONS {
            if !requirement.met(options) {
                debug!(attribute = %self.name, %event, "Hook disabled by options");
                continue;
            }
            if !capabilities.supports(event) {
                debug!(
                    attribute = %self.name,
                    model = %record_type.name(),
                    %event,
                    "Record type has no such lifecycle event"
                );
                continue;
            }

            let hook: Arc<dyn Callback<T::Record>> = Arc::new(AttachmentHook {
                kind,
                attachment: self.clone(),
            });
            record_type.register(event, hook);
            installed += 1;
        }

        info!(
            attribute = %self.name,
            model = %record_type.name(),
            hooks = installed,
            "Attachment installed"
        );
        installed
    }

    fn slot(&self) -> String {
        format!("tether.attacher.{}", self.name)
    }

    /// The record's attacher, loading it from the column on first access
    pub fn attacher<'r, R: Record>(&self, record: &'r mut R) -> TetherResult<&'r mut Attacher> {
        let slot = self.slot();
        let model = record.model_name().to_string();

        let loaded = match record.extensions() {
            Some(extensions) => extensions.contains(&slot),
            None => return Err(TetherError::not_implemented("attacher", model)),
        };
        if !loaded {
            let attacher = Attacher::from_model(record, self.name.clone(), self.context.clone())?;
            self.restore(record, attacher);
        }

        record
            .extensions_mut()
            .and_then(|extensions| extensions.get_mut::<Attacher>(&slot))
            .ok_or_else(|| TetherError::not_implemented("attacher", model))
    }

    /// Currently attached file
    pub fn file<R: Record>(&self, record: &mut R) -> TetherResult<Option<UploadedFile>> {
        Ok(self.attacher(record)?.file().cloned())
    }

    /// Cache `upload` and attach it, collecting validation errors
    pub async fn assign<R: Record>(&self, record: &mut R, upload: &Upload) -> TetherResult<UploadedFile> {
        let mut attacher = self.take_or_load(record)?;
        let result = attacher.assign(record, upload).await;
        self.restore(record, attacher);
        result
    }

    /// Promote a pending cached file and delete the one it replaced
    pub async fn finalize<R: Record>(&self, record: &mut R) -> TetherResult<()> {
        let mut attacher = self.take_or_load(record)?;
        let result = attacher.finalize(record).await;
        self.restore(record, attacher);
        result
    }

    pub async fn atomic_persist<R: Record>(
        &self,
        record: &mut R,
        options: AtomicOptions<R>,
    ) -> TetherResult<()> {
        let mut attacher = self.take_or_load(record)?;
        let result = attacher.atomic_persist(record, options).await;
        self.restore(record, attacher);
        result
    }

    pub async fn atomic_promote<R: Record>(
        &self,
        record: &mut R,
        options: AtomicOptions<R>,
    ) -> TetherResult<UploadedFile> {
        let mut attacher = self.take_or_load(record)?;
        let result = attacher.atomic_promote(record, options).await;
        self.restore(record, attacher);
        result
    }

    fn take<R: Record>(&self, record: &mut R) -> Option<Attacher> {
        record
            .extensions_mut()
            .and_then(|extensions| extensions.remove::<Attacher>(&self.slot()))
    }

    fn take_or_load<R: Record>(&self, record: &mut R) -> TetherResult<Attacher> {
        match self.take(record) {
            Some(attacher) => Ok(attacher),
            None => Attacher::from_model(record, self.name.clone(), self.context.clone()),
        }
    }

    fn restore<R: Record>(&self, record: &mut R, attacher: Attacher) {
        if let Some(extensions) = record.extensions_mut() {
            extensions.insert(self.slot(), attacher);
        }
    }
}

/// Lifecycle callback acting on one attachment
struct AttachmentHook {
    kind: HookKind,
    attachment: Attachment,
}

#[async_trait]
impl<R: Record> Callback<R> for AttachmentHook {
    async fn call(&self, record: &mut R) -> TetherResult<()> {
        let attachment = &self.attachment;

        match self.kind {
            HookKind::CopyErrors => {
                let errors = record
                    .extensions()
                    .and_then(|extensions| extensions.get::<Attacher>(&attachment.slot()))
                    .map(|attacher| attacher.errors().to_vec())
                    .unwrap_or_default();
                for message in &errors {
                    record.add_error(&attachment.name, message);
                }
                Ok(())
            }
            HookKind::WriteColumn => {
                let Some(mut attacher) = attachment.take(record) else {
                    return Ok(());
                };
                let result = if attacher.changed() {
                    attacher.save(record)
                } else {
                    Ok(())
                };
                attachment.restore(record, attacher);
                result
            }
            HookKind::FinalizeAndPersist => {
                // absent during the nested save issued by persist
                let Some(mut attacher) = attachment.take(record) else {
                    return Ok(());
                };
                let result = if attacher.changed() {
                    finalize_and_persist(&mut attacher, record).await
                } else {
                    Ok(())
                };
                attachment.restore(record, attacher);
                result
            }
            HookKind::DestroyAttached => {
                let attacher = attachment.take_or_load(record)?;
                attacher.destroy_attached().await;
                attachment.restore(record, attacher);
                Ok(())
            }
            HookKind::DiscardAttacher => {
                if attachment.take(record).is_some() {
                    debug!(attribute = %attachment.name, "Attacher discarded on reload");
                }
                Ok(())
            }
        }
    }
}

async fn finalize_and_persist<R: Record>(attacher: &mut Attacher, record: &mut R) -> TetherResult<()> {
    attacher.finalize(record).await?;
    attacher.persist(record).await
}
