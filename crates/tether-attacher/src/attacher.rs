//! Attacher
//!
//! The in-memory controller for one (record, attribute) pair. It tracks the
//! current file descriptor and, while a change is pending, the descriptor it
//! superseded. The record is passed into every operation that reads or
//! writes the `<name>_data` column.

use std::fmt;

use tether_core::{Record, TetherError, TetherResult, Value};
use tether_storage::{Upload, UploadedFile};
use tracing::{debug, info, instrument, warn};

use crate::context::AttachmentContext;

pub struct Attacher {
    name: String,
    file: Option<UploadedFile>,
    /// Descriptor replaced by a pending change; `Some` means changed
    previous: Option<Option<UploadedFile>>,
    errors: Vec<String>,
    context: AttachmentContext,
}

impl fmt::Debug for Attacher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attacher")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("previous", &self.previous)
            .field("errors", &self.errors)
            .finish()
    }
}

impl Attacher {
    pub fn new(name: impl Into<String>, context: AttachmentContext) -> Self {
        Self {
            name: name.into(),
            file: None,
            previous: None,
            errors: Vec::new(),
            context,
        }
    }

    /// Attacher bound to `name`, loaded from the record's column
    pub fn from_model<R: Record>(
        record: &R,
        name: impl Into<String>,
        context: AttachmentContext,
    ) -> TetherResult<Self> {
        let mut attacher = Self::new(name, context);
        attacher.file = attacher.read(record)?;
        Ok(attacher)
    }

    /// Rebind to another attribute of `record` and load its column
    pub fn load_model<R: Record>(&mut self, record: &R, name: impl Into<String>) -> TetherResult<()> {
        self.name = name.into();
        self.file = self.read(record)?;
        self.previous = None;
        self.errors.clear();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &AttachmentContext {
        &self.context
    }

    /// Name of the column holding the descriptor
    pub fn column(&self) -> String {
        format!("{}_data", self.name)
    }

    pub fn file(&self) -> Option<&UploadedFile> {
        self.file.as_ref()
    }

    pub fn changed(&self) -> bool {
        self.previous.is_some()
    }

    pub fn attached(&self) -> bool {
        self.file.is_some()
    }

    pub fn cached(&self) -> bool {
        self.in_storage(self.context.uploader().cache_key())
    }

    pub fn stored(&self) -> bool {
        self.in_storage(self.context.uploader().store_key())
    }

    fn in_storage(&self, key: &str) -> bool {
        self.file
            .as_ref()
            .map(|file| file.storage_key() == key)
            .unwrap_or(false)
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn url(&self) -> TetherResult<Option<String>> {
        self.file
            .as_ref()
            .map(|file| self.context.uploader().url(file))
            .transpose()
    }

    /// Decode the descriptor stored in the record's column
    pub fn read<R: Record>(&self, record: &R) -> TetherResult<Option<UploadedFile>> {
        match record.read_attribute(&self.column()) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => {
                let data = self.context.serializer().load(&raw)?;
                Ok(Some(UploadedFile::from_data(data)?))
            }
            Some(data) => Ok(Some(UploadedFile::from_data(data)?)),
        }
    }

    /// Encode the current descriptor into the record's column
    pub fn write<R: Record>(&self, record: &mut R) -> TetherResult<()> {
        let column = self.column();
        let value = match &self.file {
            None => Value::Null,
            Some(file) if self.is_hash_column(record, &column) => file.data(),
            Some(file) => Value::String(self.context.serializer().dump(&file.data())?),
        };
        record.write_attribute(&column, value);
        Ok(())
    }

    fn is_hash_column<R: Record>(&self, record: &R, column: &str) -> bool {
        record
            .field_type(column)
            .map(|field_type| field_type.is_hash())
            .unwrap_or(false)
    }

    /// Upload to one of the uploader's storages without attaching
    pub async fn upload(
        &self,
        upload: &Upload,
        storage_key: &str,
        location: Option<&str>,
    ) -> TetherResult<UploadedFile> {
        self.context.uploader().upload(upload, storage_key, location).await
    }

    /// Upload to temporary storage and attach the result
    pub async fn attach_cached<R: Record>(
        &mut self,
        record: &mut R,
        upload: &Upload,
    ) -> TetherResult<UploadedFile> {
        let cache = self.context.uploader().cache_key().to_string();
        let file = self.upload(upload, &cache, None).await?;
        self.change(record, Some(file.clone()))?;
        Ok(file)
    }

    /// Upload to permanent storage and attach the result
    pub async fn attach<R: Record>(
        &mut self,
        record: &mut R,
        upload: &Upload,
    ) -> TetherResult<UploadedFile> {
        let store = self.context.uploader().store_key().to_string();
        let file = self.upload(upload, &store, None).await?;
        self.change(record, Some(file.clone()))?;
        Ok(file)
    }

    /// Cache an upload and validate it, as a record-level assignment does
    pub async fn assign<R: Record>(
        &mut self,
        record: &mut R,
        upload: &Upload,
    ) -> TetherResult<UploadedFile> {
        let file = self.attach_cached(record, upload).await?;
        self.validate();
        Ok(file)
    }

    /// Replace the current file, remembering the replaced one
    pub fn change<R: Record>(&mut self, record: &mut R, file: Option<UploadedFile>) -> TetherResult<()> {
        if self.file != file && self.previous.is_none() {
            self.previous = Some(self.file.clone());
        }
        self.set(record, file)
    }

    /// Replace the current file without tracking a change
    pub fn set<R: Record>(&mut self, record: &mut R, file: Option<UploadedFile>) -> TetherResult<()> {
        self.file = file;
        self.write(record)
    }

    /// Run validation rules against the current file
    pub fn validate(&mut self) -> bool {
        self.errors = match &self.file {
            Some(file) => self.context.rules().check(file),
            None => Vec::new(),
        };
        if !self.errors.is_empty() {
            debug!(attribute = %self.name, errors = ?self.errors, "Attachment invalid");
        }
        self.errors.is_empty()
    }

    /// Write the pending descriptor into the column ahead of a record save
    pub fn save<R: Record>(&mut self, record: &mut R) -> TetherResult<()> {
        self.write(record)
    }

    /// Copy the cached file to permanent storage and attach the copy
    #[instrument(skip(self, record), fields(attribute = %self.name))]
    pub async fn promote<R: Record>(
        &mut self,
        record: &mut R,
        location: Option<&str>,
    ) -> TetherResult<UploadedFile> {
        let file = self.file.clone().ok_or_else(|| {
            TetherError::Storage(format!("no file attached to {}", self.name))
        })?;

        let store = self.context.uploader().store_key().to_string();
        let promoted = self.context.uploader().copy(&file, &store, location).await?;
        self.set(record, Some(promoted.clone()))?;

        info!(from = %file.id, to = %promoted.id, "Attachment promoted");
        Ok(promoted)
    }

    /// Promote a pending cached file and delete the superseded one
    #[instrument(skip(self, record), fields(attribute = %self.name))]
    pub async fn finalize<R: Record>(&mut self, record: &mut R) -> TetherResult<()> {
        if !self.changed() {
            return Ok(());
        }

        if self.cached() {
            self.promote(record, None).await?;
        }

        // the change stays pending until the promotion succeeded
        if let Some(Some(previous)) = self.previous.take() {
            if previous.storage_key() != self.context.uploader().cache_key() {
                self.delete_quietly(&previous).await;
            }
        }
        Ok(())
    }

    /// Delete the attached file unless it is still in temporary storage
    pub async fn destroy_attached(&self) {
        if self.attached() && !self.cached() {
            self.destroy().await;
        }
    }

    /// Delete the attached file
    pub async fn destroy(&self) {
        if let Some(file) = &self.file {
            self.delete_quietly(file).await;
        }
    }

    /// Delete a file, logging instead of propagating failures
    pub(crate) async fn delete_quietly(&self, file: &UploadedFile) {
        if let Err(e) = self.context.uploader().delete(file).await {
            warn!(attribute = %self.name, id = %file.id, error = %e, "Failed to delete file");
        }
    }

    /// Write the column and save the record without validation
    #[instrument(skip(self, record), fields(attribute = %self.name))]
    pub async fn persist<R: Record>(&self, record: &mut R) -> TetherResult<()> {
        if !R::capabilities().atomic {
            return Err(TetherError::not_implemented("persist", record.model_name()));
        }

        self.write(record)?;
        record.save(false).await?;
        debug!("Attachment persisted");
        Ok(())
    }

    /// Reload the file from the column, dropping pending state
    pub fn reload<R: Record>(&mut self, record: &R) -> TetherResult<()> {
        self.file = self.read(record)?;
        self.previous = None;
        self.errors.clear();
        Ok(())
    }

    /// Reset to the given persisted file after a concurrent change
    pub(crate) fn reset(&mut self, file: Option<UploadedFile>) {
        self.file = file;
        self.previous = None;
    }
}
