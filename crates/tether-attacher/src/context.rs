//! Shared attachment context
//!
//! Everything an attacher needs besides the record: the uploader with its
//! storages, the column codec, and the assignment rules.

use std::fmt;
use std::sync::Arc;

use tether_core::config::TetherConfig;
use tether_storage::{ColumnSerializer, JsonSerializer, Uploader};

use crate::validation::ValidationRules;

#[derive(Clone)]
pub struct AttachmentContext {
    uploader: Arc<Uploader>,
    serializer: Arc<dyn ColumnSerializer>,
    rules: ValidationRules,
}

impl fmt::Debug for AttachmentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentContext")
            .field("cache", &self.uploader.cache_key())
            .field("store", &self.uploader.store_key())
            .field("rules", &self.rules)
            .finish()
    }
}

impl AttachmentContext {
    pub fn new(uploader: Uploader) -> Self {
        Self {
            uploader: Arc::new(uploader),
            serializer: Arc::new(JsonSerializer),
            rules: ValidationRules::default(),
        }
    }

    /// Context over the storages described by `config`
    pub fn from_config(config: &TetherConfig) -> Self {
        let rules = ValidationRules::default().max_size(config.storage.max_file_size);
        Self::new(Uploader::from_config(&config.storage)).with_rules(rules)
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn ColumnSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    pub fn serializer(&self) -> &dyn ColumnSerializer {
        self.serializer.as_ref()
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }
}
