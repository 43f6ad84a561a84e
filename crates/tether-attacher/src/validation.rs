//! Assignment validation
//!
//! Rules are checked against the descriptor produced by caching an upload.
//! Failures are collected as messages on the attacher; they never raise.

use std::fmt;
use std::sync::Arc;

use tether_storage::UploadedFile;

/// Custom check returning zero or more error messages
pub type Validator = Arc<dyn Fn(&UploadedFile) -> Vec<String> + Send + Sync>;

/// Validation rules applied when a file is assigned
#[derive(Clone)]
pub struct ValidationRules {
    /// Maximum file size in bytes
    pub max_size: Option<u64>,
    /// Allowed MIME types (empty = allow all)
    pub allowed_mime_types: Vec<String>,
    /// Blocked MIME types
    pub blocked_mime_types: Vec<String>,
    validators: Vec<Validator>,
}

impl fmt::Debug for ValidationRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRules")
            .field("max_size", &self.max_size)
            .field("allowed_mime_types", &self.allowed_mime_types)
            .field("blocked_mime_types", &self.blocked_mime_types)
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            max_size: None,
            allowed_mime_types: Vec::new(),
            blocked_mime_types: vec![
                "application/x-msdownload".to_string(),
                "application/x-executable".to_string(),
            ],
            validators: Vec::new(),
        }
    }
}

impl ValidationRules {
    /// Rules that accept everything
    pub fn none() -> Self {
        Self {
            blocked_mime_types: Vec::new(),
            ..Self::default()
        }
    }

    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn allow(mut self, mime_type: impl Into<String>) -> Self {
        self.allowed_mime_types.push(mime_type.into());
        self
    }

    pub fn block(mut self, mime_type: impl Into<String>) -> Self {
        self.blocked_mime_types.push(mime_type.into());
        self
    }

    /// Add a custom validator
    pub fn validate_with<F>(mut self, validator: F) -> Self
    where
        F: Fn(&UploadedFile) -> Vec<String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Check if a content type is allowed
    pub fn is_allowed(&self, content_type: &str) -> bool {
        if self.blocked_mime_types.iter().any(|t| t == content_type) {
            return false;
        }

        if self.allowed_mime_types.is_empty() {
            return true;
        }

        self.allowed_mime_types.iter().any(|t| t == content_type)
    }

    /// Error messages for `file`; empty when it passes
    pub fn check(&self, file: &UploadedFile) -> Vec<String> {
        let mut errors = Vec::new();

        if let (Some(max), Some(size)) = (self.max_size, file.size()) {
            if size > max {
                errors.push(format!("size must not be greater than {} bytes", max));
            }
        }

        if let Some(mime_type) = file.mime_type() {
            if !self.is_allowed(mime_type) {
                errors.push(format!("type {} is not allowed", mime_type));
            }
        }

        for validator in &self.validators {
            errors.extend(validator(file));
        }

        errors
    }
}
