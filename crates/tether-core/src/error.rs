//! Core error types for Tether
//!
//! Every crate in the workspace converges on `TetherError` at its public
//! boundary so that attachment failures surface through the host's own
//! `save` call unchanged.

use std::collections::BTreeMap;
use thiserror::Error;

/// Core error type for all attachment and persistence operations
#[derive(Error, Debug)]
pub enum TetherError {
    /// The persisted attachment differs from the one the caller observed.
    #[error("Attachment has changed: {attribute}")]
    AttachmentChanged { attribute: String },

    #[error("Record not found: {model} with id={id}")]
    RecordNotFound { model: String, id: String },

    /// The record type lacks the capability the operation relies on.
    #[error("Not implemented: {operation} is not supported for {model}")]
    NotImplemented {
        operation: &'static str,
        model: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TetherError {
    pub fn not_found(model: impl Into<String>, id: impl ToString) -> Self {
        TetherError::RecordNotFound {
            model: model.into(),
            id: id.to_string(),
        }
    }

    pub fn not_implemented(operation: &'static str, model: impl Into<String>) -> Self {
        TetherError::NotImplemented {
            operation,
            model: model.into(),
        }
    }
}

/// Validation errors collection keyed by attribute name
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    /// Field-specific errors: field_name -> Vec<error_messages>
    pub errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    /// Check if there are errors for a specific field
    pub fn has_error(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    /// Get errors for a specific field
    pub fn get(&self, field: &str) -> Option<&Vec<String>> {
        self.errors.get(field)
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
    }

    pub fn full_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        for (field, field_messages) in &self.errors {
            for msg in field_messages {
                messages.push(format!("{} {}", field, msg));
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_collect_per_field() {
        let mut errors = ValidationErrors::new();
        assert!(errors.is_empty());

        errors.add("avatar", "is too large");
        errors.add("avatar", "has wrong type");
        errors.add("name", "must be present");

        assert!(errors.has_error("avatar"));
        assert_eq!(errors.get("avatar").map(Vec::len), Some(2));
        assert_eq!(
            errors.full_messages(),
            vec![
                "avatar is too large".to_string(),
                "avatar has wrong type".to_string(),
                "name must be present".to_string(),
            ]
        );
    }

    #[test]
    fn test_merge() {
        let mut a = ValidationErrors::new();
        a.add("avatar", "one");
        let mut b = ValidationErrors::new();
        b.add("avatar", "two");

        a.merge(b);
        assert_eq!(a.get("avatar").unwrap(), &vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_error_messages() {
        let changed = TetherError::AttachmentChanged {
            attribute: "avatar".into(),
        };
        assert_eq!(changed.to_string(), "Attachment has changed: avatar");

        let missing = TetherError::not_implemented("atomic_persist", "Plain");
        assert_eq!(
            missing.to_string(),
            "Not implemented: atomic_persist is not supported for Plain"
        );
    }
}
