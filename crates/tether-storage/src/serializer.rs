//! Column serializers
//!
//! A serializer turns a descriptor's mapping form into the string stored in
//! a text column and back. Hash-typed columns bypass it entirely.

use tether_core::{TetherResult, Value};

/// Codec between descriptor data and a text column
pub trait ColumnSerializer: Send + Sync {
    fn dump(&self, data: &Value) -> TetherResult<String>;

    fn load(&self, raw: &str) -> TetherResult<Value>;
}

/// Default serializer storing descriptors as JSON text
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl ColumnSerializer for JsonSerializer {
    fn dump(&self, data: &Value) -> TetherResult<String> {
        Ok(serde_json::to_string(data)?)
    }

    fn load(&self, raw: &str) -> TetherResult<Value> {
        Ok(serde_json::from_str(raw)?)
    }
}
