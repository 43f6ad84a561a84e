//! # tether-document
//!
//! A small document mapper used as the host persistence framework for
//! attachments.
//!
//! - `DocumentStore` holds top-level documents keyed by collection and id
//! - `ModelDef` declares fields, embedded relations, and lifecycle callbacks
//! - `Document` implements `tether_core::Record` with dirty tracking,
//!   reload by identity, and writes of embedded documents through their root

pub mod document;
pub mod model;
mod raw;
pub mod store;

pub use document::Document;
pub use model::{ModelDef, ModelDefBuilder, Relation, RelationKind};
pub use store::{DocumentStore, MemoryDocumentStore};
