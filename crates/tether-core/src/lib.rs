//! # tether-core
//!
//! Core types, traits, and utilities for Tether.
//!
//! This crate provides the building blocks shared by the other crates:
//! - Common error types and the result alias
//! - The `Record` capability trait implemented by host persistence frameworks
//! - Lifecycle events and callbacks (`Event`, `Callback`, `RecordType`)
//! - Identity, field typing, and the per-record extension slots
//! - Configuration types

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::*;
pub use result::*;
pub use traits::*;
pub use types::*;
