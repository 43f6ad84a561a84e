//! # tether-attacher
//!
//! Attachment attributes for Tether records.
//!
//! ## Features
//!
//! - `Attacher` tracks one attribute's file and writes it to `<name>_data`
//! - `Attachment::install` hooks validation, save, destroy, and reload
//! - `atomic_promote` / `atomic_persist` write only if the stored
//!   attachment is still the one the caller saw
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_attacher::{Attachment, AttachmentContext, AttachmentOptions, AtomicOptions};
//! use tether_storage::{Upload, Uploader};
//!
//! let avatar = Attachment::new("avatar", AttachmentContext::new(Uploader::memory()));
//! avatar.install(user_model.as_ref(), &AttachmentOptions::default());
//!
//! let mut user = user_model.new_document();
//! avatar.assign(&mut user, &Upload::new(bytes).filename("me.png")).await?;
//! user.save(true).await?;
//!
//! // in a background job
//! avatar.atomic_promote(&mut user, AtomicOptions::new()).await?;
//! ```

pub mod atomic;
pub mod attacher;
pub mod attachment;
pub mod context;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use atomic::{reload_record, AtomicOptions, PersistStrategy, ReloadStrategy};
pub use attacher::Attacher;
pub use attachment::Attachment;
pub use context::AttachmentContext;
pub use tether_core::config::AttachmentOptions;
pub use validation::{ValidationRules, Validator};
