//! Atomic persistence
//!
//! Optimistic, compare-and-swap style writes of a record carrying an
//! attachment. Before writing, the record is reloaded and its attachment
//! column compared with the descriptor the caller last observed; a mismatch
//! means another process changed the attachment and nothing is written.
//!
//! Embedded records have no address of their own, so they are reloaded by
//! reloading their root and locating the matching descendant in it.

use futures::future::BoxFuture;
use tether_core::{Record, RecordId, TetherError, TetherResult};
use tether_storage::UploadedFile;
use tracing::{debug, info, instrument, warn};

use crate::attacher::Attacher;

/// Produces a fresh copy of the record
pub type ReloadFn<R> = Box<dyn FnOnce(&R) -> BoxFuture<'static, TetherResult<R>> + Send>;

/// Writes the record
pub type PersistFn<R> =
    Box<dyn for<'a> FnOnce(&'a mut R) -> BoxFuture<'a, TetherResult<()>> + Send>;

/// Edits the record after the check and before the write
pub type BeforePersistFn<R> = Box<dyn FnOnce(&mut R) + Send>;

/// How the current database state is obtained
pub enum ReloadStrategy<R> {
    /// `reload_record`
    Default,
    /// Trust the caller's state; no reload and no comparison
    Skip,
    Custom(ReloadFn<R>),
}

impl<R> Default for ReloadStrategy<R> {
    fn default() -> Self {
        Self::Default
    }
}

impl<R> ReloadStrategy<R> {
    pub fn custom<F>(f: F) -> Self
    where
        F: FnOnce(&R) -> BoxFuture<'static, TetherResult<R>> + Send + 'static,
    {
        Self::Custom(Box::new(f))
    }
}

/// How the record is written once the check passed
pub enum PersistStrategy<R> {
    /// Validation-skipping save
    Default,
    Skip,
    Custom(PersistFn<R>),
}

impl<R> Default for PersistStrategy<R> {
    fn default() -> Self {
        Self::Default
    }
}

impl<R> PersistStrategy<R> {
    pub fn custom<F>(f: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut R) -> BoxFuture<'a, TetherResult<()>> + Send + 'static,
    {
        Self::Custom(Box::new(f))
    }
}

/// Options for `atomic_persist` and `atomic_promote`
pub struct AtomicOptions<R> {
    expected: Option<Option<UploadedFile>>,
    reload: ReloadStrategy<R>,
    persist: PersistStrategy<R>,
    before_persist: Option<BeforePersistFn<R>>,
    location: Option<String>,
}

impl<R> Default for AtomicOptions<R> {
    fn default() -> Self {
        Self {
            expected: None,
            reload: ReloadStrategy::Default,
            persist: PersistStrategy::Default,
            before_persist: None,
            location: None,
        }
    }
}

impl<R> AtomicOptions<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor the column must still hold; defaults to the attacher's
    pub fn expected(mut self, file: Option<UploadedFile>) -> Self {
        self.expected = Some(file);
        self
    }

    pub fn reload(mut self, strategy: ReloadStrategy<R>) -> Self {
        self.reload = strategy;
        self
    }

    pub fn skip_reload(self) -> Self {
        self.reload(ReloadStrategy::Skip)
    }

    pub fn persist(mut self, strategy: PersistStrategy<R>) -> Self {
        self.persist = strategy;
        self
    }

    pub fn skip_persist(self) -> Self {
        self.persist(PersistStrategy::Skip)
    }

    pub fn before_persist<F>(mut self, block: F) -> Self
    where
        F: FnOnce(&mut R) + Send + 'static,
    {
        self.before_persist = Some(Box::new(block));
        self
    }

    /// Location of the promoted file in permanent storage
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Fresh copy of `record` as currently stored, leaving `record` untouched
#[instrument(skip(record), fields(model = %record.model_name()))]
pub async fn reload_record<R: Record>(record: &R) -> TetherResult<R> {
    if !record.is_persisted() {
        return Ok(record.clone());
    }

    if !record.is_embedded() {
        let mut copy = record.duplicate_with_identity()?;
        copy.reload().await?;
        return Ok(copy);
    }

    let id = record
        .identity()
        .ok_or_else(|| TetherError::not_found(record.model_name(), "<none>"))?;

    let mut root = root_of(record).duplicate_with_identity()?;
    root.reload().await?;

    let found = find_descendant(&root, record.model_name(), id)
        .cloned()
        .ok_or_else(|| TetherError::not_found(record.model_name(), id))?;
    debug!(id = %id, "Embedded record located in reloaded root");
    Ok(found)
}

fn root_of<R: Record>(record: &R) -> &R {
    let mut current = record;
    while let Some(parent) = current.parent() {
        current = parent;
    }
    current
}

fn find_descendant<'a, R: Record>(parent: &'a R, model: &str, id: &RecordId) -> Option<&'a R> {
    for child in parent.children() {
        if child.model_name() == model && child.identity() == Some(id) {
            return Some(child);
        }
        if let Some(found) = find_descendant(child, model, id) {
            return Some(found);
        }
    }
    None
}

/// Files are the same when they live at the same place
fn same_file(a: Option<&UploadedFile>, b: Option<&UploadedFile>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.id == b.id && a.storage == b.storage,
        _ => false,
    }
}

fn ensure_atomic<R: Record>(record: &R, operation: &'static str) -> TetherResult<()> {
    if R::capabilities().atomic {
        Ok(())
    } else {
        Err(TetherError::not_implemented(operation, record.model_name()))
    }
}

impl Attacher {
    /// Save `record` if its attachment column still holds the expected file.
    ///
    /// On a mismatch the attacher and the record's column are reset to the
    /// stored file and `AttachmentChanged` is returned without running the
    /// block or writing.
    #[instrument(skip(self, record, options), fields(attribute = %self.name()))]
    pub async fn atomic_persist<R: Record>(
        &mut self,
        record: &mut R,
        options: AtomicOptions<R>,
    ) -> TetherResult<()> {
        ensure_atomic(record, "atomic_persist")?;

        let AtomicOptions {
            expected,
            reload,
            persist,
            before_persist,
            ..
        } = options;
        let expected = expected.unwrap_or_else(|| self.file().cloned());

        self.check_unchanged(record, expected.as_ref(), reload).await?;

        if let Some(block) = before_persist {
            block(record);
        }

        match persist {
            PersistStrategy::Default => {
                self.write(record)?;
                record.save(false).await?;
            }
            PersistStrategy::Skip => return Ok(()),
            PersistStrategy::Custom(f) => {
                self.write(record)?;
                f(record).await?;
            }
        }

        info!(model = %record.model_name(), "Record persisted atomically");
        Ok(())
    }

    /// Promote the cached file, then persist atomically against the file it replaced.
    ///
    /// The promoted copy is deleted again when the attachment turns out to
    /// have changed concurrently.
    #[instrument(skip(self, record, options), fields(attribute = %self.name()))]
    pub async fn atomic_promote<R: Record>(
        &mut self,
        record: &mut R,
        mut options: AtomicOptions<R>,
    ) -> TetherResult<UploadedFile> {
        ensure_atomic(record, "atomic_promote")?;

        let expected = options
            .expected
            .take()
            .unwrap_or_else(|| self.file().cloned());
        let location = options.location.take();

        let promoted = self.promote(record, location.as_deref()).await?;

        match self.atomic_persist(record, options.expected(expected)).await {
            Ok(()) => Ok(promoted),
            Err(err @ TetherError::AttachmentChanged { .. }) => {
                self.delete_quietly(&promoted).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn check_unchanged<R: Record>(
        &mut self,
        record: &mut R,
        expected: Option<&UploadedFile>,
        reload: ReloadStrategy<R>,
    ) -> TetherResult<()> {
        let reloaded = match reload {
            ReloadStrategy::Skip => return Ok(()),
            ReloadStrategy::Default => reload_record(&*record).await?,
            ReloadStrategy::Custom(f) => f(&*record).await?,
        };

        let current = self.read(&reloaded)?;
        if same_file(current.as_ref(), expected) {
            return Ok(());
        }

        warn!(
            attribute = %self.name(),
            expected = ?expected.map(|file| &file.id),
            current = ?current.as_ref().map(|file| &file.id),
            "Attachment changed concurrently"
        );
        // the column must not keep a descriptor a later save would write back
        self.reset(current);
        self.write(record)?;
        Err(TetherError::AttachmentChanged {
            attribute: self.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture, upload, Plain};
    use futures::FutureExt;
    use serde_json::json;
    use tether_core::Value;
    use tether_document::Document;
    use tether_storage::{ColumnSerializer, JsonSerializer};

    fn column_for(file: &UploadedFile) -> String {
        JsonSerializer.dump(&file.data()).unwrap()
    }

    #[tokio::test]
    async fn test_reload_record_unpersisted_returns_clone() {
        let f = fixture();
        let mut user = f.user.new_document();
        user.set("name", "unsaved");

        let reloaded = reload_record(&user).await.unwrap();
        assert_eq!(reloaded.id(), user.id());
        assert_eq!(reloaded.get("name"), Some(&json!("unsaved")));
    }

    #[tokio::test]
    async fn test_reload_record_top_level() {
        let f = fixture();
        let mut user = f.user.new_document();
        user.save(true).await.unwrap();
        f.user.update_all("name", json!("Janko")).await.unwrap();

        let reloaded = reload_record(&user).await.unwrap();
        assert_eq!(reloaded.id(), user.id());
        assert_eq!(reloaded.get("name"), Some(&json!("Janko")));
        assert_eq!(user.get("name"), None);
    }

    #[tokio::test]
    async fn test_reload_record_embedded() {
        let f = fixture();
        let mut user = f.user.new_document();
        user.save(true).await.unwrap();
        user.embed_one("photo", f.photo.new_document()).unwrap();
        let photo = &mut user.embedded_mut("photo")[0];
        photo.set("title", "me");
        photo.save(true).await.unwrap();

        let reloaded = reload_record(&user.embedded("photo")[0]).await.unwrap();
        assert_eq!(reloaded.id(), user.embedded("photo")[0].id());
        assert_eq!(reloaded.model_name(), "Photo");
        assert_eq!(reloaded.get("title"), Some(&json!("me")));
    }

    #[tokio::test]
    async fn test_reload_record_embedded_removed_concurrently() {
        let f = fixture();
        let mut user = f.user.new_document();
        user.embed_one("photo", f.photo.new_document()).unwrap();
        user.save(true).await.unwrap();

        f.user.update_all("photo", Value::Null).await.unwrap();

        let result = reload_record(&user.embedded("photo")[0]).await;
        assert!(matches!(result, Err(TetherError::RecordNotFound { .. })));
    }

    #[tokio::test]
    async fn test_atomic_promote_promotes_cached_file() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach_cached(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        let file = attacher
            .atomic_promote(&mut user, AtomicOptions::new())
            .await
            .unwrap();

        assert!(attacher.stored());
        assert_eq!(attacher.file(), Some(&file));

        let found = f.user.find(user.id()).await.unwrap();
        attacher.reload(&found).unwrap();
        assert!(attacher.stored());
    }

    #[tokio::test]
    async fn test_atomic_promote_to_location() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach_cached(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        attacher
            .atomic_promote(&mut user, AtomicOptions::new().location("foo"))
            .await
            .unwrap();

        assert_eq!(attacher.file().unwrap().id, "foo");
    }

    #[tokio::test]
    async fn test_atomic_promote_persists_other_changes() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach_cached(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        user.set("name", "Janko");
        attacher
            .atomic_promote(&mut user, AtomicOptions::new())
            .await
            .unwrap();

        assert_eq!(user.get("name"), Some(&json!("Janko")));
        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), Some(&json!("Janko")));
    }

    #[tokio::test]
    async fn test_atomic_promote_runs_block() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach_cached(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        attacher
            .atomic_promote(
                &mut user,
                AtomicOptions::new().before_persist(|user: &mut Document| user.set("name", "Janko")),
            )
            .await
            .unwrap();

        assert_eq!(user.get("name"), Some(&json!("Janko")));
        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), Some(&json!("Janko")));
    }

    #[tokio::test]
    async fn test_atomic_promote_fails_on_attachment_change() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach_cached(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        f.user.update_all("avatar_data", Value::Null).await.unwrap();

        let block_called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = block_called.clone();
        user.set("name", "Janko");
        let result = attacher
            .atomic_promote(
                &mut user,
                AtomicOptions::new().before_persist(move |_: &mut Document| {
                    flag.store(true, std::sync::atomic::Ordering::SeqCst);
                }),
            )
            .await;

        assert!(matches!(result, Err(TetherError::AttachmentChanged { .. })));
        assert!(!block_called.load(std::sync::atomic::Ordering::SeqCst));
        assert!(attacher.file().is_none());

        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), None);
        assert_eq!(found.get("avatar_data"), Some(&Value::Null));
        // the promoted copy was removed
        assert_eq!(f.store.len().await, 0);
    }

    #[tokio::test]
    async fn test_failed_promote_does_not_overwrite_concurrent_file() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach_cached(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        let concurrent = attacher.upload(&upload("other"), "store", None).await.unwrap();
        f.user
            .update_all("avatar_data", json!(column_for(&concurrent)))
            .await
            .unwrap();

        let result = attacher.atomic_promote(&mut user, AtomicOptions::new()).await;
        assert!(matches!(result, Err(TetherError::AttachmentChanged { .. })));
        assert_eq!(attacher.file(), Some(&concurrent));
        assert_eq!(attacher.read(&user).unwrap(), Some(concurrent.clone()));

        // a later unrelated save keeps the concurrent file
        user.set("name", "Janko");
        user.save(true).await.unwrap();

        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), Some(&json!("Janko")));
        assert_eq!(attacher.read(&found).unwrap(), Some(concurrent.clone()));
        assert!(f.context.uploader().exists(&concurrent).await.unwrap());
        assert_eq!(f.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_persist_resets_pending_column() {
        let f = fixture();
        let mut user = f.user.new_document();
        user.save(true).await.unwrap();
        let mut attacher = f.attacher(&user, "avatar");

        let concurrent = attacher.upload(&upload("other"), "store", None).await.unwrap();
        f.user
            .update_all("avatar_data", json!(column_for(&concurrent)))
            .await
            .unwrap();

        attacher.attach(&mut user, &upload("mine")).await.unwrap();
        let result = attacher
            .atomic_persist(&mut user, AtomicOptions::new().expected(None))
            .await;
        assert!(matches!(result, Err(TetherError::AttachmentChanged { .. })));
        assert_eq!(attacher.read(&user).unwrap(), Some(concurrent.clone()));

        user.save(true).await.unwrap();
        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(attacher.read(&found).unwrap(), Some(concurrent));
    }

    #[tokio::test]
    async fn test_atomic_promote_respects_column_serializer() {
        let f = fixture();
        let context = f.context.clone().with_serializer(std::sync::Arc::new(
            crate::test_support::PrefixSerializer,
        ));
        let mut user = f.user.new_document();
        let mut attacher = Attacher::from_model(&user, "avatar", context).unwrap();
        attacher.attach_cached(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        attacher
            .atomic_promote(&mut user, AtomicOptions::new())
            .await
            .unwrap();

        let found = f.user.find(user.id()).await.unwrap();
        let column = found.get("avatar_data").and_then(Value::as_str).unwrap();
        assert!(column.starts_with("tether:"));
        attacher.reload(&found).unwrap();
        assert!(attacher.stored());
    }

    #[tokio::test]
    async fn test_atomic_promote_custom_reload() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        let cached = attacher.attach_cached(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        // not detected by the custom reload
        f.user.update_all("avatar_data", Value::Null).await.unwrap();

        let mut stale = f.user.new_document();
        stale.set("avatar_data", column_for(&cached));
        user.set("name", "Janko");
        attacher
            .atomic_promote(
                &mut user,
                AtomicOptions::new().reload(ReloadStrategy::custom(move |_: &Document| {
                    async move { Ok(stale) }.boxed()
                })),
            )
            .await
            .unwrap();

        let found = f.user.find(user.id()).await.unwrap();
        attacher.reload(&found).unwrap();
        assert!(attacher.stored());
        assert_eq!(found.get("name"), Some(&json!("Janko")));
    }

    #[tokio::test]
    async fn test_atomic_promote_skip_reload() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach_cached(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        f.user.update_all("avatar_data", Value::Null).await.unwrap();

        user.set("name", "Janko");
        attacher
            .atomic_promote(&mut user, AtomicOptions::new().skip_reload())
            .await
            .unwrap();

        let found = f.user.find(user.id()).await.unwrap();
        attacher.reload(&found).unwrap();
        assert!(attacher.stored());
        assert_eq!(found.get("name"), Some(&json!("Janko")));
    }

    #[tokio::test]
    async fn test_atomic_promote_custom_persist() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach_cached(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        attacher
            .atomic_promote(
                &mut user,
                AtomicOptions::new().persist(PersistStrategy::custom(|user: &mut Document| {
                    async move {
                        user.set("name", "Janko");
                        user.save(true).await.map(|_| ())
                    }
                    .boxed()
                })),
            )
            .await
            .unwrap();

        let found = f.user.find(user.id()).await.unwrap();
        attacher.reload(&found).unwrap();
        assert!(attacher.stored());
        assert_eq!(found.get("name"), Some(&json!("Janko")));
    }

    #[tokio::test]
    async fn test_atomic_promote_skip_persist() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach_cached(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        user.set("name", "Janko");
        let promoted = attacher
            .atomic_promote(&mut user, AtomicOptions::new().skip_persist())
            .await
            .unwrap();

        assert!(attacher.stored());
        assert!(f.context.uploader().exists(&promoted).await.unwrap());
        assert_eq!(f.store.len().await, 1);
        assert_eq!(user.get("name"), Some(&json!("Janko")));

        let found = f.user.find(user.id()).await.unwrap();
        attacher.reload(&found).unwrap();
        assert!(attacher.cached());
        assert_eq!(found.get("name"), None);
    }

    #[tokio::test]
    async fn test_atomic_promote_requires_atomic_record() {
        let f = fixture();
        let mut plain = Plain::default();
        let mut attacher = Attacher::new("image", f.context.clone());

        let result = attacher.atomic_promote(&mut plain, AtomicOptions::new()).await;
        assert!(matches!(
            result,
            Err(TetherError::NotImplemented { operation: "atomic_promote", .. })
        ));
    }

    #[tokio::test]
    async fn test_atomic_persist_persists_record() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        let file = attacher.attach(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        user.set("name", "Janko");
        attacher
            .atomic_persist(&mut user, AtomicOptions::new())
            .await
            .unwrap();

        assert_eq!(user.get("name"), Some(&json!("Janko")));
        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), Some(&json!("Janko")));
        assert_eq!(attacher.file(), Some(&file));
    }

    #[tokio::test]
    async fn test_atomic_persist_runs_block() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        attacher
            .atomic_persist(
                &mut user,
                AtomicOptions::new().before_persist(|user: &mut Document| user.set("name", "Janko")),
            )
            .await
            .unwrap();

        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), Some(&json!("Janko")));
    }

    #[tokio::test]
    async fn test_atomic_persist_fails_on_attachment_change() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        f.user.update_all("avatar_data", Value::Null).await.unwrap();

        let block_called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = block_called.clone();
        user.set("name", "Janko");
        let result = attacher
            .atomic_persist(
                &mut user,
                AtomicOptions::new().before_persist(move |_: &mut Document| {
                    flag.store(true, std::sync::atomic::Ordering::SeqCst);
                }),
            )
            .await;

        assert!(matches!(
            result,
            Err(TetherError::AttachmentChanged { ref attribute }) if attribute == "avatar"
        ));
        assert!(!block_called.load(std::sync::atomic::Ordering::SeqCst));
        assert!(attacher.file().is_none());
        assert!(!attacher.changed());

        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), None);
    }

    #[tokio::test]
    async fn test_atomic_persist_respects_column_serializer() {
        let f = fixture();
        let context = f.context.clone().with_serializer(std::sync::Arc::new(
            crate::test_support::PrefixSerializer,
        ));
        let mut user = f.user.new_document();
        let mut attacher = Attacher::from_model(&user, "avatar", context).unwrap();
        attacher.attach(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        user.set("name", "Janko");
        attacher
            .atomic_persist(&mut user, AtomicOptions::new())
            .await
            .unwrap();

        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), Some(&json!("Janko")));
    }

    #[tokio::test]
    async fn test_atomic_persist_custom_reload() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        f.user.update_all("avatar_data", Value::Null).await.unwrap();

        user.set("name", "Name");
        let snapshot = user.clone();
        attacher
            .atomic_persist(
                &mut user,
                AtomicOptions::new().reload(ReloadStrategy::custom(move |_: &Document| {
                    async move { Ok(snapshot) }.boxed()
                })),
            )
            .await
            .unwrap();

        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), Some(&json!("Name")));
    }

    #[tokio::test]
    async fn test_atomic_persist_skip_reload() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        f.user.update_all("avatar_data", Value::Null).await.unwrap();

        user.set("name", "Name");
        attacher
            .atomic_persist(&mut user, AtomicOptions::new().skip_reload())
            .await
            .unwrap();

        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), Some(&json!("Name")));
    }

    #[tokio::test]
    async fn test_atomic_persist_custom_persist() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        attacher
            .atomic_persist(
                &mut user,
                AtomicOptions::new().persist(PersistStrategy::custom(|user: &mut Document| {
                    async move {
                        user.set("name", "Janko");
                        user.save(true).await.map(|_| ())
                    }
                    .boxed()
                })),
            )
            .await
            .unwrap();

        assert_eq!(user.get("name"), Some(&json!("Janko")));
        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), Some(&json!("Janko")));
    }

    #[tokio::test]
    async fn test_atomic_persist_skip_persist() {
        let f = fixture();
        let mut user = f.user.new_document();
        let mut attacher = f.attacher(&user, "avatar");
        attacher.attach(&mut user, &upload("file")).await.unwrap();
        user.save(true).await.unwrap();

        user.set("name", "Janko");
        attacher
            .atomic_persist(&mut user, AtomicOptions::new().skip_persist())
            .await
            .unwrap();

        assert_eq!(user.get("name"), Some(&json!("Janko")));
        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), None);
    }

    #[tokio::test]
    async fn test_atomic_persist_explicit_expected_file() {
        let f = fixture();
        let mut user = f.user.new_document();
        user.save(true).await.unwrap();
        let mut attacher = f.attacher(&user, "avatar");

        let file = attacher.upload(&upload("file"), "store", None).await.unwrap();
        f.user
            .update_all("avatar_data", json!(column_for(&file)))
            .await
            .unwrap();

        let result = attacher.atomic_persist(&mut user, AtomicOptions::new()).await;
        assert!(matches!(result, Err(TetherError::AttachmentChanged { .. })));
        assert_eq!(attacher.file(), Some(&file));

        user.set("name", "Janko");
        attacher
            .atomic_persist(&mut user, AtomicOptions::new().expected(Some(file.clone())))
            .await
            .unwrap();

        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.get("name"), Some(&json!("Janko")));
        assert_eq!(attacher.read(&found).unwrap(), Some(file));
    }

    #[tokio::test]
    async fn test_atomic_persist_requires_atomic_record() {
        let f = fixture();
        let mut plain = Plain::default();
        let mut attacher = Attacher::new("image", f.context.clone());

        let result = attacher.atomic_persist(&mut plain, AtomicOptions::new()).await;
        assert!(matches!(
            result,
            Err(TetherError::NotImplemented { operation: "atomic_persist", .. })
        ));
    }

    #[tokio::test]
    async fn test_embedded_atomic_persist() {
        let f = fixture();
        let mut user = f.user.new_document();
        user.save(true).await.unwrap();
        user.embed_one("photo", f.photo.new_document()).unwrap();

        let photo = &mut user.embedded_mut("photo")[0];
        let mut attacher = f.attacher(&*photo, "image");
        let file = attacher.attach(photo, &upload("file")).await.unwrap();
        photo.save(true).await.unwrap();

        photo.set("title", "me");
        attacher
            .atomic_persist(photo, AtomicOptions::new())
            .await
            .unwrap();

        assert_eq!(photo.get("title"), Some(&json!("me")));
        assert_eq!(attacher.file(), Some(&file));
        let found = f.user.find(user.id()).await.unwrap();
        assert_eq!(found.embedded("photo")[0].get("title"), Some(&json!("me")));
    }

    #[tokio::test]
    async fn test_embedded_atomic_promote() {
        let f = fixture();
        let mut user = f.user.new_document();
        user.save(true).await.unwrap();
        user.embed_one("photo", f.photo.new_document()).unwrap();

        let photo = &mut user.embedded_mut("photo")[0];
        let mut attacher = f.attacher(&*photo, "image");
        attacher.attach_cached(photo, &upload("file")).await.unwrap();
        photo.save(true).await.unwrap();

        attacher
            .atomic_promote(photo, AtomicOptions::new())
            .await
            .unwrap();
        assert!(attacher.stored());

        let found = f.user.find(user.id()).await.unwrap();
        let stored_photo = &found.embedded("photo")[0];
        assert!(stored_photo.get("image_data").map(Value::is_object).unwrap_or(false));
        attacher.reload(stored_photo).unwrap();
        assert!(attacher.stored());
    }

    #[tokio::test]
    async fn test_embedded_atomic_persist_detects_change() {
        let f = fixture();
        let mut user = f.user.new_document();
        user.embed_one("photo", f.photo.new_document()).unwrap();
        user.save(true).await.unwrap();

        let photo = &mut user.embedded_mut("photo")[0];
        let mut attacher = f.attacher(&*photo, "image");
        attacher.attach(photo, &upload("file")).await.unwrap();
        photo.save(true).await.unwrap();

        let mut other = f.user.find(user.id()).await.unwrap();
        other.embedded_mut("photo")[0].set("image_data", Value::Null);
        other.save(true).await.unwrap();

        let photo = &mut user.embedded_mut("photo")[0];
        let result = attacher.atomic_persist(photo, AtomicOptions::new()).await;
        assert!(matches!(result, Err(TetherError::AttachmentChanged { .. })));
    }

    #[test]
    fn test_same_file_ignores_metadata() {
        let a = UploadedFile::new("a", "store");
        let mut b = a.clone();
        b.metadata.insert("size".into(), json!(1));

        assert!(same_file(Some(&a), Some(&b)));
        assert!(same_file(None, None));
        assert!(!same_file(Some(&a), None));
        assert!(!same_file(Some(&a), Some(&UploadedFile::new("a", "cache"))));
    }
}
