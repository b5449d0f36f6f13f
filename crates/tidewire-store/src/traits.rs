//! ChangeStore trait: the abstract interface to the local mutable store.
//!
//! The sync layer never touches storage directly. It pulls deltas, applies
//! remote batches, and subscribes to mutation notifications through this
//! trait. The storage engine owns conflict resolution (last-writer-wins by
//! version) and the idempotency of `apply_changes`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tidewire_core::{Change, SeqPair, SiteId};

use crate::error::Result;

/// Callback invoked after every local commit (including applied remote
/// batches). Must be cheap: implementations typically just wake a task.
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// Disposer capability returned by [`ChangeStore::on_change`].
///
/// Deregisters the listener exactly once, on [`Subscription::dispose`] or on
/// drop, whichever comes first.
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a deregistration closure.
    pub fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Deregister the listener now.
    pub fn dispose(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

/// The storage-engine boundary required by the sync layer.
///
/// # Design Notes
///
/// - **Ordered pulls**: `pull_changes` returns records strictly after
///   `since`, ordered by ascending `db_version`.
/// - **Idempotent apply**: `apply_changes` must be idempotent with respect to
///   `db_version` per originating site; the protocol tolerates duplicate
///   delivery only under that assumption.
/// - **Explicit subscription**: mutation notifications are a register/
///   deregister pair returning a disposer capability, never an implicit
///   global registry.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// This replica's identity.
    fn site_id(&self) -> SiteId;

    /// Fetch all changes strictly after `since`.
    ///
    /// `exclude_sites` drops changes that originated from the named sites
    /// (typically the peer itself, to suppress echo). `local_only` restricts
    /// the delta to changes originated on this site, for peers not trusted
    /// to receive relayed third-party data.
    async fn pull_changes(
        &self,
        since: SeqPair,
        exclude_sites: &[SiteId],
        local_only: bool,
    ) -> Result<Vec<Change>>;

    /// Apply a batch of changes received from `sender`.
    ///
    /// Idempotent by `db_version` per originating site.
    async fn apply_changes(&self, sender: SiteId, changes: &[Change]) -> Result<()>;

    /// Register a mutation listener. The listener fires after every commit,
    /// local or applied-remote.
    fn on_change(&self, listener: ChangeListener) -> Subscription;

    /// Bootstrap a new replica with the named schema, if it does not exist
    /// yet. Idempotent. Schema resolution itself belongs to the storage
    /// engine.
    async fn ensure_replica(&self, schema_name: &str) -> Result<()>;
}
