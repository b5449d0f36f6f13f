//! Scripted store fixture for exercising the sync streams.
//!
//! [`ScriptedStore`] answers `pull_changes` from a pre-loaded script instead
//! of real storage, records every call it receives, and can suspend a pull
//! mid-flight so tests can interleave a reset or a stop deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use tidewire_core::{Change, SeqPair, SiteId};
use tidewire_store::{ChangeListener, ChangeStore, Result, Subscription};

/// One recorded `pull_changes` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRecord {
    pub since: SeqPair,
    pub exclude_sites: Vec<SiteId>,
    pub local_only: bool,
}

enum ScriptedPull {
    Ready(Vec<Change>),
    /// Suspends the pull until the paired sender fires (or drops).
    Gated(oneshot::Receiver<Vec<Change>>),
}

/// A [`ChangeStore`] that replays a script of pull results.
///
/// Pulls consume the script front to back; an exhausted script answers with
/// an empty delta. Applied batches, replica bootstraps, and pull parameters
/// are all recorded for assertion.
pub struct ScriptedStore {
    site: SiteId,
    script: Mutex<VecDeque<ScriptedPull>>,
    pulls: Mutex<Vec<PullRecord>>,
    applied: Mutex<Vec<(SiteId, Vec<Change>)>>,
    replicas: Mutex<Vec<String>>,
    listeners: Arc<Mutex<HashMap<u64, ChangeListener>>>,
    next_listener_id: AtomicU64,
}

impl ScriptedStore {
    pub fn new(site: SiteId) -> Self {
        Self {
            site,
            script: Mutex::new(VecDeque::new()),
            pulls: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            replicas: Mutex::new(Vec::new()),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Queue a pull result that resolves immediately.
    pub fn push_ready(&self, changes: Vec<Change>) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedPull::Ready(changes));
    }

    /// Queue a pull that suspends until the returned sender fires.
    ///
    /// Dropping the sender resolves the pull with an empty delta.
    pub fn push_gated(&self) -> oneshot::Sender<Vec<Change>> {
        let (tx, rx) = oneshot::channel();
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedPull::Gated(rx));
        tx
    }

    /// Every `pull_changes` call seen so far, oldest first.
    pub fn pulls(&self) -> Vec<PullRecord> {
        self.pulls.lock().unwrap().clone()
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.lock().unwrap().len()
    }

    /// Every applied batch, as (sender, records) pairs.
    pub fn applied(&self) -> Vec<(SiteId, Vec<Change>)> {
        self.applied.lock().unwrap().clone()
    }

    /// Schema names passed to `ensure_replica`, in call order.
    pub fn replicas(&self) -> Vec<String> {
        self.replicas.lock().unwrap().clone()
    }

    /// Number of currently registered change listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Invoke every registered listener, as a commit would.
    pub fn fire(&self) {
        let listeners: Vec<ChangeListener> =
            self.listeners.lock().unwrap().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }
}

#[async_trait]
impl ChangeStore for ScriptedStore {
    fn site_id(&self) -> SiteId {
        self.site
    }

    async fn pull_changes(
        &self,
        since: SeqPair,
        exclude_sites: &[SiteId],
        local_only: bool,
    ) -> Result<Vec<Change>> {
        self.pulls.lock().unwrap().push(PullRecord {
            since,
            exclude_sites: exclude_sites.to_vec(),
            local_only,
        });

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(ScriptedPull::Ready(changes)) => Ok(changes),
            Some(ScriptedPull::Gated(rx)) => Ok(rx.await.unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    async fn apply_changes(&self, sender: SiteId, changes: &[Change]) -> Result<()> {
        self.applied
            .lock()
            .unwrap()
            .push((sender, changes.to_vec()));
        Ok(())
    }

    fn on_change(&self, listener: ChangeListener) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().insert(id, listener);

        let listeners = Arc::clone(&self.listeners);
        Subscription::new(move || {
            listeners.lock().unwrap().remove(&id);
        })
    }

    async fn ensure_replica(&self, schema_name: &str) -> Result<()> {
        self.replicas.lock().unwrap().push(schema_name.to_string());
        Ok(())
    }
}

/// Build one change record per db_version, in the given order.
///
/// The cell coordinates are fixed; tests that care about ordering and
/// sequencing only look at `db_version`.
pub fn make_changes(db_versions: &[i64]) -> Vec<Change> {
    db_versions
        .iter()
        .map(|&v| Change {
            table: "todo".to_string(),
            pks: format!("'{v}'"),
            cid: "content".to_string(),
            val: format!("'item {v}'"),
            col_version: 1,
            db_version: v,
        })
        .collect()
}
