//! In-memory implementation of the ChangeStore trait.
//!
//! This is the reference collaborator used by tests and demos. It keeps a
//! per-cell last-writer-wins table plus an append-only change log tagged
//! with each change's originating site, which is what `exclude_sites` and
//! `local_only` filter on.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tidewire_core::{Change, SeqPair, SiteId};

use crate::error::{Result, StoreError};
use crate::traits::{ChangeListener, ChangeStore, Subscription};

/// One cell write within a commit: `(table, pks, cid, val, col_version)`.
pub type CellWrite<'a> = (&'a str, &'a str, &'a str, &'a str, i64);

/// A log entry: the change plus the site it originated from.
#[derive(Debug, Clone)]
struct LoggedChange {
    origin: SiteId,
    change: Change,
}

#[derive(Debug, Clone)]
struct Cell {
    val: String,
    col_version: i64,
}

#[derive(Default)]
struct DbState {
    /// Local logical commit clock. Monotonic, never reused.
    db_version: i64,
    /// Append-only change log, ordered by local db_version.
    log: Vec<LoggedChange>,
    /// Current cell values: (table, pks, cid) -> cell.
    cells: BTreeMap<(String, String, String), Cell>,
    /// Highest db_version applied per sender, for idempotent re-delivery.
    applied_from: HashMap<SiteId, i64>,
    /// Replicas bootstrapped so far, by schema name.
    schemas: BTreeSet<String>,
}

struct DbInner {
    site: SiteId,
    /// When set, `ensure_replica` only accepts these schema names.
    known_schemas: Option<BTreeSet<String>>,
    state: Mutex<DbState>,
    listeners: Mutex<HashMap<u64, ChangeListener>>,
    next_listener_id: AtomicU64,
}

/// In-memory change store.
///
/// All data is lost when the store is dropped. Thread-safe; locks are never
/// held while listeners run.
#[derive(Clone)]
pub struct MemoryDb {
    inner: Arc<DbInner>,
}

impl MemoryDb {
    /// Create a store with a random site identity.
    pub fn new() -> Self {
        Self::with_site(SiteId::random())
    }

    /// Create a store with a fixed site identity.
    pub fn with_site(site: SiteId) -> Self {
        Self {
            inner: Arc::new(DbInner {
                site,
                known_schemas: None,
                state: Mutex::new(DbState::default()),
                listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(0),
            }),
        }
    }

    /// Restrict `ensure_replica` to the given schema names.
    pub fn with_known_schemas<I, S>(site: SiteId, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(DbInner {
                site,
                known_schemas: Some(schemas.into_iter().map(Into::into).collect()),
                state: Mutex::new(DbState::default()),
                listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(0),
            }),
        }
    }

    /// Commit a local transaction. Every cell write shares one new
    /// `db_version`. Returns that version.
    pub fn commit(&self, writes: &[CellWrite<'_>]) -> i64 {
        self.commit_from(self.inner.site, writes)
    }

    /// Commit a transaction on behalf of `origin`.
    ///
    /// Used to seed relayed third-party data in tests; real relays arrive
    /// through `apply_changes`.
    pub fn commit_from(&self, origin: SiteId, writes: &[CellWrite<'_>]) -> i64 {
        let version = {
            let mut state = self.inner.state.lock().unwrap();
            state.db_version += 1;
            let version = state.db_version;
            for &(table, pks, cid, val, col_version) in writes {
                state.write_cell(origin, table, pks, cid, val, col_version, version);
            }
            version
        };
        self.fire_listeners();
        version
    }

    /// Read a cell's current value.
    pub fn cell(&self, table: &str, pks: &str, cid: &str) -> Option<String> {
        let state = self.inner.state.lock().unwrap();
        state
            .cells
            .get(&(table.to_string(), pks.to_string(), cid.to_string()))
            .map(|cell| cell.val.clone())
    }

    /// The current local commit clock.
    pub fn db_version(&self) -> i64 {
        self.inner.state.lock().unwrap().db_version
    }

    /// Schemas bootstrapped so far.
    pub fn schemas(&self) -> Vec<String> {
        let state = self.inner.state.lock().unwrap();
        state.schemas.iter().cloned().collect()
    }

    fn fire_listeners(&self) {
        let listeners: Vec<ChangeListener> = {
            let listeners = self.inner.listeners.lock().unwrap();
            listeners.values().cloned().collect()
        };
        for listener in listeners {
            listener();
        }
    }
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

impl DbState {
    #[allow(clippy::too_many_arguments)]
    fn write_cell(
        &mut self,
        origin: SiteId,
        table: &str,
        pks: &str,
        cid: &str,
        val: &str,
        col_version: i64,
        db_version: i64,
    ) {
        let key = (table.to_string(), pks.to_string(), cid.to_string());
        let wins = match self.cells.get(&key) {
            Some(existing) => col_version >= existing.col_version,
            None => true,
        };
        if wins {
            self.cells.insert(
                key,
                Cell {
                    val: val.to_string(),
                    col_version,
                },
            );
        }
        self.log.push(LoggedChange {
            origin,
            change: Change {
                table: table.to_string(),
                pks: pks.to_string(),
                cid: cid.to_string(),
                val: val.to_string(),
                col_version,
                db_version,
            },
        });
    }
}

#[async_trait]
impl ChangeStore for MemoryDb {
    fn site_id(&self) -> SiteId {
        self.inner.site
    }

    async fn pull_changes(
        &self,
        since: SeqPair,
        exclude_sites: &[SiteId],
        local_only: bool,
    ) -> Result<Vec<Change>> {
        let state = self.inner.state.lock().unwrap();
        let changes = state
            .log
            .iter()
            .filter(|entry| entry.change.seq() > since)
            .filter(|entry| !exclude_sites.contains(&entry.origin))
            .filter(|entry| !local_only || entry.origin == self.inner.site)
            .map(|entry| entry.change.clone())
            .collect();
        Ok(changes)
    }

    async fn apply_changes(&self, sender: SiteId, changes: &[Change]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let applied = {
            let mut state = self.inner.state.lock().unwrap();
            let watermark = state.applied_from.get(&sender).copied().unwrap_or(0);
            let fresh: Vec<&Change> = changes
                .iter()
                .filter(|change| change.db_version > watermark)
                .collect();
            if fresh.is_empty() {
                tracing::debug!(%sender, count = changes.len(), "batch already applied; skipping");
                false
            } else {
                // The whole batch lands as one local transaction. Applied
                // changes re-enter the log under the sender's origin so they
                // can be relayed onward and excluded when streaming back.
                state.db_version += 1;
                let local_version = state.db_version;
                let mut max_seen = watermark;
                for change in fresh {
                    state.write_cell(
                        sender,
                        &change.table,
                        &change.pks,
                        &change.cid,
                        &change.val,
                        change.col_version,
                        local_version,
                    );
                    max_seen = max_seen.max(change.db_version);
                }
                state.applied_from.insert(sender, max_seen);
                true
            }
        };
        if applied {
            self.fire_listeners();
        }
        Ok(())
    }

    fn on_change(&self, listener: ChangeListener) -> Subscription {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.lock().unwrap().insert(id, listener);

        let inner = Arc::clone(&self.inner);
        Subscription::new(move || {
            inner.listeners.lock().unwrap().remove(&id);
        })
    }

    async fn ensure_replica(&self, schema_name: &str) -> Result<()> {
        if let Some(known) = &self.inner.known_schemas {
            if !known.contains(schema_name) {
                return Err(StoreError::UnknownSchema(schema_name.to_string()));
            }
        }
        let mut state = self.inner.state.lock().unwrap();
        if state.schemas.insert(schema_name.to_string()) {
            tracing::debug!(schema = schema_name, "bootstrapped replica");
        }
        Ok(())
    }
}
