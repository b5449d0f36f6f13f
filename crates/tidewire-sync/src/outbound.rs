//! Outbound streaming state machine.
//!
//! One `OutboundStream` exists per (local database, remote peer) pair. It
//! owns the "what have I sent so far" cursor and drives pull→send cycles
//! triggered by local mutation notifications or explicit (re)start commands.
//!
//! The pull and the send are the only suspension points. The cursor lock is
//! never held across either; a concurrent reset is detected by comparing the
//! cursor against the snapshot taken before the pull, and the stale attempt
//! is abandoned. The most recent reset always wins.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tidewire_core::{SeqPair, SiteId};
use tidewire_store::{ChangeStore, Subscription};

use crate::codec::encode_message;
use crate::error::Result;
use crate::messages::Message;
use crate::transport::Transport;

/// Parameters of a `startStreaming`/`resetStream` command.
#[derive(Debug, Clone)]
pub struct StartStreaming {
    /// Resume position: stream changes strictly after this point.
    pub since: SeqPair,
    /// Sites whose changes the peer already has (typically the peer itself).
    pub exclude_sites: Vec<SiteId>,
    /// Restrict the stream to changes originated on this site.
    pub local_only: bool,
}

impl StartStreaming {
    /// Stream everything after `since` with no filtering.
    pub fn since(since: SeqPair) -> Self {
        Self {
            since,
            exclude_sites: Vec::new(),
            local_only: false,
        }
    }
}

#[derive(Debug, Default)]
struct Cursor {
    /// Unset until `start_streaming`; reset/poisoned back to `None` by
    /// `stop`.
    last_sent: Option<SeqPair>,
    exclude_sites: Vec<SiteId>,
    local_only: bool,
    /// Highest position the peer has acknowledged.
    last_acked: Option<SeqPair>,
}

/// Per-peer outbound stream.
///
/// Construction registers a mutation listener with the store and spawns a
/// pump task that runs one delivery attempt per notification. Call
/// [`OutboundStream::stop`] to release the subscription; dropping every
/// strong reference also shuts the pump down.
pub struct OutboundStream<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    cursor: Mutex<Cursor>,
    subscription: Mutex<Option<Subscription>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<S, T> OutboundStream<S, T>
where
    S: ChangeStore + 'static,
    T: Transport + 'static,
{
    /// Create a stream and attach it to the store's change notifications.
    pub fn new(store: Arc<S>, transport: Arc<T>) -> Arc<Self> {
        let stream = Arc::new(Self {
            store: Arc::clone(&store),
            transport,
            cursor: Mutex::new(Cursor::default()),
            subscription: Mutex::new(None),
            pump: Mutex::new(None),
        });

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let subscription = store.on_change(Arc::new(move || {
            // Coalescing is fine: one wakeup drains everything pending.
            let _ = notify_tx.send(());
        }));

        let pump = tokio::spawn(Self::pump(Arc::downgrade(&stream), notify_rx));

        *stream.subscription.lock().unwrap() = Some(subscription);
        *stream.pump.lock().unwrap() = Some(pump);
        stream
    }

    /// Background reaction to mutation notifications. Holds only a weak
    /// reference so an abandoned stream can shut down.
    async fn pump(stream: Weak<Self>, mut notify_rx: mpsc::UnboundedReceiver<()>) {
        while notify_rx.recv().await.is_some() {
            let Some(stream) = stream.upgrade() else {
                break;
            };
            if let Err(err) = stream.on_db_change().await {
                tracing::warn!(%err, "change delivery failed; will retry on next mutation");
            }
        }
    }

    /// (Re)initialize the cursor and immediately attempt one delivery, so
    /// worst-case staleness after an explicit (re)start is zero.
    pub async fn start_streaming(&self, params: StartStreaming) -> Result<()> {
        {
            let mut cursor = self.cursor.lock().unwrap();
            cursor.last_sent = Some(params.since);
            cursor.exclude_sites = params.exclude_sites;
            cursor.local_only = params.local_only;
        }
        self.on_db_change().await
    }

    /// Equivalent to [`OutboundStream::start_streaming`]: re-initializes the
    /// cursor, invalidating any delivery attempt still in flight.
    pub async fn reset_stream(&self, params: StartStreaming) -> Result<()> {
        self.start_streaming(params).await
    }

    /// One delivery attempt. Invoked by the pump on every mutation
    /// notification and synthetically by `start_streaming`.
    ///
    /// No-op while the cursor is unset. Otherwise: snapshot the cursor, pull
    /// the delta, abandon the attempt if a reset superseded the snapshot
    /// while the pull was in flight, advance the cursor optimistically, and
    /// send. A failed send rolls the cursor back to the snapshot and
    /// re-raises.
    pub async fn on_db_change(&self) -> Result<()> {
        let (snapshot, exclude_sites, local_only) = {
            let cursor = self.cursor.lock().unwrap();
            match cursor.last_sent {
                None => return Ok(()),
                Some(snapshot) => (snapshot, cursor.exclude_sites.clone(), cursor.local_only),
            }
        };

        let changes = self
            .store
            .pull_changes(snapshot, &exclude_sites, local_only)
            .await?;

        let next = {
            let mut cursor = self.cursor.lock().unwrap();
            if cursor.last_sent != Some(snapshot) {
                // A reset won while the pull was in flight. Sending the
                // stale result would corrupt the stream's sequencing.
                tracing::debug!(%snapshot, "delivery attempt superseded by reset; aborting");
                return Ok(());
            }
            let Some(last) = changes.last() else {
                // Empty delta: leave the cursor untouched so the next
                // notification retries from the same point.
                return Ok(());
            };
            let next = last.seq();
            // Optimistic advancement: the send below either makes this
            // durable to the transport or we roll back.
            cursor.last_sent = Some(next);
            next
        };

        tracing::debug!(
            count = changes.len(),
            seq_start = %snapshot,
            seq_end = %next,
            "sending changes"
        );

        let frame = encode_message(&Message::Changes {
            from: self.store.site_id(),
            seq_start: snapshot,
            seq_end: next,
            changes,
        });

        if let Err(err) = self.transport.send_changes(frame).await {
            let mut cursor = self.cursor.lock().unwrap();
            // Undo only our own advancement; a reset that landed during the
            // send keeps its value.
            if cursor.last_sent == Some(next) {
                cursor.last_sent = Some(snapshot);
            }
            return Err(err.into());
        }

        Ok(())
    }

    /// Record a peer acknowledgement. Monotonic: an older ack never moves
    /// the watermark backwards.
    pub fn record_ack(&self, seq_end: SeqPair) {
        let mut cursor = self.cursor.lock().unwrap();
        match cursor.last_acked {
            Some(acked) if acked >= seq_end => {}
            _ => cursor.last_acked = Some(seq_end),
        }
    }

    /// The cursor's current position, if streaming.
    pub fn last_sent(&self) -> Option<SeqPair> {
        self.cursor.lock().unwrap().last_sent
    }

    /// Highest position the peer has acknowledged.
    pub fn last_acked(&self) -> Option<SeqPair> {
        self.cursor.lock().unwrap().last_acked
    }

    /// Detach from the store's change notifications and poison the cursor
    /// so any delivery attempt still in flight becomes a guaranteed no-op.
    pub fn stop(&self) {
        if let Some(subscription) = self.subscription.lock().unwrap().take() {
            subscription.dispose();
        }
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
        let mut cursor = self.cursor.lock().unwrap();
        cursor.last_sent = None;
    }
}
