//! Per-peer session: decodes frames and routes them to the right stream.
//!
//! One `PeerSession` exists per peer connection. It owns the outbound and
//! inbound streams for that peer and implements the server-side reactions:
//! a `Request` (re)starts outbound streaming, an `Ack` advances
//! bookkeeping, a `Changes` batch is applied and acknowledged, and an
//! `Establish` optionally bootstraps a replica before streaming begins.

use std::sync::{Arc, Mutex};

use tidewire_core::SiteId;
use tidewire_store::ChangeStore;

use crate::codec::{decode_message, encode_message};
use crate::error::{Result, SyncError};
use crate::inbound::InboundStream;
use crate::messages::Message;
use crate::outbound::{OutboundStream, StartStreaming};
use crate::transport::Transport;

/// One logical sync session with a remote peer.
pub struct PeerSession<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    outbound: Arc<OutboundStream<S, T>>,
    inbound: InboundStream<S>,
    /// Learned from `Establish` (or the first `Changes` batch); used to
    /// suppress echoing the peer's own changes back at it.
    peer: Mutex<Option<SiteId>>,
}

impl<S, T> PeerSession<S, T>
where
    S: ChangeStore + 'static,
    T: Transport + 'static,
{
    /// Create a session over an established transport.
    pub fn new(store: Arc<S>, transport: Arc<T>) -> Self {
        Self {
            outbound: OutboundStream::new(Arc::clone(&store), Arc::clone(&transport)),
            inbound: InboundStream::new(Arc::clone(&store)),
            store,
            transport,
            peer: Mutex::new(None),
        }
    }

    /// Decode and dispatch one received frame.
    pub async fn handle_frame(&self, frame: &[u8]) -> Result<()> {
        let msg = decode_message(frame)?;
        self.handle_message(msg).await
    }

    /// Dispatch one decoded message.
    pub async fn handle_message(&self, msg: Message) -> Result<()> {
        match msg {
            Message::Request { seq_start } => {
                let exclude_sites = self.peer().into_iter().collect();
                self.outbound
                    .start_streaming(StartStreaming {
                        since: seq_start,
                        exclude_sites,
                        local_only: false,
                    })
                    .await
            }
            Message::Ack { seq_end } => {
                self.outbound.record_ack(seq_end);
                Ok(())
            }
            Message::Changes {
                from,
                seq_start,
                seq_end,
                changes,
            } => {
                self.remember_peer(from);
                match self
                    .inbound
                    .handle_changes(from, seq_start, seq_end, &changes)
                    .await
                {
                    Ok(ack) => self.send(&ack).await,
                    Err(SyncError::SequenceMismatch { expected, .. }) => {
                        // Recoverable: ask the peer to resume from where we
                        // actually are.
                        self.send(&Message::Request { seq_start: expected }).await
                    }
                    Err(other) => Err(other),
                }
            }
            Message::Establish {
                from,
                to,
                seq_start,
                create,
            } => {
                let local = self.store.site_id();
                if to != local {
                    return Err(SyncError::InvalidMessage(format!(
                        "establish addressed to {to}, this site is {local}"
                    )));
                }
                self.remember_peer(from);
                if let Some(schema_name) = create {
                    self.store.ensure_replica(&schema_name).await?;
                }
                self.outbound
                    .start_streaming(StartStreaming {
                        since: seq_start,
                        exclude_sites: vec![from],
                        local_only: false,
                    })
                    .await
            }
        }
    }

    /// The remote site, once learned.
    pub fn peer(&self) -> Option<SiteId> {
        *self.peer.lock().unwrap()
    }

    /// The outbound half of this session.
    pub fn outbound(&self) -> &Arc<OutboundStream<S, T>> {
        &self.outbound
    }

    /// The inbound half of this session.
    pub fn inbound(&self) -> &InboundStream<S> {
        &self.inbound
    }

    /// Tear the session down: stops outbound streaming and releases the
    /// store subscription.
    pub fn stop(&self) {
        self.outbound.stop();
    }

    fn remember_peer(&self, site: SiteId) {
        let mut peer = self.peer.lock().unwrap();
        if peer.is_none() {
            *peer = Some(site);
        }
    }

    async fn send(&self, msg: &Message) -> Result<()> {
        self.transport
            .send_changes(encode_message(msg))
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use tidewire_core::SeqPair;
    use tidewire_testkit::fixtures::{make_changes, ScriptedStore};

    fn local_site() -> SiteId {
        SiteId::from_bytes([1; 16])
    }

    fn peer_site() -> SiteId {
        SiteId::from_bytes([7; 16])
    }

    fn decode_frames(transport: &MemoryTransport) -> Vec<Message> {
        transport
            .sent_frames()
            .iter()
            .map(|frame| decode_message(frame).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_request_starts_streaming() {
        let store = Arc::new(ScriptedStore::new(local_site()));
        let transport = Arc::new(MemoryTransport::new());
        store.push_ready(make_changes(&[5, 6]));

        let session = PeerSession::new(Arc::clone(&store), Arc::clone(&transport));
        session
            .handle_message(Message::Request { seq_start: SeqPair::ZERO })
            .await
            .unwrap();

        let frames = decode_frames(&transport);
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Message::Changes { seq_end, .. } if *seq_end == SeqPair::new(6, 0)));
    }

    #[tokio::test]
    async fn test_ack_advances_bookkeeping() {
        let store = Arc::new(ScriptedStore::new(local_site()));
        let transport = Arc::new(MemoryTransport::new());
        let session = PeerSession::new(store, transport);

        session
            .handle_message(Message::Ack { seq_end: SeqPair::new(9, 0) })
            .await
            .unwrap();
        assert_eq!(session.outbound().last_acked(), Some(SeqPair::new(9, 0)));
    }

    #[tokio::test]
    async fn test_changes_apply_and_ack() {
        let store = Arc::new(ScriptedStore::new(local_site()));
        let transport = Arc::new(MemoryTransport::new());
        let session = PeerSession::new(Arc::clone(&store), Arc::clone(&transport));

        session
            .handle_message(Message::Changes {
                from: peer_site(),
                seq_start: SeqPair::ZERO,
                seq_end: SeqPair::new(6, 0),
                changes: make_changes(&[5, 6]),
            })
            .await
            .unwrap();

        assert_eq!(session.peer(), Some(peer_site()));
        assert_eq!(store.applied().len(), 1);
        let frames = decode_frames(&transport);
        assert_eq!(frames, vec![Message::Ack { seq_end: SeqPair::new(6, 0) }]);
    }

    #[tokio::test]
    async fn test_gapped_changes_emit_corrective_request() {
        let store = Arc::new(ScriptedStore::new(local_site()));
        let transport = Arc::new(MemoryTransport::new());
        let session = PeerSession::new(Arc::clone(&store), Arc::clone(&transport));

        session
            .handle_message(Message::Changes {
                from: peer_site(),
                seq_start: SeqPair::ZERO,
                seq_end: SeqPair::new(6, 0),
                changes: make_changes(&[5, 6]),
            })
            .await
            .unwrap();

        // Batch starting past where we are: rejected, corrective request.
        session
            .handle_message(Message::Changes {
                from: peer_site(),
                seq_start: SeqPair::new(9, 0),
                seq_end: SeqPair::new(12, 0),
                changes: make_changes(&[12]),
            })
            .await
            .unwrap();

        assert_eq!(store.applied().len(), 1, "gapped batch must not apply");
        let frames = decode_frames(&transport);
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[1],
            Message::Request { seq_start: SeqPair::new(6, 0) }
        );
    }

    #[tokio::test]
    async fn test_establish_bootstraps_then_streams() {
        let store = Arc::new(ScriptedStore::new(local_site()));
        let transport = Arc::new(MemoryTransport::new());
        store.push_ready(Vec::new());

        let session = PeerSession::new(Arc::clone(&store), Arc::clone(&transport));
        session
            .handle_message(Message::Establish {
                from: peer_site(),
                to: local_site(),
                seq_start: SeqPair::new(4, 0),
                create: Some("todo-v1".into()),
            })
            .await
            .unwrap();

        assert_eq!(session.peer(), Some(peer_site()));
        assert_eq!(store.replicas(), vec!["todo-v1".to_string()]);

        let pulls = store.pulls();
        assert_eq!(pulls.len(), 1);
        assert_eq!(pulls[0].since, SeqPair::new(4, 0));
        assert_eq!(
            pulls[0].exclude_sites,
            vec![peer_site()],
            "peer's own changes are excluded from the stream back to it"
        );
    }

    #[tokio::test]
    async fn test_establish_for_other_site_is_rejected() {
        let store = Arc::new(ScriptedStore::new(local_site()));
        let transport = Arc::new(MemoryTransport::new());
        let session = PeerSession::new(store, transport);

        let err = session
            .handle_message(Message::Establish {
                from: peer_site(),
                to: SiteId::from_bytes([8; 16]),
                seq_start: SeqPair::ZERO,
                create: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_handle_frame_rejects_garbage() {
        let store = Arc::new(ScriptedStore::new(local_site()));
        let transport = Arc::new(MemoryTransport::new());
        let session = PeerSession::new(store, transport);

        let err = session.handle_frame(&[0xff, 0x00]).await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }
}
