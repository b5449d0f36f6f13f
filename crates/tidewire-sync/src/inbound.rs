//! Inbound stream: the protocol-symmetric counterpart of the outbound side.
//!
//! Consumes received `Changes` batches, verifies the chain (each batch must
//! start exactly where the previous one ended), applies them to the local
//! store, and produces the acknowledgement to emit. A gapped or overlapping
//! batch is rejected before anything is applied; the session layer turns
//! that rejection into a corrective `Request`.

use std::sync::{Arc, Mutex};

use tidewire_core::{Change, SeqPair, SiteId};
use tidewire_store::ChangeStore;

use crate::error::{Result, SyncError};
use crate::messages::Message;

/// Per-peer inbound stream.
pub struct InboundStream<S> {
    store: Arc<S>,
    /// Last position applied for this stream. `None` until the first batch,
    /// which is adopted as-is.
    last_applied: Mutex<Option<SeqPair>>,
}

impl<S: ChangeStore> InboundStream<S> {
    /// Create a stream with no recorded position.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            last_applied: Mutex::new(None),
        }
    }

    /// Create a stream expecting the next batch to start at `position`.
    pub fn with_position(store: Arc<S>, position: SeqPair) -> Self {
        Self {
            store,
            last_applied: Mutex::new(Some(position)),
        }
    }

    /// Handle one received batch.
    ///
    /// On success the recorded position advances to `seq_end` and the `Ack`
    /// to emit is returned. An out-of-order or duplicated batch fails with
    /// [`SyncError::SequenceMismatch`] without applying anything, leaving
    /// the stream retryable from the recorded position.
    pub async fn handle_changes(
        &self,
        from: SiteId,
        seq_start: SeqPair,
        seq_end: SeqPair,
        changes: &[Change],
    ) -> Result<Message> {
        let expected = *self.last_applied.lock().unwrap();
        if let Some(expected) = expected {
            if seq_start != expected {
                tracing::warn!(
                    %from,
                    %expected,
                    got = %seq_start,
                    "out-of-order batch; requesting retransmission"
                );
                return Err(SyncError::SequenceMismatch {
                    expected,
                    got: seq_start,
                });
            }
        }

        // The chain invariant: seq_end is the last record's position, and an
        // empty batch cannot move the stream.
        match changes.last() {
            Some(last) if last.seq() != seq_end => {
                return Err(SyncError::InvalidMessage(format!(
                    "seq_end {seq_end} does not match last record {}",
                    last.seq()
                )));
            }
            None if seq_end != seq_start => {
                return Err(SyncError::InvalidMessage(format!(
                    "empty batch cannot advance {seq_start} to {seq_end}"
                )));
            }
            _ => {}
        }

        self.store.apply_changes(from, changes).await?;
        *self.last_applied.lock().unwrap() = Some(seq_end);

        tracing::debug!(%from, count = changes.len(), %seq_end, "applied batch");
        Ok(Message::Ack { seq_end })
    }

    /// The position applied so far, if any batch has landed.
    pub fn last_applied(&self) -> Option<SeqPair> {
        *self.last_applied.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidewire_testkit::fixtures::{make_changes, ScriptedStore};

    fn sender() -> SiteId {
        SiteId::from_bytes([9; 16])
    }

    #[tokio::test]
    async fn test_in_order_batches_apply_and_ack() {
        let store = Arc::new(ScriptedStore::new(SiteId::from_bytes([1; 16])));
        let inbound = InboundStream::new(Arc::clone(&store));

        let ack = inbound
            .handle_changes(
                sender(),
                SeqPair::ZERO,
                SeqPair::new(6, 0),
                &make_changes(&[5, 6]),
            )
            .await
            .unwrap();
        assert_eq!(ack, Message::Ack { seq_end: SeqPair::new(6, 0) });

        let ack = inbound
            .handle_changes(
                sender(),
                SeqPair::new(6, 0),
                SeqPair::new(9, 0),
                &make_changes(&[9]),
            )
            .await
            .unwrap();
        assert_eq!(ack, Message::Ack { seq_end: SeqPair::new(9, 0) });

        assert_eq!(inbound.last_applied(), Some(SeqPair::new(9, 0)));
        assert_eq!(store.applied().len(), 2);
    }

    #[tokio::test]
    async fn test_gapped_batch_is_rejected_before_apply() {
        let store = Arc::new(ScriptedStore::new(SiteId::from_bytes([1; 16])));
        let inbound = InboundStream::with_position(Arc::clone(&store), SeqPair::new(6, 0));

        let err = inbound
            .handle_changes(
                sender(),
                SeqPair::new(9, 0),
                SeqPair::new(12, 0),
                &make_changes(&[12]),
            )
            .await
            .unwrap_err();

        match err {
            SyncError::SequenceMismatch { expected, got } => {
                assert_eq!(expected, SeqPair::new(6, 0));
                assert_eq!(got, SeqPair::new(9, 0));
            }
            other => panic!("expected SequenceMismatch, got {other:?}"),
        }
        assert!(store.applied().is_empty(), "nothing may be applied");
        assert_eq!(inbound.last_applied(), Some(SeqPair::new(6, 0)));
    }

    #[tokio::test]
    async fn test_duplicated_batch_is_rejected() {
        let store = Arc::new(ScriptedStore::new(SiteId::from_bytes([1; 16])));
        let inbound = InboundStream::new(Arc::clone(&store));

        inbound
            .handle_changes(
                sender(),
                SeqPair::ZERO,
                SeqPair::new(6, 0),
                &make_changes(&[5, 6]),
            )
            .await
            .unwrap();

        // Same batch again: seq_start no longer matches.
        let err = inbound
            .handle_changes(
                sender(),
                SeqPair::ZERO,
                SeqPair::new(6, 0),
                &make_changes(&[5, 6]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SequenceMismatch { .. }));
        assert_eq!(store.applied().len(), 1);
    }

    #[tokio::test]
    async fn test_seq_end_must_match_last_record() {
        let store = Arc::new(ScriptedStore::new(SiteId::from_bytes([1; 16])));
        let inbound = InboundStream::new(Arc::clone(&store));

        let err = inbound
            .handle_changes(
                sender(),
                SeqPair::ZERO,
                SeqPair::new(7, 0),
                &make_changes(&[5, 6]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage(_)));
        assert!(store.applied().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_cannot_advance() {
        let store = Arc::new(ScriptedStore::new(SiteId::from_bytes([1; 16])));
        let inbound = InboundStream::new(Arc::clone(&store));

        let err = inbound
            .handle_changes(sender(), SeqPair::ZERO, SeqPair::new(3, 0), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage(_)));

        // An empty batch that stays put is tolerated.
        let ack = inbound
            .handle_changes(sender(), SeqPair::ZERO, SeqPair::ZERO, &[])
            .await
            .unwrap();
        assert_eq!(ack, Message::Ack { seq_end: SeqPair::ZERO });
    }
}
