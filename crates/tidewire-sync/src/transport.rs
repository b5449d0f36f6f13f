//! Transport abstraction for the sync protocol.
//!
//! The transport moves encoded frames to one remote peer. Implementations
//! may use WebSockets, HTTP, or any other duplex channel; the streams only
//! depend on the send contract: the future resolves once the frame has been
//! durably handed to the network layer, or fails distinguishably. Partial
//! sends are failures.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// One-way send contract toward a single remote peer.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ship one encoded message to the peer.
    async fn send_changes(&self, frame: Bytes) -> Result<()>;
}

/// In-memory transport for tests and in-process wiring.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Transport that records every frame it is asked to send.
    ///
    /// Optionally forwards frames over an mpsc channel so a peer loop can
    /// consume them, and supports injected send failure for rollback tests.
    pub struct MemoryTransport {
        sent: Mutex<Vec<Bytes>>,
        forward: Option<mpsc::UnboundedSender<Bytes>>,
        fail_sends: AtomicBool,
    }

    impl MemoryTransport {
        /// A transport that only records frames.
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                forward: None,
                fail_sends: AtomicBool::new(false),
            }
        }

        /// A transport that records frames and forwards them to a consumer.
        pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    sent: Mutex::new(Vec::new()),
                    forward: Some(tx),
                    fail_sends: AtomicBool::new(false),
                },
                rx,
            )
        }

        /// Make subsequent sends fail (until turned off again).
        pub fn fail_sends(&self, fail: bool) {
            self.fail_sends.store(fail, Ordering::SeqCst);
        }

        /// Frames successfully sent so far, oldest first.
        pub fn sent_frames(&self) -> Vec<Bytes> {
            self.sent.lock().unwrap().clone()
        }

        /// Number of frames successfully sent so far.
        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl Default for MemoryTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send_changes(&self, frame: Bytes) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(TransportError::Rejected("injected failure".into()));
            }
            if let Some(forward) = &self.forward {
                forward
                    .send(frame.clone())
                    .map_err(|_| TransportError::ChannelClosed)?;
            }
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }
    }
}
