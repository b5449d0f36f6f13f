//! # Tidewire Sync
//!
//! Replication protocol for streaming row-level changes between replicas.
//!
//! ## Overview
//!
//! The sync module keeps a peer continuously up to date with a local
//! database: the outbound stream pulls the delta past a resumable cursor and
//! ships it whenever the database mutates, the inbound stream applies
//! received batches in strict sequence, and the session layer wires both to
//! a framed transport.
//!
//! ## Key Properties
//!
//! - **Resumable**: a peer reconnects with its last position and streaming
//!   continues from there
//! - **Gap-free**: each batch chains exactly onto the previous one; a gap is
//!   detected before anything is applied and repaired with a `Request`
//! - **Echo-free**: a peer's own changes are never streamed back to it
//! - **Reset-safe**: a mid-flight reset invalidates the stale delivery
//!   attempt instead of interleaving with it
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidewire_store::MemoryDb;
//! use tidewire_sync::{MemoryTransport, PeerSession};
//!
//! async fn example(frame: &[u8]) {
//!     let store = Arc::new(MemoryDb::new());
//!     let (transport, _rx) = MemoryTransport::channel();
//!     let session = PeerSession::new(store, Arc::new(transport));
//!
//!     // Feed every frame received from the peer into the session; it
//!     // reacts by streaming, applying, acking, or requesting a resend.
//!     session.handle_frame(frame).await.unwrap();
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Client                              Server
//!   |-------- Establish -------------->|
//!   |<------- Changes -----------------|
//!   |-------- Ack -------------------->|
//!   |-------- Changes ---------------->|
//!   |<------- Ack ---------------------|
//!   |   (client restarts)              |
//!   |-------- Request ---------------->|
//!   |<------- Changes -----------------|
//! ```

pub mod codec;
pub mod error;
pub mod inbound;
pub mod messages;
pub mod outbound;
pub mod session;
pub mod transport;

pub use codec::{decode_message, encode_message};
pub use error::{ProtocolError, Result, SyncError, TransportError};
pub use inbound::InboundStream;
pub use messages::{tag, Message};
pub use outbound::{OutboundStream, StartStreaming};
pub use session::PeerSession;
pub use transport::{memory::MemoryTransport, Transport};
