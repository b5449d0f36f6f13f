//! Error taxonomy for the sync layer.
//!
//! Nothing here is fatal to the process: every failure is scoped to a single
//! stream/peer relationship and leaves it in a retryable state.

use thiserror::Error;

use tidewire_core::SeqPair;

/// Decode-time failures. Always recoverable by the caller: discard the
/// frame, optionally request retransmission.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The discriminant byte does not name a known message variant.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// The buffer ended before the field did.
    #[error("truncated message: wanted {wanted} more bytes, {remaining} remaining")]
    Truncated { wanted: usize, remaining: usize },

    /// A length-prefixed varint ran past 64 bits.
    #[error("varint exceeds 64 bits")]
    VarIntOverflow,

    /// A string field held invalid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A site identifier field was not exactly 16 bytes.
    #[error("invalid site id length: {0}")]
    InvalidSiteIdLength(usize),

    /// The sub-index slot does not fit the data model's width.
    #[error("sub-index out of range: {0}")]
    SubIndexOutOfRange(u64),
}

/// Send-time failures from the transport boundary.
///
/// Failure must be distinguishable from success; partial sends are failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport refused or lost the frame.
    #[error("send rejected: {0}")]
    Rejected(String),

    /// The underlying channel to the peer is gone.
    #[error("channel closed")]
    ChannelClosed,
}

/// Errors that can occur while running a stream or session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A frame failed to decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A send failed; the outbound cursor has already been rolled back.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The storage engine failed; propagated distinguishably.
    #[error("store error: {0}")]
    Store(#[from] tidewire_store::StoreError),

    /// An inbound batch did not start where the last one ended. Triggers a
    /// corrective `Request`, never a crash.
    #[error("sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch { expected: SeqPair, got: SeqPair },

    /// A message violated a protocol invariant beyond raw encoding.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
