//! Sync protocol message types.
//!
//! A closed set of four variants. Both the codec and every consumer match
//! exhaustively, so adding a variant without updating each site is a compile
//! error.

use serde::{Deserialize, Serialize};

use tidewire_core::{Change, SeqPair, SiteId};

/// Wire discriminants, one byte each.
///
/// This mapping is part of the wire format and must never be renumbered; an
/// incompatible format revision has to claim a fresh tag value instead.
pub mod tag {
    /// Confirm receipt/application up to and including a sequence pair.
    pub const ACK: u8 = 0;
    /// Open a logical session between two named sites.
    pub const ESTABLISH: u8 = 1;
    /// Deliver a batch of changeset records (`receive` on the wire).
    pub const CHANGES: u8 = 2;
    /// Ask the peer to resume streaming from a sequence pair.
    pub const REQUEST: u8 = 3;
}

/// Sync protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Confirm receipt/application up to and including `seq_end`.
    Ack {
        /// Highest position applied by the sender of this ack.
        seq_end: SeqPair,
    },

    /// Open a logical session between two named sites.
    Establish {
        /// The connecting site.
        from: SiteId,
        /// The site being connected to.
        to: SiteId,
        /// Where the connecting site wants streaming to resume.
        seq_start: SeqPair,
        /// When present, bootstrap a new replica with this schema name
        /// before streaming. Present-with-empty is distinct from absent.
        create: Option<String>,
    },

    /// Deliver a batch of changeset records covering `(seq_start, seq_end]`.
    ///
    /// `seq_start` must equal the `seq_end` of the immediately preceding
    /// `Changes` message for this stream (or the initial `Request`), and
    /// `seq_end` must equal the last record's sequence pair. This chains
    /// messages into a verifiable, gap-free sequence without every record
    /// carrying its own position.
    Changes {
        /// The site that streamed this batch.
        from: SiteId,
        /// Cursor position the batch resumes from.
        seq_start: SeqPair,
        /// Position of the last record in the batch.
        seq_end: SeqPair,
        /// The records, in origination order.
        changes: Vec<Change>,
    },

    /// Ask the peer to resume streaming from `seq_start`.
    Request {
        /// The position the requester has applied up to.
        seq_start: SeqPair,
    },
}

impl Message {
    /// The wire discriminant for this variant.
    pub fn tag(&self) -> u8 {
        match self {
            Message::Ack { .. } => tag::ACK,
            Message::Establish { .. } => tag::ESTABLISH,
            Message::Changes { .. } => tag::CHANGES,
            Message::Request { .. } => tag::REQUEST,
        }
    }
}
