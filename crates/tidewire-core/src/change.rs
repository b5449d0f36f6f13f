//! Changeset records: the unit of replicated mutation.

use serde::{Deserialize, Serialize};

use crate::types::SeqPair;

/// One row-level, column-level change.
///
/// `db_version` is the monotonic logical clock assigned by the originating
/// store at commit time; it is the authoritative ordering key for streaming
/// cursors. `col_version` is the per-cell version used by the store's
/// last-writer-wins merge.
///
/// The originating site is deliberately NOT embedded in the record: in the
/// client–server framing the `Changes` message's `from` field carries
/// provenance for the whole batch, and the receiver always knows which site
/// sent it. Peer-to-peer topologies, where provenance cannot be inferred
/// from the channel, must carry the site per record and are out of scope for
/// this framing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Table the changed row belongs to.
    pub table: String,
    /// Concatenated (quoted) primary key values identifying the row.
    pub pks: String,
    /// Column identifier within the row.
    pub cid: String,
    /// The new cell value.
    pub val: String,
    /// Per-cell version for last-writer-wins merging.
    pub col_version: i64,
    /// Originating store's commit clock at the time of this change.
    pub db_version: i64,
}

impl Change {
    /// The streaming position of this record.
    ///
    /// Sub-index 0: transaction splitting is not produced yet, but the slot
    /// is preserved in the sequence pair.
    pub fn seq(&self) -> SeqPair {
        SeqPair::new(self.db_version, 0)
    }
}
