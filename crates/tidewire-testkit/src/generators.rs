//! Proptest generators for property-based testing.

use proptest::prelude::*;

use tidewire_core::{Change, SeqPair, SiteId};

/// Generate a random SiteId.
pub fn site_id() -> impl Strategy<Value = SiteId> {
    any::<[u8; 16]>().prop_map(SiteId::from_bytes)
}

/// Generate a sequence position with a non-negative version.
pub fn seq_pair() -> impl Strategy<Value = SeqPair> {
    (0i64..=i64::MAX / 2, 0u32..=16u32).prop_map(|(version, sub)| SeqPair::new(version, sub))
}

/// Generate an SQL-ish identifier.
pub fn identifier() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}".prop_map(String::from)
}

/// Generate a single change record.
pub fn change() -> impl Strategy<Value = Change> {
    (
        identifier(),
        "[a-zA-Z0-9'|,]{1,24}",
        identifier(),
        "[a-zA-Z0-9' ]{0,32}",
        0i64..=1000i64,
        0i64..=i64::MAX / 2,
    )
        .prop_map(|(table, pks, cid, val, col_version, db_version)| Change {
            table,
            pks,
            cid,
            val,
            col_version,
            db_version,
        })
}

/// Generate up to `max` change records.
pub fn changes(max: usize) -> impl Strategy<Value = Vec<Change>> {
    prop::collection::vec(change(), 0..=max)
}
