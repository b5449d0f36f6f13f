//! # Tidewire Core
//!
//! Pure data model for the tidewire synchronization layer: sequence pairs,
//! site identities, and changeset records.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over replication metadata.
//!
//! ## Key Types
//!
//! - [`SeqPair`] - A position in a peer's change history
//! - [`SiteId`] - A replica identity participating in synchronization
//! - [`Change`] - One row-level, column-level mutation

pub mod change;
pub mod types;

pub use change::Change;
pub use types::{SeqPair, SiteId};
