//! # Tidewire Store
//!
//! The storage-engine boundary for the tidewire sync layer.
//!
//! The sync layer treats the local mutable store as an external collaborator
//! reachable only through [`ChangeStore`]: pull the delta since a cursor,
//! apply a remote batch, subscribe to mutation notifications, bootstrap a
//! replica. Conflict resolution (last-writer-wins by version) and apply
//! idempotency are owned by the store, not by the protocol.
//!
//! [`MemoryDb`] is the in-memory reference implementation used throughout
//! the test suites.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryDb;
pub use traits::{ChangeListener, ChangeStore, Subscription};
