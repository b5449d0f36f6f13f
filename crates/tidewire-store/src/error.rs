//! Error types for the store boundary.

use thiserror::Error;

/// Errors surfaced by a [`crate::ChangeStore`] implementation.
///
/// Storage-engine failures must propagate as distinguishable errors rather
/// than being absorbed; the sync layer scopes them to a single stream/peer
/// relationship.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A replica bootstrap named a schema the store does not know.
    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    /// Backend failure (I/O, corruption, migration conflict).
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
