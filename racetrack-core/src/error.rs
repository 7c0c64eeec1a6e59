use thiserror::Error;

use crate::types::EntityKey;

/// Errors surfaced by a [`SharedStore`](crate::SharedStore) implementation.
///
/// Only [`StoreError::Conflict`] is contention: the protocol may roll back and
/// carry on. Every other variant is fatal for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A concurrent writer invalidated this operation (commit conflict, stale read).
    #[error("conflict: {0}")]
    Conflict(String),
    /// The store cannot be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The key holds no value. Prepare populates every key, so this is data loss.
    #[error("{0} has no value")]
    MissingKey(EntityKey),
    /// `unlock` was called on a key that is not locked.
    #[error("{0} is not locked")]
    NotLocked(EntityKey),
    /// The transaction was already committed or rolled back.
    #[error("transaction already closed")]
    TransactionClosed,
}

impl StoreError {
    /// Whether this error is expected under contention and handled by the protocol.
    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// A type alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;
