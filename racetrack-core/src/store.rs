//! Shared store abstraction.
//!
//! The store is the system under test. Racetrack only relies on the primitives
//! below; how an implementation keeps itself consistent (replication,
//! partitioning, isolation level) is its own business.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{EntityKey, Value};

/// Client handle to a shared keyed store.
///
/// Implementations are shared by every worker of a process, so they must be
/// `Send + Sync`. All calls may block or suspend; they are the only suspension
/// points of a worker.
#[async_trait]
pub trait SharedStore: Send + Sync + 'static {
    /// Transaction handle produced by [`begin_transaction`](Self::begin_transaction).
    type Transaction: StoreTransaction + 'static;

    /// Read the current value of `key`, `None` if it was never written.
    async fn get(&self, key: EntityKey) -> StoreResult<Option<Value>>;

    /// Unconditionally write `value` to `key`.
    async fn put(&self, key: EntityKey, value: Value) -> StoreResult<()>;

    /// Compare-and-swap: write `new` only if `key` currently holds `expected`.
    ///
    /// Returns `Ok(false)` when the stored value differs.
    async fn replace(&self, key: EntityKey, expected: Value, new: Value) -> StoreResult<bool>;

    /// Acquire the exclusive lock scoped to `key`, waiting as long as needed.
    async fn lock(&self, key: EntityKey) -> StoreResult<()>;

    /// Release the lock scoped to `key`.
    async fn unlock(&self, key: EntityKey) -> StoreResult<()>;

    /// Start a new transaction.
    async fn begin_transaction(&self) -> StoreResult<Self::Transaction>;
}

/// An open transaction.
///
/// Reads and writes go through the transaction's isolated view. After
/// [`commit`](Self::commit) fails the caller is expected to call
/// [`rollback`](Self::rollback).
#[async_trait]
pub trait StoreTransaction: Send {
    /// Read `key` through the transaction's view.
    async fn get(&mut self, key: EntityKey) -> StoreResult<Option<Value>>;

    /// Buffer a write of `value` to `key`.
    async fn put(&mut self, key: EntityKey, value: Value) -> StoreResult<()>;

    /// Make the buffered writes visible atomically.
    async fn commit(&mut self) -> StoreResult<()>;

    /// Discard the buffered writes.
    async fn rollback(&mut self) -> StoreResult<()>;
}
