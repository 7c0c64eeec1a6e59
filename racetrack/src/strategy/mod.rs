//! Concurrency disciplines for read-modify-write against the shared store.
//!
//! Every discipline exposes the same contract through [`ConcurrencyStrategy`]:
//! apply a delta and report [`Outcome::Applied`] or [`Outcome::Skipped`].
//! Anything else is a fatal [`StrategyError`].
//!
//! | Discipline | Serialises writers with | Can skip? |
//! |------------|-------------------------|-----------|
//! | [`LockingStrategy`] | per-key exclusive lock | no |
//! | [`OptimisticStrategy`] | compare-and-swap retry loop | no |
//! | [`TransactionalStrategy`] | store transaction isolation | yes, after rollback |
//!
//! A strategy instance belongs to one worker, so its [`StrategyStats`] are
//! plain counters mutated through `&mut self`.

mod locking;
mod optimistic;
mod transactional;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use racetrack_core::{EntityKey, KeyDelta, SharedStore, StoreError, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use locking::LockingStrategy;
pub use optimistic::OptimisticStrategy;
pub use transactional::TransactionalStrategy;

/// Why a mutation was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The commit failed and the rollback succeeded. Nothing changed.
    RolledBack,
    /// The commit failed and so did the rollback. The store state relative to
    /// this delta is unknown.
    RollbackFailed,
}

/// Result of applying a delta (or batch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The store confirmed the mutation. Safe to record.
    Applied,
    /// The mutation did not go through. Must not be recorded.
    Skipped(SkipReason),
}

impl Outcome {
    /// Whether the mutation was confirmed.
    pub fn is_applied(self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

/// Fatal strategy failures. Contention never shows up here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    /// The store failed with a non-contention error.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The optional CAS attempt budget ran out.
    #[error("compare-and-swap on {key} gave up after {attempts} attempts")]
    RetriesExhausted {
        /// Contended key.
        key: EntityKey,
        /// Attempts made.
        attempts: u64,
    },
}

/// A type alias for `Result<T, StrategyError>`.
pub type StrategyResult<T> = Result<T, StrategyError>;

/// Which discipline a strategy implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    /// Pessimistic per-key locking.
    #[default]
    Locking,
    /// Optimistic compare-and-swap retry.
    OptimisticCas,
    /// Transactional commit/rollback.
    Transactional,
}

impl Discipline {
    /// All disciplines, in a stable order.
    pub const ALL: [Discipline; 3] = [
        Discipline::Locking,
        Discipline::OptimisticCas,
        Discipline::Transactional,
    ];

    /// Build a strategy of this discipline over `store`.
    ///
    /// `cas_max_attempts` only affects [`Discipline::OptimisticCas`].
    pub fn build<S: SharedStore>(
        self,
        store: Arc<S>,
        cas_max_attempts: Option<u64>,
    ) -> Box<dyn ConcurrencyStrategy> {
        match self {
            Discipline::Locking => Box::new(LockingStrategy::new(store)),
            Discipline::OptimisticCas => {
                let strategy = OptimisticStrategy::new(store);
                Box::new(match cas_max_attempts {
                    Some(max) => strategy.with_max_attempts(max),
                    None => strategy,
                })
            }
            Discipline::Transactional => Box::new(TransactionalStrategy::new(store)),
        }
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Discipline::Locking => "locking",
            Discipline::OptimisticCas => "optimistic-cas",
            Discipline::Transactional => "transactional",
        };
        f.write_str(name)
    }
}

/// Store-protocol counters kept by a strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStats {
    /// Locks acquired.
    pub locks_acquired: u64,
    /// `replace` calls issued.
    pub cas_attempts: u64,
    /// `replace` calls that lost the race.
    pub cas_misses: u64,
    /// Transactions started.
    pub transactions_begun: u64,
    /// Commits (or transactional reads/writes) rejected as conflicts.
    pub commit_conflicts: u64,
}

impl StrategyStats {
    /// Add another strategy's counters into these.
    pub fn merge(&mut self, other: &StrategyStats) {
        self.locks_acquired += other.locks_acquired;
        self.cas_attempts += other.cas_attempts;
        self.cas_misses += other.cas_misses;
        self.transactions_begun += other.transactions_begun;
        self.commit_conflicts += other.commit_conflicts;
    }
}

/// One update protocol, owned by one worker.
#[async_trait]
pub trait ConcurrencyStrategy: Send {
    /// Discipline implemented by this strategy.
    fn discipline(&self) -> Discipline;

    /// Add `delta` to the value stored at `key`.
    async fn apply_delta(&mut self, key: EntityKey, delta: Value) -> StrategyResult<Outcome>;

    /// Apply every delta of `batch`, all or nothing.
    ///
    /// On [`Outcome::Applied`] every leg is applied; on
    /// [`Outcome::Skipped`] none is.
    async fn apply_batch(&mut self, batch: &[KeyDelta]) -> StrategyResult<Outcome>;

    /// Counters accumulated so far.
    fn stats(&self) -> &StrategyStats;
}

/// Read `key`, treating a missing value as fatal data loss.
pub(crate) async fn read_existing<S: SharedStore>(
    store: &S,
    key: EntityKey,
) -> StrategyResult<Value> {
    store
        .get(key)
        .await?
        .ok_or(StrategyError::Store(StoreError::MissingKey(key)))
}
