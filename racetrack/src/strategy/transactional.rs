//! Transactional commit/rollback.

use std::sync::Arc;

use async_trait::async_trait;
use racetrack_core::{
    EntityKey, KeyDelta, SharedStore, StoreError, StoreResult, StoreTransaction, Value,
};
use tracing::{debug, warn};

use super::{ConcurrencyStrategy, Discipline, Outcome, SkipReason, StrategyResult, StrategyStats};

/// Read-modify-write inside a store transaction.
///
/// `Applied` is only returned after the commit succeeded. A contention failure
/// in the body or at commit triggers a rollback and yields
/// [`Outcome::Skipped`]; whether the rollback itself worked is reported
/// through [`SkipReason`].
pub struct TransactionalStrategy<S> {
    store: Arc<S>,
    stats: StrategyStats,
}

impl<S: SharedStore> TransactionalStrategy<S> {
    /// Create a transactional strategy over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            stats: StrategyStats::default(),
        }
    }

    async fn stage(tx: &mut S::Transaction, batch: &[KeyDelta]) -> StoreResult<()> {
        for change in batch {
            let current = tx
                .get(change.key)
                .await?
                .ok_or(StoreError::MissingKey(change.key))?;
            tx.put(change.key, current + change.delta).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: SharedStore> ConcurrencyStrategy for TransactionalStrategy<S> {
    fn discipline(&self) -> Discipline {
        Discipline::Transactional
    }

    async fn apply_delta(&mut self, key: EntityKey, delta: Value) -> StrategyResult<Outcome> {
        self.apply_batch(&[KeyDelta::new(key, delta)]).await
    }

    async fn apply_batch(&mut self, batch: &[KeyDelta]) -> StrategyResult<Outcome> {
        let mut tx = self.store.begin_transaction().await?;
        self.stats.transactions_begun += 1;

        let attempt = match Self::stage(&mut tx, batch).await {
            Ok(()) => tx.commit().await,
            Err(e) => Err(e),
        };

        match attempt {
            Ok(()) => Ok(Outcome::Applied),
            Err(e) if e.is_contention() => {
                self.stats.commit_conflicts += 1;
                match tx.rollback().await {
                    Ok(()) => {
                        debug!(error = %e, legs = batch.len(), "transaction rolled back");
                        Ok(Outcome::Skipped(SkipReason::RolledBack))
                    }
                    Err(rollback_error) => {
                        warn!(
                            error = %e,
                            rollback_error = %rollback_error,
                            legs = batch.len(),
                            "rollback failed, store state for this delta is unknown"
                        );
                        Ok(Outcome::Skipped(SkipReason::RollbackFailed))
                    }
                }
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    debug!(%rollback_error, "best-effort rollback after fatal error failed");
                }
                Err(e.into())
            }
        }
    }

    fn stats(&self) -> &StrategyStats {
        &self.stats
    }
}
