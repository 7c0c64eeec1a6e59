//! Optimistic compare-and-swap retry.

use std::sync::Arc;

use async_trait::async_trait;
use racetrack_core::{EntityKey, KeyDelta, SharedStore, Value};
use tracing::trace;

use super::{
    read_existing, ConcurrencyStrategy, Discipline, Outcome, StrategyError, StrategyResult,
    StrategyStats,
};

/// Read, compute, `replace`; on a lost race read again and retry.
///
/// Retries are unbounded by default.
/// [`with_max_attempts`](Self::with_max_attempts) turns exhaustion into a fatal
/// [`StrategyError::RetriesExhausted`].
pub struct OptimisticStrategy<S> {
    store: Arc<S>,
    max_attempts: Option<u64>,
    stats: StrategyStats,
}

impl<S: SharedStore> OptimisticStrategy<S> {
    /// Create an unbounded CAS strategy over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            max_attempts: None,
            stats: StrategyStats::default(),
        }
    }

    /// Give up (fatally) after `max_attempts` lost races on a single key.
    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    async fn compare_and_add(&mut self, key: EntityKey, delta: Value) -> StrategyResult<()> {
        let mut attempts: u64 = 0;
        loop {
            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    return Err(StrategyError::RetriesExhausted { key, attempts });
                }
            }

            let current = read_existing(self.store.as_ref(), key).await?;
            let candidate = current + delta;
            attempts += 1;
            self.stats.cas_attempts += 1;

            match self.store.replace(key, current, candidate).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) if e.is_contention() => {}
                Err(e) => return Err(e.into()),
            }
            self.stats.cas_misses += 1;
            trace!(%key, attempts, "cas miss, retrying");
        }
    }
}

#[async_trait]
impl<S: SharedStore> ConcurrencyStrategy for OptimisticStrategy<S> {
    fn discipline(&self) -> Discipline {
        Discipline::OptimisticCas
    }

    async fn apply_delta(&mut self, key: EntityKey, delta: Value) -> StrategyResult<Outcome> {
        self.compare_and_add(key, delta).await?;
        Ok(Outcome::Applied)
    }

    /// Legs are applied one after the other. A CAS leg never skips, so the
    /// batch can only stop half-way on a fatal error.
    async fn apply_batch(&mut self, batch: &[KeyDelta]) -> StrategyResult<Outcome> {
        for change in batch {
            self.compare_and_add(change.key, change.delta).await?;
        }
        Ok(Outcome::Applied)
    }

    fn stats(&self) -> &StrategyStats {
        &self.stats
    }
}
