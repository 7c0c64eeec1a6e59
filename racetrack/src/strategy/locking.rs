//! Pessimistic per-key locking.

use std::sync::Arc;

use async_trait::async_trait;
use racetrack_core::{EntityKey, KeyDelta, SharedStore, Value};
use tracing::trace;

use super::{
    read_existing, ConcurrencyStrategy, Discipline, Outcome, StrategyResult, StrategyStats,
};

/// Read-modify-write under the store's exclusive per-key lock.
///
/// No two locking critical sections on the same key overlap, so every call
/// returns [`Outcome::Applied`] unless the store fails fatally.
pub struct LockingStrategy<S> {
    store: Arc<S>,
    stats: StrategyStats,
}

impl<S: SharedStore> LockingStrategy<S> {
    /// Create a locking strategy over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            stats: StrategyStats::default(),
        }
    }

    async fn read_modify_write(&self, batch: &[KeyDelta]) -> StrategyResult<()> {
        for change in batch {
            let current = read_existing(self.store.as_ref(), change.key).await?;
            self.store.put(change.key, current + change.delta).await?;
        }
        Ok(())
    }

    /// Release `held` in reverse acquisition order, reporting the first failure.
    async fn release(&self, held: &[EntityKey]) -> StrategyResult<()> {
        let mut first_error = None;
        for key in held.iter().rev() {
            if let Err(e) = self.store.unlock(*key).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<S: SharedStore> ConcurrencyStrategy for LockingStrategy<S> {
    fn discipline(&self) -> Discipline {
        Discipline::Locking
    }

    async fn apply_delta(&mut self, key: EntityKey, delta: Value) -> StrategyResult<Outcome> {
        self.apply_batch(&[KeyDelta::new(key, delta)]).await
    }

    async fn apply_batch(&mut self, batch: &[KeyDelta]) -> StrategyResult<Outcome> {
        // Key order is global, so two batches never wait on each other in a cycle.
        let mut keys: Vec<EntityKey> = batch.iter().map(|change| change.key).collect();
        keys.sort_unstable();
        keys.dedup();

        let mut held = Vec::with_capacity(keys.len());
        let mut result: StrategyResult<()> = Ok(());
        for key in keys {
            match self.store.lock(key).await {
                Ok(()) => {
                    self.stats.locks_acquired += 1;
                    held.push(key);
                }
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            }
        }

        if result.is_ok() {
            result = self.read_modify_write(batch).await;
        }

        // Unlock runs on every path out of the critical section.
        let released = self.release(&held).await;
        trace!(locks = held.len(), ok = result.is_ok(), "locked batch done");
        result?;
        released?;
        Ok(Outcome::Applied)
    }

    fn stats(&self) -> &StrategyStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::scripted::ScriptedStore;
    use crate::store::InMemoryStore;
    use crate::strategy::StrategyError;
    use racetrack_core::StoreError;
    use std::time::Duration;

    const RELOCK: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn test_batch_applies_every_leg() {
        let store = Arc::new(InMemoryStore::new());
        for key in EntityKey::space(2) {
            store.put(key, 10).await.expect("put");
        }
        let mut strategy = LockingStrategy::new(store.clone());
        let batch = [
            KeyDelta::new(EntityKey(1), -4),
            KeyDelta::new(EntityKey(0), 4),
        ];
        assert_eq!(strategy.apply_batch(&batch).await, Ok(Outcome::Applied));
        assert_eq!(store.get(EntityKey(0)).await, Ok(Some(14)));
        assert_eq!(store.get(EntityKey(1)).await, Ok(Some(6)));
        assert_eq!(strategy.stats().locks_acquired, 2);
    }

    #[tokio::test]
    async fn test_missing_key_fails_and_releases_lock() {
        let store = Arc::new(InMemoryStore::new());
        let mut strategy = LockingStrategy::new(store.clone());
        assert_eq!(
            strategy.apply_delta(EntityKey(5), 1).await,
            Err(StrategyError::Store(StoreError::MissingKey(EntityKey(5))))
        );

        tokio::time::timeout(RELOCK, store.lock(EntityKey(5)))
            .await
            .expect("lock was left held")
            .expect("lock");
        store.unlock(EntityKey(5)).await.expect("unlock");
    }

    #[tokio::test]
    async fn test_failed_second_lock_releases_first() {
        let store = Arc::new(ScriptedStore::refusing_lock(EntityKey(1)));
        store.populate(2, 0).await;
        let mut strategy = LockingStrategy::new(store.clone());
        let batch = [
            KeyDelta::new(EntityKey(0), 3),
            KeyDelta::new(EntityKey(1), -3),
        ];
        let err = strategy.apply_batch(&batch).await.expect_err("lock refused");
        assert!(matches!(
            err,
            StrategyError::Store(StoreError::Unavailable(_))
        ));
        assert_eq!(strategy.stats().locks_acquired, 1);
        assert_eq!(store.snapshot().values().sum::<Value>(), 0, "nothing written");

        tokio::time::timeout(RELOCK, store.lock(EntityKey(0)))
            .await
            .expect("first lock was left held")
            .expect("lock");
        store.unlock(EntityKey(0)).await.expect("unlock");
    }
}
