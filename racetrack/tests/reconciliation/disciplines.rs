//! Single-key correctness of each discipline under real concurrency.

use std::sync::Arc;

use racetrack::{
    ConcurrencyStrategy, Discipline, InMemoryStore, Outcome, StoreFaults, StrategyStats,
};
use racetrack_core::{EntityKey, SharedStore};

const KEY: EntityKey = EntityKey(0);

/// `tasks` concurrent strategies, each applying `deltas` to [`KEY`].
///
/// Returns the sum of applied deltas, the number of applied calls and the
/// summed strategy stats.
async fn hammer(
    store: Arc<InMemoryStore>,
    discipline: Discipline,
    tasks: usize,
    deltas: Vec<i64>,
) -> (i64, u64, StrategyStats) {
    let handles: Vec<_> = (0..tasks)
        .map(|_| {
            let mut strategy = discipline.build(store.clone(), None);
            let deltas = deltas.clone();
            tokio::spawn(async move {
                let mut applied_sum: i64 = 0;
                let mut applied: u64 = 0;
                for delta in deltas {
                    let outcome = strategy.apply_delta(KEY, delta).await.expect("no fatal error");
                    if outcome == Outcome::Applied {
                        applied_sum += delta;
                        applied += 1;
                    }
                }
                (applied_sum, applied, strategy.stats().clone())
            })
        })
        .collect();

    let mut sum = 0;
    let mut applied = 0;
    let mut stats = StrategyStats::default();
    for handle in handles {
        let (s, a, st) = handle.await.expect("task panicked");
        sum += s;
        applied += a;
        stats.merge(&st);
    }
    (sum, applied, stats)
}

fn deltas() -> Vec<i64> {
    (0..200).map(|i| (i % 7) - 2).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_locking_applies_every_call() {
    let store = Arc::new(InMemoryStore::new());
    store.put(KEY, 100).await.expect("put");

    let (sum, applied, stats) = hammer(store.clone(), Discipline::Locking, 8, deltas()).await;
    assert_eq!(applied, 8 * 200);
    assert_eq!(sum, 8 * deltas().iter().sum::<i64>());
    assert_eq!(store.get(KEY).await, Ok(Some(100 + sum)));
    assert_eq!(stats.locks_acquired, 8 * 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cas_applies_every_call_and_retries() {
    let store = Arc::new(InMemoryStore::new());
    store.put(KEY, -5).await.expect("put");

    let (sum, applied, stats) =
        hammer(store.clone(), Discipline::OptimisticCas, 8, deltas()).await;
    assert_eq!(applied, 8 * 200);
    assert_eq!(store.get(KEY).await, Ok(Some(-5 + sum)));
    assert!(stats.cas_attempts >= applied);
    assert_eq!(stats.cas_attempts - stats.cas_misses, applied);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transactional_counts_only_applied() {
    let store = Arc::new(InMemoryStore::with_faults(StoreFaults::conflicts(0.2), 17));
    store.put(KEY, 0).await.expect("put");

    let increments = vec![1; 150];
    let (sum, applied, stats) =
        hammer(store.clone(), Discipline::Transactional, 6, increments).await;
    assert_eq!(sum, applied as i64);
    assert!(applied < 6 * 150, "injected conflicts must skip some calls");
    assert_eq!(store.get(KEY).await, Ok(Some(sum)));
    assert_eq!(stats.transactions_begun, 6 * 150);
    assert_eq!(stats.commit_conflicts, 6 * 150 - applied);
}
