//! End-to-end reconciliation scenarios.

use std::sync::Arc;

use racetrack::{
    ConfigError, DeltaRange, Discipline, InMemoryStore, KeyDistribution, Operation,
    OperationWeights, PhaseCoordinator, RunReport, StopPolicy, StressConfig, StressError,
    Verdict,
};
use racetrack_core::{EntityKey, SharedStore};

use super::support::{assert_pass, init_tracing, run_on_fresh_store};

fn matrix_config(discipline: Discipline, workers: usize, key_space: u64) -> StressConfig {
    StressConfig::default()
        .workers(workers)
        .key_space(key_space)
        .discipline(discipline)
        .delta(DeltaRange { min: 1, max: 5 })
        .seed(0x5EED ^ (workers as u64) ^ key_space)
        .stop(StopPolicy::iterations(150))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconciliation_matrix() {
    for discipline in Discipline::ALL {
        for workers in [1, 4, 32] {
            for key_space in [1, 1000] {
                let (report, store) =
                    run_on_fresh_store(matrix_config(discipline, workers, key_space)).await;
                assert_pass(&report);
                assert_eq!(report.results_collected, workers);
                assert_eq!(report.counters.failed_rollbacks, 0);
                assert_eq!(store.snapshot().len() as u64, key_space);

                let draws: u64 = report.counters.op_counts.values().sum();
                assert_eq!(draws, workers as u64 * 150, "{discipline} K={workers} S={key_space}");
                if discipline != Discipline::Transactional {
                    assert_eq!(report.counters.rollbacks, 0);
                    assert_eq!(report.counters.commits, report.counters.attempts);
                }
            }
        }
    }
}

async fn ten_workers_thousand_increments(discipline: Discipline) -> (RunReport, i64) {
    let config = StressConfig::default()
        .workers(10)
        .key_space(1)
        .discipline(discipline)
        .weights(OperationWeights::increments_only())
        .seed(10_000)
        .stop(StopPolicy::iterations(1000));
    let (report, store) = run_on_fresh_store(config).await;
    let value = store
        .get(EntityKey(0))
        .await
        .expect("get")
        .expect("populated");
    (report, value)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_workers_locking_reach_ten_thousand() {
    let (report, value) = ten_workers_thousand_increments(Discipline::Locking).await;
    assert_pass(&report);
    assert_eq!(value, 10_000);
    assert_eq!(report.strategy.locks_acquired, 10_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_workers_cas_reach_ten_thousand() {
    let (report, value) = ten_workers_thousand_increments(Discipline::OptimisticCas).await;
    assert_pass(&report);
    assert_eq!(value, 10_000);
    assert!(report.strategy.cas_attempts >= 10_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_workers_transactional_reconcile_commits() {
    let (report, value) = ten_workers_thousand_increments(Discipline::Transactional).await;
    assert_pass(&report);
    assert_eq!(value, report.counters.commits as i64);
    assert_eq!(report.counters.commits + report.counters.rollbacks, 10_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hotspot_transfers_reconcile() {
    for discipline in Discipline::ALL {
        let config = StressConfig::default()
            .workers(8)
            .key_space(64)
            .discipline(discipline)
            .weights(OperationWeights::transfer_focused())
            .key_distribution(KeyDistribution::Hotspot {
                hot_keys: 2,
                hot_probability: 0.9,
            })
            .initial_value(1_000)
            .seed(99)
            .stop(StopPolicy::iterations(200));
        let (report, _) = run_on_fresh_store(config).await;
        assert_pass(&report);
        assert!(report.counters.op_counts[&Operation::Transfer] > 0);
    }
}

#[tokio::test]
async fn test_invalid_weights_rejected_before_prepare() {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let config = StressConfig::default().weights(OperationWeights {
        decrement: -0.1,
        read: 0.0,
        transfer: 0.0,
    });
    let err = PhaseCoordinator::new(config, store.clone())
        .run()
        .await
        .expect_err("negative weight");
    assert!(matches!(err, StressError::Config(ConfigError::Weights(_))));
    assert!(store.snapshot().is_empty(), "nothing may be written");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_same_seed_same_histogram() {
    let config = || {
        StressConfig::default()
            .workers(1)
            .key_space(16)
            .seed(7)
            .stop(StopPolicy::iterations(500))
    };
    let (first, _) = run_on_fresh_store(config()).await;
    let (second, _) = run_on_fresh_store(config()).await;
    assert_eq!(first.verdict, Verdict::Pass);
    assert_eq!(first.counters.op_counts, second.counters.op_counts);
    assert_eq!(first.per_worker_ops, second.per_worker_ops);
}
