//! Runs against a store that injects failures.

use racetrack::{Discipline, OperationWeights, StopPolicy, StoreFaults, StressConfig, Verdict};

use super::support::{assert_pass, run_on_fresh_store};

fn transactional(key_space: u64, faults: StoreFaults) -> StressConfig {
    StressConfig::default()
        .workers(4)
        .key_space(key_space)
        .discipline(Discipline::Transactional)
        .weights(OperationWeights::increments_only())
        .seed(4242)
        .stop(StopPolicy::iterations(250))
        .store_faults(faults)
}

fn reasons(verdict: &Verdict) -> &[String] {
    match verdict {
        Verdict::Inconclusive { reasons } => reasons,
        other => panic!("expected an inconclusive verdict, got {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_injected_conflicts_still_reconcile() {
    let (report, store) = run_on_fresh_store(transactional(8, StoreFaults::conflicts(0.3))).await;
    assert_pass(&report);
    let injected = store.fault_counts().commit_conflicts;
    assert!(injected > 0);
    assert!(report.counters.rollbacks >= injected);
    assert_eq!(report.counters.failed_rollbacks, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ambiguous_commit_is_never_a_pass() {
    let faults = StoreFaults {
        ambiguous_commit_probability: 0.1,
        ..StoreFaults::default()
    };
    let (report, store) = run_on_fresh_store(transactional(1, faults)).await;

    let ambiguous = store.fault_counts().ambiguous_commits;
    assert!(ambiguous > 0);
    assert!(!report.is_pass(), "{report}");
    assert_eq!(report.counters.failed_rollbacks, ambiguous);
    assert!(reasons(&report.verdict)[0].contains("rollback(s) failed"));
    // The store holds writes no ledger recorded.
    assert_eq!(report.mismatches.len(), 1);
    let mismatch = report.mismatches[0];
    assert_eq!(mismatch.actual, Some(mismatch.expected + ambiguous as i64));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_rollbacks_make_run_inconclusive() {
    let faults = StoreFaults {
        commit_conflict_probability: 0.5,
        rollback_failure_probability: 0.5,
        ..StoreFaults::default()
    };
    let (report, store) = run_on_fresh_store(transactional(4, faults)).await;

    let failed = store.fault_counts().rollback_failures;
    assert!(failed > 0);
    assert_eq!(report.counters.failed_rollbacks, failed);
    // Injected conflicts apply nothing, so the values still reconcile.
    assert!(report.mismatches.is_empty());
    assert!(!reasons(&report.verdict).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fatal_store_errors_are_inconclusive() {
    for discipline in Discipline::ALL {
        let faults = StoreFaults {
            fatal_probability: 0.01,
            ..StoreFaults::default()
        };
        let config = StressConfig::default()
            .workers(4)
            .key_space(16)
            .discipline(discipline)
            .seed(7)
            .stop(StopPolicy::iterations(2_000))
            .store_faults(faults);
        let (report, store) = run_on_fresh_store(config).await;

        assert!(store.fault_counts().fatal > 0);
        assert_eq!(report.results_collected, 4, "failed workers still publish");
        let reasons = reasons(&report.verdict);
        assert!(reasons.iter().any(|r| r.contains("failed")), "{reasons:?}");
    }
}
