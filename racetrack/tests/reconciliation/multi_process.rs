//! Two cooperating coordinators sharing one store and one results file.

use std::sync::Arc;
use std::time::Duration;

use racetrack::{
    Discipline, FileCollection, InMemoryStore, PhaseCoordinator, ProcessRole, StopPolicy,
    StressConfig,
};

use super::support::{assert_pass, init_tracing};

fn role(index: u32, workers: usize) -> StressConfig {
    let leader = index == 0;
    StressConfig::default()
        .workers(workers)
        .key_space(32)
        .discipline(Discipline::OptimisticCas)
        .seed(31)
        .stop(StopPolicy::iterations(300))
        .collect_timeout(Duration::from_secs(20))
        .prepare_timeout(Duration::from_secs(20))
        .process(ProcessRole {
            index,
            populate: leader,
            verify: leader,
            expected_results: leader.then_some(2 * workers),
        })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_leader_and_follower_reconcile_through_file() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let results = Arc::new(FileCollection::new(dir.path().join("results.jsonl")));
    let store = Arc::new(InMemoryStore::new());

    let follower =
        PhaseCoordinator::new(role(1, 3), store.clone()).with_collection(results.clone());
    let leader = PhaseCoordinator::new(role(0, 3), store.clone()).with_collection(results);

    let (follower, leader) = tokio::join!(follower.run(), leader.run());
    assert!(follower.expect("follower run").is_none());
    let report = leader.expect("leader run").expect("leader verifies");

    assert_pass(&report);
    assert_eq!(report.results_collected, 6);
    assert!(report.per_worker_ops.contains_key("p1-w2"));
    assert!(report.per_worker_ops.contains_key("p0-w0"));
}
