//! Shared helpers for reconciliation tests.

use std::sync::Arc;

use racetrack::{InMemoryStore, PhaseCoordinator, RunReport, StressConfig};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

/// Run `config` on a fresh store built with its fault settings.
pub async fn run_on_fresh_store(config: StressConfig) -> (RunReport, InMemoryStore) {
    init_tracing();
    let store = InMemoryStore::with_faults(config.store_faults.clone(), config.seed.unwrap_or(0));
    let report = PhaseCoordinator::new(config, Arc::new(store.clone()))
        .run()
        .await
        .expect("run should not error")
        .expect("single process verifies");
    (report, store)
}

pub fn assert_pass(report: &RunReport) {
    assert!(report.is_pass(), "expected a passing run:\n{report}");
    assert!(report.mismatches.is_empty());
}
