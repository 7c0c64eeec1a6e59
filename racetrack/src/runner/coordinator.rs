//! Phase coordination: Prepare → Run → Collect → Verify.
//!
//! ## Barriers
//!
//! - No worker starts before Prepare completes. A populating process writes
//!   every key itself; a follower polls until every key is readable.
//! - Verify starts only once every local worker is joined and Collect holds
//!   the expected number of results (or its timeout elapsed).
//!
//! ## Failures
//!
//! Configuration errors are returned before any side effect. Store errors
//! during Prepare or Verify are returned as errors. Worker failures are not:
//! they make the verdict inconclusive but Verify still runs.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use racetrack_core::{
    EntityKey, RandomProvider, SeededRandomProvider, SharedStore, ThreadRandomProvider,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collection::{InMemoryCollection, ResultCollection};
use crate::config::{ConfigError, StressConfig};
use crate::error::{StressError, StressResult};
use crate::ledger::{WorkerId, WorkerRunResult};
use crate::workload::OperationPlanner;

use super::report::RunReport;
use super::verify::{inconclusive_reasons, reconcile, AggregateExpectation, Verdict};
use super::worker::{Worker, WorkerPlan};

/// Coordinator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorPhase {
    /// Populating or waiting for the key space.
    Prepare,
    /// Workers running.
    Run,
    /// Gathering published results.
    Collect,
    /// Reconciling.
    Verify,
    /// Finished.
    Done,
}

impl fmt::Display for CoordinatorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

type WorkerHandle = (WorkerId, JoinHandle<StressResult<WorkerRunResult>>);

/// Drives one process through a stress run.
pub struct PhaseCoordinator<S> {
    config: StressConfig,
    store: Arc<S>,
    collection: Arc<dyn ResultCollection>,
    shutdown: CancellationToken,
    phase: CoordinatorPhase,
}

impl<S: SharedStore> PhaseCoordinator<S> {
    /// Coordinate a run against `store`, collecting results in memory.
    pub fn new(config: StressConfig, store: Arc<S>) -> Self {
        Self {
            config,
            store,
            collection: Arc::new(InMemoryCollection::new()),
            shutdown: CancellationToken::new(),
            phase: CoordinatorPhase::Prepare,
        }
    }

    /// Publish and collect through `collection` instead.
    pub fn with_collection(mut self, collection: Arc<dyn ResultCollection>) -> Self {
        self.collection = collection;
        self
    }

    /// Token that stops the Run phase early when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Current phase.
    pub fn phase(&self) -> CoordinatorPhase {
        self.phase
    }

    fn enter(&mut self, phase: CoordinatorPhase) {
        info!(from = %self.phase, to = %phase, "coordinator phase");
        self.phase = phase;
    }

    /// Run every phase.
    ///
    /// Returns `Ok(None)` when this process does not have the verify role.
    pub async fn run(mut self) -> StressResult<Option<RunReport>> {
        self.config.validate()?;
        let selector = Arc::new(self.config.weights.selector().map_err(ConfigError::from)?);

        let seed = self
            .config
            .seed
            .unwrap_or_else(|| ThreadRandomProvider.random_range(0..u64::MAX));
        info!(
            seed,
            discipline = %self.config.discipline,
            workers = self.config.workers,
            key_space = self.config.key_space,
            "starting stress run"
        );
        let started = Instant::now();

        self.prepare().await?;

        self.enter(CoordinatorPhase::Run);
        let plan = WorkerPlan {
            selector,
            planner: Arc::new(OperationPlanner::new(
                self.config.key_space,
                self.config.key_distribution.clone(),
                self.config.delta,
            )),
            collection: self.collection.clone(),
            stop: self.shutdown.child_token(),
            iterations: self.config.stop.iterations_per_worker,
        };
        let handles = self.spawn_workers(&plan, seed);
        let worker_failures = self.await_workers(handles, &plan.stop).await;

        self.enter(CoordinatorPhase::Collect);
        let results = self.collect().await?;

        if !self.config.process.verify {
            self.enter(CoordinatorPhase::Done);
            return Ok(None);
        }

        self.enter(CoordinatorPhase::Verify);
        let expected_results = self.config.expected_results();
        let expectation = AggregateExpectation::from_results(&results);
        let mismatches = reconcile(
            self.store.as_ref(),
            &expectation,
            self.config.key_space,
            self.config.initial_value,
        )
        .await?;
        let reasons = inconclusive_reasons(&results, expected_results, &worker_failures);
        let verdict = Verdict::decide(reasons, &mismatches);

        let (counters, strategy, per_worker_ops) = RunReport::summarize(&results);
        let report = RunReport {
            discipline: self.config.discipline,
            verdict,
            mismatches,
            seed,
            workers: self.config.workers,
            key_space: self.config.key_space,
            results_collected: results.len(),
            results_expected: expected_results,
            counters,
            strategy,
            per_worker_ops,
            wall_time: started.elapsed(),
        };
        info!(
            verdict = %report.verdict,
            mismatches = report.mismatches.len(),
            commits = report.counters.commits,
            "verification finished"
        );

        self.enter(CoordinatorPhase::Done);
        Ok(Some(report))
    }

    async fn prepare(&self) -> StressResult<()> {
        let key_space = self.config.key_space;
        if self.config.process.populate {
            for key in EntityKey::space(key_space) {
                self.store.put(key, self.config.initial_value).await?;
            }
            debug!(key_space, value = self.config.initial_value, "key space populated");
            return Ok(());
        }

        // Follower: wait for the populating process.
        let deadline = tokio::time::Instant::now() + self.config.prepare_timeout;
        loop {
            let mut missing = 0;
            for key in EntityKey::space(key_space) {
                if self.store.get(key).await?.is_none() {
                    missing += 1;
                }
            }
            if missing == 0 {
                debug!(key_space, "key space visible");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StressError::PrepareTimeout { missing });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    fn spawn_workers(&self, plan: &WorkerPlan, seed: u64) -> Vec<WorkerHandle> {
        let base = SeededRandomProvider::new(seed);
        let process = self.config.process.index;
        (0..self.config.workers)
            .map(|index| {
                let id = WorkerId::new(process, index as u32);
                let stream = (u64::from(process) << 32) | index as u64;
                let strategy = self
                    .config
                    .discipline
                    .build(self.store.clone(), self.config.cas_max_attempts);
                let worker = Worker::new(
                    id.clone(),
                    self.store.clone(),
                    strategy,
                    plan.clone(),
                    base.derive(stream),
                );
                (id, tokio::spawn(worker.run()))
            })
            .collect()
    }

    /// Wait for the stop condition, signal stop, then join every worker.
    ///
    /// Returns failures not visible in the published results.
    async fn await_workers(
        &self,
        handles: Vec<WorkerHandle>,
        stop: &CancellationToken,
    ) -> Vec<String> {
        let duration = self.config.stop.duration;
        let shutdown = self.shutdown.clone();
        let stop_condition = async move {
            match duration {
                Some(duration) => tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = shutdown.cancelled() => {}
                },
                None => shutdown.cancelled().await,
            }
        };
        tokio::pin!(stop_condition);

        let mut failures = Vec::new();
        for (id, mut handle) in handles {
            let joined = tokio::select! {
                joined = &mut handle => joined,
                _ = &mut stop_condition, if !stop.is_cancelled() => {
                    info!("stop condition reached, stopping workers");
                    stop.cancel();
                    handle.await
                }
            };
            match joined {
                Ok(Ok(_)) => {}
                // Already recorded in the published result.
                Ok(Err(StressError::Strategy(_))) => {}
                Ok(Err(e)) => {
                    error!(worker = %id, error = %e, "worker could not publish");
                    failures.push(format!("worker {id} failed: {e}"));
                }
                Err(e) => {
                    error!(worker = %id, error = %e, "worker task failed");
                    failures.push(format!("worker {id} task failed: {e}"));
                }
            }
        }
        stop.cancel();
        failures
    }

    async fn collect(&self) -> StressResult<Vec<WorkerRunResult>> {
        let expected = self.config.expected_results();
        let deadline = tokio::time::Instant::now() + self.config.collect_timeout;
        loop {
            let results = self.collection.collect_all().await?;
            if results.len() >= expected {
                debug!(collected = results.len(), "results collected");
                return Ok(results);
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    collected = results.len(),
                    expected, "collect timed out, verifying partial results"
                );
                return Ok(results);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProcessRole, StopPolicy};
    use crate::store::scripted::ScriptedStore;
    use crate::store::InMemoryStore;
    use crate::strategy::Discipline;
    use crate::workload::OperationWeights;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_duration_stop_passes() {
        let config = StressConfig::default()
            .workers(3)
            .key_space(8)
            .seed(11)
            .stop(StopPolicy::after(Duration::from_millis(100)));
        let store = Arc::new(InMemoryStore::new());
        let report = PhaseCoordinator::new(config, store)
            .run()
            .await
            .expect("run")
            .expect("verifier");
        assert!(report.is_pass(), "{report}");
        assert_eq!(report.results_collected, 3);
        assert!(report.counters.attempts > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_external_shutdown_stops_unbounded_run() {
        let config = StressConfig::default()
            .workers(2)
            .key_space(4)
            .discipline(Discipline::OptimisticCas)
            .stop(StopPolicy::after(Duration::from_secs(3600)));
        let coordinator = PhaseCoordinator::new(config, Arc::new(InMemoryStore::new()));
        let shutdown = coordinator.shutdown_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.cancel();
        });

        let report = tokio::time::timeout(Duration::from_secs(10), coordinator.run())
            .await
            .expect("shutdown honoured")
            .expect("run")
            .expect("verifier");
        assert!(report.is_pass(), "{report}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exhausted_cas_budget_is_inconclusive() {
        let config = StressConfig::default()
            .workers(2)
            .key_space(4)
            .seed(5)
            .discipline(Discipline::OptimisticCas)
            .weights(OperationWeights::increments_only())
            .cas_max_attempts(2)
            .stop(StopPolicy::iterations(10));
        let store = Arc::new(ScriptedStore::losing_every_cas());
        let report = PhaseCoordinator::new(config, store.clone())
            .run()
            .await
            .expect("worker failures are not run errors")
            .expect("verifier");

        let Verdict::Inconclusive { reasons } = &report.verdict else {
            panic!("expected an inconclusive verdict, got {}", report.verdict);
        };
        assert_eq!(reasons.len(), 2, "{reasons:?}");
        assert!(
            reasons.iter().all(|r| r.contains("gave up after 2 attempts")),
            "{reasons:?}"
        );
        assert_eq!(report.results_collected, 2);
        assert!(store.snapshot().values().all(|v| *v == 0));
    }

    #[tokio::test]
    async fn test_invalid_config_has_no_side_effects() {
        let store = Arc::new(InMemoryStore::new());
        let err = PhaseCoordinator::new(StressConfig::default().workers(0), store.clone())
            .run()
            .await
            .expect_err("invalid");
        assert!(matches!(err, StressError::Config(_)));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_follower_times_out_on_empty_store() {
        let config = StressConfig::default()
            .key_space(2)
            .prepare_timeout(Duration::from_millis(50))
            .process(ProcessRole {
                populate: false,
                ..ProcessRole::default()
            });
        let err = PhaseCoordinator::new(config, Arc::new(InMemoryStore::new()))
            .run()
            .await
            .expect_err("nothing populated");
        assert!(matches!(err, StressError::PrepareTimeout { missing: 2 }));
    }

    #[tokio::test]
    async fn test_non_verifying_process_returns_no_report() {
        let config = StressConfig::default()
            .workers(1)
            .key_space(1)
            .weights(OperationWeights::increments_only())
            .stop(StopPolicy::iterations(5))
            .process(ProcessRole {
                verify: false,
                ..ProcessRole::default()
            });
        let store = Arc::new(InMemoryStore::new());
        let outcome = PhaseCoordinator::new(config, store.clone())
            .run()
            .await
            .expect("run");
        assert!(outcome.is_none());
        assert_eq!(store.get(EntityKey(0)).await, Ok(Some(5)));
    }
}
