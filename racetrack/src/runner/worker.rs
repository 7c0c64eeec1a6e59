//! One stress worker and its lifecycle.
//!
//! ```text
//! Idle -> BeforeRun -> Looping -> AfterRun -> Published -> Terminated
//! ```
//!
//! The stop signal is checked between iterations only: an in-flight strategy
//! call always finishes, so the ledger never races a half-applied mutation.

use std::fmt;
use std::sync::Arc;

use racetrack_core::{KeyDelta, SeededRandomProvider, SharedStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::collection::ResultCollection;
use crate::error::{StressError, StressResult};
use crate::ledger::{Ledger, WorkerCounters, WorkerId, WorkerRunResult};
use crate::selector::WeightedSelector;
use crate::strategy::{ConcurrencyStrategy, Outcome, SkipReason, StrategyError, StrategyResult};
use crate::workload::{Operation, OperationPlanner, PlannedOp};

/// Lifecycle phase of a [`Worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Built, not started.
    Idle,
    /// Started, not looping yet.
    BeforeRun,
    /// Running iterations.
    Looping,
    /// Loop left; building the result.
    AfterRun,
    /// Result handed to the collection.
    Published,
    /// Done.
    Terminated,
}

impl WorkerPhase {
    /// The only phase allowed after this one.
    pub fn next(self) -> Option<WorkerPhase> {
        match self {
            WorkerPhase::Idle => Some(WorkerPhase::BeforeRun),
            WorkerPhase::BeforeRun => Some(WorkerPhase::Looping),
            WorkerPhase::Looping => Some(WorkerPhase::AfterRun),
            WorkerPhase::AfterRun => Some(WorkerPhase::Published),
            WorkerPhase::Published => Some(WorkerPhase::Terminated),
            WorkerPhase::Terminated => None,
        }
    }
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Shared, read-only inputs of every worker in a process.
#[derive(Clone)]
pub struct WorkerPlan {
    /// Operation selector.
    pub selector: Arc<WeightedSelector<Operation>>,
    /// Key and magnitude drawing.
    pub planner: Arc<OperationPlanner>,
    /// Where the result is published.
    pub collection: Arc<dyn ResultCollection>,
    /// Cooperative stop signal.
    pub stop: CancellationToken,
    /// Optional per-worker iteration budget.
    pub iterations: Option<u64>,
}

/// Owns one ledger and one strategy; loops until told to stop.
pub struct Worker<S> {
    id: WorkerId,
    phase: WorkerPhase,
    store: Arc<S>,
    strategy: Box<dyn ConcurrencyStrategy>,
    plan: WorkerPlan,
    rng: SeededRandomProvider,
    ledger: Ledger,
    counters: WorkerCounters,
}

impl<S: SharedStore> Worker<S> {
    /// Create an idle worker.
    pub fn new(
        id: WorkerId,
        store: Arc<S>,
        strategy: Box<dyn ConcurrencyStrategy>,
        plan: WorkerPlan,
        rng: SeededRandomProvider,
    ) -> Self {
        Self {
            id,
            phase: WorkerPhase::Idle,
            store,
            strategy,
            plan,
            rng,
            ledger: Ledger::new(),
            counters: WorkerCounters::default(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    /// Worker identifier.
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    fn transition(&mut self, to: WorkerPhase) {
        assert_eq!(
            self.phase.next(),
            Some(to),
            "worker {} cannot move from {} to {}",
            self.id,
            self.phase,
            to
        );
        trace!(worker = %self.id, from = %self.phase, to = %to, "worker phase");
        self.phase = to;
    }

    /// Run the whole lifecycle and publish the result.
    ///
    /// A fatal strategy error still publishes the partial result (with
    /// `fatal_error` set) before being returned.
    pub async fn run(mut self) -> StressResult<WorkerRunResult> {
        self.transition(WorkerPhase::BeforeRun);
        debug!(
            worker = %self.id,
            discipline = %self.strategy.discipline(),
            budget = ?self.plan.iterations,
            "worker starting"
        );

        self.transition(WorkerPhase::Looping);
        let mut iterations: u64 = 0;
        let fatal = loop {
            if self.plan.stop.is_cancelled() {
                break None;
            }
            if self.plan.iterations.is_some_and(|budget| iterations >= budget) {
                break None;
            }
            iterations += 1;
            if let Err(e) = self.step().await {
                error!(worker = %self.id, iteration = iterations, error = %e, "worker failed");
                break Some(e);
            }
            tokio::task::yield_now().await;
        };

        self.transition(WorkerPhase::AfterRun);
        let result = WorkerRunResult {
            worker: self.id.clone(),
            discipline: self.strategy.discipline(),
            ledger: std::mem::take(&mut self.ledger),
            counters: std::mem::take(&mut self.counters),
            strategy: self.strategy.stats().clone(),
            fatal_error: fatal.as_ref().map(ToString::to_string),
        };
        self.plan.collection.publish(result.clone()).await?;
        self.transition(WorkerPhase::Published);

        debug!(
            worker = %self.id,
            iterations,
            commits = result.counters.commits,
            rollbacks = result.counters.rollbacks,
            "worker stopped"
        );
        self.transition(WorkerPhase::Terminated);

        match fatal {
            Some(e) => Err(StressError::Strategy(e)),
            None => Ok(result),
        }
    }

    async fn step(&mut self) -> StrategyResult<()> {
        let op = *self.plan.selector.sample(&mut self.rng);
        self.counters.record_draw(op);

        match self.plan.planner.plan(op, &mut self.rng) {
            PlannedOp::Read(key) => {
                let value = self.store.get(key).await.map_err(StrategyError::from)?;
                self.counters.reads += 1;
                trace!(worker = %self.id, %key, ?value, "read");
            }
            PlannedOp::Single(change) => {
                self.counters.attempts += 1;
                let outcome = self.strategy.apply_delta(change.key, change.delta).await?;
                self.settle(op, outcome, &[change]);
            }
            PlannedOp::Batch(legs) => {
                self.counters.attempts += 1;
                let outcome = self.strategy.apply_batch(&legs).await?;
                self.settle(op, outcome, &legs);
            }
        }
        Ok(())
    }

    /// The single place where the ledger changes.
    fn settle(&mut self, op: Operation, outcome: Outcome, changes: &[KeyDelta]) {
        match outcome {
            Outcome::Applied => {
                for change in changes {
                    self.ledger.record(*change);
                }
                self.counters.commits += 1;
            }
            Outcome::Skipped(reason) => {
                self.counters.rollbacks += 1;
                if reason == SkipReason::RollbackFailed {
                    self.counters.failed_rollbacks += 1;
                }
            }
        }
        trace!(worker = %self.id, %op, ?outcome, "settled");
    }
}
