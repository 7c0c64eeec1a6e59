//! # racetrack
//!
//! Concurrency stress testing and ledger reconciliation for shared keyed
//! stores.
//!
//! Many workers pick weighted-random operations, apply them to a
//! [`SharedStore`](racetrack_core::SharedStore) under one concurrency
//! discipline, and record every confirmed change in a private [`Ledger`].
//! When the run stops, the ledgers are summed and compared against the store:
//! any lost, duplicated or miscounted update shows up as a [`Mismatch`].
//!
//! ## Core Components
//!
//! - [`WeightedSelector`]: probability-weighted operation picking
//! - [`ConcurrencyStrategy`]: locking, optimistic CAS, or transactional updates
//! - [`Worker`]: the per-worker run loop and its ledger
//! - [`PhaseCoordinator`]: Prepare → Run → Collect → Verify
//! - [`InMemoryStore`]: reference store with fault injection
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use racetrack::{Discipline, InMemoryStore, PhaseCoordinator, StopPolicy, StressConfig};
//!
//! let config = StressConfig::default()
//!     .workers(10)
//!     .key_space(1)
//!     .discipline(Discipline::OptimisticCas)
//!     .stop(StopPolicy::iterations(1000));
//! let report = PhaseCoordinator::new(config, Arc::new(InMemoryStore::new()))
//!     .run()
//!     .await?
//!     .expect("process 0 verifies");
//! assert!(report.is_pass());
//! ```
//!
//! ## Verdicts
//!
//! | Verdict | When |
//! |---------|------|
//! | Pass | every key reconciles |
//! | Fail | at least one key does not |
//! | Inconclusive | a rollback failed, a worker died, or results are missing |

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod collection;
pub mod config;
pub mod error;
pub mod ledger;
pub mod runner;
pub mod selector;
pub mod store;
pub mod strategy;
pub mod workload;

pub use collection::{CollectionError, FileCollection, InMemoryCollection, ResultCollection};
pub use config::{ConfigError, ProcessRole, StopPolicy, StressConfig};
pub use error::{StressError, StressResult};
pub use ledger::{Ledger, WorkerCounters, WorkerId, WorkerRunResult};
pub use runner::{
    AggregateExpectation, CoordinatorPhase, Mismatch, PhaseCoordinator, RunReport, Verdict,
    Worker, WorkerPhase, WorkerPlan,
};
pub use selector::{SelectorError, WeightedSelector, WeightedSelectorBuilder};
pub use store::{FaultCounts, InMemoryStore, InMemoryTransaction, StoreFaults};
pub use strategy::{
    ConcurrencyStrategy, Discipline, LockingStrategy, OptimisticStrategy, Outcome, SkipReason,
    StrategyError, StrategyResult, StrategyStats, TransactionalStrategy,
};
pub use workload::{
    DeltaRange, KeyDistribution, Operation, OperationPlanner, OperationWeights, PlannedOp,
};
