//! Worker-private record of confirmed mutations.
//!
//! A [`Ledger`] is owned by exactly one worker. The only way in is
//! [`Ledger::record`], which the worker calls after a strategy confirmed the
//! delta as applied. Nothing is ever taken back out: a confirmed success stays
//! confirmed, and an unconfirmed attempt never gets in.
//!
//! Uses `BTreeMap` for deterministic iteration order, so two runs with the same
//! seed print identical reports.

use std::collections::BTreeMap;
use std::fmt;

use racetrack_core::{EntityKey, KeyDelta, Value};
use serde::{Deserialize, Serialize};

use crate::strategy::{Discipline, StrategyStats};
use crate::workload::Operation;

/// Accumulated confirmed deltas, per key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    entries: BTreeMap<EntityKey, Value>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed delta.
    pub fn record(&mut self, change: KeyDelta) {
        *self.entries.entry(change.key).or_insert(0) += change.delta;
    }

    /// Accumulated delta for `key`, 0 if never touched.
    pub fn get(&self, key: EntityKey) -> Value {
        self.entries.get(&key).copied().unwrap_or(0)
    }

    /// Iterate over touched keys in key order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityKey, Value)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    /// Number of touched keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no delta was ever recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all accumulated deltas.
    pub fn total(&self) -> Value {
        self.entries.values().sum()
    }
}

/// Per-worker outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCounters {
    /// Mutations dispatched to the strategy.
    pub attempts: u64,
    /// Mutations confirmed as applied.
    pub commits: u64,
    /// Mutations skipped after a successful rollback or a failed one.
    pub rollbacks: u64,
    /// Skipped mutations whose rollback itself failed.
    pub failed_rollbacks: u64,
    /// Read-only operations.
    pub reads: u64,
    /// How many times each operation was drawn.
    pub op_counts: BTreeMap<Operation, u64>,
}

impl WorkerCounters {
    /// Count one draw of `op`.
    pub fn record_draw(&mut self, op: Operation) {
        *self.op_counts.entry(op).or_insert(0) += 1;
    }

    /// Add another worker's counters into these.
    pub fn merge(&mut self, other: &WorkerCounters) {
        self.attempts += other.attempts;
        self.commits += other.commits;
        self.rollbacks += other.rollbacks;
        self.failed_rollbacks += other.failed_rollbacks;
        self.reads += other.reads;
        for (op, count) in &other.op_counts {
            *self.op_counts.entry(*op).or_insert(0) += count;
        }
    }
}

/// Identifier of one worker across all cooperating processes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId {
    /// Index of the process the worker runs in.
    pub process: u32,
    /// Index of the worker inside its process.
    pub index: u32,
}

impl WorkerId {
    /// Create a new worker id.
    pub fn new(process: u32, index: u32) -> Self {
        Self { process, index }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}-w{}", self.process, self.index)
    }
}

/// Everything one worker publishes when it stops. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRunResult {
    /// Publishing worker.
    pub worker: WorkerId,
    /// Discipline the worker ran under.
    pub discipline: Discipline,
    /// Confirmed deltas.
    pub ledger: Ledger,
    /// Outcome counters.
    pub counters: WorkerCounters,
    /// Store-protocol counters of the worker's strategy.
    pub strategy: StrategyStats,
    /// Fatal error that stopped the worker early, if any.
    pub fatal_error: Option<String>,
}

impl WorkerRunResult {
    /// Whether the worker stopped on a fatal error.
    pub fn is_fatal(&self) -> bool {
        self.fatal_error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates_per_key() {
        let mut ledger = Ledger::new();
        ledger.record(KeyDelta::new(EntityKey(1), 5));
        ledger.record(KeyDelta::new(EntityKey(1), -2));
        ledger.record(KeyDelta::new(EntityKey(4), 7));

        assert_eq!(ledger.get(EntityKey(1)), 3);
        assert_eq!(ledger.get(EntityKey(4)), 7);
        assert_eq!(ledger.get(EntityKey(9)), 0);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.total(), 10);
    }

    #[test]
    fn test_zero_sum_entry_is_kept() {
        let mut ledger = Ledger::new();
        ledger.record(KeyDelta::new(EntityKey(2), 3));
        ledger.record(KeyDelta::new(EntityKey(2), -3));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(EntityKey(2)), 0);
    }

    #[test]
    fn test_iteration_is_key_ordered() {
        let mut ledger = Ledger::new();
        for k in [5, 1, 3] {
            ledger.record(KeyDelta::new(EntityKey(k), 1));
        }
        let keys: Vec<_> = ledger.iter().map(|(k, _)| k.index()).collect();
        assert_eq!(keys, vec![1, 3, 5]);
    }

    #[test]
    fn test_counters_merge() {
        let mut a = WorkerCounters {
            attempts: 3,
            commits: 2,
            rollbacks: 1,
            failed_rollbacks: 0,
            reads: 4,
            ..Default::default()
        };
        a.record_draw(Operation::Increment);
        let mut b = WorkerCounters {
            attempts: 1,
            commits: 0,
            rollbacks: 1,
            failed_rollbacks: 1,
            reads: 0,
            ..Default::default()
        };
        b.record_draw(Operation::Increment);
        b.record_draw(Operation::Read);

        a.merge(&b);
        assert_eq!(a.attempts, 4);
        assert_eq!(a.rollbacks, 2);
        assert_eq!(a.failed_rollbacks, 1);
        assert_eq!(a.op_counts.get(&Operation::Increment), Some(&2));
        assert_eq!(a.op_counts.get(&Operation::Read), Some(&1));
    }

    #[test]
    fn test_result_survives_json() {
        let mut ledger = Ledger::new();
        ledger.record(KeyDelta::new(EntityKey(0), 11));
        let result = WorkerRunResult {
            worker: WorkerId::new(1, 2),
            discipline: Discipline::Transactional,
            ledger,
            counters: WorkerCounters::default(),
            strategy: StrategyStats::default(),
            fatal_error: Some("store unavailable: link down".into()),
        };
        let json = serde_json::to_string(&result).expect("serialize");
        let back: WorkerRunResult = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, result);
        assert!(back.is_fatal());
        assert_eq!(back.worker.to_string(), "p1-w2");
    }
}
