//! Run report.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ledger::{WorkerCounters, WorkerRunResult};
use crate::strategy::{Discipline, StrategyStats};
use crate::workload::Operation;

use super::verify::{Mismatch, Verdict};

/// Everything a verifying process learned about a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Discipline under test.
    pub discipline: Discipline,
    /// Final verdict.
    pub verdict: Verdict,
    /// Every key that did not reconcile.
    pub mismatches: Vec<Mismatch>,
    /// Base seed of this process.
    pub seed: u64,
    /// Workers spawned by this process.
    pub workers: usize,
    /// Key-space size.
    pub key_space: u64,
    /// Results collected.
    pub results_collected: usize,
    /// Results expected.
    pub results_expected: usize,
    /// Counters summed over every collected result.
    pub counters: WorkerCounters,
    /// Strategy stats summed over every collected result.
    pub strategy: StrategyStats,
    /// Operation histogram of each worker.
    pub per_worker_ops: BTreeMap<String, BTreeMap<Operation, u64>>,
    /// Wall-clock time from Prepare to the end of Verify, in milliseconds.
    #[serde(rename = "wall_time_ms", with = "millis")]
    pub wall_time: Duration,
}

impl RunReport {
    /// Sum counters and histograms out of `results`.
    pub(crate) fn summarize(
        results: &[WorkerRunResult],
    ) -> (
        WorkerCounters,
        StrategyStats,
        BTreeMap<String, BTreeMap<Operation, u64>>,
    ) {
        let mut counters = WorkerCounters::default();
        let mut strategy = StrategyStats::default();
        let mut per_worker_ops = BTreeMap::new();
        for result in results {
            counters.merge(&result.counters);
            strategy.merge(&result.strategy);
            per_worker_ops.insert(result.worker.to_string(), result.counters.op_counts.clone());
        }
        (counters, strategy, per_worker_ops)
    }

    /// Whether the run passed.
    pub fn is_pass(&self) -> bool {
        self.verdict.is_pass()
    }

    /// Operations per second over the wall time.
    pub fn throughput(&self) -> f64 {
        let secs = self.wall_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            (self.counters.attempts + self.counters.reads) as f64 / secs
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Run Report ===")?;
        writeln!(f, "Discipline: {}", self.discipline)?;
        writeln!(f, "Verdict: {}", self.verdict)?;
        writeln!(f, "Seed: {}", self.seed)?;
        writeln!(f, "Workers: {}", self.workers)?;
        writeln!(f, "Key Space: {}", self.key_space)?;
        writeln!(
            f,
            "Results: {}/{}",
            self.results_collected, self.results_expected
        )?;
        writeln!(f, "Wall Time: {:?}", self.wall_time)?;
        writeln!(f, "Throughput: {:.1} ops/s", self.throughput())?;
        writeln!(f)?;
        writeln!(f, "Attempts: {}", self.counters.attempts)?;
        writeln!(f, "Commits: {}", self.counters.commits)?;
        writeln!(f, "Rollbacks: {}", self.counters.rollbacks)?;
        writeln!(f, "Failed Rollbacks: {}", self.counters.failed_rollbacks)?;
        writeln!(f, "Reads: {}", self.counters.reads)?;

        let s = &self.strategy;
        match self.discipline {
            Discipline::Locking => writeln!(f, "Locks Acquired: {}", s.locks_acquired)?,
            Discipline::OptimisticCas => {
                writeln!(f, "CAS Attempts: {}", s.cas_attempts)?;
                writeln!(f, "CAS Misses: {}", s.cas_misses)?;
            }
            Discipline::Transactional => {
                writeln!(f, "Transactions: {}", s.transactions_begun)?;
                writeln!(f, "Commit Conflicts: {}", s.commit_conflicts)?;
            }
        }

        if !self.counters.op_counts.is_empty() {
            writeln!(f)?;
            writeln!(f, "=== Operations ===")?;
            for (op, count) in &self.counters.op_counts {
                writeln!(f, "  {op}: {count}")?;
            }
        }

        if !self.mismatches.is_empty() {
            writeln!(f)?;
            writeln!(f, "=== Mismatches ===")?;
            for m in &self.mismatches {
                writeln!(f, "  - {m}")?;
            }
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
