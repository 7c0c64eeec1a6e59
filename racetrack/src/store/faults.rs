//! Deterministic fault injection for [`InMemoryStore`](super::InMemoryStore).

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Fault probabilities, all disabled by default.
///
/// Fatal faults only hit the mutation primitives (`replace`, `lock`,
/// transactions). Plain `get`/`put` stay reliable so populating and verifying
/// the store keep working.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreFaults {
    /// Commit fails with a conflict and nothing is applied.
    pub commit_conflict_probability: f64,
    /// Rollback returns an error.
    pub rollback_failure_probability: f64,
    /// Commit applies its writes, then reports a conflict; the rollback that
    /// follows fails because there is nothing left to undo.
    pub ambiguous_commit_probability: f64,
    /// A mutation primitive fails with `StoreError::Unavailable`.
    pub fatal_probability: f64,
}

impl StoreFaults {
    /// No faults.
    pub fn none() -> Self {
        Self::default()
    }

    /// Only spurious commit conflicts, rolled back cleanly.
    pub fn conflicts(probability: f64) -> Self {
        Self {
            commit_conflict_probability: probability,
            ..Self::default()
        }
    }

    /// Whether any fault can fire.
    pub fn is_enabled(&self) -> bool {
        self.commit_conflict_probability > 0.0
            || self.rollback_failure_probability > 0.0
            || self.ambiguous_commit_probability > 0.0
            || self.fatal_probability > 0.0
    }
}

/// How many faults actually fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultCounts {
    /// Injected commit conflicts.
    pub commit_conflicts: u64,
    /// Injected rollback failures.
    pub rollback_failures: u64,
    /// Ambiguous commits.
    pub ambiguous_commits: u64,
    /// Fatal failures.
    pub fatal: u64,
}

#[derive(Debug, Default)]
struct Counters {
    commit_conflicts: AtomicU64,
    rollback_failures: AtomicU64,
    ambiguous_commits: AtomicU64,
    fatal: AtomicU64,
}

/// Which fault a dice roll is for.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    CommitConflict,
    RollbackFailure,
    AmbiguousCommit,
    Fatal,
}

/// Seeded fault dice shared by the store and its transactions.
#[derive(Debug)]
pub(crate) struct FaultDice {
    config: StoreFaults,
    rng: Mutex<ChaCha8Rng>,
    counters: Counters,
}

impl FaultDice {
    pub(crate) fn new(config: StoreFaults, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            counters: Counters::default(),
        }
    }

    /// Roll for `fault`, counting it when it fires.
    pub(crate) fn fires(&self, fault: Fault) -> bool {
        let (probability, counter) = match fault {
            Fault::CommitConflict => (
                self.config.commit_conflict_probability,
                &self.counters.commit_conflicts,
            ),
            Fault::RollbackFailure => (
                self.config.rollback_failure_probability,
                &self.counters.rollback_failures,
            ),
            Fault::AmbiguousCommit => (
                self.config.ambiguous_commit_probability,
                &self.counters.ambiguous_commits,
            ),
            Fault::Fatal => (self.config.fatal_probability, &self.counters.fatal),
        };
        if probability <= 0.0 {
            return false;
        }
        let roll: f64 = self.rng.lock().random();
        let fired = roll < probability;
        if fired {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        fired
    }

    pub(crate) fn counts(&self) -> FaultCounts {
        FaultCounts {
            commit_conflicts: self.counters.commit_conflicts.load(Ordering::Relaxed),
            rollback_failures: self.counters.rollback_failures.load(Ordering::Relaxed),
            ambiguous_commits: self.counters.ambiguous_commits.load(Ordering::Relaxed),
            fatal: self.counters.fatal.load(Ordering::Relaxed),
        }
    }
}
