//! Reconciliation of published ledgers against the store.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use racetrack_core::{EntityKey, SharedStore, StoreResult, Value};
use serde::{Deserialize, Serialize};

use crate::ledger::WorkerRunResult;

/// Per-key sum of every published ledger. Built once, never mutated after.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateExpectation {
    per_key: BTreeMap<EntityKey, Value>,
}

impl AggregateExpectation {
    /// Sum the ledgers of `results`.
    pub fn from_results(results: &[WorkerRunResult]) -> Self {
        let mut per_key = BTreeMap::new();
        for result in results {
            for (key, delta) in result.ledger.iter() {
                *per_key.entry(key).or_insert(0) += delta;
            }
        }
        Self { per_key }
    }

    /// Expected accumulated delta for `key`.
    pub fn delta(&self, key: EntityKey) -> Value {
        self.per_key.get(&key).copied().unwrap_or(0)
    }

    /// Keys touched by at least one ledger.
    pub fn keys(&self) -> impl Iterator<Item = EntityKey> + '_ {
        self.per_key.keys().copied()
    }

    /// Sum over all keys.
    pub fn total(&self) -> Value {
        self.per_key.values().sum()
    }
}

/// A key whose stored value disagrees with the ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// The key.
    pub key: EntityKey,
    /// `initial_value` plus the aggregated deltas.
    pub expected: Value,
    /// Stored value, `None` if the key is gone.
    pub actual: Option<Value>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual {
            Some(actual) => write!(
                f,
                "{}: expected {}, found {} (off by {})",
                self.key,
                self.expected,
                actual,
                actual - self.expected
            ),
            None => write!(f, "{}: expected {}, key missing", self.key, self.expected),
        }
    }
}

/// Compare every key of the key space, plus every key a ledger touched,
/// against the store. Returns every mismatch, in key order.
pub async fn reconcile<S: SharedStore>(
    store: &S,
    expectation: &AggregateExpectation,
    key_space: u64,
    initial_value: Value,
) -> StoreResult<Vec<Mismatch>> {
    let keys: BTreeSet<EntityKey> = EntityKey::space(key_space)
        .chain(expectation.keys())
        .collect();

    let mut mismatches = Vec::new();
    for key in keys {
        let expected = initial_value + expectation.delta(key);
        let actual = store.get(key).await?;
        if actual != Some(expected) {
            mismatches.push(Mismatch {
                key,
                expected,
                actual,
            });
        }
    }
    Ok(mismatches)
}

/// Final verdict of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Every key reconciled.
    Pass,
    /// At least one key did not reconcile.
    Fail,
    /// Reconciliation cannot be trusted.
    Inconclusive {
        /// Why.
        reasons: Vec<String>,
    },
}

impl Verdict {
    /// Decide the verdict. Any inconclusive reason wins over mismatches.
    pub fn decide(reasons: Vec<String>, mismatches: &[Mismatch]) -> Self {
        if !reasons.is_empty() {
            Verdict::Inconclusive { reasons }
        } else if !mismatches.is_empty() {
            Verdict::Fail
        } else {
            Verdict::Pass
        }
    }

    /// Whether the run passed.
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("PASS"),
            Verdict::Fail => f.write_str("FAIL"),
            Verdict::Inconclusive { reasons } => {
                write!(f, "INCONCLUSIVE ({})", reasons.join("; "))
            }
        }
    }
}

/// Collect the reasons that make a run inconclusive.
///
/// `worker_failures` are failures not visible in the results themselves
/// (panics, results that could not be published).
pub fn inconclusive_reasons(
    results: &[WorkerRunResult],
    expected_results: usize,
    worker_failures: &[String],
) -> Vec<String> {
    let mut reasons = Vec::new();

    let failed_rollbacks: u64 = results.iter().map(|r| r.counters.failed_rollbacks).sum();
    if failed_rollbacks > 0 {
        reasons.push(format!("{failed_rollbacks} rollback(s) failed"));
    }
    for result in results {
        if let Some(error) = &result.fatal_error {
            reasons.push(format!("worker {} failed: {error}", result.worker));
        }
    }
    reasons.extend(worker_failures.iter().cloned());
    if results.len() < expected_results {
        reasons.push(format!(
            "collected {} of {expected_results} worker results",
            results.len()
        ));
    }
    reasons
}
