//! Operation alphabet for randomized stress runs.
//!
//! Defines the operations a worker can perform, the weights used to pick
//! them, and how keys and magnitudes are drawn for each pick.

use std::fmt;

use racetrack_core::{EntityKey, KeyDelta, RandomProvider, Value};
use serde::{Deserialize, Serialize};

use crate::selector::{SelectorError, WeightedSelector};

/// Operations a worker can perform against the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Add a positive magnitude to one key.
    Increment,
    /// Add a negative magnitude to one key.
    Decrement,
    /// Read one key without changing it.
    Read,
    /// Move a magnitude from one key to another as a single batch.
    Transfer,
}

impl Operation {
    /// Stable lower-case name, used as histogram key in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Increment => "increment",
            Operation::Decrement => "decrement",
            Operation::Read => "read",
            Operation::Transfer => "transfer",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probabilities for operation selection.
///
/// `increment` is not configurable: it is the default slot and receives
/// whatever mass the other three leave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationWeights {
    /// Probability of [`Operation::Decrement`].
    pub decrement: f64,
    /// Probability of [`Operation::Read`].
    pub read: f64,
    /// Probability of [`Operation::Transfer`].
    pub transfer: f64,
}

impl Default for OperationWeights {
    fn default() -> Self {
        Self {
            decrement: 0.2,
            read: 0.1,
            transfer: 0.2,
        }
    }
}

impl OperationWeights {
    /// Every pick is an increment.
    pub fn increments_only() -> Self {
        Self {
            decrement: 0.0,
            read: 0.0,
            transfer: 0.0,
        }
    }

    /// Heavy on multi-key batches, which raises conflict rates.
    pub fn transfer_focused() -> Self {
        Self {
            decrement: 0.1,
            read: 0.1,
            transfer: 0.6,
        }
    }

    /// Mostly reads with a trickle of writes.
    pub fn read_mostly() -> Self {
        Self {
            decrement: 0.05,
            read: 0.8,
            transfer: 0.05,
        }
    }

    /// Build the selector for these weights.
    pub fn selector(&self) -> Result<WeightedSelector<Operation>, SelectorError> {
        WeightedSelector::builder()
            .operation(Operation::Decrement, self.decrement)
            .operation(Operation::Read, self.read)
            .operation(Operation::Transfer, self.transfer)
            .default_operation(Operation::Increment)
            .build()
    }
}

/// How keys are picked from the key space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyDistribution {
    /// Every key is equally likely.
    #[default]
    Uniform,
    /// The first `hot_keys` keys receive `hot_probability` of the traffic.
    Hotspot {
        /// Number of hot keys, taken from the start of the key space.
        hot_keys: u64,
        /// Probability that a pick lands on a hot key.
        hot_probability: f64,
    },
}

impl KeyDistribution {
    /// Pick one key from a key space of `key_space` keys (must be non-zero).
    pub fn pick<R: RandomProvider>(&self, rng: &mut R, key_space: u64) -> EntityKey {
        match *self {
            KeyDistribution::Uniform => EntityKey(rng.random_range(0..key_space)),
            KeyDistribution::Hotspot {
                hot_keys,
                hot_probability,
            } => {
                let hot_keys = hot_keys.min(key_space);
                if hot_keys == 0 {
                    return EntityKey(rng.random_range(0..key_space));
                }
                if hot_keys == key_space || rng.random_bool(hot_probability) {
                    EntityKey(rng.random_range(0..hot_keys))
                } else {
                    EntityKey(rng.random_range(hot_keys..key_space))
                }
            }
        }
    }

    /// Pick a key different from `other`. Requires `key_space >= 2`.
    fn pick_other<R: RandomProvider>(
        &self,
        rng: &mut R,
        key_space: u64,
        other: EntityKey,
    ) -> EntityKey {
        let picked = self.pick(rng, key_space);
        if picked != other {
            return picked;
        }
        // Shift to a neighbour instead of re-drawing, so the loop is bounded.
        EntityKey((picked.index() + 1 + rng.random_range(0..key_space - 1)) % key_space)
    }
}

/// Inclusive range of delta magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaRange {
    /// Smallest magnitude, at least 1.
    pub min: Value,
    /// Largest magnitude.
    pub max: Value,
}

impl Default for DeltaRange {
    fn default() -> Self {
        Self { min: 1, max: 1 }
    }
}

impl DeltaRange {
    /// Largest accepted magnitude. Keeps accumulated store values far from
    /// `i64` overflow.
    pub const MAX_MAGNITUDE: Value = 1 << 32;

    /// Range containing exactly `magnitude`.
    pub fn fixed(magnitude: Value) -> Self {
        Self {
            min: magnitude,
            max: magnitude,
        }
    }

    /// Whether the range is usable.
    pub fn is_valid(&self) -> bool {
        self.min >= 1 && self.min <= self.max && self.max <= Self::MAX_MAGNITUDE
    }

    /// Draw a magnitude.
    pub fn draw<R: RandomProvider>(&self, rng: &mut R) -> Value {
        if self.min == self.max {
            self.min
        } else {
            rng.random_range_inclusive(self.min..=self.max)
        }
    }
}

/// A fully drawn operation, ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedOp {
    /// Read `key`.
    Read(EntityKey),
    /// Apply a single delta.
    Single(KeyDelta),
    /// Apply two deltas atomically.
    Batch([KeyDelta; 2]),
}

/// Draws concrete operations for one worker.
#[derive(Debug, Clone)]
pub struct OperationPlanner {
    key_space: u64,
    keys: KeyDistribution,
    delta: DeltaRange,
}

impl OperationPlanner {
    /// Create a planner over a non-empty key space.
    pub fn new(key_space: u64, keys: KeyDistribution, delta: DeltaRange) -> Self {
        Self {
            key_space,
            keys,
            delta,
        }
    }

    /// Turn `op` into a concrete plan by drawing keys and a magnitude.
    pub fn plan<R: RandomProvider>(&self, op: Operation, rng: &mut R) -> PlannedOp {
        let key = self.keys.pick(rng, self.key_space);
        match op {
            Operation::Read => PlannedOp::Read(key),
            Operation::Increment => PlannedOp::Single(KeyDelta::new(key, self.delta.draw(rng))),
            Operation::Decrement => PlannedOp::Single(KeyDelta::new(key, -self.delta.draw(rng))),
            Operation::Transfer if self.key_space < 2 => {
                PlannedOp::Single(KeyDelta::new(key, self.delta.draw(rng)))
            }
            Operation::Transfer => {
                let to = self.keys.pick_other(rng, self.key_space, key);
                let amount = self.delta.draw(rng);
                PlannedOp::Batch([KeyDelta::new(key, -amount), KeyDelta::new(to, amount)])
            }
        }
    }
}
