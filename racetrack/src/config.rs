//! Run configuration.
//!
//! [`StressConfig`] is plain serde data with builder-style setters. Every field
//! has a default, so a JSON document only needs the fields it changes:
//!
//! ```json
//! { "workers": 10, "key_space": 1, "discipline": "optimistic_cas",
//!   "stop": { "iterations_per_worker": 1000 } }
//! ```
//!
//! Durations are encoded as milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::selector::SelectorError;
use crate::store::StoreFaults;
use crate::strategy::Discipline;
use crate::workload::{DeltaRange, KeyDistribution, OperationWeights};

/// Configuration rejected before any side effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `workers` is zero.
    #[error("at least one worker is required")]
    NoWorkers,
    /// `key_space` is zero.
    #[error("key space must contain at least one key")]
    EmptyKeySpace,
    /// `delta` has `min < 1`, `min > max` or `max` above
    /// [`DeltaRange::MAX_MAGNITUDE`].
    #[error("invalid delta range {min}..={max}")]
    InvalidDelta {
        /// Configured minimum.
        min: i64,
        /// Configured maximum.
        max: i64,
    },
    /// The hotspot probability is outside `[0, 1]`.
    #[error("hotspot probability {0} is not within [0, 1]")]
    InvalidHotspot(f64),
    /// Neither a duration nor an iteration budget was set.
    #[error("no stop condition: set stop.duration or stop.iterations_per_worker")]
    NoStopCondition,
    /// The operation weights do not form a distribution.
    #[error("invalid operation weights: {0}")]
    Weights(#[from] SelectorError),
    /// `cas_max_attempts` is zero, which would fail every CAS untried.
    #[error("cas_max_attempts must be at least 1")]
    ZeroCasAttempts,
    /// A fault probability is outside `[0, 1]`.
    #[error("fault probability {0} is not within [0, 1]")]
    InvalidFault(f64),
    /// The configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration document is malformed.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// When workers stop. The first condition reached wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopPolicy {
    /// Wall-clock duration of the Run phase.
    #[serde(with = "opt_duration_ms")]
    pub duration: Option<Duration>,
    /// Iterations each worker performs before stopping on its own.
    pub iterations_per_worker: Option<u64>,
}

impl StopPolicy {
    /// Stop after `duration`.
    pub fn after(duration: Duration) -> Self {
        Self {
            duration: Some(duration),
            iterations_per_worker: None,
        }
    }

    /// Stop after `iterations` per worker.
    pub fn iterations(iterations: u64) -> Self {
        Self {
            duration: None,
            iterations_per_worker: Some(iterations),
        }
    }

    /// Whether any stop condition is set.
    pub fn is_bounded(&self) -> bool {
        self.duration.is_some() || self.iterations_per_worker.is_some()
    }
}

/// What this process does in a multi-process run.
///
/// A single-process run keeps the default: process 0 populates, verifies and
/// expects one result per local worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessRole {
    /// Index of this process, used in worker ids and RNG streams.
    pub index: u32,
    /// Write the initial value of every key during Prepare.
    pub populate: bool,
    /// Run Verify after Collect.
    pub verify: bool,
    /// Results to wait for during Collect. Defaults to the local worker count.
    pub expected_results: Option<usize>,
}

impl Default for ProcessRole {
    fn default() -> Self {
        Self {
            index: 0,
            populate: true,
            verify: true,
            expected_results: None,
        }
    }
}

/// Full configuration of one run in one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    /// Workers spawned by this process.
    pub workers: usize,
    /// Keys `key-0 .. key-{key_space - 1}`.
    pub key_space: u64,
    /// Concurrency discipline under test.
    pub discipline: Discipline,
    /// Operation mix.
    pub weights: OperationWeights,
    /// How keys are picked.
    pub key_distribution: KeyDistribution,
    /// Delta magnitudes.
    pub delta: DeltaRange,
    /// Value written to every key during Prepare.
    pub initial_value: i64,
    /// Base seed. A random one is chosen and logged when unset.
    pub seed: Option<u64>,
    /// Stop conditions.
    pub stop: StopPolicy,
    /// Role of this process.
    pub process: ProcessRole,
    /// Give up on a contended CAS after this many attempts (fatal).
    pub cas_max_attempts: Option<u64>,
    /// How long Collect waits for the expected results.
    #[serde(with = "duration_ms")]
    pub collect_timeout: Duration,
    /// How long a follower waits for the populated key space.
    #[serde(with = "duration_ms")]
    pub prepare_timeout: Duration,
    /// Poll interval of the Prepare and Collect barriers.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// Faults injected by the in-memory store of the stress binary.
    pub store_faults: StoreFaults,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            key_space: 1000,
            discipline: Discipline::Locking,
            weights: OperationWeights::default(),
            key_distribution: KeyDistribution::Uniform,
            delta: DeltaRange::default(),
            initial_value: 0,
            seed: None,
            stop: StopPolicy::after(Duration::from_secs(5)),
            process: ProcessRole::default(),
            cas_max_attempts: None,
            collect_timeout: Duration::from_secs(10),
            prepare_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(20),
            store_faults: StoreFaults::none(),
        }
    }
}

impl StressConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Set the worker count.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the key-space size.
    pub fn key_space(mut self, key_space: u64) -> Self {
        self.key_space = key_space;
        self
    }

    /// Set the discipline.
    pub fn discipline(mut self, discipline: Discipline) -> Self {
        self.discipline = discipline;
        self
    }

    /// Set the operation mix.
    pub fn weights(mut self, weights: OperationWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Set the key distribution.
    pub fn key_distribution(mut self, key_distribution: KeyDistribution) -> Self {
        self.key_distribution = key_distribution;
        self
    }

    /// Set the delta range.
    pub fn delta(mut self, delta: DeltaRange) -> Self {
        self.delta = delta;
        self
    }

    /// Set the initial value.
    pub fn initial_value(mut self, value: i64) -> Self {
        self.initial_value = value;
        self
    }

    /// Set the base seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the stop policy.
    pub fn stop(mut self, stop: StopPolicy) -> Self {
        self.stop = stop;
        self
    }

    /// Set the process role.
    pub fn process(mut self, process: ProcessRole) -> Self {
        self.process = process;
        self
    }

    /// Bound CAS retries.
    pub fn cas_max_attempts(mut self, attempts: u64) -> Self {
        self.cas_max_attempts = Some(attempts);
        self
    }

    /// Set the Collect timeout.
    pub fn collect_timeout(mut self, timeout: Duration) -> Self {
        self.collect_timeout = timeout;
        self
    }

    /// Set the Prepare timeout.
    pub fn prepare_timeout(mut self, timeout: Duration) -> Self {
        self.prepare_timeout = timeout;
        self
    }

    /// Set the store faults used by the stress binary.
    pub fn store_faults(mut self, faults: StoreFaults) -> Self {
        self.store_faults = faults;
        self
    }

    /// Results Collect waits for.
    pub fn expected_results(&self) -> usize {
        self.process.expected_results.unwrap_or(self.workers)
    }

    /// Check the configuration without touching anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.key_space == 0 {
            return Err(ConfigError::EmptyKeySpace);
        }
        if !self.delta.is_valid() {
            return Err(ConfigError::InvalidDelta {
                min: self.delta.min,
                max: self.delta.max,
            });
        }
        if let KeyDistribution::Hotspot {
            hot_probability, ..
        } = self.key_distribution
        {
            if !(0.0..=1.0).contains(&hot_probability) {
                return Err(ConfigError::InvalidHotspot(hot_probability));
            }
        }
        if !self.stop.is_bounded() {
            return Err(ConfigError::NoStopCondition);
        }
        if self.cas_max_attempts == Some(0) {
            return Err(ConfigError::ZeroCasAttempts);
        }
        let faults = &self.store_faults;
        for p in [
            faults.commit_conflict_probability,
            faults.rollback_failure_probability,
            faults.ambiguous_commit_probability,
            faults.fatal_probability,
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::InvalidFault(p));
            }
        }
        self.weights.selector()?;
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
