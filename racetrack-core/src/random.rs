//! Random number generation provider abstraction.
//!
//! Workers draw operations, keys and magnitudes from a [`RandomProvider`].
//! [`SeededRandomProvider`] makes those draws reproducible: the same seed
//! produces the same sequence, so a failing run can be replayed.

use rand::distr::uniform::SampleUniform;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::ops::{Range, RangeInclusive};

/// Provider trait for random number generation.
///
/// Unlike a thread-local generator, a provider is owned by exactly one worker,
/// hence the `&mut self` receivers.
pub trait RandomProvider: Send {
    /// Generate a random f64 in `[0.0, 1.0)`.
    fn random_ratio(&mut self) -> f64;

    /// Generate a random value within a specified range.
    ///
    /// The range is exclusive of the upper bound (start..end).
    fn random_range<T>(&mut self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd;

    /// Generate a random value within `start..=end`.
    fn random_range_inclusive<T>(&mut self, range: RangeInclusive<T>) -> T
    where
        T: SampleUniform + PartialOrd;

    /// Generate a random bool with the given probability of being true.
    fn random_bool(&mut self, probability: f64) -> bool {
        self.random_ratio() < probability
    }
}

/// Deterministic provider backed by `ChaCha8Rng`.
#[derive(Debug, Clone)]
pub struct SeededRandomProvider {
    seed: u64,
    rng: ChaCha8Rng,
}

impl SeededRandomProvider {
    /// Create a provider seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Derive an independent provider for a sub-participant (e.g. one worker).
    ///
    /// The derived seed only depends on `self.seed` and `stream`, never on how
    /// many values were already drawn.
    pub fn derive(&self, stream: u64) -> Self {
        Self::new(mix(self.seed, stream))
    }

    /// Seed this provider was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomProvider for SeededRandomProvider {
    fn random_ratio(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    fn random_range<T>(&mut self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd,
    {
        self.rng.random_range(range)
    }

    fn random_range_inclusive<T>(&mut self, range: RangeInclusive<T>) -> T
    where
        T: SampleUniform + PartialOrd,
    {
        self.rng.random_range(range)
    }
}

/// Non-deterministic provider using the thread-local `rand` generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandomProvider;

impl RandomProvider for ThreadRandomProvider {
    fn random_ratio(&mut self) -> f64 {
        rand::rng().random::<f64>()
    }

    fn random_range<T>(&mut self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd,
    {
        rand::rng().random_range(range)
    }

    fn random_range_inclusive<T>(&mut self, range: RangeInclusive<T>) -> T
    where
        T: SampleUniform + PartialOrd,
    {
        rand::rng().random_range(range)
    }
}

/// SplitMix64 finalizer over `seed ^ stream`.
fn mix(seed: u64, stream: u64) -> u64 {
    let mut z = seed ^ stream.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
