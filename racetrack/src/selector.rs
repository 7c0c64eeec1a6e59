//! Weighted random operation selection.
//!
//! A [`WeightedSelector`] maps a closed set of operations to probabilities and
//! draws one operation per call. Operations own contiguous, disjoint
//! sub-intervals of `[0, 1)` in registration order; an optional default
//! operation absorbs whatever probability mass is left.
//!
//! ```text
//!   0.0        0.5     0.7        0.9       1.0
//!    |----A-----|---B---|----C-----|--dflt---|
//! ```
//!
//! The interval table is immutable after [`WeightedSelectorBuilder::build`],
//! so one selector can be shared by every worker through an `Arc`.

use std::fmt;

use racetrack_core::RandomProvider;
use thiserror::Error;

/// Tolerance used when comparing probability totals against 1.0.
pub const PROBABILITY_EPSILON: f64 = 1e-9;

/// Configuration errors raised while building a [`WeightedSelector`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectorError {
    /// A probability was negative, NaN or infinite.
    #[error("operation #{index} has invalid probability {probability}")]
    NegativeProbability {
        /// Registration index of the offending operation.
        index: usize,
        /// The rejected probability.
        probability: f64,
    },
    /// The explicit probabilities add up to more than 1.0.
    #[error("probabilities sum to {total}, more than 1.0")]
    ExceedsOne {
        /// Sum of the explicit probabilities.
        total: f64,
    },
    /// Two operations claimed the default slot.
    #[error("more than one default operation registered")]
    DuplicateDefault,
    /// Nothing can ever be selected.
    #[error("total probability is zero and no default operation is registered")]
    NoProbabilityMass,
    /// Without a default slot the probabilities must sum to exactly 1.0.
    #[error("probabilities sum to {total} and no default operation absorbs the rest")]
    IncompleteDistribution {
        /// Sum of the explicit probabilities.
        total: f64,
    },
}

/// Draws operations according to a fixed probability distribution.
#[derive(Clone)]
pub struct WeightedSelector<Op> {
    operations: Vec<Op>,
    /// Exclusive upper bound of each operation's interval, non-decreasing.
    upper_bounds: Vec<f64>,
    /// Index of the last operation with a non-empty interval.
    last_live: usize,
}

impl<Op> WeightedSelector<Op> {
    /// Start building a selector.
    pub fn builder() -> WeightedSelectorBuilder<Op> {
        WeightedSelectorBuilder::new()
    }

    /// Build a selector from relative, non-negative weights.
    ///
    /// Weights are normalised by their sum, so `[(A, 2.0), (B, 1.0)]` selects
    /// `A` two thirds of the time.
    pub fn from_relative_weights<I>(weights: I) -> Result<Self, SelectorError>
    where
        I: IntoIterator<Item = (Op, f64)>,
    {
        let weights: Vec<(Op, f64)> = weights.into_iter().collect();
        for (index, (_, w)) in weights.iter().enumerate() {
            if !w.is_finite() || *w < 0.0 {
                return Err(SelectorError::NegativeProbability {
                    index,
                    probability: *w,
                });
            }
        }
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Err(SelectorError::NoProbabilityMass);
        }

        let mut builder = Self::builder();
        let last = weights.len() - 1;
        for (index, (op, w)) in weights.into_iter().enumerate() {
            // The last operation absorbs normalisation rounding.
            if index == last {
                builder = builder.default_operation(op);
            } else {
                builder = builder.operation(op, w / total);
            }
        }
        builder.build()
    }

    /// Select the operation whose interval contains `r`.
    ///
    /// Pure function of `r`. Values outside `[0, 1)` are clamped into range.
    pub fn select(&self, r: f64) -> &Op {
        let r = if r.is_nan() { 0.0 } else { r.clamp(0.0, 1.0) };
        let index = self.upper_bounds.partition_point(|&bound| bound <= r);
        if index >= self.operations.len() {
            // Rounding tail: the cumulative sum fell a hair short of 1.0.
            return &self.operations[self.last_live];
        }
        &self.operations[index]
    }

    /// Draw one operation using `rng`.
    pub fn sample<R: RandomProvider>(&self, rng: &mut R) -> &Op {
        self.select(rng.random_ratio())
    }

    /// Registered operations with their effective probabilities, in interval order.
    pub fn distribution(&self) -> Vec<(&Op, f64)> {
        let mut lower = 0.0;
        self.operations
            .iter()
            .zip(self.upper_bounds.iter())
            .map(|(op, &upper)| {
                let p = upper - lower;
                lower = upper;
                (op, p)
            })
            .collect()
    }

    /// Number of registered operations, default included.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether no operation is registered. Always false for a built selector.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl<Op: PartialEq> WeightedSelector<Op> {
    /// Effective probability of `op`, summed over every interval it owns.
    pub fn probability_of(&self, op: &Op) -> f64 {
        self.distribution()
            .into_iter()
            .filter(|(candidate, _)| *candidate == op)
            .map(|(_, p)| p)
            .sum()
    }
}

impl<Op: fmt::Debug> fmt::Debug for WeightedSelector<Op> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightedSelector")
            .field("distribution", &self.distribution())
            .finish()
    }
}

/// Builder for [`WeightedSelector`]. Validation happens in [`build`](Self::build).
pub struct WeightedSelectorBuilder<Op> {
    entries: Vec<(Op, f64)>,
    default: Option<Op>,
    duplicate_default: bool,
}

impl<Op> WeightedSelectorBuilder<Op> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            default: None,
            duplicate_default: false,
        }
    }

    /// Register `op` with an absolute probability in `[0, 1]`.
    pub fn operation(mut self, op: Op, probability: f64) -> Self {
        self.entries.push((op, probability));
        self
    }

    /// Register `op` as the default, absorbing the remaining probability mass.
    pub fn default_operation(mut self, op: Op) -> Self {
        if self.default.is_some() {
            self.duplicate_default = true;
        } else {
            self.default = Some(op);
        }
        self
    }

    /// Validate the distribution and build the interval table.
    pub fn build(self) -> Result<WeightedSelector<Op>, SelectorError> {
        if self.duplicate_default {
            return Err(SelectorError::DuplicateDefault);
        }

        let mut total = 0.0;
        for (index, (_, p)) in self.entries.iter().enumerate() {
            if !p.is_finite() || *p < 0.0 {
                return Err(SelectorError::NegativeProbability {
                    index,
                    probability: *p,
                });
            }
            total += p;
        }

        if total > 1.0 + PROBABILITY_EPSILON {
            return Err(SelectorError::ExceedsOne { total });
        }
        if self.default.is_none() {
            if total <= 0.0 {
                return Err(SelectorError::NoProbabilityMass);
            }
            if (total - 1.0).abs() > PROBABILITY_EPSILON {
                return Err(SelectorError::IncompleteDistribution { total });
            }
        }

        let mut operations = Vec::with_capacity(self.entries.len() + 1);
        let mut upper_bounds = Vec::with_capacity(self.entries.len() + 1);
        let mut cumulative = 0.0;
        for (op, p) in self.entries {
            cumulative += p;
            operations.push(op);
            upper_bounds.push(cumulative.min(1.0));
        }
        if let Some(op) = self.default {
            operations.push(op);
            upper_bounds.push(1.0);
        }

        let mut last_live = 0;
        let mut lower = 0.0;
        for (index, &upper) in upper_bounds.iter().enumerate() {
            if upper > lower {
                last_live = index;
            }
            lower = upper;
        }

        Ok(WeightedSelector {
            operations,
            upper_bounds,
            last_live,
        })
    }
}
