//! Run-level error type.

use thiserror::Error;

use racetrack_core::StoreError;

use crate::collection::CollectionError;
use crate::config::ConfigError;
use crate::strategy::StrategyError;

/// Run-level errors returned by the [`PhaseCoordinator`](crate::PhaseCoordinator).
///
/// Verification mismatches are not errors: they are reported through the
/// [`RunReport`](crate::RunReport) verdict.
#[derive(Debug, Error)]
pub enum StressError {
    /// The configuration was rejected before anything ran.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The store failed outside of a worker (Prepare or Verify).
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// A strategy failed fatally.
    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),
    /// Publishing or collecting worker results failed.
    #[error("result collection error: {0}")]
    Collection(#[from] CollectionError),
    /// Keys were still unreadable when the Prepare barrier timed out.
    #[error("prepare barrier timed out: {missing} key(s) still unpopulated")]
    PrepareTimeout {
        /// Number of keys without a value at the deadline.
        missing: u64,
    },
}

/// A type alias for `Result<T, StressError>`.
pub type StressResult<T> = Result<T, StressError>;
