//! Reference shared store for exercising the engine end to end.
//!
//! [`InMemoryStore`] implements [`SharedStore`](racetrack_core::SharedStore)
//! on a single process with real mutual exclusion, real compare-and-swap and
//! optimistic transactions. [`StoreFaults`] injects the failure modes a remote
//! store exhibits (commit conflicts, failed rollbacks, ambiguous commits,
//! connectivity loss) deterministically from a seed.

pub mod faults;
pub mod memory;
#[cfg(test)]
pub(crate) mod scripted;

pub use faults::{FaultCounts, StoreFaults};
pub use memory::{InMemoryStore, InMemoryTransaction};
