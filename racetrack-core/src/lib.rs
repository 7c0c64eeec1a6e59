//! # racetrack-core
//!
//! Core vocabulary shared by every participant of a racetrack run.
//!
//! - **Keys and deltas**: [`EntityKey`] addresses one slot of shared state,
//!   [`KeyDelta`] is the signed change applied to it
//! - **Store traits**: [`SharedStore`] and [`StoreTransaction`] describe the
//!   system under test (get/put/replace/lock/transactions)
//! - **Errors**: [`StoreError`] separates contention from fatal failures
//! - **Randomness**: [`RandomProvider`] with a seeded ChaCha implementation so
//!   a run can be replayed from its seed

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod error;
mod random;
mod store;
mod types;

pub use error::{StoreError, StoreResult};
pub use random::{RandomProvider, SeededRandomProvider, ThreadRandomProvider};
pub use store::{SharedStore, StoreTransaction};
pub use types::{EntityKey, KeyDelta, Value};
