//! Run orchestration.
//!
//! - [`PhaseCoordinator`]: drives Prepare → Run → Collect → Verify
//! - [`Worker`]: one ledger, one strategy, one loop
//! - [`verify`]: aggregation, reconciliation and the verdict
//! - [`RunReport`]: what Verify produces

pub mod coordinator;
pub mod report;
pub mod verify;
pub mod worker;

pub use coordinator::{CoordinatorPhase, PhaseCoordinator};
pub use report::RunReport;
pub use verify::{AggregateExpectation, Mismatch, Verdict};
pub use worker::{Worker, WorkerPhase, WorkerPlan};
