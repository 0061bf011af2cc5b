//! Resumable organization scanning.
//!
//! The pieces, from the inside out: [`model`] holds the domain types,
//! [`state`] the mutable scan state and its published snapshots,
//! [`retry`] the backoff executor, [`executor`] the batch fan-out,
//! [`control`] the live control plane, [`checkpoint`] durable progress,
//! [`orchestrator`] the decision loop, and [`runner`] the supervisor
//! that chains executions into one logical scan. [`report`] turns
//! accumulated results into the wire-format report.

pub mod checkpoint;
pub mod control;
pub mod executor;
pub mod model;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod runner;
pub mod state;

pub use control::{ControlError, ScanHandle};
pub use report::ScanReport;
pub use runner::{ActiveScan, ScanOptions, ScanRunner};
pub use state::{ScanState, ScanStatus};
