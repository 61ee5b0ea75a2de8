//! # vigil-ledger
//!
//! Append-only record of run events with pluggable evaluators.
//!
//! A [`RunEvent`] is created at run start, accumulates violations and diff
//! stats while in progress, and freezes at finalization; any later
//! mutation fails with an invalid-state error. Finalized events feed
//! violation rankings and windowed metrics, and are persisted as
//! forward-compatible JSON lines.

#![deny(unsafe_code)]

pub mod evaluators;
pub mod event;
pub mod ledger;
pub mod store;

pub use evaluators::{
    DiffQuality, Evaluator, EvaluatorResult, ForbiddenCommandScan, ForbiddenDependencyScan,
    TestsPass, ViolationRate,
};
pub use event::{DiffSummary, RunEvent, RunOutcome, Violation, ViolationRanking};
pub use ledger::{Ledger, LedgerMetrics, TaskContext};
pub use store::JsonlStore;
