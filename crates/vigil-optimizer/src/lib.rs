//! # vigil-optimizer
//!
//! Weekly A/B loop that evolves the rule set from observed violations.
//!
//! A cycle ranks recent violations, proposes rule changes, evaluates each
//! against a baseline through an injectable executor, and feeds the
//! results into a win-twice promotion tracker. Winning rules move into
//! the constitution; losing `promote` proposals are demoted. Every
//! decision appends an architecture decision record.
//!
//! Failures abort the cycle before anything is applied: the tracker and
//! the shard pool are only mutated once every evaluation has succeeded.

#![deny(unsafe_code)]

pub mod changes;
pub mod executor;
pub mod optimizer;
pub mod tracker;

pub use changes::{AbMetrics, AbTestResult, AdrDecision, RuleAdr, RuleChange, RuleChangeKind};
pub use executor::{AbExecutor, EstimatedExecutor};
pub use optimizer::{CycleDecision, CycleOutcome, Optimizer, OptimizerOptions};
pub use tracker::PromotionTracker;
