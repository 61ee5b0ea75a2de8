//! # vigil-runtime
//!
//! The orchestrator that owns the live policy bundle, retriever, gates,
//! ledger, and optimizer, and enforces the sharing discipline between
//! them:
//!
//! - gate configuration is frozen at construction;
//! - the shard pool is swapped atomically, so readers always see a
//!   consistent snapshot;
//! - ledger access is serialized, with a single-writer contract per run;
//! - only one optimizer cycle may be in flight (non-reentrant lock).

#![deny(unsafe_code)]

pub mod config;
pub mod control_plane;

pub use config::GuidanceConfig;
pub use control_plane::{ControlPlane, GateEvaluation, RunHandle};
