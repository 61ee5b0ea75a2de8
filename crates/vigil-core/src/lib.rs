//! # vigil-core
//!
//! Shared data model for the vigil guidance control plane.
//!
//! - Rule model: [`rules::GuidanceRule`], [`rules::Constitution`],
//!   [`rules::RuleShard`], [`rules::PolicyBundle`]
//! - Branded ID newtypes: [`ids::RuleId`], [`ids::RunId`]
//! - Error taxonomy: [`errors::GuidanceError`]
//! - Logging setup: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod errors;
pub mod hash;
pub mod ids;
pub mod logging;
pub mod rules;
pub mod text;

pub use errors::{GuidanceError, Result};
