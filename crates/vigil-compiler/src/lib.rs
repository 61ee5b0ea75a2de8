//! # vigil-compiler
//!
//! Compiles a rules document (plus an optional local overlay) into a
//! [`PolicyBundle`](vigil_core::rules::PolicyBundle): an always-loaded
//! constitution and a pool of retrievable shards.
//!
//! Malformed headers and rule lines are never fatal; they become warnings
//! attached to the bundle. A missing primary document and duplicate explicit
//! IDs with equal priority and source are hard errors.

#![deny(unsafe_code)]

mod compiler;
mod parser;

pub use compiler::{compile, compile_file, CompilerOptions};
pub use parser::{parse_document, ParsedDocument};
pub use vigil_core::hash::sha256_16;
