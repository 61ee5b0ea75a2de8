//! # vigil-retrieval
//!
//! Task-aware policy retrieval: given a task description, returns the
//! constitution plus the most relevant K shards as a single policy text.
//!
//! - Embedding capability: [`EmbeddingProvider`] trait with the
//!   deterministic [`HashEmbeddingProvider`] default
//! - Intent classification over the 11 task intents
//! - Hybrid scoring (cosine similarity + intent boost + risk boost) with
//!   lexical contradiction resolution

#![deny(unsafe_code)]

pub mod embedding;
pub mod intent;
pub mod retriever;
pub mod vector;

pub use embedding::{EmbeddingProvider, HashEmbeddingProvider};
pub use intent::{IntentClassification, IntentClassifier};
pub use retriever::{
    RetrievalRequest, RetrievalResult, Retriever, RetrieverOptions, SelectedShard, ShardScore,
};
