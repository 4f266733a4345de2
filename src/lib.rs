//! Smart RAG context pipeline.
//!
//! Turns a user query plus conversation history into a token-budgeted,
//! deduplicated, quality-ranked context block for a downstream language
//! model, while storing document vectors efficiently.
//!
//! The crate is organized around five subsystems:
//! - `store`: vector-store optimizer (dedup, compression, tiering)
//! - `search`: semantic/keyword retrieval with response caching
//! - `quality`: quality scoring, duplicate removal and reranking
//! - `context`: chunking, compression and token-bounded assembly
//! - `service`: the orchestrator that sequences the above

pub mod context;
pub mod core;
pub mod embedding;
pub mod logging;
pub mod quality;
pub mod search;
pub mod service;
pub mod store;
pub mod vector_math;

pub use crate::core::config::PipelineConfig;
pub use crate::core::errors::RagError;
pub use crate::service::{SmartRagRequest, SmartRagResponse, SmartRagService};
