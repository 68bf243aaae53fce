//! Auditqa Core Library
//!
//! Answers Korean natural-language questions over tax-audit case documents:
//!
//! # Features
//! - Query understanding (intent, slots, keyword expansion) via an external
//!   LLM with rule-based fallbacks
//! - Two-stage hybrid retrieval: BM25 and dense vectors fused with
//!   Reciprocal Rank Fusion (RRF)
//! - Section-aware block promotion with keyword filtering
//! - Bounded context packing and cited answer composition

pub mod answer;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod retrieval;

pub use config::Config;
pub use error::{AuditQaError, Error, Result};
pub use model::{
    Chunk, ChunkHit, Citation, Expansion, Finding, FindingHit, Intent, PackedContext,
    QueryContext, RankedBlock, Route, Section, Slots,
};
pub use pipeline::Pipeline;

/// Default config directory name
pub const CONFIG_DIR_NAME: &str = "auditqa";

/// Run one query against the configured backends and return the answer text.
pub async fn run_query(text: &str) -> Result<String> {
    let config = Config::load()?;
    let pipeline = Pipeline::new(config)?;
    pipeline.run_query(text).await
}
