//! External service seams
//!
//! The pipeline talks to three collaborators through traits so that retrieval
//! logic stays testable without live stores: an Elasticsearch-compatible
//! lexical store, a Qdrant vector store, and an Ollama-compatible LLM
//! endpoint that also serves embeddings.

mod embedding;
mod lexical;
mod llm;
mod vector;

pub use embedding::{CachedEmbedder, OllamaEmbedder};
pub use lexical::ElasticLexicalBackend;
pub use llm::{ApiMetrics, MetricsSnapshot, OllamaClient};
pub use vector::QdrantVectorBackend;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// One hit from the lexical store
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub id: String,
    pub score: f64,
    pub source: serde_json::Value,
}

/// Lexical store operations used by the pipeline
#[async_trait]
pub trait LexicalBackend: Send + Sync {
    /// Run a bool query against an index, returning scored hits
    async fn search(&self, index: &str, query: serde_json::Value, size: usize)
        -> Result<Vec<LexicalHit>>;

    /// Grouped keyword match counts over a document set, one aggregation call
    async fn keyword_counts(
        &self,
        index: &str,
        doc_ids: &[String],
        keywords: &[String],
        field: &str,
    ) -> Result<HashMap<String, u64>>;

    /// Fetch a single document source by id
    async fn get(&self, index: &str, id: &str) -> Result<Option<serde_json::Value>>;

    /// Cheap reachability probe
    async fn ping(&self) -> bool;
}

/// One hit from the vector store
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f64,
    pub payload: serde_json::Value,
}

/// Structural filter on payload fields: equality and set membership
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub conditions: Vec<FilterCondition>,
}

/// A single payload condition
#[derive(Debug, Clone)]
pub enum FilterCondition {
    /// Field equals the given keyword
    Eq(String, String),
    /// Field matches any of the given keywords
    AnyOf(String, Vec<String>),
}

impl VectorFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions
            .push(FilterCondition::Eq(field.into(), value.into()));
        self
    }

    pub fn any_of(mut self, field: impl Into<String>, values: Vec<String>) -> Self {
        self.conditions
            .push(FilterCondition::AnyOf(field.into(), values));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// Vector store operations used by the pipeline
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Similarity search with a payload filter and score threshold
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        filter: &VectorFilter,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<VectorHit>>;
}

/// Text generation endpoint
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion; `json_format` requests strict JSON output
    async fn generate(&self, prompt: &str, json_format: bool) -> Result<String>;

    /// Model identifier used in logs and cache keys
    fn model_name(&self) -> &str;

    /// Cheap reachability probe
    async fn is_available(&self) -> bool;
}

/// Embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate the dense embedding of a text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding dimensionality
    fn dimensions(&self) -> usize;

    /// Model identifier used in cache keys
    fn model_name(&self) -> &str;
}
