//! Query embedding via the Ollama embed API, with an LRU cache wrapper

use super::Embedder;
use crate::cache::{embedding_cache_key, LruCache, EMBEDDING_CACHE_CAPACITY};
use crate::config::LlmConfig;
use crate::error::{AuditQaError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub struct OllamaEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            input: text,
        };

        let response = self.http.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(AuditQaError::Embedding(format!(
                "embed failed (HTTP {})",
                response.status()
            )));
        }

        let body: EmbedResponse = response.json().await?;
        body.embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AuditQaError::Embedding("no embedding returned".to_string()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Embedder wrapper with a process-wide LRU cache.
///
/// Lookups only take the cache lock; misses run the embedding call outside it
/// and install the result afterwards. Answers must be byte-identical with and
/// without the cache.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: LruCache<String, Vec<f32>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self {
            inner,
            cache: LruCache::new(EMBEDDING_CACHE_CAPACITY),
        }
    }

    pub fn with_capacity(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: LruCache::new(capacity),
        }
    }

    /// Number of cached embeddings
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = embedding_cache_key(self.inner.model_name(), text);
        if let Some(vector) = self.cache.get(&key) {
            tracing::debug!("embedding cache hit");
            return Ok(vector);
        }
        let vector = self.inner.embed(text).await?;
        self.cache.put(key, vector.clone());
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
