//! Elasticsearch-compatible lexical store client
//!
//! Talks plain REST with `reqwest`: `_search` for queries and aggregations,
//! `_doc` for point reads. Timeouts retry with doubling backoff; other errors
//! surface immediately and are recovered at the retrieval layer.

use super::{LexicalBackend, LexicalHit};
use crate::config::LexicalConfig;
use crate::error::{AuditQaError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

pub struct ElasticLexicalBackend {
    http: reqwest::Client,
    config: LexicalConfig,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
    #[serde(default)]
    aggregations: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct HitsEnvelope {
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: serde_json::Value,
}

#[derive(Deserialize)]
struct GetResponse {
    found: bool,
    #[serde(rename = "_source", default)]
    source: serde_json::Value,
}

impl ElasticLexicalBackend {
    pub fn new(config: LexicalConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.config.url.trim_end_matches('/'), path);
        let req = self.http.request(method, url);
        match self.config.password {
            Some(ref pass) => req.basic_auth(&self.config.user, Some(pass)),
            None => req,
        }
    }

    /// POST a `_search` body, retrying timeouts up to the configured limit
    async fn post_search(&self, index: &str, body: &serde_json::Value) -> Result<SearchResponse> {
        let path = format!("{}/_search", index);
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;
        loop {
            let result = self
                .request(reqwest::Method::POST, &path)
                .json(body)
                .send()
                .await;
            match result {
                Ok(response) => {
                    if !response.status().is_success() {
                        let status = response.status();
                        let detail = response.text().await.unwrap_or_default();
                        return Err(AuditQaError::Lexical(format!(
                            "search failed (HTTP {}): {}",
                            status, detail
                        )));
                    }
                    return Ok(response.json().await?);
                }
                Err(e) if e.is_timeout() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "lexical search timed out, retry {}/{}",
                        attempt,
                        self.config.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl LexicalBackend for ElasticLexicalBackend {
    async fn search(
        &self,
        index: &str,
        query: serde_json::Value,
        size: usize,
    ) -> Result<Vec<LexicalHit>> {
        let body = json!({ "query": query, "size": size });
        tracing::debug!("lexical query on {}: {}", index, body);
        let response = self.post_search(index, &body).await?;

        Ok(response
            .hits
            .hits
            .into_iter()
            .map(|h| LexicalHit {
                id: h.id,
                score: h.score.unwrap_or(0.0),
                source: h.source,
            })
            .collect())
    }

    async fn keyword_counts(
        &self,
        index: &str,
        doc_ids: &[String],
        keywords: &[String],
        field: &str,
    ) -> Result<HashMap<String, u64>> {
        let mut filters = serde_json::Map::new();
        for kw in keywords {
            filters.insert(kw.clone(), json!({ "match": { field: kw } }));
        }
        let body = json!({
            "size": 0,
            "query": { "bool": { "filter": [ { "terms": { "doc_id": doc_ids } } ] } },
            "aggs": { "keyword_counts": { "filters": { "filters": filters } } }
        });
        let response = self.post_search(index, &body).await?;

        let mut counts = HashMap::new();
        if let Some(buckets) = response
            .aggregations
            .as_ref()
            .and_then(|a| a.pointer("/keyword_counts/buckets"))
            .and_then(|b| b.as_object())
        {
            for (kw, bucket) in buckets {
                let count = bucket.get("doc_count").and_then(|c| c.as_u64()).unwrap_or(0);
                counts.insert(kw.clone(), count);
            }
        }
        Ok(counts)
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<serde_json::Value>> {
        let path = format!("{}/_doc/{}", index, id);
        let response = self.request(reqwest::Method::GET, &path).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AuditQaError::Lexical(format!(
                "get {}/{} failed (HTTP {})",
                index,
                id,
                response.status()
            )));
        }
        let body: GetResponse = response.json().await?;
        Ok(body.found.then_some(body.source))
    }

    async fn ping(&self) -> bool {
        match self.request(reqwest::Method::GET, "").send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
