//! Configuration management
//!
//! Every default reads its environment key first, so a bare `Config::default()`
//! reflects the deployment environment; an optional YAML file at
//! `<config_dir>/auditqa/config.yml` overrides it.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub lexical: LexicalConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
}

/// LLM endpoint configuration (Ollama-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Embedding model served by the same endpoint
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: env_or_string("LLM_BASE_URL", "http://localhost:11434"),
            model: env_or_string("LLM_MODEL", "gemma3:12b"),
            timeout_secs: env_or("LLM_TIMEOUT_SECS", default_llm_timeout()),
            temperature: default_temperature(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
        }
    }
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_temperature() -> f32 {
    0.1
}

fn default_embedding_model() -> String {
    env_or_string("EMBEDDING_MODEL", "bge-m3")
}

fn default_embedding_dimensions() -> usize {
    1024
}

/// Lexical store configuration (Elasticsearch-compatible REST)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    pub url: String,
    pub user: String,
    /// Read from the environment only, never from the config file
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(default = "default_lexical_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_lexical_retries")]
    pub max_retries: u32,
    #[serde(default = "default_findings_index")]
    pub findings_index: String,
    #[serde(default = "default_chunks_index")]
    pub chunks_index: String,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            url: env_or_string("LEXICAL_URL", "http://localhost:9200"),
            user: env_or_string("LEXICAL_USER", "elastic"),
            password: std::env::var("LEXICAL_PASS").ok(),
            timeout_secs: env_or("LEXICAL_TIMEOUT_SECS", default_lexical_timeout()),
            max_retries: default_lexical_retries(),
            findings_index: default_findings_index(),
            chunks_index: default_chunks_index(),
        }
    }
}

fn default_lexical_timeout() -> u64 {
    30
}

fn default_lexical_retries() -> u32 {
    3
}

fn default_findings_index() -> String {
    "findings".to_string()
}

fn default_chunks_index() -> String {
    "chunks".to_string()
}

/// Vector store configuration (Qdrant)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub url: String,
    #[serde(default = "default_vector_timeout")]
    pub timeout_secs: u64,
    /// HNSW search beam width; `None` leaves the store default
    #[serde(default)]
    pub hnsw_ef: Option<u64>,
    #[serde(default = "default_findings_collection")]
    pub findings_collection: String,
    #[serde(default = "default_chunks_collection")]
    pub chunks_collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: env_or_string("VECTOR_URL", "http://localhost:6334"),
            timeout_secs: env_or("VECTOR_TIMEOUT_SECS", default_vector_timeout()),
            hnsw_ef: std::env::var("VECTOR_HNSW_EF").ok().and_then(|v| v.parse().ok()),
            findings_collection: default_findings_collection(),
            chunks_collection: default_chunks_collection(),
        }
    }
}

fn default_vector_timeout() -> u64 {
    10
}

fn default_findings_collection() -> String {
    "findings_vectors".to_string()
}

fn default_chunks_collection() -> String {
    "chunks_vectors".to_string()
}

/// Retrieval tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub findings_top_k_lex: usize,
    pub findings_top_k_vec: usize,
    pub findings_rrf_k: f64,
    pub findings_final_top_n: usize,
    pub chunks_top_k_lex: usize,
    pub chunks_top_k_vec: usize,
    pub vector_score_threshold: f32,
    /// Tightened threshold used when two or more must-have keywords are active
    pub vector_score_threshold_multi: f32,
    pub confidence_threshold: f64,
    /// Documents collected per must-have keyword during the prefilter
    pub prefilter_doc_top_k: usize,
    /// Documents kept for the keyword-frequency aggregation
    pub keyword_freq_doc_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            findings_top_k_lex: env_or("FINDINGS_TOP_K_LEX", 150),
            findings_top_k_vec: env_or("FINDINGS_TOP_K_VEC", 150),
            findings_rrf_k: env_or("FINDINGS_RRF_K", 60.0),
            findings_final_top_n: env_or("FINDINGS_FINAL_TOP_N", 30),
            chunks_top_k_lex: env_or("CHUNKS_TOP_K_LEX", 300),
            chunks_top_k_vec: env_or("CHUNKS_TOP_K_VEC", 300),
            vector_score_threshold: env_or("VECTOR_SCORE_THRESHOLD", 0.35),
            vector_score_threshold_multi: env_or("VECTOR_SCORE_THRESHOLD_MULTI", 0.65),
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", 0.4),
            prefilter_doc_top_k: 50,
            keyword_freq_doc_top_k: 5,
        }
    }
}

/// Block promotion and answer composition knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerConfig {
    pub block_top_k_chunks: usize,
    /// Minimum findings with full section coverage before intersection mode wins
    pub block_intersection_min: usize,
    pub block_final_top_n: usize,
    pub max_blocks_per_doc: usize,
    pub context_token_budget: usize,
    pub context_merge_adjacent: bool,
    pub section_weight_findings: f64,
    pub section_weight_technique: f64,
    pub query_deadline_secs: u64,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            block_top_k_chunks: env_or("BLOCK_TOP_K_CHUNKS", 3),
            block_intersection_min: env_or("BLOCK_INTERSECTION_MIN", 2),
            block_final_top_n: env_or("BLOCK_FINAL_TOP_N", 3),
            max_blocks_per_doc: env_or("MAX_BLOCKS_PER_DOC", 2),
            context_token_budget: env_or("CONTEXT_TOKEN_BUDGET", 4000),
            context_merge_adjacent: env_or("CONTEXT_MERGE_ADJACENT", true),
            section_weight_findings: env_or("SECTION_WEIGHT_FINDINGS", 0.5),
            section_weight_technique: env_or("SECTION_WEIGHT_TECHNIQUE", 0.5),
            query_deadline_secs: env_or("QUERY_DEADLINE_SECS", 90),
        }
    }
}

impl Config {
    /// Load config from the default path, falling back to env-driven defaults
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let mut config: Config = serde_yaml::from_str(&content)?;
            // The password never lives in the file
            config.lexical.password = std::env::var("LEXICAL_PASS").ok();
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::CONFIG_DIR_NAME)
            .join("config.yml")
    }

    /// Per-query deadline as a [`Duration`]
    pub fn query_deadline(&self) -> Duration {
        Duration::from_secs(self.answer.query_deadline_secs)
    }
}
