//! Error types for auditqa

use thiserror::Error;

/// Result type alias using AuditQaError
pub type Result<T> = std::result::Result<T, AuditQaError>;

/// Error type alias for convenience
pub type Error = AuditQaError;

/// Exit codes for CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const USAGE_ERROR: i32 = 2;
}

/// Main error type for auditqa
#[derive(Debug, Error)]
pub enum AuditQaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Vector store error: {0}")]
    Vector(String),

    #[error("Lexical store error: {0}")]
    Lexical(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AuditQaError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => exit_codes::USAGE_ERROR,
            _ => exit_codes::GENERAL_ERROR,
        }
    }
}

impl From<qdrant_client::QdrantError> for AuditQaError {
    fn from(e: qdrant_client::QdrantError) -> Self {
        Self::Vector(e.to_string())
    }
}
