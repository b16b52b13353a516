//! Error types for trove ingestion
//!
//! Only [`IngestError::Config`] is fatal. Everything else is raised per file
//! or per entity and is caught by the dispatcher or the orchestrator loop,
//! logged, and recorded on the affected entity.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Missing capability or invalid settings; aborts startup
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Attaching '{child}' under '{parent}' would create a cycle")]
    Cycle { child: String, parent: String },

    #[error("Fact '{key}' holds a {actual} value, expected {expected}")]
    FactType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Entity '{entity}' has no '{key}' fact")]
    MissingFact { entity: String, key: String },

    #[error("Could not classify {path}: {reason}")]
    Classification { path: String, reason: String },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("Delimited text load failed: {0}")]
    Synthesis(String),

    #[error("Fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] trove_common::TroveError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn synthesis(msg: impl Into<String>) -> Self {
        Self::Synthesis(msg.into())
    }

    pub fn missing_fact(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingFact {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// Whether this error should stop the process rather than a single file
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::LockPoisoned)
    }
}
