//! Error type shared by every operation of the adapter.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Error reported by the MongoDB driver or server
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// An operation needed a connection but no session is open
    #[error("Not connected: open a session with init() first")]
    NotConnected,

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Length mismatch: {ids} ids for {vectors} vectors")]
    LengthMismatch { ids: usize, vectors: usize },

    /// Readiness polling ran out of time
    #[error("Search index '{name}' not queryable after {waited:?}")]
    IndexNotReady { name: String, waited: Duration },

    #[error("Search index '{name}' failed to build (status {status})")]
    IndexFailed { name: String, status: String },

    /// A result document lacked a usable id field
    #[error("Unexpected document: {0}")]
    UnexpectedDocument(String),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// The store refused a request that is not a pipeline
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid vector: {0}")]
    InvalidVector(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors caused by the caller's input rather than the backend.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::DimensionMismatch { .. } | Error::LengthMismatch { .. } | Error::InvalidVector(_)
        )
    }
}
