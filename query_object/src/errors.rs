//! Error types for query and mutation operations

use cache_system::CacheError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    /// Fetch rejected after the retry budget ran out
    #[error("Read of {key} failed after {attempts} attempt(s): {message}")]
    ReadFailure {
        key: String,
        message: String,
        attempts: u32,
    },

    /// The write function rejected; optimistic changes were rolled back
    #[error("{label} failed: {source}")]
    WriteFailure {
        label: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Resource already registered: {0}")]
    ResourceAlreadyRegistered(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl QueryError {
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Self::WriteFailure { .. })
    }

    pub fn is_read_failure(&self) -> bool {
        matches!(self, Self::ReadFailure { .. })
    }
}
