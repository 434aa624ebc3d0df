//! Error types for the QueryHaus crate
//!
//! This module contains all error types that can be returned by QueryHaus operations.

use cache_system::CacheError;
use config::ConfigError;
use query_object::QueryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryHausError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("QueryHaus must be created inside a Tokio runtime")]
    NoRuntime,
}

impl QueryHausError {
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Self::Query(error) if error.is_write_failure())
    }

    pub fn is_read_failure(&self) -> bool {
        matches!(self, Self::Query(error) if error.is_read_failure())
    }
}
