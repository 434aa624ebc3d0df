//! Error types for cache operations
//!
//! This module defines all error types that can occur
//! while building cache keys and decoding cached values.

use thiserror::Error;

/// Cache system errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Cached value for {key} does not match the requested type: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
