//! Traits for remote reads
//!
//! This module contains the traits that define the boundary between the
//! query runner and the caller-owned remote API.

pub mod fetcher;

// Re-export all public items for convenience
pub use fetcher::{FnFetcher, Fetcher, fetcher};
