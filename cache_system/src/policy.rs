//! Entry policy configuration
//!
//! This module defines the EntryPolicy struct
//! for configuring freshness and collection per resource.

use config::CacheConfig;
use std::time::Duration;

/// Freshness and garbage collection windows for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPolicy {
    /// Entry is fresh until `fetched_at + stale_after`
    pub stale_after: Duration,
    /// Entry is removed this long after its last subscriber leaves
    pub gc_after: Duration,
}

impl EntryPolicy {
    pub fn new(stale_after: Duration, gc_after: Duration) -> Self {
        Self {
            stale_after,
            gc_after,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.stale_after(), config.gc_after())
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_gc_after(mut self, gc_after: Duration) -> Self {
        self.gc_after = gc_after;
        self
    }
}

impl Default for EntryPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}
