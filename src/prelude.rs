//! Convenience re-exports for common QueryHaus usage
//!
//! This prelude module re-exports the most commonly used items from the QueryHaus ecosystem,
//! making it easier to import everything you need with a single use statement.
//!
//! # Example
//!
//! ```rust
//! use queryhaus::prelude::*;
//!
//! // Now you have access to all the common QueryHaus types and traits
//! ```

// Core QueryHaus components
pub use crate::core::QueryHaus;
pub use crate::errors::QueryHausError;
pub use crate::mutation_handle::MutationHandle;
pub use crate::subscription::{QueryOptions, QueryState, QuerySubscription};

// Re-export centralized config
pub use config::{AppConfig, CacheConfig, MutationConfig, QueryConfig, SignalConfig};

// Queries, mutations and invalidation
pub use query_object::prelude::*;

// Re-export signal system for notices and readiness
pub use signal_system::prelude::*;

// Common external dependencies
pub use anyhow;
pub use tokio;
pub use uuid::Uuid;
