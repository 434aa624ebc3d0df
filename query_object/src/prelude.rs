//! Convenience re-exports for common query-object usage

pub use crate::active::{ActiveQueries, QuerySpec};
pub use crate::errors::QueryError;
pub use crate::gate::{GateDecision, QueryGate};
pub use crate::invalidation::{InvalidationReport, InvalidationRouter};
pub use crate::mutation::{MutationCoordinator, MutationOptions, PendingMutation};
pub use crate::resource::{ResourceDescriptor, ResourceRegistry};
pub use crate::retry::RetryPolicy;
pub use crate::runner::{EnsureOutcome, QueryRunner};
pub use crate::traits::{Fetcher, fetcher};

pub use cache_system::prelude::*;
pub use config::{MutationConfig, QueryConfig};

pub use async_trait::async_trait;
