//! Query object system
//!
//! This crate holds the moving parts that sit on top of the cache store:
//! the execution gate, the query runner with fetch de-duplication and read
//! retries, the registries of resources and mounted queries, the
//! invalidation router and the optimistic mutation coordinator.

pub mod active;
pub mod errors;
pub mod gate;
pub mod invalidation;
pub mod mutation;
pub mod prelude;
pub mod resource;
pub mod retry;
pub mod runner;
pub mod traits;

// Re-export centralized config
pub use config::{MutationConfig, QueryConfig};

pub use active::{ActiveQueries, ObserverId, QuerySpec};
pub use errors::QueryError;
pub use gate::{GateDecision, QueryGate, decide};
pub use invalidation::{InvalidationReport, InvalidationRouter};
pub use mutation::{
    MutationCoordinator, MutationOptions, MutationRecord, PatchFn, PendingMutation, ReconcileFn,
};
pub use resource::{ResourceDescriptor, ResourceRegistry};
pub use retry::{RetryFailure, RetryPolicy};
pub use runner::{EnsureOutcome, QueryRunner};
pub use traits::{Fetcher, FnFetcher, fetcher};
