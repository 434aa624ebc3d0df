//! Cache system for query results
//!
//! This crate provides the in-memory cache store that owns every query
//! result, together with cache keys, entry policies and the change feed.

pub mod entry;
pub mod errors;
pub mod keys;
pub mod lock;
pub mod policy;
pub mod prelude;
pub mod store;

// Re-export centralized config
pub use config::CacheConfig;

pub use entry::{CacheEntry, EntryError, EntryStatus};
pub use errors::CacheError;
pub use keys::{CacheKey, InvalidationTarget};
pub use policy::EntryPolicy;
pub use lock::{mutex_lock, rw_read, rw_write};
pub use store::{CacheChange, CacheStore, ChangeKind, FetchTicket, SubscriptionHandle};
