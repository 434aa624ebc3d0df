//! Convenience re-exports for common cache-system usage

// Core cache system components
pub use crate::entry::{CacheEntry, EntryError, EntryStatus};
pub use crate::errors::CacheError;
pub use crate::keys::{CacheKey, InvalidationTarget};
pub use crate::policy::EntryPolicy;
pub use crate::store::{CacheChange, CacheStore, ChangeKind, FetchTicket, SubscriptionHandle};

// Re-export centralized config
pub use config::CacheConfig;

// Common external dependencies
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;
