//! # QueryHaus
//!
//! An in-memory query cache with optimistic mutations: reads are served
//! from cache or fetched (one outstanding fetch per key, with retries),
//! writes patch the cache before the server answers and roll back if it
//! refuses, and successful writes invalidate and refetch what they touched.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use queryhaus::prelude::*;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Settings {
//!     fee: u32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = QueryHaus::new(AppConfig::default())?;
//!     client.readiness().set(true);
//!
//!     let key = CacheKey::of("settings");
//!     let mut settings = client.use_query::<Settings>(
//!         key.clone(),
//!         fetcher(|| async { Ok(Settings { fee: 100 }) }),
//!         QueryOptions::default(),
//!     );
//!     settings.wait_until(|entry| entry.status() == EntryStatus::Success).await;
//!
//!     let update = client.mutate(
//!         || async { Ok(Settings { fee: 150 }) },
//!         MutationOptions::new("Settings update")
//!             .target(key.clone())
//!             .optimistic(|_| Some(serde_json::json!({ "fee": 150 })))
//!             .with_server_value(),
//!     );
//!     // Visible before the write settles
//!     assert_eq!(settings.state()?.value.map(|s| s.fee), Some(150));
//!     update.await?;
//!
//!     Ok(())
//! }
//! ```

/// Conditional debug logging macros
/// These macros only compile in code when the `debug-logging` feature is enabled
#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

pub mod core;
pub mod errors;
pub mod mutation_handle;
pub mod prelude;
pub mod subscription;

// Re-export the main public types for convenience
pub use core::QueryHaus;
pub use errors::QueryHausError;
pub use mutation_handle::MutationHandle;
pub use subscription::{QueryOptions, QueryState, QuerySubscription};

// Re-export centralized config
pub use config::{AppConfig, CacheConfig, MutationConfig, QueryConfig, SignalConfig};

// Re-export internal crates used by the public API
pub use cache_system;
pub use query_object;
pub use signal_system;

// Re-export external dependencies used in public API
pub use anyhow;
pub use async_trait;
