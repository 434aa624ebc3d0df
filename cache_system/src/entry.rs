//! Cache entry state.
//!
//! Entries are owned by the [`CacheStore`](crate::CacheStore); readers only
//! ever receive clones.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::errors::CacheError;
use crate::keys::CacheKey;
use crate::policy::EntryPolicy;

/// Lifecycle state of the latest fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Empty,
    Loading,
    Success,
    Error,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryStatus::Empty => "empty",
            EntryStatus::Loading => "loading",
            EntryStatus::Success => "success",
            EntryStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Failure recorded for an entry after the retry budget ran out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryError {
    pub message: String,
    /// Fetch attempts made, including the first
    pub attempts: u32,
}

impl EntryError {
    pub fn new(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            message: message.into(),
            attempts,
        }
    }
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.message, self.attempts)
    }
}

impl std::error::Error for EntryError {}

/// Cached query result and its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: CacheKey,
    pub(crate) value: Option<Value>,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) stale_after: Duration,
    pub(crate) gc_after: Duration,
    pub(crate) status: EntryStatus,
    pub(crate) error: Option<EntryError>,
    pub(crate) subscriber_count: usize,
    /// Forces staleness until the next successful write
    pub(crate) invalidated: bool,
    /// Set while no one is subscribed; drives garbage collection
    pub(crate) idle_since: Option<Instant>,
    /// Optimistic patches whose mutation has not settled
    pub(crate) pending_patches: usize,
    /// Store epoch of the latest optimistic patch
    pub(crate) patched_epoch: u64,
}

impl CacheEntry {
    pub(crate) fn empty(key: CacheKey, policy: EntryPolicy, now: Instant) -> Self {
        Self {
            key,
            value: None,
            fetched_at: None,
            stale_after: policy.stale_after,
            gc_after: policy.gc_after,
            status: EntryStatus::Empty,
            error: None,
            subscriber_count: 0,
            invalidated: false,
            idle_since: Some(now),
            pending_patches: 0,
            patched_epoch: 0,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn error(&self) -> Option<&EntryError> {
        self.error.as_ref()
    }

    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn gc_after(&self) -> Duration {
        self.gc_after
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Mutations holding an optimistic patch on this entry
    pub fn pending_patches(&self) -> usize {
        self.pending_patches
    }

    /// End of the freshness window, `None` if never fetched or never stale
    pub fn fresh_until(&self) -> Option<Instant> {
        self.fetched_at
            .and_then(|at| at.checked_add(self.stale_after))
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        if matches!(self.status, EntryStatus::Empty | EntryStatus::Error) || self.invalidated {
            return true;
        }
        match self.fetched_at {
            None => true,
            Some(at) => match at.checked_add(self.stale_after) {
                Some(deadline) => now >= deadline,
                None => false,
            },
        }
    }

    /// Moment the entry becomes collectable, if it has no subscribers
    pub fn gc_deadline(&self) -> Option<Instant> {
        if self.subscriber_count > 0 || self.pending_patches > 0 {
            return None;
        }
        self.idle_since
            .and_then(|since| since.checked_add(self.gc_after))
    }

    /// Decode the cached value into the resource's type
    pub fn value_as<T>(&self) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        match &self.value {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|source| CacheError::Decode {
                    key: self.key.to_string(),
                    source,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(stale_after: Duration) -> CacheEntry {
        let policy = EntryPolicy::new(stale_after, Duration::from_secs(60));
        CacheEntry::empty(CacheKey::of("settings"), policy, Instant::now())
    }

    #[test]
    fn empty_entry_is_stale() {
        let entry = entry(Duration::from_secs(300));
        assert!(entry.is_stale(Instant::now()));
    }

    #[test]
    fn staleness_window_is_half_open() {
        let mut entry = entry(Duration::from_secs(300));
        let fetched_at = Instant::now();
        entry.status = EntryStatus::Success;
        entry.fetched_at = Some(fetched_at);

        assert!(!entry.is_stale(fetched_at));
        assert!(!entry.is_stale(fetched_at + Duration::from_secs(299)));
        assert!(entry.is_stale(fetched_at + Duration::from_secs(300)));
        assert!(entry.is_stale(fetched_at + Duration::from_secs(301)));
    }

    #[test]
    fn error_status_is_always_stale() {
        let mut entry = entry(Duration::from_secs(300));
        let now = Instant::now();
        entry.status = EntryStatus::Error;
        entry.fetched_at = Some(now);
        assert!(entry.is_stale(now));
    }

    #[test]
    fn unbounded_window_never_goes_stale() {
        let mut entry = entry(Duration::MAX);
        let now = Instant::now();
        entry.status = EntryStatus::Success;
        entry.fetched_at = Some(now);
        assert!(!entry.is_stale(now + Duration::from_secs(86_400)));
    }

    #[test]
    fn decodes_typed_value() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Settings {
            fee: u32,
        }

        let mut entry = entry(Duration::ZERO);
        entry.value = Some(json!({"fee": 100}));
        assert_eq!(entry.value_as::<Settings>().unwrap(), Some(Settings { fee: 100 }));
        assert!(matches!(
            entry.value_as::<Vec<String>>(),
            Err(CacheError::Decode { .. })
        ));
    }
}
