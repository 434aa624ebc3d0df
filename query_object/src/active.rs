//! Registry of mounted queries.
//!
//! Tracks, per cache key, the fetcher to use for background refetches and
//! the enable flag of every observer. The readiness watcher and the
//! invalidation router both use it to find work for subscribed keys.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use cache_system::{CacheKey, rw_read, rw_write};

use crate::traits::Fetcher;

const SOURCE: &str = "query::active";

/// Identifier of one observer of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Everything the runner needs to execute one query
#[derive(Clone)]
pub struct QuerySpec {
    pub key: CacheKey,
    pub fetcher: Arc<dyn Fetcher>,
    pub enabled: bool,
    pub requires_readiness: bool,
}

impl QuerySpec {
    pub fn new(key: CacheKey, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            key,
            fetcher,
            enabled: true,
            requires_readiness: false,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn requires_readiness(mut self, requires_readiness: bool) -> Self {
        self.requires_readiness = requires_readiness;
        self
    }
}

impl std::fmt::Debug for QuerySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySpec")
            .field("key", &self.key)
            .field("enabled", &self.enabled)
            .field("requires_readiness", &self.requires_readiness)
            .finish()
    }
}

struct ActiveQuery {
    fetcher: Arc<dyn Fetcher>,
    requires_readiness: bool,
    observers: HashMap<ObserverId, bool>,
}

impl ActiveQuery {
    fn spec(&self, key: &CacheKey) -> QuerySpec {
        QuerySpec {
            key: key.clone(),
            fetcher: self.fetcher.clone(),
            enabled: self.observers.values().any(|enabled| *enabled),
            requires_readiness: self.requires_readiness,
        }
    }
}

#[derive(Clone, Default)]
pub struct ActiveQueries {
    queries: Arc<RwLock<HashMap<CacheKey, ActiveQuery>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for ActiveQueries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveQueries")
            .field("keys", &self.len())
            .finish()
    }
}

impl ActiveQueries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer. The latest registered fetcher serves the key.
    pub fn register(&self, spec: &QuerySpec) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut queries = rw_write(&self.queries, SOURCE, "register");
        let query = queries.entry(spec.key.clone()).or_insert_with(|| ActiveQuery {
            fetcher: spec.fetcher.clone(),
            requires_readiness: spec.requires_readiness,
            observers: HashMap::new(),
        });
        query.fetcher = spec.fetcher.clone();
        query.requires_readiness = spec.requires_readiness;
        query.observers.insert(id, spec.enabled);
        id
    }

    /// Change one observer's flag; returns whether the key is enabled afterwards
    pub fn set_enabled(&self, key: &CacheKey, observer: ObserverId, enabled: bool) -> bool {
        let mut queries = rw_write(&self.queries, SOURCE, "set_enabled");
        let Some(query) = queries.get_mut(key) else {
            return false;
        };
        if let Some(flag) = query.observers.get_mut(&observer) {
            *flag = enabled;
        }
        query.observers.values().any(|enabled| *enabled)
    }

    pub fn remove(&self, key: &CacheKey, observer: ObserverId) {
        let mut queries = rw_write(&self.queries, SOURCE, "remove");
        let now_empty = queries.get_mut(key).is_some_and(|query| {
            query.observers.remove(&observer);
            query.observers.is_empty()
        });
        if now_empty {
            queries.remove(key);
        }
    }

    pub fn spec_for(&self, key: &CacheKey) -> Option<QuerySpec> {
        rw_read(&self.queries, SOURCE, "spec_for")
            .get(key)
            .map(|query| query.spec(key))
    }

    pub fn specs(&self) -> Vec<QuerySpec> {
        rw_read(&self.queries, SOURCE, "specs")
            .iter()
            .map(|(key, query)| query.spec(key))
            .collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.queries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::fetcher;

    fn spec(enabled: bool) -> QuerySpec {
        QuerySpec::new(CacheKey::of("settings"), fetcher(|| async { Ok(1) })).enabled(enabled)
    }

    #[test]
    fn key_is_enabled_if_any_observer_is() {
        let active = ActiveQueries::new();
        let key = CacheKey::of("settings");
        let _a = active.register(&spec(false));
        let b = active.register(&spec(false));
        assert!(!active.spec_for(&key).unwrap().enabled);

        assert!(active.set_enabled(&key, b, true));
        assert!(active.spec_for(&key).unwrap().enabled);

        assert!(!active.set_enabled(&key, b, false));
    }

    #[test]
    fn last_observer_removes_key() {
        let active = ActiveQueries::new();
        let key = CacheKey::of("settings");
        let a = active.register(&spec(true));
        let b = active.register(&spec(true));

        active.remove(&key, a);
        assert_eq!(active.len(), 1);
        active.remove(&key, b);
        assert!(active.is_empty());
        assert!(active.spec_for(&key).is_none());
    }

    #[test]
    fn register_survives_poisoned_lock() {
        let active = ActiveQueries::new();
        let queries = active.queries.clone();
        let _ = std::thread::spawn(move || {
            let _guard = queries.write().unwrap();
            panic!("observer callback panicked");
        })
        .join();
        assert!(active.queries.is_poisoned());

        let key = CacheKey::of("settings");
        let observer = active.register(&spec(true));
        assert_eq!(active.len(), 1);
        assert!(active.set_enabled(&key, observer, true));

        active.remove(&key, observer);
        assert!(active.is_empty());
    }
}
