//! Query subscriptions
//!
//! A [`QuerySubscription`] is one observer of a cache key. It keeps the
//! entry alive while held, exposes the typed `{ value, status, error }`
//! view, and releases its observer slot and store subscription on drop.

use std::marker::PhantomData;

use cache_system::{
    CacheChange, CacheEntry, CacheKey, CacheStore, EntryError, EntryStatus, SubscriptionHandle,
};
use query_object::{ActiveQueries, EnsureOutcome, ObserverId, QueryError, QueryRunner, QuerySpec};
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};

/// Options for [`crate::QueryHaus::use_query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub enabled: bool,
    /// Overrides the resource's registered readiness requirement
    pub requires_readiness: Option<bool>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            requires_readiness: None,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn requires_readiness(mut self, requires_readiness: bool) -> Self {
        self.requires_readiness = Some(requires_readiness);
        self
    }
}

/// Typed view of one cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub value: Option<T>,
    pub status: EntryStatus,
    pub error: Option<EntryError>,
}

impl<T> QueryState<T> {
    pub fn is_loading(&self) -> bool {
        self.status == EntryStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status == EntryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == EntryStatus::Error
    }
}

impl<T: DeserializeOwned> QueryState<T> {
    pub fn from_entry(entry: &CacheEntry) -> Result<Self, QueryError> {
        Ok(Self {
            value: entry.value_as::<T>()?,
            status: entry.status(),
            error: entry.error().cloned(),
        })
    }
}

pub struct QuerySubscription<T> {
    key: CacheKey,
    observer: ObserverId,
    handle: Option<SubscriptionHandle>,
    store: CacheStore,
    runner: QueryRunner,
    active: ActiveQueries,
    runtime: Handle,
    changes: broadcast::Receiver<CacheChange>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for QuerySubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySubscription")
            .field("key", &self.key)
            .field("observer", &self.observer)
            .finish()
    }
}

impl<T: DeserializeOwned> QuerySubscription<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: CacheKey,
        observer: ObserverId,
        handle: SubscriptionHandle,
        store: CacheStore,
        runner: QueryRunner,
        active: ActiveQueries,
        runtime: Handle,
        changes: broadcast::Receiver<CacheChange>,
    ) -> Self {
        Self {
            key,
            observer,
            handle: Some(handle),
            store,
            runner,
            active,
            runtime,
            changes,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Raw entry, without decoding
    pub fn entry(&self) -> CacheEntry {
        self.store.read(&self.key)
    }

    /// Current `{ value, status, error }`. Fails only if the cached value
    /// does not decode as `T`.
    pub fn state(&self) -> Result<QueryState<T>, QueryError> {
        QueryState::from_entry(&self.entry())
    }

    /// Serve from cache or fetch, then return the state. A held gate is not
    /// an error, the current state is returned.
    pub async fn load(&self) -> Result<QueryState<T>, QueryError> {
        match self.spec() {
            Some(spec) => {
                let outcome = self.runner.ensure_fresh(&spec).await;
                QueryState::from_entry(outcome.entry())
            }
            None => self.state(),
        }
    }

    /// Fetch regardless of freshness
    pub async fn refetch(&self) -> Result<QueryState<T>, QueryError> {
        match self.spec() {
            Some(spec) => {
                let outcome: EnsureOutcome = self.runner.refetch(&spec).await;
                QueryState::from_entry(outcome.entry())
            }
            None => self.state(),
        }
    }

    /// Flip this observer's enable flag. Enabling starts the query if the
    /// gate now allows it.
    pub fn set_enabled(&self, enabled: bool) {
        let key_enabled = self.active.set_enabled(&self.key, self.observer, enabled);
        if enabled && key_enabled {
            if let Some(spec) = self.spec() {
                let runner = self.runner.clone();
                self.runtime.spawn(async move {
                    runner.ensure_fresh(&spec).await;
                });
            }
        }
    }

    /// Wait for the next change to this key. Returns false once the store
    /// is gone.
    pub async fn changed(&mut self) -> bool {
        loop {
            match self.changes.recv().await {
                Ok(change) if change.key == self.key => return true,
                Ok(_) => continue,
                // Missed changes may include ours
                Err(RecvError::Lagged(_)) => return true,
                Err(RecvError::Closed) => return false,
            }
        }
    }

    /// Wait until the entry satisfies `predicate`
    pub async fn wait_until<P>(&mut self, predicate: P) -> CacheEntry
    where
        P: Fn(&CacheEntry) -> bool,
    {
        loop {
            let entry = self.entry();
            if predicate(&entry) || !self.changed().await {
                return entry;
            }
        }
    }

    fn spec(&self) -> Option<QuerySpec> {
        self.active.spec_for(&self.key)
    }
}

impl<T> Drop for QuerySubscription<T> {
    fn drop(&mut self) {
        self.active.remove(&self.key, self.observer);
        if let Some(handle) = self.handle.take() {
            self.store.unsubscribe(handle);
        }
    }
}
