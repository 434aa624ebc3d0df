//! Query runner
//!
//! Serves a key from cache or fetches it, keeping at most one outstanding
//! fetch per key. Fetches run in detached tasks: a caller going away does
//! not cancel a read, the result still lands in the store.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cache_system::{CacheEntry, CacheKey, CacheStore, EntryError, FetchTicket, mutex_lock};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::active::QuerySpec;
use crate::gate::{GateDecision, QueryGate};
use crate::retry::RetryPolicy;

const SOURCE: &str = "query::runner";

type SharedFetch = Shared<BoxFuture<'static, ()>>;

struct InFlight {
    generation: u64,
    done: SharedFetch,
}

/// How `ensure_fresh` produced its entry
#[derive(Debug, Clone)]
pub enum EnsureOutcome {
    /// This call started a fetch and waited for it
    Fetched(CacheEntry),
    /// Another caller's fetch was already running; this call waited for it
    Joined(CacheEntry),
    /// The entry was fresh, nothing was fetched
    Cached(CacheEntry),
    /// The gate disallowed the query; not an error
    GateRejected {
        entry: CacheEntry,
        decision: GateDecision,
    },
}

impl EnsureOutcome {
    pub fn entry(&self) -> &CacheEntry {
        match self {
            Self::Fetched(entry) | Self::Joined(entry) | Self::Cached(entry) => entry,
            Self::GateRejected { entry, .. } => entry,
        }
    }

    pub fn into_entry(self) -> CacheEntry {
        match self {
            Self::Fetched(entry) | Self::Joined(entry) | Self::Cached(entry) => entry,
            Self::GateRejected { entry, .. } => entry,
        }
    }

    pub fn is_gate_rejected(&self) -> bool {
        matches!(self, Self::GateRejected { .. })
    }
}

struct RunnerInner {
    store: CacheStore,
    gate: QueryGate,
    retry: RetryPolicy,
    runtime: Handle,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    generation: AtomicU64,
    fetches_started: AtomicU64,
}

impl RunnerInner {
    fn in_flight(&self, op: &'static str) -> MutexGuard<'_, HashMap<CacheKey, InFlight>> {
        mutex_lock(&self.in_flight, SOURCE, op)
    }
}

#[derive(Clone)]
pub struct QueryRunner {
    inner: Arc<RunnerInner>,
}

impl std::fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRunner")
            .field("in_flight", &self.in_flight_count())
            .field("fetches_started", &self.fetches_started())
            .field("retry", &self.inner.retry)
            .finish()
    }
}

impl QueryRunner {
    pub fn new(store: CacheStore, gate: QueryGate, retry: RetryPolicy, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                store,
                gate,
                retry,
                runtime,
                in_flight: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                fetches_started: AtomicU64::new(0),
            }),
        }
    }

    pub fn gate(&self) -> &QueryGate {
        &self.inner.gate
    }

    /// Serve the key, fetching only if it is stale
    pub async fn ensure_fresh(&self, spec: &QuerySpec) -> EnsureOutcome {
        self.run(spec, false).await
    }

    /// Fetch even if the entry is fresh; still gated and de-duplicated
    pub async fn refetch(&self, spec: &QuerySpec) -> EnsureOutcome {
        self.run(spec, true).await
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.inner.in_flight("is_fetching").contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight("in_flight_count").len()
    }

    /// Fetches started since creation, retries not counted
    pub fn fetches_started(&self) -> u64 {
        self.inner.fetches_started.load(Ordering::Relaxed)
    }

    async fn run(&self, spec: &QuerySpec, force: bool) -> EnsureOutcome {
        let store = &self.inner.store;
        let decision = self
            .inner
            .gate
            .evaluate(spec.enabled, spec.requires_readiness);
        if !decision.is_allowed() {
            debug!(key = %spec.key, decision = ?decision, "Query held by gate");
            return EnsureOutcome::GateRejected {
                entry: store.read(&spec.key),
                decision,
            };
        }

        let (done, started) = {
            let mut in_flight = self.inner.in_flight("run");
            if let Some(existing) = in_flight.get(&spec.key) {
                (existing.done.clone(), false)
            } else if !force && !store.is_stale(&spec.key, Instant::now()) {
                return EnsureOutcome::Cached(store.read(&spec.key));
            } else {
                let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                let ticket = store.begin_fetch(&spec.key);
                let done = self.spawn_fetch(spec, generation, ticket);
                in_flight.insert(
                    spec.key.clone(),
                    InFlight {
                        generation,
                        done: done.clone(),
                    },
                );
                (done, true)
            }
        };

        done.await;
        let entry = store.read(&spec.key);
        if started {
            EnsureOutcome::Fetched(entry)
        } else {
            EnsureOutcome::Joined(entry)
        }
    }

    /// Must be called with the in-flight lock held, so the task's cleanup
    /// cannot run before the entry is registered.
    fn spawn_fetch(&self, spec: &QuerySpec, generation: u64, ticket: FetchTicket) -> SharedFetch {
        let inner = self.inner.clone();
        let key = spec.key.clone();
        let fetcher = spec.fetcher.clone();

        inner.fetches_started.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, generation, "Fetch started");

        let task = self.inner.runtime.spawn(async move {
            let started_at = Instant::now();
            let result = AssertUnwindSafe(inner.retry.run(&key, || fetcher.fetch()))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(value)) => {
                    let written = inner.store.write_fetched(&key, value, ticket);
                    debug!(
                        key = %key,
                        written,
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        "Fetch finished"
                    );
                }
                Ok(Err(failure)) => {
                    inner.store.fail(
                        &key,
                        EntryError::new(failure.error.to_string(), failure.attempts),
                    );
                }
                Err(_) => {
                    warn!(key = %key, "Fetcher panicked");
                    inner
                        .store
                        .fail(&key, EntryError::new("fetcher panicked", 1));
                }
            }

            let mut in_flight = inner.in_flight("fetch_cleanup");
            if in_flight
                .get(&key)
                .is_some_and(|f| f.generation == generation)
            {
                in_flight.remove(&key);
            }
        });

        async move {
            // The task catches fetcher panics, a join error means runtime shutdown
            let _ = task.await;
        }
        .boxed()
        .shared()
    }
}
