//! Core QueryHaus functionality
//!
//! This module contains the main QueryHaus client. It owns the single cache
//! store and wires the gate, runner, invalidation router and mutation
//! coordinator around it.

use std::future::Future;
use std::sync::{Arc, Mutex};

use cache_system::{
    CacheEntry, CacheKey, CacheStore, EntryStatus, InvalidationTarget, mutex_lock,
};
use config::AppConfig;
use query_object::{
    ActiveQueries, EnsureOutcome, Fetcher, InvalidationReport, InvalidationRouter,
    MutationCoordinator, MutationOptions, PendingMutation, QueryError, QueryGate, QueryRunner,
    QuerySpec, ResourceDescriptor, ResourceRegistry, RetryPolicy,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use signal_system::{ReadinessSignal, SignalManager};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::errors::QueryHausError;
use crate::mutation_handle::MutationHandle;
use crate::subscription::{QueryOptions, QuerySubscription};

/// Main QueryHaus client that owns the cache and runs queries and mutations
pub struct QueryHaus {
    config: AppConfig,
    store: CacheStore,
    readiness: ReadinessSignal,
    signals: Arc<SignalManager>,
    resources: ResourceRegistry,
    active: ActiveQueries,
    runner: QueryRunner,
    router: InvalidationRouter,
    coordinator: MutationCoordinator,
    runtime: Handle,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for QueryHaus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHaus")
            .field("store", &self.store)
            .field("ready", &self.readiness.get())
            .field("active_queries", &self.active.len())
            .finish()
    }
}

impl QueryHaus {
    /// Create a client with its own readiness signal, initially false
    pub fn new(config: AppConfig) -> Result<Self, QueryHausError> {
        Self::with_readiness(config, ReadinessSignal::default())
    }

    /// Create a client from `queryhaus.toml` / `QUERYHAUS_CONFIG`
    pub fn from_env() -> Result<Self, QueryHausError> {
        Self::new(AppConfig::load()?)
    }

    /// Create a client gated by an externally owned readiness signal.
    ///
    /// Must be called inside a Tokio runtime: fetches, writes and the
    /// readiness watcher run as tasks on it.
    pub fn with_readiness(
        config: AppConfig,
        readiness: ReadinessSignal,
    ) -> Result<Self, QueryHausError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| QueryHausError::NoRuntime)?;

        let store = CacheStore::new(&config.cache);
        let signals = Arc::new(SignalManager::new(&config.signal));
        let resources = ResourceRegistry::new();
        let active = ActiveQueries::new();
        let runner = QueryRunner::new(
            store.clone(),
            QueryGate::new(readiness.clone()),
            RetryPolicy::from_config(&config.query),
            runtime.clone(),
        );
        let router = InvalidationRouter::new(
            store.clone(),
            runner.clone(),
            active.clone(),
            resources.clone(),
        );
        let coordinator = MutationCoordinator::new(
            store.clone(),
            router.clone(),
            signals.clone(),
            config.mutation.clone(),
            runtime.clone(),
        );

        let watcher = spawn_readiness_watcher(&runtime, &readiness, &active, &runner);
        info!(ready = readiness.get(), "QueryHaus started");

        Ok(Self {
            config,
            store,
            readiness,
            signals,
            resources,
            active,
            runner,
            router,
            coordinator,
            runtime,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn readiness(&self) -> &ReadinessSignal {
        &self.readiness
    }

    pub fn signals(&self) -> &Arc<SignalManager> {
        &self.signals
    }

    pub fn runner(&self) -> &QueryRunner {
        &self.runner
    }

    /// Declare a resource: readiness requirement, windows and dependents
    pub fn register_resource(&self, descriptor: ResourceDescriptor) -> Result<(), QueryHausError> {
        let policy = descriptor.policy(self.store.policy_for(descriptor.name()));
        let name = descriptor.name().to_string();
        self.resources.register(descriptor)?;
        self.store.set_policy(&name, policy);
        debug!(resource = %name, "Resource registered");
        Ok(())
    }

    /// Observe `key`. The query starts right away if the gate allows it, or
    /// as soon as it does.
    pub fn use_query<T>(
        &self,
        key: CacheKey,
        fetcher: Arc<dyn Fetcher>,
        options: QueryOptions,
    ) -> QuerySubscription<T>
    where
        T: DeserializeOwned,
    {
        let requires_readiness = options
            .requires_readiness
            .unwrap_or_else(|| self.resources.requires_readiness(key.resource()));
        let spec = QuerySpec::new(key.clone(), fetcher)
            .enabled(options.enabled)
            .requires_readiness(requires_readiness);

        let observer = self.active.register(&spec);
        let handle = self.store.subscribe(&key);
        let changes = self.store.changes();

        if let Some(spec) = self.active.spec_for(&key) {
            let runner = self.runner.clone();
            self.runtime.spawn(async move {
                runner.ensure_fresh(&spec).await;
            });
        }

        QuerySubscription::new(
            key,
            observer,
            handle,
            self.store.clone(),
            self.runner.clone(),
            self.active.clone(),
            self.runtime.clone(),
            changes,
        )
    }

    /// One-shot read without subscribing. A held gate returns the cached
    /// value; an exhausted retry budget is a `ReadFailure`.
    pub async fn fetch<T>(
        &self,
        key: CacheKey,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Option<T>, QueryHausError>
    where
        T: DeserializeOwned,
    {
        let requires_readiness = self.resources.requires_readiness(key.resource());
        let spec = QuerySpec::new(key, fetcher).requires_readiness(requires_readiness);
        let entry = match self.runner.ensure_fresh(&spec).await {
            EnsureOutcome::GateRejected { entry, .. } => return Ok(entry.value_as::<T>()?),
            outcome => outcome.into_entry(),
        };

        if entry.status() == EntryStatus::Error {
            let (message, attempts) = entry
                .error()
                .map(|e| (e.message.clone(), e.attempts))
                .unwrap_or_default();
            return Err(QueryError::ReadFailure {
                key: entry.key().to_string(),
                message,
                attempts,
            }
            .into());
        }
        Ok(entry.value_as::<T>()?)
    }

    pub fn read_entry(&self, key: &CacheKey) -> CacheEntry {
        self.store.read(key)
    }

    /// Bind a write function and an options builder into a reusable handle
    pub fn use_mutation<I, R, W, Fut, O>(&self, write: W, options: O) -> MutationHandle<I, R>
    where
        I: Send + 'static,
        R: Serialize + Send + 'static,
        W: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        O: Fn(&I) -> MutationOptions + Send + Sync + 'static,
    {
        MutationHandle::new(self.coordinator.clone(), write, options)
    }

    /// Issue a single mutation
    pub fn mutate<F, Fut, R>(&self, write: F, options: MutationOptions) -> PendingMutation<R>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.coordinator.mutate(write, options)
    }

    pub fn mutations_in_flight(&self) -> usize {
        self.coordinator.in_flight()
    }

    /// Mark targets stale and refetch the subscribed ones
    pub async fn invalidate<I>(&self, targets: I) -> InvalidationReport
    where
        I: IntoIterator,
        I::Item: Into<InvalidationTarget>,
    {
        let targets: Vec<InvalidationTarget> = targets.into_iter().map(Into::into).collect();
        self.router.invalidate(&targets).await
    }

    /// Remove unsubscribed entries whose collection window has passed
    pub fn collect_garbage(&self) -> Vec<CacheKey> {
        self.store.collect_garbage(Instant::now())
    }

    /// Stop the readiness watcher and drop every cached entry
    pub fn shutdown(&self) {
        self.stop_watcher();
        self.store.clear();
        info!("QueryHaus shut down");
    }

    fn stop_watcher(&self) {
        let watcher = mutex_lock(&self.watcher, "queryhaus::core", "stop_watcher").take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
    }
}

impl Drop for QueryHaus {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

/// Start every mounted query each time readiness turns true
fn spawn_readiness_watcher(
    runtime: &Handle,
    readiness: &ReadinessSignal,
    active: &ActiveQueries,
    runner: &QueryRunner,
) -> JoinHandle<()> {
    let mut ready_rx = readiness.subscribe();
    let active = active.clone();
    let runner = runner.clone();

    runtime.spawn(async move {
        while ready_rx.changed().await.is_ok() {
            if !*ready_rx.borrow_and_update() {
                continue;
            }
            let held: Vec<QuerySpec> = active
                .specs()
                .into_iter()
                .filter(|spec| spec.enabled && spec.requires_readiness)
                .collect();
            crate::debug_log!(queries = held.len(), "Readiness gained");
            for spec in held {
                let runner = runner.clone();
                tokio::spawn(async move {
                    runner.ensure_fresh(&spec).await;
                });
            }
        }
    })
}
