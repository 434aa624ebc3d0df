//! Mutation coordinator
//!
//! Runs a write with an optimistic local patch. The patch and its rollback
//! snapshot are taken synchronously inside [`MutationCoordinator::mutate`];
//! the write itself runs in a detached task, so dropping the returned
//! [`PendingMutation`] never cancels a write that was already issued.
//!
//! Overlapping mutations on the same key chain their snapshots: the second
//! mutation snapshots the first one's optimistic value, so rolling back the
//! second restores the first's patch rather than the server state.
//!
//! A patched key is held until its mutation settles: a fetch that lands in
//! the meantime leaves the patch in place and the key stale. Keys held that
//! way are refetched once the write settles, whichever way it settles.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use cache_system::{CacheKey, CacheStore, InvalidationTarget};
use config::MutationConfig;
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use signal_system::{Notice, NotificationSink};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::QueryError;
use crate::invalidation::InvalidationRouter;

const NOTICE_SOURCE: &str = "mutation";

/// Optimistic patch: current value of a target key to its pending value
pub type PatchFn = Arc<dyn Fn(&CacheKey, Option<&Value>) -> Option<Value> + Send + Sync>;

/// Reconciliation: server value to the authoritative value of a target key.
/// `None` leaves the key alone.
pub type ReconcileFn = Arc<dyn Fn(&CacheKey, &Value) -> Option<Value> + Send + Sync>;

/// Describes one mutation: what to patch, what to invalidate, how to reconcile
#[derive(Clone)]
pub struct MutationOptions {
    label: String,
    targets: Vec<CacheKey>,
    patch: Option<PatchFn>,
    invalidates: Vec<InvalidationTarget>,
    reconcile: Option<ReconcileFn>,
    success_message: Option<String>,
    tracker: Option<Arc<AtomicUsize>>,
}

impl std::fmt::Debug for MutationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationOptions")
            .field("label", &self.label)
            .field("targets", &self.targets)
            .field("optimistic", &self.patch.is_some())
            .field("invalidates", &self.invalidates)
            .field("reconcile", &self.reconcile.is_some())
            .finish()
    }
}

impl MutationOptions {
    /// `label` names the operation in logs and notices, e.g. "Settings update"
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            targets: Vec::new(),
            patch: None,
            invalidates: Vec::new(),
            reconcile: None,
            success_message: None,
            tracker: None,
        }
    }

    pub fn target(mut self, key: CacheKey) -> Self {
        if !self.targets.contains(&key) {
            self.targets.push(key);
        }
        self
    }

    pub fn targets(self, keys: impl IntoIterator<Item = CacheKey>) -> Self {
        keys.into_iter().fold(self, |options, key| options.target(key))
    }

    /// Same patch for every target key
    pub fn optimistic<F>(self, patch: F) -> Self
    where
        F: Fn(Option<&Value>) -> Option<Value> + Send + Sync + 'static,
    {
        self.optimistic_for(move |_, current| patch(current))
    }

    /// Patch that can tell target keys apart
    pub fn optimistic_for<F>(mut self, patch: F) -> Self
    where
        F: Fn(&CacheKey, Option<&Value>) -> Option<Value> + Send + Sync + 'static,
    {
        self.patch = Some(Arc::new(patch));
        self
    }

    /// Patch over the decoded value. A value that does not decode as `T` is
    /// left as is.
    pub fn optimistic_typed<T, F>(self, patch: F) -> Self
    where
        T: Serialize + DeserializeOwned,
        F: Fn(Option<T>) -> Option<T> + Send + Sync + 'static,
    {
        self.optimistic_for(move |key, current| {
            let decoded = match current.map(|v| serde_json::from_value::<T>(v.clone())) {
                None => None,
                Some(Ok(value)) => Some(value),
                Some(Err(error)) => {
                    warn!(key = %key, error = %error, "Optimistic patch skipped, value did not decode");
                    return current.cloned();
                }
            };
            match patch(decoded).map(serde_json::to_value).transpose() {
                Ok(next) => next,
                Err(error) => {
                    warn!(key = %key, error = %error, "Optimistic patch skipped, value did not encode");
                    current.cloned()
                }
            }
        })
    }

    pub fn invalidates(mut self, target: impl Into<InvalidationTarget>) -> Self {
        let target = target.into();
        if !self.invalidates.contains(&target) {
            self.invalidates.push(target);
        }
        self
    }

    /// Write the whole server value into every target key
    pub fn with_server_value(self) -> Self {
        self.reconcile(|_, server| Some(server.clone()))
    }

    pub fn reconcile<F>(mut self, reconcile: F) -> Self
    where
        F: Fn(&CacheKey, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.reconcile = Some(Arc::new(reconcile));
        self
    }

    pub fn success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = Some(message.into());
        self
    }

    /// Count this mutation in `counter` while it is in flight
    pub fn tracked_by(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.tracker = Some(counter);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn target_keys(&self) -> &[CacheKey] {
        &self.targets
    }

    pub fn invalidation_targets(&self) -> &[InvalidationTarget] {
        &self.invalidates
    }
}

/// Rollback snapshot of one in-flight mutation
#[derive(Debug)]
pub struct MutationRecord {
    id: Uuid,
    label: String,
    snapshot: Vec<(CacheKey, Option<Value>)>,
}

impl MutationRecord {
    /// Apply the optimistic patch to every target, keeping what it replaced
    pub fn begin(store: &CacheStore, id: Uuid, options: &MutationOptions) -> Self {
        let mut snapshot = Vec::new();
        if let Some(patch) = &options.patch {
            for key in &options.targets {
                let previous = store.patch_optimistic(key, |current| patch(key, current));
                snapshot.push((key.clone(), previous));
            }
            debug!(
                mutation_id = %id,
                label = %options.label,
                targets = snapshot.len(),
                "Optimistic patch applied"
            );
        }
        Self {
            id,
            label: options.label.clone(),
            snapshot,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn snapshot(&self) -> &[(CacheKey, Option<Value>)] {
        &self.snapshot
    }

    /// Restore every snapshotted value; absent values restore to empty.
    ///
    /// Returns the keys whose fetched value was dropped while the patch was
    /// held, which now need a refetch.
    pub fn rollback(self, store: &CacheStore) -> Vec<CacheKey> {
        let mut stale = Vec::new();
        for (key, previous) in self.snapshot.into_iter().rev() {
            store.patch(&key, previous);
            if store.release_patch(&key) {
                stale.push(key);
            }
        }
        info!(
            mutation_id = %self.id,
            label = %self.label,
            stale = stale.len(),
            "Optimistic patch rolled back"
        );
        stale
    }

    /// Release the hold on every patched key and discard the snapshot.
    /// Returns the keys that need a refetch, as [`Self::rollback`] does.
    pub fn commit(self, store: &CacheStore) -> Vec<CacheKey> {
        let stale: Vec<CacheKey> = self
            .snapshot
            .iter()
            .filter(|(key, _)| store.release_patch(key))
            .map(|(key, _)| key.clone())
            .collect();
        debug!(
            mutation_id = %self.id,
            label = %self.label,
            stale = stale.len(),
            "Snapshot discarded"
        );
        stale
    }
}

/// Decrements a counter when the mutation settles, however it settles
struct InFlightGuard(Vec<Arc<AtomicUsize>>);

impl InFlightGuard {
    fn new(counters: Vec<Arc<AtomicUsize>>) -> Self {
        for counter in &counters {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Self(counters)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        for counter in &self.0 {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Result of a mutation that has been issued
#[derive(Debug)]
pub struct PendingMutation<R> {
    id: Uuid,
    handle: JoinHandle<Result<R, QueryError>>,
}

impl<R> PendingMutation<R> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<R> Future for PendingMutation<R> {
    type Output = Result<R, QueryError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(error) => Err(QueryError::TaskFailed(error.to_string())),
        })
    }
}

struct CoordinatorInner {
    store: CacheStore,
    router: InvalidationRouter,
    sink: Arc<dyn NotificationSink>,
    config: MutationConfig,
    runtime: Handle,
    in_flight: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct MutationCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl std::fmt::Debug for MutationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl MutationCoordinator {
    pub fn new(
        store: CacheStore,
        router: InvalidationRouter,
        sink: Arc<dyn NotificationSink>,
        config: MutationConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                router,
                sink,
                config,
                runtime,
                in_flight: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Mutations issued and not yet settled
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Patch optimistically, then issue `write` in the background.
    ///
    /// The patch is visible to readers as soon as this returns. The returned
    /// future resolves once the cache has been reconciled or rolled back.
    ///
    /// `R: Serialize` is what lets a reconcile function see the response: it
    /// is encoded to a JSON value only when the options carry one.
    pub fn mutate<F, Fut, R>(&self, write: F, options: MutationOptions) -> PendingMutation<R>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let id = Uuid::new_v4();
        let mut counters = vec![self.inner.in_flight.clone()];
        counters.extend(options.tracker.clone());
        let guard = InFlightGuard::new(counters);

        let record = MutationRecord::begin(&self.inner.store, id, &options);
        let inner = self.inner.clone();

        let handle = self.inner.runtime.spawn(async move {
            let _guard = guard;
            debug!(mutation_id = %id, label = %options.label, "Write issued");
            let outcome = match AssertUnwindSafe(async move { write().await })
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow::anyhow!("write panicked")),
            };

            match outcome {
                Ok(response) => {
                    let server = options
                        .reconcile
                        .is_some()
                        .then(|| serde_json::to_value(&response));
                    inner.settle_success(record, &options, server).await;
                    Ok(response)
                }
                Err(error) => Err(inner.settle_failure(record, &options, error).await),
            }
        });

        PendingMutation { id, handle }
    }
}

impl CoordinatorInner {
    async fn settle_success(
        &self,
        record: MutationRecord,
        options: &MutationOptions,
        server: Option<serde_json::Result<Value>>,
    ) {
        let id = record.id();
        let stale = record.commit(&self.store);

        let mut invalidates = options.invalidates.clone();
        if let (Some(reconcile), Some(server)) = (&options.reconcile, server) {
            match server {
                Ok(server) => {
                    for key in &options.targets {
                        if let Some(value) = reconcile(key, &server) {
                            self.store.write(key, value);
                        }
                    }
                }
                Err(error) => {
                    warn!(
                        mutation_id = %id,
                        error = %error,
                        "Server value did not serialize, invalidating targets instead"
                    );
                    for key in &options.targets {
                        let target = InvalidationTarget::from(key);
                        if !invalidates.contains(&target) {
                            invalidates.push(target);
                        }
                    }
                }
            }
        }

        // A reconcile write replaces the dropped fetch, anything else refetches
        for key in stale {
            let target = InvalidationTarget::from(&key);
            if self.store.read(&key).is_invalidated() && !invalidates.contains(&target) {
                invalidates.push(target);
            }
        }

        if !invalidates.is_empty() {
            self.router.invalidate(&invalidates).await;
        }

        info!(mutation_id = %id, label = %options.label, "Mutation succeeded");
        if self.config.notify_success {
            let message = options
                .success_message
                .clone()
                .unwrap_or_else(|| format!("{} succeeded", options.label));
            self.sink.notify(
                Notice::success(message)
                    .with_source(NOTICE_SOURCE)
                    .with_context("mutation_id", json!(id.to_string())),
            );
        }
    }

    async fn settle_failure(
        &self,
        record: MutationRecord,
        options: &MutationOptions,
        error: anyhow::Error,
    ) -> QueryError {
        let id = record.id();
        let rolled_back = record.snapshot().len();
        let stale: Vec<InvalidationTarget> = record
            .rollback(&self.store)
            .iter()
            .map(InvalidationTarget::from)
            .collect();
        if !stale.is_empty() {
            self.router.invalidate(&stale).await;
        }

        warn!(mutation_id = %id, label = %options.label, error = %error, "Mutation failed");
        let message = self
            .config
            .render_rollback_notice(&options.label, &error.to_string());
        self.sink.notify(
            Notice::error(message)
                .with_source(NOTICE_SOURCE)
                .with_context("mutation_id", json!(id.to_string()))
                .with_context("rolled_back", json!(rolled_back)),
        );

        QueryError::WriteFailure {
            label: options.label.clone(),
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active::ActiveQueries;
    use crate::gate::QueryGate;
    use crate::resource::ResourceRegistry;
    use crate::retry::RetryPolicy;
    use crate::runner::QueryRunner;
    use cache_system::EntryStatus;
    use config::{CacheConfig, SignalConfig};
    use serde::Deserialize;
    use signal_system::{ReadinessSignal, SignalManager};
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct Fixture {
        store: CacheStore,
        signals: Arc<SignalManager>,
        coordinator: MutationCoordinator,
    }

    fn fixture() -> Fixture {
        let store = CacheStore::new(&CacheConfig::new(300_000, 300_000, 64));
        let runner = QueryRunner::new(
            store.clone(),
            QueryGate::new(ReadinessSignal::new(true)),
            RetryPolicy::none(),
            Handle::current(),
        );
        let router = InvalidationRouter::new(
            store.clone(),
            runner,
            ActiveQueries::new(),
            ResourceRegistry::new(),
        );
        let signals = Arc::new(SignalManager::new(&SignalConfig::default()));
        let coordinator = MutationCoordinator::new(
            store.clone(),
            router,
            signals.clone(),
            MutationConfig::default(),
            Handle::current(),
        );
        Fixture {
            store,
            signals,
            coordinator,
        }
    }

    fn fee_to(fee: u32) -> impl Fn(Option<&Value>) -> Option<Value> + Send + Sync + 'static {
        move |_| Some(json!({ "fee": fee }))
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_rolls_back_and_notifies() {
        let f = fixture();
        let key = CacheKey::of("settings");
        f.store.write(&key, json!({ "fee": 100 }));

        let pending = f.coordinator.mutate(
            || async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Err::<Value, _>(anyhow::anyhow!("402 insufficient permissions"))
            },
            MutationOptions::new("Settings update")
                .target(key.clone())
                .optimistic(fee_to(150)),
        );

        assert_eq!(f.store.read(&key).value(), Some(&json!({ "fee": 150 })));
        assert_eq!(f.coordinator.in_flight(), 1);

        let error = pending.await.unwrap_err();
        assert!(error.is_write_failure());
        assert!(error.to_string().contains("402"));
        assert_eq!(f.store.read(&key).value(), Some(&json!({ "fee": 100 })));
        assert_eq!(f.coordinator.in_flight(), 0);

        let stats = f.signals.stats();
        assert_eq!(stats.error, 1);
        assert_eq!(stats.success, 0);
    }

    #[tokio::test]
    async fn rollback_of_absent_value_empties_entry() {
        let f = fixture();
        let key = CacheKey::of("acquirers");

        let pending = f.coordinator.mutate(
            || async { Err::<(), _>(anyhow::anyhow!("down")) },
            MutationOptions::new("Acquirer toggle")
                .target(key.clone())
                .optimistic(|_| Some(json!([{ "id": 1, "active": true }]))),
        );
        assert!(f.store.read(&key).value().is_some());

        pending.await.unwrap_err();
        let entry = f.store.read(&key);
        assert_eq!(entry.value(), None);
        assert_eq!(entry.status(), EntryStatus::Empty);
    }

    #[tokio::test]
    async fn rollback_restores_every_target() {
        let f = fixture();
        let settings = CacheKey::of("settings");
        let acquirers = CacheKey::of("acquirers");
        f.store.write(&settings, json!({ "fee": 100 }));

        let options = MutationOptions::new("Bulk update")
            .targets([settings.clone(), acquirers.clone()])
            .optimistic_for(|key, _| match key.resource() {
                "settings" => Some(json!({ "fee": 150 })),
                _ => Some(json!([{ "id": 1, "active": true }])),
            });
        let record = MutationRecord::begin(&f.store, Uuid::new_v4(), &options);
        assert_eq!(record.snapshot().len(), 2);
        assert_eq!(f.store.read(&settings).pending_patches(), 1);
        assert_eq!(f.store.read(&acquirers).pending_patches(), 1);

        let stale = record.rollback(&f.store);
        assert!(stale.is_empty());

        let restored = f.store.read(&settings);
        assert_eq!(restored.value(), Some(&json!({ "fee": 100 })));
        assert_eq!(restored.status(), EntryStatus::Success);
        assert_eq!(restored.pending_patches(), 0);

        let emptied = f.store.read(&acquirers);
        assert_eq!(emptied.value(), None);
        assert_eq!(emptied.status(), EntryStatus::Empty);
        assert_eq!(emptied.pending_patches(), 0);
    }

    #[tokio::test]
    async fn commit_reports_keys_whose_fetch_was_dropped() {
        let f = fixture();
        let settings = CacheKey::of("settings");
        let deposits = CacheKey::of("deposits");
        f.store.write(&settings, json!({ "fee": 100 }));
        f.store.write(&deposits, json!([]));

        let ticket = f.store.begin_fetch(&settings);
        let options = MutationOptions::new("Bulk update")
            .targets([settings.clone(), deposits.clone()])
            .optimistic(|current| current.cloned());
        let record = MutationRecord::begin(&f.store, Uuid::new_v4(), &options);

        assert!(!f.store.write_fetched(&settings, json!({ "fee": 90 }), ticket));
        assert_eq!(record.commit(&f.store), vec![settings.clone()]);
        assert_eq!(f.store.read(&settings).value(), Some(&json!({ "fee": 100 })));
    }

    #[tokio::test]
    async fn server_value_wins_on_success() {
        let f = fixture();
        let key = CacheKey::of("deposits");
        f.store.write(&key, json!({ "status": "pending" }));

        let result = f
            .coordinator
            .mutate(
                || async { Ok(json!({ "status": "approved", "approved_by": "ops" })) },
                MutationOptions::new("Deposit status update")
                    .target(key.clone())
                    .optimistic(|_| Some(json!({ "status": "approved" })))
                    .with_server_value(),
            )
            .await
            .unwrap();

        assert_eq!(result["approved_by"], "ops");
        let entry = f.store.read(&key);
        assert_eq!(entry.value(), Some(&result));
        assert_eq!(entry.status(), EntryStatus::Success);
        assert_eq!(f.signals.stats().success, 1);
    }

    #[tokio::test]
    async fn success_invalidates_declared_targets() {
        let f = fixture();
        let stats = CacheKey::of("deposits-stats");
        f.store.write(&stats, json!({ "total": 3 }));

        f.coordinator
            .mutate(
                || async { Ok(()) },
                MutationOptions::new("Deposit status update").invalidates("deposits-stats"),
            )
            .await
            .unwrap();

        assert!(f.store.read(&stats).is_invalidated());
    }

    #[tokio::test]
    async fn typed_patch_decodes_current_value() {
        #[derive(Serialize, Deserialize)]
        struct Settings {
            fee: u32,
            currency: String,
        }

        let f = fixture();
        let key = CacheKey::of("settings");
        f.store.write(&key, json!({ "fee": 100, "currency": "BRL" }));
        let (release, hold) = oneshot::channel::<()>();

        let pending = f.coordinator.mutate(
            || async move {
                let _ = hold.await;
                Ok(())
            },
            MutationOptions::new("Settings update")
                .target(key.clone())
                .optimistic_typed(|current: Option<Settings>| {
                    current.map(|s| Settings { fee: s.fee + 50, ..s })
                }),
        );

        assert_eq!(
            f.store.read(&key).value(),
            Some(&json!({ "fee": 150, "currency": "BRL" }))
        );
        let _ = release.send(());
        pending.await.unwrap();
    }

    // Overlapping mutations chain snapshots: the second one snapshots the
    // first one's optimistic value, so its rollback restores that value.
    #[tokio::test]
    async fn overlapping_mutations_chain_snapshots() {
        let f = fixture();
        let key = CacheKey::of("settings");
        f.store.write(&key, json!({ "fee": 100 }));
        let (release_first, hold_first) = oneshot::channel::<()>();
        let (release_second, hold_second) = oneshot::channel::<()>();

        let first = f.coordinator.mutate(
            || async move {
                let _ = hold_first.await;
                Ok(())
            },
            MutationOptions::new("First update")
                .target(key.clone())
                .optimistic(fee_to(150)),
        );
        let second = f.coordinator.mutate(
            || async move {
                let _ = hold_second.await;
                Err::<(), _>(anyhow::anyhow!("conflict"))
            },
            MutationOptions::new("Second update")
                .target(key.clone())
                .optimistic(fee_to(200)),
        );
        assert_eq!(f.store.read(&key).value(), Some(&json!({ "fee": 200 })));
        assert_eq!(f.coordinator.in_flight(), 2);

        let _ = release_second.send(());
        second.await.unwrap_err();
        assert_eq!(f.store.read(&key).value(), Some(&json!({ "fee": 150 })));

        let _ = release_first.send(());
        first.await.unwrap();
        assert_eq!(f.store.read(&key).value(), Some(&json!({ "fee": 150 })));
    }

    #[tokio::test]
    async fn dropped_future_does_not_cancel_write() {
        let f = fixture();
        let key = CacheKey::of("settings");
        f.store.write(&key, json!({ "fee": 100 }));
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let pending = f.coordinator.mutate(
            || async move {
                let _ = done_tx.send(());
                Err::<(), _>(anyhow::anyhow!("rejected"))
            },
            MutationOptions::new("Settings update")
                .target(key.clone())
                .optimistic(fee_to(150)),
        );
        drop(pending);

        done_rx.await.unwrap();
        while f.coordinator.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(f.store.read(&key).value(), Some(&json!({ "fee": 100 })));
        assert_eq!(f.signals.stats().error, 1);
    }

    #[tokio::test]
    async fn panicking_write_is_a_write_failure() {
        let f = fixture();
        let key = CacheKey::of("settings");
        f.store.write(&key, json!({ "fee": 100 }));

        let error = f
            .coordinator
            .mutate(
                || async {
                    if true {
                        panic!("bug in writer");
                    }
                    Ok(())
                },
                MutationOptions::new("Settings update")
                    .target(key.clone())
                    .optimistic(fee_to(150)),
            )
            .await
            .unwrap_err();

        assert!(error.is_write_failure());
        assert_eq!(f.store.read(&key).value(), Some(&json!({ "fee": 100 })));
    }

    #[tokio::test]
    async fn tracker_counts_in_flight() {
        let f = fixture();
        let counter = Arc::new(AtomicUsize::new(0));
        let (release, hold) = oneshot::channel::<()>();

        let pending = f.coordinator.mutate(
            || async move {
                let _ = hold.await;
                Ok(())
            },
            MutationOptions::new("Toggle").tracked_by(counter.clone()),
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let _ = release.send(());
        pending.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
