//! Invalidation router
//!
//! Marks matching entries stale, expanding targets through the resource
//! registry, then refetches the ones somebody is watching. Refetches of
//! different keys run concurrently.

use cache_system::{CacheKey, CacheStore, InvalidationTarget};
use futures::future::join_all;
use tracing::{debug, info};

use crate::active::ActiveQueries;
use crate::resource::ResourceRegistry;
use crate::runner::{EnsureOutcome, QueryRunner};

/// What one invalidation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Every entry marked stale
    pub marked: Vec<CacheKey>,
    /// Subscribed keys refetched (or joined onto an in-flight fetch)
    pub refetched: Vec<CacheKey>,
    /// Subscribed keys left stale because the gate held them
    pub deferred: Vec<CacheKey>,
}

impl InvalidationReport {
    pub fn is_empty(&self) -> bool {
        self.marked.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct InvalidationRouter {
    store: CacheStore,
    runner: QueryRunner,
    active: ActiveQueries,
    resources: ResourceRegistry,
}

impl InvalidationRouter {
    pub fn new(
        store: CacheStore,
        runner: QueryRunner,
        active: ActiveQueries,
        resources: ResourceRegistry,
    ) -> Self {
        Self {
            store,
            runner,
            active,
            resources,
        }
    }

    /// Mark targets stale and refetch subscribed ones. Targets matching
    /// nothing are a no-op. Completes when every triggered refetch settles.
    pub async fn invalidate(&self, targets: &[InvalidationTarget]) -> InvalidationReport {
        let expanded = self.resources.expand(targets);
        let mut report = InvalidationReport::default();
        let mut to_refetch = Vec::new();

        for target in &expanded {
            for (key, subscribers) in self.store.invalidate(target) {
                if report.marked.contains(&key) {
                    continue;
                }
                report.marked.push(key.clone());
                if subscribers == 0 {
                    continue;
                }
                match self.active.spec_for(&key) {
                    Some(spec) => to_refetch.push(spec),
                    None => debug!(key = %key, "Subscribed key has no registered fetcher"),
                }
            }
        }

        let outcomes = join_all(to_refetch.iter().map(|spec| self.runner.ensure_fresh(spec))).await;
        for (spec, outcome) in to_refetch.into_iter().zip(outcomes) {
            match outcome {
                EnsureOutcome::GateRejected { decision, .. } => {
                    debug!(key = %spec.key, decision = ?decision, "Refetch deferred");
                    report.deferred.push(spec.key);
                }
                _ => report.refetched.push(spec.key),
            }
        }

        if !report.is_empty() {
            info!(
                targets = targets.len(),
                marked = report.marked.len(),
                refetched = report.refetched.len(),
                deferred = report.deferred.len(),
                "Invalidation settled"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active::QuerySpec;
    use crate::gate::QueryGate;
    use crate::resource::ResourceDescriptor;
    use crate::retry::RetryPolicy;
    use crate::traits::fetcher;
    use cache_system::EntryStatus;
    use config::CacheConfig;
    use serde_json::json;
    use signal_system::ReadinessSignal;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::runtime::Handle;

    struct Fixture {
        store: CacheStore,
        active: ActiveQueries,
        resources: ResourceRegistry,
        readiness: ReadinessSignal,
        router: InvalidationRouter,
    }

    fn fixture() -> Fixture {
        let store = CacheStore::new(&CacheConfig::new(300_000, 300_000, 64));
        let readiness = ReadinessSignal::new(true);
        let runner = QueryRunner::new(
            store.clone(),
            QueryGate::new(readiness.clone()),
            RetryPolicy::none(),
            Handle::current(),
        );
        let active = ActiveQueries::new();
        let resources = ResourceRegistry::new();
        let router =
            InvalidationRouter::new(store.clone(), runner, active.clone(), resources.clone());
        Fixture {
            store,
            active,
            resources,
            readiness,
            router,
        }
    }

    fn mount(f: &Fixture, key: &CacheKey, calls: Arc<AtomicU32>) -> QuerySpec {
        let spec = QuerySpec::new(
            key.clone(),
            fetcher(move || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(json!({ "version": n })) }
            }),
        );
        f.active.register(&spec);
        let _ = f.store.subscribe(key);
        f.store.write(key, json!({ "version": 0 }));
        spec
    }

    #[tokio::test]
    async fn subscribed_keys_are_refetched() {
        let f = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        let key = CacheKey::of("settings");
        mount(&f, &key, calls.clone());

        let report = f.router.invalidate(&[InvalidationTarget::from(&key)]).await;
        assert_eq!(report.marked, vec![key.clone()]);
        assert_eq!(report.refetched, vec![key.clone()]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let entry = f.store.read(&key);
        assert_eq!(entry.status(), EntryStatus::Success);
        assert_eq!(entry.value(), Some(&json!({ "version": 1 })));
        assert!(!entry.is_invalidated());
    }

    #[tokio::test]
    async fn unsubscribed_keys_are_only_marked() {
        let f = fixture();
        let key = CacheKey::new("deposits", &json!({ "page": 2 })).unwrap();
        f.store.write(&key, json!([]));

        let report = f.router.invalidate(&[InvalidationTarget::resource("deposits")]).await;
        assert_eq!(report.marked, vec![key.clone()]);
        assert!(report.refetched.is_empty());
        assert!(f.store.read(&key).is_invalidated());
    }

    #[tokio::test]
    async fn unknown_target_is_a_noop() {
        let f = fixture();
        let report = f.router.invalidate(&[InvalidationTarget::resource("nothing")]).await;
        assert!(report.is_empty());
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn dependents_follow_their_source() {
        let f = fixture();
        f.resources
            .register(ResourceDescriptor::new("deposits").dependent("deposits-stats"))
            .unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let stats = CacheKey::of("deposits-stats");
        mount(&f, &stats, calls.clone());

        let report = f.router.invalidate(&[InvalidationTarget::resource("deposits")]).await;
        assert_eq!(report.refetched, vec![stats]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gated_refetch_is_deferred() {
        let f = fixture();
        f.readiness.set(false);
        let key = CacheKey::of("settings");
        let calls = Arc::new(AtomicU32::new(0));
        let spec = mount(&f, &key, calls.clone()).requires_readiness(true);
        f.active.register(&spec);

        let report = f.router.invalidate(&[InvalidationTarget::from(&key)]).await;
        assert_eq!(report.deferred, vec![key.clone()]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(f.store.read(&key).is_invalidated());
    }
}
