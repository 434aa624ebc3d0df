//! Cache store implementation
//!
//! This module provides the [`CacheStore`], the single owner of every
//! [`CacheEntry`]. Each mutating operation runs under one write lock, so
//! operations on a key are applied in call order and readers never observe
//! a partially applied entry. Nothing in here awaits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use config::CacheConfig;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::entry::{CacheEntry, EntryError, EntryStatus};
use crate::keys::{CacheKey, InvalidationTarget};
use crate::lock::{rw_read, rw_write};
use crate::policy::EntryPolicy;

const SOURCE: &str = "cache::store";

/// Kind of change applied to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Loading,
    Written,
    Failed,
    Patched,
    Invalidated,
    Evicted,
    /// A fetched value was dropped in favour of a pending optimistic patch
    Superseded,
}

/// Notification published on the change feed after every mutating operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheChange {
    pub key: CacheKey,
    pub kind: ChangeKind,
}

/// Taken when a fetch starts; decides whether its result may replace the value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket(u64);

/// Proof of a subscription; give it back to [`CacheStore::unsubscribe`]
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    key: CacheKey,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

struct StoreInner {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    policies: RwLock<HashMap<String, EntryPolicy>>,
    default_policy: EntryPolicy,
    changes: broadcast::Sender<CacheChange>,
    next_subscription: AtomicU64,
    patch_epoch: AtomicU64,
}

/// In-memory query cache shared by the runner, the router and the coordinator
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.len())
            .field("default_policy", &self.inner.default_policy)
            .finish()
    }
}

impl CacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        let (changes, _) = broadcast::channel(config.change_feed_capacity.max(1));
        Self {
            inner: Arc::new(StoreInner {
                entries: RwLock::new(HashMap::new()),
                policies: RwLock::new(HashMap::new()),
                default_policy: EntryPolicy::from_config(config),
                changes,
                next_subscription: AtomicU64::new(1),
                patch_epoch: AtomicU64::new(0),
            }),
        }
    }

    // ========================================================================
    // Policies
    // ========================================================================

    /// Set the freshness/collection policy of a resource, including existing entries.
    ///
    /// Idle entries whose collection window shrank get a new timer for the
    /// earlier deadline.
    pub fn set_policy(&self, resource: &str, policy: EntryPolicy) {
        rw_write(&self.inner.policies, SOURCE, "set_policy").insert(resource.to_string(), policy);

        let now = Instant::now();
        let mut rearm: Option<Duration> = None;
        {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "set_policy.entries");
            for entry in entries.values_mut().filter(|e| e.key().resource() == resource) {
                let shrank = policy.gc_after < entry.gc_after;
                entry.stale_after = policy.stale_after;
                entry.gc_after = policy.gc_after;
                if !shrank {
                    continue;
                }
                if let Some(deadline) = entry.gc_deadline() {
                    let remaining = deadline.saturating_duration_since(now);
                    rearm = Some(rearm.map_or(remaining, |r| r.min(remaining)));
                }
            }
        }

        if let Some(delay) = rearm {
            trace!(resource, delay_ms = delay.as_millis() as u64, "Collection timer re-armed");
            self.arm_gc(delay);
        }
    }

    pub fn policy_for(&self, resource: &str) -> EntryPolicy {
        rw_read(&self.inner.policies, SOURCE, "policy_for")
            .get(resource)
            .copied()
            .unwrap_or(self.inner.default_policy)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current entry, creating an empty one if absent
    pub fn read(&self, key: &CacheKey) -> CacheEntry {
        if let Some(entry) = self.peek(key) {
            return entry;
        }
        self.with_entry(key, "read", None, |entry| entry.clone())
    }

    /// Current entry without creating it
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        rw_read(&self.inner.entries, SOURCE, "peek").get(key).cloned()
    }

    /// Absent entries are stale
    pub fn is_stale(&self, key: &CacheKey, now: Instant) -> bool {
        rw_read(&self.inner.entries, SOURCE, "is_stale")
            .get(key)
            .is_none_or(|entry| entry.is_stale(now))
    }

    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        rw_read(&self.inner.entries, SOURCE, "subscriber_count")
            .get(key)
            .map_or(0, |entry| entry.subscriber_count)
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        rw_read(&self.inner.entries, SOURCE, "keys")
            .keys()
            .cloned()
            .collect()
    }

    /// Keys of existing entries matched by the target
    pub fn keys_matching(&self, target: &InvalidationTarget) -> Vec<CacheKey> {
        rw_read(&self.inner.entries, SOURCE, "keys_matching")
            .keys()
            .filter(|key| target.matches(key))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.inner.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver for every change applied from now on
    pub fn changes(&self) -> broadcast::Receiver<CacheChange> {
        self.inner.changes.subscribe()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Store a fetched value and mark the entry fresh
    pub fn write(&self, key: &CacheKey, value: Value) {
        let now = Instant::now();
        self.with_entry(key, "write", Some(ChangeKind::Written), |entry| {
            entry.value = Some(value);
            entry.status = EntryStatus::Success;
            entry.error = None;
            entry.fetched_at = Some(now);
            entry.invalidated = false;
        });
        debug!(key = %key, "Cache entry written");
    }

    /// Record a failed fetch, keeping the last good value
    pub fn fail(&self, key: &CacheKey, error: EntryError) {
        debug!(key = %key, error = %error, "Cache entry failed");
        self.with_entry(key, "fail", Some(ChangeKind::Failed), |entry| {
            entry.status = EntryStatus::Error;
            entry.error = Some(error);
        });
    }

    /// Replace the value without touching freshness or status
    pub fn patch(&self, key: &CacheKey, value: Option<Value>) {
        self.with_entry(key, "patch", Some(ChangeKind::Patched), |entry| {
            entry.value = value;
        });
        trace!(key = %key, "Cache entry patched");
    }

    /// Compute the new value from the current one and return the previous value.
    ///
    /// Read and replace happen under one lock, so the returned snapshot is
    /// exactly the value the patch was applied to.
    pub fn patch_with<F>(&self, key: &CacheKey, patch: F) -> Option<Value>
    where
        F: FnOnce(Option<&Value>) -> Option<Value>,
    {
        self.with_entry(key, "patch_with", Some(ChangeKind::Patched), |entry| {
            let previous = entry.value.take();
            entry.value = patch(previous.as_ref());
            previous
        })
    }

    /// Mark a fetch as started; the current value stays visible
    pub fn mark_loading(&self, key: &CacheKey) {
        self.begin_fetch(key);
    }

    /// Mark a fetch as started and take the ticket its result is written with
    pub fn begin_fetch(&self, key: &CacheKey) -> FetchTicket {
        self.with_entry(key, "begin_fetch", Some(ChangeKind::Loading), |entry| {
            entry.status = EntryStatus::Loading;
            entry.error = None;
            FetchTicket(self.inner.patch_epoch.load(Ordering::SeqCst))
        })
    }

    /// Store a fetched value unless an optimistic patch is pending or was
    /// applied after the fetch started.
    ///
    /// A dropped value leaves the patch in place, settles the status and
    /// keeps the entry invalidated so it is fetched again. Returns whether
    /// the value was written.
    pub fn write_fetched(&self, key: &CacheKey, value: Value, ticket: FetchTicket) -> bool {
        let now = Instant::now();
        let written = self.with_entry(key, "write_fetched", None, |entry| {
            entry.status = EntryStatus::Success;
            entry.error = None;
            if entry.pending_patches > 0 || entry.patched_epoch > ticket.0 {
                entry.invalidated = true;
                self.publish(key, ChangeKind::Superseded);
                return false;
            }
            entry.value = Some(value);
            entry.fetched_at = Some(now);
            entry.invalidated = false;
            self.publish(key, ChangeKind::Written);
            true
        });

        if written {
            debug!(key = %key, "Cache entry written");
        } else {
            debug!(key = %key, "Fetched value superseded by pending optimistic patch");
        }
        written
    }

    /// Apply an optimistic patch and hold the entry until [`Self::release_patch`].
    ///
    /// Returns the value the patch replaced.
    pub fn patch_optimistic<F>(&self, key: &CacheKey, patch: F) -> Option<Value>
    where
        F: FnOnce(Option<&Value>) -> Option<Value>,
    {
        self.with_entry(key, "patch_optimistic", Some(ChangeKind::Patched), |entry| {
            entry.pending_patches += 1;
            entry.patched_epoch = self.inner.patch_epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let previous = entry.value.take();
            entry.value = patch(previous.as_ref());
            previous
        })
    }

    /// Drop one optimistic hold; returns whether the entry is left invalidated
    /// with no hold remaining
    pub fn release_patch(&self, key: &CacheKey) -> bool {
        let (needs_refetch, idle_gc) = {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "release_patch");
            let Some(entry) = entries.get_mut(key) else {
                return false;
            };
            entry.pending_patches = entry.pending_patches.saturating_sub(1);
            let released = entry.pending_patches == 0;
            let idle_gc = (released && entry.subscriber_count == 0).then_some(entry.gc_after);
            (released && entry.invalidated, idle_gc)
        };
        if let Some(gc_after) = idle_gc {
            self.arm_gc(gc_after);
        }
        needs_refetch
    }

    /// Mark every matching entry stale.
    ///
    /// Returns the matched keys with their subscriber counts.
    pub fn invalidate(&self, target: &InvalidationTarget) -> Vec<(CacheKey, usize)> {
        let mut entries = rw_write(&self.inner.entries, SOURCE, "invalidate");
        let mut matched = Vec::new();
        for entry in entries.values_mut().filter(|e| target.matches(e.key())) {
            entry.invalidated = true;
            matched.push((entry.key().clone(), entry.subscriber_count));
            self.publish(entry.key(), ChangeKind::Invalidated);
        }
        debug!(target = %target, matched = matched.len(), "Cache entries invalidated");
        matched
    }

    // ========================================================================
    // Subscriptions and garbage collection
    // ========================================================================

    pub fn subscribe(&self, key: &CacheKey) -> SubscriptionHandle {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        let count = self.with_entry(key, "subscribe", None, |entry| {
            entry.subscriber_count += 1;
            entry.idle_since = None;
            entry.subscriber_count
        });
        trace!(key = %key, subscription = id, subscribers = count, "Subscribed");
        SubscriptionHandle {
            id,
            key: key.clone(),
        }
    }

    /// Release a subscription; the last one leaving arms the collection timer
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let gc_after = {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "unsubscribe");
            let Some(entry) = entries.get_mut(&handle.key) else {
                return;
            };
            entry.subscriber_count = entry.subscriber_count.saturating_sub(1);
            if entry.subscriber_count > 0 {
                return;
            }
            entry.idle_since = Some(Instant::now());
            entry.gc_after
        };
        trace!(key = %handle.key, subscription = handle.id, "Last subscriber left");
        self.arm_gc(gc_after);
    }

    /// Remove every unsubscribed entry whose collection deadline has passed
    pub fn collect_garbage(&self, now: Instant) -> Vec<CacheKey> {
        let mut entries = rw_write(&self.inner.entries, SOURCE, "collect_garbage");
        let expired: Vec<CacheKey> = entries
            .values()
            .filter(|entry| entry.gc_deadline().is_some_and(|deadline| deadline <= now))
            .map(|entry| entry.key().clone())
            .collect();

        for key in &expired {
            entries.remove(key);
            self.publish(key, ChangeKind::Evicted);
        }
        if !expired.is_empty() {
            debug!(evicted = expired.len(), "Collected idle cache entries");
        }
        expired
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut entries = rw_write(&self.inner.entries, SOURCE, "clear");
        for key in entries.keys() {
            self.publish(key, ChangeKind::Evicted);
        }
        entries.clear();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn with_entry<R>(
        &self,
        key: &CacheKey,
        op: &'static str,
        change: Option<ChangeKind>,
        f: impl FnOnce(&mut CacheEntry) -> R,
    ) -> R {
        let policy = self.policy_for(key.resource());
        let now = Instant::now();
        let (result, created) = {
            let mut entries = rw_write(&self.inner.entries, SOURCE, op);
            let mut created = false;
            let entry = entries.entry(key.clone()).or_insert_with(|| {
                created = true;
                CacheEntry::empty(key.clone(), policy, now)
            });
            let result = f(entry);
            let idle = entry.subscriber_count == 0;
            if let Some(kind) = change {
                self.publish(key, kind);
            }
            (result, created && idle)
        };

        if created {
            self.arm_gc(policy.gc_after);
        }
        result
    }

    fn publish(&self, key: &CacheKey, kind: ChangeKind) {
        // No receivers is not an error
        let _ = self.inner.changes.send(CacheChange {
            key: key.clone(),
            kind,
        });
    }

    fn arm_gc(&self, gc_after: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::time::sleep(gc_after).await;
            if let Some(inner) = weak.upgrade() {
                CacheStore { inner }.collect_garbage(Instant::now());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> CacheStore {
        CacheStore::new(&CacheConfig::new(300_000, 60_000, 64))
    }

    #[test]
    fn read_creates_empty_entry() {
        let store = store();
        let key = CacheKey::of("settings");

        assert!(store.peek(&key).is_none());
        let entry = store.read(&key);
        assert_eq!(entry.status(), EntryStatus::Empty);
        assert!(entry.value().is_none());
        assert!(store.peek(&key).is_some());
    }

    #[test]
    fn write_marks_fresh_and_clears_error() {
        let store = store();
        let key = CacheKey::of("settings");

        store.fail(&key, EntryError::new("boom", 3));
        store.write(&key, json!({"fee": 100}));

        let entry = store.read(&key);
        assert_eq!(entry.status(), EntryStatus::Success);
        assert!(entry.error().is_none());
        assert!(entry.fetched_at().is_some());
        assert!(!store.is_stale(&key, Instant::now()));
    }

    #[test]
    fn fail_keeps_last_good_value() {
        let store = store();
        let key = CacheKey::of("settings");

        store.write(&key, json!({"fee": 100}));
        store.fail(&key, EntryError::new("timeout", 3));

        let entry = store.read(&key);
        assert_eq!(entry.status(), EntryStatus::Error);
        assert_eq!(entry.value(), Some(&json!({"fee": 100})));
        assert_eq!(entry.error().unwrap().attempts, 3);
        assert!(store.is_stale(&key, Instant::now()));
    }

    #[test]
    fn patch_does_not_refresh() {
        let store = store();
        let key = CacheKey::of("settings");

        store.patch(&key, Some(json!({"fee": 150})));
        let entry = store.read(&key);
        assert_eq!(entry.status(), EntryStatus::Empty);
        assert!(entry.fetched_at().is_none());
        assert!(store.is_stale(&key, Instant::now()));
    }

    #[test]
    fn patch_with_returns_snapshot() {
        let store = store();
        let key = CacheKey::of("settings");
        store.write(&key, json!({"fee": 100}));

        let snapshot = store.patch_with(&key, |old| {
            let mut next = old.cloned().unwrap_or_default();
            next["fee"] = json!(150);
            Some(next)
        });

        assert_eq!(snapshot, Some(json!({"fee": 100})));
        assert_eq!(store.read(&key).value(), Some(&json!({"fee": 150})));
    }

    #[test]
    fn loading_keeps_previous_value() {
        let store = store();
        let key = CacheKey::of("deposits");
        store.write(&key, json!([1, 2]));
        store.mark_loading(&key);

        let entry = store.read(&key);
        assert_eq!(entry.status(), EntryStatus::Loading);
        assert_eq!(entry.value(), Some(&json!([1, 2])));
    }

    #[test]
    fn invalidate_fans_out_by_resource() {
        let store = store();
        let page1 = CacheKey::new("deposits", &json!({"page": 1})).unwrap();
        let page2 = CacheKey::new("deposits", &json!({"page": 2})).unwrap();
        let stats = CacheKey::of("deposits-stats");
        for key in [&page1, &page2, &stats] {
            store.write(key, json!(null));
        }
        let _sub = store.subscribe(&page2);

        let mut matched = store.invalidate(&InvalidationTarget::from("deposits"));
        matched.sort();

        assert_eq!(matched, vec![(page1.clone(), 0), (page2.clone(), 1)]);
        let now = Instant::now();
        assert!(store.is_stale(&page1, now));
        assert!(store.is_stale(&page2, now));
        assert!(!store.is_stale(&stats, now));
    }

    #[test]
    fn write_after_invalidation_is_fresh_again() {
        let store = store();
        let key = CacheKey::of("settings");
        store.write(&key, json!(1));
        store.invalidate(&InvalidationTarget::from(&key));
        assert!(store.is_stale(&key, Instant::now()));

        store.write(&key, json!(2));
        assert!(!store.is_stale(&key, Instant::now()));
    }

    #[test]
    fn subscriber_counting() {
        let store = store();
        let key = CacheKey::of("settings");

        let a = store.subscribe(&key);
        let b = store.subscribe(&key);
        assert_eq!(store.subscriber_count(&key), 2);
        assert!(store.read(&key).gc_deadline().is_none());

        store.unsubscribe(a);
        assert_eq!(store.subscriber_count(&key), 1);
        store.unsubscribe(b);
        assert_eq!(store.subscriber_count(&key), 0);
        assert!(store.read(&key).gc_deadline().is_some());
    }

    #[test]
    fn collect_garbage_respects_deadline_and_subscribers() {
        let store = store();
        let idle = CacheKey::of("acquirers");
        let watched = CacheKey::of("settings");
        store.write(&idle, json!([]));
        let _sub = store.subscribe(&watched);

        let now = Instant::now();
        assert!(store.collect_garbage(now).is_empty());

        let evicted = store.collect_garbage(now + Duration::from_secs(61));
        assert_eq!(evicted, vec![idle.clone()]);
        assert!(store.peek(&idle).is_none());
        assert!(store.peek(&watched).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn gc_timer_evicts_after_last_unsubscribe() {
        let store = store();
        let key = CacheKey::of("settings");
        let handle = store.subscribe(&key);
        store.write(&key, json!({"fee": 100}));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(store.peek(&key).is_some(), "subscribed entries are kept");

        store.unsubscribe(handle);
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(store.peek(&key).is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.peek(&key).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribing_disarms_collection() {
        let store = store();
        let key = CacheKey::of("settings");
        let first = store.subscribe(&key);
        store.unsubscribe(first);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let _second = store.subscribe(&key);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.peek(&key).is_some());
    }

    #[tokio::test]
    async fn change_feed_reports_in_call_order() {
        let store = store();
        let key = CacheKey::of("settings");
        let mut changes = store.changes();

        store.mark_loading(&key);
        store.write(&key, json!(1));
        store.patch(&key, Some(json!(2)));

        let kinds: Vec<ChangeKind> = (0..3)
            .map(|_| changes.try_recv().expect("change published").kind)
            .collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Loading, ChangeKind::Written, ChangeKind::Patched]
        );
    }

    #[test]
    fn per_resource_policy_applies_to_existing_entries() {
        let store = store();
        let key = CacheKey::of("settings");
        store.write(&key, json!(1));

        store.set_policy("settings", EntryPolicy::new(Duration::ZERO, Duration::from_secs(5)));
        assert!(store.is_stale(&key, Instant::now()));
        assert_eq!(store.read(&key).gc_after(), Duration::from_secs(5));
    }

    #[test]
    fn fetched_value_waits_for_pending_patch() {
        let store = store();
        let key = CacheKey::of("settings");
        store.write(&key, json!({"fee": 100}));

        let ticket = store.begin_fetch(&key);
        let previous = store.patch_optimistic(&key, |_| Some(json!({"fee": 150})));
        assert_eq!(previous, Some(json!({"fee": 100})));

        assert!(!store.write_fetched(&key, json!({"fee": 100}), ticket));
        let entry = store.read(&key);
        assert_eq!(entry.value(), Some(&json!({"fee": 150})));
        assert_eq!(entry.status(), EntryStatus::Success);
        assert!(entry.is_invalidated());

        assert!(store.release_patch(&key));
        assert_eq!(store.read(&key).pending_patches(), 0);
    }

    #[test]
    fn fetch_started_before_settled_patch_is_dropped() {
        let store = store();
        let key = CacheKey::of("settings");
        let ticket = store.begin_fetch(&key);
        store.patch_optimistic(&key, |_| Some(json!(2)));
        store.release_patch(&key);

        assert!(!store.write_fetched(&key, json!(1), ticket));
        assert_eq!(store.read(&key).value(), Some(&json!(2)));

        let fresh = store.begin_fetch(&key);
        assert!(store.write_fetched(&key, json!(3), fresh));
        let entry = store.read(&key);
        assert_eq!(entry.value(), Some(&json!(3)));
        assert!(!entry.is_invalidated());
    }

    #[test]
    fn pending_patch_blocks_collection() {
        let store = store();
        let key = CacheKey::of("acquirers");
        store.patch_optimistic(&key, |_| Some(json!([])));
        let later = Instant::now() + Duration::from_secs(3600);
        assert!(store.collect_garbage(later).is_empty());

        assert!(!store.release_patch(&key));
        assert_eq!(store.collect_garbage(later), vec![key]);
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_gc_window_rearms_timer() {
        let store = store();
        let key = CacheKey::of("settings");
        let handle = store.subscribe(&key);
        store.write(&key, json!(1));
        store.unsubscribe(handle);

        tokio::time::sleep(Duration::from_secs(1)).await;
        store.set_policy("settings", EntryPolicy::new(Duration::ZERO, Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(store.peek(&key).is_none());
    }
}
