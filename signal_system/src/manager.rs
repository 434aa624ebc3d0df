use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use cache_system::{rw_read, rw_write};
use config::SignalConfig;
use serde::Serialize;

use crate::event::{Notice, Severity};
use crate::types::{NoticeCallback, NotificationSink};

const SOURCE: &str = "signal::manager";

/// Identifier of a registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Handle returned by [`SignalManager::add_callback`], used to remove the callback again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackHandle {
    id: CallbackId,
}

impl CallbackHandle {
    pub fn id(&self) -> CallbackId {
        self.id
    }
}

/// Counters of emitted notices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignalStats {
    pub emitted: u64,
    pub info: u64,
    pub success: u64,
    pub warning: u64,
    pub error: u64,
    pub rejected_callbacks: u64,
}

/// Signal manager for outcome notifications
pub struct SignalManager {
    callbacks: RwLock<Vec<(CallbackId, NoticeCallback)>>,
    stats: RwLock<SignalStats>,
    next_id: AtomicU64,
    max_callbacks: usize,
}

impl std::fmt::Debug for SignalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalManager")
            .field("callback_count", &self.callback_count())
            .field("max_callbacks", &self.max_callbacks)
            .finish()
    }
}

impl SignalManager {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            stats: RwLock::new(SignalStats::default()),
            next_id: AtomicU64::new(1),
            max_callbacks: config.max_callbacks,
        }
    }

    /// Add notice callback.
    ///
    /// Returns `None` once `max_callbacks` callbacks are registered.
    pub fn add_callback<F>(&self, callback: F) -> Option<CallbackHandle>
    where
        F: Fn(&Notice) + Send + Sync + 'static,
    {
        let mut callbacks = rw_write(&self.callbacks, SOURCE, "add_callback");

        if callbacks.len() >= self.max_callbacks {
            tracing::warn!(
                max_callbacks = self.max_callbacks,
                "Notice callback rejected, limit reached"
            );
            rw_write(&self.stats, SOURCE, "add_callback").rejected_callbacks += 1;
            return None;
        }

        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        callbacks.push((id, Arc::new(callback)));
        Some(CallbackHandle { id })
    }

    /// Remove a previously registered callback
    pub fn remove_callback(&self, handle: CallbackHandle) -> bool {
        let mut callbacks = rw_write(&self.callbacks, SOURCE, "remove_callback");
        let before = callbacks.len();
        callbacks.retain(|(id, _)| *id != handle.id);
        callbacks.len() != before
    }

    /// Emit notice to all subscribers
    pub fn emit(&self, notice: Notice) {
        {
            let mut stats = rw_write(&self.stats, SOURCE, "emit");
            stats.emitted += 1;
            match notice.severity {
                Severity::Info => stats.info += 1,
                Severity::Success => stats.success += 1,
                Severity::Warning => stats.warning += 1,
                Severity::Error => stats.error += 1,
            }
        }

        tracing::debug!(
            notice_id = %notice.id,
            severity = %notice.severity,
            source = ?notice.source,
            "Notice emitted"
        );

        // Clone the list so callbacks may register or remove callbacks themselves
        let callbacks: Vec<NoticeCallback> = rw_read(&self.callbacks, SOURCE, "emit")
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(&notice);
        }
    }

    /// Clear all callbacks
    pub fn clear_callbacks(&self) {
        rw_write(&self.callbacks, SOURCE, "clear_callbacks").clear();
    }

    /// Get number of registered callbacks
    pub fn callback_count(&self) -> usize {
        rw_read(&self.callbacks, SOURCE, "callback_count").len()
    }

    pub fn stats(&self) -> SignalStats {
        rw_read(&self.stats, SOURCE, "stats").clone()
    }
}

impl Default for SignalManager {
    fn default() -> Self {
        Self::new(&SignalConfig::default())
    }
}

impl NotificationSink for SignalManager {
    fn notify(&self, notice: Notice) {
        self.emit(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emits_to_every_callback() {
        let manager = SignalManager::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let seen = seen.clone();
            manager
                .add_callback(move |notice| seen.lock().unwrap().push(notice.message.clone()))
                .expect("callback registered");
        }

        manager.emit(Notice::success("Saved"));
        assert_eq!(*seen.lock().unwrap(), vec!["Saved", "Saved"]);
    }

    #[test]
    fn removed_callback_is_not_called() {
        let manager = SignalManager::default();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let handle = manager
            .add_callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(manager.remove_callback(handle));
        assert!(!manager.remove_callback(handle));
        manager.emit(Notice::error("Failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn enforces_callback_limit() {
        let manager = SignalManager::new(&SignalConfig::new(1));
        assert!(manager.add_callback(|_| {}).is_some());
        assert!(manager.add_callback(|_| {}).is_none());
        assert_eq!(manager.stats().rejected_callbacks, 1);
    }

    #[test]
    fn counts_by_severity() {
        let manager = SignalManager::default();
        manager.emit(Notice::success("a"));
        manager.emit(Notice::error("b"));
        manager.emit(Notice::error("c"));

        let stats = manager.stats();
        assert_eq!(stats.emitted, 3);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.error, 2);
    }

    #[test]
    fn keeps_emitting_after_poisoned_stats() {
        let manager = SignalManager::default();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        manager
            .add_callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = manager.stats.write().unwrap();
            panic!("stats reader panicked");
        }));
        assert!(manager.stats.is_poisoned());

        manager.emit(Notice::success("Saved"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().emitted, 1);
        assert!(manager.add_callback(|_| {}).is_some());
    }
}
