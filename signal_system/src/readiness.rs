//! Observable readiness cell
//!
//! Externally owned boolean (typically "authentication handshake completed")
//! that gates queries. Observers are woken on every change.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable handle to a shared readiness flag
#[derive(Clone, Debug)]
pub struct ReadinessSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ReadinessSignal {
    pub fn new(initial: bool) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Current value
    pub fn get(&self) -> bool {
        *self.sender.borrow()
    }

    /// Update the flag. Observers are notified only when the value changes.
    pub fn set(&self, ready: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == ready {
                false
            } else {
                *current = ready;
                true
            }
        });

        if changed {
            tracing::info!(ready, "Readiness signal changed");
        }
    }

    /// New observer; the current value counts as already seen
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for ReadinessSignal {
    fn default() -> Self {
        Self::new(false)
    }
}
