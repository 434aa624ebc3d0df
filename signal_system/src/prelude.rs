//! Convenience re-exports for common signal-system usage

// Core signal system components
pub use crate::event::{Notice, Severity};
pub use crate::manager::{CallbackHandle, CallbackId, SignalManager, SignalStats};
pub use crate::readiness::ReadinessSignal;
pub use crate::types::{NoticeCallback, NotificationSink, NullSink};

// Re-export centralized config
pub use config::SignalConfig;
