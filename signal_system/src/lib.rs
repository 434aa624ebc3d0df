//! Signal system for outcome notices and readiness
//!
//! This crate provides the notification sink the mutation coordinator
//! reports through, and the observable readiness flag that gates queries
//! in the QueryHaus ecosystem.

pub mod event;
pub mod manager;
pub mod prelude;
pub mod readiness;
pub mod types;

pub use event::{Notice, Severity};
pub use manager::{CallbackHandle, CallbackId, SignalManager, SignalStats};
pub use readiness::ReadinessSignal;
pub use types::{NoticeCallback, NotificationSink, NullSink};

// Re-export centralized config
pub use config::SignalConfig;
