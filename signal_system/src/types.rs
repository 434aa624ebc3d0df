//! Type definitions for signal system
//!
//! This module contains the callback type and the sink trait that
//! the mutation coordinator reports outcomes through.

use crate::event::Notice;
use std::sync::Arc;

/// Notice callback type
pub type NoticeCallback = Arc<dyn Fn(&Notice) + Send + Sync>;

/// Side channel for surfacing operation outcomes to the user.
///
/// The core never renders notices, it only hands them over.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Sink that drops every notice
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notice: Notice) {}
}
