//! Notice types and definitions
//!
//! This module defines the user-facing outcome notices ("toasts")
//! that flow through the signal system when a mutation settles.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Notice severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(name)
    }
}

/// Human-readable outcome of an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    /// Unique notice ID
    pub id: uuid::Uuid,
    pub severity: Severity,
    pub message: String,
    /// Label of the operation that produced the notice
    pub source: Option<String>,
    /// Extra structured context (mutation id, affected keys, ...)
    pub context: HashMap<String, serde_json::Value>,
    /// Notice timestamp (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Notice {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            severity,
            message: message.into(),
            source: None,
            context: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn add_context(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), value);
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}
