//! Cache key definitions.
//!
//! A key is a resource name plus a parameter set. Parameters are stored as
//! canonical JSON (object keys sorted recursively) so that two parameter sets
//! compare equal exactly when they are deep-equal.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::CacheError;

const EMPTY_PARAMS: &str = "{}";

/// Identifies one parameterization of a remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    resource: String,
    params: String,
}

impl CacheKey {
    /// Build a key from a resource name and any serializable parameter set.
    ///
    /// `()` and `null` parameters are treated as the empty object.
    pub fn new<P>(resource: impl Into<String>, params: &P) -> Result<Self, CacheError>
    where
        P: Serialize + ?Sized,
    {
        let resource = resource.into();
        if resource.trim().is_empty() {
            return Err(CacheError::InvalidKey(
                "resource name cannot be empty".to_string(),
            ));
        }

        let params = match serde_json::to_value(params)? {
            Value::Null => EMPTY_PARAMS.to_string(),
            value => serde_json::to_string(&canonicalize(value))?,
        };

        Ok(Self { resource, params })
    }

    /// Key for a resource without parameters
    pub fn of(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            params: EMPTY_PARAMS.to_string(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Canonical JSON form of the parameters
    pub fn params(&self) -> &str {
        &self.params
    }

    pub fn has_params(&self) -> bool {
        self.params != EMPTY_PARAMS
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.resource, self.params)
    }
}

/// Rebuild every object with its keys in sorted order.
///
/// Works regardless of whether `serde_json` preserves insertion order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// What an invalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvalidationTarget {
    /// Every parameterization of a resource
    Resource(String),
    /// One exact key
    Key(CacheKey),
}

impl InvalidationTarget {
    pub fn resource(name: impl Into<String>) -> Self {
        Self::Resource(name.into())
    }

    pub fn resource_name(&self) -> &str {
        match self {
            Self::Resource(name) => name,
            Self::Key(key) => key.resource(),
        }
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            Self::Resource(name) => key.resource() == name,
            Self::Key(target) => target == key,
        }
    }
}

impl From<CacheKey> for InvalidationTarget {
    fn from(key: CacheKey) -> Self {
        Self::Key(key)
    }
}

impl From<&CacheKey> for InvalidationTarget {
    fn from(key: &CacheKey) -> Self {
        Self::Key(key.clone())
    }
}

impl From<&str> for InvalidationTarget {
    fn from(name: &str) -> Self {
        Self::Resource(name.to_string())
    }
}

impl From<String> for InvalidationTarget {
    fn from(name: String) -> Self {
        Self::Resource(name)
    }
}

impl fmt::Display for InvalidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(name) => write!(f, "{}{{*}}", name),
            Self::Key(key) => key.fmt(f),
        }
    }
}
