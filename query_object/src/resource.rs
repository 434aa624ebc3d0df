//! Resource registry
//!
//! Declares per-resource behaviour: whether the resource waits for the
//! readiness signal, its freshness and collection windows, and which other
//! resources are derived from it and must be invalidated along with it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use cache_system::{EntryPolicy, InvalidationTarget, rw_read, rw_write};

use crate::errors::QueryError;

const SOURCE: &str = "query::resource";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    name: String,
    requires_readiness: bool,
    stale_after: Option<Duration>,
    gc_after: Option<Duration>,
    dependents: Vec<String>,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires_readiness: false,
            stale_after: None,
            gc_after: None,
            dependents: Vec::new(),
        }
    }

    /// Queries for this resource wait until the readiness signal is true
    pub fn requires_readiness(mut self) -> Self {
        self.requires_readiness = true;
        self
    }

    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub fn gc_after(mut self, gc_after: Duration) -> Self {
        self.gc_after = Some(gc_after);
        self
    }

    /// Declare a resource derived from this one
    pub fn dependent(mut self, resource: impl Into<String>) -> Self {
        let resource = resource.into();
        if !self.dependents.contains(&resource) {
            self.dependents.push(resource);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn needs_readiness(&self) -> bool {
        self.requires_readiness
    }

    pub fn dependents(&self) -> &[String] {
        &self.dependents
    }

    /// Overlay this descriptor's windows on a base policy
    pub fn policy(&self, base: EntryPolicy) -> EntryPolicy {
        EntryPolicy::new(
            self.stale_after.unwrap_or(base.stale_after),
            self.gc_after.unwrap_or(base.gc_after),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    inner: Arc<RwLock<HashMap<String, ResourceDescriptor>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: ResourceDescriptor) -> Result<(), QueryError> {
        let mut resources = rw_write(&self.inner, SOURCE, "register");
        if resources.contains_key(descriptor.name()) {
            return Err(QueryError::ResourceAlreadyRegistered(
                descriptor.name().to_string(),
            ));
        }
        resources.insert(descriptor.name().to_string(), descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ResourceDescriptor> {
        rw_read(&self.inner, SOURCE, "get").get(name).cloned()
    }

    /// Unregistered resources do not wait for readiness
    pub fn requires_readiness(&self, name: &str) -> bool {
        self.get(name).is_some_and(|d| d.needs_readiness())
    }

    pub fn names(&self) -> Vec<String> {
        rw_read(&self.inner, SOURCE, "names").keys().cloned().collect()
    }

    /// Every resource reachable through dependent declarations, excluding `name`
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let resources = rw_read(&self.inner, SOURCE, "dependents_of");

        let mut seen: HashSet<&str> = HashSet::from([name]);
        let mut queue: VecDeque<&str> = VecDeque::from([name]);
        let mut found = Vec::new();

        while let Some(current) = queue.pop_front() {
            let Some(descriptor) = resources.get(current) else {
                continue;
            };
            for dependent in &descriptor.dependents {
                if seen.insert(dependent.as_str()) {
                    found.push(dependent.clone());
                    queue.push_back(dependent.as_str());
                }
            }
        }
        found
    }

    /// Add a resource-wide target for every dependent of every target
    pub fn expand(&self, targets: &[InvalidationTarget]) -> Vec<InvalidationTarget> {
        let mut expanded: Vec<InvalidationTarget> = Vec::new();
        for target in targets {
            if !expanded.contains(target) {
                expanded.push(target.clone());
            }
            for dependent in self.dependents_of(target.resource_name()) {
                let dependent = InvalidationTarget::Resource(dependent);
                if !expanded.contains(&dependent) {
                    expanded.push(dependent);
                }
            }
        }
        expanded
    }
}
