//! Process-wide registry of flows by name.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::construct::FlowConstruct;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("flow '{0}' is already registered")]
    DuplicateFlow(String),
    #[error("no flow named '{0}'")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// FlowRegistry
// ---------------------------------------------------------------------------

/// Thread-safe registry of flows. Keeps registration order for listing.
pub struct FlowRegistry {
    by_name: DashMap<String, Arc<FlowConstruct>>,
    order: RwLock<Vec<String>>,
}

impl FlowRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registers `flow` under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateFlow`] if the name is taken.
    pub fn register(&self, flow: Arc<FlowConstruct>) -> Result<(), RegistryError> {
        let name = flow.name().to_string();
        match self.by_name.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RegistryError::DuplicateFlow(name)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(flow);
                self.order.write().push(name.clone());
                debug!(flow = %name, "registered flow");
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<FlowConstruct>> {
        self.by_name.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Like [`lookup`](Self::lookup), but a missing flow is an error.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no flow has that name.
    pub fn get(&self, name: &str) -> Result<Arc<FlowConstruct>, RegistryError> {
        self.lookup(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Flow names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<FlowConstruct>> {
        let removed = self.by_name.remove(name).map(|(_, flow)| flow);
        if removed.is_some() {
            self.order.write().retain(|n| n != name);
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
