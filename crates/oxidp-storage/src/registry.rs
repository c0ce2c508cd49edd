//! Adapter registry: CORE plus named PII partitions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::StorageAdapter;
use crate::error::StorageError;

/// Owns the process's storage adapters.
///
/// The CORE adapter holds protocol and account state. Each PII partition has
/// its own adapter; the partition router decides which one a user's identity
/// data lands in. The registry is assembled once at startup and never
/// mutated, so lookups are lock-free.
#[derive(Clone)]
pub struct AdapterRegistry {
    core: Arc<dyn StorageAdapter>,
    partitions: HashMap<String, Arc<dyn StorageAdapter>>,
}

impl AdapterRegistry {
    /// Creates a registry with the CORE adapter and the PII partition map.
    #[must_use]
    pub fn new(
        core: Arc<dyn StorageAdapter>,
        partitions: HashMap<String, Arc<dyn StorageAdapter>>,
    ) -> Self {
        Self { core, partitions }
    }

    /// The CORE adapter.
    #[must_use]
    pub fn core(&self) -> &Arc<dyn StorageAdapter> {
        &self.core
    }

    /// Looks up the adapter for a PII partition.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidStatement`] when the partition is not
    /// registered. Routing to an unknown partition is a configuration bug
    /// surfaced to the operator, never a panic.
    pub fn partition(&self, name: &str) -> Result<&Arc<dyn StorageAdapter>, StorageError> {
        self.partitions.get(name).ok_or_else(|| {
            StorageError::invalid_statement(format!("unknown PII partition: {name}"))
        })
    }

    /// Names of all registered PII partitions.
    #[must_use]
    pub fn partition_names(&self) -> Vec<&str> {
        self.partitions.keys().map(String::as_str).collect()
    }

    /// Returns `true` when `name` is a registered partition.
    #[must_use]
    pub fn has_partition(&self, name: &str) -> bool {
        self.partitions.contains_key(name)
    }
}
