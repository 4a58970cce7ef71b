//! Registry mapping step names to executors.

use super::Executor;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Registry of executors keyed by step name.
///
/// Used when a pipeline is assembled from names, for example by
/// [`build_default_pipeline`](crate::pipeline::build_default_pipeline).
#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Executor>>,
}

impl ExecutorRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor, replacing any previous one under the same name.
    pub fn register(&self, step_name: impl Into<String>, executor: Executor) {
        let step_name = step_name.into();
        tracing::debug!(step_name = %step_name, blocking = executor.is_blocking(), "Executor registered");
        self.executors.write().insert(step_name, executor);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(self, step_name: impl Into<String>, executor: Executor) -> Self {
        self.register(step_name, executor);
        self
    }

    /// Gets the executor registered for a step name.
    #[must_use]
    pub fn get(&self, step_name: &str) -> Option<Executor> {
        self.executors.read().get(step_name).cloned()
    }

    /// Returns true if a step name has an executor.
    #[must_use]
    pub fn contains(&self, step_name: &str) -> bool {
        self.executors.read().contains_key(step_name)
    }

    /// Removes and returns an executor.
    pub fn unregister(&self, step_name: &str) -> Option<Executor> {
        self.executors.write().remove(step_name)
    }

    /// Lists the registered step names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered executors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.read().is_empty()
    }
}
