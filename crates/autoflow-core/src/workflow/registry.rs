//! Workflow registry port and its in-memory implementation.
//!
//! The engine resolves `subWorkflow` references through a `WorkflowRegistry`.
//! Registration is keyed by definition id; a later `put` with the same id
//! silently replaces the earlier definition.

use std::sync::Arc;

use dashmap::DashMap;

use autoflow_types::workflow::WorkflowDefinition;

/// Lookup and storage of workflow definitions by id.
pub trait WorkflowRegistry: Send + Sync {
    fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>>;

    /// Store a definition, replacing any existing one with the same id.
    fn put(&self, definition: WorkflowDefinition) -> Arc<WorkflowDefinition>;

    /// All registered definitions, ordered by id.
    fn list(&self) -> Vec<Arc<WorkflowDefinition>>;

    fn remove(&self, id: &str) -> Option<Arc<WorkflowDefinition>>;
}

/// Concurrent in-memory registry backed by `DashMap`.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    definitions: DashMap<String, Arc<WorkflowDefinition>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl WorkflowRegistry for InMemoryRegistry {
    fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn put(&self, definition: WorkflowDefinition) -> Arc<WorkflowDefinition> {
        let definition = Arc::new(definition);
        self.definitions
            .insert(definition.id.clone(), Arc::clone(&definition));
        definition
    }

    fn list(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut all: Vec<_> = self
            .definitions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    fn remove(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.remove(id).map(|(_, def)| def)
    }
}
