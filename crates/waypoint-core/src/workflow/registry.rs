//! Definition registry.
//!
//! Definitions are validated once at registration and then shared by
//! reference (`Arc`) with every execution that runs them. A registered id can
//! never be replaced.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use waypoint_types::workflow::WorkflowDefinition;

use super::definition::{WorkflowError, validate_definition};
use super::graph::{self, GraphReport};

/// Concurrency-safe map from definition id to an immutable definition.
#[derive(Debug)]
pub struct DefinitionRegistry {
    definitions: DashMap<String, Arc<WorkflowDefinition>>,
    /// Engine-wide cap on worst-case node visits.
    visit_limit: u32,
}

impl DefinitionRegistry {
    pub fn new(visit_limit: u32) -> Self {
        Self {
            definitions: DashMap::new(),
            visit_limit,
        }
    }

    /// Validate a definition without registering it.
    ///
    /// A definition-level `max_node_visits` tightens the engine limit; it can
    /// never loosen it.
    pub fn check(&self, def: &WorkflowDefinition) -> Result<GraphReport, WorkflowError> {
        validate_definition(def)?;
        let limit = def
            .max_node_visits
            .map_or(self.visit_limit, |own| own.min(self.visit_limit));
        graph::analyze(def, limit)
    }

    /// Validate and register a definition. Re-registering an id is rejected.
    pub fn register(&self, def: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        self.check(&def)?;
        match self.definitions.entry(def.id.clone()) {
            Entry::Occupied(_) => Err(WorkflowError::DefinitionExists(def.id)),
            Entry::Vacant(slot) => {
                let def = Arc::new(def);
                slot.insert(Arc::clone(&def));
                tracing::info!(
                    definition_id = %def.id,
                    nodes = def.nodes.len(),
                    edges = def.edges.len(),
                    "registered workflow definition"
                );
                Ok(def)
            }
        }
    }

    pub fn get(&self, definition_id: &str) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        self.definitions
            .get(definition_id)
            .map(|d| Arc::clone(d.value()))
            .ok_or_else(|| WorkflowError::DefinitionNotFound(definition_id.to_string()))
    }

    pub fn contains(&self, definition_id: &str) -> bool {
        self.definitions.contains_key(definition_id)
    }

    /// All registered definitions, sorted by id.
    pub fn list(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut defs: Vec<_> = self.definitions.iter().map(|d| Arc::clone(d.value())).collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
