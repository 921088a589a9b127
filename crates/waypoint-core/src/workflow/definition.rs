//! Workflow definition parsing, validation, and filesystem discovery.
//!
//! Converts YAML/JSON documents into `WorkflowDefinition` values, validates
//! structural constraints (unique ids, referential integrity, default-edge
//! rules) and finds definition files on disk. Termination analysis lives in
//! [`super::graph`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use waypoint_types::workflow::{END_NODE, WorkflowDefinition};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while loading, validating or registering definitions.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("duplicate node id: '{0}'")]
    DuplicateNode(String),

    /// An edge or the start node references a node that does not exist.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// Nodes chained only by unconditional edges form a loop.
    #[error("unconditional cycle detected involving node '{0}'")]
    UnconditionalCycle(String),

    #[error("worst-case node visits {bound} exceed the limit of {limit}")]
    VisitBoundExceeded { bound: u64, limit: u32 },

    #[error("definition '{0}' is already registered")]
    DefinitionExists(String),

    #[error("definition '{0}' not found")]
    DefinitionNotFound(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a structurally valid `WorkflowDefinition`.
pub fn parse_definition_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Parse a JSON string into a structurally valid `WorkflowDefinition`.
pub fn parse_definition_json(json: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_definition_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Id is non-empty and at least one node exists
/// - Node ids are non-empty, unique, and not the reserved terminal marker
/// - The start node and every edge endpoint reference existing nodes
///   (edge targets may also be the terminal marker)
/// - Each node has at most one unconditional normal edge and at most one
///   unconditional error edge, and no edge of the same kind follows it
/// - Edge conditions are non-blank
/// - Timeouts and cost estimates are positive when set
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.id.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "definition id must not be empty".to_string(),
        ));
    }

    if def.nodes.is_empty() {
        return Err(WorkflowError::ValidationError(
            "definition must have at least one node".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for node in &def.nodes {
        if node.id.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "node id must not be empty".to_string(),
            ));
        }
        if node.id == END_NODE {
            return Err(WorkflowError::ValidationError(format!(
                "node id '{END_NODE}' is reserved"
            )));
        }
        if node.handler.trim().is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "node '{}' has no handler",
                node.id
            )));
        }
        if !seen_ids.insert(node.id.as_str()) {
            return Err(WorkflowError::DuplicateNode(node.id.clone()));
        }
        if node.timeout_secs == Some(0) {
            return Err(WorkflowError::ValidationError(format!(
                "node '{}' timeout must be > 0",
                node.id
            )));
        }
        if let Some(cost) = node.estimated_cost {
            if !cost.is_finite() || cost < 0.0 {
                return Err(WorkflowError::ValidationError(format!(
                    "node '{}' estimated_cost must be a non-negative number",
                    node.id
                )));
            }
        }
    }

    if let Some(start) = &def.start_node {
        if !seen_ids.contains(start.as_str()) {
            return Err(WorkflowError::UnknownNode(format!(
                "start node '{start}' does not exist"
            )));
        }
    }

    for edge in &def.edges {
        if !seen_ids.contains(edge.from.as_str()) {
            return Err(WorkflowError::UnknownNode(format!(
                "edge source '{}' does not exist",
                edge.from
            )));
        }
        if edge.to != END_NODE && !seen_ids.contains(edge.to.as_str()) {
            return Err(WorkflowError::UnknownNode(format!(
                "edge '{}' -> '{}' targets an unknown node",
                edge.from, edge.to
            )));
        }
        if let Some(cond) = &edge.condition {
            if cond.trim().is_empty() {
                return Err(WorkflowError::ValidationError(format!(
                    "edge '{}' -> '{}' has an empty condition",
                    edge.from, edge.to
                )));
            }
        }
    }

    for node in &def.nodes {
        check_default_edges(&node.id, def.outgoing(&node.id), "normal")?;
        check_default_edges(&node.id, def.error_edges(&node.id), "error")?;
    }

    Ok(())
}

/// At most one unconditional edge, and it must come last among its kind.
fn check_default_edges<'a>(
    node_id: &str,
    edges: impl Iterator<Item = &'a waypoint_types::workflow::EdgeSpec>,
    kind: &str,
) -> Result<(), WorkflowError> {
    let mut default_seen: Option<&str> = None;
    for edge in edges {
        if let Some(default_to) = default_seen {
            return Err(WorkflowError::ValidationError(if edge.is_unconditional() {
                format!("node '{node_id}' has more than one unconditional {kind} edge")
            } else {
                format!(
                    "node '{node_id}' has a {kind} edge to '{}' after its unconditional edge to '{default_to}'; it can never match",
                    edge.to
                )
            }));
        }
        if edge.is_unconditional() {
            default_seen = Some(edge.to.as_str());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a definition from a `.yaml`, `.yml` or `.json` file.
pub fn load_definition_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_definition_json(&content),
        _ => parse_definition_yaml(&content),
    }
}

/// Save a definition to a YAML file, creating parent directories.
pub fn save_definition_file(path: &Path, def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_definition_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Recursively discover definition files under `base_dir`.
///
/// Files that fail to parse are skipped with a warning.
pub fn discover_definitions(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
            continue;
        }
        let is_definition = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml" | "json")
        );
        if !is_definition {
            continue;
        }
        match load_definition_file(&path) {
            Ok(def) => results.push((path, def)),
            Err(err) => tracing::warn!(?path, %err, "skipping unparseable workflow file"),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
