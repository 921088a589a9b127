//! Workflow definition types.
//!
//! A `WorkflowDefinition` is the static program an execution runs: an ordered
//! list of nodes plus an ordered list of edges between them. Definitions are
//! authored as YAML or JSON and are immutable once registered.

use serde::{Deserialize, Serialize};

/// Implicit terminal marker usable as an edge target.
///
/// An edge pointing at `__end__` completes the execution when taken.
pub const END_NODE: &str = "__end__";

fn default_version() -> String {
    "1.0.0".to_string()
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// Immutable graph of nodes and edges describing a repeatable process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique definition id (e.g. "feature-research").
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Semantic version string for display.
    #[serde(default = "default_version")]
    pub version: String,
    /// Entry node. Defaults to the first node in `nodes`.
    #[serde(default, rename = "start", skip_serializing_if = "Option::is_none")]
    pub start_node: Option<String>,
    /// Cost ceiling in USD applied to every execution of this definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_usd: Option<f64>,
    /// Runtime cap on total node visits per execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_node_visits: Option<u32>,
    /// Nodes in declaration order.
    pub nodes: Vec<NodeSpec>,
    /// Edges in declaration order. Order is the routing tie-break.
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

impl WorkflowDefinition {
    /// The node the execution starts at.
    pub fn start(&self) -> Option<&str> {
        self.start_node
            .as_deref()
            .or_else(|| self.nodes.first().map(|n| n.id.as_str()))
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Normal (non-error) outgoing edges of `node_id`, in declaration order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a EdgeSpec> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.from == node_id && !e.on_error)
    }

    /// Error-handling outgoing edges of `node_id`, in declaration order.
    pub fn error_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a EdgeSpec> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.from == node_id && e.on_error)
    }

    /// Distinct handler refs used by this definition.
    pub fn handler_refs(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = self.nodes.iter().map(|n| n.handler.as_str()).collect();
        refs.sort_unstable();
        refs.dedup();
        refs
    }
}

// ---------------------------------------------------------------------------
// Nodes and edges
// ---------------------------------------------------------------------------

/// One step of a workflow, backed by a registered node handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique within the definition.
    pub id: String,
    /// Node type used to look up the handler in the handler registry.
    #[serde(alias = "handler_ref")]
    pub handler: String,
    /// Retries after the first attempt. `0` means exactly one attempt.
    #[serde(default)]
    pub max_retries: u32,
    /// Per-attempt timeout. Falls back to the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Worst-case cost of one attempt in USD, used by the budget pre-check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    /// Opaque per-handler configuration.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

impl NodeSpec {
    /// Total attempts permitted for this node.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// A possible transition between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    /// Target node id or [`END_NODE`].
    pub to: String,
    /// JEXL predicate over the routing context. `None` is the default edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Followed only when the source node exhausts its retries.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub on_error: bool,
}

impl EdgeSpec {
    pub fn is_terminal(&self) -> bool {
        self.to == END_NODE
    }

    pub fn is_unconditional(&self) -> bool {
        self.condition.is_none()
    }
}
