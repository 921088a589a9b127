//! Graph analysis for registration: reachability, unconditional cycles and
//! the worst-case visit bound.
//!
//! Uses `petgraph` to model nodes and edges (normal and error edges alike) as
//! a directed graph. A definition is rejected when it contains a loop that no
//! result can ever leave, or when an acyclic definition could need more node
//! attempts than the configured limit.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use waypoint_types::workflow::{EdgeSpec, WorkflowDefinition};

use super::definition::WorkflowError;

/// Result of a successful analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphReport {
    /// Nodes reachable from the start node, in declaration order.
    pub reachable: Vec<String>,
    pub unreachable: Vec<String>,
    /// `Some` for acyclic graphs: Σ (max_retries + 1) over reachable nodes.
    pub visit_bound: Option<u64>,
}

impl GraphReport {
    pub fn is_acyclic(&self) -> bool {
        self.visit_bound.is_some()
    }
}

fn build_graph<'a>(
    def: &'a WorkflowDefinition,
    include: impl Fn(&EdgeSpec) -> bool,
) -> (DiGraph<&'a str, ()>, HashMap<&'a str, NodeIndex>) {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, NodeIndex> = def
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
        .collect();

    for edge in &def.edges {
        if edge.is_terminal() || !include(edge) {
            continue;
        }
        if let (Some(&from), Some(&to)) =
            (indices.get(edge.from.as_str()), indices.get(edge.to.as_str()))
        {
            graph.add_edge(from, to, ());
        }
    }
    (graph, indices)
}

/// The successor a node always continues to after success, whatever its
/// result: it has an unconditional edge and every normal edge before it
/// shares that target.
fn forced_successor<'a>(def: &'a WorkflowDefinition, node_id: &str) -> Option<&'a str> {
    let mut target = None;
    for edge in def.edges.iter().filter(|e| e.from == node_id && !e.on_error) {
        match target {
            Some(to) if to != edge.to.as_str() => return None,
            _ => target = Some(edge.to.as_str()),
        }
        if edge.is_unconditional() {
            return target;
        }
    }
    None
}

/// Analyze a structurally valid definition.
///
/// `visit_limit` caps the worst-case number of node attempts of acyclic
/// definitions. Cyclic definitions whose loops have conditional exits are
/// accepted and bounded at runtime instead.
pub fn analyze(def: &WorkflowDefinition, visit_limit: u32) -> Result<GraphReport, WorkflowError> {
    // Loops made only of forced successors can never terminate on success.
    let (forced, _) = build_graph(def, |e| {
        !e.on_error && forced_successor(def, &e.from) == Some(e.to.as_str())
    });
    toposort(&forced, None).map_err(|cycle| {
        WorkflowError::UnconditionalCycle(forced[cycle.node_id()].to_string())
    })?;

    let (graph, indices) = build_graph(def, |_| true);
    let start = def
        .start()
        .and_then(|s| indices.get(s).copied())
        .ok_or_else(|| WorkflowError::UnknownNode("definition has no start node".to_string()))?;

    let mut reachable_idx = Vec::new();
    let mut dfs = Dfs::new(&graph, start);
    while let Some(idx) = dfs.next(&graph) {
        reachable_idx.push(idx);
    }

    let (reachable, unreachable): (Vec<_>, Vec<_>) = def
        .nodes
        .iter()
        .partition(|n| reachable_idx.contains(&indices[n.id.as_str()]));

    let (reachable_graph, _) = build_graph(def, |e| {
        reachable.iter().any(|n| n.id == e.from) && reachable.iter().any(|n| n.id == e.to)
    });
    let acyclic = toposort(&reachable_graph, None).is_ok();

    let visit_bound = if acyclic {
        let bound: u64 = reachable.iter().map(|n| u64::from(n.max_attempts())).sum();
        if bound > u64::from(visit_limit) {
            return Err(WorkflowError::VisitBoundExceeded {
                bound,
                limit: visit_limit,
            });
        }
        Some(bound)
    } else {
        None
    };

    let unreachable: Vec<String> = unreachable.into_iter().map(|n| n.id.clone()).collect();
    if !unreachable.is_empty() {
        tracing::warn!(
            definition_id = %def.id,
            unreachable = ?unreachable,
            "definition contains nodes unreachable from the start node"
        );
    }

    Ok(GraphReport {
        reachable: reachable.into_iter().map(|n| n.id.clone()).collect(),
        unreachable,
        visit_bound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::parse_definition_yaml;

    fn def(yaml: &str) -> WorkflowDefinition {
        parse_definition_yaml(yaml).unwrap()
    }

    #[test]
    fn linear_graph_bound_is_sum_of_attempts() {
        let d = def(r#"
id: wf
nodes:
  - { id: a, handler: p }
  - { id: b, handler: p, max_retries: 3 }
  - { id: c, handler: p }
edges:
  - { from: a, to: b }
  - { from: b, to: c }
"#);
        let report = analyze(&d, 200).unwrap();
        assert_eq!(report.visit_bound, Some(6));
        assert_eq!(report.reachable, vec!["a", "b", "c"]);
        assert!(report.unreachable.is_empty());
    }

    #[test]
    fn rejects_unconditional_loop() {
        let d = def(r#"
id: wf
nodes:
  - { id: a, handler: p }
  - { id: b, handler: p }
edges:
  - { from: a, to: b }
  - { from: b, to: a }
"#);
        assert!(matches!(analyze(&d, 200), Err(WorkflowError::UnconditionalCycle(_))));
    }

    #[test]
    fn rejects_unconditional_self_loop() {
        let d = def(r#"
id: wf
nodes:
  - { id: a, handler: p }
edges:
  - { from: a, to: a }
"#);
        assert!(matches!(analyze(&d, 200), Err(WorkflowError::UnconditionalCycle(id)) if id == "a"));
    }

    #[test]
    fn rejects_loop_whose_conditions_share_a_target() {
        let d = def(r#"
id: wf
nodes:
  - { id: a, handler: p }
  - { id: b, handler: p }
edges:
  - { from: a, to: b, condition: "result.ready" }
  - { from: a, to: b }
  - { from: b, to: a }
"#);
        assert!(matches!(analyze(&d, 200), Err(WorkflowError::UnconditionalCycle(_))));
    }

    #[test]
    fn accepts_loop_with_conditional_exit() {
        let d = def(r#"
id: wf
nodes:
  - { id: draft, handler: p }
  - { id: review, handler: p }
edges:
  - { from: draft, to: review }
  - { from: review, to: __end__, condition: "result.approved" }
  - { from: review, to: draft }
"#);
        let report = analyze(&d, 200).unwrap();
        assert!(!report.is_acyclic());
    }

    #[test]
    fn accepts_conditional_retry_to_self() {
        let d = def(r#"
id: wf
nodes:
  - { id: poll, handler: p }
edges:
  - { from: poll, to: poll, condition: "result.pending" }
"#);
        assert!(analyze(&d, 200).is_ok());
    }

    #[test]
    fn rejects_bound_over_limit() {
        let d = def(r#"
id: wf
nodes:
  - { id: a, handler: p, max_retries: 9 }
  - { id: b, handler: p, max_retries: 9 }
edges:
  - { from: a, to: b }
"#);
        let err = analyze(&d, 15).unwrap_err();
        assert!(matches!(err, WorkflowError::VisitBoundExceeded { bound: 20, limit: 15 }));
    }

    #[test]
    fn error_edges_count_toward_reachability() {
        let d = def(r#"
id: wf
nodes:
  - { id: a, handler: p }
  - { id: recover, handler: p }
  - { id: orphan, handler: p }
edges:
  - { from: a, to: recover, on_error: true }
"#);
        let report = analyze(&d, 200).unwrap();
        assert_eq!(report.reachable, vec!["a", "recover"]);
        assert_eq!(report.unreachable, vec!["orphan"]);
        assert_eq!(report.visit_bound, Some(2));
    }
}
