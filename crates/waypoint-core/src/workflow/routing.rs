//! Edge selection after a node finishes.
//!
//! Edges are evaluated in declaration order and the first match wins. A
//! condition that fails to evaluate counts as false.

use serde_json::{Value, json};
use waypoint_types::execution::{NodeOutput, WorkflowState};
use waypoint_types::workflow::{EdgeSpec, WorkflowDefinition};

use super::expression::WorkflowEvaluator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Next(String),
    End,
    /// Outgoing edges exist but none matched.
    NoMatch,
}

/// Context object edge conditions are evaluated against after a success.
pub fn routing_context(state: &WorkflowState, output: &NodeOutput) -> Value {
    json!({
        "result": output.data,
        "next_hint": output.next_hint,
        "results": state.results,
        "input": state.input,
        "context": state.context,
        "execution": {
            "total_cost": state.total_cost,
            "completed": state.completed_nodes,
            "visits": state.visits_total(),
        },
    })
}

/// Context object error edges are evaluated against.
pub fn error_context(state: &WorkflowState, node_id: &str, reason: &str, attempts: u32) -> Value {
    json!({
        "error": { "node": node_id, "reason": reason, "attempts": attempts },
        "results": state.results,
        "input": state.input,
        "context": state.context,
    })
}

fn first_match<'a>(
    def_id: &str,
    edges: impl Iterator<Item = &'a EdgeSpec>,
    ctx: &Value,
) -> Option<&'a EdgeSpec> {
    let evaluator = WorkflowEvaluator::new();
    for edge in edges {
        let Some(condition) = edge.condition.as_deref() else {
            return Some(edge);
        };
        match evaluator.evaluate_bool(condition, ctx) {
            Ok(true) => return Some(edge),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    definition_id = %def_id,
                    from = %edge.from,
                    to = %edge.to,
                    condition,
                    error = %e,
                    "edge condition failed to evaluate, treating as false"
                );
            }
        }
    }
    None
}

fn to_route(edge: &EdgeSpec) -> Route {
    if edge.is_terminal() {
        Route::End
    } else {
        Route::Next(edge.to.clone())
    }
}

/// Pick the successor of `node_id` after a success. A node with no outgoing
/// edges ends the execution.
pub fn select_next(def: &WorkflowDefinition, node_id: &str, ctx: &Value) -> Route {
    let mut edges = def.outgoing(node_id).peekable();
    if edges.peek().is_none() {
        return Route::End;
    }
    first_match(&def.id, edges, ctx).map_or(Route::NoMatch, to_route)
}

/// Pick the recovery route of `node_id` after its retries are exhausted.
/// `None` when no error edge matches.
pub fn select_error_route(def: &WorkflowDefinition, node_id: &str, ctx: &Value) -> Option<Route> {
    first_match(&def.id, def.error_edges(node_id), ctx).map(to_route)
}
