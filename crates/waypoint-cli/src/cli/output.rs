//! Shared rendering of execution state.

use std::collections::BTreeMap;

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::{StyledObject, style};

use waypoint_core::gateway::pricing::format_cost;
use waypoint_types::execution::{ExecutionStatus, WorkflowState};

pub fn styled_status(status: ExecutionStatus) -> StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        ExecutionStatus::Completed => s.green(),
        ExecutionStatus::Failed => s.red(),
        ExecutionStatus::Cancelled => s.yellow(),
        ExecutionStatus::Paused => s.magenta(),
        ExecutionStatus::Pending | ExecutionStatus::Running => s.cyan(),
    }
}

fn status_color(status: ExecutionStatus) -> Color {
    match status {
        ExecutionStatus::Completed => Color::Green,
        ExecutionStatus::Failed => Color::Red,
        ExecutionStatus::Cancelled => Color::Yellow,
        ExecutionStatus::Paused => Color::Magenta,
        ExecutionStatus::Pending | ExecutionStatus::Running => Color::Cyan,
    }
}

pub fn cell_for_status(status: ExecutionStatus) -> Cell {
    Cell::new(status.as_str()).fg(status_color(status))
}

/// Print a full execution snapshot.
pub fn print_state(state: &WorkflowState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }

    println!();
    println!(
        "  Execution {} {}",
        style(state.execution_id).bold(),
        styled_status(state.status)
    );
    println!("  Definition: {}", style(&state.definition_id).cyan());
    if let Some(node) = &state.current_node {
        println!("  Current node: {node}");
    }
    println!(
        "  Cost: {}{}",
        format_cost(state.total_cost),
        state
            .budget_usd
            .map(|b| format!(" of {}", format_cost(b)))
            .unwrap_or_default()
    );
    println!(
        "  Tokens: {} in / {} out",
        state.token_usage.input_tokens, state.token_usage.output_tokens
    );
    if state.retry_count.total > 0 {
        println!("  Retries: {}", state.retry_count.total);
    }
    if let (Some(started), Some(completed)) = (state.timestamps.started_at, state.timestamps.completed_at) {
        let elapsed = completed - started;
        println!("  Duration: {:.2}s", elapsed.num_milliseconds() as f64 / 1000.0);
    }

    if !state.completed_nodes.is_empty() {
        let mut cost_by_node: BTreeMap<&str, f64> = BTreeMap::new();
        for call in &state.ai_calls {
            *cost_by_node.entry(call.node_id.as_str()).or_default() += call.cost;
        }

        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Node").fg(Color::Cyan),
                Cell::new("Visits"),
                Cell::new("Retries"),
                Cell::new("Cost"),
            ]);
        for node in &state.completed_nodes {
            table.add_row(vec![
                Cell::new(node),
                Cell::new(state.node_visits.get(node).copied().unwrap_or(0)),
                Cell::new(state.retry_count.get(node)),
                Cell::new(format_cost(cost_by_node.get(node.as_str()).copied().unwrap_or(0.0))),
            ]);
        }
        println!();
        println!("{table}");
    }

    if !state.errors.is_empty() {
        println!();
        println!("  {}", style("Errors").red().bold());
        for error in &state.errors {
            let node = error.node_id.as_deref().unwrap_or("-");
            println!("  - [{node}] {:?}: {}", error.kind, error.message);
        }
    }
    println!();

    Ok(())
}
