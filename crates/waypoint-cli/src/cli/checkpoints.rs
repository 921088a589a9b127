//! `waypoint checkpoints`: list, show, delete and sweep stored executions.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use waypoint_core::gateway::pricing::format_cost;
use waypoint_types::execution::{ExecutionFilter, ExecutionStatus, Page};

use super::output::{cell_for_status, print_state};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum CheckpointCommand {
    /// List stored executions, oldest first.
    #[command(alias = "ls")]
    List {
        /// Only executions with this status (repeatable).
        #[arg(long = "status")]
        statuses: Vec<String>,

        /// Only executions of this definition.
        #[arg(long)]
        definition: Option<String>,

        /// Only executions carrying this label, as key=value.
        #[arg(long, value_parser = super::run::parse_label)]
        label: Option<(String, String)>,

        /// Number of executions to skip.
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Show the full state of one execution.
    Show {
        /// Execution UUID.
        execution_id: String,
    },

    /// Delete a finished execution's checkpoint.
    #[command(alias = "rm")]
    Delete {
        /// Execution UUID.
        execution_id: String,
    },

    /// Cancel a paused or interrupted execution in its checkpoint.
    Cancel {
        /// Execution UUID.
        execution_id: String,

        /// Reason recorded on the execution.
        #[arg(long, default_value = "cancelled from the command line")]
        reason: String,
    },

    /// Remove expired checkpoints now.
    Sweep,
}

pub async fn handle_checkpoint_command(cmd: CheckpointCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        CheckpointCommand::List {
            statuses,
            definition,
            label,
            offset,
            limit,
        } => {
            let statuses = statuses
                .iter()
                .map(|s| s.parse::<ExecutionStatus>().map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()?;
            let filter = ExecutionFilter {
                statuses,
                definition_id: definition,
                label,
            };
            handle_list(&filter, Page { offset, limit }, state, json).await
        }
        CheckpointCommand::Show { execution_id } => handle_show(&parse_id(&execution_id)?, state, json).await,
        CheckpointCommand::Delete { execution_id } => handle_delete(&parse_id(&execution_id)?, state, json).await,
        CheckpointCommand::Cancel { execution_id, reason } => {
            handle_cancel(&parse_id(&execution_id)?, &reason, state, json).await
        }
        CheckpointCommand::Sweep => handle_sweep(state, json).await,
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("'{raw}' is not a valid execution id"))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(filter: &ExecutionFilter, page: Page, state: &AppState, json: bool) -> Result<()> {
    let summaries = state
        .tracker
        .list(filter, page)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list executions: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!();
        println!("  No stored executions.");
        println!(
            "  Start one with: {}",
            style("waypoint run <definition.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Execution").fg(Color::Cyan),
            Cell::new("Definition"),
            Cell::new("Status"),
            Cell::new("Node"),
            Cell::new("Done"),
            Cell::new("Cost"),
            Cell::new("Created"),
        ]);

    for s in &summaries {
        table.add_row(vec![
            Cell::new(s.execution_id),
            Cell::new(&s.definition_id),
            cell_for_status(s.status),
            Cell::new(s.current_node.as_deref().unwrap_or("-")),
            Cell::new(s.completed_nodes),
            Cell::new(format_cost(s.total_cost)),
            Cell::new(s.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Show / delete / cancel / sweep
// ---------------------------------------------------------------------------

async fn handle_show(id: &Uuid, state: &AppState, json: bool) -> Result<()> {
    let snapshot = state
        .tracker
        .status(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load execution: {e}"))?;
    print_state(&snapshot, json)
}

async fn handle_delete(id: &Uuid, state: &AppState, json: bool) -> Result<()> {
    state
        .tracker
        .delete(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to delete execution: {e}"))?;

    if json {
        println!("{}", serde_json::json!({ "deleted": id.to_string() }));
    } else {
        println!();
        println!("  {} Deleted execution {id}", style("*").green().bold());
        println!();
    }
    Ok(())
}

async fn handle_cancel(id: &Uuid, reason: &str, state: &AppState, json: bool) -> Result<()> {
    state
        .tracker
        .cancel(id, reason)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to cancel execution: {e}"))?;

    if json {
        println!("{}", serde_json::json!({ "cancelled": id.to_string() }));
    } else {
        println!();
        println!("  {} Cancelled execution {id}", style("*").green().bold());
        println!();
    }
    Ok(())
}

async fn handle_sweep(state: &AppState, json: bool) -> Result<()> {
    let removed = state
        .tracker
        .checkpoints()
        .sweep()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to sweep checkpoints: {e}"))?;

    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else {
        println!();
        println!("  Removed {removed} expired checkpoint(s).");
        println!();
    }
    Ok(())
}
