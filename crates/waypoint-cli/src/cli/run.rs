//! `waypoint run`, `resume` and `recover`: drive executions in the foreground.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use uuid::Uuid;

use waypoint_core::workflow::definition::{discover_definitions, load_definition_file};
use waypoint_types::event::WorkflowEvent;
use waypoint_types::execution::{ExecutionParams, ExecutionStatus, WorkflowState};

use super::output::{print_state, styled_status};
use crate::state::AppState;

pub struct RunArgs {
    pub input: Option<String>,
    pub context: Option<String>,
    pub budget: Option<f64>,
    pub labels: Vec<(String, String)>,
}

/// Parse a `key=value` label argument.
pub fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn parse_json_object(raw: Option<&str>, what: &str) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value = serde_json::from_str(raw).with_context(|| format!("Invalid JSON {what}"))?;
    if !value.is_object() {
        bail!("{what} must be a JSON object");
    }
    Ok(value)
}

pub async fn run(state: &AppState, file: &Path, args: RunArgs, json: bool, quiet: bool) -> Result<()> {
    let def = load_definition_file(file).with_context(|| format!("Failed to load {}", file.display()))?;
    let definition_id = def.id.clone();
    state
        .tracker
        .definitions()
        .register(def)
        .map_err(|e| anyhow::anyhow!("Workflow is invalid: {e}"))?;

    let input = parse_json_object(args.input.as_deref(), "input")?;
    let context = parse_json_object(args.context.as_deref(), "context")?;
    let params = ExecutionParams {
        budget_usd: args.budget,
        labels: args.labels.into_iter().collect::<BTreeMap<_, _>>(),
    };

    // Subscribe before submitting so the first events are not missed.
    let events = state.tracker.events().subscribe();
    let execution_id = state
        .tracker
        .submit(&definition_id, input, context, params)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start execution: {e}"))?;

    let final_state = follow(state, execution_id, events, json || quiet).await?;
    finish(&final_state, json)
}

pub async fn resume(state: &AppState, execution_id: &str, file: &Path, json: bool, quiet: bool) -> Result<()> {
    let execution_id: Uuid = execution_id
        .parse()
        .with_context(|| format!("'{execution_id}' is not a valid execution id"))?;
    let def = load_definition_file(file).with_context(|| format!("Failed to load {}", file.display()))?;
    state
        .tracker
        .definitions()
        .register(def)
        .map_err(|e| anyhow::anyhow!("Workflow is invalid: {e}"))?;

    let events = state.tracker.events().subscribe();
    state
        .tracker
        .resume(&execution_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to resume execution: {e}"))?;

    let final_state = follow(state, execution_id, events, json || quiet).await?;
    finish(&final_state, json)
}

pub async fn recover(state: &AppState, dir: &Path, json: bool) -> Result<()> {
    let discovered = discover_definitions(dir).with_context(|| format!("Failed to scan {}", dir.display()))?;
    for (path, def) in discovered {
        if let Err(e) = state.tracker.definitions().register(def) {
            tracing::warn!(path = %path.display(), error = %e, "skipping invalid definition");
        }
    }

    let recovered = state
        .tracker
        .recover()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to scan checkpoints: {e}"))?;

    let mut finals = Vec::with_capacity(recovered.len());
    for id in &recovered {
        let final_state = state
            .tracker
            .wait(id)
            .await
            .map_err(|e| anyhow::anyhow!("Lost track of execution {id}: {e}"))?;
        finals.push(final_state);
    }

    if json {
        let out: Vec<_> = finals.iter().map(WorkflowState::summary).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    if finals.is_empty() {
        println!("  No interrupted executions to recover.");
    }
    for s in &finals {
        println!(
            "  {} {} ({}) {}",
            style("*").green().bold(),
            s.execution_id,
            style(&s.definition_id).cyan(),
            styled_status(s.status)
        );
    }
    println!();
    Ok(())
}

/// Wait for an execution, rendering node events on a spinner. Ctrl+C
/// requests cooperative cancellation.
async fn follow(
    state: &AppState,
    execution_id: Uuid,
    mut events: tokio::sync::broadcast::Receiver<WorkflowEvent>,
    silent: bool,
) -> Result<WorkflowState> {
    let spinner = if silent {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Running execution {execution_id}"));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let progress = spinner.clone();
    let renderer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event.execution_id() != execution_id {
                continue;
            }
            match event {
                WorkflowEvent::NodeStarted { node_id, attempt, .. } if attempt > 1 => {
                    progress.set_message(format!("{node_id} (attempt {attempt})"));
                }
                WorkflowEvent::NodeStarted { node_id, .. } => progress.set_message(node_id),
                WorkflowEvent::NodeCompleted { node_id, duration_ms, .. } => {
                    progress.println(format!("  {} {node_id} ({duration_ms} ms)", style("✓").green()));
                }
                WorkflowEvent::NodeFailed { node_id, error, will_retry, .. } => {
                    let mark = if will_retry { style("↻").yellow() } else { style("✗").red() };
                    progress.println(format!("  {mark} {node_id}: {error}"));
                }
                _ => {}
            }
        }
    });

    let tracker = &state.tracker;
    let final_state = tokio::select! {
        result = tracker.wait(&execution_id) => result,
        _ = tokio::signal::ctrl_c() => {
            spinner.set_message("Cancelling after the current node...");
            request_cancel(state, &execution_id, "interrupted by user").await;
            tracker.wait(&execution_id).await
        }
    }
    .map_err(|e| anyhow::anyhow!("Lost track of execution {execution_id}: {e}"))?;

    renderer.abort();
    spinner.finish_and_clear();
    Ok(final_state)
}

/// Ask the tracker to cancel; failures are logged, never fatal.
async fn request_cancel(state: &AppState, execution_id: &Uuid, reason: &str) -> bool {
    match state.tracker.cancel(execution_id, reason).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(execution_id = %execution_id, error = %e, "cancellation request failed");
            false
        }
    }
}

fn finish(final_state: &WorkflowState, json: bool) -> Result<()> {
    print_state(final_state, json)?;
    match final_state.status {
        ExecutionStatus::Completed | ExecutionStatus::Paused => Ok(()),
        status => {
            let reason = final_state
                .last_error()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            bail!("Execution {} {status}: {reason}", final_state.execution_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_request_for_unknown_execution_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(Some(dir.path())).await.unwrap();
        assert!(!request_cancel(&state, &Uuid::now_v7(), "interrupted by user").await);
    }

    #[test]
    fn labels_parse_key_value() {
        assert_eq!(parse_label("team=core").unwrap(), ("team".to_string(), "core".to_string()));
        assert_eq!(parse_label("expr=a=b").unwrap(), ("expr".to_string(), "a=b".to_string()));
        assert!(parse_label("novalue").is_err());
        assert!(parse_label("=x").is_err());
    }

    #[test]
    fn json_arguments_must_be_objects() {
        assert_eq!(parse_json_object(None, "input").unwrap(), serde_json::json!({}));
        assert!(parse_json_object(Some("[1]"), "input").is_err());
        assert!(parse_json_object(Some("{"), "input").is_err());
        assert_eq!(
            parse_json_object(Some(r#"{"topic":"rust"}"#), "input").unwrap()["topic"],
            "rust"
        );
    }
}
