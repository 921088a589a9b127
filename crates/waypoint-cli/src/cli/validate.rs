//! `waypoint validate`: parse and statically check a definition file.

use std::path::Path;

use anyhow::Result;
use console::style;

use waypoint_core::workflow::definition::{WorkflowError, load_definition_file};
use waypoint_core::workflow::registry::DefinitionRegistry;
use waypoint_infra::config::{load_engine_config, resolve_data_dir};

pub async fn validate(file: &Path, data_dir: Option<&Path>, json: bool) -> Result<()> {
    let data_dir = data_dir.map_or_else(resolve_data_dir, Path::to_path_buf);
    let config = load_engine_config(&data_dir).await;

    let def = load_definition_file(file).map_err(|e| match e {
        WorkflowError::ParseError(msg) => anyhow::anyhow!("Failed to parse {}: {msg}", file.display()),
        other => anyhow::anyhow!("Failed to load {}: {other}", file.display()),
    })?;

    let registry = DefinitionRegistry::new(config.max_node_visits);
    let report = registry
        .check(&def)
        .map_err(|e| anyhow::anyhow!("Workflow '{}' is invalid: {e}", def.id))?;

    if json {
        let out = serde_json::json!({
            "id": def.id,
            "version": def.version,
            "start": def.start(),
            "nodes": def.nodes.len(),
            "edges": def.edges.len(),
            "handlers": def.handler_refs(),
            "unreachable": report.unreachable,
            "visit_bound": report.visit_bound,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' is valid",
        style("*").green().bold(),
        style(&def.id).cyan()
    );
    println!("  Version: {}", def.version);
    println!("  Start: {}", def.start().unwrap_or("-"));
    println!("  Nodes: {}", def.nodes.len());
    println!("  Edges: {}", def.edges.len());
    println!("  Handlers: {}", def.handler_refs().join(", "));
    match report.visit_bound {
        Some(bound) => println!("  Worst-case node visits: {bound}"),
        None => println!(
            "  Conditional loops: yes (runtime limit {} visits)",
            def.max_node_visits
                .map_or(config.max_node_visits, |own| own.min(config.max_node_visits))
        ),
    }
    if !report.unreachable.is_empty() {
        println!(
            "  {} Unreachable nodes: {}",
            style("!").yellow().bold(),
            report.unreachable.join(", ")
        );
    }
    println!();

    Ok(())
}
