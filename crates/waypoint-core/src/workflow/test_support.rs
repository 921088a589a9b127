//! Shared doubles for orchestrator and tracker tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use waypoint_types::execution::{CallUsage, NodeOutput, NodeResult};
use waypoint_types::workflow::WorkflowDefinition;

use super::definition::parse_definition_yaml;
use super::handler::{HandlerRegistry, NodeContext, NodeHandler};
use super::handlers::PassthroughHandler;
use super::node_executor::NodeExecutor;
use super::retry::RetryPolicy;

/// Handler driven entirely by node config, so runs are deterministic:
///
/// - `fail_first: n` – retryable failure on attempts `1..=n`
/// - `fatal: true` – fatal failure
/// - `cost: f64` – cost reported on every attempt
/// - `sleep_ms: n` – sleep before answering, on attempts `1..=slow_attempts`
///   (every attempt when `slow_attempts` is absent)
/// - `output: value` – success payload (default `{node, attempt}`)
pub(crate) struct ScriptHandler;

impl NodeHandler for ScriptHandler {
    fn node_type(&self) -> &str {
        "script"
    }

    async fn invoke(&self, ctx: &NodeContext, config: &Value) -> NodeResult {
        let attempt = u64::from(ctx.attempt);

        if let Some(ms) = config.get("sleep_ms").and_then(Value::as_u64) {
            let slow = config.get("slow_attempts").and_then(Value::as_u64).unwrap_or(u64::MAX);
            if attempt <= slow {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }

        let usage = config.get("cost").and_then(Value::as_f64).map(CallUsage::with_cost);

        if config.get("fatal").and_then(Value::as_bool) == Some(true) {
            return NodeResult::FatalFailure {
                reason: format!("{} rejected its input", ctx.node_id),
                usage,
            };
        }

        let fail_first = config.get("fail_first").and_then(Value::as_u64).unwrap_or(0);
        if attempt <= fail_first {
            return NodeResult::RetryableFailure {
                reason: format!("transient failure on attempt {attempt}"),
                usage,
            };
        }

        let data = config
            .get("output")
            .cloned()
            .unwrap_or_else(|| json!({ "node": ctx.node_id, "attempt": attempt }));
        let mut output = NodeOutput::new(data);
        if let Some(usage) = usage {
            output = output.with_usage(usage);
        }
        NodeResult::Success(output)
    }
}

pub(crate) fn handlers() -> HandlerRegistry {
    HandlerRegistry::new().with(ScriptHandler).with(PassthroughHandler)
}

pub(crate) fn executor() -> Arc<NodeExecutor> {
    Arc::new(NodeExecutor::new(Arc::new(handlers())))
}

pub(crate) fn no_delay() -> RetryPolicy {
    RetryPolicy::new(Duration::ZERO, Duration::ZERO, 2.0)
}

pub(crate) fn definition(yaml: &str) -> WorkflowDefinition {
    parse_definition_yaml(yaml).unwrap()
}

/// `a -> b -> c` with per-node config fragments spliced in.
pub(crate) fn linear(a: &str, b: &str, c: &str) -> WorkflowDefinition {
    definition(&format!(
        r#"
id: linear
nodes:
  - {{ id: a, handler: script, {a} }}
  - {{ id: b, handler: script, {b} }}
  - {{ id: c, handler: script, {c} }}
edges:
  - {{ from: a, to: b }}
  - {{ from: b, to: c }}
"#
    ))
}
