//! Built-in node handlers.
//!
//! - `passthrough`: emits a configured value (or the execution input) without
//!   calling anything external. Used for joins, fan-in and routing nodes.
//! - `prompt`: renders a prompt template and streams a completion from the
//!   model gateway, forwarding text deltas to the node's progress sink.

use futures_util::StreamExt;
use serde_json::{Value, json};
use waypoint_types::execution::{CallUsage, NodeOutput, NodeResult};
use waypoint_types::gateway::{GatewayChunk, GatewayError, GatewayRequest};

use super::handler::{NodeContext, NodeHandler};
use super::template;
use crate::gateway::provider::ModelGateway;

// ---------------------------------------------------------------------------
// Passthrough
// ---------------------------------------------------------------------------

/// Returns `config.output` (templated when it is a string) or the input.
///
/// Optional config keys: `next_hint` (string) and `cost` (USD, recorded as
/// the attempt's cost).
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughHandler;

impl NodeHandler for PassthroughHandler {
    fn node_type(&self) -> &str {
        "passthrough"
    }

    async fn invoke(&self, ctx: &NodeContext, node_config: &Value) -> NodeResult {
        let data = match node_config.get("output") {
            Some(Value::String(s)) => Value::String(template::render(s, &ctx.template_scope())),
            Some(other) => other.clone(),
            None => ctx.input.clone(),
        };

        let mut output = NodeOutput::new(data);
        if let Some(hint) = node_config.get("next_hint").and_then(Value::as_str) {
            output = output.with_hint(hint);
        }
        if let Some(cost) = node_config.get("cost").and_then(Value::as_f64) {
            output = output.with_usage(CallUsage::with_cost(cost));
        }
        NodeResult::Success(output)
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// Streams a completion from a [`ModelGateway`].
///
/// Config keys:
/// - `prompt` (required): template with `{{ input.x }}`, `{{ results.node }}`,
///   `{{ context.x }}` and `{{ memory }}` placeholders
/// - `system`, `model`, `max_tokens`, `temperature` (optional)
/// - `output`: `"text"` (default) or `"json"`; JSON output is parsed into the
///   node result and its `next_hint` field, if any, becomes the routing hint
pub struct PromptHandler<G: ModelGateway> {
    gateway: G,
    default_model: String,
}

impl<G: ModelGateway> PromptHandler<G> {
    pub fn new(gateway: G, default_model: impl Into<String>) -> Self {
        Self {
            gateway,
            default_model: default_model.into(),
        }
    }

    fn build_request(&self, ctx: &NodeContext, config: &Value) -> Option<GatewayRequest> {
        let scope = ctx.template_scope();
        let prompt = config.get("prompt")?.as_str()?;
        Some(GatewayRequest {
            model: config
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&self.default_model)
                .to_string(),
            prompt: template::render(prompt, &scope),
            system: config
                .get("system")
                .and_then(Value::as_str)
                .map(|s| template::render(s, &scope)),
            max_tokens: config
                .get("max_tokens")
                .and_then(Value::as_u64)
                .map(|n| n.min(u64::from(u32::MAX)) as u32),
            temperature: config.get("temperature").and_then(Value::as_f64),
        })
    }
}

fn classify(err: GatewayError, usage: Option<CallUsage>) -> NodeResult {
    let reason = err.to_string();
    if err.is_retryable() {
        NodeResult::RetryableFailure { reason, usage }
    } else {
        NodeResult::FatalFailure { reason, usage }
    }
}

impl<G: ModelGateway> NodeHandler for PromptHandler<G> {
    fn node_type(&self) -> &str {
        "prompt"
    }

    async fn invoke(&self, ctx: &NodeContext, node_config: &Value) -> NodeResult {
        let Some(request) = self.build_request(ctx, node_config) else {
            return NodeResult::fatal(format!(
                "node '{}' is missing a string `prompt` in its config",
                ctx.node_id
            ));
        };

        tracing::debug!(
            execution_id = %ctx.execution_id,
            node_id = %ctx.node_id,
            model = %request.model,
            gateway = self.gateway.name(),
            "sending prompt to model gateway"
        );

        let mut usage = CallUsage {
            model: Some(request.model.clone()),
            ..CallUsage::default()
        };
        let mut text = String::new();
        let mut stream = self.gateway.stream(request);

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(GatewayChunk::TextDelta { text: delta }) => {
                    ctx.progress.report(delta.clone());
                    text.push_str(&delta);
                }
                Ok(GatewayChunk::Finished {
                    model,
                    tokens_in,
                    tokens_out,
                }) => {
                    usage.model = Some(model);
                    usage.tokens_in = tokens_in;
                    usage.tokens_out = tokens_out;
                }
                Err(err) => return classify(err, Some(usage)),
            }
        }

        let model = usage.model.clone().unwrap_or_default();
        let wants_json = node_config.get("output").and_then(Value::as_str) == Some("json");
        let output = if wants_json {
            match serde_json::from_str::<Value>(text.trim()) {
                Ok(data) => {
                    let hint = data.get("next_hint").and_then(Value::as_str).map(str::to_string);
                    let mut out = NodeOutput::new(data);
                    if let Some(hint) = hint {
                        out = out.with_hint(hint);
                    }
                    out
                }
                Err(e) => {
                    return NodeResult::RetryableFailure {
                        reason: format!("model output is not valid JSON: {e}"),
                        usage: Some(usage),
                    };
                }
            }
        } else {
            NodeOutput::new(json!({ "text": text, "model": model }))
        };

        NodeResult::Success(output.with_usage(usage))
    }
}
