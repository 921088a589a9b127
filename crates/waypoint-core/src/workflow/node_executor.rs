//! Node executor: runs one attempt of one node.
//!
//! Looks up the node's handler, optionally retrieves memory from the context
//! provider, invokes the handler under the node timeout and meters the
//! attempt into the execution's call log. Every attempt is metered exactly
//! once, whatever its outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use waypoint_types::config::ModelPricing;
use waypoint_types::execution::{AiCallRecord, CallOutcome, CallUsage, NodeResult, WorkflowState};
use waypoint_types::workflow::NodeSpec;

use super::handler::{HandlerRegistry, NodeContext, ProgressSink};
use crate::event::bus::EventBus;
use crate::gateway::pricing;
use crate::memory::provider::{BoxContextProvider, ContextQuery, IngestRecord};

/// Executes node attempts. Shared by every orchestrator in the process.
pub struct NodeExecutor {
    handlers: Arc<HandlerRegistry>,
    pricing: Vec<ModelPricing>,
    default_timeout: Duration,
    context_provider: Option<Arc<BoxContextProvider>>,
    context_timeout: Duration,
    events: EventBus,
}

impl NodeExecutor {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            handlers,
            pricing: Vec::new(),
            default_timeout: Duration::from_secs(300),
            context_provider: None,
            context_timeout: Duration::from_secs(2),
            events: EventBus::default(),
        }
    }

    pub fn with_pricing(mut self, pricing: Vec<ModelPricing>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_context_provider(mut self, provider: BoxContextProvider, timeout: Duration) -> Self {
        self.context_provider = Some(Arc::new(provider));
        self.context_timeout = timeout;
        self
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Worst-case cost of one attempt of `node`, used by the budget check.
    pub fn estimate_cost(&self, node: &NodeSpec) -> f64 {
        node.estimated_cost
            .or_else(|| {
                self.handlers
                    .get(&node.handler)
                    .and_then(|h| h.estimate_cost(node))
            })
            .unwrap_or(0.0)
            .max(0.0)
    }

    fn timeout_for(&self, node: &NodeSpec) -> Duration {
        node.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    /// Run attempt number `attempt` (1-based) of `node` against `state`.
    ///
    /// The returned result has already been metered into `state`.
    pub async fn execute(&self, node: &NodeSpec, state: &mut WorkflowState, attempt: u32) -> NodeResult {
        let mut ctx = NodeContext::from_state(state, &node.id, attempt);
        ctx.progress = ProgressSink::new(self.events.clone(), state.execution_id, &node.id);
        ctx.memory = self.retrieve_memory(node, state).await;

        let started = Instant::now();
        let (result, outcome) = match self.handlers.get(&node.handler) {
            None => (
                NodeResult::fatal(format!("no handler registered for '{}'", node.handler)),
                CallOutcome::FatalFailure,
            ),
            Some(handler) => {
                let limit = self.timeout_for(node);
                match tokio::time::timeout(limit, handler.invoke(&ctx, &node.config)).await {
                    Ok(result) => {
                        let outcome = match &result {
                            NodeResult::Success(_) => CallOutcome::Success,
                            NodeResult::RetryableFailure { .. } => CallOutcome::RetryableFailure,
                            NodeResult::FatalFailure { .. } => CallOutcome::FatalFailure,
                        };
                        (result, outcome)
                    }
                    Err(_) => {
                        ctx.cancellation.cancel();
                        tracing::warn!(
                            execution_id = %state.execution_id,
                            node_id = %node.id,
                            attempt,
                            timeout_secs = limit.as_secs_f64(),
                            "node attempt timed out"
                        );
                        (
                            NodeResult::retryable(format!(
                                "node '{}' timed out after {:.1}s",
                                node.id,
                                limit.as_secs_f64()
                            )),
                            CallOutcome::TimedOut,
                        )
                    }
                }
            }
        };

        let record = self.meter(&node.id, attempt, result.usage(), outcome);
        tracing::debug!(
            execution_id = %state.execution_id,
            node_id = %node.id,
            attempt,
            outcome = ?outcome,
            cost = record.cost,
            duration_ms = started.elapsed().as_millis() as u64,
            "node attempt finished"
        );
        state.record_call(record);
        result
    }

    fn meter(&self, node_id: &str, attempt: u32, usage: Option<&CallUsage>, outcome: CallOutcome) -> AiCallRecord {
        let (model, tokens_in, tokens_out, cost) = match usage {
            None => (None, 0, 0, 0.0),
            Some(usage) => {
                let cost = match (usage.cost, usage.model.as_deref()) {
                    (Some(cost), _) => cost,
                    (None, Some(model)) if usage.tokens_in.saturating_add(usage.tokens_out) > 0 => {
                        pricing::cost_for(model, usage.tokens_in, usage.tokens_out, &self.pricing)
                    }
                    _ => 0.0,
                };
                (usage.model.clone(), usage.tokens_in, usage.tokens_out, cost)
            }
        };

        AiCallRecord {
            node_id: node_id.to_string(),
            attempt,
            model,
            tokens_in,
            tokens_out,
            cost: if cost.is_finite() { cost.max(0.0) } else { 0.0 },
            outcome,
            timestamp: Utc::now(),
        }
    }

    /// Best-effort memory lookup. Nodes opt out with `config.memory: false`.
    async fn retrieve_memory(&self, node: &NodeSpec, state: &WorkflowState) -> Option<Value> {
        let provider = self.context_provider.as_ref()?;
        if node.config.get("memory").and_then(Value::as_bool) == Some(false) {
            return None;
        }

        let query = ContextQuery {
            execution_id: state.execution_id,
            definition_id: state.definition_id.clone(),
            node_id: node.id.clone(),
            input: state.input.clone(),
            context: state.context.clone(),
        };

        match tokio::time::timeout(self.context_timeout, provider.retrieve(&query)).await {
            Ok(Ok(Value::Null)) => None,
            Ok(Ok(memory)) => Some(memory),
            Ok(Err(e)) => {
                tracing::warn!(node_id = %node.id, error = %e, "context retrieval failed, continuing without memory");
                None
            }
            Err(_) => {
                tracing::warn!(
                    node_id = %node.id,
                    timeout_ms = self.context_timeout.as_millis() as u64,
                    "context retrieval timed out, continuing without memory"
                );
                None
            }
        }
    }

    /// Offer a completed node's result to the context provider without
    /// waiting for it.
    pub fn spawn_ingest(&self, state: &WorkflowState, node_id: &str, data: Value) {
        let Some(provider) = self.context_provider.clone() else {
            return;
        };
        let record = IngestRecord {
            execution_id: state.execution_id,
            definition_id: state.definition_id.clone(),
            node_id: node_id.to_string(),
            data,
        };
        tokio::spawn(async move {
            let node_id = record.node_id.clone();
            if let Err(e) = provider.ingest(record).await {
                tracing::warn!(node_id = %node_id, error = %e, "context ingestion failed");
            }
        });
    }
}

impl std::fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeExecutor")
            .field("handlers", &self.handlers.node_types())
            .field("default_timeout", &self.default_timeout)
            .field("context_provider", &self.context_provider.is_some())
            .finish()
    }
}
