//! Node handler interface and the handler registry.
//!
//! Every node names a handler (`node_type`). Handlers are registered once at
//! start-up in a [`HandlerRegistry`]; the node executor looks them up by name
//! at runtime.
//!
//! Follows the blanket-impl pattern used for model gateways:
//! 1. `NodeHandler` uses RPITIT and is not object-safe
//! 2. `NodeHandlerDyn` is the object-safe version with boxed futures
//! 3. `BoxNodeHandler` wraps `Arc<dyn NodeHandlerDyn>` and delegates

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use waypoint_types::event::WorkflowEvent;
use waypoint_types::execution::{NodeResult, WorkflowState};
use waypoint_types::workflow::NodeSpec;

use crate::event::bus::EventBus;

// ---------------------------------------------------------------------------
// Progress side-channel
// ---------------------------------------------------------------------------

/// Sink for partial output produced while a node runs.
///
/// Reporting never blocks and never affects control flow; chunks are
/// published as [`WorkflowEvent::NodeProgress`].
#[derive(Debug, Clone)]
pub struct ProgressSink {
    bus: Option<EventBus>,
    execution_id: Uuid,
    node_id: String,
}

impl ProgressSink {
    pub fn new(bus: EventBus, execution_id: Uuid, node_id: impl Into<String>) -> Self {
        Self {
            bus: Some(bus),
            execution_id,
            node_id: node_id.into(),
        }
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self {
            bus: None,
            execution_id: Uuid::nil(),
            node_id: String::new(),
        }
    }

    pub fn report(&self, chunk: impl Into<String>) {
        if let Some(bus) = &self.bus {
            bus.publish(WorkflowEvent::NodeProgress {
                execution_id: self.execution_id,
                node_id: self.node_id.clone(),
                chunk: chunk.into(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// NodeContext
// ---------------------------------------------------------------------------

/// Read-only snapshot of the execution handed to a handler for one attempt.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub execution_id: Uuid,
    pub definition_id: String,
    pub node_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub input: Value,
    /// Project context supplied at submission.
    pub context: Value,
    /// Results of previously completed nodes.
    pub results: BTreeMap<String, Value>,
    pub artifacts: BTreeMap<String, Value>,
    /// Memory retrieved from the context provider, if any.
    pub memory: Option<Value>,
    /// Cancelled when the attempt's timeout elapses.
    pub cancellation: CancellationToken,
    pub progress: ProgressSink,
}

impl NodeContext {
    pub fn from_state(state: &WorkflowState, node_id: &str, attempt: u32) -> Self {
        Self {
            execution_id: state.execution_id,
            definition_id: state.definition_id.clone(),
            node_id: node_id.to_string(),
            attempt,
            input: state.input.clone(),
            context: state.context.clone(),
            results: state.results.clone(),
            artifacts: state.artifacts.clone(),
            memory: None,
            cancellation: CancellationToken::new(),
            progress: ProgressSink::disabled(),
        }
    }

    /// JSON view used for prompt templating.
    pub fn template_scope(&self) -> Value {
        serde_json::json!({
            "input": self.input,
            "context": self.context,
            "results": self.results,
            "artifacts": self.artifacts,
            "memory": self.memory.clone().unwrap_or(Value::Null),
            "node": { "id": self.node_id, "attempt": self.attempt },
        })
    }
}

// ---------------------------------------------------------------------------
// NodeHandler trait
// ---------------------------------------------------------------------------

/// Implemented by each node type.
///
/// Handlers classify their own outcome (success, retryable or fatal failure).
/// They should be idempotent with respect to retries; handlers with
/// non-idempotent side effects must be used with `max_retries: 0`.
pub trait NodeHandler: Send + Sync {
    /// The `handler` value nodes use to select this handler.
    fn node_type(&self) -> &str;

    fn invoke(
        &self,
        ctx: &NodeContext,
        node_config: &Value,
    ) -> impl Future<Output = NodeResult> + Send;

    /// Worst-case cost of one attempt, used when the node declares none.
    fn estimate_cost(&self, _node: &NodeSpec) -> Option<f64> {
        None
    }
}

/// Object-safe version of [`NodeHandler`] with boxed futures.
pub trait NodeHandlerDyn: Send + Sync {
    fn node_type(&self) -> &str;

    fn invoke_boxed<'a>(
        &'a self,
        ctx: &'a NodeContext,
        node_config: &'a Value,
    ) -> Pin<Box<dyn Future<Output = NodeResult> + Send + 'a>>;

    fn estimate_cost(&self, node: &NodeSpec) -> Option<f64>;
}

impl<T: NodeHandler> NodeHandlerDyn for T {
    fn node_type(&self) -> &str {
        NodeHandler::node_type(self)
    }

    fn invoke_boxed<'a>(
        &'a self,
        ctx: &'a NodeContext,
        node_config: &'a Value,
    ) -> Pin<Box<dyn Future<Output = NodeResult> + Send + 'a>> {
        Box::pin(self.invoke(ctx, node_config))
    }

    fn estimate_cost(&self, node: &NodeSpec) -> Option<f64> {
        NodeHandler::estimate_cost(self, node)
    }
}

/// Type-erased, cheaply cloneable node handler.
#[derive(Clone)]
pub struct BoxNodeHandler {
    inner: Arc<dyn NodeHandlerDyn + Send + Sync>,
}

impl BoxNodeHandler {
    pub fn new<T: NodeHandler + 'static>(handler: T) -> Self {
        Self {
            inner: Arc::new(handler),
        }
    }

    pub fn node_type(&self) -> &str {
        self.inner.node_type()
    }

    pub async fn invoke(&self, ctx: &NodeContext, node_config: &Value) -> NodeResult {
        self.inner.invoke_boxed(ctx, node_config).await
    }

    pub fn estimate_cost(&self, node: &NodeSpec) -> Option<f64> {
        self.inner.estimate_cost(node)
    }
}

impl std::fmt::Debug for BoxNodeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxNodeHandler")
            .field("node_type", &self.node_type())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Map from `node_type` to handler, built at start-up and then shared
/// read-only.
#[derive(Debug, Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, BoxNodeHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its `node_type`, replacing any previous one.
    pub fn register<T: NodeHandler + 'static>(&mut self, handler: T) -> &mut Self {
        let handler = BoxNodeHandler::new(handler);
        self.handlers
            .insert(handler.node_type().to_string(), handler);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<T: NodeHandler + 'static>(mut self, handler: T) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, node_type: &str) -> Option<&BoxNodeHandler> {
        self.handlers.get(node_type)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    /// Registered node types, sorted.
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl NodeHandler for Echo {
        fn node_type(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, ctx: &NodeContext, node_config: &Value) -> NodeResult {
            NodeResult::success(json!({ "input": ctx.input, "config": node_config }))
        }

        fn estimate_cost(&self, _node: &NodeSpec) -> Option<f64> {
            Some(0.5)
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_node_type() {
        let registry = HandlerRegistry::new().with(Echo);
        assert!(registry.contains("echo"));
        assert_eq!(registry.node_types(), vec!["echo"]);

        let state = WorkflowState::new("wf", json!({"x": 1}), Value::Null);
        let ctx = NodeContext::from_state(&state, "a", 1);
        let handler = registry.get("echo").unwrap();
        let result = handler.invoke(&ctx, &json!({"k": "v"})).await;

        match result {
            NodeResult::Success(out) => {
                assert_eq!(out.data["input"]["x"], 1);
                assert_eq!(out.data["config"]["k"], "v");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn estimate_cost_delegates() {
        let handler = BoxNodeHandler::new(Echo);
        let node: NodeSpec = serde_json::from_value(json!({"id": "a", "handler": "echo"})).unwrap();
        assert_eq!(handler.estimate_cost(&node), Some(0.5));
    }

    #[tokio::test]
    async fn progress_sink_publishes_chunks() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let id = Uuid::now_v7();
        let sink = ProgressSink::new(bus, id, "a");

        sink.report("hello");

        match rx.recv().await.unwrap() {
            WorkflowEvent::NodeProgress { execution_id, chunk, .. } => {
                assert_eq!(execution_id, id);
                assert_eq!(chunk, "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        ProgressSink::disabled().report("dropped");
    }

    #[test]
    fn template_scope_exposes_results() {
        let mut state = WorkflowState::new("wf", json!({"topic": "rust"}), Value::Null);
        state.results.insert("gather".to_string(), json!({"facts": 3}));
        let ctx = NodeContext::from_state(&state, "write", 2);
        let scope = ctx.template_scope();
        assert_eq!(scope["input"]["topic"], "rust");
        assert_eq!(scope["results"]["gather"]["facts"], 3);
        assert_eq!(scope["node"]["attempt"], 2);
    }
}
