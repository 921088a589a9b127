//! Orchestrator: drives one execution through its graph.
//!
//! Each loop iteration checks the cancellation and pause flags, then runs the
//! current node through its attempts (budget pre-check, node executor,
//! backoff between retries) and routes to the next node. State is persisted
//! before the execution advances; a write that cannot be made durable fails
//! the execution instead of continuing with unpersisted progress.
//!
//! The orchestrator exclusively owns the [`WorkflowState`] while it runs and
//! publishes read-only snapshots through a `watch` channel.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use waypoint_types::event::WorkflowEvent;
use waypoint_types::execution::{
    CallOutcome, ErrorKind, ErrorRecord, ExecutionStatus, NodeOutput, NodeResult, WorkflowState,
};
use waypoint_types::workflow::{NodeSpec, WorkflowDefinition};

use super::budget::{BudgetStatus, CostBudget};
use super::checkpoint::{CheckpointError, CheckpointManager};
use super::node_executor::NodeExecutor;
use super::retry::RetryPolicy;
use super::routing::{self, Route};
use crate::event::bus::EventBus;
use crate::repository::checkpoint::CheckpointStore;

// ---------------------------------------------------------------------------
// Control handle
// ---------------------------------------------------------------------------

/// Cooperative control flags for one execution.
///
/// Both flags are observed at the top of the orchestrator loop and while
/// waiting between retries, never while a node attempt is in flight.
#[derive(Debug, Clone, Default)]
pub struct ExecutionControl {
    cancel: CancellationToken,
    pause: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl ExecutionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.cancel.cancel();
    }

    pub fn pause(&self) {
        self.pause.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause.is_cancelled()
    }

    pub fn cancel_reason(&self) -> &str {
        self.reason.get().map_or("cancelled", String::as_str)
    }

    async fn interrupted(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.pause.cancelled() => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// How a node's attempt loop ended.
enum NodeOutcome {
    Succeeded { output: NodeOutput, duration_ms: u64 },
    Exhausted { reason: String, attempts: u32 },
    Fatal { reason: String, attempt: u32 },
    BudgetExceeded(String),
    StepLimit(u32),
    /// Cancel or pause arrived while waiting to retry.
    Interrupted,
}

enum Flow {
    Continue,
    Stop,
}

pub struct Orchestrator<S: CheckpointStore> {
    definition: Arc<WorkflowDefinition>,
    executor: Arc<NodeExecutor>,
    checkpoints: Arc<CheckpointManager<S>>,
    retry: RetryPolicy,
    events: EventBus,
    control: ExecutionControl,
    snapshot: Option<watch::Sender<WorkflowState>>,
    max_node_visits: u32,
    budget: CostBudget,
}

impl<S: CheckpointStore> Orchestrator<S> {
    pub fn new(
        definition: Arc<WorkflowDefinition>,
        executor: Arc<NodeExecutor>,
        checkpoints: Arc<CheckpointManager<S>>,
    ) -> Self {
        let events = executor.events().clone();
        Self {
            definition,
            executor,
            checkpoints,
            retry: RetryPolicy::default(),
            events,
            control: ExecutionControl::new(),
            snapshot: None,
            max_node_visits: 200,
            budget: CostBudget::new(None),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_control(mut self, control: ExecutionControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_snapshots(mut self, sender: watch::Sender<WorkflowState>) -> Self {
        self.snapshot = Some(sender);
        self
    }

    pub fn with_max_node_visits(mut self, limit: u32) -> Self {
        self.max_node_visits = limit;
        self
    }

    pub fn control(&self) -> &ExecutionControl {
        &self.control
    }

    /// Run the execution until it reaches a terminal status or pauses, and
    /// return the final state.
    ///
    /// Accepts `pending` states and states resumed from a checkpoint
    /// (`paused`, `failed`, or `running` left behind by a crashed process).
    pub async fn run(mut self, mut state: WorkflowState) -> WorkflowState {
        let resumed = state.timestamps.started_at.is_some();
        if state.status != ExecutionStatus::Running {
            if let Err(e) = state.transition(ExecutionStatus::Running) {
                tracing::warn!(execution_id = %state.execution_id, error = %e, "execution cannot be started");
                return state;
            }
        }
        if state.current_node.is_none() && !resumed {
            state.current_node = self.definition.start().map(str::to_string);
        }
        self.budget = CostBudget::new(state.budget_usd);

        if !self.checkpoint(&mut state).await {
            self.publish(&state);
            return state;
        }

        tracing::info!(
            execution_id = %state.execution_id,
            definition_id = %state.definition_id,
            resumed,
            current_node = ?state.current_node,
            "execution started"
        );
        self.events.publish(WorkflowEvent::ExecutionStarted {
            execution_id: state.execution_id,
            definition_id: state.definition_id.clone(),
        });
        self.publish(&state);

        let definition = Arc::clone(&self.definition);
        loop {
            if self.control.is_cancelled() {
                self.cancel(&mut state).await;
                break;
            }
            if self.control.is_pause_requested() {
                self.pause(&mut state).await;
                break;
            }

            let Some(node_id) = state.current_node.clone() else {
                self.complete(&mut state).await;
                break;
            };
            let Some(node) = definition.node(&node_id) else {
                let error = ErrorRecord::new(ErrorKind::Routing, format!("node '{node_id}' is not in the definition"));
                self.fail(&mut state, error).await;
                break;
            };

            let outcome = self.run_node(node, &mut state).await;
            match self.apply(outcome, node, &mut state).await {
                Flow::Continue => {}
                Flow::Stop => break,
            }
        }

        self.publish(&state);
        state
    }

    async fn run_node(&mut self, node: &NodeSpec, state: &mut WorkflowState) -> NodeOutcome {
        let estimate = self.executor.estimate_cost(node);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            if attempt > 1 {
                let delay = self.retry.delay_for(attempt - 1);
                // a flag raised during the failed attempt wins over a zero delay
                tokio::select! {
                    biased;
                    _ = self.control.interrupted() => return NodeOutcome::Interrupted,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if state.visits_total() >= self.max_node_visits {
                return NodeOutcome::StepLimit(self.max_node_visits);
            }

            match self.budget.check(state.total_cost, estimate) {
                BudgetStatus::Exceeded { spent, estimate, ceiling } => {
                    return NodeOutcome::BudgetExceeded(format!(
                        "node '{}' needs up to ${estimate:.2} but only ${:.2} of the ${ceiling:.2} budget remains",
                        node.id,
                        (ceiling - spent).max(0.0)
                    ));
                }
                BudgetStatus::Warning => {
                    tracing::warn!(
                        execution_id = %state.execution_id,
                        spent = state.total_cost,
                        ceiling = ?self.budget.ceiling(),
                        "execution is close to its budget"
                    );
                }
                BudgetStatus::Ok => {}
            }

            if attempt > 1 {
                state.record_retry(&node.id);
            }
            state.record_visit(&node.id);
            state.current_node = Some(node.id.clone());
            self.publish(state);
            self.events.publish(WorkflowEvent::NodeStarted {
                execution_id: state.execution_id,
                node_id: node.id.clone(),
                attempt,
            });

            let started = Instant::now();
            let span = tracing::debug_span!("workflow.node", node_id = %node.id, attempt);
            let result = self.executor.execute(node, state, attempt).instrument(span).await;

            match result {
                NodeResult::Success(output) => {
                    return NodeOutcome::Succeeded {
                        output,
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                }
                NodeResult::RetryableFailure { reason, .. } => {
                    let timed_out = state
                        .ai_calls
                        .last()
                        .is_some_and(|call| call.outcome == CallOutcome::TimedOut);
                    let kind = if timed_out { ErrorKind::Timeout } else { ErrorKind::Retryable };
                    state.record_error(ErrorRecord::new(kind, reason.clone()).for_node(&node.id, Some(attempt)));

                    let will_retry = RetryPolicy::should_retry(node, attempt);
                    tracing::debug!(
                        execution_id = %state.execution_id,
                        node_id = %node.id,
                        attempt,
                        will_retry,
                        reason = %reason,
                        "node attempt failed"
                    );
                    self.events.publish(WorkflowEvent::NodeFailed {
                        execution_id: state.execution_id,
                        node_id: node.id.clone(),
                        error: reason.clone(),
                        will_retry,
                    });
                    if !will_retry {
                        return NodeOutcome::Exhausted { reason, attempts: attempt };
                    }
                }
                NodeResult::FatalFailure { reason, .. } => {
                    self.events.publish(WorkflowEvent::NodeFailed {
                        execution_id: state.execution_id,
                        node_id: node.id.clone(),
                        error: reason.clone(),
                        will_retry: false,
                    });
                    return NodeOutcome::Fatal { reason, attempt };
                }
            }
        }
    }

    async fn apply(&mut self, outcome: NodeOutcome, node: &NodeSpec, state: &mut WorkflowState) -> Flow {
        match outcome {
            NodeOutcome::Succeeded { output, duration_ms } => {
                let cost = state.ai_calls.last().map_or(0.0, |call| call.cost);
                state.mark_completed(&node.id);
                state.merge_output(&node.id, output.data.clone(), output.artifacts.clone());

                let ctx = routing::routing_context(state, &output);
                let route = routing::select_next(&self.definition, &node.id, &ctx);
                if route == Route::NoMatch {
                    let error = ErrorRecord::new(
                        ErrorKind::Routing,
                        format!("no outgoing edge of '{}' matched its result", node.id),
                    )
                    .for_node(&node.id, None);
                    return self.fail(state, error).await;
                }

                self.events.publish(WorkflowEvent::NodeCompleted {
                    execution_id: state.execution_id,
                    node_id: node.id.clone(),
                    cost,
                    duration_ms,
                });

                let flow = match route {
                    Route::Next(next) => {
                        tracing::debug!(execution_id = %state.execution_id, from = %node.id, to = %next, "advancing");
                        state.current_node = Some(next);
                        if self.checkpoint(state).await {
                            Flow::Continue
                        } else {
                            Flow::Stop
                        }
                    }
                    _ => self.complete(state).await,
                };
                if state.status != ExecutionStatus::Failed {
                    self.executor.spawn_ingest(state, &node.id, output.data);
                }
                flow
            }

            NodeOutcome::Exhausted { reason, attempts } => {
                state.mark_failed(&node.id);
                let error = ErrorRecord::new(
                    ErrorKind::RetriesExhausted,
                    format!("node '{}' failed after {attempts} attempts: {reason}", node.id),
                )
                .for_node(&node.id, Some(attempts));

                let ctx = routing::error_context(state, &node.id, &reason, attempts);
                match routing::select_error_route(&self.definition, &node.id, &ctx) {
                    Some(Route::Next(next)) => {
                        tracing::info!(
                            execution_id = %state.execution_id,
                            node_id = %node.id,
                            recovery = %next,
                            "retries exhausted, following error edge"
                        );
                        state.record_error(error);
                        state.current_node = Some(next);
                        if self.checkpoint(state).await {
                            Flow::Continue
                        } else {
                            Flow::Stop
                        }
                    }
                    Some(_) => {
                        state.record_error(error);
                        self.complete(state).await
                    }
                    None => self.fail(state, error).await,
                }
            }

            NodeOutcome::Fatal { reason, attempt } => {
                state.mark_failed(&node.id);
                let error = ErrorRecord::new(ErrorKind::Fatal, reason).for_node(&node.id, Some(attempt));
                self.fail(state, error).await
            }

            NodeOutcome::BudgetExceeded(message) => {
                let error = ErrorRecord::new(ErrorKind::BudgetExceeded, message).for_node(&node.id, None);
                self.fail(state, error).await
            }

            NodeOutcome::StepLimit(limit) => {
                let error = ErrorRecord::new(
                    ErrorKind::StepLimitExceeded,
                    format!("execution reached its limit of {limit} node visits"),
                )
                .for_node(&node.id, None);
                self.fail(state, error).await
            }

            NodeOutcome::Interrupted => Flow::Continue,
        }
    }

    // -- terminal transitions ------------------------------------------------

    /// Persist `state` as it would look after moving to `status`, and only
    /// then apply the move.
    async fn settle(&mut self, state: &mut WorkflowState, status: ExecutionStatus) -> bool {
        let mut next = state.clone();
        if let Err(e) = next.transition(status) {
            tracing::warn!(execution_id = %state.execution_id, error = %e, "illegal status transition");
            return false;
        }
        match self.checkpoints.persist(&next).await {
            Ok(()) => {
                *state = next;
                true
            }
            Err(e) => {
                self.persistence_failure(state, e).await;
                false
            }
        }
    }

    async fn complete(&mut self, state: &mut WorkflowState) -> Flow {
        state.current_node = None;
        if self.settle(state, ExecutionStatus::Completed).await {
            tracing::info!(
                execution_id = %state.execution_id,
                completed = state.completed_nodes.len(),
                total_cost = state.total_cost,
                "execution completed"
            );
            self.events.publish(WorkflowEvent::ExecutionCompleted {
                execution_id: state.execution_id,
                total_cost: state.total_cost,
            });
        }
        Flow::Stop
    }

    async fn fail(&mut self, state: &mut WorkflowState, error: ErrorRecord) -> Flow {
        let message = error.message.clone();
        state.record_error(error);
        if self.settle(state, ExecutionStatus::Failed).await {
            tracing::info!(execution_id = %state.execution_id, error = %message, "execution failed");
            self.events.publish(WorkflowEvent::ExecutionFailed {
                execution_id: state.execution_id,
                error: message,
            });
        }
        Flow::Stop
    }

    async fn cancel(&mut self, state: &mut WorkflowState) {
        let reason = self.control.cancel_reason().to_string();
        state.record_error(ErrorRecord::new(ErrorKind::Cancelled, reason.clone()));
        if self.settle(state, ExecutionStatus::Cancelled).await {
            tracing::info!(execution_id = %state.execution_id, reason = %reason, "execution cancelled");
            self.events.publish(WorkflowEvent::ExecutionCancelled {
                execution_id: state.execution_id,
                reason,
            });
        }
    }

    async fn pause(&mut self, state: &mut WorkflowState) {
        if self.settle(state, ExecutionStatus::Paused).await {
            tracing::info!(
                execution_id = %state.execution_id,
                current_node = ?state.current_node,
                "execution paused"
            );
            self.events.publish(WorkflowEvent::ExecutionPaused {
                execution_id: state.execution_id,
            });
        }
    }

    // -- persistence ---------------------------------------------------------

    /// Persist the current state. On failure the execution is already
    /// failed when this returns `false`.
    async fn checkpoint(&mut self, state: &mut WorkflowState) -> bool {
        match self.checkpoints.persist(state).await {
            Ok(()) => {
                self.publish(state);
                true
            }
            Err(e) => {
                self.persistence_failure(state, e).await;
                false
            }
        }
    }

    async fn persistence_failure(&mut self, state: &mut WorkflowState, error: CheckpointError) {
        let message = error.to_string();
        state.record_error(ErrorRecord::new(ErrorKind::Persistence, message.clone()));
        if state.status.can_transition_to(ExecutionStatus::Failed) {
            if let Err(e) = state.transition(ExecutionStatus::Failed) {
                tracing::warn!(execution_id = %state.execution_id, error = %e, "could not mark execution failed");
            }
        }
        if !self.checkpoints.persist_once(state).await {
            tracing::error!(
                execution_id = %state.execution_id,
                "final checkpoint write failed; stored state is stale"
            );
        }
        self.events.publish(WorkflowEvent::ExecutionFailed {
            execution_id: state.execution_id,
            error: message,
        });
        self.publish(state);
    }

    fn publish(&self, state: &WorkflowState) {
        if let Some(sender) = &self.snapshot {
            sender.send_replace(state.clone());
        }
    }
}
