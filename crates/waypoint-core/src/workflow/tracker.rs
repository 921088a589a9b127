//! Execution tracker: the process-wide registry of executions.
//!
//! Owns the control handle and snapshot receiver of every execution started
//! in this process, bounds concurrency with a semaphore, and is the only
//! place orchestrators are launched, so at most one orchestrator is ever
//! active per execution id. Executions not in the registry (reaped, or from a
//! previous process) are served from the checkpoint store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;
use waypoint_types::config::EngineConfig;
use waypoint_types::event::WorkflowEvent;
use waypoint_types::execution::{
    ErrorKind, ErrorRecord, ExecutionFilter, ExecutionParams, ExecutionStatus, ExecutionSummary, Page,
    WorkflowState,
};
use waypoint_types::workflow::WorkflowDefinition;

use super::budget::resolve_ceiling;
use super::checkpoint::{CheckpointError, CheckpointManager};
use super::node_executor::NodeExecutor;
use super::orchestrator::{ExecutionControl, Orchestrator};
use super::registry::DefinitionRegistry;
use super::retry::RetryPolicy;
use crate::repository::checkpoint::CheckpointStore;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("concurrency limit of {limit} active executions reached")]
    CapacityExceeded { limit: usize },

    #[error("execution not found: {0}")]
    NotFound(Uuid),

    #[error("execution {0} already has an active orchestrator")]
    AlreadyActive(Uuid),

    #[error("execution {0} has not reached a terminal status")]
    NotTerminal(Uuid),

    #[error("execution {id} is {status}")]
    InvalidState { id: Uuid, status: ExecutionStatus },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

struct ExecutionHandle {
    control: ExecutionControl,
    snapshot: watch::Receiver<WorkflowState>,
    task: Option<JoinHandle<()>>,
}

impl ExecutionHandle {
    /// Handle for an execution with no orchestrator, e.g. cancelled while
    /// paused.
    fn dormant(state: WorkflowState) -> Self {
        let (_tx, snapshot) = watch::channel(state);
        Self {
            control: ExecutionControl::new(),
            snapshot,
            task: None,
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn state(&self) -> WorkflowState {
        self.snapshot.borrow().clone()
    }
}

pub struct ExecutionTracker<S: CheckpointStore + 'static> {
    definitions: Arc<DefinitionRegistry>,
    executor: Arc<NodeExecutor>,
    checkpoints: Arc<CheckpointManager<S>>,
    config: EngineConfig,
    entries: DashMap<Uuid, ExecutionHandle>,
    slots: Arc<Semaphore>,
    /// Serializes checkpoint-driven transitions (resume, dormant cancel),
    /// which await the store between checking and replacing an entry.
    lifecycle: Mutex<()>,
}

impl<S: CheckpointStore + 'static> ExecutionTracker<S> {
    pub fn new(
        definitions: Arc<DefinitionRegistry>,
        executor: Arc<NodeExecutor>,
        checkpoints: Arc<CheckpointManager<S>>,
        config: EngineConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_executions));
        Self {
            definitions,
            executor,
            checkpoints,
            config,
            entries: DashMap::new(),
            slots,
            lifecycle: Mutex::new(()),
        }
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    pub fn checkpoints(&self) -> &CheckpointManager<S> {
        &self.checkpoints
    }

    pub fn events(&self) -> &crate::event::bus::EventBus {
        self.executor.events()
    }

    /// Executions with a live orchestrator.
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_running()).count()
    }

    // -- submission ----------------------------------------------------------

    /// Validate and start a new execution of `definition_id`.
    ///
    /// Validation and capacity errors are returned here; everything that goes
    /// wrong afterwards is reported through the execution's status.
    pub async fn submit(
        &self,
        definition_id: &str,
        input: Value,
        context: Value,
        params: ExecutionParams,
    ) -> Result<Uuid, TrackerError> {
        let definition = self
            .definitions
            .get(definition_id)
            .map_err(|e| TrackerError::Validation(e.to_string()))?;

        if let Some(missing) = definition
            .handler_refs()
            .into_iter()
            .find(|h| !self.executor.handlers().contains(h))
        {
            return Err(TrackerError::Validation(format!(
                "definition '{}' uses unregistered handler '{missing}'",
                definition.id
            )));
        }
        if !(input.is_object() || input.is_null()) {
            return Err(TrackerError::Validation(
                "execution input must be a JSON object".to_string(),
            ));
        }
        if params.budget_usd.is_some_and(|b| !b.is_finite() || b < 0.0) {
            return Err(TrackerError::Validation(
                "budget must be a non-negative number".to_string(),
            ));
        }

        let permit = self.acquire_slot()?;

        let mut state = WorkflowState::new(&definition.id, input, context);
        state.labels = params.labels.clone();
        state.budget_usd = resolve_ceiling(&params, &definition, &self.config);
        state.current_node = definition.start().map(str::to_string);
        self.checkpoints.persist(&state).await?;

        let id = state.execution_id;
        tracing::info!(
            execution_id = %id,
            definition_id = %definition.id,
            budget_usd = ?state.budget_usd,
            "execution submitted"
        );
        let handle = self.launch(definition, state, permit);
        self.entries.insert(id, handle);
        Ok(id)
    }

    fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, TrackerError> {
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| TrackerError::CapacityExceeded {
                limit: self.config.max_concurrent_executions,
            })
    }

    fn launch(
        &self,
        definition: Arc<WorkflowDefinition>,
        state: WorkflowState,
        permit: OwnedSemaphorePermit,
    ) -> ExecutionHandle {
        let control = ExecutionControl::new();

        // A resumed execution reads as running from the moment it is launched.
        let mut seed = state.clone();
        if !seed.status.is_active() && seed.status.can_transition_to(ExecutionStatus::Running) {
            seed.status = ExecutionStatus::Running;
        }
        let (tx, snapshot) = watch::channel(seed);

        let limit = definition
            .max_node_visits
            .map_or(self.config.max_node_visits, |own| own.min(self.config.max_node_visits));
        let span = tracing::info_span!(
            "workflow.execution",
            execution_id = %state.execution_id,
            definition_id = %state.definition_id,
        );
        let orchestrator = Orchestrator::new(
            definition,
            Arc::clone(&self.executor),
            Arc::clone(&self.checkpoints),
        )
        .with_retry(RetryPolicy::from_settings(&self.config.retry))
        .with_control(control.clone())
        .with_snapshots(tx)
        .with_max_node_visits(limit);

        let task = tokio::spawn(
            async move {
                let _permit = permit;
                let final_state = orchestrator.run(state).await;
                tracing::debug!(status = %final_state.status, "orchestrator finished");
            }
            .instrument(span),
        );

        ExecutionHandle {
            control,
            snapshot,
            task: Some(task),
        }
    }

    // -- queries -------------------------------------------------------------

    /// Latest snapshot of an execution.
    pub async fn status(&self, id: &Uuid) -> Result<WorkflowState, TrackerError> {
        if let Some(entry) = self.entries.get(id) {
            return Ok(entry.state());
        }
        self.load(id).await
    }

    async fn load(&self, id: &Uuid) -> Result<WorkflowState, TrackerError> {
        match self.checkpoints.load(id).await {
            Ok(state) => Ok(state),
            Err(CheckpointError::NotFound(_)) => Err(TrackerError::NotFound(*id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Summaries of tracked and checkpointed executions, oldest first.
    pub async fn list(&self, filter: &ExecutionFilter, page: Page) -> Result<Vec<ExecutionSummary>, TrackerError> {
        let mut by_id: HashMap<Uuid, ExecutionSummary> = self
            .checkpoints
            .summaries()
            .await?
            .into_iter()
            .map(|s| (s.execution_id, s))
            .collect();
        for entry in self.entries.iter() {
            let summary = entry.snapshot.borrow().summary();
            by_id.insert(summary.execution_id, summary);
        }

        let mut summaries: Vec<ExecutionSummary> =
            by_id.into_values().filter(|s| filter.matches(s)).collect();
        summaries.sort_by_key(|s| (s.created_at, s.execution_id));
        Ok(summaries.into_iter().skip(page.offset).take(page.limit).collect())
    }

    /// Wait until an execution stops being active and return its snapshot.
    pub async fn wait(&self, id: &Uuid) -> Result<WorkflowState, TrackerError> {
        let receiver = self.entries.get(id).map(|e| e.snapshot.clone());
        let Some(mut receiver) = receiver else {
            return self.status(id).await;
        };
        if let Ok(state) = receiver.wait_for(|s| !s.status.is_active()).await {
            return Ok(state.clone());
        }
        let last = receiver.borrow().clone();
        Ok(last)
    }

    // -- control -------------------------------------------------------------

    /// Request cancellation.
    ///
    /// Running executions stop cooperatively before their next node. Paused
    /// or orphaned executions are cancelled directly in their checkpoint.
    pub async fn cancel(&self, id: &Uuid, reason: &str) -> Result<(), TrackerError> {
        if self.signal_cancel(id, reason) {
            return Ok(());
        }

        let _guard = self.lifecycle.lock().await;
        // a resume may have launched an orchestrator while we waited
        if self.signal_cancel(id, reason) {
            return Ok(());
        }

        let mut state = self.load(id).await?;
        if state.is_terminal() {
            return Err(TrackerError::InvalidState {
                id: *id,
                status: state.status,
            });
        }
        state.record_error(ErrorRecord::new(ErrorKind::Cancelled, reason));
        state
            .transition(ExecutionStatus::Cancelled)
            .map_err(|e| TrackerError::InvalidState { id: *id, status: e.from })?;
        self.checkpoints.persist(&state).await?;

        tracing::info!(execution_id = %id, reason, "dormant execution cancelled");
        self.events().publish(WorkflowEvent::ExecutionCancelled {
            execution_id: *id,
            reason: reason.to_string(),
        });
        self.entries.insert(*id, ExecutionHandle::dormant(state));
        Ok(())
    }

    fn signal_cancel(&self, id: &Uuid, reason: &str) -> bool {
        let running = self
            .entries
            .get(id)
            .filter(|e| e.is_running())
            .map(|e| e.control.clone());
        match running {
            Some(control) => {
                tracing::info!(execution_id = %id, reason, "cancellation requested");
                control.cancel(reason);
                true
            }
            None => false,
        }
    }

    /// Request a cooperative pause of a running execution.
    pub async fn pause(&self, id: &Uuid) -> Result<(), TrackerError> {
        let running = self
            .entries
            .get(id)
            .filter(|e| e.is_running())
            .map(|e| e.control.clone());
        match running {
            Some(control) => {
                tracing::info!(execution_id = %id, "pause requested");
                control.pause();
                Ok(())
            }
            None => {
                let state = self.status(id).await?;
                Err(TrackerError::InvalidState {
                    id: *id,
                    status: state.status,
                })
            }
        }
    }

    /// Restart an execution from its checkpoint.
    ///
    /// Accepts paused and failed executions, and running or pending ones
    /// whose orchestrator died with a previous process.
    pub async fn resume(&self, id: &Uuid) -> Result<(), TrackerError> {
        let _guard = self.lifecycle.lock().await;
        if self.entries.get(id).is_some_and(|e| e.is_running()) {
            return Err(TrackerError::AlreadyActive(*id));
        }

        let state = self.load(id).await?;
        if matches!(
            state.status,
            ExecutionStatus::Completed | ExecutionStatus::Cancelled
        ) {
            return Err(TrackerError::InvalidState {
                id: *id,
                status: state.status,
            });
        }
        let definition = self
            .definitions
            .get(&state.definition_id)
            .map_err(|e| TrackerError::Validation(e.to_string()))?;
        let permit = self.acquire_slot()?;

        match self.entries.entry(*id) {
            Entry::Occupied(entry) if entry.get().is_running() => Err(TrackerError::AlreadyActive(*id)),
            entry => {
                tracing::info!(
                    execution_id = %id,
                    status = %state.status,
                    current_node = ?state.current_node,
                    "resuming execution"
                );
                let handle = self.launch(definition, state, permit);
                entry.insert(handle);
                Ok(())
            }
        }
    }

    /// Resume executions a crashed process left `pending` or `running`.
    /// Paused executions stay paused.
    pub async fn recover(&self) -> Result<Vec<Uuid>, TrackerError> {
        let mut recovered = Vec::new();
        for state in self.checkpoints.unfinished().await? {
            let id = state.execution_id;
            if !state.status.is_active() || self.entries.contains_key(&id) {
                continue;
            }
            match self.resume(&id).await {
                Ok(()) => recovered.push(id),
                Err(e) => tracing::warn!(execution_id = %id, error = %e, "could not recover execution"),
            }
        }
        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "recovered unfinished executions");
        }
        Ok(recovered)
    }

    /// Remove a terminal execution from the registry and the checkpoint store.
    pub async fn delete(&self, id: &Uuid) -> Result<(), TrackerError> {
        let state = self.status(id).await?;
        if !state.is_terminal() {
            return Err(TrackerError::NotTerminal(*id));
        }
        self.entries.remove(id);
        self.checkpoints.delete(id).await?;
        tracing::info!(execution_id = %id, "execution deleted");
        Ok(())
    }

    // -- housekeeping --------------------------------------------------------

    /// Drop terminal entries whose grace period has elapsed. Their state
    /// remains readable from the checkpoint store.
    pub fn reap(&self) -> usize {
        let secs = i64::try_from(self.config.tracker.grace_period_secs).unwrap_or(i64::MAX);
        let grace = chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let mut removed = 0;
        self.entries.retain(|_, handle| {
            if handle.is_running() {
                return true;
            }
            let snapshot = handle.snapshot.borrow();
            let expired = snapshot.is_terminal()
                && snapshot
                    .timestamps
                    .completed_at
                    .is_some_and(|at| now - at >= grace);
            if expired {
                removed += 1;
            }
            !expired
        });
        if removed > 0 {
            tracing::debug!(removed, "reaped finished executions");
        }
        removed
    }

    pub fn spawn_reaper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.reap();
                    }
                }
            }
        })
    }

    /// Cancel every running execution cooperatively.
    pub fn shutdown(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.entries.iter().filter(|e| e.is_running()) {
            entry.control.cancel("engine shutting down");
            cancelled += 1;
        }
        if cancelled > 0 {
            tracing::info!(cancelled, "cancelling running executions for shutdown");
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;
    use waypoint_types::error::RepositoryError;
    use waypoint_types::execution::NodeResult;

    use crate::repository::in_memory::InMemoryCheckpointStore;
    use crate::workflow::handler::{NodeContext, NodeHandler};
    use crate::workflow::test_support::{self, linear};

    /// Fails the first call it ever receives, then succeeds.
    #[derive(Default)]
    struct FailsOnce {
        calls: Arc<AtomicU32>,
    }

    impl NodeHandler for FailsOnce {
        fn node_type(&self) -> &str {
            "fails_once"
        }

        async fn invoke(&self, _ctx: &NodeContext, _config: &Value) -> NodeResult {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                NodeResult::fatal("upstream rejected the request")
            } else {
                NodeResult::success(json!("recovered"))
            }
        }
    }

    fn config(max_concurrent: usize) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.max_concurrent_executions = max_concurrent;
        config.retry.base_delay_ms = 0;
        config.retry.max_delay_ms = 0;
        config
    }

    /// In-memory store whose loads take a while, so callers interleave.
    #[derive(Default)]
    struct SlowLoads {
        inner: InMemoryCheckpointStore,
    }

    impl CheckpointStore for SlowLoads {
        async fn save(
            &self,
            execution_id: &Uuid,
            state: &WorkflowState,
            expires_at: chrono::DateTime<Utc>,
        ) -> Result<(), RepositoryError> {
            self.inner.save(execution_id, state, expires_at).await
        }

        async fn load(&self, execution_id: &Uuid) -> Result<Option<WorkflowState>, RepositoryError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.load(execution_id).await
        }

        async fn delete(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
            self.inner.delete(execution_id).await
        }

        async fn sweep_expired(&self) -> Result<u64, RepositoryError> {
            self.inner.sweep_expired().await
        }

        async fn list_unfinished(&self) -> Result<Vec<WorkflowState>, RepositoryError> {
            self.inner.list_unfinished().await
        }

        async fn list_summaries(&self) -> Result<Vec<ExecutionSummary>, RepositoryError> {
            self.inner.list_summaries().await
        }
    }

    fn tracker_with(
        defs: Vec<WorkflowDefinition>,
        config: EngineConfig,
    ) -> Arc<ExecutionTracker<InMemoryCheckpointStore>> {
        tracker_on(InMemoryCheckpointStore::new(), defs, config)
    }

    fn tracker_on<S: CheckpointStore + 'static>(
        store: S,
        defs: Vec<WorkflowDefinition>,
        config: EngineConfig,
    ) -> Arc<ExecutionTracker<S>> {
        let registry = DefinitionRegistry::new(config.max_node_visits);
        for def in defs {
            registry.register(def).unwrap();
        }
        let handlers = test_support::handlers().with(FailsOnce::default());
        let executor = Arc::new(NodeExecutor::new(Arc::new(handlers)));
        let checkpoints = Arc::new(CheckpointManager::new(store, config.checkpoint.clone()));
        Arc::new(ExecutionTracker::new(Arc::new(registry), executor, checkpoints, config))
    }

    fn quick() -> WorkflowDefinition {
        linear("config: { cost: 0.5 }", "config: { cost: 0.5 }", "config: { cost: 0.5 }")
    }

    fn slow() -> WorkflowDefinition {
        let mut def = linear("config: {}", "config: { sleep_ms: 1000 }", "config: {}");
        def.id = "slow".to_string();
        def
    }

    async fn submit(tracker: &ExecutionTracker<InMemoryCheckpointStore>, def: &str) -> Uuid {
        tracker
            .submit(def, json!({"topic": "rust"}), Value::Null, ExecutionParams::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn submit_runs_to_completion() {
        let tracker = tracker_with(vec![quick()], config(4));
        let id = submit(&tracker, "linear").await;

        let final_state = tracker.wait(&id).await.unwrap();
        assert_eq!(final_state.status, ExecutionStatus::Completed);
        assert_eq!(final_state.completed_nodes, vec!["a", "b", "c"]);
        assert!((final_state.total_cost - 1.5).abs() < 1e-9);

        let stored = tracker.checkpoints().load(&id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(tracker.status(&id).await.unwrap().status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn invalid_submissions_create_nothing() {
        let mut needs_prompt = quick();
        needs_prompt.id = "prompted".to_string();
        needs_prompt.nodes[1].handler = "prompt".to_string();
        let tracker = tracker_with(vec![quick(), needs_prompt], config(4));

        let unknown = tracker
            .submit("missing", Value::Null, Value::Null, ExecutionParams::default())
            .await;
        assert!(matches!(unknown, Err(TrackerError::Validation(_))));

        let unregistered = tracker
            .submit("prompted", Value::Null, Value::Null, ExecutionParams::default())
            .await;
        assert!(matches!(unregistered, Err(TrackerError::Validation(m)) if m.contains("prompt")));

        let bad_input = tracker
            .submit("linear", json!([1, 2]), Value::Null, ExecutionParams::default())
            .await;
        assert!(matches!(bad_input, Err(TrackerError::Validation(_))));

        assert!(tracker.checkpoints().store().is_empty());
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_is_enforced_at_submit() {
        let tracker = tracker_with(vec![slow()], config(1));
        let first = submit(&tracker, "slow").await;

        let second = tracker
            .submit("slow", Value::Null, Value::Null, ExecutionParams::default())
            .await;
        assert!(matches!(second, Err(TrackerError::CapacityExceeded { limit: 1 })));

        tracker.wait(&first).await.unwrap();
        // the slot is released when the orchestrator task ends
        for _ in 0..10 {
            if tracker.active_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let third = submit(&tracker, "slow").await;
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn concurrent_submissions_are_independent() {
        let tracker = tracker_with(vec![quick()], config(8));
        let (a, b) = tokio::join!(submit(&tracker, "linear"), submit(&tracker, "linear"));
        assert_ne!(a, b);

        for id in [a, b] {
            let state = tracker.wait(&id).await.unwrap();
            assert_eq!(state.execution_id, id);
            assert_eq!(state.status, ExecutionStatus::Completed);
            assert_eq!(state.completed_nodes, vec!["a", "b", "c"]);
            assert_eq!(state.ai_calls.len(), 3);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_orchestrator_is_refused() {
        let tracker = tracker_with(vec![slow()], config(4));
        let id = submit(&tracker, "slow").await;
        assert!(matches!(tracker.resume(&id).await, Err(TrackerError::AlreadyActive(x)) if x == id));
        tracker.wait(&id).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_before_next_node() {
        let tracker = tracker_with(vec![slow()], config(4));
        let mut events = tracker.events().subscribe();
        let id = submit(&tracker, "slow").await;

        loop {
            if let WorkflowEvent::NodeStarted { node_id, .. } = events.recv().await.unwrap() {
                if node_id == "b" {
                    break;
                }
            }
        }
        tracker.cancel(&id, "no longer needed").await.unwrap();
        let state = tracker.wait(&id).await.unwrap();

        assert_eq!(state.status, ExecutionStatus::Cancelled);
        assert_eq!(state.completed_nodes, vec!["a", "b"]);
        assert!(matches!(
            tracker.cancel(&id, "again").await,
            Err(TrackerError::InvalidState { status: ExecutionStatus::Cancelled, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_releases_slot_and_resume_finishes() {
        let tracker = tracker_with(vec![slow(), quick()], config(1));
        let mut events = tracker.events().subscribe();
        let id = submit(&tracker, "slow").await;

        loop {
            if let WorkflowEvent::NodeStarted { node_id, .. } = events.recv().await.unwrap() {
                if node_id == "b" {
                    break;
                }
            }
        }
        tracker.pause(&id).await.unwrap();
        let paused = tracker.wait(&id).await.unwrap();
        assert_eq!(paused.status, ExecutionStatus::Paused);
        assert_eq!(paused.current_node.as_deref(), Some("c"));

        // a paused execution holds no slot
        for _ in 0..10 {
            if tracker.active_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let other = submit(&tracker, "linear").await;
        tracker.wait(&other).await.unwrap();
        for _ in 0..10 {
            if tracker.active_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        tracker.resume(&id).await.unwrap();
        let resumed = tracker.wait(&id).await.unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Completed);
        assert_eq!(resumed.completed_nodes, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failed_execution_resumes_at_failed_node() {
        let def = test_support::definition(
            r#"
id: flaky
nodes:
  - { id: prepare, handler: script }
  - { id: call, handler: fails_once }
  - { id: finish, handler: passthrough }
edges:
  - { from: prepare, to: call }
  - { from: call, to: finish }
"#,
        );
        let tracker = tracker_with(vec![def], config(4));
        let id = submit(&tracker, "flaky").await;

        let failed = tracker.wait(&id).await.unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.current_node.as_deref(), Some("call"));

        tracker.resume(&id).await.unwrap();
        let done = tracker.wait(&id).await.unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.completed_nodes, vec!["prepare", "call", "finish"]);
        assert_eq!(done.results["call"], "recovered");
        // the earlier failure stays on record
        assert!(done.errors.iter().any(|e| e.kind == ErrorKind::Fatal));
        assert_eq!(done.ai_calls.iter().filter(|c| c.node_id == "prepare").count(), 1);
    }

    #[tokio::test]
    async fn recover_resumes_orphaned_running_executions() {
        let tracker = tracker_with(vec![quick()], config(4));

        // a checkpoint left behind by a process that died after node a
        let mut orphan = WorkflowState::new("linear", Value::Null, Value::Null);
        orphan.transition(ExecutionStatus::Running).unwrap();
        orphan.mark_completed("a");
        orphan.merge_output("a", json!({"node": "a", "attempt": 1}), Default::default());
        orphan.current_node = Some("b".to_string());
        tracker.checkpoints().persist(&orphan).await.unwrap();

        let mut paused = WorkflowState::new("linear", Value::Null, Value::Null);
        paused.transition(ExecutionStatus::Running).unwrap();
        paused.transition(ExecutionStatus::Paused).unwrap();
        tracker.checkpoints().persist(&paused).await.unwrap();

        let recovered = tracker.recover().await.unwrap();
        assert_eq!(recovered, vec![orphan.execution_id]);

        let done = tracker.wait(&orphan.execution_id).await.unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.completed_nodes, vec!["a", "b", "c"]);
        assert!(done.ai_calls.iter().all(|c| c.node_id != "a"));
        assert_eq!(tracker.status(&paused.execution_id).await.unwrap().status, ExecutionStatus::Paused);
    }

    #[tokio::test]
    async fn cancel_paused_execution_in_checkpoint() {
        let tracker = tracker_with(vec![quick()], config(4));
        let mut paused = WorkflowState::new("linear", Value::Null, Value::Null);
        paused.transition(ExecutionStatus::Running).unwrap();
        paused.transition(ExecutionStatus::Paused).unwrap();
        tracker.checkpoints().persist(&paused).await.unwrap();

        tracker.cancel(&paused.execution_id, "abandoned").await.unwrap();
        let stored = tracker.checkpoints().load(&paused.execution_id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
        assert!(matches!(
            tracker.resume(&paused.execution_id).await,
            Err(TrackerError::InvalidState { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_resume_of_paused_execution_do_not_interleave() {
        let tracker = tracker_on(SlowLoads::default(), vec![quick()], config(4));
        let mut paused = WorkflowState::new("linear", Value::Null, Value::Null);
        paused.transition(ExecutionStatus::Running).unwrap();
        paused.transition(ExecutionStatus::Paused).unwrap();
        tracker.checkpoints().persist(&paused).await.unwrap();
        let id = paused.execution_id;

        let (cancelled, resumed) = tokio::join!(tracker.cancel(&id, "abandoned"), tracker.resume(&id));
        cancelled.unwrap();
        assert!(matches!(
            resumed,
            Err(TrackerError::InvalidState { status: ExecutionStatus::Cancelled, .. })
        ));

        let state = tracker.wait(&id).await.unwrap();
        assert_eq!(state.status, ExecutionStatus::Cancelled);
        assert!(state.ai_calls.is_empty());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let stored = tracker.checkpoints().load(&id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
        assert_eq!(tracker.active_count(), 0);
        assert!(matches!(tracker.resume(&id).await, Err(TrackerError::InvalidState { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_concurrent_resume_reaches_the_orchestrator() {
        let tracker = tracker_on(SlowLoads::default(), vec![slow()], config(4));
        let mut paused = WorkflowState::new("slow", Value::Null, Value::Null);
        paused.transition(ExecutionStatus::Running).unwrap();
        paused.transition(ExecutionStatus::Paused).unwrap();
        paused.current_node = Some("a".to_string());
        tracker.checkpoints().persist(&paused).await.unwrap();
        let id = paused.execution_id;

        let (resumed, cancelled) = tokio::join!(tracker.resume(&id), tracker.cancel(&id, "abandoned"));
        resumed.unwrap();
        cancelled.unwrap();

        let state = tracker.wait(&id).await.unwrap();
        assert_eq!(state.status, ExecutionStatus::Cancelled);
        assert_eq!(state.last_error().unwrap().message, "abandoned");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(tracker.active_count(), 0);
        let stored = tracker.checkpoints().load(&id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let tracker = tracker_with(vec![quick()], config(8));
        let mut ids = Vec::new();
        for team in ["core", "core", "infra"] {
            let params = ExecutionParams {
                labels: [("team".to_string(), team.to_string())].into(),
                ..ExecutionParams::default()
            };
            ids.push(tracker.submit("linear", Value::Null, Value::Null, params).await.unwrap());
        }
        for id in &ids {
            tracker.wait(id).await.unwrap();
        }

        let all = tracker.list(&ExecutionFilter::default(), Page::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let core = ExecutionFilter {
            label: Some(("team".to_string(), "core".to_string())),
            ..ExecutionFilter::default()
        };
        assert_eq!(tracker.list(&core, Page::default()).await.unwrap().len(), 2);

        let failed = ExecutionFilter {
            statuses: vec![ExecutionStatus::Failed],
            ..ExecutionFilter::default()
        };
        assert!(tracker.list(&failed, Page::default()).await.unwrap().is_empty());

        let page = Page { offset: 1, limit: 1 };
        let second = tracker.list(&ExecutionFilter::default(), page).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].execution_id, all[1].execution_id);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_requires_terminal_status() {
        let tracker = tracker_with(vec![slow()], config(4));
        let id = submit(&tracker, "slow").await;
        assert!(matches!(tracker.delete(&id).await, Err(TrackerError::NotTerminal(_))));

        tracker.wait(&id).await.unwrap();
        tracker.delete(&id).await.unwrap();
        assert!(matches!(tracker.status(&id).await, Err(TrackerError::NotFound(_))));
    }

    #[tokio::test]
    async fn reaped_executions_are_served_from_checkpoints() {
        let mut cfg = config(4);
        cfg.tracker.grace_period_secs = 0;
        let tracker = tracker_with(vec![quick()], cfg);
        let id = submit(&tracker, "linear").await;
        tracker.wait(&id).await.unwrap();
        for _ in 0..10 {
            if tracker.active_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(tracker.reap(), 1);
        let state = tracker.status(&id).await.unwrap();
        assert_eq!(state.status, ExecutionStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn background_reaper_drops_finished_entries() {
        let mut cfg = config(4);
        cfg.tracker.grace_period_secs = 0;
        let tracker = tracker_with(vec![quick()], cfg);
        let id = submit(&tracker, "linear").await;
        tracker.wait(&id).await.unwrap();

        let shutdown = CancellationToken::new();
        let reaper = Arc::clone(&tracker).spawn_reaper(Duration::from_secs(60), shutdown.clone());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(tracker.entries.is_empty());

        shutdown.cancel();
        reaper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn status_is_monotonic_while_running() {
        let def = linear(
            "config: { sleep_ms: 100, cost: 1.0 }",
            "config: { sleep_ms: 100, cost: 1.0 }",
            "config: { sleep_ms: 100, cost: 1.0 }",
        );
        let tracker = tracker_with(vec![def], config(4));
        let id = submit(&tracker, "linear").await;

        let mut observed = Vec::new();
        loop {
            let state = tracker.status(&id).await.unwrap();
            let done = state.is_terminal();
            observed.push(state);
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        assert!(observed.len() > 3);
        for pair in observed.windows(2) {
            assert!(pair[0].completed_nodes.len() <= pair[1].completed_nodes.len());
            assert!(pair[0].total_cost <= pair[1].total_cost);
            assert!(pair[0].token_usage.total() <= pair[1].token_usage.total());
            assert!(!(pair[0].status == ExecutionStatus::Running && pair[1].status == ExecutionStatus::Pending));
        }
        assert_eq!(observed.last().unwrap().status, ExecutionStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_running_executions() {
        let tracker = tracker_with(vec![slow()], config(4));
        let id = submit(&tracker, "slow").await;
        assert_eq!(tracker.shutdown(), 1);
        let state = tracker.wait(&id).await.unwrap();
        assert_eq!(state.status, ExecutionStatus::Cancelled);
    }
}
