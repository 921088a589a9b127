//! Execution state types.
//!
//! `WorkflowState` is the mutable record of one execution. It is exclusively
//! owned by the orchestrator driving it and is serialized whole into the
//! checkpoint store after every node transition.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// `completed`, `failed` and `cancelled` end an orchestrator run.
    ///
    /// `failed` may still be resumed explicitly from its checkpoint.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether an orchestrator is (or is about to be) driving the execution.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running | Failed | Cancelled)
                | (Running, Completed | Failed | Cancelled | Paused)
                | (Paused, Running | Cancelled)
                | (Failed, Running)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal status transition {from} -> {to}")]
pub struct StateError {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

// ---------------------------------------------------------------------------
// Log records
// ---------------------------------------------------------------------------

/// Outcome of a single node attempt, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    RetryableFailure,
    FatalFailure,
    TimedOut,
}

/// One metered attempt of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiCallRecord {
    pub node_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub outcome: CallOutcome,
    pub timestamp: DateTime<Utc>,
}

/// Error classification for entries in `WorkflowState::errors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Retryable,
    Timeout,
    Fatal,
    RetriesExhausted,
    BudgetExceeded,
    Persistence,
    Routing,
    StepLimitExceeded,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            kind,
            message: message.into(),
            attempt: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_node(mut self, node_id: &str, attempt: Option<u32>) -> Self {
        self.node_id = Some(node_id.to_string());
        self.attempt = attempt;
        self
    }
}

/// Cumulative token counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Retry counters, per node and aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCount {
    pub per_node: BTreeMap<String, u32>,
    pub total: u32,
}

impl RetryCount {
    pub fn get(&self, node_id: &str) -> u32 {
        self.per_node.get(node_id).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTimestamps {
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

/// Full mutable state of one execution.
///
/// Invariants maintained by the mutators below:
/// - `completed_nodes` only grows (ordered set, first completion wins)
/// - `total_cost` and `token_usage` never decrease
/// - `completed` and `cancelled` are never left once reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub execution_id: Uuid,
    pub definition_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
    #[serde(default)]
    pub completed_nodes: Vec<String>,
    #[serde(default)]
    pub failed_nodes: BTreeSet<String>,
    #[serde(default)]
    pub results: BTreeMap<String, Value>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, Value>,
    #[serde(default)]
    pub input: Value,
    /// Project context supplied at submission.
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub ai_calls: Vec<AiCallRecord>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub retry_count: RetryCount,
    #[serde(default)]
    pub node_visits: BTreeMap<String, u32>,
    /// Resolved budget ceiling in USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_usd: Option<f64>,
    pub timestamps: ExecutionTimestamps,
}

impl WorkflowState {
    /// Fresh `pending` state for a new execution.
    pub fn new(definition_id: impl Into<String>, input: Value, context: Value) -> Self {
        let now = Utc::now();
        Self {
            execution_id: Uuid::now_v7(),
            definition_id: definition_id.into(),
            status: ExecutionStatus::Pending,
            current_node: None,
            completed_nodes: Vec::new(),
            failed_nodes: BTreeSet::new(),
            results: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            input,
            context,
            labels: BTreeMap::new(),
            ai_calls: Vec::new(),
            total_cost: 0.0,
            token_usage: TokenUsage::default(),
            errors: Vec::new(),
            retry_count: RetryCount::default(),
            node_visits: BTreeMap::new(),
            budget_usd: None,
            timestamps: ExecutionTimestamps {
                created_at: now,
                started_at: None,
                completed_at: None,
                last_activity: now,
            },
        }
    }

    /// Move to `next`, maintaining timestamps.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), StateError> {
        if !self.status.can_transition_to(next) {
            return Err(StateError {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        match next {
            ExecutionStatus::Running => {
                self.timestamps.started_at.get_or_insert(now);
                self.timestamps.completed_at = None;
            }
            s if s.is_terminal() => self.timestamps.completed_at = Some(now),
            _ => {}
        }
        self.status = next;
        self.timestamps.last_activity = now;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn touch(&mut self) {
        self.timestamps.last_activity = Utc::now();
    }

    /// Append `node_id` to `completed_nodes` unless already present.
    pub fn mark_completed(&mut self, node_id: &str) {
        if !self.completed_nodes.iter().any(|n| n == node_id) {
            self.completed_nodes.push(node_id.to_string());
        }
        self.touch();
    }

    pub fn mark_failed(&mut self, node_id: &str) {
        self.failed_nodes.insert(node_id.to_string());
        self.touch();
    }

    /// Merge a node's output into `results` and `artifacts`.
    pub fn merge_output(&mut self, node_id: &str, data: Value, artifacts: BTreeMap<String, Value>) {
        self.results.insert(node_id.to_string(), data);
        self.artifacts.extend(artifacts);
    }

    /// Append a call record and fold its usage into the running totals.
    pub fn record_call(&mut self, call: AiCallRecord) {
        // Negative costs from a misbehaving handler must not lower the total.
        self.total_cost += call.cost.max(0.0);
        self.token_usage.input_tokens = self.token_usage.input_tokens.saturating_add(call.tokens_in);
        self.token_usage.output_tokens = self.token_usage.output_tokens.saturating_add(call.tokens_out);
        self.ai_calls.push(call);
        self.touch();
    }

    pub fn record_error(&mut self, error: ErrorRecord) {
        self.errors.push(error);
        self.touch();
    }

    pub fn record_retry(&mut self, node_id: &str) {
        *self.retry_count.per_node.entry(node_id.to_string()).or_insert(0) += 1;
        self.retry_count.total += 1;
    }

    /// Count a visit to `node_id`, returning the execution-wide visit total.
    pub fn record_visit(&mut self, node_id: &str) -> u32 {
        *self.node_visits.entry(node_id.to_string()).or_insert(0) += 1;
        self.visits_total()
    }

    pub fn visits_total(&self) -> u32 {
        self.node_visits.values().sum()
    }

    /// The most recent error, if any.
    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.errors.last()
    }

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            execution_id: self.execution_id,
            definition_id: self.definition_id.clone(),
            status: self.status,
            current_node: self.current_node.clone(),
            completed_nodes: self.completed_nodes.len(),
            total_cost: self.total_cost,
            total_tokens: self.token_usage.total(),
            error: self.last_error().map(|e| e.message.clone()),
            labels: self.labels.clone(),
            created_at: self.timestamps.created_at,
            last_activity: self.timestamps.last_activity,
        }
    }
}

/// Compact view of an execution for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub definition_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
    pub completed_nodes: usize,
    pub total_cost: f64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Submission parameters and listing filters
// ---------------------------------------------------------------------------

/// Per-submission overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionParams {
    /// Budget ceiling in USD; overrides the definition and engine defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_usd: Option<f64>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Filter for execution listings. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub statuses: Vec<ExecutionStatus>,
    pub definition_id: Option<String>,
    pub label: Option<(String, String)>,
}

impl ExecutionFilter {
    pub fn matches(&self, summary: &ExecutionSummary) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&summary.status) {
            return false;
        }
        if let Some(def) = &self.definition_id {
            if &summary.definition_id != def {
                return false;
            }
        }
        if let Some((key, value)) = &self.label {
            if summary.labels.get(key) != Some(value) {
                return false;
            }
        }
        true
    }
}

/// Offset/limit pagination.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Node results
// ---------------------------------------------------------------------------

/// Usage reported by a handler for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    /// Explicit cost in USD. When absent, cost is derived from pricing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl CallUsage {
    pub fn with_cost(cost: f64) -> Self {
        Self {
            cost: Some(cost),
            ..Self::default()
        }
    }
}

/// Successful node output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    pub data: Value,
    pub artifacts: BTreeMap<String, Value>,
    pub usage: Option<CallUsage>,
    /// Optional routing hint exposed to edge conditions as `next_hint`.
    pub next_hint: Option<String>,
}

impl NodeOutput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: CallUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.next_hint = Some(hint.into());
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, blob: Value) -> Self {
        self.artifacts.insert(name.into(), blob);
        self
    }
}

/// Classified outcome of one node attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeResult {
    Success(NodeOutput),
    RetryableFailure {
        reason: String,
        usage: Option<CallUsage>,
    },
    FatalFailure {
        reason: String,
        usage: Option<CallUsage>,
    },
}

impl NodeResult {
    pub fn success(data: Value) -> Self {
        Self::Success(NodeOutput::new(data))
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::RetryableFailure {
            reason: reason.into(),
            usage: None,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::FatalFailure {
            reason: reason.into(),
            usage: None,
        }
    }

    pub fn usage(&self) -> Option<&CallUsage> {
        match self {
            Self::Success(out) => out.usage.as_ref(),
            Self::RetryableFailure { usage, .. } | Self::FatalFailure { usage, .. } => {
                usage.as_ref()
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
