//! Lifecycle events published on the engine event bus.
//!
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted while executions progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    ExecutionStarted {
        execution_id: Uuid,
        definition_id: String,
    },

    NodeStarted {
        execution_id: Uuid,
        node_id: String,
        /// 1-based attempt number.
        attempt: u32,
    },

    /// A streamed partial output chunk from a running node.
    NodeProgress {
        execution_id: Uuid,
        node_id: String,
        chunk: String,
    },

    NodeCompleted {
        execution_id: Uuid,
        node_id: String,
        cost: f64,
        duration_ms: u64,
    },

    NodeFailed {
        execution_id: Uuid,
        node_id: String,
        error: String,
        will_retry: bool,
    },

    ExecutionCompleted {
        execution_id: Uuid,
        total_cost: f64,
    },

    ExecutionFailed {
        execution_id: Uuid,
        error: String,
    },

    ExecutionCancelled {
        execution_id: Uuid,
        reason: String,
    },

    ExecutionPaused { execution_id: Uuid },
}

impl WorkflowEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::NodeStarted { execution_id, .. }
            | Self::NodeProgress { execution_id, .. }
            | Self::NodeCompleted { execution_id, .. }
            | Self::NodeFailed { execution_id, .. }
            | Self::ExecutionCompleted { execution_id, .. }
            | Self::ExecutionFailed { execution_id, .. }
            | Self::ExecutionCancelled { execution_id, .. }
            | Self::ExecutionPaused { execution_id } => *execution_id,
        }
    }
}
