//! Checkpoint manager: durable writes with retry, expiry policy and the
//! background TTL sweep.
//!
//! Wraps a [`CheckpointStore`] so the orchestrator never talks to storage
//! directly. A write that still fails after the configured attempts becomes a
//! [`CheckpointError::Persistence`], which the orchestrator treats as fatal.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use waypoint_types::config::CheckpointSettings;
use waypoint_types::error::RepositoryError;
use waypoint_types::execution::{ExecutionSummary, WorkflowState};

use crate::repository::checkpoint::CheckpointStore;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint store error: {0}")]
    Repository(String),

    #[error("checkpoint not found: {0}")]
    NotFound(Uuid),

    #[error("checkpoint write failed after {attempts} attempts: {message}")]
    Persistence { attempts: u32, message: String },
}

impl From<RepositoryError> for CheckpointError {
    fn from(e: RepositoryError) -> Self {
        Self::Repository(e.to_string())
    }
}

pub struct CheckpointManager<S: CheckpointStore> {
    store: S,
    settings: CheckpointSettings,
}

impl<S: CheckpointStore> CheckpointManager<S> {
    pub fn new(store: S, settings: CheckpointSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Terminal executions keep their checkpoint for the retention period;
    /// everything else for the TTL after its last write.
    pub fn expiry_for(&self, state: &WorkflowState) -> DateTime<Utc> {
        let secs = if state.is_terminal() {
            self.settings.terminal_retention_secs
        } else {
            self.settings.ttl_secs
        };
        let secs = i64::try_from(secs).unwrap_or(i64::MAX);
        let ttl = chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX);
        Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Write `state`, retrying with exponential backoff.
    pub async fn persist(&self, state: &WorkflowState) -> Result<(), CheckpointError> {
        let attempts = self.settings.persist_attempts.max(1);
        let mut delay = Duration::from_millis(self.settings.persist_base_delay_ms);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let expires_at = self.expiry_for(state);
            match self.store.save(&state.execution_id, state, expires_at).await {
                Ok(()) => {
                    tracing::debug!(
                        execution_id = %state.execution_id,
                        status = %state.status,
                        completed = state.completed_nodes.len(),
                        "checkpoint saved"
                    );
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        tracing::warn!(
                            execution_id = %state.execution_id,
                            attempt,
                            error = %e,
                            "checkpoint write failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        tracing::error!(
            execution_id = %state.execution_id,
            attempts,
            error = %last_error,
            "checkpoint write failed permanently"
        );
        Err(CheckpointError::Persistence {
            attempts,
            message: last_error,
        })
    }

    /// Single best-effort write used after a persistence failure.
    pub async fn persist_once(&self, state: &WorkflowState) -> bool {
        self.store
            .save(&state.execution_id, state, self.expiry_for(state))
            .await
            .is_ok()
    }

    pub async fn load(&self, execution_id: &Uuid) -> Result<WorkflowState, CheckpointError> {
        self.store
            .load(execution_id)
            .await?
            .ok_or(CheckpointError::NotFound(*execution_id))
    }

    pub async fn delete(&self, execution_id: &Uuid) -> Result<bool, CheckpointError> {
        Ok(self.store.delete(execution_id).await?)
    }

    pub async fn sweep(&self) -> Result<u64, CheckpointError> {
        let removed = self.store.sweep_expired().await?;
        if removed > 0 {
            tracing::info!(removed, "swept expired checkpoints");
        }
        Ok(removed)
    }

    pub async fn unfinished(&self) -> Result<Vec<WorkflowState>, CheckpointError> {
        Ok(self.store.list_unfinished().await?)
    }

    pub async fn summaries(&self) -> Result<Vec<ExecutionSummary>, CheckpointError> {
        Ok(self.store.list_summaries().await?)
    }
}

impl<S: CheckpointStore + 'static> CheckpointManager<S> {
    /// Run [`sweep`](Self::sweep) every `sweep_interval_secs` until `shutdown`
    /// is cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = Duration::from_secs(self.settings.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::warn!(error = %e, "checkpoint sweep failed");
                        }
                    }
                }
            }
            tracing::debug!("checkpoint sweeper stopped");
        })
    }
}

impl<S: CheckpointStore> std::fmt::Debug for CheckpointManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("settings", &self.settings)
            .finish()
    }
}
