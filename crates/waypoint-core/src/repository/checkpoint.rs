//! Checkpoint store trait definition.
//!
//! A checkpoint is the full serialized `WorkflowState` of one execution,
//! keyed by execution id, with an expiry instant. The infrastructure layer
//! (waypoint-infra) implements this trait with SQLite; an in-memory store
//! lives in [`super::in_memory`].

use chrono::{DateTime, Utc};
use uuid::Uuid;
use waypoint_types::error::RepositoryError;
use waypoint_types::execution::{ExecutionSummary, WorkflowState};

/// Durable key-value storage of execution snapshots.
///
/// Writes are last-write-wins per execution id; only the owning orchestrator
/// writes a given key, so implementations need no cross-key locking.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointStore: Send + Sync {
    /// Upsert the snapshot for `execution_id`, expiring at `expires_at`.
    fn save(
        &self,
        execution_id: &Uuid,
        state: &WorkflowState,
        expires_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load a snapshot. Expired and missing checkpoints both return `None`.
    fn load(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowState>, RepositoryError>> + Send;

    /// Delete a snapshot. Returns `true` if it existed.
    fn delete(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Remove every checkpoint whose expiry has passed. Returns the count removed.
    fn sweep_expired(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Non-expired checkpoints whose execution has not reached a terminal status.
    fn list_unfinished(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowState>, RepositoryError>> + Send;

    /// Summaries of all non-expired checkpoints, oldest first.
    fn list_summaries(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionSummary>, RepositoryError>> + Send;
}
