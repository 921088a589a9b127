//! In-memory `CheckpointStore` backed by a `DashMap`.
//!
//! Used for tests and embedded engines that do not need durability across
//! process restarts. Expiry is checked on read as well as by the sweep.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;
use waypoint_types::error::RepositoryError;
use waypoint_types::execution::{ExecutionSummary, WorkflowState};

use super::checkpoint::CheckpointStore;

#[derive(Debug, Clone)]
struct StoredCheckpoint {
    state: WorkflowState,
    expires_at: DateTime<Utc>,
}

impl StoredCheckpoint {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: DashMap<Uuid, StoredCheckpoint>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        execution_id: &Uuid,
        state: &WorkflowState,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.entries.insert(
            *execution_id,
            StoredCheckpoint {
                state: state.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn load(&self, execution_id: &Uuid) -> Result<Option<WorkflowState>, RepositoryError> {
        let now = Utc::now();
        Ok(self
            .entries
            .get(execution_id)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.state.clone()))
    }

    async fn delete(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.entries.remove(execution_id).is_some())
    }

    async fn sweep_expired(&self) -> Result<u64, RepositoryError> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok((before - self.entries.len()) as u64)
    }

    async fn list_unfinished(&self) -> Result<Vec<WorkflowState>, RepositoryError> {
        let now = Utc::now();
        let mut states: Vec<WorkflowState> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now) && !entry.state.is_terminal())
            .map(|entry| entry.state.clone())
            .collect();
        states.sort_by_key(|s| s.timestamps.created_at);
        Ok(states)
    }

    async fn list_summaries(&self) -> Result<Vec<ExecutionSummary>, RepositoryError> {
        let now = Utc::now();
        let mut summaries: Vec<ExecutionSummary> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.state.summary())
            .collect();
        summaries.sort_by_key(|s| s.created_at);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::{json, Value};
    use waypoint_types::execution::ExecutionStatus;

    fn state() -> WorkflowState {
        WorkflowState::new("wf", json!({}), Value::Null)
    }

    #[tokio::test]
    async fn save_then_load_returns_latest_write() {
        let store = InMemoryCheckpointStore::new();
        let mut s = state();
        let id = s.execution_id;
        let expires = Utc::now() + Duration::hours(1);

        store.save(&id, &s, expires).await.unwrap();
        s.mark_completed("a");
        store.save(&id, &s, expires).await.unwrap();

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.completed_nodes, vec!["a"]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn expired_checkpoint_reads_as_missing() {
        let store = InMemoryCheckpointStore::new();
        let s = state();
        let id = s.execution_id;
        store
            .save(&id, &s, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();

        assert!(store.load(&id).await.unwrap().is_none());
        assert!(store.load(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let store = InMemoryCheckpointStore::new();
        let live = state();
        let dead = state();
        store
            .save(&live.execution_id, &live, Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        store
            .save(&dead.execution_id, &dead, Utc::now() - Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.load(&live.execution_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_unfinished_skips_terminal_states() {
        let store = InMemoryCheckpointStore::new();
        let expires = Utc::now() + Duration::hours(1);

        let running = {
            let mut s = state();
            s.transition(ExecutionStatus::Running).unwrap();
            s
        };
        let done = {
            let mut s = state();
            s.transition(ExecutionStatus::Running).unwrap();
            s.transition(ExecutionStatus::Completed).unwrap();
            s
        };
        store.save(&running.execution_id, &running, expires).await.unwrap();
        store.save(&done.execution_id, &done, expires).await.unwrap();

        let unfinished = store.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].execution_id, running.execution_id);
        assert_eq!(store.list_summaries().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = InMemoryCheckpointStore::new();
        let s = state();
        store
            .save(&s.execution_id, &s, Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert!(store.delete(&s.execution_id).await.unwrap());
        assert!(!store.delete(&s.execution_id).await.unwrap());
    }
}
