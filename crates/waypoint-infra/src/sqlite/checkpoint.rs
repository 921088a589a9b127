//! SQLite checkpoint store.
//!
//! Implements `CheckpointStore` from `waypoint-core`. Each execution owns one
//! row holding its full `WorkflowState` as a JSON blob; the status and
//! timestamps are duplicated into columns for filtering and the TTL sweep.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use uuid::Uuid;
use waypoint_core::repository::checkpoint::CheckpointStore;
use waypoint_types::error::RepositoryError;
use waypoint_types::execution::{ExecutionSummary, WorkflowState};

use super::pool::DatabasePool;

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled')";

/// SQLite-backed implementation of `CheckpointStore`.
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Rows that fail to parse are skipped with a warning so one corrupt
    /// checkpoint cannot hide the rest.
    async fn fetch_states(&self, sql: &str) -> Result<Vec<WorkflowState>, RepositoryError> {
        let rows = sqlx::query(sql)
            .bind(now_millis())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(rows
            .iter()
            .filter_map(|row| match parse_state_row(row) {
                Ok(state) => Some(state),
                Err(e) => {
                    let execution_id: String = row.try_get("execution_id").unwrap_or_default();
                    tracing::warn!(execution_id = %execution_id, error = %e, "skipping unreadable checkpoint");
                    None
                }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_state_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowState, RepositoryError> {
    let state: String = row
        .try_get("state")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    serde_json::from_str(&state)
        .map_err(|e| RepositoryError::Query(format!("invalid checkpoint JSON: {e}")))
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// CheckpointStore impl
// ---------------------------------------------------------------------------

impl CheckpointStore for SqliteCheckpointStore {
    async fn save(
        &self,
        execution_id: &Uuid,
        state: &WorkflowState,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let state_json = serde_json::to_string(state)
            .map_err(|e| RepositoryError::Query(format!("serialize checkpoint: {e}")))?;

        sqlx::query(
            r#"INSERT INTO checkpoints (execution_id, definition_id, status, state, created_at, saved_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id) DO UPDATE SET
                 status = excluded.status,
                 state = excluded.state,
                 saved_at = excluded.saved_at,
                 expires_at = excluded.expires_at"#,
        )
        .bind(execution_id.to_string())
        .bind(&state.definition_id)
        .bind(state.status.as_str())
        .bind(&state_json)
        .bind(format_datetime(&state.timestamps.created_at))
        .bind(format_datetime(&Utc::now()))
        .bind(expires_at.timestamp_millis())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn load(&self, execution_id: &Uuid) -> Result<Option<WorkflowState>, RepositoryError> {
        let row = sqlx::query("SELECT state FROM checkpoints WHERE execution_id = ? AND expires_at > ?")
            .bind(execution_id.to_string())
            .bind(now_millis())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(parse_state_row).transpose()
    }

    async fn delete(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn sweep_expired(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn list_unfinished(&self) -> Result<Vec<WorkflowState>, RepositoryError> {
        self.fetch_states(&format!(
            "SELECT execution_id, state FROM checkpoints WHERE expires_at > ? AND status NOT IN {TERMINAL_STATUSES} \
             ORDER BY created_at ASC, execution_id ASC"
        ))
        .await
    }

    async fn list_summaries(&self) -> Result<Vec<ExecutionSummary>, RepositoryError> {
        let states = self
            .fetch_states(
                "SELECT execution_id, state FROM checkpoints WHERE expires_at > ? ORDER BY created_at ASC, execution_id ASC",
            )
            .await?;
        Ok(states.iter().map(WorkflowState::summary).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::{Value, json};
    use waypoint_types::execution::ExecutionStatus;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn state(definition_id: &str) -> WorkflowState {
        WorkflowState::new(definition_id, json!({"topic": "sqlite"}), Value::Null)
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + Duration::hours(1)
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = SqliteCheckpointStore::new(test_pool().await);
        let mut s = state("research");
        s.transition(ExecutionStatus::Running).unwrap();
        s.mark_completed("fetch");
        s.merge_output("fetch", json!({"pages": 3}), Default::default());

        store.save(&s.execution_id, &s, later()).await.unwrap();
        let loaded = store.load(&s.execution_id).await.unwrap();
        assert_eq!(loaded, Some(s));
    }

    #[tokio::test]
    async fn test_listing_skips_corrupt_rows() {
        let store = SqliteCheckpointStore::new(test_pool().await);
        let s = state("research");
        store.save(&s.execution_id, &s, later()).await.unwrap();

        sqlx::query(
            "INSERT INTO checkpoints (execution_id, definition_id, status, state, created_at, saved_at, expires_at) \
             VALUES (?, 'research', 'running', '{not json', ?, ?, ?)",
        )
        .bind(Uuid::now_v7().to_string())
        .bind(format_datetime(&Utc::now()))
        .bind(format_datetime(&Utc::now()))
        .bind(later().timestamp_millis())
        .execute(&store.pool.writer)
        .await
        .unwrap();

        let unfinished = store.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].execution_id, s.execution_id);
        assert_eq!(store.list_summaries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_is_last_write_wins() {
        let store = SqliteCheckpointStore::new(test_pool().await);
        let mut s = state("research");
        store.save(&s.execution_id, &s, later()).await.unwrap();

        s.transition(ExecutionStatus::Running).unwrap();
        s.current_node = Some("draft".to_string());
        store.save(&s.execution_id, &s, later()).await.unwrap();

        let loaded = store.load(&s.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.current_node.as_deref(), Some("draft"));
        assert_eq!(store.list_summaries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_returns_none() {
        let store = SqliteCheckpointStore::new(test_pool().await);
        assert!(store.load(&Uuid::now_v7()).await.unwrap().is_none());
        assert!(!store.delete(&Uuid::now_v7()).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_is_invisible_and_swept() {
        let store = SqliteCheckpointStore::new(test_pool().await);
        let stale = state("research");
        let fresh = state("research");
        store
            .save(&stale.execution_id, &stale, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        store.save(&fresh.execution_id, &fresh, later()).await.unwrap();

        assert!(store.load(&stale.execution_id).await.unwrap().is_none());
        assert_eq!(store.list_summaries().await.unwrap().len(), 1);

        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
        assert!(store.load(&fresh.execution_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_unfinished_skips_terminal() {
        let store = SqliteCheckpointStore::new(test_pool().await);

        let mut running = state("a");
        running.transition(ExecutionStatus::Running).unwrap();
        let mut paused = state("b");
        paused.transition(ExecutionStatus::Running).unwrap();
        paused.transition(ExecutionStatus::Paused).unwrap();
        let mut done = state("c");
        done.transition(ExecutionStatus::Running).unwrap();
        done.transition(ExecutionStatus::Completed).unwrap();

        for s in [&running, &paused, &done] {
            store.save(&s.execution_id, s, later()).await.unwrap();
        }

        let unfinished = store.list_unfinished().await.unwrap();
        let ids: Vec<Uuid> = unfinished.iter().map(|s| s.execution_id).collect();
        assert_eq!(ids, vec![running.execution_id, paused.execution_id]);
    }

    #[tokio::test]
    async fn test_summaries_are_oldest_first() {
        let store = SqliteCheckpointStore::new(test_pool().await);
        let first = state("a");
        let second = state("b");
        // saved out of order
        store.save(&second.execution_id, &second, later()).await.unwrap();
        store.save(&first.execution_id, &first, later()).await.unwrap();

        let summaries = store.list_summaries().await.unwrap();
        assert_eq!(summaries[0].execution_id, first.execution_id);
        assert_eq!(summaries[1].definition_id, "b");
    }

    #[tokio::test]
    async fn test_delete_removes_row() {
        let store = SqliteCheckpointStore::new(test_pool().await);
        let s = state("a");
        store.save(&s.execution_id, &s, later()).await.unwrap();
        assert!(store.delete(&s.execution_id).await.unwrap());
        assert!(store.load(&s.execution_id).await.unwrap().is_none());
    }
}
