use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use orchestrator_core::{
    models::{HistoryEvent, TaskHistoryEntry},
    traits::HistoryRepository,
    OrchestratorError, OrchestratorResult,
};

pub struct SqliteHistoryRepository {
    pool: SqlitePool,
}

impl SqliteHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> OrchestratorResult<TaskHistoryEntry> {
        let event: String = row.try_get("event")?;
        let event = HistoryEvent::parse(&event).ok_or_else(|| {
            OrchestratorError::database_error(format!("未知的历史事件类型: {event}"))
        })?;

        Ok(TaskHistoryEntry {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            event,
            worker_id: row.try_get("worker_id")?,
            details: row.try_get("details")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl HistoryRepository for SqliteHistoryRepository {
    async fn append(&self, entry: &TaskHistoryEntry) -> OrchestratorResult<TaskHistoryEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO task_history (task_id, event, worker_id, details, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, task_id, event, worker_id, details, created_at
            "#,
        )
        .bind(entry.task_id)
        .bind(entry.event.as_str())
        .bind(&entry.worker_id)
        .bind(&entry.details)
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_entry(&row)
    }

    async fn list_for_task(&self, task_id: i64) -> OrchestratorResult<Vec<TaskHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, task_id, event, worker_id, details, created_at \
             FROM task_history WHERE task_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn get_changed_since(
        &self,
        since: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<TaskHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, task_id, event, worker_id, details, created_at \
             FROM task_history WHERE created_at > $1 ORDER BY id ASC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn insert_snapshot(&self, entry: &TaskHistoryEntry) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_history (id, task_id, event, worker_id, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.task_id)
        .bind(entry.event.as_str())
        .bind(&entry.worker_id)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_all(&self) -> OrchestratorResult<()> {
        sqlx::query("DELETE FROM task_history")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
