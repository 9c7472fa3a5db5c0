use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use orchestrator_core::{
    models::{OrchestratorState, OrchestratorStatus},
    traits::StateRepository,
    OrchestratorError, OrchestratorResult,
};

pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_state(row: &sqlx::sqlite::SqliteRow) -> OrchestratorResult<OrchestratorState> {
        let status: String = row.try_get("status")?;
        let status = OrchestratorStatus::parse(&status).ok_or_else(|| {
            OrchestratorError::database_error(format!("未知的编排器状态: {status}"))
        })?;

        Ok(OrchestratorState {
            instance_id: row.try_get("instance_id")?,
            status,
            pending_tasks: row.try_get("pending_tasks")?,
            assigned_tasks: row.try_get("assigned_tasks")?,
            running_tasks: row.try_get("running_tasks")?,
            completed_tasks: row.try_get("completed_tasks")?,
            failed_tasks: row.try_get("failed_tasks")?,
            active_workers: row.try_get("active_workers")?,
            config_snapshot: row.try_get("config_snapshot")?,
            schema_version: row.try_get("schema_version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl StateRepository for SqliteStateRepository {
    async fn load(&self, instance_id: &str) -> OrchestratorResult<Option<OrchestratorState>> {
        let row = sqlx::query(
            "SELECT instance_id, status, pending_tasks, assigned_tasks, running_tasks, \
                    completed_tasks, failed_tasks, active_workers, config_snapshot, \
                    schema_version, updated_at \
             FROM orchestrator_state WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_state(&row)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, state: &OrchestratorState) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orchestrator_state
                (instance_id, status, pending_tasks, assigned_tasks, running_tasks,
                 completed_tasks, failed_tasks, active_workers, config_snapshot,
                 schema_version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (instance_id) DO UPDATE SET
                status = excluded.status,
                pending_tasks = excluded.pending_tasks,
                assigned_tasks = excluded.assigned_tasks,
                running_tasks = excluded.running_tasks,
                completed_tasks = excluded.completed_tasks,
                failed_tasks = excluded.failed_tasks,
                active_workers = excluded.active_workers,
                config_snapshot = excluded.config_snapshot,
                schema_version = excluded.schema_version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.instance_id)
        .bind(state.status.as_str())
        .bind(state.pending_tasks)
        .bind(state.assigned_tasks)
        .bind(state.running_tasks)
        .bind(state.completed_tasks)
        .bind(state.failed_tasks)
        .bind(state.active_workers)
        .bind(&state.config_snapshot)
        .bind(&state.schema_version)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
