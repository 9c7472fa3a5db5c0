use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use orchestrator_core::{
    models::{Worker, WorkerStatus},
    traits::WorkerRepository,
    OrchestratorError, OrchestratorResult,
};

const WORKER_COLUMNS: &str = "id, name, kind, status, capabilities, current_task, \
     max_concurrent_tasks, resources, last_heartbeat, registered_at";

const PG_UNIQUE_VIOLATION: &str = "23505";

pub struct PostgresWorkerRepository {
    pool: PgPool,
}

impl PostgresWorkerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_worker(row: &sqlx::postgres::PgRow) -> OrchestratorResult<Worker> {
        let capabilities: Vec<String> = row
            .try_get::<Vec<String>, _>("capabilities")
            .unwrap_or_default();

        Ok(Worker {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            capabilities,
            current_task: row.try_get("current_task")?,
            max_concurrent_tasks: row.try_get("max_concurrent_tasks")?,
            resources: row.try_get("resources")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            registered_at: row.try_get("registered_at")?,
        })
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err
                .code()
                .map(|code| code.as_ref() == PG_UNIQUE_VIOLATION)
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[async_trait]
impl WorkerRepository for PostgresWorkerRepository {
    #[instrument(skip(self, worker), fields(worker_id = %worker.id, name = %worker.name))]
    async fn register(&self, worker: &Worker) -> OrchestratorResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO workers (id, name, kind, status, capabilities, current_task,
                                 max_concurrent_tasks, resources, last_heartbeat, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&worker.id)
        .bind(&worker.name)
        .bind(&worker.kind)
        .bind(worker.status)
        .bind(&worker.capabilities)
        .bind(worker.current_task)
        .bind(worker.max_concurrent_tasks)
        .bind(&worker.resources)
        .bind(worker.last_heartbeat)
        .bind(worker.registered_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("注册Worker成功: {}", worker.entity_description());
                Ok(())
            }
            Err(e) if Self::is_unique_violation(&e) => {
                Err(OrchestratorError::WorkerAlreadyRegistered {
                    name: worker.name.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn unregister(&self, worker_id: &str) -> OrchestratorResult<()> {
        let result = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::worker_not_found(worker_id));
        }
        Ok(())
    }

    async fn get_by_id(&self, worker_id: &str) -> OrchestratorResult<Option<Worker>> {
        let row = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers WHERE id = $1"
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_worker(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_by_name(&self, name: &str) -> OrchestratorResult<Option<Worker>> {
        let row = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_worker(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> OrchestratorResult<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers ORDER BY registered_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_worker).collect()
    }

    async fn update_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
    ) -> OrchestratorResult<()> {
        let result = sqlx::query("UPDATE workers SET status = $2 WHERE id = $1")
            .bind(worker_id)
            .bind(status)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::worker_not_found(worker_id));
        }
        Ok(())
    }

    async fn update_heartbeat(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        timestamp: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        let result =
            sqlx::query("UPDATE workers SET status = $2, last_heartbeat = $3 WHERE id = $1")
                .bind(worker_id)
                .bind(status)
                .bind(timestamp)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::worker_not_found(worker_id));
        }
        Ok(())
    }

    async fn set_current_task(
        &self,
        worker_id: &str,
        task_id: Option<i64>,
    ) -> OrchestratorResult<()> {
        let result = sqlx::query("UPDATE workers SET current_task = $2 WHERE id = $1")
            .bind(worker_id)
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::worker_not_found(worker_id));
        }
        Ok(())
    }

    async fn get_active_since(&self, cutoff: DateTime<Utc>) -> OrchestratorResult<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers \
             WHERE status = 'ONLINE' AND last_heartbeat >= $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_worker).collect()
    }

    async fn get_changed_since(&self, since: DateTime<Utc>) -> OrchestratorResult<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers \
             WHERE last_heartbeat > $1 OR registered_at > $1"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_worker).collect()
    }

    async fn insert_snapshot(&self, worker: &Worker) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, name, kind, status, capabilities, current_task,
                                 max_concurrent_tasks, resources, last_heartbeat, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&worker.id)
        .bind(&worker.name)
        .bind(&worker.kind)
        .bind(worker.status)
        .bind(&worker.capabilities)
        .bind(worker.current_task)
        .bind(worker.max_concurrent_tasks)
        .bind(&worker.resources)
        .bind(worker.last_heartbeat)
        .bind(worker.registered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_all(&self) -> OrchestratorResult<()> {
        sqlx::query("DELETE FROM workers")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
