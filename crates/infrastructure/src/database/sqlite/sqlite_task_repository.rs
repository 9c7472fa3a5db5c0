use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use orchestrator_core::{
    models::{Task, TaskError, TaskFilter, TaskStatus},
    traits::TaskRepository,
    OrchestratorError, OrchestratorResult,
};

const TASK_COLUMNS: &str = "id, task_type, status, priority, payload, result, error, \
     assigned_worker, retry_count, max_retries, timeout_seconds, \
     assigned_at, started_at, completed_at, created_at, updated_at";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> OrchestratorResult<Task> {
        let error: Option<serde_json::Value> = row.try_get("error")?;
        let error: Option<TaskError> = match error {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };

        Ok(Task {
            id: row.try_get("id")?,
            task_type: row.try_get("task_type")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            payload: row.try_get("payload")?,
            result: row.try_get("result")?,
            error,
            assigned_worker: row.try_get("assigned_worker")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            timeout_seconds: row.try_get("timeout_seconds")?,
            assigned_at: row.try_get("assigned_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn error_to_json(error: &Option<TaskError>) -> OrchestratorResult<Option<serde_json::Value>> {
        error
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(Into::into)
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task_type = %task.task_type))]
    async fn create(&self, task: &Task) -> OrchestratorResult<Task> {
        let error_json = Self::error_to_json(&task.error)?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO tasks (task_type, status, priority, payload, result, error,
                               assigned_worker, retry_count, max_retries, timeout_seconds,
                               assigned_at, started_at, completed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(&task.task_type)
        .bind(task.status)
        .bind(task.priority)
        .bind(&task.payload)
        .bind(&task.result)
        .bind(error_json)
        .bind(&task.assigned_worker)
        .bind(task.retry_count)
        .bind(task.max_retries)
        .bind(task.timeout_seconds)
        .bind(task.assigned_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_task(&row)?;
        debug!("创建任务成功: {}", created.entity_description());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, task: &Task) -> OrchestratorResult<()> {
        let error_json = Self::error_to_json(&task.error)?;

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET task_type = $2, status = $3, priority = $4, payload = $5, result = $6,
                error = $7, assigned_worker = $8, retry_count = $9, max_retries = $10,
                timeout_seconds = $11, assigned_at = $12, started_at = $13,
                completed_at = $14, updated_at = $15
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(&task.task_type)
        .bind(task.status)
        .bind(task.priority)
        .bind(&task.payload)
        .bind(&task.result)
        .bind(error_json)
        .bind(&task.assigned_worker)
        .bind(task.retry_count)
        .bind(task.max_retries)
        .bind(task.timeout_seconds)
        .bind(task.assigned_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::TaskNotFound { id: task.id });
        }
        Ok(())
    }

    async fn list(&self, filter: &TaskFilter) -> OrchestratorResult<Vec<Task>> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1");
        let mut index = 0;

        if filter.status.is_some() {
            index += 1;
            sql.push_str(&format!(" AND status = ${index}"));
        }
        if filter.task_type.is_some() {
            index += 1;
            sql.push_str(&format!(" AND task_type = ${index}"));
        }
        if filter.assigned_worker.is_some() {
            index += 1;
            sql.push_str(&format!(" AND assigned_worker = ${index}"));
        }
        sql.push_str(" ORDER BY created_at DESC");
        if filter.limit.is_some() {
            index += 1;
            sql.push_str(&format!(" LIMIT ${index}"));
        }
        if filter.offset.is_some() {
            index += 1;
            sql.push_str(&format!(" OFFSET ${index}"));
        }

        let mut query = sqlx::query(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(task_type) = &filter.task_type {
            query = query.bind(task_type);
        }
        if let Some(worker) = &filter.assigned_worker {
            query = query.bind(worker);
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit);
        }
        if let Some(offset) = filter.offset {
            query = query.bind(offset);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self), fields(task_id = %task_id, worker_id = %worker_id))]
    async fn try_assign(&self, task_id: i64, worker_id: &str) -> OrchestratorResult<bool> {
        let now = Utc::now();
        // 条件更新保证并发分配时至多一个赢家
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'ASSIGNED', assigned_worker = $2, assigned_at = $3, updated_at = $3
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_ready_candidates(
        &self,
        capabilities: &[String],
        limit: i64,
    ) -> OrchestratorResult<Vec<Task>> {
        if capabilities.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: Vec<String> = (1..=capabilities.len())
            .map(|i| format!("${i}"))
            .collect();
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status = 'PENDING' AND task_type IN ({}) \
             ORDER BY priority DESC, created_at ASC LIMIT ${}",
            placeholders.join(", "),
            capabilities.len() + 1
        );

        let mut query = sqlx::query(&sql);
        for capability in capabilities {
            query = query.bind(capability);
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn get_stale(
        &self,
        status: TaskStatus,
        cutoff: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<Task>> {
        let age_column = match status {
            TaskStatus::Assigned => "assigned_at",
            TaskStatus::Running => "started_at",
            _ => {
                return Err(OrchestratorError::validation_error(format!(
                    "状态 {} 不支持滞留查询",
                    status.as_str()
                )))
            }
        };

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status = $1 AND {age_column} IS NOT NULL AND {age_column} < $2"
        );
        let rows = sqlx::query(&sql)
            .bind(status)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn get_by_status(&self, status: TaskStatus) -> OrchestratorResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn reset_to_pending(
        &self,
        id: i64,
        expected: TaskStatus,
        clear_started: bool,
    ) -> OrchestratorResult<bool> {
        let now = Utc::now();
        // 状态检查与更新在同一条语句内，避免与正在启动的任务竞争
        let sql = if clear_started {
            r#"
            UPDATE tasks
            SET status = 'PENDING', assigned_worker = NULL, assigned_at = NULL,
                started_at = NULL, result = NULL, updated_at = $3
            WHERE id = $1 AND status = $2
            "#
        } else {
            r#"
            UPDATE tasks
            SET status = 'PENDING', assigned_worker = NULL, assigned_at = NULL, updated_at = $3
            WHERE id = $1 AND status = $2
            "#
        };

        let result = sqlx::query(sql)
            .bind(id)
            .bind(expected)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn retry_from_timeout(&self, id: i64) -> OrchestratorResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'PENDING', retry_count = retry_count + 1,
                assigned_worker = NULL, assigned_at = NULL, started_at = NULL,
                result = NULL, updated_at = $2
            WHERE id = $1 AND status = 'TIMEOUT' AND retry_count < max_retries
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_timeout(&self, id: i64) -> OrchestratorResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE tasks SET status = 'TIMEOUT', updated_at = $2 \
             WHERE id = $1 AND status = 'RUNNING'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_with_error(
        &self,
        id: i64,
        expected: TaskStatus,
        error: &TaskError,
    ) -> OrchestratorResult<bool> {
        let now = Utc::now();
        let error_json = serde_json::to_value(error)?;
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'FAILED', error = $3, assigned_worker = NULL,
                completed_at = $4, updated_at = $4
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(error_json)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_by_status(&self, status: TaskStatus) -> OrchestratorResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM tasks WHERE status = $1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    async fn get_changed_since(&self, since: DateTime<Utc>) -> OrchestratorResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE updated_at > $1 ORDER BY id ASC"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn insert_snapshot(&self, task: &Task) -> OrchestratorResult<()> {
        let error_json = Self::error_to_json(&task.error)?;
        sqlx::query(
            r#"
            INSERT INTO tasks (id, task_type, status, priority, payload, result, error,
                               assigned_worker, retry_count, max_retries, timeout_seconds,
                               assigned_at, started_at, completed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(task.id)
        .bind(&task.task_type)
        .bind(task.status)
        .bind(task.priority)
        .bind(&task.payload)
        .bind(&task.result)
        .bind(error_json)
        .bind(&task.assigned_worker)
        .bind(task.retry_count)
        .bind(task.max_retries)
        .bind(task.timeout_seconds)
        .bind(task.assigned_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_all(&self) -> OrchestratorResult<()> {
        sqlx::query("DELETE FROM tasks").execute(&self.pool).await?;
        Ok(())
    }
}
