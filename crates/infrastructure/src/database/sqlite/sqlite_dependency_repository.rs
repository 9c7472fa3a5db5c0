use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use orchestrator_core::{
    models::{DependencyKind, TaskDependency},
    traits::DependencyRepository,
    OrchestratorError, OrchestratorResult,
};

pub struct SqliteDependencyRepository {
    pool: SqlitePool,
}

impl SqliteDependencyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_dependency(row: &sqlx::sqlite::SqliteRow) -> OrchestratorResult<TaskDependency> {
        let kind: String = row.try_get("kind")?;
        let kind = DependencyKind::parse(&kind).ok_or_else(|| {
            OrchestratorError::database_error(format!("未知的依赖类型: {kind}"))
        })?;

        Ok(TaskDependency {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            depends_on_task_id: row.try_get("depends_on_task_id")?,
            kind,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl DependencyRepository for SqliteDependencyRepository {
    async fn add(&self, dependency: &TaskDependency) -> OrchestratorResult<TaskDependency> {
        let row = sqlx::query(
            r#"
            INSERT INTO task_dependencies (task_id, depends_on_task_id, kind, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, task_id, depends_on_task_id, kind, created_at
            "#,
        )
        .bind(dependency.task_id)
        .bind(dependency.depends_on_task_id)
        .bind(dependency.kind.as_str())
        .bind(dependency.created_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_dependency(&row)
    }

    async fn list_for_task(&self, task_id: i64) -> OrchestratorResult<Vec<TaskDependency>> {
        let rows = sqlx::query(
            "SELECT id, task_id, depends_on_task_id, kind, created_at \
             FROM task_dependencies WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_dependency).collect()
    }

    async fn list_all(&self) -> OrchestratorResult<Vec<TaskDependency>> {
        let rows = sqlx::query(
            "SELECT id, task_id, depends_on_task_id, kind, created_at FROM task_dependencies",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_dependency).collect()
    }

    async fn get_changed_since(
        &self,
        since: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<TaskDependency>> {
        let rows = sqlx::query(
            "SELECT id, task_id, depends_on_task_id, kind, created_at \
             FROM task_dependencies WHERE created_at > $1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_dependency).collect()
    }

    async fn insert_snapshot(&self, dependency: &TaskDependency) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_dependencies (id, task_id, depends_on_task_id, kind, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(dependency.id)
        .bind(dependency.task_id)
        .bind(dependency.depends_on_task_id)
        .bind(dependency.kind.as_str())
        .bind(dependency.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_all(&self) -> OrchestratorResult<()> {
        sqlx::query("DELETE FROM task_dependencies")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
