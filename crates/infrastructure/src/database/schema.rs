//! 数据库表结构初始化
//!
//! 两种后端各自维护一份DDL；语句均为幂等的 CREATE ... IF NOT EXISTS。

use orchestrator_core::OrchestratorResult;
use sqlx::{PgPool, SqlitePool};

const SQLITE_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'PENDING',
        priority INTEGER NOT NULL DEFAULT 0,
        payload TEXT NOT NULL DEFAULT '{}',
        result TEXT,
        error TEXT,
        assigned_worker TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 0,
        timeout_seconds INTEGER NOT NULL DEFAULT 300,
        assigned_at DATETIME,
        started_at DATETIME,
        completed_at DATETIME,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tasks_status_priority
        ON tasks (status, priority DESC, created_at ASC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'ONLINE',
        capabilities TEXT NOT NULL DEFAULT '[]',
        current_task INTEGER,
        max_concurrent_tasks INTEGER NOT NULL DEFAULT 1,
        resources TEXT NOT NULL DEFAULT '{}',
        last_heartbeat DATETIME NOT NULL,
        registered_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_dependencies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL,
        depends_on_task_id INTEGER NOT NULL,
        kind TEXT NOT NULL DEFAULT 'MUST_SUCCEED',
        created_at DATETIME NOT NULL,
        UNIQUE (task_id, depends_on_task_id),
        FOREIGN KEY (task_id) REFERENCES tasks(id),
        FOREIGN KEY (depends_on_task_id) REFERENCES tasks(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL,
        event TEXT NOT NULL,
        worker_id TEXT,
        details TEXT NOT NULL DEFAULT '{}',
        created_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_task_history_task_id
        ON task_history (task_id, created_at ASC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orchestrator_state (
        instance_id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        pending_tasks INTEGER NOT NULL DEFAULT 0,
        assigned_tasks INTEGER NOT NULL DEFAULT 0,
        running_tasks INTEGER NOT NULL DEFAULT 0,
        completed_tasks INTEGER NOT NULL DEFAULT 0,
        failed_tasks INTEGER NOT NULL DEFAULT 0,
        active_workers INTEGER NOT NULL DEFAULT 0,
        config_snapshot TEXT NOT NULL DEFAULT '{}',
        schema_version TEXT NOT NULL,
        updated_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS backups (
        id TEXT PRIMARY KEY,
        backup_type TEXT NOT NULL,
        location TEXT NOT NULL,
        size_bytes INTEGER NOT NULL DEFAULT 0,
        checksum TEXT NOT NULL,
        schema_version TEXT NOT NULL,
        created_at DATETIME NOT NULL,
        deleted_at DATETIME
    )
    "#,
];

const POSTGRES_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id BIGSERIAL PRIMARY KEY,
        task_type VARCHAR(255) NOT NULL,
        status VARCHAR(32) NOT NULL DEFAULT 'PENDING',
        priority INTEGER NOT NULL DEFAULT 0,
        payload JSONB NOT NULL DEFAULT '{}',
        result JSONB,
        error JSONB,
        assigned_worker VARCHAR(255),
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 0,
        timeout_seconds INTEGER NOT NULL DEFAULT 300,
        assigned_at TIMESTAMPTZ,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tasks_status_priority
        ON tasks (status, priority DESC, created_at ASC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workers (
        id VARCHAR(255) PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE,
        kind VARCHAR(64) NOT NULL,
        status VARCHAR(32) NOT NULL DEFAULT 'ONLINE',
        capabilities TEXT[] NOT NULL DEFAULT '{}',
        current_task BIGINT,
        max_concurrent_tasks INTEGER NOT NULL DEFAULT 1,
        resources JSONB NOT NULL DEFAULT '{}',
        last_heartbeat TIMESTAMPTZ NOT NULL,
        registered_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_dependencies (
        id BIGSERIAL PRIMARY KEY,
        task_id BIGINT NOT NULL REFERENCES tasks(id),
        depends_on_task_id BIGINT NOT NULL REFERENCES tasks(id),
        kind VARCHAR(32) NOT NULL DEFAULT 'MUST_SUCCEED',
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (task_id, depends_on_task_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_history (
        id BIGSERIAL PRIMARY KEY,
        task_id BIGINT NOT NULL,
        event VARCHAR(32) NOT NULL,
        worker_id VARCHAR(255),
        details JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_task_history_task_id
        ON task_history (task_id, created_at ASC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orchestrator_state (
        instance_id VARCHAR(255) PRIMARY KEY,
        status VARCHAR(32) NOT NULL,
        pending_tasks BIGINT NOT NULL DEFAULT 0,
        assigned_tasks BIGINT NOT NULL DEFAULT 0,
        running_tasks BIGINT NOT NULL DEFAULT 0,
        completed_tasks BIGINT NOT NULL DEFAULT 0,
        failed_tasks BIGINT NOT NULL DEFAULT 0,
        active_workers BIGINT NOT NULL DEFAULT 0,
        config_snapshot JSONB NOT NULL DEFAULT '{}',
        schema_version VARCHAR(16) NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS backups (
        id VARCHAR(64) PRIMARY KEY,
        backup_type VARCHAR(32) NOT NULL,
        location TEXT NOT NULL,
        size_bytes BIGINT NOT NULL DEFAULT 0,
        checksum VARCHAR(64) NOT NULL,
        schema_version VARCHAR(16) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        deleted_at TIMESTAMPTZ
    )
    "#,
];

pub async fn init_sqlite_schema(pool: &SqlitePool) -> OrchestratorResult<()> {
    for ddl in SQLITE_DDL {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

pub async fn init_postgres_schema(pool: &PgPool) -> OrchestratorResult<()> {
    for ddl in POSTGRES_DDL {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_schema_is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_sqlite_schema(&pool).await.unwrap();
        // 二次执行不应报错
        init_sqlite_schema(&pool).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
