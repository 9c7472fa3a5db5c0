use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use orchestrator_core::{
    models::{BackupRecord, BackupType},
    traits::BackupRepository,
    OrchestratorError, OrchestratorResult,
};

const BACKUP_COLUMNS: &str =
    "id, backup_type, location, size_bytes, checksum, schema_version, created_at, deleted_at";

pub struct PostgresBackupRepository {
    pool: PgPool,
}

impl PostgresBackupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> OrchestratorResult<BackupRecord> {
        let backup_type: String = row.try_get("backup_type")?;
        let backup_type = BackupType::parse(&backup_type).ok_or_else(|| {
            OrchestratorError::database_error(format!("未知的备份类型: {backup_type}"))
        })?;

        Ok(BackupRecord {
            id: row.try_get("id")?,
            backup_type,
            location: row.try_get("location")?,
            size_bytes: row.try_get("size_bytes")?,
            checksum: row.try_get("checksum")?,
            schema_version: row.try_get("schema_version")?,
            created_at: row.try_get("created_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

#[async_trait]
impl BackupRepository for PostgresBackupRepository {
    async fn insert(&self, record: &BackupRecord) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO backups (id, backup_type, location, size_bytes, checksum,
                                 schema_version, created_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&record.id)
        .bind(record.backup_type.as_str())
        .bind(&record.location)
        .bind(record.size_bytes)
        .bind(&record.checksum)
        .bind(&record.schema_version)
        .bind(record.created_at)
        .bind(record.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> OrchestratorResult<Option<BackupRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backups WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, include_deleted: bool) -> OrchestratorResult<Vec<BackupRecord>> {
        let sql = if include_deleted {
            format!("SELECT {BACKUP_COLUMNS} FROM backups ORDER BY created_at DESC")
        } else {
            format!(
                "SELECT {BACKUP_COLUMNS} FROM backups \
                 WHERE deleted_at IS NULL ORDER BY created_at DESC"
            )
        };
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn latest_full(&self) -> OrchestratorResult<Option<BackupRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backups \
             WHERE backup_type = 'FULL' AND deleted_at IS NULL \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn latest_any(&self) -> OrchestratorResult<Option<BackupRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backups \
             WHERE deleted_at IS NULL ORDER BY created_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn tombstone(&self, id: &str, deleted_at: DateTime<Utc>) -> OrchestratorResult<()> {
        let result = sqlx::query("UPDATE backups SET deleted_at = $2 WHERE id = $1")
            .bind(id)
            .bind(deleted_at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::BackupNotFound { id: id.to_string() });
        }
        Ok(())
    }
}
