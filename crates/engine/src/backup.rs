use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use orchestrator_core::{
    events::{EngineEvent, EventBus},
    models::{
        BackupRecord, BackupType, Task, TaskDependency, TaskHistoryEntry, Worker,
    },
    traits::{
        BackupRepository, DependencyRepository, HistoryRepository, TaskRepository,
        WorkerRepository,
    },
    OrchestratorError, OrchestratorResult,
};

/// 快照制品的结构版本
pub const SNAPSHOT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// 备份制品的落盘目录
    pub directory: PathBuf,
    /// 保留天数，超期的备份元数据做墓碑标记
    pub retention_days: i64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("backups"),
            retention_days: 30,
        }
    }
}

/// 落盘的快照制品内容
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotArtifact {
    schema_version: String,
    backup_type: BackupType,
    /// 增量/差异快照的基线备份ID
    base_backup_id: Option<String>,
    /// 本快照覆盖的变更起点
    since: Option<DateTime<Utc>>,
    tasks: Vec<Task>,
    workers: Vec<Worker>,
    dependencies: Vec<TaskDependency>,
    history: Vec<TaskHistoryEntry>,
}

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub backup_id: String,
    pub applied_backups: usize,
    pub restored_tasks: usize,
    pub restored_workers: usize,
    pub restored_dependencies: usize,
    pub restored_history: usize,
    pub safety_backup_id: Option<String>,
}

/// 备份管理器：产出全量/增量/差异快照，校验完整性后执行恢复。
/// 制品写入外部文件系统，引擎只记录元数据（位置、校验和、大小）。
pub struct BackupManager {
    task_repo: Arc<dyn TaskRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    dependency_repo: Arc<dyn DependencyRepository>,
    history_repo: Arc<dyn HistoryRepository>,
    backup_repo: Arc<dyn BackupRepository>,
    event_bus: EventBus,
    config: BackupConfig,
}

impl BackupManager {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        dependency_repo: Arc<dyn DependencyRepository>,
        history_repo: Arc<dyn HistoryRepository>,
        backup_repo: Arc<dyn BackupRepository>,
        event_bus: EventBus,
        config: Option<BackupConfig>,
    ) -> Self {
        Self {
            task_repo,
            worker_repo,
            dependency_repo,
            history_repo,
            backup_repo,
            event_bus,
            config: config.unwrap_or_default(),
        }
    }

    /// 创建一次备份。没有可用基线时，增量/差异自动退化为全量。
    pub async fn create_backup(
        &self,
        backup_type: BackupType,
    ) -> OrchestratorResult<BackupRecord> {
        let (effective_type, base) = match backup_type {
            BackupType::Full => (BackupType::Full, None),
            BackupType::Incremental => match self.backup_repo.latest_any().await? {
                Some(base) => (BackupType::Incremental, Some(base)),
                None => {
                    warn!("没有可用的基线备份，增量备份退化为全量备份");
                    (BackupType::Full, None)
                }
            },
            BackupType::Differential => match self.backup_repo.latest_full().await? {
                Some(base) => (BackupType::Differential, Some(base)),
                None => {
                    warn!("没有可用的全量备份，差异备份退化为全量备份");
                    (BackupType::Full, None)
                }
            },
        };

        let since = base
            .as_ref()
            .map(|b| b.created_at)
            .unwrap_or(DateTime::UNIX_EPOCH);

        let artifact = SnapshotArtifact {
            schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
            backup_type: effective_type,
            base_backup_id: base.as_ref().map(|b| b.id.clone()),
            since: base.as_ref().map(|b| b.created_at),
            tasks: self.task_repo.get_changed_since(since).await?,
            workers: self.worker_repo.get_changed_since(since).await?,
            dependencies: self.dependency_repo.get_changed_since(since).await?,
            history: self.history_repo.get_changed_since(since).await?,
        };

        let bytes = serde_json::to_vec(&artifact)?;
        let checksum = sha256_hex(&bytes);

        let backup_id = Uuid::new_v4().to_string();
        let file_path = self.config.directory.join(format!("{backup_id}.json"));

        tokio::fs::create_dir_all(&self.config.directory)
            .await
            .map_err(|e| {
                OrchestratorError::Internal(format!("创建备份目录失败: {e}"))
            })?;
        tokio::fs::write(&file_path, &bytes).await.map_err(|e| {
            OrchestratorError::Internal(format!("写入备份制品失败: {e}"))
        })?;

        let record = BackupRecord {
            id: backup_id.clone(),
            backup_type: effective_type,
            location: file_path.to_string_lossy().to_string(),
            size_bytes: bytes.len() as i64,
            checksum,
            schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.backup_repo.insert(&record).await?;

        self.event_bus.publish(EngineEvent::BackupCreated {
            id: Uuid::new_v4(),
            backup_id: backup_id.clone(),
            occurred_at: Utc::now(),
        });

        info!(
            "备份完成: {} ({}), {} 任务 / {} Worker / {} 依赖 / {} 历史, {} 字节",
            record.id,
            record.backup_type.as_str(),
            artifact.tasks.len(),
            artifact.workers.len(),
            artifact.dependencies.len(),
            artifact.history.len(),
            record.size_bytes
        );
        Ok(record)
    }

    /// 从备份恢复。校验和不匹配或版本不匹配都会中止，
    /// 绝不带着可能损坏的数据继续。
    pub async fn restore_backup(
        &self,
        backup_id: &str,
        take_safety_snapshot: bool,
    ) -> OrchestratorResult<RestoreReport> {
        let record = self
            .backup_repo
            .get_by_id(backup_id)
            .await?
            .ok_or_else(|| OrchestratorError::BackupNotFound {
                id: backup_id.to_string(),
            })?;

        if record.is_deleted() {
            warn!("备份 {} 已被墓碑标记，仍尝试从制品恢复", backup_id);
        }

        // 先沿基线链校验全部制品，任何一环损坏都在写入前中止
        let chain = self.load_verified_chain(&record).await?;

        let safety_backup_id = if take_safety_snapshot {
            info!("恢复前创建安全快照");
            Some(self.create_backup(BackupType::Full).await?.id)
        } else {
            None
        };

        // 清空顺序与外键方向一致
        self.history_repo.clear_all().await?;
        self.dependency_repo.clear_all().await?;
        self.task_repo.clear_all().await?;
        self.worker_repo.clear_all().await?;

        let mut report = RestoreReport {
            backup_id: backup_id.to_string(),
            applied_backups: chain.len(),
            restored_tasks: 0,
            restored_workers: 0,
            restored_dependencies: 0,
            restored_history: 0,
            safety_backup_id,
        };

        for (index, artifact) in chain.iter().enumerate() {
            self.apply_artifact(artifact, index == 0, &mut report).await?;
        }

        // 恢复后的存储必须可查询
        self.task_repo
            .count_by_status(orchestrator_core::models::TaskStatus::Pending)
            .await?;

        self.event_bus.publish(EngineEvent::BackupRestored {
            id: Uuid::new_v4(),
            backup_id: backup_id.to_string(),
            occurred_at: Utc::now(),
        });

        info!(
            "恢复完成: 备份 {}（链长 {}），任务 {} / Worker {} / 依赖 {} / 历史 {}",
            backup_id,
            report.applied_backups,
            report.restored_tasks,
            report.restored_workers,
            report.restored_dependencies,
            report.restored_history
        );
        Ok(report)
    }

    /// 校验单个制品并反序列化
    async fn load_verified_artifact(
        &self,
        record: &BackupRecord,
    ) -> OrchestratorResult<SnapshotArtifact> {
        let bytes = tokio::fs::read(&record.location).await.map_err(|e| {
            OrchestratorError::BackupIntegrity(format!(
                "读取备份制品 {} 失败: {e}",
                record.location
            ))
        })?;

        let checksum = sha256_hex(&bytes);
        if checksum != record.checksum {
            return Err(OrchestratorError::BackupIntegrity(format!(
                "备份 {} 校验和不匹配: 期望 {}，实际 {}",
                record.id, record.checksum, checksum
            )));
        }

        let artifact: SnapshotArtifact = serde_json::from_slice(&bytes)?;
        if artifact.schema_version != record.schema_version {
            return Err(OrchestratorError::BackupIntegrity(format!(
                "备份 {} 结构版本不匹配: 元数据 {}，制品 {}",
                record.id, record.schema_version, artifact.schema_version
            )));
        }

        Ok(artifact)
    }

    /// 从目标备份沿基线链回溯到全量备份，按时间正序返回已校验的制品
    async fn load_verified_chain(
        &self,
        record: &BackupRecord,
    ) -> OrchestratorResult<Vec<SnapshotArtifact>> {
        let mut chain = Vec::new();
        let mut current = self.load_verified_artifact(record).await?;

        while let Some(base_id) = current.base_backup_id.clone() {
            let base_record = self
                .backup_repo
                .get_by_id(&base_id)
                .await?
                .ok_or_else(|| {
                    OrchestratorError::BackupIntegrity(format!(
                        "基线备份 {base_id} 的元数据缺失"
                    ))
                })?;
            chain.push(current);
            current = self.load_verified_artifact(&base_record).await?;
        }
        chain.push(current);
        chain.reverse();
        Ok(chain)
    }

    /// 应用一个制品。首个制品（全量基线）走整行插入；
    /// 后续覆盖层对任务做有则更新无则插入，对Worker做替换。
    async fn apply_artifact(
        &self,
        artifact: &SnapshotArtifact,
        is_base: bool,
        report: &mut RestoreReport,
    ) -> OrchestratorResult<()> {
        for worker in &artifact.workers {
            if !is_base {
                match self.worker_repo.unregister(&worker.id).await {
                    Ok(()) | Err(OrchestratorError::WorkerNotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            self.worker_repo.insert_snapshot(worker).await?;
            report.restored_workers += 1;
        }

        for task in &artifact.tasks {
            if is_base {
                self.task_repo.insert_snapshot(task).await?;
            } else {
                match self.task_repo.update(task).await {
                    Ok(()) => {}
                    Err(OrchestratorError::TaskNotFound { .. }) => {
                        self.task_repo.insert_snapshot(task).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
            report.restored_tasks += 1;
        }

        for dependency in &artifact.dependencies {
            self.dependency_repo.insert_snapshot(dependency).await?;
            report.restored_dependencies += 1;
        }

        for entry in &artifact.history {
            self.history_repo.insert_snapshot(entry).await?;
            report.restored_history += 1;
        }

        debug!(
            "应用制品完成: {} 任务 / {} Worker",
            artifact.tasks.len(),
            artifact.workers.len()
        );
        Ok(())
    }

    /// 保留策略清理：超期备份只做墓碑标记，返回标记数量
    pub async fn cleanup_expired(&self) -> OrchestratorResult<u64> {
        let cutoff = Utc::now() - Duration::days(self.config.retention_days);
        let records = self.backup_repo.list(false).await?;
        let mut tombstoned = 0;

        for record in records {
            if record.created_at < cutoff {
                self.backup_repo.tombstone(&record.id, Utc::now()).await?;
                info!("备份 {} 超过保留期，已做墓碑标记", record.id);
                tombstoned += 1;
            }
        }
        Ok(tombstoned)
    }

    pub async fn list_backups(
        &self,
        include_deleted: bool,
    ) -> OrchestratorResult<Vec<BackupRecord>> {
        self.backup_repo.list(include_deleted).await
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
