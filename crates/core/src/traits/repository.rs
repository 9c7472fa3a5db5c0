use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::OrchestratorResult;
use crate::models::{
    BackupRecord, OrchestratorState, Task, TaskDependency, TaskError, TaskFilter,
    TaskHistoryEntry, TaskStatus, Worker, WorkerStatus,
};

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> OrchestratorResult<Task>;
    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<Task>>;
    async fn update(&self, task: &Task) -> OrchestratorResult<()>;
    async fn list(&self, filter: &TaskFilter) -> OrchestratorResult<Vec<Task>>;

    /// 条件分配：仅当任务当前为PENDING时写入Worker并置为ASSIGNED。
    /// 返回false表示竞争失败（任务已不在PENDING状态）。
    async fn try_assign(&self, task_id: i64, worker_id: &str) -> OrchestratorResult<bool>;

    /// 按优先级降序、创建时间升序取出能力匹配的PENDING任务候选集
    async fn get_ready_candidates(
        &self,
        capabilities: &[String],
        limit: i64,
    ) -> OrchestratorResult<Vec<Task>>;

    /// 指定状态下滞留时间早于cutoff的任务。
    /// ASSIGNED按assigned_at判断，RUNNING按started_at判断。
    async fn get_stale(
        &self,
        status: TaskStatus,
        cutoff: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<Task>>;

    async fn get_by_status(&self, status: TaskStatus) -> OrchestratorResult<Vec<Task>>;

    /// 受保护的回退：仅当任务仍处于expected状态时重置为PENDING，
    /// 清空Worker与分配时间；clear_started同时清空开始时间与部分结果。
    /// 返回false表示状态已被并发修改，本次不做任何变更。
    async fn reset_to_pending(
        &self,
        id: i64,
        expected: TaskStatus,
        clear_started: bool,
    ) -> OrchestratorResult<bool>;

    /// 受保护的重试：仅当任务处于TIMEOUT且retry_count < max_retries时
    /// 自增retry_count并重置为PENDING。返回false表示条件不满足。
    async fn retry_from_timeout(&self, id: i64) -> OrchestratorResult<bool>;

    /// 受保护的超时标记：仅当任务仍处于RUNNING时置为TIMEOUT
    async fn mark_timeout(&self, id: i64) -> OrchestratorResult<bool>;

    /// 受保护的终态失败：仅当任务仍处于expected状态时写入错误并置为FAILED
    async fn fail_with_error(
        &self,
        id: i64,
        expected: TaskStatus,
        error: &TaskError,
    ) -> OrchestratorResult<bool>;

    async fn count_by_status(&self, status: TaskStatus) -> OrchestratorResult<i64>;

    /// updated_at晚于since的任务（增量/差异备份用）
    async fn get_changed_since(&self, since: DateTime<Utc>) -> OrchestratorResult<Vec<Task>>;

    /// 恢复专用：保留原始ID的整行插入
    async fn insert_snapshot(&self, task: &Task) -> OrchestratorResult<()>;

    /// 恢复专用：清空任务表
    async fn clear_all(&self) -> OrchestratorResult<()>;
}

/// Worker仓储接口
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn register(&self, worker: &Worker) -> OrchestratorResult<()>;
    async fn unregister(&self, worker_id: &str) -> OrchestratorResult<()>;
    async fn get_by_id(&self, worker_id: &str) -> OrchestratorResult<Option<Worker>>;
    async fn get_by_name(&self, name: &str) -> OrchestratorResult<Option<Worker>>;
    async fn list(&self) -> OrchestratorResult<Vec<Worker>>;
    async fn update_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
    ) -> OrchestratorResult<()>;
    async fn update_heartbeat(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        timestamp: DateTime<Utc>,
    ) -> OrchestratorResult<()>;
    async fn set_current_task(
        &self,
        worker_id: &str,
        task_id: Option<i64>,
    ) -> OrchestratorResult<()>;

    /// 心跳不早于cutoff且状态为在线的Worker
    async fn get_active_since(&self, cutoff: DateTime<Utc>) -> OrchestratorResult<Vec<Worker>>;

    async fn get_changed_since(&self, since: DateTime<Utc>) -> OrchestratorResult<Vec<Worker>>;
    async fn insert_snapshot(&self, worker: &Worker) -> OrchestratorResult<()>;
    async fn clear_all(&self) -> OrchestratorResult<()>;
}

/// 任务依赖仓储接口
#[async_trait]
pub trait DependencyRepository: Send + Sync {
    async fn add(&self, dependency: &TaskDependency) -> OrchestratorResult<TaskDependency>;
    async fn list_for_task(&self, task_id: i64) -> OrchestratorResult<Vec<TaskDependency>>;
    async fn list_all(&self) -> OrchestratorResult<Vec<TaskDependency>>;
    async fn get_changed_since(
        &self,
        since: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<TaskDependency>>;
    async fn insert_snapshot(&self, dependency: &TaskDependency) -> OrchestratorResult<()>;
    async fn clear_all(&self) -> OrchestratorResult<()>;
}

/// 任务历史仓储接口（只追加）
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn append(&self, entry: &TaskHistoryEntry) -> OrchestratorResult<TaskHistoryEntry>;
    async fn list_for_task(&self, task_id: i64) -> OrchestratorResult<Vec<TaskHistoryEntry>>;
    async fn get_changed_since(
        &self,
        since: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<TaskHistoryEntry>>;
    async fn insert_snapshot(&self, entry: &TaskHistoryEntry) -> OrchestratorResult<()>;
    async fn clear_all(&self) -> OrchestratorResult<()>;
}

/// 编排器状态仓储接口
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn load(&self, instance_id: &str) -> OrchestratorResult<Option<OrchestratorState>>;
    /// UPSERT整体替换该实例的快照
    async fn save(&self, state: &OrchestratorState) -> OrchestratorResult<()>;
}

/// 备份元数据仓储接口
#[async_trait]
pub trait BackupRepository: Send + Sync {
    async fn insert(&self, record: &BackupRecord) -> OrchestratorResult<()>;
    async fn get_by_id(&self, id: &str) -> OrchestratorResult<Option<BackupRecord>>;
    async fn list(&self, include_deleted: bool) -> OrchestratorResult<Vec<BackupRecord>>;
    /// 最近一次未删除的全量备份
    async fn latest_full(&self) -> OrchestratorResult<Option<BackupRecord>>;
    /// 最近一次未删除的任意类型备份
    async fn latest_any(&self) -> OrchestratorResult<Option<BackupRecord>>;
    /// 墓碑标记，不做硬删除
    async fn tombstone(&self, id: &str, deleted_at: DateTime<Utc>) -> OrchestratorResult<()>;
}
