use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },
    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },
    #[error("备份记录未找到: {id}")]
    BackupNotFound { id: String },
    #[error("任务 {id} 已被分配给Worker {worker_id}")]
    TaskAlreadyAssigned { id: i64, worker_id: String },
    #[error("Worker名称已注册: {name}")]
    WorkerAlreadyRegistered { name: String },
    #[error("非法的状态转换: 任务 {id} 从 {from} 到 {to}")]
    InvalidStateTransition { id: i64, from: String, to: String },
    #[error("任务 {id} 已达到最大重试次数 {max_retries}")]
    MaxRetriesExceeded { id: i64, max_retries: i32 },
    #[error("检测到循环依赖")]
    CircularDependency,
    #[error("无效的任务依赖: 任务 {task_id} 依赖任务 {dependency_id} - {reason}")]
    InvalidDependency {
        task_id: i64,
        dependency_id: i64,
        reason: String,
    },
    #[error("任务 {id} 的依赖条件未满足")]
    DependencyNotSatisfied { id: i64 },
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("备份完整性校验失败: {0}")]
    BackupIntegrity(String),
    #[error("不兼容的状态快照版本: 存储 {stored}, 期望 {expected}")]
    IncompatibleStateVersion { stored: String, expected: String },
    #[error("已有恢复计划正在执行")]
    RecoveryPlanAlreadyRunning,
    #[error("恢复计划已取消: {plan}")]
    RecoveryPlanCancelled { plan: String },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("资源不足: {0}")]
    ResourceExhausted(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }
    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskParams(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }

    /// 事务管理器据此判断是否可自动重试
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::Database(e) => is_transient_sqlx_error(e),
            OrchestratorError::DatabaseOperation(_)
            | OrchestratorError::Timeout(_)
            | OrchestratorError::ResourceExhausted(_) => true,
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Internal(_)
                | OrchestratorError::Configuration(_)
                | OrchestratorError::BackupIntegrity(_)
                | OrchestratorError::IncompatibleStateVersion { .. }
        )
    }
}

/// PostgreSQL事务回滚类错误码（SQLSTATE class 40）
const PG_SERIALIZATION_FAILURE: &str = "40001";
const PG_DEADLOCK_DETECTED: &str = "40P01";

/// 判断sqlx错误是否为瞬态错误（序列化冲突、死锁、连接丢失等）
pub fn is_transient_sqlx_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code = code.as_ref();
                if code == PG_SERIALIZATION_FAILURE || code == PG_DEADLOCK_DETECTED {
                    return true;
                }
            }
            // SQLite在并发写入时返回 database is locked / database is busy
            let message = db_err.message().to_lowercase();
            message.contains("database is locked") || message.contains("database is busy")
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::Io(_)
        | sqlx::Error::WorkerCrashed => true,
        _ => false,
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}
