use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务实体：一个持久化的工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub task_type: String, // "build", "review", etc.
    pub status: TaskStatus,
    pub priority: i32, // 数值越大优先级越高
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,
    pub assigned_worker: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: i32,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Assigned => "ASSIGNED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Timeout => "TIMEOUT",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TaskStatus::Pending),
            "ASSIGNED" => Some(TaskStatus::Assigned),
            "RUNNING" => Some(TaskStatus::Running),
            "COMPLETED" => Some(TaskStatus::Completed),
            "FAILED" => Some(TaskStatus::Failed),
            "TIMEOUT" => Some(TaskStatus::Timeout),
            "CANCELLED" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 状态机合法转换边。任何非终态都可以被取消。
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        if target == TaskStatus::Cancelled {
            return !self.is_terminal();
        }
        match (self, target) {
            (TaskStatus::Pending, TaskStatus::Assigned) => true,
            (TaskStatus::Assigned, TaskStatus::Running) => true,
            // 恢复动作：已分配但未开始的任务可以退回待调度
            (TaskStatus::Assigned, TaskStatus::Pending) => true,
            (TaskStatus::Running, TaskStatus::Completed) => true,
            (TaskStatus::Running, TaskStatus::Failed) => true,
            (TaskStatus::Running, TaskStatus::Timeout) => true,
            // 恢复动作：滞留的运行中任务重新排队
            (TaskStatus::Running, TaskStatus::Pending) => true,
            (TaskStatus::Timeout, TaskStatus::Pending) => true,
            (TaskStatus::Timeout, TaskStatus::Failed) => true,
            (TaskStatus::Failed, TaskStatus::Pending) => true,
            _ => false,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for TaskStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        TaskStatus::parse(s).ok_or_else(|| format!("Invalid task status: {s}").into())
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        TaskStatus::parse(s).ok_or_else(|| format!("Invalid task status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 结构化的任务失败描述，以JSON形式存储在任务记录上
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskErrorKind {
    #[serde(rename = "EXECUTION_FAILED")]
    ExecutionFailed,
    #[serde(rename = "MAX_RETRIES_EXCEEDED")]
    MaxRetriesExceeded,
    #[serde(rename = "WORKER_LOST")]
    WorkerLost,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl TaskError {
    pub fn new<S: Into<String>>(kind: TaskErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
    pub fn execution_failed<S: Into<String>>(message: S) -> Self {
        Self::new(TaskErrorKind::ExecutionFailed, message)
    }
    pub fn max_retries_exceeded(max_retries: i32) -> Self {
        Self::new(
            TaskErrorKind::MaxRetriesExceeded,
            format!("重试次数已达上限 {max_retries}"),
        )
    }
}

/// 任务查询过滤条件
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub assigned_worker: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Task {
    pub fn new(
        task_type: String,
        payload: serde_json::Value,
        priority: i32,
        max_retries: i32,
        timeout_seconds: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            task_type,
            status: TaskStatus::Pending,
            priority,
            payload,
            result: None,
            error: None,
            assigned_worker: None,
            retry_count: 0,
            max_retries,
            timeout_seconds,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// 运行时长是否已超过任务声明的超时时间
    pub fn is_over_timeout(&self, now: DateTime<Utc>) -> bool {
        match self.started_at {
            Some(started) if self.status == TaskStatus::Running => {
                (now - started).num_seconds() > self.timeout_seconds as i64
            }
            _ => false,
        }
    }

    /// 更新状态并打上相应的时间戳
    pub fn update_status(&mut self, status: TaskStatus) {
        self.status = status;
        let now = Utc::now();
        self.updated_at = now;
        match status {
            TaskStatus::Assigned => {
                if self.assigned_at.is_none() {
                    self.assigned_at = Some(now);
                }
            }
            TaskStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                if self.completed_at.is_none() {
                    self.completed_at = Some(now);
                }
            }
            _ => {}
        }
    }

    pub fn entity_description(&self) -> String {
        format!("任务 (ID: {}, 类型: {})", self.id, self.task_type)
    }
}
