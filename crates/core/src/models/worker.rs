use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker实体：一个可认领并执行任务的执行代理
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub name: String,
    pub kind: String, // 宿主环境分类："local", "container", "remote", etc.
    pub status: WorkerStatus,
    pub capabilities: Vec<String>, // 可执行的任务类型
    pub current_task: Option<i64>,
    pub max_concurrent_tasks: i32,
    pub resources: serde_json::Value, // 资源提示，引擎不解释其内容
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    #[serde(rename = "ONLINE")]
    Online,
    #[serde(rename = "OFFLINE")]
    Offline,
    #[serde(rename = "BUSY")]
    Busy,
    #[serde(rename = "ERROR")]
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Online => "ONLINE",
            WorkerStatus::Offline => "OFFLINE",
            WorkerStatus::Busy => "BUSY",
            WorkerStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ONLINE" => Some(WorkerStatus::Online),
            "OFFLINE" => Some(WorkerStatus::Offline),
            "BUSY" => Some(WorkerStatus::Busy),
            "ERROR" => Some(WorkerStatus::Error),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for WorkerStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for WorkerStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for WorkerStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        WorkerStatus::parse(s).ok_or_else(|| format!("Invalid worker status: {s}").into())
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for WorkerStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        WorkerStatus::parse(s).ok_or_else(|| format!("Invalid worker status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for WorkerStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for WorkerStatus {
    fn encode_by_ref(
        &self,
        args: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), args)
    }
}

/// Worker注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub name: String,
    pub kind: String,
    pub capabilities: Vec<String>,
    pub max_concurrent_tasks: i32,
    pub resources: serde_json::Value,
}

/// Worker心跳上报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub timestamp: DateTime<Utc>,
}

impl Worker {
    pub fn new(registration: WorkerRegistration) -> Self {
        let now = Utc::now();
        Self {
            id: registration.worker_id,
            name: registration.name,
            kind: registration.kind,
            status: WorkerStatus::Online,
            capabilities: registration.capabilities,
            current_task: None,
            max_concurrent_tasks: registration.max_concurrent_tasks,
            resources: registration.resources,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self.status, WorkerStatus::Online)
    }

    /// 心跳是否已超过存活阈值。超期的Worker即使存储状态为在线，
    /// 调度决策也不再信任它。
    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, timeout_seconds: i64) -> bool {
        (now - self.last_heartbeat).num_seconds() > timeout_seconds
    }

    /// Worker是否可以接受指定类型的新任务
    pub fn can_accept_task(&self, task_type: &str, now: DateTime<Utc>, timeout_seconds: i64) -> bool {
        self.is_online()
            && !self.is_heartbeat_expired(now, timeout_seconds)
            && self.current_task.is_none()
            && self.capabilities.iter().any(|c| c == task_type)
    }

    pub fn entity_description(&self) -> String {
        format!("Worker '{}' (ID: {}, 类型: {})", self.name, self.id, self.kind)
    }
}
