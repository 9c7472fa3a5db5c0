use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 状态快照的当前结构版本。主版本号不兼容时恢复必须硬失败。
pub const STATE_SCHEMA_VERSION: &str = "1.0";

/// 编排器自身的运行状态快照，按实例ID持久化。
/// 每个持久化周期整体替换；恢复时必须与存储中的实时计数对账。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub instance_id: String,
    pub status: OrchestratorStatus,
    pub pending_tasks: i64,
    pub assigned_tasks: i64,
    pub running_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub active_workers: i64,
    pub config_snapshot: serde_json::Value,
    pub schema_version: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrchestratorStatus {
    #[serde(rename = "INITIALIZING")]
    Initializing,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SHUTTING_DOWN")]
    ShuttingDown,
    #[serde(rename = "STOPPED")]
    Stopped,
}

impl OrchestratorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorStatus::Initializing => "INITIALIZING",
            OrchestratorStatus::Running => "RUNNING",
            OrchestratorStatus::ShuttingDown => "SHUTTING_DOWN",
            OrchestratorStatus::Stopped => "STOPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIALIZING" => Some(OrchestratorStatus::Initializing),
            "RUNNING" => Some(OrchestratorStatus::Running),
            "SHUTTING_DOWN" => Some(OrchestratorStatus::ShuttingDown),
            "STOPPED" => Some(OrchestratorStatus::Stopped),
            _ => None,
        }
    }
}

impl OrchestratorState {
    pub fn initial(instance_id: String, config_snapshot: serde_json::Value) -> Self {
        Self {
            instance_id,
            status: OrchestratorStatus::Initializing,
            pending_tasks: 0,
            assigned_tasks: 0,
            running_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            active_workers: 0,
            config_snapshot,
            schema_version: STATE_SCHEMA_VERSION.to_string(),
            updated_at: Utc::now(),
        }
    }

    /// 主版本号一致即视为兼容（"1.0" 与 "1.1" 兼容，"2.0" 不兼容）
    pub fn is_version_compatible(&self) -> bool {
        major_version(&self.schema_version) == major_version(STATE_SCHEMA_VERSION)
    }
}

fn major_version(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}
