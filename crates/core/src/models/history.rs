use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务历史记录：只追加的审计事件，创建后不再变更
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub id: i64,
    pub task_id: i64,
    pub event: HistoryEvent,
    pub worker_id: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HistoryEvent {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "PROGRESS")]
    Progress,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "RECOVERY_ACTION")]
    RecoveryAction,
}

impl HistoryEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryEvent::Created => "CREATED",
            HistoryEvent::Assigned => "ASSIGNED",
            HistoryEvent::Started => "STARTED",
            HistoryEvent::Progress => "PROGRESS",
            HistoryEvent::Completed => "COMPLETED",
            HistoryEvent::Failed => "FAILED",
            HistoryEvent::Cancelled => "CANCELLED",
            HistoryEvent::RecoveryAction => "RECOVERY_ACTION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(HistoryEvent::Created),
            "ASSIGNED" => Some(HistoryEvent::Assigned),
            "STARTED" => Some(HistoryEvent::Started),
            "PROGRESS" => Some(HistoryEvent::Progress),
            "COMPLETED" => Some(HistoryEvent::Completed),
            "FAILED" => Some(HistoryEvent::Failed),
            "CANCELLED" => Some(HistoryEvent::Cancelled),
            "RECOVERY_ACTION" => Some(HistoryEvent::RecoveryAction),
            _ => None,
        }
    }
}

impl TaskHistoryEntry {
    pub fn new(
        task_id: i64,
        event: HistoryEvent,
        worker_id: Option<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: 0, // 将由数据库生成
            task_id,
            event,
            worker_id,
            details,
            created_at: Utc::now(),
        }
    }
}
