//! 生命周期事件
//!
//! 引擎对外发布的离散事实，供外部审计/事件溯源子系统消费。
//! 事件为带类型的枚举变体，不使用字符串事件名。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    TaskCreated {
        id: Uuid,
        task_id: i64,
        task_type: String,
        occurred_at: DateTime<Utc>,
    },
    TaskAssigned {
        id: Uuid,
        task_id: i64,
        worker_id: String,
        occurred_at: DateTime<Utc>,
    },
    TaskStarted {
        id: Uuid,
        task_id: i64,
        occurred_at: DateTime<Utc>,
    },
    TaskCompleted {
        id: Uuid,
        task_id: i64,
        occurred_at: DateTime<Utc>,
    },
    TaskFailed {
        id: Uuid,
        task_id: i64,
        error_message: String,
        retry_count: i32,
        occurred_at: DateTime<Utc>,
    },
    TaskCancelled {
        id: Uuid,
        task_id: i64,
        occurred_at: DateTime<Utc>,
    },
    RecoveryActionTaken {
        id: Uuid,
        task_id: i64,
        action: String,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    ConsistencyCheckCompleted {
        id: Uuid,
        check_name: String,
        passed: bool,
        issue_count: usize,
        occurred_at: DateTime<Utc>,
    },
    BackupCreated {
        id: Uuid,
        backup_id: String,
        occurred_at: DateTime<Utc>,
    },
    BackupRestored {
        id: Uuid,
        backup_id: String,
        occurred_at: DateTime<Utc>,
    },
    WorkerRegistered {
        id: Uuid,
        worker_id: String,
        occurred_at: DateTime<Utc>,
    },
    WorkerDeregistered {
        id: Uuid,
        worker_id: String,
        occurred_at: DateTime<Utc>,
    },
    WorkerOffline {
        id: Uuid,
        worker_id: String,
        occurred_at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::TaskCreated { .. } => "TaskCreated",
            EngineEvent::TaskAssigned { .. } => "TaskAssigned",
            EngineEvent::TaskStarted { .. } => "TaskStarted",
            EngineEvent::TaskCompleted { .. } => "TaskCompleted",
            EngineEvent::TaskFailed { .. } => "TaskFailed",
            EngineEvent::TaskCancelled { .. } => "TaskCancelled",
            EngineEvent::RecoveryActionTaken { .. } => "RecoveryActionTaken",
            EngineEvent::ConsistencyCheckCompleted { .. } => "ConsistencyCheckCompleted",
            EngineEvent::BackupCreated { .. } => "BackupCreated",
            EngineEvent::BackupRestored { .. } => "BackupRestored",
            EngineEvent::WorkerRegistered { .. } => "WorkerRegistered",
            EngineEvent::WorkerDeregistered { .. } => "WorkerDeregistered",
            EngineEvent::WorkerOffline { .. } => "WorkerOffline",
        }
    }
}

/// 事件总线：broadcast通道的薄封装。
/// 没有订阅者或订阅者滞后都不影响引擎操作本身。
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        // 发送失败只意味着当前没有订阅者
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
