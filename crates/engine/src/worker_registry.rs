use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use orchestrator_core::{
    events::{EngineEvent, EventBus},
    models::{Worker, WorkerRegistration, WorkerStatus},
    traits::WorkerRepository,
    OrchestratorError, OrchestratorResult,
};

/// Worker注册表配置
#[derive(Debug, Clone)]
pub struct WorkerRegistryConfig {
    /// 期望的心跳间隔（秒）
    pub heartbeat_interval_seconds: i64,
    /// 心跳超过 interval × multiplier 即视为不可用
    pub liveness_multiplier: i64,
}

impl Default for WorkerRegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 30,
            liveness_multiplier: 3,
        }
    }
}

/// Worker注册表：身份、能力、容量与存活状态
pub struct WorkerRegistry {
    worker_repo: Arc<dyn WorkerRepository>,
    event_bus: EventBus,
    config: WorkerRegistryConfig,
}

impl WorkerRegistry {
    pub fn new(
        worker_repo: Arc<dyn WorkerRepository>,
        event_bus: EventBus,
        config: Option<WorkerRegistryConfig>,
    ) -> Self {
        Self {
            worker_repo,
            event_bus,
            config: config.unwrap_or_default(),
        }
    }

    pub fn liveness_timeout_seconds(&self) -> i64 {
        self.config.heartbeat_interval_seconds * self.config.liveness_multiplier
    }

    /// 注册新Worker。名称重复返回 WorkerAlreadyRegistered。
    pub async fn register(&self, registration: WorkerRegistration) -> OrchestratorResult<Worker> {
        if registration.worker_id.trim().is_empty() {
            return Err(OrchestratorError::validation_error("Worker ID不能为空"));
        }
        if registration.name.trim().is_empty() {
            return Err(OrchestratorError::validation_error("Worker名称不能为空"));
        }
        if registration.max_concurrent_tasks <= 0 {
            return Err(OrchestratorError::validation_error(
                "最大并发任务数必须为正数",
            ));
        }

        if let Some(existing) = self.worker_repo.get_by_name(&registration.name).await? {
            return Err(OrchestratorError::WorkerAlreadyRegistered {
                name: existing.name,
            });
        }

        let worker = Worker::new(registration);
        self.worker_repo.register(&worker).await?;

        self.event_bus.publish(EngineEvent::WorkerRegistered {
            id: Uuid::new_v4(),
            worker_id: worker.id.clone(),
            occurred_at: Utc::now(),
        });

        info!("注册Worker成功: {}", worker.entity_description());
        Ok(worker)
    }

    /// 显式注销。恢复逻辑从不隐式删除Worker记录。
    pub async fn deregister(&self, worker_id: &str) -> OrchestratorResult<()> {
        self.worker_repo.unregister(worker_id).await?;

        self.event_bus.publish(EngineEvent::WorkerDeregistered {
            id: Uuid::new_v4(),
            worker_id: worker_id.to_string(),
            occurred_at: Utc::now(),
        });

        info!("注销Worker: {}", worker_id);
        Ok(())
    }

    /// 心跳上报：更新last_heartbeat与状态
    pub async fn heartbeat(
        &self,
        worker_id: &str,
        status: WorkerStatus,
    ) -> OrchestratorResult<()> {
        let now = Utc::now();
        self.worker_repo
            .update_heartbeat(worker_id, status, now)
            .await?;
        debug!("Worker {} 心跳已更新，状态: {}", worker_id, status.as_str());
        Ok(())
    }

    pub async fn get_worker(&self, worker_id: &str) -> OrchestratorResult<Option<Worker>> {
        self.worker_repo.get_by_id(worker_id).await
    }

    pub async fn list_workers(&self) -> OrchestratorResult<Vec<Worker>> {
        self.worker_repo.list().await
    }

    /// 心跳仍在存活窗口内的在线Worker
    pub async fn list_active(&self) -> OrchestratorResult<Vec<Worker>> {
        let cutoff = Utc::now() - Duration::seconds(self.liveness_timeout_seconds());
        self.worker_repo.get_active_since(cutoff).await
    }

    /// 心跳已超期的Worker。只读检测，不修改存储行；
    /// 状态落库交由恢复清理流程处理。
    pub async fn list_stale(&self) -> OrchestratorResult<Vec<Worker>> {
        let now = Utc::now();
        let timeout = self.liveness_timeout_seconds();
        let workers = self.worker_repo.list().await?;
        Ok(workers
            .into_iter()
            .filter(|w| {
                w.status != WorkerStatus::Offline && w.is_heartbeat_expired(now, timeout)
            })
            .collect())
    }

    /// 可接受指定任务类型的Worker
    pub async fn find_available(&self, task_type: &str) -> OrchestratorResult<Vec<Worker>> {
        let now = Utc::now();
        let timeout = self.liveness_timeout_seconds();
        let workers = self.worker_repo.list().await?;
        Ok(workers
            .into_iter()
            .filter(|w| w.can_accept_task(task_type, now, timeout))
            .collect())
    }
}
