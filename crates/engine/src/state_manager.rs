use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use orchestrator_core::{
    models::{
        OrchestratorState, OrchestratorStatus, TaskStatus, WorkerStatus, STATE_SCHEMA_VERSION,
    },
    traits::{StateRepository, TaskRepository, WorkerRepository},
    OrchestratorError, OrchestratorResult,
};

#[derive(Debug, Clone)]
pub struct StateManagerConfig {
    pub instance_id: String,
    /// Worker心跳存活阈值（秒）
    pub worker_liveness_timeout_seconds: i64,
}

/// 编排器状态管理器。持久化的快照只是提示，
/// 存储中的实时数据才是事实来源：恢复时总是对账，从不照单全收。
pub struct OrchestratorStateManager {
    state_repo: Arc<dyn StateRepository>,
    task_repo: Arc<dyn TaskRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    config: StateManagerConfig,
    config_snapshot: serde_json::Value,
}

impl OrchestratorStateManager {
    pub fn new(
        state_repo: Arc<dyn StateRepository>,
        task_repo: Arc<dyn TaskRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        config: StateManagerConfig,
        config_snapshot: serde_json::Value,
    ) -> Self {
        Self {
            state_repo,
            task_repo,
            worker_repo,
            config,
            config_snapshot,
        }
    }

    /// 启动时恢复状态：
    /// 1. 无快照则构造初始状态；
    /// 2. 快照主版本不兼容直接硬失败（不做静默重置）；
    /// 3. 剔除心跳超期的Worker（标记离线、其在途任务重新入队）；
    /// 4. 所有聚合计数与实时存储对账后落库。
    pub async fn restore(&self) -> OrchestratorResult<OrchestratorState> {
        info!("恢复编排器状态: 实例 {}", self.config.instance_id);

        let stored = self.state_repo.load(&self.config.instance_id).await?;

        let mut state = match stored {
            None => {
                info!("未找到持久化状态，构造初始状态");
                OrchestratorState::initial(
                    self.config.instance_id.clone(),
                    self.config_snapshot.clone(),
                )
            }
            Some(stored) => {
                if !stored.is_version_compatible() {
                    return Err(OrchestratorError::IncompatibleStateVersion {
                        stored: stored.schema_version,
                        expected: STATE_SCHEMA_VERSION.to_string(),
                    });
                }
                debug!(
                    "加载到持久化状态，版本 {}，上次更新 {}",
                    stored.schema_version, stored.updated_at
                );
                stored
            }
        };

        self.strip_stale_workers().await?;
        self.reconcile(&mut state).await?;

        state.status = OrchestratorStatus::Running;
        state.schema_version = STATE_SCHEMA_VERSION.to_string();
        state.config_snapshot = self.config_snapshot.clone();
        state.updated_at = Utc::now();
        self.state_repo.save(&state).await?;

        info!(
            "状态恢复完成: pending {}, assigned {}, running {}, active workers {}",
            state.pending_tasks, state.assigned_tasks, state.running_tasks, state.active_workers
        );
        Ok(state)
    }

    /// 按当前实时计数持久化一份快照（定时器与重要转换时调用）
    pub async fn persist_snapshot(
        &self,
        status: OrchestratorStatus,
    ) -> OrchestratorResult<OrchestratorState> {
        let mut state = OrchestratorState::initial(
            self.config.instance_id.clone(),
            self.config_snapshot.clone(),
        );
        state.status = status;
        self.reconcile(&mut state).await?;
        state.updated_at = Utc::now();
        self.state_repo.save(&state).await?;
        debug!("状态快照已持久化: {}", status.as_str());
        Ok(state)
    }

    /// 优雅关闭时持久化最终快照
    pub async fn shutdown(&self) -> OrchestratorResult<()> {
        info!("持久化关闭前的最终状态快照");
        self.persist_snapshot(OrchestratorStatus::ShuttingDown).await?;
        Ok(())
    }

    /// 心跳超期的Worker标记离线，其最后在途的任务重新入队
    async fn strip_stale_workers(&self) -> OrchestratorResult<()> {
        let now = Utc::now();
        let workers = self.worker_repo.list().await?;

        for worker in workers {
            if worker.status == WorkerStatus::Offline {
                continue;
            }
            if !worker.is_heartbeat_expired(now, self.config.worker_liveness_timeout_seconds) {
                continue;
            }

            warn!("启动恢复: Worker {} 心跳已超期，标记为离线", worker.id);
            self.worker_repo
                .update_status(&worker.id, WorkerStatus::Offline)
                .await?;

            if let Some(task_id) = worker.current_task {
                if let Some(task) = self.task_repo.get_by_id(task_id).await? {
                    let reset = match task.status {
                        TaskStatus::Assigned => {
                            self.task_repo
                                .reset_to_pending(task_id, TaskStatus::Assigned, false)
                                .await?
                        }
                        TaskStatus::Running => {
                            self.task_repo
                                .reset_to_pending(task_id, TaskStatus::Running, true)
                                .await?
                        }
                        _ => false,
                    };
                    if reset {
                        info!("启动恢复: 任务 {} 重新入队", task_id);
                    }
                }
                self.worker_repo.set_current_task(&worker.id, None).await?;
            }
        }
        Ok(())
    }

    /// 聚合计数与实时存储对账，不信任快照里的旧值
    async fn reconcile(&self, state: &mut OrchestratorState) -> OrchestratorResult<()> {
        state.pending_tasks = self.task_repo.count_by_status(TaskStatus::Pending).await?;
        state.assigned_tasks = self.task_repo.count_by_status(TaskStatus::Assigned).await?;
        state.running_tasks = self.task_repo.count_by_status(TaskStatus::Running).await?;
        state.completed_tasks = self.task_repo.count_by_status(TaskStatus::Completed).await?;
        state.failed_tasks = self.task_repo.count_by_status(TaskStatus::Failed).await?;

        let cutoff = Utc::now()
            - chrono::Duration::seconds(self.config.worker_liveness_timeout_seconds);
        state.active_workers = self.worker_repo.get_active_since(cutoff).await?.len() as i64;
        Ok(())
    }
}
