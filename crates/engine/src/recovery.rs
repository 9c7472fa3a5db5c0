use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use orchestrator_core::{
    events::{EngineEvent, EventBus},
    models::{HistoryEvent, Task, TaskError, TaskHistoryEntry, TaskStatus, WorkerStatus},
    traits::{HistoryRepository, TaskRepository, WorkerRepository},
    OrchestratorResult,
};

/// 恢复策略配置（全部可配置）
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// ASSIGNED状态最大滞留时长（秒），超过后重新入队
    pub assigned_max_age_seconds: i64,
    /// RUNNING状态最大滞留时长（秒），超过后重启
    pub running_max_age_seconds: i64,
    /// Worker心跳存活阈值（秒）
    pub worker_liveness_timeout_seconds: i64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            assigned_max_age_seconds: 300,   // 5分钟
            running_max_age_seconds: 1800,   // 30分钟
            worker_liveness_timeout_seconds: 90,
        }
    }
}

/// 单次扫描的汇总报告
#[derive(Debug, Clone, Default)]
pub struct RecoverySweepReport {
    /// 检查过的候选任务数
    pub scanned: usize,
    /// 成功执行恢复动作的任务数
    pub recovered: usize,
    /// 恢复动作执行出错的任务数
    pub failed: usize,
    /// 状态守卫未命中而跳过的任务数（并发活动）
    pub skipped: usize,
    /// 标记为离线的Worker数
    pub offline_workers: usize,
}

/// 恢复管理器：检测滞留在瞬态状态的任务并按状态应用恢复策略。
/// 每个动作都是带状态守卫的条件更新，扫描可以与在线调度并发运行，
/// 也可以安全地重复执行。
pub struct RecoveryManager {
    task_repo: Arc<dyn TaskRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    history_repo: Arc<dyn HistoryRepository>,
    event_bus: EventBus,
    config: RecoveryConfig,
}

impl RecoveryManager {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        history_repo: Arc<dyn HistoryRepository>,
        event_bus: EventBus,
        config: Option<RecoveryConfig>,
    ) -> Self {
        Self {
            task_repo,
            worker_repo,
            history_repo,
            event_bus,
            config: config.unwrap_or_default(),
        }
    }

    /// 执行一轮完整扫描：已分配未开始、运行中滞留、超时重试、失效Worker
    pub async fn sweep(&self) -> OrchestratorResult<RecoverySweepReport> {
        debug!("开始恢复扫描");
        let mut report = RecoverySweepReport::default();

        self.recover_assigned_tasks(&mut report).await?;
        self.recover_running_tasks(&mut report).await?;
        self.recover_timeout_tasks(&mut report).await?;
        self.recover_worker_states(&mut report).await?;

        if report.recovered > 0 || report.failed > 0 || report.offline_workers > 0 {
            info!(
                "恢复扫描完成: 检查 {} 个任务，恢复 {}，失败 {}，跳过 {}，离线Worker {}",
                report.scanned,
                report.recovered,
                report.failed,
                report.skipped,
                report.offline_workers
            );
        }
        Ok(report)
    }

    /// 已分配但超期未开始的任务：清除Worker重新入队
    async fn recover_assigned_tasks(
        &self,
        report: &mut RecoverySweepReport,
    ) -> OrchestratorResult<()> {
        let cutoff = Utc::now() - Duration::seconds(self.config.assigned_max_age_seconds);
        let stale_tasks = self.task_repo.get_stale(TaskStatus::Assigned, cutoff).await?;

        for task in stale_tasks {
            report.scanned += 1;

            // 重试耗尽优先于任何重新分配动作
            if task.retry_count > task.max_retries {
                self.fail_exhausted(&task, TaskStatus::Assigned, report).await;
                continue;
            }

            match self
                .task_repo
                .reset_to_pending(task.id, TaskStatus::Assigned, false)
                .await
            {
                Ok(true) => {
                    warn!(
                        "任务 {} 已分配超过 {} 秒未开始，重新入队",
                        task.id, self.config.assigned_max_age_seconds
                    );
                    self.record_action(&task, "reassigned", "分配后超期未开始").await;
                    report.recovered += 1;
                }
                Ok(false) => {
                    debug!("任务 {} 状态已被并发修改，跳过恢复", task.id);
                    report.skipped += 1;
                }
                Err(e) => {
                    error!("恢复已分配任务 {} 失败: {}", task.id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// 运行中滞留的任务：清除开始时间与部分结果后重新入队
    async fn recover_running_tasks(
        &self,
        report: &mut RecoverySweepReport,
    ) -> OrchestratorResult<()> {
        let cutoff = Utc::now() - Duration::seconds(self.config.running_max_age_seconds);
        let stale_tasks = self.task_repo.get_stale(TaskStatus::Running, cutoff).await?;

        for task in stale_tasks {
            report.scanned += 1;

            if task.retry_count > task.max_retries {
                self.fail_exhausted(&task, TaskStatus::Running, report).await;
                continue;
            }

            match self
                .task_repo
                .reset_to_pending(task.id, TaskStatus::Running, true)
                .await
            {
                Ok(true) => {
                    warn!(
                        "任务 {} 运行超过 {} 秒无进展，重启",
                        task.id, self.config.running_max_age_seconds
                    );
                    self.record_action(&task, "restarted", "运行状态滞留").await;
                    report.recovered += 1;
                }
                Ok(false) => {
                    debug!("任务 {} 状态已被并发修改，跳过恢复", task.id);
                    report.skipped += 1;
                }
                Err(e) => {
                    error!("恢复运行中任务 {} 失败: {}", task.id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// 超时任务立即处理：还有重试额度则自增计数重新入队，
    /// 否则确定性地以 MaxRetriesExceeded 终态失败
    async fn recover_timeout_tasks(
        &self,
        report: &mut RecoverySweepReport,
    ) -> OrchestratorResult<()> {
        let timeout_tasks = self.task_repo.get_by_status(TaskStatus::Timeout).await?;

        for task in timeout_tasks {
            report.scanned += 1;

            match self.task_repo.retry_from_timeout(task.id).await {
                Ok(true) => {
                    info!(
                        "超时任务 {} 重新入队，重试次数: {}/{}",
                        task.id,
                        task.retry_count + 1,
                        task.max_retries
                    );
                    self.record_action(&task, "retried", "任务执行超时").await;
                    report.recovered += 1;
                }
                Ok(false) => {
                    // 守卫未命中：重试额度已耗尽或状态已变化
                    self.fail_exhausted(&task, TaskStatus::Timeout, report).await;
                }
                Err(e) => {
                    error!("重试超时任务 {} 失败: {}", task.id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// 心跳超期的Worker标记为离线并清除其当前任务引用；
    /// 其在途任务重新入队。Worker记录本身从不被恢复逻辑删除。
    async fn recover_worker_states(
        &self,
        report: &mut RecoverySweepReport,
    ) -> OrchestratorResult<()> {
        let now = Utc::now();
        let workers = self.worker_repo.list().await?;

        for worker in workers {
            if worker.status == WorkerStatus::Offline {
                continue;
            }
            if !worker.is_heartbeat_expired(now, self.config.worker_liveness_timeout_seconds) {
                continue;
            }

            warn!(
                "Worker {} 心跳超期 {} 秒，标记为离线",
                worker.id,
                (now - worker.last_heartbeat).num_seconds()
            );

            if let Err(e) = self
                .worker_repo
                .update_status(&worker.id, WorkerStatus::Offline)
                .await
            {
                error!("更新Worker {} 状态失败: {}", worker.id, e);
                continue;
            }
            report.offline_workers += 1;

            self.event_bus.publish(EngineEvent::WorkerOffline {
                id: Uuid::new_v4(),
                worker_id: worker.id.clone(),
                occurred_at: now,
            });

            // 该Worker的在途任务重新入队
            if let Some(task_id) = worker.current_task {
                if let Ok(Some(task)) = self.task_repo.get_by_id(task_id).await {
                    if task.assigned_worker.as_deref() == Some(worker.id.as_str()) {
                        let reset = match task.status {
                            TaskStatus::Assigned => {
                                self.task_repo
                                    .reset_to_pending(task_id, TaskStatus::Assigned, false)
                                    .await
                            }
                            TaskStatus::Running => {
                                self.task_repo
                                    .reset_to_pending(task_id, TaskStatus::Running, true)
                                    .await
                            }
                            _ => Ok(false),
                        };
                        if let Ok(true) = reset {
                            self.record_action(&task, "reassigned", "Worker心跳失效").await;
                            report.recovered += 1;
                        }
                    }
                }
                if let Err(e) = self.worker_repo.set_current_task(&worker.id, None).await {
                    error!("清除Worker {} 当前任务失败: {}", worker.id, e);
                }
            }
        }
        Ok(())
    }

    /// 重试耗尽的任务确定性地进入FAILED，绝不重新入队
    async fn fail_exhausted(
        &self,
        task: &Task,
        expected: TaskStatus,
        report: &mut RecoverySweepReport,
    ) {
        let error = TaskError::max_retries_exceeded(task.max_retries);
        match self
            .task_repo
            .fail_with_error(task.id, expected, &error)
            .await
        {
            Ok(true) => {
                warn!(
                    "任务 {} 重试次数已耗尽 ({}/{})，标记为失败",
                    task.id, task.retry_count, task.max_retries
                );
                self.record_action(task, "failed", "重试次数已耗尽").await;
                if let Some(worker_id) = &task.assigned_worker {
                    if let Err(e) = self.worker_repo.set_current_task(worker_id, None).await {
                        debug!("清除Worker {} 当前任务失败: {}", worker_id, e);
                    }
                }
                self.event_bus.publish(EngineEvent::TaskFailed {
                    id: Uuid::new_v4(),
                    task_id: task.id,
                    error_message: error.message.clone(),
                    retry_count: task.retry_count,
                    occurred_at: Utc::now(),
                });
                report.recovered += 1;
            }
            Ok(false) => {
                debug!("任务 {} 状态已被并发修改，跳过终态失败", task.id);
                report.skipped += 1;
            }
            Err(e) => {
                error!("标记任务 {} 终态失败时出错: {}", task.id, e);
                report.failed += 1;
            }
        }
    }

    /// 每个恢复动作追加一条历史记录并发布事件
    async fn record_action(&self, task: &Task, action: &str, reason: &str) {
        let entry = TaskHistoryEntry::new(
            task.id,
            HistoryEvent::RecoveryAction,
            task.assigned_worker.clone(),
            serde_json::json!({
                "action": action,
                "reason": reason,
                "from_status": task.status.as_str(),
            }),
        );
        if let Err(e) = self.history_repo.append(&entry).await {
            error!("追加任务 {} 恢复历史失败: {}", task.id, e);
        }

        self.event_bus.publish(EngineEvent::RecoveryActionTaken {
            id: Uuid::new_v4(),
            task_id: task.id,
            action: action.to_string(),
            reason: reason.to_string(),
            occurred_at: Utc::now(),
        });
    }
}
