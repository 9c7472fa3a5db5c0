use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use orchestrator_core::{
    models::OrchestratorStatus, AppConfig, EventBus,
};
use orchestrator_engine::{
    BackupConfig, BackupManager, ConsistencyChecker, ConsistencyConfig,
    DisasterRecoveryCoordinator, OrchestratorStateManager, RecoveryConfig, RecoveryManager,
    StateManagerConfig, TaskQueue, TaskQueueConfig, WorkerRegistry, WorkerRegistryConfig,
};
use orchestrator_infrastructure::{DatabaseManager, TransactionManager};

/// 主应用程序：装配各组件并驱动后台循环
pub struct Application {
    config: AppConfig,
    db_manager: Arc<DatabaseManager>,
    pub task_queue: Arc<TaskQueue>,
    pub worker_registry: Arc<WorkerRegistry>,
    pub recovery_manager: Arc<RecoveryManager>,
    pub consistency_checker: Arc<ConsistencyChecker>,
    pub state_manager: Arc<OrchestratorStateManager>,
    pub backup_manager: Arc<BackupManager>,
    pub disaster_recovery: Arc<DisasterRecoveryCoordinator>,
    pub event_bus: EventBus,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化编排引擎: 实例 {}", config.orchestrator.instance_id);

        let db_manager = Arc::new(
            DatabaseManager::new(&config.database)
                .await
                .context("连接数据库失败")?,
        );
        db_manager.migrate().await.context("初始化表结构失败")?;

        let task_repo = db_manager.task_repository();
        let worker_repo = db_manager.worker_repository();
        let dependency_repo = db_manager.dependency_repository();
        let history_repo = db_manager.history_repository();
        let state_repo = db_manager.state_repository();
        let backup_repo = db_manager.backup_repository();

        let event_bus = EventBus::default();
        let tx_manager = Arc::new(TransactionManager::new(None));
        let liveness_timeout = config.worker_liveness_timeout_seconds();

        let task_queue = Arc::new(TaskQueue::new(
            Arc::clone(&task_repo),
            Arc::clone(&worker_repo),
            Arc::clone(&dependency_repo),
            Arc::clone(&history_repo),
            event_bus.clone(),
            Arc::clone(&tx_manager),
            Some(TaskQueueConfig {
                candidate_batch_size: 32,
                worker_liveness_timeout_seconds: liveness_timeout,
            }),
        ));

        let worker_registry = Arc::new(WorkerRegistry::new(
            Arc::clone(&worker_repo),
            event_bus.clone(),
            Some(WorkerRegistryConfig {
                heartbeat_interval_seconds: config.worker.heartbeat_interval_seconds,
                liveness_multiplier: config.worker.liveness_multiplier,
            }),
        ));

        let recovery_manager = Arc::new(RecoveryManager::new(
            Arc::clone(&task_repo),
            Arc::clone(&worker_repo),
            Arc::clone(&history_repo),
            event_bus.clone(),
            Some(RecoveryConfig {
                assigned_max_age_seconds: config.recovery.assigned_max_age_seconds,
                running_max_age_seconds: config.recovery.running_max_age_seconds,
                worker_liveness_timeout_seconds: liveness_timeout,
            }),
        ));

        let consistency_checker = Arc::new(ConsistencyChecker::new(
            Arc::clone(&task_repo),
            Arc::clone(&worker_repo),
            Arc::clone(&dependency_repo),
            event_bus.clone(),
            Some(ConsistencyConfig {
                worker_liveness_timeout_seconds: liveness_timeout,
            }),
        ));

        let config_snapshot = serde_json::to_value(&config)
            .context("序列化配置快照失败")?;
        let state_manager = Arc::new(OrchestratorStateManager::new(
            Arc::clone(&state_repo),
            Arc::clone(&task_repo),
            Arc::clone(&worker_repo),
            StateManagerConfig {
                instance_id: config.orchestrator.instance_id.clone(),
                worker_liveness_timeout_seconds: liveness_timeout,
            },
            config_snapshot,
        ));

        let backup_manager = Arc::new(BackupManager::new(
            Arc::clone(&task_repo),
            Arc::clone(&worker_repo),
            Arc::clone(&dependency_repo),
            Arc::clone(&history_repo),
            Arc::clone(&backup_repo),
            event_bus.clone(),
            Some(BackupConfig {
                directory: PathBuf::from(&config.backup.directory),
                retention_days: config.backup.retention_days,
            }),
        ));

        let disaster_recovery = Arc::new(DisasterRecoveryCoordinator::new(
            Arc::clone(&backup_manager),
            Arc::clone(&recovery_manager),
            Arc::clone(&consistency_checker),
            Arc::clone(&state_manager),
        ));

        Ok(Self {
            config,
            db_manager,
            task_queue,
            worker_registry,
            recovery_manager,
            consistency_checker,
            state_manager,
            backup_manager,
            disaster_recovery,
            event_bus,
        })
    }

    /// 运行编排引擎。启动顺序：
    /// 恢复编排器状态 → 清理滞留任务 → 校验不变量 → 启动后台循环。
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        // 1. 恢复并对账编排器状态
        let state = self
            .state_manager
            .restore()
            .await
            .context("恢复编排器状态失败")?;
        info!("编排器状态已恢复: {}", state.status.as_str());

        // 2. 启动前先清理滞留工作
        let report = self
            .recovery_manager
            .sweep()
            .await
            .context("启动恢复扫描失败")?;
        info!(
            "启动恢复扫描完成: 检查 {}，恢复 {}",
            report.scanned, report.recovered
        );

        // 3. 接受新分配之前校验存储不变量
        let consistency = self
            .consistency_checker
            .run_all_checks()
            .await
            .context("启动一致性检查失败")?;
        if !consistency.passed() {
            error!(
                "启动一致性检查发现问题: warning {}, error {}, critical {}",
                consistency.warnings, consistency.errors, consistency.criticals
            );
            if self.config.consistency.auto_fix {
                for result in &consistency.results {
                    if !result.passed {
                        let fixed = self
                            .consistency_checker
                            .fix_issues(&result.check_name)
                            .await
                            .unwrap_or(0);
                        info!("检查 {} 自动修复 {} 个问题", result.check_name, fixed);
                    }
                }
            }
        }

        // 4. 启动摘要
        let active_workers = self.worker_registry.list_active().await?;
        let pending = self
            .task_queue
            .list_tasks(&orchestrator_core::models::TaskFilter {
                status: Some(orchestrator_core::models::TaskStatus::Pending),
                ..Default::default()
            })
            .await?;
        info!(
            "启动摘要: {} 个待调度任务, {} 个活跃Worker",
            pending.len(),
            active_workers.len()
        );

        // 清理超过保留期的备份元数据
        match self.backup_manager.cleanup_expired().await {
            Ok(count) if count > 0 => info!("清理了 {} 条过期备份元数据", count),
            Ok(_) => {}
            Err(e) => error!("备份保留策略清理失败: {e}"),
        }

        // 5. 启动后台循环
        let recovery_handle = {
            let recovery = Arc::clone(&self.recovery_manager);
            let interval = self.config.recovery.sweep_interval_seconds;
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                run_recovery_loop(recovery, interval, shutdown_rx).await;
            })
        };

        let consistency_handle = {
            let checker = Arc::clone(&self.consistency_checker);
            let interval = self.config.consistency.check_interval_seconds;
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                run_consistency_loop(checker, interval, shutdown_rx).await;
            })
        };

        let state_handle = {
            let state_manager = Arc::clone(&self.state_manager);
            let interval = self.config.orchestrator.state_persist_interval_seconds;
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                run_state_persist_loop(state_manager, interval, shutdown_rx).await;
            })
        };

        let event_handle = {
            let mut events = self.event_bus.subscribe();
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                run_event_log_loop(&mut events, shutdown_rx).await;
            })
        };

        info!("编排引擎已启动，等待关闭信号");
        let _ = shutdown_rx.recv().await;
        info!("编排引擎收到关闭信号");

        let _ = tokio::join!(
            recovery_handle,
            consistency_handle,
            state_handle,
            event_handle
        );

        // 6. 持久化最终快照后关闭连接
        if let Err(e) = self.state_manager.shutdown().await {
            error!("持久化最终状态快照失败: {e}");
        }
        self.db_manager.close().await;

        info!("编排引擎已停止");
        Ok(())
    }
}

/// 周期性恢复扫描循环
async fn run_recovery_loop(
    recovery: Arc<RecoveryManager>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = recovery.sweep().await {
                    error!("恢复扫描失败: {e}");
                }
            }
            _ = shutdown_rx.recv() => {
                info!("恢复扫描循环收到关闭信号");
                break;
            }
        }
    }
}

/// 周期性一致性检查循环
async fn run_consistency_loop(
    checker: Arc<ConsistencyChecker>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match checker.run_all_checks().await {
                    Ok(report) if !report.passed() => {
                        debug!(
                            "周期一致性检查发现问题: warning {}, error {}, critical {}",
                            report.warnings, report.errors, report.criticals
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("一致性检查失败: {e}"),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("一致性检查循环收到关闭信号");
                break;
            }
        }
    }
}

/// 生命周期事件日志循环。外部审计子系统通过同一总线消费事件，
/// 这里只负责把事件落到结构化日志。
async fn run_event_log_loop(
    events: &mut tokio::sync::broadcast::Receiver<orchestrator_core::EngineEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => debug!("生命周期事件: {}", event.event_type()),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("事件日志滞后，跳过 {} 条事件", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}

/// 周期性状态持久化循环
async fn run_state_persist_loop(
    state_manager: Arc<OrchestratorStateManager>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = state_manager
                    .persist_snapshot(OrchestratorStatus::Running)
                    .await
                {
                    error!("定时状态持久化失败: {e}");
                }
            }
            _ = shutdown_rx.recv() => {
                info!("状态持久化循环收到关闭信号");
                break;
            }
        }
    }
}
