//! 整机集成测试：真实SQLite存储上的完整编排流程

use std::sync::Arc;

use orchestrator_core::{
    config::DatabaseConfig,
    events::EventBus,
    models::{
        BackupType, DependencyKind, HistoryEvent, OrchestratorStatus, TaskStatus,
        WorkerRegistration, WorkerStatus,
    },
    OrchestratorError,
};
use orchestrator_engine::{
    BackupConfig, BackupManager, ConsistencyChecker, ConsistencyConfig, OrchestratorStateManager,
    RecoveryConfig, RecoveryManager, StateManagerConfig, TaskQueue, TaskQueueConfig,
    WorkerRegistry, WorkerRegistryConfig,
};
use orchestrator_core::traits::TaskExecutor;
use orchestrator_infrastructure::{DatabaseManager, TransactionManager};
use orchestrator_testing_utils::MockTaskExecutor;

struct Engine {
    queue: TaskQueue,
    registry: WorkerRegistry,
    recovery: RecoveryManager,
    checker: ConsistencyChecker,
    state_manager: OrchestratorStateManager,
    backup_manager: BackupManager,
}

/// 内存SQLite必须固定单连接，否则池内每个连接都是独立数据库
async fn engine(backup_dir: &std::path::Path) -> Engine {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        connection_timeout_seconds: 5,
        idle_timeout_seconds: 60,
        statement_timeout_seconds: 5,
        isolation_level: "read_committed".to_string(),
    };
    let manager = DatabaseManager::new(&config).await.unwrap();
    manager.migrate().await.unwrap();

    let task_repo = manager.task_repository();
    let worker_repo = manager.worker_repository();
    let dependency_repo = manager.dependency_repository();
    let history_repo = manager.history_repository();
    let state_repo = manager.state_repository();
    let backup_repo = manager.backup_repository();
    let event_bus = EventBus::new(128);

    Engine {
        queue: TaskQueue::new(
            Arc::clone(&task_repo),
            Arc::clone(&worker_repo),
            Arc::clone(&dependency_repo),
            Arc::clone(&history_repo),
            event_bus.clone(),
            Arc::new(TransactionManager::new(None)),
            Some(TaskQueueConfig::default()),
        ),
        registry: WorkerRegistry::new(
            Arc::clone(&worker_repo),
            event_bus.clone(),
            Some(WorkerRegistryConfig::default()),
        ),
        recovery: RecoveryManager::new(
            Arc::clone(&task_repo),
            Arc::clone(&worker_repo),
            Arc::clone(&history_repo),
            event_bus.clone(),
            Some(RecoveryConfig::default()),
        ),
        checker: ConsistencyChecker::new(
            Arc::clone(&task_repo),
            Arc::clone(&worker_repo),
            Arc::clone(&dependency_repo),
            event_bus.clone(),
            Some(ConsistencyConfig::default()),
        ),
        state_manager: OrchestratorStateManager::new(
            Arc::clone(&state_repo),
            Arc::clone(&task_repo),
            Arc::clone(&worker_repo),
            StateManagerConfig {
                instance_id: "orch-e2e".to_string(),
                worker_liveness_timeout_seconds: 90,
            },
            serde_json::json!({}),
        ),
        backup_manager: BackupManager::new(
            task_repo,
            worker_repo,
            dependency_repo,
            history_repo,
            backup_repo,
            event_bus,
            Some(BackupConfig {
                directory: backup_dir.to_path_buf(),
                retention_days: 30,
            }),
        ),
    }
}

fn registration(id: &str, name: &str, capabilities: Vec<&str>) -> WorkerRegistration {
    WorkerRegistration {
        worker_id: id.to_string(),
        name: name.to_string(),
        kind: "local".to_string(),
        capabilities: capabilities.into_iter().map(String::from).collect(),
        max_concurrent_tasks: 1,
        resources: serde_json::json!({}),
    }
}

#[tokio::test]
async fn test_full_task_lifecycle_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path()).await;

    engine
        .registry
        .register(registration("worker-1", "builder", vec!["build"]))
        .await
        .unwrap();

    let task = engine
        .queue
        .create_task("build", serde_json::json!({"repo": "demo"}), 5, 2, 300)
        .await
        .unwrap();

    // 调度取数 → 分配 → 运行 → 完成
    let capabilities = vec!["build".to_string()];
    let next = engine
        .queue
        .get_next_task(&capabilities)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.id, task.id);

    engine.queue.assign_task(task.id, "worker-1").await.unwrap();
    let running = engine
        .queue
        .update_status(task.id, TaskStatus::Running)
        .await
        .unwrap();

    // 外部执行器运行载荷并回传结果
    let executor = MockTaskExecutor::new(vec!["build"]);
    assert!(executor.supports(&running.task_type));
    let result = executor.execute(&running).await.unwrap();

    let done = engine.queue.complete_task(task.id, result).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result.as_ref().unwrap()["echo"]["repo"], "demo");

    // 完整的历史轨迹
    let history = engine.queue.get_task_history(task.id).await.unwrap();
    let events: Vec<HistoryEvent> = history.iter().map(|e| e.event).collect();
    assert_eq!(
        events,
        vec![
            HistoryEvent::Created,
            HistoryEvent::Assigned,
            HistoryEvent::Started,
            HistoryEvent::Completed,
        ]
    );

    // Worker已释放
    let worker = engine.registry.get_worker("worker-1").await.unwrap().unwrap();
    assert_eq!(worker.current_task, None);

    // 干净存储通过全部一致性检查
    let report = engine.checker.run_all_checks().await.unwrap();
    assert!(report.passed());
}

#[tokio::test]
async fn test_dependency_ordering_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path()).await;

    engine
        .registry
        .register(registration("worker-1", "builder", vec!["build", "deploy"]))
        .await
        .unwrap();

    let build = engine
        .queue
        .create_task("build", serde_json::json!({}), 1, 0, 300)
        .await
        .unwrap();
    let deploy = engine
        .queue
        .create_task("deploy", serde_json::json!({}), 9, 0, 300)
        .await
        .unwrap();
    engine
        .queue
        .add_dependency(deploy.id, build.id, DependencyKind::MustSucceed)
        .await
        .unwrap();

    let capabilities = vec!["build".to_string(), "deploy".to_string()];

    // deploy优先级更高，但依赖未满足时必须先取到build
    let next = engine
        .queue
        .get_next_task(&capabilities)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.id, build.id);

    engine.queue.assign_task(build.id, "worker-1").await.unwrap();
    engine
        .queue
        .update_status(build.id, TaskStatus::Running)
        .await
        .unwrap();
    engine
        .queue
        .complete_task(build.id, serde_json::json!({}))
        .await
        .unwrap();

    let next = engine
        .queue
        .get_next_task(&capabilities)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.id, deploy.id);
}

#[tokio::test]
async fn test_state_restore_after_crash_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path()).await;

    engine
        .registry
        .register(registration("worker-1", "builder", vec!["build"]))
        .await
        .unwrap();

    // 重启现场：一个任务停在ASSIGNED，Worker心跳新鲜
    let task = engine
        .queue
        .create_task("build", serde_json::json!({}), 0, 1, 300)
        .await
        .unwrap();
    engine.queue.assign_task(task.id, "worker-1").await.unwrap();
    engine
        .registry
        .heartbeat("worker-1", WorkerStatus::Online)
        .await
        .unwrap();

    // 状态恢复：计数与实时存储对账
    let state = engine.state_manager.restore().await.unwrap();
    assert_eq!(state.status, OrchestratorStatus::Running);
    assert_eq!(state.assigned_tasks, 1);
    assert_eq!(state.pending_tasks, 0);
    assert_eq!(state.active_workers, 1);

    // 再次恢复（幂等）结果一致
    let state = engine.state_manager.restore().await.unwrap();
    assert_eq!(state.assigned_tasks, 1);
}

#[tokio::test]
async fn test_backup_restore_round_trip_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path()).await;

    engine
        .registry
        .register(registration("worker-1", "builder", vec!["build"]))
        .await
        .unwrap();
    let task_a = engine
        .queue
        .create_task("build", serde_json::json!({"n": 1}), 3, 1, 300)
        .await
        .unwrap();
    let task_b = engine
        .queue
        .create_task("build", serde_json::json!({"n": 2}), 7, 1, 300)
        .await
        .unwrap();
    engine
        .queue
        .add_dependency(task_b.id, task_a.id, DependencyKind::MustSucceed)
        .await
        .unwrap();

    let record = engine
        .backup_manager
        .create_backup(BackupType::Full)
        .await
        .unwrap();

    // 恢复会清空再重建同一存储
    let report = engine
        .backup_manager
        .restore_backup(&record.id, false)
        .await
        .unwrap();
    assert_eq!(report.restored_tasks, 2);
    assert_eq!(report.restored_workers, 1);
    assert_eq!(report.restored_dependencies, 1);

    // 数据内容与依赖关系完好
    let restored_a = engine.queue.get_task(task_a.id).await.unwrap().unwrap();
    assert_eq!(restored_a.payload["n"], 1);
    assert_eq!(restored_a.priority, 3);

    let capabilities = vec!["build".to_string()];
    let next = engine
        .queue
        .get_next_task(&capabilities)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.id, task_a.id);
}

#[tokio::test]
async fn test_recovery_sweep_on_sqlite_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path()).await;

    engine
        .registry
        .register(registration("worker-1", "builder", vec!["build"]))
        .await
        .unwrap();

    let task = engine
        .queue
        .create_task("build", serde_json::json!({}), 0, 1, 300)
        .await
        .unwrap();
    engine.queue.assign_task(task.id, "worker-1").await.unwrap();

    // 任务刚分配、Worker心跳新鲜：扫描不应有任何动作
    let report = engine.recovery.sweep().await.unwrap();
    assert_eq!(report.recovered, 0);

    let report = engine.recovery.sweep().await.unwrap();
    assert_eq!(report.recovered, 0);

    let loaded = engine.queue.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Assigned);
}

#[tokio::test]
async fn test_exactly_one_assignment_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path()).await;

    for i in 0..4 {
        engine
            .registry
            .register(registration(
                &format!("worker-{i}"),
                &format!("builder-{i}"),
                vec!["build"],
            ))
            .await
            .unwrap();
    }

    let task = engine
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();

    let queue = Arc::new(engine.queue);
    let mut handles = Vec::new();
    for i in 0..4 {
        let queue = Arc::clone(&queue);
        let task_id = task.id;
        handles.push(tokio::spawn(async move {
            queue.assign_task(task_id, &format!("worker-{i}")).await
        }));
    }

    let mut winners = 0;
    let mut already_assigned = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(OrchestratorError::TaskAlreadyAssigned { .. }) => already_assigned += 1,
            Err(e) => panic!("意外错误: {e}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(already_assigned, 3);
}
