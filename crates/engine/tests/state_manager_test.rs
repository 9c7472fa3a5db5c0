use std::sync::Arc;

use chrono::{Duration, Utc};
use orchestrator_core::{
    models::{OrchestratorState, OrchestratorStatus, TaskStatus, WorkerStatus},
    traits::{StateRepository, TaskRepository, WorkerRepository},
    OrchestratorError,
};
use orchestrator_engine::{OrchestratorStateManager, StateManagerConfig};
use orchestrator_testing_utils::{
    MockStateRepository, MockTaskRepository, MockWorkerRepository, TaskBuilder, WorkerBuilder,
};

const INSTANCE: &str = "orch-test";

fn manager(
    state_repo: MockStateRepository,
    task_repo: MockTaskRepository,
    worker_repo: MockWorkerRepository,
) -> OrchestratorStateManager {
    OrchestratorStateManager::new(
        Arc::new(state_repo),
        Arc::new(task_repo),
        Arc::new(worker_repo),
        StateManagerConfig {
            instance_id: INSTANCE.to_string(),
            worker_liveness_timeout_seconds: 90,
        },
        serde_json::json!({"recovery": {"sweep_interval_seconds": 60}}),
    )
}

#[tokio::test]
async fn test_restore_without_snapshot_builds_initial_state() {
    let state_repo = MockStateRepository::new();
    let mgr = manager(
        state_repo.clone(),
        MockTaskRepository::new(),
        MockWorkerRepository::new(),
    );

    let state = mgr.restore().await.unwrap();
    assert_eq!(state.instance_id, INSTANCE);
    assert_eq!(state.status, OrchestratorStatus::Running);
    assert_eq!(state.pending_tasks, 0);

    // 恢复后的状态已落库
    let stored = state_repo.load(INSTANCE).await.unwrap().unwrap();
    assert_eq!(stored.status, OrchestratorStatus::Running);
}

/// 规格属性：持久化快照中的过期计数不可信，
/// 恢复必须以存储中的实时计数为准。
#[tokio::test]
async fn test_restore_reconciles_counts_against_live_store() {
    // 快照声称有99个pending任务和7个活跃Worker
    let mut stale_snapshot =
        OrchestratorState::initial(INSTANCE.to_string(), serde_json::json!({}));
    stale_snapshot.pending_tasks = 99;
    stale_snapshot.running_tasks = 42;
    stale_snapshot.active_workers = 7;
    let state_repo = MockStateRepository::with_state(stale_snapshot);

    // 实际存储：2个pending，1个completed，1个在线Worker
    let task_repo = MockTaskRepository::with_tasks(vec![
        TaskBuilder::new().with_id(1).build(),
        TaskBuilder::new().with_id(2).build(),
        TaskBuilder::new()
            .with_id(3)
            .with_status(TaskStatus::Completed)
            .build(),
    ]);
    let worker_repo = MockWorkerRepository::new();
    worker_repo
        .register(&WorkerBuilder::new().with_id("worker-1").build())
        .await
        .unwrap();

    let mgr = manager(state_repo.clone(), task_repo, worker_repo);
    let state = mgr.restore().await.unwrap();

    assert_eq!(state.pending_tasks, 2);
    assert_eq!(state.running_tasks, 0);
    assert_eq!(state.completed_tasks, 1);
    assert_eq!(state.active_workers, 1);
}

#[tokio::test]
async fn test_restore_rejects_incompatible_major_version() {
    let mut snapshot = OrchestratorState::initial(INSTANCE.to_string(), serde_json::json!({}));
    snapshot.schema_version = "2.0".to_string();
    let state_repo = MockStateRepository::with_state(snapshot);

    let mgr = manager(
        state_repo,
        MockTaskRepository::new(),
        MockWorkerRepository::new(),
    );

    // 主版本不兼容必须硬失败，不能静默重置
    let result = mgr.restore().await;
    assert!(matches!(
        result,
        Err(OrchestratorError::IncompatibleStateVersion { .. })
    ));
}

#[tokio::test]
async fn test_restore_accepts_compatible_minor_version() {
    let mut snapshot = OrchestratorState::initial(INSTANCE.to_string(), serde_json::json!({}));
    snapshot.schema_version = "1.3".to_string();
    let state_repo = MockStateRepository::with_state(snapshot);

    let mgr = manager(
        state_repo,
        MockTaskRepository::new(),
        MockWorkerRepository::new(),
    );

    let state = mgr.restore().await.unwrap();
    // 恢复后快照写回当前版本
    assert_eq!(
        state.schema_version,
        orchestrator_core::models::STATE_SCHEMA_VERSION
    );
}

#[tokio::test]
async fn test_restore_strips_stale_workers_and_requeues_their_tasks() {
    let now = Utc::now();
    let state_repo = MockStateRepository::new();

    let task_repo = MockTaskRepository::with_tasks(vec![TaskBuilder::new()
        .with_id(10)
        .with_status(TaskStatus::Running)
        .with_assigned_worker("worker-1")
        .with_started_at(now - Duration::minutes(3))
        .build()]);

    let worker_repo = MockWorkerRepository::new();
    worker_repo
        .register(
            &WorkerBuilder::new()
                .with_id("worker-1")
                .with_current_task(10)
                .with_last_heartbeat(now - Duration::seconds(600))
                .build(),
        )
        .await
        .unwrap();

    let mgr = manager(state_repo, task_repo.clone(), worker_repo.clone());
    let state = mgr.restore().await.unwrap();

    // 过期Worker被标记离线，其任务重新入队
    let worker = worker_repo.get_by_id("worker-1").await.unwrap().unwrap();
    assert_eq!(worker.status, WorkerStatus::Offline);
    assert_eq!(worker.current_task, None);

    let task = task_repo.get_by_id(10).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    // 对账后的计数反映重新入队的结果
    assert_eq!(state.pending_tasks, 1);
    assert_eq!(state.running_tasks, 0);
    assert_eq!(state.active_workers, 0);
}

#[tokio::test]
async fn test_shutdown_persists_final_snapshot() {
    let state_repo = MockStateRepository::new();
    let mgr = manager(
        state_repo.clone(),
        MockTaskRepository::new(),
        MockWorkerRepository::new(),
    );

    mgr.restore().await.unwrap();
    mgr.shutdown().await.unwrap();

    let stored = state_repo.load(INSTANCE).await.unwrap().unwrap();
    assert_eq!(stored.status, OrchestratorStatus::ShuttingDown);
}

#[tokio::test]
async fn test_persist_snapshot_uses_live_counts() {
    let state_repo = MockStateRepository::new();
    let task_repo = MockTaskRepository::new();
    let mgr = manager(
        state_repo.clone(),
        task_repo.clone(),
        MockWorkerRepository::new(),
    );

    task_repo
        .create(&TaskBuilder::new().build())
        .await
        .unwrap();

    let state = mgr
        .persist_snapshot(OrchestratorStatus::Running)
        .await
        .unwrap();
    assert_eq!(state.pending_tasks, 1);

    let stored = state_repo.load(INSTANCE).await.unwrap().unwrap();
    assert_eq!(stored.pending_tasks, 1);
}
