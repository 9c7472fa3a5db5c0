use std::sync::Arc;

use orchestrator_core::{
    events::EventBus,
    models::{DependencyKind, TaskError, TaskErrorKind, TaskStatus},
    traits::{DependencyRepository, HistoryRepository, TaskRepository, WorkerRepository},
    OrchestratorError,
};
use orchestrator_engine::{TaskQueue, TaskQueueConfig};
use orchestrator_infrastructure::TransactionManager;
use orchestrator_testing_utils::{
    MockDependencyRepository, MockHistoryRepository, MockTaskRepository, MockWorkerRepository,
    WorkerBuilder,
};

struct Harness {
    task_repo: MockTaskRepository,
    worker_repo: MockWorkerRepository,
    dependency_repo: MockDependencyRepository,
    history_repo: MockHistoryRepository,
    queue: TaskQueue,
}

fn harness() -> Harness {
    let task_repo = MockTaskRepository::new();
    let worker_repo = MockWorkerRepository::new();
    let dependency_repo = MockDependencyRepository::new();
    let history_repo = MockHistoryRepository::new();

    let queue = TaskQueue::new(
        Arc::new(task_repo.clone()),
        Arc::new(worker_repo.clone()),
        Arc::new(dependency_repo.clone()),
        Arc::new(history_repo.clone()),
        EventBus::new(64),
        Arc::new(TransactionManager::new(None)),
        Some(TaskQueueConfig::default()),
    );

    Harness {
        task_repo,
        worker_repo,
        dependency_repo,
        history_repo,
        queue,
    }
}

#[tokio::test]
async fn test_create_task_starts_pending() {
    let h = harness();

    let task = h
        .queue
        .create_task("build", serde_json::json!({"repo": "demo"}), 5, 2, 300)
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, 5);
    assert_eq!(task.max_retries, 2);
    assert!(task.assigned_worker.is_none());

    // 创建事件写入历史
    let history = h.history_repo.list_for_task(task.id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_create_task_rejects_invalid_input() {
    let h = harness();

    let result = h
        .queue
        .create_task("", serde_json::json!({}), 0, 0, 300)
        .await;
    assert!(matches!(
        result,
        Err(OrchestratorError::InvalidTaskParams(_))
    ));

    let result = h
        .queue
        .create_task("   ", serde_json::json!({}), 0, 0, 300)
        .await;
    assert!(matches!(
        result,
        Err(OrchestratorError::InvalidTaskParams(_))
    ));

    let result = h
        .queue
        .create_task("build", serde_json::json!({}), 0, -1, 300)
        .await;
    assert!(matches!(
        result,
        Err(OrchestratorError::InvalidTaskParams(_))
    ));

    let result = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 0)
        .await;
    assert!(matches!(
        result,
        Err(OrchestratorError::InvalidTaskParams(_))
    ));

    assert_eq!(h.task_repo.count(), 0);
}

#[tokio::test]
async fn test_assign_task_happy_path() {
    let h = harness();
    h.worker_repo
        .register(&WorkerBuilder::new().with_id("worker-1").build())
        .await
        .unwrap();

    let task = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();

    let assigned = h.queue.assign_task(task.id, "worker-1").await.unwrap();
    assert_eq!(assigned.status, TaskStatus::Assigned);
    assert_eq!(assigned.assigned_worker.as_deref(), Some("worker-1"));
    assert!(assigned.assigned_at.is_some());

    let worker = h.worker_repo.get_by_id("worker-1").await.unwrap().unwrap();
    assert_eq!(worker.current_task, Some(task.id));
}

#[tokio::test]
async fn test_assign_task_twice_returns_already_assigned() {
    let h = harness();
    h.worker_repo
        .register(
            &WorkerBuilder::new()
                .with_id("worker-1")
                .with_name("w1")
                .build(),
        )
        .await
        .unwrap();
    h.worker_repo
        .register(
            &WorkerBuilder::new()
                .with_id("worker-2")
                .with_name("w2")
                .build(),
        )
        .await
        .unwrap();

    let task = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();

    h.queue.assign_task(task.id, "worker-1").await.unwrap();
    let result = h.queue.assign_task(task.id, "worker-2").await;

    match result {
        Err(OrchestratorError::TaskAlreadyAssigned { id, worker_id }) => {
            assert_eq!(id, task.id);
            assert_eq!(worker_id, "worker-1");
        }
        other => panic!("期望 TaskAlreadyAssigned，实际: {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_assignment_exactly_one_winner() {
    let h = harness();
    let worker_count = 8;

    for i in 0..worker_count {
        h.worker_repo
            .register(
                &WorkerBuilder::new()
                    .with_id(&format!("worker-{i}"))
                    .with_name(&format!("w{i}"))
                    .build(),
            )
            .await
            .unwrap();
    }

    let task = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();

    let queue = Arc::new(h.queue);
    let mut handles = Vec::new();
    for i in 0..worker_count {
        let queue = Arc::clone(&queue);
        let task_id = task.id;
        handles.push(tokio::spawn(async move {
            queue.assign_task(task_id, &format!("worker-{i}")).await
        }));
    }

    let mut winners = 0;
    let mut losers = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(OrchestratorError::TaskAlreadyAssigned { .. }) => losers += 1,
            Err(e) => panic!("意外错误: {e}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(losers, worker_count - 1);
}

#[tokio::test]
async fn test_status_transition_validation() {
    let h = harness();
    h.worker_repo
        .register(&WorkerBuilder::new().with_id("worker-1").build())
        .await
        .unwrap();

    let task = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();

    // PENDING不能直接进入RUNNING
    let result = h.queue.update_status(task.id, TaskStatus::Running).await;
    assert!(matches!(
        result,
        Err(OrchestratorError::InvalidStateTransition { .. })
    ));

    h.queue.assign_task(task.id, "worker-1").await.unwrap();
    let running = h
        .queue
        .update_status(task.id, TaskStatus::Running)
        .await
        .unwrap();
    assert!(running.started_at.is_some());

    let completed = h
        .queue
        .complete_task(task.id, serde_json::json!({"ok": true}))
        .await
        .unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert!(completed.assigned_worker.is_none());

    // 终态不可再转换
    let result = h.queue.update_status(task.id, TaskStatus::Pending).await;
    assert!(matches!(
        result,
        Err(OrchestratorError::InvalidStateTransition { .. })
    ));

    // Worker的当前任务引用已清除
    let worker = h.worker_repo.get_by_id("worker-1").await.unwrap().unwrap();
    assert_eq!(worker.current_task, None);
}

#[tokio::test]
async fn test_fail_task_stamps_error() {
    let h = harness();
    h.worker_repo
        .register(&WorkerBuilder::new().with_id("worker-1").build())
        .await
        .unwrap();

    let task = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();
    h.queue.assign_task(task.id, "worker-1").await.unwrap();
    h.queue
        .update_status(task.id, TaskStatus::Running)
        .await
        .unwrap();

    let failed = h
        .queue
        .fail_task(task.id, TaskError::execution_failed("编译失败"))
        .await
        .unwrap();

    assert_eq!(failed.status, TaskStatus::Failed);
    let error = failed.error.unwrap();
    assert_eq!(error.kind, TaskErrorKind::ExecutionFailed);
    assert!(failed.completed_at.is_some());
}

#[tokio::test]
async fn test_cancel_from_any_non_terminal_state() {
    let h = harness();

    let task = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();

    let cancelled = h.queue.cancel_task(task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    // 已取消的任务不能再取消
    let result = h.queue.cancel_task(task.id).await;
    assert!(matches!(
        result,
        Err(OrchestratorError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn test_get_next_task_priority_and_tiebreak() {
    let h = harness();

    let low = h
        .queue
        .create_task("build", serde_json::json!({}), 1, 0, 300)
        .await
        .unwrap();
    let high_older = h
        .queue
        .create_task("build", serde_json::json!({}), 9, 0, 300)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let _high_newer = h
        .queue
        .create_task("build", serde_json::json!({}), 9, 0, 300)
        .await
        .unwrap();

    let capabilities = vec!["build".to_string()];
    let next = h.queue.get_next_task(&capabilities).await.unwrap().unwrap();
    // 最高优先级中创建最早者胜出
    assert_eq!(next.id, high_older.id);

    // 类型不匹配时不返回任何任务
    let other_caps = vec!["deploy".to_string()];
    assert!(h.queue.get_next_task(&other_caps).await.unwrap().is_none());

    let _ = low;
}

#[tokio::test]
async fn test_dependency_gating_scenario() {
    let h = harness();
    h.worker_repo
        .register(&WorkerBuilder::new().with_id("worker-1").build())
        .await
        .unwrap();

    let task_a = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();
    let task_b = h
        .queue
        .create_task("build", serde_json::json!({}), 5, 0, 300)
        .await
        .unwrap();

    h.queue
        .add_dependency(task_b.id, task_a.id, DependencyKind::MustSucceed)
        .await
        .unwrap();

    let capabilities = vec!["build".to_string()];

    // A尚未完成时，即使B优先级更高也不能被取出
    let next = h.queue.get_next_task(&capabilities).await.unwrap().unwrap();
    assert_eq!(next.id, task_a.id);

    // A运行中时B仍不可用
    h.queue.assign_task(task_a.id, "worker-1").await.unwrap();
    h.queue
        .update_status(task_a.id, TaskStatus::Running)
        .await
        .unwrap();
    assert!(h.queue.get_next_task(&capabilities).await.unwrap().is_none());

    // 直接分配B也被拒绝
    let result = h.queue.assign_task(task_b.id, "worker-1").await;
    assert!(matches!(
        result,
        Err(OrchestratorError::DependencyNotSatisfied { .. })
    ));

    // A完成后B变为可用
    h.queue
        .complete_task(task_a.id, serde_json::json!({}))
        .await
        .unwrap();
    let next = h.queue.get_next_task(&capabilities).await.unwrap().unwrap();
    assert_eq!(next.id, task_b.id);
}

#[tokio::test]
async fn test_must_fail_dependency() {
    let h = harness();
    h.worker_repo
        .register(&WorkerBuilder::new().with_id("worker-1").build())
        .await
        .unwrap();

    let task_a = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();
    let cleanup = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();

    h.queue
        .add_dependency(cleanup.id, task_a.id, DependencyKind::MustFail)
        .await
        .unwrap();

    // A成功完成，must-fail依赖永远不满足
    h.queue.assign_task(task_a.id, "worker-1").await.unwrap();
    h.queue
        .update_status(task_a.id, TaskStatus::Running)
        .await
        .unwrap();
    h.queue
        .complete_task(task_a.id, serde_json::json!({}))
        .await
        .unwrap();

    assert!(!h.queue.dependencies_satisfied(cleanup.id).await.unwrap());
}

#[tokio::test]
async fn test_self_dependency_rejected() {
    let h = harness();

    let task = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();

    let result = h
        .queue
        .add_dependency(task.id, task.id, DependencyKind::MustSucceed)
        .await;
    assert!(matches!(
        result,
        Err(OrchestratorError::InvalidDependency { .. })
    ));
    assert_eq!(h.dependency_repo.count(), 0);
}

#[tokio::test]
async fn test_cycle_rejection_leaves_graph_unchanged() {
    let h = harness();

    let task_a = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();
    let task_b = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();
    let task_c = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();

    // A -> B -> C
    h.queue
        .add_dependency(task_a.id, task_b.id, DependencyKind::MustSucceed)
        .await
        .unwrap();
    h.queue
        .add_dependency(task_b.id, task_c.id, DependencyKind::MustSucceed)
        .await
        .unwrap();

    let edges_before = h.dependency_repo.list_all().await.unwrap();

    // C -> A 闭合成环，必须被拒绝
    let result = h
        .queue
        .add_dependency(task_c.id, task_a.id, DependencyKind::MustSucceed)
        .await;
    assert!(matches!(result, Err(OrchestratorError::CircularDependency)));

    // 依赖集未发生任何变化
    let edges_after = h.dependency_repo.list_all().await.unwrap();
    assert_eq!(edges_before.len(), edges_after.len());
    for (before, after) in edges_before.iter().zip(edges_after.iter()) {
        assert_eq!(before.id, after.id);
        assert_eq!(before.task_id, after.task_id);
        assert_eq!(before.depends_on_task_id, after.depends_on_task_id);
    }
}

#[tokio::test]
async fn test_assign_rejects_incapable_worker() {
    let h = harness();
    h.worker_repo
        .register(
            &WorkerBuilder::new()
                .with_id("worker-1")
                .with_capabilities(vec!["deploy"])
                .build(),
        )
        .await
        .unwrap();

    let task = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();

    let result = h.queue.assign_task(task.id, "worker-1").await;
    assert!(matches!(
        result,
        Err(OrchestratorError::ValidationError(_))
    ));

    // 任务保持PENDING
    let task = h.task_repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_assign_unknown_task_or_worker() {
    let h = harness();
    h.worker_repo
        .register(&WorkerBuilder::new().with_id("worker-1").build())
        .await
        .unwrap();

    let result = h.queue.assign_task(999, "worker-1").await;
    assert!(matches!(result, Err(OrchestratorError::TaskNotFound { .. })));

    let task = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();
    let result = h.queue.assign_task(task.id, "ghost").await;
    assert!(matches!(
        result,
        Err(OrchestratorError::WorkerNotFound { .. })
    ));
}

#[tokio::test]
async fn test_stale_worker_cannot_take_tasks() {
    let h = harness();
    let stale_heartbeat = chrono::Utc::now() - chrono::Duration::seconds(600);
    h.worker_repo
        .register(
            &WorkerBuilder::new()
                .with_id("worker-1")
                .with_last_heartbeat(stale_heartbeat)
                .build(),
        )
        .await
        .unwrap();

    let task = h
        .queue
        .create_task("build", serde_json::json!({}), 0, 0, 300)
        .await
        .unwrap();

    // 存储状态仍为在线，但心跳超期的Worker对调度不可信
    let result = h.queue.assign_task(task.id, "worker-1").await;
    assert!(matches!(
        result,
        Err(OrchestratorError::ValidationError(_))
    ));
}
