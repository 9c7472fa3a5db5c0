use std::sync::Arc;

use chrono::{Duration, Utc};
use orchestrator_core::{
    events::EventBus,
    models::{BackupType, TaskStatus},
    traits::TaskRepository,
    OrchestratorError,
};
use orchestrator_engine::{
    BackupConfig, BackupManager, ConsistencyChecker, ConsistencyConfig,
    DisasterRecoveryCoordinator, OrchestratorStateManager, RecoveryConfig, RecoveryManager,
    RecoveryPlan, RecoveryStep, RecoveryStepType, StateManagerConfig,
};
use orchestrator_testing_utils::{
    MockBackupRepository, MockDependencyRepository, MockHistoryRepository, MockStateRepository,
    MockTaskRepository, MockWorkerRepository, TaskBuilder,
};

struct Harness {
    task_repo: MockTaskRepository,
    coordinator: DisasterRecoveryCoordinator,
}

fn harness(tasks: Vec<orchestrator_core::models::Task>, dir: &std::path::Path) -> Harness {
    let task_repo = MockTaskRepository::with_tasks(tasks);
    let worker_repo = MockWorkerRepository::new();
    let dependency_repo = MockDependencyRepository::new();
    let history_repo = MockHistoryRepository::new();
    let backup_repo = MockBackupRepository::new();
    let state_repo = MockStateRepository::new();
    let event_bus = EventBus::new(64);

    let backup_manager = Arc::new(BackupManager::new(
        Arc::new(task_repo.clone()),
        Arc::new(worker_repo.clone()),
        Arc::new(dependency_repo.clone()),
        Arc::new(history_repo.clone()),
        Arc::new(backup_repo),
        event_bus.clone(),
        Some(BackupConfig {
            directory: dir.to_path_buf(),
            retention_days: 30,
        }),
    ));

    let recovery_manager = Arc::new(RecoveryManager::new(
        Arc::new(task_repo.clone()),
        Arc::new(worker_repo.clone()),
        Arc::new(history_repo.clone()),
        event_bus.clone(),
        Some(RecoveryConfig::default()),
    ));

    let consistency_checker = Arc::new(ConsistencyChecker::new(
        Arc::new(task_repo.clone()),
        Arc::new(worker_repo.clone()),
        Arc::new(dependency_repo),
        event_bus.clone(),
        Some(ConsistencyConfig::default()),
    ));

    let state_manager = Arc::new(OrchestratorStateManager::new(
        Arc::new(state_repo),
        Arc::new(task_repo.clone()),
        Arc::new(worker_repo),
        StateManagerConfig {
            instance_id: "orch-dr".to_string(),
            worker_liveness_timeout_seconds: 90,
        },
        serde_json::json!({}),
    ));

    let coordinator = DisasterRecoveryCoordinator::new(
        backup_manager,
        recovery_manager,
        consistency_checker,
        state_manager,
    );

    Harness {
        task_repo,
        coordinator,
    }
}

fn step(name: &str, step_type: RecoveryStepType, critical: bool) -> RecoveryStep {
    RecoveryStep {
        name: name.to_string(),
        step_type,
        critical,
    }
}

#[tokio::test]
async fn test_full_plan_executes_all_steps() {
    let dir = tempfile::tempdir().unwrap();
    let stale = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Assigned)
        .with_assigned_worker("ghost")
        .with_assigned_at(Utc::now() - Duration::minutes(30))
        .build();
    let h = harness(vec![stale], dir.path());

    let plan = RecoveryPlan {
        id: "plan-1".to_string(),
        name: "standard-recovery".to_string(),
        steps: vec![
            step("snapshot", RecoveryStepType::Backup(BackupType::Full), true),
            step("requeue-stale", RecoveryStepType::TaskRecovery, true),
            step("rebuild-state", RecoveryStepType::StateRecovery, true),
            step("validate", RecoveryStepType::Validation, true),
            step(
                "notify",
                RecoveryStepType::Notification {
                    message: "恢复完成".to_string(),
                },
                false,
            ),
        ],
    };

    let report = h.coordinator.execute_plan(&plan).await.unwrap();
    assert!(report.completed);
    assert!(!report.cancelled);
    assert!(report.aborted_at.is_none());
    assert_eq!(report.outcomes.len(), 5);
    assert!(report.outcomes.iter().all(|o| o.succeeded));

    // 任务恢复步骤确实清理了滞留任务
    let task = h.task_repo.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_critical_step_failure_aborts_plan() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(vec![], dir.path());

    let plan = RecoveryPlan {
        id: "plan-2".to_string(),
        name: "doomed".to_string(),
        steps: vec![
            step("snapshot", RecoveryStepType::Backup(BackupType::Full), true),
            step(
                "restore-missing",
                RecoveryStepType::Restore {
                    backup_id: "does-not-exist".to_string(),
                },
                true,
            ),
            step("never-reached", RecoveryStepType::TaskRecovery, true),
        ],
    };

    let report = h.coordinator.execute_plan(&plan).await.unwrap();
    assert!(!report.completed);
    assert_eq!(report.aborted_at.as_deref(), Some("restore-missing"));
    // 中止后不再执行后续步骤
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.outcomes[0].succeeded);
    assert!(!report.outcomes[1].succeeded);
}

#[tokio::test]
async fn test_non_critical_failure_continues_plan() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(vec![], dir.path());

    let plan = RecoveryPlan {
        id: "plan-3".to_string(),
        name: "resilient".to_string(),
        steps: vec![
            step(
                "optional-restore",
                RecoveryStepType::Restore {
                    backup_id: "does-not-exist".to_string(),
                },
                false,
            ),
            step("requeue", RecoveryStepType::TaskRecovery, true),
        ],
    };

    let report = h.coordinator.execute_plan(&plan).await.unwrap();
    assert!(report.completed);
    assert_eq!(report.outcomes.len(), 2);
    assert!(!report.outcomes[0].succeeded);
    assert!(report.outcomes[1].succeeded);
}

#[tokio::test]
async fn test_second_concurrent_plan_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(vec![TaskBuilder::new().build()], dir.path());
    let coordinator = Arc::new(h.coordinator);

    // 足够多的备份步骤保证第一个计划在第二个计划尝试启动时仍持有执行权
    let busy_plan = RecoveryPlan {
        id: "plan-busy".to_string(),
        name: "busy".to_string(),
        steps: (0..16)
            .map(|i| {
                step(
                    &format!("snapshot-{i}"),
                    RecoveryStepType::Backup(BackupType::Full),
                    true,
                )
            })
            .collect(),
    };
    let quick_plan = RecoveryPlan {
        id: "plan-quick".to_string(),
        name: "quick".to_string(),
        steps: vec![step("requeue", RecoveryStepType::TaskRecovery, true)],
    };

    let first = coordinator.execute_plan(&busy_plan);
    let second = coordinator.execute_plan(&quick_plan);
    let (first_result, second_result) = tokio::join!(first, second);

    let rejected = [&first_result, &second_result]
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(OrchestratorError::RecoveryPlanAlreadyRunning)
            )
        })
        .count();
    let succeeded = [&first_result, &second_result]
        .iter()
        .filter(|r| r.is_ok())
        .count();

    assert_eq!(rejected, 1);
    assert_eq!(succeeded, 1);

    // 上一个计划结束后可以再次执行
    let report = coordinator.execute_plan(&quick_plan).await.unwrap();
    assert!(report.completed);
}

#[tokio::test]
async fn test_validation_step_fails_on_critical_issues() {
    let dir = tempfile::tempdir().unwrap();
    // RUNNING任务没有Worker引用是critical级别的不一致
    let broken = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .with_started_at(Utc::now())
        .build();
    let h = harness(vec![broken], dir.path());

    let plan = RecoveryPlan {
        id: "plan-4".to_string(),
        name: "validate-only".to_string(),
        steps: vec![step("validate", RecoveryStepType::Validation, true)],
    };

    let report = h.coordinator.execute_plan(&plan).await.unwrap();
    assert!(!report.completed);
    assert_eq!(report.aborted_at.as_deref(), Some("validate"));
}
