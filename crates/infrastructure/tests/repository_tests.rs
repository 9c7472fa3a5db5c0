use std::sync::Arc;

use chrono::{Duration, Utc};
use orchestrator_core::{
    models::{
        BackupRecord, BackupType, DependencyKind, HistoryEvent, OrchestratorState,
        OrchestratorStatus, Task, TaskDependency, TaskError, TaskFilter, TaskHistoryEntry,
        TaskStatus, Worker, WorkerRegistration, WorkerStatus,
    },
    traits::{
        BackupRepository, DependencyRepository, HistoryRepository, StateRepository,
        TaskRepository, WorkerRepository,
    },
    OrchestratorError,
};
use orchestrator_infrastructure::database::schema::init_sqlite_schema;
use orchestrator_infrastructure::database::sqlite::{
    SqliteBackupRepository, SqliteDependencyRepository, SqliteHistoryRepository,
    SqliteStateRepository, SqliteTaskRepository, SqliteWorkerRepository,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// 单连接内存库：连接池中每个连接都是独立的内存数据库，
/// 所以测试必须固定为1个连接。
async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_sqlite_schema(&pool).await.unwrap();
    pool
}

fn sample_task(task_type: &str) -> Task {
    Task::new(
        task_type.to_string(),
        serde_json::json!({"repo": "demo", "branch": "main"}),
        5,
        2,
        300,
    )
}

fn sample_worker(id: &str, name: &str) -> Worker {
    Worker::new(WorkerRegistration {
        worker_id: id.to_string(),
        name: name.to_string(),
        kind: "container".to_string(),
        capabilities: vec!["build".to_string(), "test".to_string()],
        max_concurrent_tasks: 2,
        resources: serde_json::json!({"cpu": 4}),
    })
}

#[tokio::test]
async fn test_task_create_and_get_roundtrip() {
    let pool = memory_pool().await;
    let repo = SqliteTaskRepository::new(pool);

    let created = repo.create(&sample_task("build")).await.unwrap();
    assert!(created.id > 0);

    let loaded = repo.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(loaded.task_type, "build");
    assert_eq!(loaded.status, TaskStatus::Pending);
    assert_eq!(loaded.priority, 5);
    assert_eq!(loaded.payload["repo"], "demo");
    assert_eq!(loaded.max_retries, 2);
    assert!(loaded.error.is_none());
    assert!(loaded.assigned_worker.is_none());

    assert!(repo.get_by_id(9999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_task_error_json_roundtrip() {
    let pool = memory_pool().await;
    let repo = SqliteTaskRepository::new(pool);

    let mut task = sample_task("build");
    task.status = TaskStatus::Failed;
    task.error = Some(TaskError::execution_failed("磁盘空间不足"));
    let created = repo.create(&task).await.unwrap();

    let loaded = repo.get_by_id(created.id).await.unwrap().unwrap();
    let error = loaded.error.unwrap();
    assert_eq!(error.message, "磁盘空间不足");
}

#[tokio::test]
async fn test_try_assign_is_conditional() {
    let pool = memory_pool().await;
    let repo = SqliteTaskRepository::new(pool);

    let task = repo.create(&sample_task("build")).await.unwrap();

    assert!(repo.try_assign(task.id, "worker-1").await.unwrap());
    // 第二次分配守卫未命中
    assert!(!repo.try_assign(task.id, "worker-2").await.unwrap());

    let loaded = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Assigned);
    assert_eq!(loaded.assigned_worker.as_deref(), Some("worker-1"));
    assert!(loaded.assigned_at.is_some());
}

#[tokio::test]
async fn test_concurrent_try_assign_single_winner() {
    let pool = memory_pool().await;
    let repo = Arc::new(SqliteTaskRepository::new(pool));

    let task = repo.create(&sample_task("build")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let repo = Arc::clone(&repo);
        let task_id = task.id;
        handles.push(tokio::spawn(async move {
            repo.try_assign(task_id, &format!("worker-{i}")).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_ready_candidates_ordering() {
    let pool = memory_pool().await;
    let repo = SqliteTaskRepository::new(pool);

    let mut low = sample_task("build");
    low.priority = 1;
    let mut high = sample_task("build");
    high.priority = 9;
    let mut other_type = sample_task("deploy");
    other_type.priority = 99;

    repo.create(&low).await.unwrap();
    let high = repo.create(&high).await.unwrap();
    repo.create(&other_type).await.unwrap();

    let capabilities = vec!["build".to_string()];
    let candidates = repo.get_ready_candidates(&capabilities, 10).await.unwrap();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].id, high.id);

    // 空能力集直接返回空
    let none = repo.get_ready_candidates(&[], 10).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_get_stale_by_status() {
    let pool = memory_pool().await;
    let repo = SqliteTaskRepository::new(pool);
    let now = Utc::now();

    let mut stale = sample_task("build");
    stale.status = TaskStatus::Assigned;
    stale.assigned_worker = Some("worker-1".to_string());
    stale.assigned_at = Some(now - Duration::minutes(10));
    let stale = repo.create(&stale).await.unwrap();

    let mut fresh = sample_task("build");
    fresh.status = TaskStatus::Assigned;
    fresh.assigned_worker = Some("worker-2".to_string());
    fresh.assigned_at = Some(now);
    repo.create(&fresh).await.unwrap();

    let cutoff = now - Duration::minutes(5);
    let found = repo.get_stale(TaskStatus::Assigned, cutoff).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, stale.id);

    // PENDING不支持滞留查询
    let result = repo.get_stale(TaskStatus::Pending, cutoff).await;
    assert!(matches!(
        result,
        Err(OrchestratorError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_reset_to_pending_guarded() {
    let pool = memory_pool().await;
    let repo = SqliteTaskRepository::new(pool);

    let mut task = sample_task("build");
    task.status = TaskStatus::Running;
    task.assigned_worker = Some("worker-1".to_string());
    task.assigned_at = Some(Utc::now());
    task.started_at = Some(Utc::now());
    task.result = Some(serde_json::json!({"partial": true}));
    let task = repo.create(&task).await.unwrap();

    // 期望状态不匹配时不做任何变更
    assert!(!repo
        .reset_to_pending(task.id, TaskStatus::Assigned, false)
        .await
        .unwrap());

    assert!(repo
        .reset_to_pending(task.id, TaskStatus::Running, true)
        .await
        .unwrap());

    let loaded = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Pending);
    assert!(loaded.assigned_worker.is_none());
    assert!(loaded.started_at.is_none());
    assert!(loaded.result.is_none());
}

#[tokio::test]
async fn test_retry_from_timeout_respects_bound() {
    let pool = memory_pool().await;
    let repo = SqliteTaskRepository::new(pool);

    let mut task = sample_task("build");
    task.status = TaskStatus::Timeout;
    task.retry_count = 1;
    task.max_retries = 2;
    let task = repo.create(&task).await.unwrap();

    assert!(repo.retry_from_timeout(task.id).await.unwrap());
    let loaded = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Pending);
    assert_eq!(loaded.retry_count, 2);

    // 额度耗尽后守卫不再命中
    let mut exhausted = loaded;
    exhausted.status = TaskStatus::Timeout;
    repo.update(&exhausted).await.unwrap();
    assert!(!repo.retry_from_timeout(task.id).await.unwrap());

    // 改为终态失败
    let error = TaskError::max_retries_exceeded(2);
    assert!(repo
        .fail_with_error(task.id, TaskStatus::Timeout, &error)
        .await
        .unwrap());
    let failed = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.completed_at.is_some());
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn test_mark_timeout_guarded() {
    let pool = memory_pool().await;
    let repo = SqliteTaskRepository::new(pool);

    let mut task = sample_task("build");
    task.status = TaskStatus::Running;
    task.started_at = Some(Utc::now());
    let task = repo.create(&task).await.unwrap();

    assert!(repo.mark_timeout(task.id).await.unwrap());
    assert!(!repo.mark_timeout(task.id).await.unwrap());

    let loaded = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Timeout);
}

#[tokio::test]
async fn test_list_with_filter_and_counts() {
    let pool = memory_pool().await;
    let repo = SqliteTaskRepository::new(pool);

    repo.create(&sample_task("build")).await.unwrap();
    repo.create(&sample_task("build")).await.unwrap();
    let mut done = sample_task("deploy");
    done.status = TaskStatus::Completed;
    repo.create(&done).await.unwrap();

    let filter = TaskFilter {
        status: Some(TaskStatus::Pending),
        ..Default::default()
    };
    assert_eq!(repo.list(&filter).await.unwrap().len(), 2);

    let filter = TaskFilter {
        task_type: Some("deploy".to_string()),
        ..Default::default()
    };
    assert_eq!(repo.list(&filter).await.unwrap().len(), 1);

    let filter = TaskFilter {
        limit: Some(1),
        ..Default::default()
    };
    assert_eq!(repo.list(&filter).await.unwrap().len(), 1);

    assert_eq!(repo.count_by_status(TaskStatus::Pending).await.unwrap(), 2);
    assert_eq!(
        repo.count_by_status(TaskStatus::Completed).await.unwrap(),
        1
    );
    assert_eq!(repo.count_by_status(TaskStatus::Failed).await.unwrap(), 0);
}

#[tokio::test]
async fn test_snapshot_insert_preserves_ids() {
    let pool = memory_pool().await;
    let repo = SqliteTaskRepository::new(pool);

    let mut task = sample_task("build");
    task.id = 42;
    repo.insert_snapshot(&task).await.unwrap();

    let loaded = repo.get_by_id(42).await.unwrap().unwrap();
    assert_eq!(loaded.id, 42);

    repo.clear_all().await.unwrap();
    assert!(repo.get_by_id(42).await.unwrap().is_none());
}

#[tokio::test]
async fn test_worker_register_and_duplicate_name() {
    let pool = memory_pool().await;
    let repo = SqliteWorkerRepository::new(pool);

    repo.register(&sample_worker("worker-1", "builder-1"))
        .await
        .unwrap();

    let loaded = repo.get_by_id("worker-1").await.unwrap().unwrap();
    assert_eq!(loaded.name, "builder-1");
    assert_eq!(loaded.capabilities, vec!["build", "test"]);
    assert_eq!(loaded.status, WorkerStatus::Online);

    let by_name = repo.get_by_name("builder-1").await.unwrap();
    assert!(by_name.is_some());

    // 名称唯一约束映射为类型化错误
    let result = repo.register(&sample_worker("worker-2", "builder-1")).await;
    assert!(matches!(
        result,
        Err(OrchestratorError::WorkerAlreadyRegistered { .. })
    ));
}

#[tokio::test]
async fn test_worker_heartbeat_and_current_task() {
    let pool = memory_pool().await;
    let repo = SqliteWorkerRepository::new(pool);

    repo.register(&sample_worker("worker-1", "builder-1"))
        .await
        .unwrap();

    let ts = Utc::now() + Duration::seconds(10);
    repo.update_heartbeat("worker-1", WorkerStatus::Busy, ts)
        .await
        .unwrap();
    repo.set_current_task("worker-1", Some(7)).await.unwrap();

    let loaded = repo.get_by_id("worker-1").await.unwrap().unwrap();
    assert_eq!(loaded.status, WorkerStatus::Busy);
    assert_eq!(loaded.current_task, Some(7));

    repo.set_current_task("worker-1", None).await.unwrap();
    let loaded = repo.get_by_id("worker-1").await.unwrap().unwrap();
    assert_eq!(loaded.current_task, None);

    let result = repo
        .update_heartbeat("ghost", WorkerStatus::Online, Utc::now())
        .await;
    assert!(matches!(
        result,
        Err(OrchestratorError::WorkerNotFound { .. })
    ));
}

#[tokio::test]
async fn test_worker_active_since() {
    let pool = memory_pool().await;
    let repo = SqliteWorkerRepository::new(pool);
    let now = Utc::now();

    repo.register(&sample_worker("fresh", "w1")).await.unwrap();
    repo.register(&sample_worker("stale", "w2")).await.unwrap();
    repo.update_heartbeat("stale", WorkerStatus::Online, now - Duration::minutes(10))
        .await
        .unwrap();

    let cutoff = now - Duration::seconds(90);
    let active = repo.get_active_since(cutoff).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "fresh");
}

#[tokio::test]
async fn test_dependency_repository() {
    let pool = memory_pool().await;
    let task_repo = SqliteTaskRepository::new(pool.clone());
    let repo = SqliteDependencyRepository::new(pool);

    // 外键约束要求被依赖的任务先存在
    for _ in 0..3 {
        task_repo.create(&sample_task("build")).await.unwrap();
    }

    let created = repo
        .add(&TaskDependency::new(2, 1, DependencyKind::MustSucceed))
        .await
        .unwrap();
    assert!(created.id > 0);
    assert_eq!(created.kind, DependencyKind::MustSucceed);

    repo.add(&TaskDependency::new(3, 1, DependencyKind::MustComplete))
        .await
        .unwrap();

    let for_task = repo.list_for_task(2).await.unwrap();
    assert_eq!(for_task.len(), 1);
    assert_eq!(for_task[0].depends_on_task_id, 1);

    let all = repo.list_all().await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_history_append_only() {
    let pool = memory_pool().await;
    let repo = SqliteHistoryRepository::new(pool);

    repo.append(&TaskHistoryEntry::new(
        1,
        HistoryEvent::Created,
        None,
        serde_json::json!({"task_type": "build"}),
    ))
    .await
    .unwrap();
    repo.append(&TaskHistoryEntry::new(
        1,
        HistoryEvent::Assigned,
        Some("worker-1".to_string()),
        serde_json::json!({}),
    ))
    .await
    .unwrap();

    let entries = repo.list_for_task(1).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].event, HistoryEvent::Created);
    assert_eq!(entries[1].event, HistoryEvent::Assigned);
    assert_eq!(entries[1].worker_id.as_deref(), Some("worker-1"));
}

#[tokio::test]
async fn test_state_save_is_upsert() {
    let pool = memory_pool().await;
    let repo = SqliteStateRepository::new(pool);

    assert!(repo.load("orch-1").await.unwrap().is_none());

    let mut state = OrchestratorState::initial("orch-1".to_string(), serde_json::json!({}));
    state.pending_tasks = 3;
    repo.save(&state).await.unwrap();

    state.status = OrchestratorStatus::Running;
    state.pending_tasks = 5;
    repo.save(&state).await.unwrap();

    let loaded = repo.load("orch-1").await.unwrap().unwrap();
    assert_eq!(loaded.status, OrchestratorStatus::Running);
    assert_eq!(loaded.pending_tasks, 5);
    assert_eq!(loaded.schema_version, state.schema_version);
}

#[tokio::test]
async fn test_backup_repository_lifecycle() {
    let pool = memory_pool().await;
    let repo = SqliteBackupRepository::new(pool);

    let full = BackupRecord {
        id: "backup-full".to_string(),
        backup_type: BackupType::Full,
        location: "/tmp/backup-full.json".to_string(),
        size_bytes: 1024,
        checksum: "ab".repeat(32),
        schema_version: "1.0".to_string(),
        created_at: Utc::now() - Duration::hours(2),
        deleted_at: None,
    };
    let incremental = BackupRecord {
        id: "backup-inc".to_string(),
        backup_type: BackupType::Incremental,
        location: "/tmp/backup-inc.json".to_string(),
        size_bytes: 128,
        checksum: "cd".repeat(32),
        schema_version: "1.0".to_string(),
        created_at: Utc::now() - Duration::hours(1),
        deleted_at: None,
    };
    repo.insert(&full).await.unwrap();
    repo.insert(&incremental).await.unwrap();

    let latest_full = repo.latest_full().await.unwrap().unwrap();
    assert_eq!(latest_full.id, "backup-full");
    let latest_any = repo.latest_any().await.unwrap().unwrap();
    assert_eq!(latest_any.id, "backup-inc");

    repo.tombstone("backup-inc", Utc::now()).await.unwrap();

    let visible = repo.list(false).await.unwrap();
    assert_eq!(visible.len(), 1);
    let all = repo.list(true).await.unwrap();
    assert_eq!(all.len(), 2);

    // 墓碑后最新备份退回全量
    let latest_any = repo.latest_any().await.unwrap().unwrap();
    assert_eq!(latest_any.id, "backup-full");

    let result = repo.tombstone("ghost", Utc::now()).await;
    assert!(matches!(
        result,
        Err(OrchestratorError::BackupNotFound { .. })
    ));
}

#[tokio::test]
async fn test_get_changed_since() {
    let pool = memory_pool().await;
    let repo = SqliteTaskRepository::new(pool);

    let before = Utc::now() - Duration::seconds(1);
    repo.create(&sample_task("build")).await.unwrap();

    let changed = repo.get_changed_since(before).await.unwrap();
    assert_eq!(changed.len(), 1);

    let future = Utc::now() + Duration::hours(1);
    let changed = repo.get_changed_since(future).await.unwrap();
    assert!(changed.is_empty());
}
