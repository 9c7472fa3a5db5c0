use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use orchestrator_core::{
    events::{EngineEvent, EventBus},
    models::{
        DependencyKind, HistoryEvent, Task, TaskDependency, TaskError, TaskFilter,
        TaskHistoryEntry, TaskStatus,
    },
    traits::{DependencyRepository, HistoryRepository, TaskRepository, WorkerRepository},
    OrchestratorError, OrchestratorResult,
};
use orchestrator_infrastructure::TransactionManager;

/// 任务队列配置
#[derive(Debug, Clone)]
pub struct TaskQueueConfig {
    /// 单次调度检查的候选任务批大小
    pub candidate_batch_size: i64,
    /// Worker心跳存活阈值（秒）
    pub worker_liveness_timeout_seconds: i64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            candidate_batch_size: 32,
            worker_liveness_timeout_seconds: 90,
        }
    }
}

/// 任务队列：任务生命周期状态机与依赖排序的唯一写入方
pub struct TaskQueue {
    task_repo: Arc<dyn TaskRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    dependency_repo: Arc<dyn DependencyRepository>,
    history_repo: Arc<dyn HistoryRepository>,
    event_bus: EventBus,
    tx_manager: Arc<TransactionManager>,
    config: TaskQueueConfig,
}

impl TaskQueue {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        dependency_repo: Arc<dyn DependencyRepository>,
        history_repo: Arc<dyn HistoryRepository>,
        event_bus: EventBus,
        tx_manager: Arc<TransactionManager>,
        config: Option<TaskQueueConfig>,
    ) -> Self {
        Self {
            task_repo,
            worker_repo,
            dependency_repo,
            history_repo,
            event_bus,
            tx_manager,
            config: config.unwrap_or_default(),
        }
    }

    /// 创建新任务，初始状态为PENDING
    pub async fn create_task(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        priority: i32,
        max_retries: i32,
        timeout_seconds: i32,
    ) -> OrchestratorResult<Task> {
        if task_type.trim().is_empty() {
            return Err(OrchestratorError::invalid_params("任务类型不能为空"));
        }
        if max_retries < 0 {
            return Err(OrchestratorError::invalid_params("最大重试次数不能为负数"));
        }
        if timeout_seconds <= 0 {
            return Err(OrchestratorError::invalid_params("超时时间必须为正数"));
        }

        let task = Task::new(
            task_type.to_string(),
            payload,
            priority,
            max_retries,
            timeout_seconds,
        );

        let task_repo = Arc::clone(&self.task_repo);
        let created = self
            .tx_manager
            .execute_with_retry("create_task", || {
                let task_repo = Arc::clone(&task_repo);
                let task = task.clone();
                async move { task_repo.create(&task).await }
            })
            .await?;

        self.append_history(
            created.id,
            HistoryEvent::Created,
            None,
            serde_json::json!({ "task_type": created.task_type, "priority": created.priority }),
        )
        .await;

        self.event_bus.publish(EngineEvent::TaskCreated {
            id: Uuid::new_v4(),
            task_id: created.id,
            task_type: created.task_type.clone(),
            occurred_at: Utc::now(),
        });

        info!("创建任务成功: {}", created.entity_description());
        Ok(created)
    }

    /// 分配任务给Worker。并发分配同一任务时至多一个调用方成功，
    /// 失败方收到 TaskAlreadyAssigned。
    pub async fn assign_task(&self, task_id: i64, worker_id: &str) -> OrchestratorResult<Task> {
        let task = self
            .task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(OrchestratorError::TaskNotFound { id: task_id })?;

        let worker = self
            .worker_repo
            .get_by_id(worker_id)
            .await?
            .ok_or_else(|| OrchestratorError::worker_not_found(worker_id))?;

        let now = Utc::now();
        if !worker.can_accept_task(
            &task.task_type,
            now,
            self.config.worker_liveness_timeout_seconds,
        ) {
            return Err(OrchestratorError::validation_error(format!(
                "Worker {} 当前无法接受类型为 {} 的任务",
                worker_id, task.task_type
            )));
        }

        if !self.dependencies_satisfied(task_id).await? {
            return Err(OrchestratorError::DependencyNotSatisfied { id: task_id });
        }

        let task_repo = Arc::clone(&self.task_repo);
        let worker_id_owned = worker_id.to_string();
        let assigned = self
            .tx_manager
            .execute_with_retry("assign_task", || {
                let task_repo = Arc::clone(&task_repo);
                let worker_id = worker_id_owned.clone();
                async move { task_repo.try_assign(task_id, &worker_id).await }
            })
            .await?;

        if !assigned {
            // 条件更新失败：任务已不在PENDING状态
            let holder = self
                .task_repo
                .get_by_id(task_id)
                .await?
                .and_then(|t| t.assigned_worker)
                .unwrap_or_else(|| "unknown".to_string());
            debug!("任务 {} 分配竞争失败，当前持有者: {}", task_id, holder);
            return Err(OrchestratorError::TaskAlreadyAssigned {
                id: task_id,
                worker_id: holder,
            });
        }

        self.worker_repo
            .set_current_task(worker_id, Some(task_id))
            .await?;

        self.append_history(
            task_id,
            HistoryEvent::Assigned,
            Some(worker_id.to_string()),
            serde_json::json!({ "worker_id": worker_id }),
        )
        .await;

        self.event_bus.publish(EngineEvent::TaskAssigned {
            id: Uuid::new_v4(),
            task_id,
            worker_id: worker_id.to_string(),
            occurred_at: Utc::now(),
        });

        info!("任务 {} 已分配给Worker {}", task_id, worker_id);

        self.task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(OrchestratorError::TaskNotFound { id: task_id })
    }

    /// 按状态机校验更新任务状态。RUNNING打开始时间戳，
    /// 终态打完成时间戳并释放Worker。
    pub async fn update_status(
        &self,
        task_id: i64,
        new_status: TaskStatus,
    ) -> OrchestratorResult<Task> {
        let mut task = self
            .task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(OrchestratorError::TaskNotFound { id: task_id })?;

        if !task.status.can_transition_to(new_status) {
            return Err(OrchestratorError::InvalidStateTransition {
                id: task_id,
                from: task.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        let previous_worker = task.assigned_worker.clone();
        task.update_status(new_status);
        if new_status.is_terminal() {
            task.assigned_worker = None;
        }
        self.task_repo.update(&task).await?;

        if new_status.is_terminal() {
            if let Some(worker_id) = &previous_worker {
                self.release_worker(worker_id, task_id).await;
            }
        }

        match new_status {
            TaskStatus::Running => {
                self.append_history(
                    task_id,
                    HistoryEvent::Started,
                    previous_worker.clone(),
                    serde_json::json!({}),
                )
                .await;
                self.event_bus.publish(EngineEvent::TaskStarted {
                    id: Uuid::new_v4(),
                    task_id,
                    occurred_at: Utc::now(),
                });
            }
            TaskStatus::Cancelled => {
                self.append_history(
                    task_id,
                    HistoryEvent::Cancelled,
                    previous_worker.clone(),
                    serde_json::json!({}),
                )
                .await;
                self.event_bus.publish(EngineEvent::TaskCancelled {
                    id: Uuid::new_v4(),
                    task_id,
                    occurred_at: Utc::now(),
                });
            }
            _ => {}
        }

        debug!("任务 {} 状态更新为 {}", task_id, new_status.as_str());
        Ok(task)
    }

    /// 终态完成：写入结果并释放Worker
    pub async fn complete_task(
        &self,
        task_id: i64,
        result: serde_json::Value,
    ) -> OrchestratorResult<Task> {
        let mut task = self
            .task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(OrchestratorError::TaskNotFound { id: task_id })?;

        if !task.status.can_transition_to(TaskStatus::Completed) {
            return Err(OrchestratorError::InvalidStateTransition {
                id: task_id,
                from: task.status.as_str().to_string(),
                to: TaskStatus::Completed.as_str().to_string(),
            });
        }

        let worker_id = task.assigned_worker.clone();
        task.result = Some(result);
        task.update_status(TaskStatus::Completed);
        task.assigned_worker = None;
        self.task_repo.update(&task).await?;

        if let Some(worker_id) = &worker_id {
            self.release_worker(worker_id, task_id).await;
        }

        self.append_history(
            task_id,
            HistoryEvent::Completed,
            worker_id,
            serde_json::json!({}),
        )
        .await;

        self.event_bus.publish(EngineEvent::TaskCompleted {
            id: Uuid::new_v4(),
            task_id,
            occurred_at: Utc::now(),
        });

        info!("任务 {} 已完成", task_id);
        Ok(task)
    }

    /// 终态失败：写入结构化错误并释放Worker
    pub async fn fail_task(&self, task_id: i64, error: TaskError) -> OrchestratorResult<Task> {
        let mut task = self
            .task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(OrchestratorError::TaskNotFound { id: task_id })?;

        if !task.status.can_transition_to(TaskStatus::Failed) {
            return Err(OrchestratorError::InvalidStateTransition {
                id: task_id,
                from: task.status.as_str().to_string(),
                to: TaskStatus::Failed.as_str().to_string(),
            });
        }

        let worker_id = task.assigned_worker.clone();
        let error_message = error.message.clone();
        task.error = Some(error);
        task.update_status(TaskStatus::Failed);
        task.assigned_worker = None;
        self.task_repo.update(&task).await?;

        if let Some(worker_id) = &worker_id {
            self.release_worker(worker_id, task_id).await;
        }

        self.append_history(
            task_id,
            HistoryEvent::Failed,
            worker_id,
            serde_json::json!({ "error": error_message }),
        )
        .await;

        self.event_bus.publish(EngineEvent::TaskFailed {
            id: Uuid::new_v4(),
            task_id,
            error_message,
            retry_count: task.retry_count,
            occurred_at: Utc::now(),
        });

        warn!("任务 {} 已失败", task_id);
        Ok(task)
    }

    /// 取消任务：任意非终态可取消
    pub async fn cancel_task(&self, task_id: i64) -> OrchestratorResult<Task> {
        self.update_status(task_id, TaskStatus::Cancelled).await
    }

    /// 取出能力匹配且依赖满足的最高优先级PENDING任务；
    /// 优先级相同时按创建时间最早优先
    pub async fn get_next_task(
        &self,
        capabilities: &[String],
    ) -> OrchestratorResult<Option<Task>> {
        let candidates = self
            .task_repo
            .get_ready_candidates(capabilities, self.config.candidate_batch_size)
            .await?;

        for task in candidates {
            if self.dependencies_satisfied(task.id).await? {
                return Ok(Some(task));
            }
            debug!("任务 {} 依赖未满足，跳过", task.id);
        }

        Ok(None)
    }

    /// 添加依赖边。自依赖与会闭合成环的边在任何写入前被拒绝。
    pub async fn add_dependency(
        &self,
        task_id: i64,
        depends_on_task_id: i64,
        kind: DependencyKind,
    ) -> OrchestratorResult<TaskDependency> {
        if task_id == depends_on_task_id {
            return Err(OrchestratorError::InvalidDependency {
                task_id,
                dependency_id: depends_on_task_id,
                reason: "任务不能依赖自身".to_string(),
            });
        }

        if self.task_repo.get_by_id(task_id).await?.is_none() {
            return Err(OrchestratorError::TaskNotFound { id: task_id });
        }
        if self.task_repo.get_by_id(depends_on_task_id).await?.is_none() {
            return Err(OrchestratorError::TaskNotFound {
                id: depends_on_task_id,
            });
        }

        // 可达性检查：若depends_on沿依赖边可达task_id，则新边闭合成环
        if self.is_reachable(depends_on_task_id, task_id).await? {
            warn!(
                "检测到循环依赖，任务ID: {}, 新依赖: {}",
                task_id, depends_on_task_id
            );
            return Err(OrchestratorError::CircularDependency);
        }

        let dependency = TaskDependency::new(task_id, depends_on_task_id, kind);
        let created = self.dependency_repo.add(&dependency).await?;

        debug!(
            "添加依赖: 任务 {} 依赖任务 {} ({})",
            task_id,
            depends_on_task_id,
            kind.as_str()
        );
        Ok(created)
    }

    pub async fn get_task(&self, task_id: i64) -> OrchestratorResult<Option<Task>> {
        self.task_repo.get_by_id(task_id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> OrchestratorResult<Vec<Task>> {
        self.task_repo.list(filter).await
    }

    pub async fn get_task_history(
        &self,
        task_id: i64,
    ) -> OrchestratorResult<Vec<TaskHistoryEntry>> {
        self.history_repo.list_for_task(task_id).await
    }

    /// 任务的全部依赖是否满足：must-succeed要求前置COMPLETED，
    /// must-complete要求前置到达终态，must-fail要求前置FAILED
    pub async fn dependencies_satisfied(&self, task_id: i64) -> OrchestratorResult<bool> {
        let dependencies = self.dependency_repo.list_for_task(task_id).await?;

        for dependency in dependencies {
            let dep_task = self
                .task_repo
                .get_by_id(dependency.depends_on_task_id)
                .await?;

            let satisfied = match dep_task {
                Some(dep_task) => match dependency.kind {
                    DependencyKind::MustSucceed => dep_task.status == TaskStatus::Completed,
                    DependencyKind::MustComplete => dep_task.status.is_terminal(),
                    DependencyKind::MustFail => dep_task.status == TaskStatus::Failed,
                },
                // 前置任务不存在视为未满足，交由一致性检查上报
                None => false,
            };

            if !satisfied {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// from沿依赖边（task -> depends_on）是否可达to
    async fn is_reachable(&self, from: i64, to: i64) -> OrchestratorResult<bool> {
        use std::collections::{HashMap, HashSet, VecDeque};

        let edges = self.dependency_repo.list_all().await?;
        let mut graph: HashMap<i64, Vec<i64>> = HashMap::new();
        for edge in &edges {
            graph.entry(edge.task_id).or_default().push(edge.depends_on_task_id);
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            if current == to {
                return Ok(true);
            }
            if let Some(next_nodes) = graph.get(&current) {
                for &next in next_nodes {
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }

        Ok(false)
    }

    /// 历史追加失败不阻塞主流程，只记录日志
    async fn append_history(
        &self,
        task_id: i64,
        event: HistoryEvent,
        worker_id: Option<String>,
        details: serde_json::Value,
    ) {
        let entry = TaskHistoryEntry::new(task_id, event, worker_id, details);
        if let Err(e) = self.history_repo.append(&entry).await {
            warn!("追加任务 {} 历史记录失败: {}", task_id, e);
        }
    }

    /// 清除Worker上的当前任务引用（仅当仍指向该任务时）
    async fn release_worker(&self, worker_id: &str, task_id: i64) {
        match self.worker_repo.get_by_id(worker_id).await {
            Ok(Some(worker)) if worker.current_task == Some(task_id) => {
                if let Err(e) = self.worker_repo.set_current_task(worker_id, None).await {
                    warn!("清除Worker {} 当前任务失败: {}", worker_id, e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("查询Worker {} 失败: {}", worker_id, e),
        }
    }
}
