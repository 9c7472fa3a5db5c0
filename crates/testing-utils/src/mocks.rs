//! 仓储接口的内存Mock实现
//!
//! 供单元测试与集成测试使用，无需真实数据库连接。
//! 条件更新语义（try_assign等）与SQL实现保持一致：
//! 互斥锁内的检查-更新等价于单条条件UPDATE。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use orchestrator_core::models::{
    BackupRecord, OrchestratorState, Task, TaskDependency, TaskError, TaskFilter,
    TaskHistoryEntry, TaskStatus, Worker, WorkerStatus,
};
use orchestrator_core::traits::{
    BackupRepository, DependencyRepository, HistoryRepository, StateRepository, TaskExecutor,
    TaskRepository, WorkerRepository,
};
use orchestrator_core::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone)]
pub struct MockTaskRepository {
    tasks: Arc<Mutex<HashMap<i64, Task>>>,
    next_id: Arc<Mutex<i64>>,
}

impl Default for MockTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let mut map = HashMap::new();
        let mut max_id = 0;
        for task in tasks {
            if task.id > max_id {
                max_id = task.id;
            }
            map.insert(task.id, task);
        }
        Self {
            tasks: Arc::new(Mutex::new(map)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
        }
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn get_all(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn create(&self, task: &Task) -> OrchestratorResult<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_task = task.clone();
        new_task.id = *next_id;
        *next_id += 1;

        tasks.insert(new_task.id, new_task.clone());
        Ok(new_task)
    }

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn update(&self, task: &Task) -> OrchestratorResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if !tasks.contains_key(&task.id) {
            return Err(OrchestratorError::TaskNotFound { id: task.id });
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn list(&self, filter: &TaskFilter) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let mut filtered: Vec<Task> = tasks.values().cloned().collect();

        if let Some(status) = filter.status {
            filtered.retain(|t| t.status == status);
        }
        if let Some(task_type) = &filter.task_type {
            filtered.retain(|t| t.task_type == *task_type);
        }
        if let Some(worker) = &filter.assigned_worker {
            filtered.retain(|t| t.assigned_worker.as_deref() == Some(worker.as_str()));
        }

        filtered.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(offset) = filter.offset {
            filtered = filtered.into_iter().skip(offset as usize).collect();
        }
        if let Some(limit) = filter.limit {
            filtered.truncate(limit as usize);
        }
        Ok(filtered)
    }

    async fn try_assign(&self, task_id: i64, worker_id: &str) -> OrchestratorResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&task_id) {
            Some(task) if task.status == TaskStatus::Pending => {
                let now = Utc::now();
                task.status = TaskStatus::Assigned;
                task.assigned_worker = Some(worker_id.to_string());
                task.assigned_at = Some(now);
                task.updated_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn get_ready_candidates(
        &self,
        capabilities: &[String],
        limit: i64,
    ) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let mut candidates: Vec<Task> = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && capabilities.iter().any(|c| c == &t.task_type)
            })
            .cloned()
            .collect();

        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        candidates.truncate(limit as usize);
        Ok(candidates)
    }

    async fn get_stale(
        &self,
        status: TaskStatus,
        cutoff: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let stale = tasks
            .values()
            .filter(|t| {
                if t.status != status {
                    return false;
                }
                let age_field = match status {
                    TaskStatus::Assigned => t.assigned_at,
                    TaskStatus::Running => t.started_at,
                    _ => None,
                };
                matches!(age_field, Some(ts) if ts < cutoff)
            })
            .cloned()
            .collect();
        Ok(stale)
    }

    async fn get_by_status(&self, status: TaskStatus) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let mut result: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn reset_to_pending(
        &self,
        id: i64,
        expected: TaskStatus,
        clear_started: bool,
    ) -> OrchestratorResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task) if task.status == expected => {
                task.status = TaskStatus::Pending;
                task.assigned_worker = None;
                task.assigned_at = None;
                if clear_started {
                    task.started_at = None;
                    task.result = None;
                }
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn retry_from_timeout(&self, id: i64) -> OrchestratorResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task)
                if task.status == TaskStatus::Timeout && task.retry_count < task.max_retries =>
            {
                task.status = TaskStatus::Pending;
                task.retry_count += 1;
                task.assigned_worker = None;
                task.assigned_at = None;
                task.started_at = None;
                task.result = None;
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_timeout(&self, id: i64) -> OrchestratorResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Running => {
                task.status = TaskStatus::Timeout;
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_with_error(
        &self,
        id: i64,
        expected: TaskStatus,
        error: &TaskError,
    ) -> OrchestratorResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task) if task.status == expected => {
                let now = Utc::now();
                task.status = TaskStatus::Failed;
                task.error = Some(error.clone());
                task.assigned_worker = None;
                task.completed_at = Some(now);
                task.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_by_status(&self, status: TaskStatus) -> OrchestratorResult<i64> {
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks.values().filter(|t| t.status == status).count() as i64)
    }

    async fn get_changed_since(&self, since: DateTime<Utc>) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let mut result: Vec<Task> = tasks
            .values()
            .filter(|t| t.updated_at > since)
            .cloned()
            .collect();
        result.sort_by_key(|t| t.id);
        Ok(result)
    }

    async fn insert_snapshot(&self, task: &Task) -> OrchestratorResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.insert(task.id, task.clone());
        let mut next_id = self.next_id.lock().unwrap();
        if task.id >= *next_id {
            *next_id = task.id + 1;
        }
        Ok(())
    }

    async fn clear_all(&self) -> OrchestratorResult<()> {
        self.tasks.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockWorkerRepository {
    workers: Arc<Mutex<HashMap<String, Worker>>>,
}

impl MockWorkerRepository {
    pub fn new() -> Self {
        Self {
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_workers(workers: Vec<Worker>) -> Self {
        let map = workers.into_iter().map(|w| (w.id.clone(), w)).collect();
        Self {
            workers: Arc::new(Mutex::new(map)),
        }
    }

    pub fn count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkerRepository for MockWorkerRepository {
    async fn register(&self, worker: &Worker) -> OrchestratorResult<()> {
        let mut workers = self.workers.lock().unwrap();
        if workers.values().any(|w| w.name == worker.name) {
            return Err(OrchestratorError::WorkerAlreadyRegistered {
                name: worker.name.clone(),
            });
        }
        workers.insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn unregister(&self, worker_id: &str) -> OrchestratorResult<()> {
        let mut workers = self.workers.lock().unwrap();
        if workers.remove(worker_id).is_none() {
            return Err(OrchestratorError::worker_not_found(worker_id));
        }
        Ok(())
    }

    async fn get_by_id(&self, worker_id: &str) -> OrchestratorResult<Option<Worker>> {
        Ok(self.workers.lock().unwrap().get(worker_id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> OrchestratorResult<Option<Worker>> {
        Ok(self
            .workers
            .lock()
            .unwrap()
            .values()
            .find(|w| w.name == name)
            .cloned())
    }

    async fn list(&self) -> OrchestratorResult<Vec<Worker>> {
        let mut result: Vec<Worker> = self.workers.lock().unwrap().values().cloned().collect();
        result.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(result)
    }

    async fn update_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
    ) -> OrchestratorResult<()> {
        let mut workers = self.workers.lock().unwrap();
        match workers.get_mut(worker_id) {
            Some(worker) => {
                worker.status = status;
                Ok(())
            }
            None => Err(OrchestratorError::worker_not_found(worker_id)),
        }
    }

    async fn update_heartbeat(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        timestamp: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        let mut workers = self.workers.lock().unwrap();
        match workers.get_mut(worker_id) {
            Some(worker) => {
                worker.status = status;
                worker.last_heartbeat = timestamp;
                Ok(())
            }
            None => Err(OrchestratorError::worker_not_found(worker_id)),
        }
    }

    async fn set_current_task(
        &self,
        worker_id: &str,
        task_id: Option<i64>,
    ) -> OrchestratorResult<()> {
        let mut workers = self.workers.lock().unwrap();
        match workers.get_mut(worker_id) {
            Some(worker) => {
                worker.current_task = task_id;
                Ok(())
            }
            None => Err(OrchestratorError::worker_not_found(worker_id)),
        }
    }

    async fn get_active_since(&self, cutoff: DateTime<Utc>) -> OrchestratorResult<Vec<Worker>> {
        Ok(self
            .workers
            .lock()
            .unwrap()
            .values()
            .filter(|w| w.status == WorkerStatus::Online && w.last_heartbeat >= cutoff)
            .cloned()
            .collect())
    }

    async fn get_changed_since(&self, since: DateTime<Utc>) -> OrchestratorResult<Vec<Worker>> {
        Ok(self
            .workers
            .lock()
            .unwrap()
            .values()
            .filter(|w| w.last_heartbeat > since || w.registered_at > since)
            .cloned()
            .collect())
    }

    async fn insert_snapshot(&self, worker: &Worker) -> OrchestratorResult<()> {
        self.workers
            .lock()
            .unwrap()
            .insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn clear_all(&self) -> OrchestratorResult<()> {
        self.workers.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MockDependencyRepository {
    dependencies: Arc<Mutex<Vec<TaskDependency>>>,
    next_id: Arc<Mutex<i64>>,
}

impl Default for MockDependencyRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDependencyRepository {
    pub fn new() -> Self {
        Self {
            dependencies: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn count(&self) -> usize {
        self.dependencies.lock().unwrap().len()
    }
}

#[async_trait]
impl DependencyRepository for MockDependencyRepository {
    async fn add(&self, dependency: &TaskDependency) -> OrchestratorResult<TaskDependency> {
        let mut dependencies = self.dependencies.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_dep = dependency.clone();
        new_dep.id = *next_id;
        *next_id += 1;

        dependencies.push(new_dep.clone());
        Ok(new_dep)
    }

    async fn list_for_task(&self, task_id: i64) -> OrchestratorResult<Vec<TaskDependency>> {
        Ok(self
            .dependencies
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> OrchestratorResult<Vec<TaskDependency>> {
        Ok(self.dependencies.lock().unwrap().clone())
    }

    async fn get_changed_since(
        &self,
        since: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<TaskDependency>> {
        Ok(self
            .dependencies
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.created_at > since)
            .cloned()
            .collect())
    }

    async fn insert_snapshot(&self, dependency: &TaskDependency) -> OrchestratorResult<()> {
        let mut dependencies = self.dependencies.lock().unwrap();
        dependencies.push(dependency.clone());
        let mut next_id = self.next_id.lock().unwrap();
        if dependency.id >= *next_id {
            *next_id = dependency.id + 1;
        }
        Ok(())
    }

    async fn clear_all(&self) -> OrchestratorResult<()> {
        self.dependencies.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MockHistoryRepository {
    entries: Arc<Mutex<Vec<TaskHistoryEntry>>>,
    next_id: Arc<Mutex<i64>>,
}

impl Default for MockHistoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHistoryRepository {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn all_entries(&self) -> Vec<TaskHistoryEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryRepository for MockHistoryRepository {
    async fn append(&self, entry: &TaskHistoryEntry) -> OrchestratorResult<TaskHistoryEntry> {
        let mut entries = self.entries.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_entry = entry.clone();
        new_entry.id = *next_id;
        *next_id += 1;

        entries.push(new_entry.clone());
        Ok(new_entry)
    }

    async fn list_for_task(&self, task_id: i64) -> OrchestratorResult<Vec<TaskHistoryEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn get_changed_since(
        &self,
        since: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<TaskHistoryEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.created_at > since)
            .cloned()
            .collect())
    }

    async fn insert_snapshot(&self, entry: &TaskHistoryEntry) -> OrchestratorResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.push(entry.clone());
        let mut next_id = self.next_id.lock().unwrap();
        if entry.id >= *next_id {
            *next_id = entry.id + 1;
        }
        Ok(())
    }

    async fn clear_all(&self) -> OrchestratorResult<()> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}

/// 外部执行器契约的Mock：把任务载荷原样回显为结果，
/// 或按预设返回失败
#[derive(Debug, Clone)]
pub struct MockTaskExecutor {
    capabilities: Vec<String>,
    fail_with: Option<String>,
}

impl MockTaskExecutor {
    pub fn new(capabilities: Vec<&str>) -> Self {
        Self {
            capabilities: capabilities.into_iter().map(String::from).collect(),
            fail_with: None,
        }
    }

    pub fn failing(capabilities: Vec<&str>, message: &str) -> Self {
        Self {
            capabilities: capabilities.into_iter().map(String::from).collect(),
            fail_with: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl TaskExecutor for MockTaskExecutor {
    async fn execute(&self, task: &Task) -> OrchestratorResult<serde_json::Value> {
        match &self.fail_with {
            Some(message) => Err(OrchestratorError::TaskExecution(message.clone())),
            None => Ok(serde_json::json!({ "echo": task.payload })),
        }
    }

    fn supports(&self, task_type: &str) -> bool {
        self.capabilities.iter().any(|c| c == task_type)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockStateRepository {
    states: Arc<Mutex<HashMap<String, OrchestratorState>>>,
}

impl MockStateRepository {
    pub fn new() -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_state(state: OrchestratorState) -> Self {
        let mut map = HashMap::new();
        map.insert(state.instance_id.clone(), state);
        Self {
            states: Arc::new(Mutex::new(map)),
        }
    }
}

#[async_trait]
impl StateRepository for MockStateRepository {
    async fn load(&self, instance_id: &str) -> OrchestratorResult<Option<OrchestratorState>> {
        Ok(self.states.lock().unwrap().get(instance_id).cloned())
    }

    async fn save(&self, state: &OrchestratorState) -> OrchestratorResult<()> {
        self.states
            .lock()
            .unwrap()
            .insert(state.instance_id.clone(), state.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockBackupRepository {
    records: Arc<Mutex<Vec<BackupRecord>>>,
}

impl MockBackupRepository {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl BackupRepository for MockBackupRepository {
    async fn insert(&self, record: &BackupRecord) -> OrchestratorResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> OrchestratorResult<Option<BackupRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list(&self, include_deleted: bool) -> OrchestratorResult<Vec<BackupRecord>> {
        let mut records: Vec<BackupRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| include_deleted || !r.is_deleted())
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn latest_full(&self) -> OrchestratorResult<Option<BackupRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.backup_type == orchestrator_core::models::BackupType::Full && !r.is_deleted()
            })
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn latest_any(&self) -> OrchestratorResult<Option<BackupRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.is_deleted())
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn tombstone(&self, id: &str, deleted_at: DateTime<Utc>) -> OrchestratorResult<()> {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.deleted_at = Some(deleted_at);
                Ok(())
            }
            None => Err(OrchestratorError::BackupNotFound { id: id.to_string() }),
        }
    }
}
