//! 测试实体构建器，提供合理默认值与链式定制

use chrono::{DateTime, Utc};
use orchestrator_core::models::{
    Task, TaskStatus, Worker, WorkerRegistration, WorkerStatus,
};

pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task {
                id: 1,
                task_type: "build".to_string(),
                status: TaskStatus::Pending,
                priority: 0,
                payload: serde_json::json!({}),
                result: None,
                error: None,
                assigned_worker: None,
                retry_count: 0,
                max_retries: 3,
                timeout_seconds: 300,
                assigned_at: None,
                started_at: None,
                completed_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.task.payload = payload;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.task.max_retries = max_retries;
        self
    }

    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.task.retry_count = retry_count;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: i32) -> Self {
        self.task.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_assigned_worker(mut self, worker_id: &str) -> Self {
        self.task.assigned_worker = Some(worker_id.to_string());
        self
    }

    pub fn with_assigned_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.assigned_at = Some(at);
        self
    }

    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.started_at = Some(at);
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.created_at = at;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WorkerBuilder {
    worker: Worker,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self {
            worker: Worker::new(WorkerRegistration {
                worker_id: "worker-1".to_string(),
                name: "test-worker".to_string(),
                kind: "local".to_string(),
                capabilities: vec!["build".to_string()],
                max_concurrent_tasks: 1,
                resources: serde_json::json!({}),
            }),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.worker.id = id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.worker.name = name.to_string();
        self
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.worker.status = status;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<&str>) -> Self {
        self.worker.capabilities = capabilities.into_iter().map(String::from).collect();
        self
    }

    pub fn with_current_task(mut self, task_id: i64) -> Self {
        self.worker.current_task = Some(task_id);
        self
    }

    pub fn with_last_heartbeat(mut self, at: DateTime<Utc>) -> Self {
        self.worker.last_heartbeat = at;
        self
    }

    pub fn build(self) -> Worker {
        self.worker
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
