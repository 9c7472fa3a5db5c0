use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use orchestrator_core::{
    events::{EngineEvent, EventBus},
    models::{TaskStatus, WorkerStatus},
    traits::{DependencyRepository, TaskRepository, WorkerRepository},
    OrchestratorError, OrchestratorResult,
};

pub const CHECK_ORPHANED_ASSIGNMENTS: &str = "orphaned_assignments";
pub const CHECK_CAPACITY_MISMATCH: &str = "capacity_mismatch";
pub const CHECK_DEPENDENCY_CYCLES: &str = "dependency_cycles";
pub const CHECK_TIMEOUT_VIOLATIONS: &str = "timeout_violations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueSeverity {
    Warning,
    Error,
    Critical,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Warning => "WARNING",
            IssueSeverity::Error => "ERROR",
            IssueSeverity::Critical => "CRITICAL",
        }
    }
}

/// 单条一致性问题：受影响实体、严重程度与可读原因
#[derive(Debug, Clone)]
pub struct ConsistencyIssue {
    pub entity: String,
    pub severity: IssueSeverity,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ConsistencyCheckResult {
    pub check_name: String,
    pub passed: bool,
    pub issues: Vec<ConsistencyIssue>,
}

/// 全量检查的汇总报告
#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    pub results: Vec<ConsistencyCheckResult>,
    pub warnings: usize,
    pub errors: usize,
    pub criticals: usize,
}

impl ConsistencyReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

#[derive(Debug, Clone)]
pub struct ConsistencyConfig {
    /// Worker心跳存活阈值（秒）
    pub worker_liveness_timeout_seconds: i64,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            worker_liveness_timeout_seconds: 90,
        }
    }
}

/// 一致性检查器：命名不变量检查的注册表，每项检查返回
/// 通过/失败与离散问题列表，部分检查支持自动修复。
/// 发现的问题会被记录与上报，绝不静默忽略。
pub struct ConsistencyChecker {
    task_repo: Arc<dyn TaskRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    dependency_repo: Arc<dyn DependencyRepository>,
    event_bus: EventBus,
    config: ConsistencyConfig,
}

impl ConsistencyChecker {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        dependency_repo: Arc<dyn DependencyRepository>,
        event_bus: EventBus,
        config: Option<ConsistencyConfig>,
    ) -> Self {
        Self {
            task_repo,
            worker_repo,
            dependency_repo,
            event_bus,
            config: config.unwrap_or_default(),
        }
    }

    pub fn check_names() -> Vec<&'static str> {
        vec![
            CHECK_ORPHANED_ASSIGNMENTS,
            CHECK_CAPACITY_MISMATCH,
            CHECK_DEPENDENCY_CYCLES,
            CHECK_TIMEOUT_VIOLATIONS,
        ]
    }

    pub async fn run_check(&self, name: &str) -> OrchestratorResult<ConsistencyCheckResult> {
        let result = match name {
            CHECK_ORPHANED_ASSIGNMENTS => self.check_orphaned_assignments().await?,
            CHECK_CAPACITY_MISMATCH => self.check_capacity_mismatch().await?,
            CHECK_DEPENDENCY_CYCLES => self.check_dependency_cycles().await?,
            CHECK_TIMEOUT_VIOLATIONS => self.check_timeout_violations().await?,
            _ => {
                return Err(OrchestratorError::validation_error(format!(
                    "未知的一致性检查: {name}"
                )))
            }
        };

        for issue in &result.issues {
            warn!(
                "一致性问题 [{}] {} ({}): {}",
                result.check_name,
                issue.entity,
                issue.severity.as_str(),
                issue.message
            );
        }

        self.event_bus.publish(EngineEvent::ConsistencyCheckCompleted {
            id: Uuid::new_v4(),
            check_name: result.check_name.clone(),
            passed: result.passed,
            issue_count: result.issues.len(),
            occurred_at: Utc::now(),
        });

        Ok(result)
    }

    /// 运行全部检查并按严重程度汇总
    pub async fn run_all_checks(&self) -> OrchestratorResult<ConsistencyReport> {
        let mut report = ConsistencyReport::default();

        for name in Self::check_names() {
            let result = self.run_check(name).await?;
            for issue in &result.issues {
                match issue.severity {
                    IssueSeverity::Warning => report.warnings += 1,
                    IssueSeverity::Error => report.errors += 1,
                    IssueSeverity::Critical => report.criticals += 1,
                }
            }
            report.results.push(result);
        }

        if !report.passed() {
            info!(
                "一致性检查发现问题: warning {}, error {}, critical {}",
                report.warnings, report.errors, report.criticals
            );
        }
        Ok(report)
    }

    /// 应用指定检查的自动修复，返回修复的问题数
    pub async fn fix_issues(&self, name: &str) -> OrchestratorResult<u64> {
        match name {
            CHECK_ORPHANED_ASSIGNMENTS => self.fix_orphaned_assignments().await,
            CHECK_CAPACITY_MISMATCH => self.fix_capacity_mismatch().await,
            // 依赖环无法自动修复，需要人工裁决删除哪条边
            CHECK_DEPENDENCY_CYCLES => Ok(0),
            CHECK_TIMEOUT_VIOLATIONS => self.fix_timeout_violations().await,
            _ => Err(OrchestratorError::validation_error(format!(
                "未知的一致性检查: {name}"
            ))),
        }
    }

    /// 任务被分配给了不在线（或心跳超期、或不存在）的Worker
    async fn check_orphaned_assignments(&self) -> OrchestratorResult<ConsistencyCheckResult> {
        let now = Utc::now();
        let mut issues = Vec::new();

        let workers: HashMap<String, _> = self
            .worker_repo
            .list()
            .await?
            .into_iter()
            .map(|w| (w.id.clone(), w))
            .collect();

        for status in [TaskStatus::Assigned, TaskStatus::Running] {
            for task in self.task_repo.get_by_status(status).await? {
                let Some(worker_id) = &task.assigned_worker else {
                    issues.push(ConsistencyIssue {
                        entity: format!("task:{}", task.id),
                        severity: IssueSeverity::Critical,
                        message: format!(
                            "任务处于 {} 状态但没有Worker引用",
                            status.as_str()
                        ),
                    });
                    continue;
                };

                match workers.get(worker_id) {
                    None => issues.push(ConsistencyIssue {
                        entity: format!("task:{}", task.id),
                        severity: IssueSeverity::Error,
                        message: format!("任务分配给了不存在的Worker {worker_id}"),
                    }),
                    Some(worker)
                        if worker.status == WorkerStatus::Offline
                            || worker.is_heartbeat_expired(
                                now,
                                self.config.worker_liveness_timeout_seconds,
                            ) =>
                    {
                        issues.push(ConsistencyIssue {
                            entity: format!("task:{}", task.id),
                            severity: IssueSeverity::Error,
                            message: format!("任务分配给了不在线的Worker {worker_id}"),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(ConsistencyCheckResult {
            check_name: CHECK_ORPHANED_ASSIGNMENTS.to_string(),
            passed: issues.is_empty(),
            issues,
        })
    }

    async fn fix_orphaned_assignments(&self) -> OrchestratorResult<u64> {
        let result = self.check_orphaned_assignments().await?;
        let mut fixed = 0;

        for issue in &result.issues {
            let Some(task_id) = parse_entity_id(&issue.entity, "task:") else {
                continue;
            };
            let Some(task) = self.task_repo.get_by_id(task_id).await? else {
                continue;
            };

            let reset = match task.status {
                TaskStatus::Assigned => {
                    self.task_repo
                        .reset_to_pending(task_id, TaskStatus::Assigned, false)
                        .await?
                }
                TaskStatus::Running => {
                    self.task_repo
                        .reset_to_pending(task_id, TaskStatus::Running, true)
                        .await?
                }
                _ => false,
            };
            if reset {
                info!("修复孤儿任务 {}: 重新入队", task_id);
                fixed += 1;
            }
        }
        Ok(fixed)
    }

    /// Worker的current_task指向缺失或已终态的任务，
    /// 或指向分配给其他Worker的任务
    async fn check_capacity_mismatch(&self) -> OrchestratorResult<ConsistencyCheckResult> {
        let mut issues = Vec::new();

        for worker in self.worker_repo.list().await? {
            let Some(task_id) = worker.current_task else {
                continue;
            };

            match self.task_repo.get_by_id(task_id).await? {
                None => issues.push(ConsistencyIssue {
                    entity: format!("worker:{}", worker.id),
                    severity: IssueSeverity::Critical,
                    message: format!("Worker的当前任务 {task_id} 不存在"),
                }),
                Some(task) if task.is_terminal() => issues.push(ConsistencyIssue {
                    entity: format!("worker:{}", worker.id),
                    severity: IssueSeverity::Error,
                    message: format!(
                        "Worker的当前任务 {} 已处于终态 {}",
                        task_id,
                        task.status.as_str()
                    ),
                }),
                Some(task)
                    if task.assigned_worker.as_deref() != Some(worker.id.as_str()) =>
                {
                    issues.push(ConsistencyIssue {
                        entity: format!("worker:{}", worker.id),
                        severity: IssueSeverity::Error,
                        message: format!(
                            "Worker的当前任务 {task_id} 实际分配给了其他Worker"
                        ),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(ConsistencyCheckResult {
            check_name: CHECK_CAPACITY_MISMATCH.to_string(),
            passed: issues.is_empty(),
            issues,
        })
    }

    async fn fix_capacity_mismatch(&self) -> OrchestratorResult<u64> {
        let result = self.check_capacity_mismatch().await?;
        let mut fixed = 0;

        for issue in &result.issues {
            let Some(worker_id) = parse_entity_name(&issue.entity, "worker:") else {
                continue;
            };
            self.worker_repo.set_current_task(&worker_id, None).await?;
            info!("修复Worker {} 的容量不一致: 清除当前任务引用", worker_id);
            fixed += 1;
        }
        Ok(fixed)
    }

    /// DFS检测依赖图中的环
    async fn check_dependency_cycles(&self) -> OrchestratorResult<ConsistencyCheckResult> {
        let edges = self.dependency_repo.list_all().await?;
        let mut graph: HashMap<i64, Vec<i64>> = HashMap::new();
        for edge in &edges {
            graph.entry(edge.task_id).or_default().push(edge.depends_on_task_id);
        }

        let mut issues = Vec::new();
        let mut visited: HashSet<i64> = HashSet::new();
        let mut reported: HashSet<i64> = HashSet::new();

        for &start in graph.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut in_stack: HashSet<i64> = HashSet::new();
            let mut stack: Vec<(i64, usize)> = vec![(start, 0)];
            in_stack.insert(start);

            while let Some((node, child_index)) = stack.pop() {
                let children = graph.get(&node).map(|v| v.as_slice()).unwrap_or(&[]);
                if child_index < children.len() {
                    stack.push((node, child_index + 1));
                    let next = children[child_index];
                    if in_stack.contains(&next) {
                        if reported.insert(next) {
                            issues.push(ConsistencyIssue {
                                entity: format!("task:{next}"),
                                severity: IssueSeverity::Critical,
                                message: "任务依赖图中存在环".to_string(),
                            });
                        }
                    } else if !visited.contains(&next) {
                        in_stack.insert(next);
                        stack.push((next, 0));
                    }
                } else {
                    in_stack.remove(&node);
                    visited.insert(node);
                }
            }
        }

        Ok(ConsistencyCheckResult {
            check_name: CHECK_DEPENDENCY_CYCLES.to_string(),
            passed: issues.is_empty(),
            issues,
        })
    }

    /// 运行时长超过声明超时但尚未被恢复扫描处理的任务。
    /// 这是安全网而非主检测路径。
    async fn check_timeout_violations(&self) -> OrchestratorResult<ConsistencyCheckResult> {
        let now = Utc::now();
        let mut issues = Vec::new();

        for task in self.task_repo.get_by_status(TaskStatus::Running).await? {
            if task.is_over_timeout(now) {
                issues.push(ConsistencyIssue {
                    entity: format!("task:{}", task.id),
                    severity: IssueSeverity::Warning,
                    message: format!(
                        "任务运行时长已超过声明的超时 {} 秒",
                        task.timeout_seconds
                    ),
                });
            }
        }

        Ok(ConsistencyCheckResult {
            check_name: CHECK_TIMEOUT_VIOLATIONS.to_string(),
            passed: issues.is_empty(),
            issues,
        })
    }

    /// 把超时的运行中任务标记为TIMEOUT，交给恢复管理器处理重试
    async fn fix_timeout_violations(&self) -> OrchestratorResult<u64> {
        let result = self.check_timeout_violations().await?;
        let mut fixed = 0;

        for issue in &result.issues {
            let Some(task_id) = parse_entity_id(&issue.entity, "task:") else {
                continue;
            };
            if self.task_repo.mark_timeout(task_id).await? {
                info!("修复超时违规: 任务 {} 标记为TIMEOUT", task_id);
                fixed += 1;
            } else {
                debug!("任务 {} 状态已被并发修改，跳过超时标记", task_id);
            }
        }
        Ok(fixed)
    }
}

fn parse_entity_id(entity: &str, prefix: &str) -> Option<i64> {
    entity.strip_prefix(prefix)?.parse().ok()
}

fn parse_entity_name(entity: &str, prefix: &str) -> Option<String> {
    entity.strip_prefix(prefix).map(String::from)
}
