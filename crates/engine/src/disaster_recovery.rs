use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use orchestrator_core::{
    models::BackupType, OrchestratorError, OrchestratorResult,
};

use crate::backup::BackupManager;
use crate::consistency::ConsistencyChecker;
use crate::recovery::RecoveryManager;
use crate::state_manager::OrchestratorStateManager;

/// 恢复计划步骤的类型
#[derive(Debug, Clone)]
pub enum RecoveryStepType {
    /// 创建一次备份
    Backup(BackupType),
    /// 从指定备份恢复
    Restore { backup_id: String },
    /// 恢复并对账编排器状态
    StateRecovery,
    /// 执行一轮任务恢复扫描
    TaskRecovery,
    /// 运行全部一致性检查，存在critical问题视为失败
    Validation,
    /// 记录通知信息
    Notification { message: String },
}

#[derive(Debug, Clone)]
pub struct RecoveryStep {
    pub name: String,
    pub step_type: RecoveryStepType,
    /// 关键步骤失败时中止整个计划；非关键步骤失败仅记录并继续
    pub critical: bool,
}

#[derive(Debug, Clone)]
pub struct RecoveryPlan {
    pub id: String,
    pub name: String,
    pub steps: Vec<RecoveryStep>,
}

#[derive(Debug, Clone)]
pub struct RecoveryStepOutcome {
    pub step_name: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecoveryPlanReport {
    pub plan_id: String,
    pub completed: bool,
    pub cancelled: bool,
    /// 因关键步骤失败而中止时，记录中止处的步骤名
    pub aborted_at: Option<String>,
    pub outcomes: Vec<RecoveryStepOutcome>,
}

/// 灾难恢复协调器：按序执行恢复计划的各个步骤。
/// 同一时间只允许一个计划运行；取消只在步骤间生效，从不打断步骤中途。
pub struct DisasterRecoveryCoordinator {
    backup_manager: Arc<BackupManager>,
    recovery_manager: Arc<RecoveryManager>,
    consistency_checker: Arc<ConsistencyChecker>,
    state_manager: Arc<OrchestratorStateManager>,
    plan_active: Arc<tokio::sync::Mutex<()>>,
    cancel_requested: Arc<AtomicBool>,
}

impl DisasterRecoveryCoordinator {
    pub fn new(
        backup_manager: Arc<BackupManager>,
        recovery_manager: Arc<RecoveryManager>,
        consistency_checker: Arc<ConsistencyChecker>,
        state_manager: Arc<OrchestratorStateManager>,
    ) -> Self {
        Self {
            backup_manager,
            recovery_manager,
            consistency_checker,
            state_manager,
            plan_active: Arc::new(tokio::sync::Mutex::new(())),
            cancel_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 请求取消当前计划。下一个步骤开始前生效。
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub async fn execute_plan(
        &self,
        plan: &RecoveryPlan,
    ) -> OrchestratorResult<RecoveryPlanReport> {
        // 第二个并发调用直接被拒绝
        let _guard = self
            .plan_active
            .try_lock()
            .map_err(|_| OrchestratorError::RecoveryPlanAlreadyRunning)?;

        self.cancel_requested.store(false, Ordering::SeqCst);
        info!("开始执行恢复计划 {} ({} 个步骤)", plan.name, plan.steps.len());

        let mut report = RecoveryPlanReport {
            plan_id: plan.id.clone(),
            completed: false,
            cancelled: false,
            aborted_at: None,
            outcomes: Vec::new(),
        };

        for step in &plan.steps {
            if self.cancel_requested.load(Ordering::SeqCst) {
                warn!("恢复计划 {} 在步骤 {} 之前被取消", plan.name, step.name);
                report.cancelled = true;
                return Ok(report);
            }

            info!("执行恢复步骤: {}", step.name);
            match self.execute_step(step).await {
                Ok(()) => {
                    report.outcomes.push(RecoveryStepOutcome {
                        step_name: step.name.clone(),
                        succeeded: true,
                        error: None,
                    });
                }
                Err(e) => {
                    report.outcomes.push(RecoveryStepOutcome {
                        step_name: step.name.clone(),
                        succeeded: false,
                        error: Some(e.to_string()),
                    });

                    if step.critical {
                        error!(
                            "关键步骤 {} 失败，中止恢复计划 {}: {}",
                            step.name, plan.name, e
                        );
                        report.aborted_at = Some(step.name.clone());
                        return Ok(report);
                    }
                    warn!("非关键步骤 {} 失败，继续执行: {}", step.name, e);
                }
            }
        }

        report.completed = true;
        info!("恢复计划 {} 执行完毕", plan.name);
        Ok(report)
    }

    async fn execute_step(&self, step: &RecoveryStep) -> OrchestratorResult<()> {
        match &step.step_type {
            RecoveryStepType::Backup(backup_type) => {
                self.backup_manager.create_backup(*backup_type).await?;
                Ok(())
            }
            RecoveryStepType::Restore { backup_id } => {
                self.backup_manager.restore_backup(backup_id, false).await?;
                Ok(())
            }
            RecoveryStepType::StateRecovery => {
                self.state_manager.restore().await?;
                Ok(())
            }
            RecoveryStepType::TaskRecovery => {
                let report = self.recovery_manager.sweep().await?;
                if report.failed > 0 {
                    return Err(OrchestratorError::Internal(format!(
                        "任务恢复扫描有 {} 个任务恢复失败",
                        report.failed
                    )));
                }
                Ok(())
            }
            RecoveryStepType::Validation => {
                let report = self.consistency_checker.run_all_checks().await?;
                if report.criticals > 0 {
                    return Err(OrchestratorError::Internal(format!(
                        "一致性校验发现 {} 个critical问题",
                        report.criticals
                    )));
                }
                Ok(())
            }
            RecoveryStepType::Notification { message } => {
                info!("恢复计划通知: {message}");
                Ok(())
            }
        }
    }
}
