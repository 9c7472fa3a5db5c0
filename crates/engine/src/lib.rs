//! 编排引擎：任务队列、Worker注册表、恢复管理、一致性检查、
//! 编排器状态管理与备份/灾难恢复

pub mod backup;
pub mod consistency;
pub mod disaster_recovery;
pub mod recovery;
pub mod state_manager;
pub mod task_queue;
pub mod worker_registry;

pub use backup::{BackupConfig, BackupManager, RestoreReport};
pub use consistency::{
    ConsistencyChecker, ConsistencyCheckResult, ConsistencyConfig, ConsistencyIssue,
    ConsistencyReport, IssueSeverity,
};
pub use disaster_recovery::{
    DisasterRecoveryCoordinator, RecoveryPlan, RecoveryPlanReport, RecoveryStep,
    RecoveryStepOutcome, RecoveryStepType,
};
pub use recovery::{RecoveryConfig, RecoveryManager, RecoverySweepReport};
pub use state_manager::{OrchestratorStateManager, StateManagerConfig};
pub use task_queue::{TaskQueue, TaskQueueConfig};
pub use worker_registry::{WorkerRegistry, WorkerRegistryConfig};
