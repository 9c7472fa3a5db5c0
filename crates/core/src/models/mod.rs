pub mod backup;
pub mod dependency;
pub mod history;
pub mod orchestrator_state;
pub mod task;
pub mod worker;

pub use backup::{BackupRecord, BackupType};
pub use dependency::{DependencyKind, TaskDependency};
pub use history::{HistoryEvent, TaskHistoryEntry};
pub use orchestrator_state::{
    OrchestratorState, OrchestratorStatus, STATE_SCHEMA_VERSION,
};
pub use task::{Task, TaskError, TaskErrorKind, TaskFilter, TaskStatus};
pub use worker::{Worker, WorkerHeartbeat, WorkerRegistration, WorkerStatus};
