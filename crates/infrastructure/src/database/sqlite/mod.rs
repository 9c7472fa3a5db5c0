pub mod sqlite_backup_repository;
pub mod sqlite_dependency_repository;
pub mod sqlite_history_repository;
pub mod sqlite_state_repository;
pub mod sqlite_task_repository;
pub mod sqlite_worker_repository;

pub use sqlite_backup_repository::SqliteBackupRepository;
pub use sqlite_dependency_repository::SqliteDependencyRepository;
pub use sqlite_history_repository::SqliteHistoryRepository;
pub use sqlite_state_repository::SqliteStateRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
pub use sqlite_worker_repository::SqliteWorkerRepository;
