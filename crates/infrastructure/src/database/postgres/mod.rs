pub mod postgres_backup_repository;
pub mod postgres_dependency_repository;
pub mod postgres_history_repository;
pub mod postgres_state_repository;
pub mod postgres_task_repository;
pub mod postgres_worker_repository;

pub use postgres_backup_repository::PostgresBackupRepository;
pub use postgres_dependency_repository::PostgresDependencyRepository;
pub use postgres_history_repository::PostgresHistoryRepository;
pub use postgres_state_repository::PostgresStateRepository;
pub use postgres_task_repository::PostgresTaskRepository;
pub use postgres_worker_repository::PostgresWorkerRepository;
