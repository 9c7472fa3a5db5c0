pub mod executor;
pub mod repository;

pub use executor::TaskExecutor;
pub use repository::{
    BackupRepository, DependencyRepository, HistoryRepository, StateRepository, TaskRepository,
    WorkerRepository,
};
