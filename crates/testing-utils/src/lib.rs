//! 测试工具：内存Mock仓储与实体构建器

pub mod builders;
pub mod mocks;

pub use builders::{TaskBuilder, WorkerBuilder};
pub use mocks::{
    MockBackupRepository, MockDependencyRepository, MockHistoryRepository, MockStateRepository,
    MockTaskExecutor, MockTaskRepository, MockWorkerRepository,
};
