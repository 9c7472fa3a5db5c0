//! 基础设施层：数据库连接管理、仓储实现与事务管理

pub mod database;
pub mod transaction;

pub use database::{DatabaseManager, DatabasePool, DatabaseType};
pub use transaction::{DistributedOperation, TransactionConfig, TransactionManager};
