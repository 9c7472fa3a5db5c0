//! 编排引擎核心：领域模型、错误类型、生命周期事件与仓储接口

pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{OrchestratorError, OrchestratorResult};
pub use events::{EngineEvent, EventBus};
