use async_trait::async_trait;

use crate::errors::OrchestratorResult;
use crate::models::Task;

/// 外部执行器契约。引擎自身不执行任务载荷：
/// 执行器接收任务并最终返回结果或结构化错误。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// 执行任务载荷，返回结果数据
    async fn execute(&self, task: &Task) -> OrchestratorResult<serde_json::Value>;

    /// 是否支持该任务类型
    fn supports(&self, task_type: &str) -> bool;
}
