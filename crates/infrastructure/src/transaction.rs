//! 事务管理
//!
//! 为多步操作提供有界重试（指数退避）与saga式补偿回滚。
//! 仅对分类为瞬态的错误自动重试（序列化冲突、死锁、连接丢失、
//! 资源耗尽），其余错误立即失败。

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use orchestrator_core::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// 瞬态错误的最大重试次数
    pub max_retries: u32,
    /// 基础退避间隔（毫秒）
    pub base_backoff_ms: u64,
    /// 最大退避间隔（毫秒）
    pub max_backoff_ms: u64,
    /// 退避间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
    /// 单次操作的执行超时
    pub statement_timeout: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 5_000,
            jitter_factor: 0.1,
            statement_timeout: Duration::from_secs(30),
        }
    }
}

/// 带重试的操作执行器
pub struct TransactionManager {
    config: TransactionConfig,
}

impl TransactionManager {
    pub fn new(config: Option<TransactionConfig>) -> Self {
        Self {
            config: config.unwrap_or_default(),
        }
    }

    /// 执行命名操作；瞬态错误按指数退避重试，超过上限后返回最后的错误
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        name: &str,
        op: F,
    ) -> OrchestratorResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::time::timeout(self.config.statement_timeout, op()).await;

            let err = match result {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!("操作 {} 在第 {} 次重试后成功", name, attempt);
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => OrchestratorError::Timeout(format!(
                    "操作 {} 超过 {:?} 未完成",
                    name, self.config.statement_timeout
                )),
            };

            if !err.is_retryable() || attempt >= self.config.max_retries {
                if attempt > 0 {
                    error!("操作 {} 重试 {} 次后仍失败: {}", name, attempt, err);
                }
                return Err(err);
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                "操作 {} 遇到瞬态错误: {}，{}ms 后进行第 {} 次重试",
                name,
                err,
                delay.as_millis(),
                attempt + 1
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// 指数退避间隔，带随机抖动避免雷群效应
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_backoff_ms as f64;
        let exponential = base * 2f64.powi(attempt as i32);
        let capped = exponential.min(self.config.max_backoff_ms as f64);
        let jitter = capped * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let final_ms = (capped + jitter).max(base);
        Duration::from_millis(final_ms as u64)
    }
}

type StepFuture = BoxFuture<'static, OrchestratorResult<()>>;
type StepFn = Box<dyn Fn() -> StepFuture + Send + Sync>;

struct SagaStep {
    name: String,
    execute: StepFn,
    compensate: Option<StepFn>,
}

/// 分布式操作：按序执行命名子操作，每个子操作可注册补偿闭包。
/// 任一子操作失败时，已完成子操作的补偿按相反顺序执行，
/// 然后原始错误向上传播。
pub struct DistributedOperation {
    name: String,
    steps: Vec<SagaStep>,
}

impl DistributedOperation {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step<S, F, Fut>(mut self, name: S, execute: F) -> Self
    where
        S: Into<String>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OrchestratorResult<()>> + Send + 'static,
    {
        self.steps.push(SagaStep {
            name: name.into(),
            execute: Box::new(move || Box::pin(execute())),
            compensate: None,
        });
        self
    }

    pub fn step_with_compensation<S, F, Fut, C, CFut>(
        mut self,
        name: S,
        execute: F,
        compensate: C,
    ) -> Self
    where
        S: Into<String>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OrchestratorResult<()>> + Send + 'static,
        C: Fn() -> CFut + Send + Sync + 'static,
        CFut: Future<Output = OrchestratorResult<()>> + Send + 'static,
    {
        self.steps.push(SagaStep {
            name: name.into(),
            execute: Box::new(move || Box::pin(execute())),
            compensate: Some(Box::new(move || Box::pin(compensate()))),
        });
        self
    }

    pub async fn run(self) -> OrchestratorResult<()> {
        let mut completed: Vec<SagaStep> = Vec::new();

        for step in self.steps {
            debug!("执行分布式操作 {} 的子操作: {}", self.name, step.name);

            match (step.execute)().await {
                Ok(()) => completed.push(step),
                Err(e) => {
                    error!(
                        "分布式操作 {} 的子操作 {} 失败: {}，开始逆序补偿",
                        self.name, step.name, e
                    );

                    for done in completed.iter().rev() {
                        if let Some(compensate) = &done.compensate {
                            if let Err(comp_err) = compensate().await {
                                // 补偿失败只记录，不掩盖原始错误
                                error!(
                                    "子操作 {} 的补偿执行失败: {}",
                                    done.name, comp_err
                                );
                            } else {
                                debug!("子操作 {} 的补偿已执行", done.name);
                            }
                        }
                    }

                    return Err(e);
                }
            }
        }

        Ok(())
    }
}
