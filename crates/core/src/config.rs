use anyhow::Result;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub recovery: RecoverySettings,
    pub consistency: ConsistencySettings,
    pub worker: WorkerSettings,
    pub backup: BackupSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    /// 单条语句的执行超时
    pub statement_timeout_seconds: u64,
    /// 事务隔离级别: read_committed / repeatable_read / serializable
    pub isolation_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub instance_id: String,
    /// 状态快照定时持久化间隔
    pub state_persist_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySettings {
    pub sweep_interval_seconds: u64,
    /// ASSIGNED状态最大滞留时长
    pub assigned_max_age_seconds: i64,
    /// RUNNING状态最大滞留时长
    pub running_max_age_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencySettings {
    pub check_interval_seconds: u64,
    /// 检查发现问题时是否自动修复
    pub auto_fix: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub heartbeat_interval_seconds: i64,
    /// 心跳超过 interval × multiplier 即视为不可用
    pub liveness_multiplier: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// 备份制品的落盘目录
    pub directory: String,
    pub retention_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:orchestrator.db".to_string(),
                max_connections: 10,
                min_connections: 1,
                connection_timeout_seconds: 30,
                idle_timeout_seconds: 600,
                statement_timeout_seconds: 30,
                isolation_level: "read_committed".to_string(),
            },
            orchestrator: OrchestratorConfig {
                instance_id: "orchestrator-001".to_string(),
                state_persist_interval_seconds: 30,
            },
            recovery: RecoverySettings {
                sweep_interval_seconds: 60,
                assigned_max_age_seconds: 300,   // 5分钟
                running_max_age_seconds: 1800,   // 30分钟
            },
            consistency: ConsistencySettings {
                check_interval_seconds: 300,
                auto_fix: false,
            },
            worker: WorkerSettings {
                heartbeat_interval_seconds: 30,
                liveness_multiplier: 3,
            },
            backup: BackupSettings {
                directory: "backups".to_string(),
                retention_days: 30,
            },
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/orchestrator.toml",
                "orchestrator.toml",
                "/etc/orchestrator/config.toml",
            ];

            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        let defaults = AppConfig::default();
        builder = builder
            .set_default("database.url", defaults.database.url.clone())?
            .set_default(
                "database.max_connections",
                defaults.database.max_connections as i64,
            )?
            .set_default(
                "database.min_connections",
                defaults.database.min_connections as i64,
            )?
            .set_default(
                "database.connection_timeout_seconds",
                defaults.database.connection_timeout_seconds as i64,
            )?
            .set_default(
                "database.idle_timeout_seconds",
                defaults.database.idle_timeout_seconds as i64,
            )?
            .set_default(
                "database.statement_timeout_seconds",
                defaults.database.statement_timeout_seconds as i64,
            )?
            .set_default(
                "database.isolation_level",
                defaults.database.isolation_level.clone(),
            )?
            .set_default(
                "orchestrator.instance_id",
                defaults.orchestrator.instance_id.clone(),
            )?
            .set_default(
                "orchestrator.state_persist_interval_seconds",
                defaults.orchestrator.state_persist_interval_seconds as i64,
            )?
            .set_default(
                "recovery.sweep_interval_seconds",
                defaults.recovery.sweep_interval_seconds as i64,
            )?
            .set_default(
                "recovery.assigned_max_age_seconds",
                defaults.recovery.assigned_max_age_seconds,
            )?
            .set_default(
                "recovery.running_max_age_seconds",
                defaults.recovery.running_max_age_seconds,
            )?
            .set_default(
                "consistency.check_interval_seconds",
                defaults.consistency.check_interval_seconds as i64,
            )?
            .set_default("consistency.auto_fix", defaults.consistency.auto_fix)?
            .set_default(
                "worker.heartbeat_interval_seconds",
                defaults.worker.heartbeat_interval_seconds,
            )?
            .set_default(
                "worker.liveness_multiplier",
                defaults.worker.liveness_multiplier,
            )?
            .set_default("backup.directory", defaults.backup.directory.clone())?
            .set_default("backup.retention_days", defaults.backup.retention_days)?;

        // 环境变量覆盖，如 ORCHESTRATOR__DATABASE__URL
        builder = builder.add_source(
            Environment::with_prefix("ORCHESTRATOR")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(anyhow::anyhow!("数据库URL不能为空"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("数据库最大连接数必须大于0"));
        }
        if self.orchestrator.instance_id.is_empty() {
            return Err(anyhow::anyhow!("编排器实例ID不能为空"));
        }
        if self.recovery.assigned_max_age_seconds <= 0
            || self.recovery.running_max_age_seconds <= 0
        {
            return Err(anyhow::anyhow!("恢复阈值必须为正数"));
        }
        if self.worker.liveness_multiplier < 1 {
            return Err(anyhow::anyhow!("Worker存活倍数至少为1"));
        }
        if !matches!(
            self.database.isolation_level.as_str(),
            "read_committed" | "repeatable_read" | "serializable"
        ) {
            return Err(anyhow::anyhow!(
                "不支持的事务隔离级别: {}",
                self.database.isolation_level
            ));
        }
        Ok(())
    }

    /// Worker心跳的存活阈值（秒）
    pub fn worker_liveness_timeout_seconds(&self) -> i64 {
        self.worker.heartbeat_interval_seconds * self.worker.liveness_multiplier
    }
}
