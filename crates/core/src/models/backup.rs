use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单次备份的元数据。创建后不可变；保留策略清理只做墓碑标记，
/// 只要底层制品还可能被恢复就不从元数据表硬删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub backup_type: BackupType,
    pub location: String,
    pub size_bytes: i64,
    pub checksum: String, // SHA-256 十六进制
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BackupType {
    /// 全量快照
    #[serde(rename = "FULL")]
    Full,
    /// 自最近一次任意类型备份以来的变更
    #[serde(rename = "INCREMENTAL")]
    Incremental,
    /// 自最近一次全量备份以来的累计变更
    #[serde(rename = "DIFFERENTIAL")]
    Differential,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "FULL",
            BackupType::Incremental => "INCREMENTAL",
            BackupType::Differential => "DIFFERENTIAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FULL" => Some(BackupType::Full),
            "INCREMENTAL" => Some(BackupType::Incremental),
            "DIFFERENTIAL" => Some(BackupType::Differential),
            _ => None,
        }
    }
}

impl BackupRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
