use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务依赖边：task_id 依赖 depends_on_task_id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDependency {
    pub id: i64,
    pub task_id: i64,
    pub depends_on_task_id: i64,
    pub kind: DependencyKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// 前置任务必须成功完成
    #[serde(rename = "MUST_SUCCEED")]
    MustSucceed,
    /// 前置任务到达任意终态即可
    #[serde(rename = "MUST_COMPLETE")]
    MustComplete,
    /// 前置任务必须以失败告终
    #[serde(rename = "MUST_FAIL")]
    MustFail,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::MustSucceed => "MUST_SUCCEED",
            DependencyKind::MustComplete => "MUST_COMPLETE",
            DependencyKind::MustFail => "MUST_FAIL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MUST_SUCCEED" => Some(DependencyKind::MustSucceed),
            "MUST_COMPLETE" => Some(DependencyKind::MustComplete),
            "MUST_FAIL" => Some(DependencyKind::MustFail),
            _ => None,
        }
    }
}

impl TaskDependency {
    pub fn new(task_id: i64, depends_on_task_id: i64, kind: DependencyKind) -> Self {
        Self {
            id: 0, // 将由数据库生成
            task_id,
            depends_on_task_id,
            kind,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            DependencyKind::MustSucceed,
            DependencyKind::MustComplete,
            DependencyKind::MustFail,
        ] {
            assert_eq!(DependencyKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(DependencyKind::parse("UNKNOWN"), None);
    }
}
