use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 工作槽位的只读快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotSnapshot {
    pub slot_id: usize,
    pub job_id: Option<String>,
    pub last_active: DateTime<Utc>,
    /// 槽位是否持有录制会话资源
    pub warm: bool,
}

impl SlotSnapshot {
    pub fn is_busy(&self) -> bool {
        self.job_id.is_some()
    }
}

/// 一次执行的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobOutcome {
    pub output: Option<serde_json::Value>,
    pub duration_ms: u64,
}
