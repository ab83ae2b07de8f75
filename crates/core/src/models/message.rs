use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Job;

/// 投递到后处理队列的任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostProcessTask {
    pub job_id: String,
    pub source_queue: String,
    pub payload: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub node: String,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl PostProcessTask {
    pub fn from_job(
        job: &Job,
        output: Option<serde_json::Value>,
        node: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            source_queue: job.queue.clone(),
            payload: job.payload.clone(),
            output,
            node: node.into(),
            duration_ms,
            completed_at: Utc::now(),
        }
    }
}

/// 发送到监控通道的事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorEvent {
    pub id: String,
    pub node: String,
    pub event: MonitorEventKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEventKind {
    JobSucceeded {
        job_id: String,
        queue: String,
        attempt: u32,
        duration_ms: u64,
    },
    JobFailed {
        job_id: String,
        queue: String,
        attempts: u32,
        error: String,
    },
    NodeJoined {
        purpose: String,
    },
    NodeLost {
        purpose: String,
        reason: String,
    },
}

impl MonitorEvent {
    fn new(node: &str, event: MonitorEventKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node: node.to_string(),
            event,
            timestamp: Utc::now(),
        }
    }

    pub fn job_succeeded(node: &str, job: &Job, duration_ms: u64) -> Self {
        Self::new(
            node,
            MonitorEventKind::JobSucceeded {
                job_id: job.id.clone(),
                queue: job.queue.clone(),
                attempt: job.attempt,
                duration_ms,
            },
        )
    }

    /// `attempts` 记录总执行次数，包括首次执行
    /// `attempts` 为总执行次数
    pub fn job_failed(node: &str, job: &Job, attempts: u32, error: impl Into<String>) -> Self {
        Self::new(
            node,
            MonitorEventKind::JobFailed {
                job_id: job.id.clone(),
                queue: job.queue.clone(),
                attempts,
                error: error.into(),
            },
        )
    }

    pub fn node_joined(node: &str, purpose: &str) -> Self {
        Self::new(
            node,
            MonitorEventKind::NodeJoined {
                purpose: purpose.to_string(),
            },
        )
    }

    pub fn node_lost(node: &str, purpose: &str, reason: impl Into<String>) -> Self {
        Self::new(
            node,
            MonitorEventKind::NodeLost {
                purpose: purpose.to_string(),
                reason: reason.into(),
            },
        )
    }
}
