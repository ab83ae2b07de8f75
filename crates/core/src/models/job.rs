use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 从队列拉取的一个录制任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    /// 来源队列，重试时重新投递到这里
    pub queue: String,
    pub payload: serde_json::Value,
    /// 已重试次数，首次执行为0
    #[serde(default)]
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(queue: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            queue: queue.into(),
            payload,
            attempt: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// 生成下一次重试使用的任务，保留来源队列
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn to_bytes(&self) -> crate::McuResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 解析代理消息。不是Job格式的消息体整体作为payload
    pub fn from_delivery(queue: &str, data: &[u8]) -> crate::McuResult<Self> {
        match serde_json::from_slice::<Job>(data) {
            Ok(job) => Ok(job),
            Err(_) => {
                let payload: serde_json::Value = serde_json::from_slice(data)?;
                Ok(Self::new(queue, payload))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_next_attempt_keeps_identity() {
        let job = Job::new("test-pro", json!({"room": "r1"}));
        let retry = job.next_attempt();
        assert_eq!(retry.id, job.id);
        assert_eq!(retry.queue, "test-pro");
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.next_attempt().attempt, 2);
    }

    #[test]
    fn test_from_delivery_wraps_raw_payload() {
        let job = Job::from_delivery("test-pro", br#"{"room":"r1","uid":7}"#).unwrap();
        assert_eq!(job.queue, "test-pro");
        assert_eq!(job.attempt, 0);
        assert_eq!(job.payload["uid"], 7);

        let original = Job::new("other", json!({"room": "r2"})).next_attempt();
        let decoded = Job::from_delivery("test-pro", &original.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_from_delivery_rejects_garbage() {
        assert!(Job::from_delivery("q", b"not json").is_err());
    }
}
