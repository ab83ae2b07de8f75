use std::time::Duration;

use async_trait::async_trait;

use crate::McuResult;

/// 多个API副本共享的计数存储
#[async_trait]
pub trait RateStore: Send + Sync {
    /// 原子地累加窗口计数并设置过期时间，返回累加后的值
    async fn incr_window(&self, key: &str, weight: i64, ttl: Duration) -> McuResult<i64>;

    /// 读取积压深度，不存在时为0
    async fn queue_depth(&self, key: &str) -> McuResult<u64>;

    async fn set_queue_depth(&self, key: &str, depth: u64, ttl: Duration) -> McuResult<()>;
}

/// 固定窗口计数键
pub fn rate_window_key(service: &str, window_index: u64) -> String {
    format!("{service}:rate:{window_index}")
}

/// 集群积压深度键
pub fn queue_depth_key(service: &str) -> String {
    format!("{service}:queue_depth")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_keys() {
        assert_eq!(rate_window_key("api", 17), "api:rate:17");
        assert_eq!(queue_depth_key("mcu"), "mcu:queue_depth");
    }
}
