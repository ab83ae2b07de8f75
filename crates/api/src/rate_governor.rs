use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tracing::debug;

use mcu_core::{config::RateConfig, queue_depth_key, rate_window_key, McuResult, RateStore};

/// 准入判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { count: i64, limit: i64 },
    Throttled { count: i64, limit: i64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// 基于共享固定窗口计数的限流器
///
/// 每个窗口的上限为 `qps × 窗口秒数 × (1 + 积压系数 × 积压深度)`，
/// 积压深度由录制节点写入共享存储。所有API副本使用同一组键，
/// 因此看到的计数一致。`qps = 0` 时不限流。
pub struct RateGovernor {
    service: String,
    config: RateConfig,
    store: Arc<dyn RateStore>,
}

impl RateGovernor {
    pub fn new(service: impl Into<String>, config: RateConfig, store: Arc<dyn RateStore>) -> Self {
        Self {
            service: service.into(),
            config,
            store,
        }
    }

    pub fn config(&self) -> &RateConfig {
        &self.config
    }

    pub async fn admit(&self, weight: i64) -> McuResult<Admission> {
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        self.admit_at(weight, now_ms).await
    }

    /// 按给定时间戳所在的窗口判定
    pub async fn admit_at(&self, weight: i64, now_ms: u64) -> McuResult<Admission> {
        if self.config.qps == 0 {
            return Ok(Admission::Admitted {
                count: 0,
                limit: 0,
            });
        }

        let depth = self
            .store
            .queue_depth(&queue_depth_key(&self.config.backlog_service))
            .await?;
        let limit = self.limit_for(depth);

        let window_ms = self.config.window_ms.max(1);
        let key = rate_window_key(&self.service, now_ms / window_ms);
        let count = self
            .store
            .incr_window(&key, weight, self.config.window())
            .await?;

        if count > limit {
            counter!("mcu_rate_throttled_total", "service" => self.service.clone()).increment(1);
            debug!(key = %key, count, limit, depth, "request throttled");
            Ok(Admission::Throttled { count, limit })
        } else {
            Ok(Admission::Admitted { count, limit })
        }
    }

    fn limit_for(&self, depth: u64) -> i64 {
        let per_window = self.config.qps as f64 * self.config.window_ms as f64 / 1000.0;
        let scaled = per_window * (1.0 + self.config.ql_coefficient * depth as f64);
        if scaled <= 0.0 {
            0
        } else {
            scaled.floor().min(i64::MAX as f64) as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcu_core::McuError;
    use mcu_infrastructure::InMemoryRateStore;
    use std::time::Duration;

    struct BrokenStore;

    #[async_trait]
    impl RateStore for BrokenStore {
        async fn incr_window(&self, _key: &str, _weight: i64, _ttl: Duration) -> McuResult<i64> {
            Err(McuError::RateStore("connection refused".into()))
        }

        async fn queue_depth(&self, _key: &str) -> McuResult<u64> {
            Ok(0)
        }

        async fn set_queue_depth(&self, _key: &str, _depth: u64, _ttl: Duration) -> McuResult<()> {
            Ok(())
        }
    }

    fn governor(qps: u64, ql_coefficient: f64, store: Arc<dyn RateStore>) -> RateGovernor {
        let config = RateConfig {
            qps,
            ql_coefficient,
            window_ms: 1000,
            ..RateConfig::default()
        };
        RateGovernor::new("api", config, store)
    }

    #[tokio::test]
    async fn test_zero_qps_admits_everything() {
        let governor = governor(0, 0.5, Arc::new(BrokenStore));

        for _ in 0..1000 {
            assert!(governor.admit_at(1, 5_000).await.unwrap().is_admitted());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_eleventh_request_is_throttled() {
        let governor = governor(10, 0.0, Arc::new(InMemoryRateStore::new()));

        for i in 1..=10 {
            assert_eq!(
                governor.admit_at(1, 42_100).await.unwrap(),
                Admission::Admitted { count: i, limit: 10 }
            );
        }
        assert_eq!(
            governor.admit_at(1, 42_900).await.unwrap(),
            Admission::Throttled {
                count: 11,
                limit: 10
            }
        );
        // 下一个窗口重新计数
        assert!(governor.admit_at(1, 43_000).await.unwrap().is_admitted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_scales_limit() {
        let store = Arc::new(InMemoryRateStore::new());
        store
            .set_queue_depth("mcu:queue_depth", 2, Duration::from_secs(60))
            .await
            .unwrap();
        let governor = governor(10, 0.5, store);

        let mut admitted = 0;
        while governor.admit_at(1, 7_000).await.unwrap().is_admitted() {
            admitted += 1;
        }
        assert_eq!(admitted, 20);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let governor = governor(10, 0.0, Arc::new(BrokenStore));

        assert!(matches!(
            governor.admit_at(1, 0).await,
            Err(McuError::RateStore(_))
        ));
    }
}
