use std::time::Duration;

use async_trait::async_trait;
use mcu_core::{config::RedisConfig, McuError, McuResult, RateStore};
use redis::{aio::ConnectionManager, Client};
use tracing::debug;

/// 基于Redis的共享限流计数
#[derive(Clone)]
pub struct RedisRateStore {
    connection: ConnectionManager,
}

impl RedisRateStore {
    pub async fn new(config: &RedisConfig) -> McuResult<Self> {
        let client = Client::open(config.build_url())
            .map_err(|e| McuError::RateStore(format!("Failed to create Redis client: {e}")))?;

        let connection = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| {
            McuError::RateStore(format!(
                "Connecting to Redis at {}:{} timed out",
                config.host, config.port
            ))
        })?
        .map_err(|e| McuError::RateStore(format!("Failed to connect to Redis: {e}")))?;

        debug!(host = %config.host, port = config.port, "connected to Redis rate store");
        Ok(Self { connection })
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    ttl.as_millis().clamp(1, i64::MAX as u128) as i64
}

#[async_trait]
impl RateStore for RedisRateStore {
    async fn incr_window(&self, key: &str, weight: i64, ttl: Duration) -> McuResult<i64> {
        let mut conn = self.connection.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCRBY")
            .arg(key)
            .arg(weight)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| McuError::RateStore(format!("INCRBY {key} failed: {e}")))?;
        Ok(count)
    }

    async fn queue_depth(&self, key: &str) -> McuResult<u64> {
        let mut conn = self.connection.clone();
        let depth: Option<u64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| McuError::RateStore(format!("GET {key} failed: {e}")))?;
        Ok(depth.unwrap_or(0))
    }

    async fn set_queue_depth(&self, key: &str, depth: u64, ttl: Duration) -> McuResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(depth)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| McuError::RateStore(format!("SET {key} failed: {e}")))?;
        Ok(())
    }
}
