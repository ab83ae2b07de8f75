use std::time::Duration;

use anyhow::Result;
use mcu_core::{config::RedisConfig, RateStore};
use mcu_infrastructure::RedisRateStore;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_rate_store_counts_window() -> Result<()> {
    let container = Redis::default().start().await?;
    let port = container.get_host_port_ipv4(6379).await?;

    let config = RedisConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..RedisConfig::default()
    };
    let store = RedisRateStore::new(&config).await?;
    let ttl = Duration::from_secs(5);

    assert_eq!(store.incr_window("mcu:rate:42", 2, ttl).await?, 2);
    assert_eq!(store.incr_window("mcu:rate:42", 3, ttl).await?, 5);
    assert_eq!(store.incr_window("mcu:rate:43", 1, ttl).await?, 1);

    assert_eq!(store.queue_depth("mcu:queue_depth").await?, 0);
    store.set_queue_depth("mcu:queue_depth", 12, ttl).await?;
    assert_eq!(store.queue_depth("mcu:queue_depth").await?, 12);

    Ok(())
}
