use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use mcu_core::{queue_depth_key, BrokerClient, McuResult, QueueSpec, RateStore};

/// 周期性汇总各队列积压并写入共享存储，供限流读取
pub struct BacklogPublisher {
    queues: Vec<QueueSpec>,
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn RateStore>,
    key: String,
    period: Duration,
}

impl BacklogPublisher {
    pub fn new(
        service: &str,
        queues: Vec<QueueSpec>,
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn RateStore>,
        period: Duration,
    ) -> Self {
        Self {
            queues: queues.into_iter().filter(|q| q.enabled).collect(),
            broker,
            store,
            key: queue_depth_key(service),
            period,
        }
    }

    /// 各端点是独立的代理，积压按端点累加，查询失败的端点不计入
    async fn depth_of(&self, spec: &QueueSpec) -> u64 {
        let mut depth = 0;
        for endpoint in &spec.endpoints {
            match self.broker.queue_depth(endpoint, &spec.name).await {
                Ok(count) => depth += u64::from(count),
                Err(e) => {
                    debug!(queue = %spec.name, endpoint = endpoint.id(), error = %e, "queue depth unavailable");
                }
            }
        }
        depth
    }

    /// 汇总一次并写入，返回写入的总积压
    pub async fn publish_once(&self) -> McuResult<u64> {
        let mut total = 0;
        for spec in &self.queues {
            total += self.depth_of(spec).await;
        }
        // 过期时间覆盖几个周期，发布者停止后旧值自然失效
        self.store
            .set_queue_depth(&self.key, total, self.period * 3)
            .await?;
        debug!(key = %self.key, depth = total, "backlog published");
        Ok(total)
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_once().await {
                        warn!(error = %e, "failed to publish queue backlog");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Backlog publisher shutting down");
                    break;
                }
            }
        }
    }
}
