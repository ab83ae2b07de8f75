use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use mcu_core::{BrokerEndpoint, HealthChecker};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// 通过RabbitMQ管理接口检查监听端口
pub struct HttpHealthChecker {
    http_client: reqwest::Client,
}

impl HttpHealthChecker {
    pub fn new(timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { http_client }
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check(&self, endpoint: &BrokerEndpoint) -> bool {
        let request = self
            .http_client
            .get(&endpoint.monitor_url)
            .basic_auth(endpoint.username(), Some(endpoint.password()));

        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(
                    endpoint = endpoint.id(),
                    status = %response.status(),
                    "health check returned non-success status"
                );
                false
            }
            Err(e) => {
                debug!(endpoint = endpoint.id(), error = %e, "health check request failed");
                false
            }
        }
    }
}

/// 各代理端点的健康视图
///
/// 还没有探测过的端点视为健康。
#[derive(Debug, Clone, Default)]
pub struct EndpointHealth {
    states: Arc<RwLock<HashMap<String, bool>>>,
}

impl EndpointHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_healthy(&self, endpoint: &BrokerEndpoint) -> bool {
        self.states
            .read()
            .map(|states| states.get(endpoint.id()).copied().unwrap_or(true))
            .unwrap_or(true)
    }

    /// 记录端点状态，返回状态是否发生变化
    pub fn mark(&self, endpoint: &BrokerEndpoint, healthy: bool) -> bool {
        let Ok(mut states) = self.states.write() else {
            return false;
        };
        let previous = states.insert(endpoint.id().to_string(), healthy);
        previous.unwrap_or(true) != healthy
    }
}

/// 独立于消费流程的周期性健康检查
pub struct EndpointHealthMonitor {
    endpoints: Vec<BrokerEndpoint>,
    health_checker: Arc<dyn HealthChecker>,
    health: EndpointHealth,
    period: Duration,
}

impl EndpointHealthMonitor {
    pub fn new(
        endpoints: Vec<BrokerEndpoint>,
        health_checker: Arc<dyn HealthChecker>,
        health: EndpointHealth,
        period: Duration,
    ) -> Self {
        let mut unique: Vec<BrokerEndpoint> = Vec::new();
        for endpoint in endpoints {
            if !unique.iter().any(|e| e.id() == endpoint.id()) {
                unique.push(endpoint);
            }
        }
        Self {
            endpoints: unique,
            health_checker,
            health,
            period,
        }
    }

    /// 探测所有端点一次，返回健康端点数
    pub async fn check_all(&self) -> usize {
        let mut healthy_count = 0;
        for endpoint in &self.endpoints {
            let healthy = self.health_checker.check(endpoint).await;
            if healthy {
                healthy_count += 1;
            }
            if self.health.mark(endpoint, healthy) {
                if healthy {
                    info!(endpoint = endpoint.id(), "broker endpoint recovered");
                } else {
                    warn!(endpoint = endpoint.id(), "broker endpoint marked unhealthy");
                }
            }
        }
        healthy_count
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Endpoint health monitor shutting down");
                    break;
                }
            }
        }
    }
}
