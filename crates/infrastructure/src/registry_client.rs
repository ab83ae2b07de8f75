use std::time::Duration;

use async_trait::async_trait;
use mcu_core::{ClusterNode, LoadSample, McuError, McuResult, RegistryClient};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

/// 通过HTTP访问调度服务和注册服务
pub struct HttpRegistryClient {
    scheduler_url: String,
    registry_url: String,
    http_client: reqwest::Client,
}

impl HttpRegistryClient {
    pub fn new(scheduler: &str, registry: &str, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            scheduler_url: Self::service_url(scheduler),
            registry_url: Self::service_url(registry),
            http_client,
        }
    }

    /// 服务名补全为HTTP地址
    pub fn service_url(service: &str) -> String {
        let trimmed = service.trim_end_matches('/');
        if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        }
    }

    fn node_url(&self, node: &ClusterNode) -> String {
        format!(
            "{}/nodes/{}/{}",
            self.registry_url,
            node.purpose,
            node.node_key()
        )
    }

    async fn register_with(&self, base_url: &str, node: &ClusterNode) -> McuResult<()> {
        let url = format!("{base_url}/nodes");
        match self.http_client.post(&url).json(node).send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(McuError::ClusterJoin(format!(
                    "{url} 返回 HTTP {status} - {body}"
                )))
            }
            Err(e) => Err(McuError::ClusterJoin(format!("{url} 连接失败: {e}"))),
        }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn join(&self, node: &ClusterNode) -> McuResult<()> {
        self.register_with(&self.registry_url, node).await?;
        self.register_with(&self.scheduler_url, node).await?;
        info!(
            node = %node.node_key(),
            purpose = %node.purpose,
            "registered with scheduler and registry"
        );
        Ok(())
    }

    async fn report_load(&self, node: &ClusterNode, sample: &LoadSample) -> McuResult<()> {
        let url = format!("{}/load", self.node_url(node));
        match self.http_client.put(&url).json(sample).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(node = %node.node_key(), value = sample.value, "load reported");
                Ok(())
            }
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                Err(McuError::ClusterMembershipLost(format!(
                    "注册中心不认识节点 {}",
                    node.node_key()
                )))
            }
            Ok(response) => Err(McuError::ClusterLoadReport(format!(
                "HTTP {}",
                response.status()
            ))),
            Err(e) => Err(McuError::ClusterLoadReport(format!("连接失败: {e}"))),
        }
    }

    async fn leave(&self, node: &ClusterNode) -> McuResult<()> {
        let url = self.node_url(node);
        match self.http_client.delete(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!(node = %node.node_key(), "unregistered from registry");
            }
            Ok(response) => {
                warn!(node = %node.node_key(), status = %response.status(), "failed to unregister");
            }
            Err(e) => {
                warn!(node = %node.node_key(), error = %e, "failed to unregister");
            }
        }
        Ok(())
    }
}
