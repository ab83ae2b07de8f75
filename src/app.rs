use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use mcu_api::{ApiState, RateGovernor};
use mcu_core::{AppConfig, BrokerClient, RateStore, SessionFactory};
use mcu_infrastructure::{ClientFactory, ClusterClients};
use mcu_worker::{ProcessSessionFactory, RecorderNode, SimulatedSessionFactory};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行录制节点
    Mcu,
    /// 仅运行API前端
    Api,
    /// 同一进程内运行两者
    All,
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mcu" => Ok(AppMode::Mcu),
            "api" => Ok(AppMode::Api),
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

pub struct Application {
    config: Arc<AppConfig>,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        Self {
            config: Arc::new(config),
            mode,
        }
    }

    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> Result<()> {
        info!(mode = ?self.mode, service = %self.config.service, mock = self.config.mock.enabled, "Starting application");

        match self.mode {
            AppMode::Mcu => {
                let clients = ClientFactory::cluster_clients(&self.config).await;
                let store = self.optional_rate_store().await;
                self.run_node(clients, store, &shutdown).await
            }
            AppMode::Api => {
                let broker = ClientFactory::broker(&self.config);
                let store = ClientFactory::rate_store(&self.config)
                    .await
                    .context("连接限流存储失败")?;
                self.run_api(broker, store, shutdown.subscribe()).await
            }
            AppMode::All => self.run_all(&shutdown).await,
        }
    }

    /// API与录制节点共用代理和限流存储，mock模式下提交的任务会被本节点消费
    async fn run_all(&self, shutdown: &broadcast::Sender<()>) -> Result<()> {
        let clients = ClientFactory::cluster_clients(&self.config).await;
        let store = ClientFactory::rate_store(&self.config)
            .await
            .context("连接限流存储失败")?;

        let api = {
            let config = self.config.clone();
            let broker = clients.broker.clone();
            let store = store.clone();
            let shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move { serve_api(&config, broker, store, shutdown_rx).await })
        };

        let node_result = self.run_node(clients, Some(store), shutdown).await;

        match api.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "API server failed"),
            Err(e) => error!(error = %e, "API server task panicked"),
        }
        node_result
    }

    async fn run_node(
        &self,
        clients: ClusterClients,
        store: Option<Arc<dyn RateStore>>,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<()> {
        let sessions = self.session_factory();
        let node = RecorderNode::new(self.config.clone(), clients, sessions, store);
        node.run(shutdown).await.context("录制节点运行失败")
    }

    async fn run_api(
        &self,
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn RateStore>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        serve_api(&self.config, broker, store, shutdown_rx).await
    }

    fn session_factory(&self) -> Arc<dyn SessionFactory> {
        if self.config.mock.enabled {
            Arc::new(SimulatedSessionFactory::new(self.config.mock.response_delay()))
        } else {
            Arc::new(ProcessSessionFactory::from_config(&self.config.worker.recorder))
        }
    }

    /// 录制节点没有限流存储也能工作，只是不再发布积压深度
    async fn optional_rate_store(&self) -> Option<Arc<dyn RateStore>> {
        match ClientFactory::rate_store(&self.config).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(error = %e, "rate store unavailable, backlog publishing disabled");
                None
            }
        }
    }
}

async fn serve_api(
    config: &AppConfig,
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn RateStore>,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let governor = Arc::new(RateGovernor::new(
        config.service.clone(),
        config.rate.clone(),
        store,
    ));
    let state = ApiState::new(config, broker, governor);
    mcu_api::serve(&config.api.bind_address, state, shutdown_rx)
        .await
        .context("API服务运行失败")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!("mcu".parse::<AppMode>().unwrap(), AppMode::Mcu);
        assert_eq!("api".parse::<AppMode>().unwrap(), AppMode::Api);
        assert_eq!("all".parse::<AppMode>().unwrap(), AppMode::All);
        assert!("dispatcher".parse::<AppMode>().is_err());
    }
}
