use std::sync::Arc;

use mcu_core::{
    AppConfig, BrokerClient, HealthChecker, LoadSampler, McuResult, RateStore, RegistryClient,
};
use tracing::{debug, info};

use crate::{
    FixedLoadSampler, HttpHealthChecker, HttpRegistryClient, InMemoryRateStore, RabbitMQBroker,
    RedisRateStore, SimulatedBroker, SimulatedRegistry, SystemLoadSampler,
};

/// 录制节点需要的外部协作方
#[derive(Clone)]
pub struct ClusterClients {
    pub broker: Arc<dyn BrokerClient>,
    pub health_checker: Arc<dyn HealthChecker>,
    pub registry: Arc<dyn RegistryClient>,
    pub sampler: Arc<dyn LoadSampler>,
}

pub struct ClientFactory;

impl ClientFactory {
    /// 按配置选择真实实现或模拟器
    pub async fn cluster_clients(config: &AppConfig) -> ClusterClients {
        if config.mock.enabled {
            info!(
                count = config.mock.count,
                delay_ms = config.mock.response_delay_ms,
                "Initializing simulated broker and registry"
            );
            let broker = Arc::new(SimulatedBroker::new(config.mock.response_delay()));
            Self::seed_mock_jobs(&broker, config).await;
            return ClusterClients {
                broker: broker.clone(),
                health_checker: broker,
                registry: Arc::new(SimulatedRegistry::new(config.mock.response_delay())),
                sampler: Arc::new(FixedLoadSampler::new(
                    config.cluster.load.item.name.clone(),
                    0.0,
                )),
            };
        }

        info!("Initializing RabbitMQ broker and HTTP registry client");
        let timeout = config.cluster.request_timeout();
        ClusterClients {
            broker: Arc::new(RabbitMQBroker::new()),
            health_checker: Arc::new(HttpHealthChecker::new(timeout)),
            registry: Arc::new(HttpRegistryClient::new(
                &config.cluster.scheduler,
                &config.cluster.registry,
                timeout,
            )),
            sampler: Arc::new(SystemLoadSampler::new(config.cluster.load.item.name.clone())),
        }
    }

    /// API前端发布任务使用的代理
    pub fn broker(config: &AppConfig) -> Arc<dyn BrokerClient> {
        if config.mock.enabled {
            Arc::new(SimulatedBroker::new(config.mock.response_delay()))
        } else {
            Arc::new(RabbitMQBroker::new())
        }
    }

    /// mock模式使用进程内计数，否则连接Redis
    pub async fn rate_store(config: &AppConfig) -> McuResult<Arc<dyn RateStore>> {
        if config.mock.enabled {
            debug!("Using in-memory rate store");
            return Ok(Arc::new(InMemoryRateStore::new()));
        }
        let store = RedisRateStore::new(&config.redis).await?;
        Ok(Arc::new(store))
    }

    async fn seed_mock_jobs(broker: &SimulatedBroker, config: &AppConfig) {
        let queues: Vec<&str> = config
            .queues
            .iter()
            .filter(|q| q.enabled)
            .map(|q| q.name.as_str())
            .collect();
        if queues.is_empty() {
            return;
        }
        let base = config.mock.count / queues.len();
        let extra = config.mock.count % queues.len();
        for (index, queue) in queues.iter().enumerate() {
            let count = base + usize::from(index < extra);
            broker.seed(queue, count).await;
        }
    }
}
