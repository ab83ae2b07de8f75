use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig, RateConfig},
    cluster::ClusterConfig,
    dispatcher_worker::{MockConfig, WorkerConfig},
    message_queue::{validate_endpoint, validate_queues, NotifyConfig, RedisConfig},
};
use crate::models::{BrokerEndpoint, QueueSpec};

/// 录制节点与API前端的完整配置
///
/// 启动时构造一次，之后只读地传给各个组件。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 服务名，同时作为共享存储键的前缀
    pub service: String,
    /// 按优先级调度的逻辑队列
    #[serde(alias = "rabbits")]
    pub queues: Vec<QueueSpec>,
    /// 下游通知使用的默认代理端点
    pub rabbit: Vec<BrokerEndpoint>,
    pub notify: NotifyConfig,
    pub worker: WorkerConfig,
    pub cluster: ClusterConfig,
    pub redis: RedisConfig,
    pub rate: RateConfig,
    pub api: ApiConfig,
    pub mock: MockConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: "mcu".to_string(),
            queues: Vec::new(),
            rabbit: Vec::new(),
            notify: NotifyConfig::default(),
            worker: WorkerConfig::default(),
            cluster: ClusterConfig::default(),
            redis: RedisConfig::default(),
            rate: RateConfig::default(),
            api: ApiConfig::default(),
            mock: MockConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: MCU_, nested keys joined by `__`)
    /// 4. Pod environment (`POD_IP`, `MCU_FONT`, `MCU_COVER_PATH`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/mcu.toml", "mcu.toml", "/etc/mcu/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("MCU")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("worker.retry_delay_policy"),
        );

        let mut config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.resolve_environment();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.resolve_environment();
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn resolve_environment(&mut self) {
        self.resolve_environment_with(|key| std::env::var(key).ok());
    }

    /// 解析依赖运行环境的字段，只在构造组件前执行一次
    pub fn resolve_environment_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.cluster.ip.is_empty() {
            match lookup("POD_IP").filter(|ip| !ip.is_empty()) {
                Some(ip) => self.cluster.ip = ip,
                None => {
                    warn!("POD_IP is not set, falling back to 127.0.0.1");
                    self.cluster.ip = "127.0.0.1".to_string();
                }
            }
        }

        if let Some(font) = lookup("MCU_FONT").filter(|v| !v.is_empty()) {
            self.worker.recorder.water_mark_font = font;
        }

        if let Some(cover) = lookup("MCU_COVER_PATH").filter(|v| !v.is_empty()) {
            self.worker.recorder.cover_path = cover;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.is_empty() {
            return Err(anyhow::anyhow!("服务名不能为空"));
        }

        validate_queues(&self.queues).context("队列配置验证失败")?;

        for endpoint in &self.rabbit {
            validate_endpoint(endpoint).context("默认代理端点配置验证失败")?;
        }

        if self.notify.post_process_queue.is_empty() || self.notify.monitor_notify.is_empty() {
            return Err(anyhow::anyhow!("后处理队列和监控通道名不能为空"));
        }

        self.worker.validate().context("Worker配置验证失败")?;
        self.cluster.validate().context("集群配置验证失败")?;
        self.redis.validate().context("Redis配置验证失败")?;
        self.rate.validate().context("限流配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }

    /// 按名字查找队列的映射，构造一次后不再修改
    pub fn queue_index(&self) -> HashMap<&str, &QueueSpec> {
        self.queues.iter().map(|q| (q.name.as_str(), q)).collect()
    }

    /// 通知发布使用的端点：优先 `rabbit`，否则退回第一个队列的端点
    pub fn notify_endpoints(&self) -> Vec<BrokerEndpoint> {
        if !self.rabbit.is_empty() {
            return self.rabbit.clone();
        }
        self.queues
            .iter()
            .flat_map(|q| q.endpoints.iter().cloned())
            .take(1)
            .collect()
    }
}
