use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 集群成员配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub purpose: String,
    /// 调度服务名
    pub scheduler: String,
    /// 注册服务名
    pub registry: String,
    /// 加入失败后的重试间隔（秒）
    pub join_retry: u64,
    /// 为空时从 `POD_IP` 解析
    pub ip: String,
    pub port: u16,
    pub load: LoadConfig,
    /// 连续多少次上报失败视为心跳丢失
    pub heartbeat_tolerance: u32,
    pub request_timeout_seconds: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            purpose: "mcu".to_string(),
            scheduler: "mcu-cluster-scheduler".to_string(),
            registry: "mcu-cluster-registry".to_string(),
            join_retry: 60,
            ip: String::new(),
            port: 12009,
            load: LoadConfig::default(),
            heartbeat_tolerance: 3,
            request_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// 上报周期（毫秒）
    pub period: u64,
    pub item: LoadItem,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            period: 1000,
            item: LoadItem::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadItem {
    pub name: String,
}

impl Default for LoadItem {
    fn default() -> Self {
        Self {
            name: "cpu".to_string(),
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.purpose.is_empty() {
            return Err(anyhow::anyhow!("集群用途标识不能为空"));
        }

        if self.scheduler.is_empty() || self.registry.is_empty() {
            return Err(anyhow::anyhow!("调度服务和注册服务名不能为空"));
        }

        if self.join_retry == 0 {
            return Err(anyhow::anyhow!("加入集群重试间隔必须大于0"));
        }

        if self.ip.is_empty() {
            return Err(anyhow::anyhow!("节点IP不能为空，请设置 cluster.ip 或 POD_IP"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("节点端口必须大于0"));
        }

        if self.load.period == 0 {
            return Err(anyhow::anyhow!("负载上报周期必须大于0"));
        }

        if self.heartbeat_tolerance == 0 {
            return Err(anyhow::anyhow!("心跳容忍次数必须大于0"));
        }

        Ok(())
    }

    pub fn join_retry_interval(&self) -> Duration {
        Duration::from_secs(self.join_retry)
    }

    pub fn load_period(&self) -> Duration {
        Duration::from_millis(self.load.period)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
