use std::fmt;

use serde::{Deserialize, Serialize};

/// 单个物理消息代理连接
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerEndpoint {
    /// `user:password` 形式的认证信息
    pub auth: String,
    /// `host:port`
    pub url: String,
    /// 健康检查地址，返回2xx表示监听端口可达
    #[serde(alias = "monitorUrl")]
    pub monitor_url: String,
}

impl BrokerEndpoint {
    pub fn new(
        auth: impl Into<String>,
        url: impl Into<String>,
        monitor_url: impl Into<String>,
    ) -> Self {
        Self {
            auth: auth.into(),
            url: url.into(),
            monitor_url: monitor_url.into(),
        }
    }

    pub fn username(&self) -> &str {
        self.auth.split_once(':').map_or(self.auth.as_str(), |(user, _)| user)
    }

    pub fn password(&self) -> &str {
        self.auth.split_once(':').map_or("", |(_, password)| password)
    }

    /// 端点标识，不包含认证信息，可以安全地写入日志
    pub fn id(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerEndpoint")
            .field("auth", &format_args!("{}:***", self.username()))
            .field("url", &self.url)
            .field("monitor_url", &self.monitor_url)
            .finish()
    }
}

/// 一个命名的逻辑队列
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSpec {
    pub name: String,
    /// 最大并发数，-1 表示不限制
    #[serde(default = "default_limit")]
    pub limit: i32,
    /// 数值越大越先被服务
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled", alias = "enable")]
    pub enabled: bool,
    #[serde(default, alias = "urls")]
    pub endpoints: Vec<BrokerEndpoint>,
}

fn default_limit() -> i32 {
    -1
}

fn default_enabled() -> bool {
    true
}

impl QueueSpec {
    pub fn new(name: impl Into<String>, limit: i32, priority: i32) -> Self {
        Self {
            name: name.into(),
            limit,
            priority,
            enabled: true,
            endpoints: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: BrokerEndpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.limit < 0
    }

    /// 当前在途数量下是否还能再派发一个任务
    pub fn has_capacity(&self, in_flight: usize) -> bool {
        self.is_unbounded() || in_flight < self.limit as usize
    }
}
