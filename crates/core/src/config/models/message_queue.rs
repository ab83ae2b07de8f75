use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{BrokerEndpoint, QueueSpec};

/// Redis configuration，限流计数的共享存储
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: i64,
    pub password: Option<String>,
    pub connection_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connection_timeout_seconds: 5,
        }
    }
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connection_timeout_seconds", &self.connection_timeout_seconds)
            .finish()
    }
}

impl RedisConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Redis主机地址不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("Redis端口必须大于0"));
        }

        if self.database < 0 {
            return Err(anyhow::anyhow!("Redis数据库索引不能为负数"));
        }

        Ok(())
    }

    /// Build Redis connection URL
    pub fn build_url(&self) -> String {
        let auth = match self.password.as_deref() {
            Some(password) if !password.is_empty() => format!(":{password}@"),
            _ => String::new(),
        };
        format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.database)
    }
}

/// 下游通知队列
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    #[serde(alias = "postProcessQueue")]
    pub post_process_queue: String,
    #[serde(alias = "monitorNotify")]
    pub monitor_notify: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            post_process_queue: "cloudproc".to_string(),
            monitor_notify: "monitor".to_string(),
        }
    }
}

/// 校验逻辑队列列表
pub fn validate_queues(queues: &[QueueSpec]) -> anyhow::Result<()> {
    let mut names = HashSet::new();
    for queue in queues {
        if queue.name.is_empty() {
            return Err(anyhow::anyhow!("队列名称不能为空"));
        }

        if !names.insert(queue.name.as_str()) {
            return Err(anyhow::anyhow!("队列名称重复: {}", queue.name));
        }

        if queue.limit < -1 {
            return Err(anyhow::anyhow!(
                "队列 {} 的limit必须大于等于-1，当前为 {}",
                queue.name,
                queue.limit
            ));
        }

        if queue.enabled && queue.endpoints.is_empty() {
            return Err(anyhow::anyhow!("已启用的队列 {} 没有配置代理端点", queue.name));
        }

        for endpoint in &queue.endpoints {
            validate_endpoint(endpoint)?;
        }
    }
    Ok(())
}

pub fn validate_endpoint(endpoint: &BrokerEndpoint) -> anyhow::Result<()> {
    if endpoint.url.is_empty() {
        return Err(anyhow::anyhow!("代理端点地址不能为空"));
    }

    if !endpoint.auth.contains(':') {
        return Err(anyhow::anyhow!(
            "代理端点 {} 的认证信息必须是 user:password 格式",
            endpoint.url
        ));
    }

    if !endpoint.monitor_url.starts_with("http://") && !endpoint.monitor_url.starts_with("https://")
    {
        return Err(anyhow::anyhow!(
            "代理端点 {} 的健康检查地址必须是HTTP地址",
            endpoint.url
        ));
    }

    Ok(())
}
