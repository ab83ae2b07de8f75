use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// 每个窗口允许的基础请求数，0 表示不限流
    pub qps: u64,
    /// 积压系数
    #[serde(alias = "qlCoefficient")]
    pub ql_coefficient: f64,
    pub window_ms: u64,
    /// 发布积压深度的录制服务名，积压键为 `{backlog_service}:queue_depth`
    pub backlog_service: String,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            qps: 0,
            ql_coefficient: 0.0,
            window_ms: 1000,
            backlog_service: "mcu".to_string(),
        }
    }
}

impl RateConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.ql_coefficient.is_finite() {
            return Err(anyhow::anyhow!("积压系数必须是有限数值"));
        }

        if self.window_ms == 0 {
            return Err(anyhow::anyhow!("限流窗口必须大于0"));
        }

        if self.backlog_service.is_empty() {
            return Err(anyhow::anyhow!("积压深度服务名不能为空"));
        }

        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
    pub request_timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("绑定地址不能为空"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// `json` 或 `pretty`
    pub log_format: String,
    /// Prometheus指标监听地址，为空时不启用
    pub metrics_bind: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "debug".to_string(),
            log_format: "pretty".to_string(),
            metrics_bind: None,
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(anyhow::anyhow!("无效的日志级别: {}", self.log_level));
        }

        if !["json", "pretty"].contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!("无效的日志格式: {}", self.log_format));
        }

        Ok(())
    }
}
