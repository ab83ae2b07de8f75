//! 配置管理
//!
//! 进程启动时从TOML文件和 `MCU_` 前缀的环境变量加载一次 [`AppConfig`]，
//! 解析 `POD_IP` 等运行环境字段并校验后，以只读方式传入各组件的构造函数。
//! 组件不直接读取全局配置或环境变量。
//!
//! ```toml
//! service = "mcu"
//!
//! [[queues]]
//! name = "test-pro"
//! limit = -1
//! priority = 0
//! enable = true
//!
//! [[queues.urls]]
//! auth = "yulu:yulu"
//! url = "rabbitmq:5672"
//! monitor_url = "http://rabbitmq:15672/api/health/checks/port-listener/5672"
//!
//! [cluster]
//! join_retry = 60
//! port = 12009
//! ```

pub mod models;

pub use models::{
    ApiConfig, AppConfig, ClusterConfig, LoadConfig, LoadItem, MockConfig, NotifyConfig,
    ObservabilityConfig, RateConfig, RecorderConfig, RedisConfig, WorkerConfig,
};

#[cfg(test)]
mod config_test;
