pub mod api_observability;
pub mod app_config;
pub mod cluster;
pub mod dispatcher_worker;
pub mod message_queue;

pub use api_observability::{ApiConfig, ObservabilityConfig, RateConfig};
pub use app_config::AppConfig;
pub use cluster::{ClusterConfig, LoadConfig, LoadItem};
pub use dispatcher_worker::{MockConfig, RecorderConfig, WorkerConfig};
pub use message_queue::{NotifyConfig, RedisConfig};
