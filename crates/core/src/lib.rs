pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use logging::init_logging;
pub use models::{
    BrokerEndpoint, ClusterNode, ClusterState, Job, JobOutcome, LoadSample, MonitorEvent,
    PostProcessTask, QueueSpec, SlotSnapshot,
};
pub use traits::{
    queue_depth_key, rate_window_key, BrokerClient, DeadLetterSink, HealthChecker, JobSink,
    LoadSampler, RateStore, RecordingSession, RegistryClient, SessionFactory,
};
