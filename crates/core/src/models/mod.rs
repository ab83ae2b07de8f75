pub mod cluster;
pub mod job;
pub mod message;
pub mod queue;
pub mod worker;

pub use cluster::{ClusterNode, ClusterState, LoadSample};
pub use job::Job;
pub use message::{MonitorEvent, MonitorEventKind, PostProcessTask};
pub use queue::{BrokerEndpoint, QueueSpec};
pub use worker::{JobOutcome, SlotSnapshot};
