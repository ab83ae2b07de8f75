pub mod cluster;
pub mod completion;
pub mod executors;
pub mod notifier;
pub mod pool;
pub mod reaper;
pub mod service;

pub use cluster::ClusterAgent;
pub use completion::CompletionRouter;
pub use executors::{ProcessSessionFactory, SimulatedSessionFactory};
pub use notifier::PostProcessNotifier;
pub use pool::{SlotReservation, WorkerPool};
pub use reaper::IdleReaper;
pub use service::{local_hostname, RecorderNode};
