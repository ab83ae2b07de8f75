pub mod backlog;
pub mod priority;
pub mod retry_service;

pub use backlog::BacklogPublisher;
pub use priority::{DispatchedJob, PriorityDispatcher, QueuePermit};
pub use retry_service::{RetryController, RetryDecision};
