pub mod message_queue;
pub mod rate_store;
pub mod registry;
pub mod task_executor;

pub use message_queue::*;
pub use rate_store::*;
pub use registry::*;
pub use task_executor::*;
