pub mod health;
pub mod load_sampler;
pub mod message_queue;
pub mod message_queue_factory;
pub mod redis_rate_store;
pub mod registry_client;
pub mod simulator;

pub use health::*;
pub use load_sampler::*;
pub use message_queue::*;
pub use message_queue_factory::*;
pub use redis_rate_store::*;
pub use registry_client::*;
pub use simulator::*;
