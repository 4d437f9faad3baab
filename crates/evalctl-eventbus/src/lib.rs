//! Event bus (C3): typed pub/sub over the named channels in
//! `evalctl_types::channels`, at-least-once, replay-safe.

pub mod bus;
pub mod error;
pub mod memory;
pub mod redis_bus;

pub use bus::EventBus;
pub use error::EventBusError;
pub use memory::InMemoryEventBus;
pub use redis_bus::RedisEventBus;
