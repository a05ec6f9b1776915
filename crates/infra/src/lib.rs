//! Infrastructure backends: invoice stores and event channels.

pub mod channel;
pub mod store;


pub use channel::in_memory::InMemoryEventChannel;
#[cfg(feature = "redis")]
pub use channel::redis_streams::{RedisStreamsConfig, RedisStreamsEventChannel};
pub use store::in_memory::InMemoryInvoiceStore;
pub use store::postgres::PostgresInvoiceStore;
