pub mod memory_store;
pub mod redis_store;

pub use memory_store::InMemoryCoordinationStore;
pub use redis_store::RedisCoordinationStore;
