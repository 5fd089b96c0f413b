//! Sliding-window admission control over a shared counter store.

mod key;
mod limiter;
mod memory_store;
mod redis_store;
mod store;

pub use key::WindowKey;
pub use limiter::{Decision, SlidingWindowLimiter};
pub use memory_store::InMemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use store::{AtomicAdmission, CounterStore, WindowCheck};
