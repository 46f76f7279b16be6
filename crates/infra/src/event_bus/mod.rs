//! Infrastructure pub/sub implementations.
//!
//! The `PubSub` contract and the in-memory bus live in `piiscan-events`. This
//! module provides the Redis-backed bus used across processes.

#[cfg(feature = "redis")]
pub mod redis_queue;

#[cfg(feature = "redis")]
pub use redis_queue::RedisQueueBus;
