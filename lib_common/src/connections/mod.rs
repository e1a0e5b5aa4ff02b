//! # Connections Module
//!
//! This module handles the shared state store that producers and the reset
//! worker coordinate through.

/// The store contract: atomic batches, point reads and the due index.
pub mod store;

/// Module for Redis-backed alarm state.
#[cfg(feature = "connections")]
pub mod cache_redis;

/// Process-local store with the same atomicity guarantees.
pub mod cache_memory;

pub use cache_memory::MemoryStore;
#[cfg(feature = "connections")]
pub use cache_redis::RedisStore;
pub use store::{AlarmStore, DueGuard, StoreOp};
