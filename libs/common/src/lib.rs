//! Common library for the portal
//!
//! This crate provides the infrastructure shared by the portal services:
//! PostgreSQL connectivity, the Redis connection, hit counters for rate
//! limiting and the error types they report.

pub mod cache;
pub mod database;
pub mod error;

pub use cache::{CounterStore, MemoryCounterStore, RedisConfig, RedisPool};
pub use error::{CacheError, CacheResult, DatabaseError, DatabaseResult};
