//! Redis cache module for the portal
//!
//! This module provides the Redis connection used for sessions and rate-limit
//! counters, the [`CounterStore`] abstraction consumed by the rate limiter,
//! and an in-process counter store used when Redis is unavailable.

use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

use crate::error::{CacheError, CacheResult};

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> CacheResult<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(CacheError::Configuration(format!(
                "Unsupported Redis URL scheme: {}",
                url
            )));
        }

        Ok(RedisConfig { url })
    }
}

/// Redis client handing out multiplexed connections
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
}

impl RedisPool {
    /// Initialize a new Redis connection pool
    pub async fn new(config: &RedisConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool { client })
    }

    async fn get_connection(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Set a key-value pair in Redis with optional TTL
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;

        if let Some(ttl) = ttl_seconds {
            let _: () = conn.set_ex(key, value, ttl).await?;
        } else {
            let _: () = conn.set(key, value).await?;
        }

        Ok(())
    }

    /// Get a value from Redis by key
    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    /// Delete a key from Redis
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let _: u64 = conn.del(key).await?;
        Ok(())
    }

    /// Increment a counter, starting its TTL on the first increment only.
    ///
    /// The `SET NX EX` + `INCR` pair runs in a MULTI block so a fresh key
    /// never exists without an expiry.
    pub async fn incr_with_ttl(&self, key: &str, ttl_seconds: u64) -> CacheResult<u64> {
        let mut conn = self.get_connection().await?;
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(0)
            .arg("EX")
            .arg(ttl_seconds)
            .arg("NX")
            .ignore()
            .incr(key, 1)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

/// Fixed-window hit counters keyed by an arbitrary string
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count for `key`, `None` when the window has not started
    async fn current(&self, key: &str) -> CacheResult<Option<u64>>;

    /// Increment `key`; the first increment opens a window of `ttl_seconds`
    async fn increment(&self, key: &str, ttl_seconds: u64) -> CacheResult<u64>;
}

#[async_trait]
impl CounterStore for RedisPool {
    async fn current(&self, key: &str) -> CacheResult<Option<u64>> {
        match self.get(key).await? {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| CacheError::Value(format!("counter {} holds {:?}", key, raw))),
            None => Ok(None),
        }
    }

    async fn increment(&self, key: &str, ttl_seconds: u64) -> CacheResult<u64> {
        self.incr_with_ttl(key, ttl_seconds).await
    }
}

#[derive(Debug)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// In-process counter store.
///
/// Only correct within a single process; used as the degraded fallback when
/// the shared backend fails.
#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStore {
    entries: Arc<Mutex<HashMap<String, CounterEntry>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired window
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn current(&self, key: &str) -> CacheResult<Option<u64>> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.count))
    }

    async fn increment(&self, key: &str, ttl_seconds: u64) -> CacheResult<u64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let entry = entries.entry(key.to_string()).or_insert(CounterEntry {
            count: 0,
            expires_at: now + Duration::from_secs(ttl_seconds),
        });

        // Window expired, start a new one
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + Duration::from_secs(ttl_seconds);
        }

        entry.count += 1;
        Ok(entry.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> RedisConfig {
        RedisConfig {
            url: "redis://localhost:6379".to_string(),
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_redis_config_from_env() {
        unsafe {
            std::env::remove_var("REDIS_URL");
        }
        assert_eq!(RedisConfig::from_env().unwrap().url, "redis://localhost:6379");

        unsafe {
            std::env::set_var("REDIS_URL", "rediss://cache.internal:6380");
        }
        assert_eq!(
            RedisConfig::from_env().unwrap().url,
            "rediss://cache.internal:6380"
        );

        unsafe {
            std::env::set_var("REDIS_URL", "http://localhost:6379");
        }
        assert!(matches!(
            RedisConfig::from_env(),
            Err(CacheError::Configuration(_))
        ));

        unsafe {
            std::env::remove_var("REDIS_URL");
        }
    }

    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn test_redis_connection() -> anyhow::Result<()> {
        let pool = RedisPool::new(&local_config()).await?;
        assert!(pool.health_check().await?);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn test_redis_counter_window() -> anyhow::Result<()> {
        let pool = RedisPool::new(&local_config()).await?;
        let key = "test_counter_window";
        pool.delete(key).await?;

        assert_eq!(pool.current(key).await?, None);
        assert_eq!(pool.increment(key, 5).await?, 1);
        assert_eq!(pool.increment(key, 5).await?, 2);
        assert_eq!(pool.current(key).await?, Some(2));

        pool.delete(key).await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_counter_resets_after_window() {
        let store = MemoryCounterStore::new();

        assert_eq!(store.current("ip").await.unwrap(), None);
        assert_eq!(store.increment("ip", 60).await.unwrap(), 1);
        assert_eq!(store.increment("ip", 60).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.increment("ip", 60).await.unwrap(), 3);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.current("ip").await.unwrap(), None);
        assert_eq!(store.increment("ip", 60).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_counter_keys_are_independent() {
        let store = MemoryCounterStore::new();
        store.increment("a", 10).await.unwrap();
        store.increment("a", 10).await.unwrap();
        store.increment("b", 1).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.current("a").await.unwrap(), Some(2));
        assert_eq!(store.current("b").await.unwrap(), None);
    }
}
