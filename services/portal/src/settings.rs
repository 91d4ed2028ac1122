//! Cached access to persisted portal settings

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{error, info};

use crate::repositories::SettingsSource;

pub const MAINTENANCE_MODE: &str = "maintenance_mode";
pub const DEBUG_MODE: &str = "debug_mode";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Settings reader with an in-process cache.
///
/// Values (including absent ones) are cached for `ttl`, until
/// [`SettingsStore::invalidate`] is called, or until the value is written
/// through [`SettingsStore::set`]. The TTL bounds how long a change made by
/// another instance goes unseen.
#[derive(Clone)]
pub struct SettingsStore {
    source: Arc<dyn SettingsSource>,
    cache: Arc<RwLock<HashMap<String, (Option<String>, Instant)>>>,
    ttl: Duration,
}

impl SettingsStore {
    pub fn new(source: Arc<dyn SettingsSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Read a setting, consulting the cache first
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some((value, fetched_at)) = self.cache.read().await.get(key) {
            if fetched_at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }

        let value = self.source.fetch(key).await?;
        self.cache
            .write()
            .await
            .insert(key.to_string(), (value.clone(), Instant::now()));
        Ok(value)
    }

    /// Read a boolean setting.
    ///
    /// Lookup failures are logged and read as `false`; they are not cached.
    pub async fn flag(&self, key: &str) -> bool {
        match self.get(key).await {
            Ok(value) => value.as_deref().is_some_and(parse_flag),
            Err(e) => {
                error!("Failed to read setting {}: {}", key, e);
                false
            }
        }
    }

    /// Persist a setting and drop its cached value
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.source.store(key, value).await?;
        self.cache.write().await.remove(key);
        info!("Setting {} updated", key);
        Ok(())
    }

    pub async fn set_flag(&self, key: &str, enabled: bool) -> Result<()> {
        self.set(key, if enabled { "1" } else { "0" }).await
    }

    /// Drop every cached value
    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
    }
}

/// Interpret the string forms settings have been stored under
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::MemorySettings;

    #[test]
    fn test_parse_flag() {
        for raw in ["1", "true", "TRUE", " on ", "yes"] {
            assert!(parse_flag(raw), "{raw} should be enabled");
        }
        for raw in ["0", "false", "off", "", "maybe"] {
            assert!(!parse_flag(raw), "{raw} should be disabled");
        }
    }

    #[tokio::test]
    async fn test_values_are_cached_until_invalidated() {
        let source = MemorySettings::new().with(MAINTENANCE_MODE, "1");
        let store = SettingsStore::new(Arc::new(source.clone()), DEFAULT_CACHE_TTL);

        assert!(store.flag(MAINTENANCE_MODE).await);
        assert!(store.flag(MAINTENANCE_MODE).await);
        assert!(!store.flag(DEBUG_MODE).await);
        assert!(!store.flag(DEBUG_MODE).await);
        assert_eq!(source.fetches(), 2);

        // A write behind the cache's back is not seen until invalidation
        source.store(MAINTENANCE_MODE, "0").await.unwrap();
        assert!(store.flag(MAINTENANCE_MODE).await);
        store.invalidate().await;
        assert!(!store.flag(MAINTENANCE_MODE).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_from_elsewhere_show_up_after_ttl() {
        let source = MemorySettings::new();
        let store = SettingsStore::new(Arc::new(source.clone()), Duration::from_secs(5));

        assert!(!store.flag(MAINTENANCE_MODE).await);
        // Another instance turns maintenance on
        source.store(MAINTENANCE_MODE, "1").await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!store.flag(MAINTENANCE_MODE).await);
        assert_eq!(source.fetches(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.flag(MAINTENANCE_MODE).await);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_set_writes_through() {
        let source = MemorySettings::new();
        let store = SettingsStore::new(Arc::new(source.clone()), DEFAULT_CACHE_TTL);

        assert!(!store.flag(DEBUG_MODE).await);
        store.set_flag(DEBUG_MODE, true).await.unwrap();
        assert!(store.flag(DEBUG_MODE).await);
        assert_eq!(source.fetch(DEBUG_MODE).await.unwrap().as_deref(), Some("1"));
    }
}
