//! Portal configuration
//!
//! Defaults are set in code and overridden by `PORTAL__<SECTION>__<KEY>`
//! environment variables, e.g. `PORTAL__RATE_LIMIT__MAX_ATTEMPTS=120`.
//! Database and Redis settings keep their own `DATABASE_URL` / `REDIS_URL`
//! variables (see `common::database` and `common::cache`).

use config::{Config, Environment};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::PortalError;
use crate::gates::rate_limit::RateLimiterConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl_seconds: u64,
    pub secure_cookie: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    pub retry_after_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsConfig {
    /// How long a cached `maintenance_mode` / `debug_mode` value is trusted
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Take the client IP from `X-Forwarded-For` (only behind a trusted proxy)
    pub trust_proxy_headers: bool,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimiterConfig,
    pub maintenance: MaintenanceConfig,
    pub settings: SettingsConfig,
    pub security: SecurityConfig,
    /// Replaces the built-in permission table when set
    #[serde(default)]
    pub permissions_file: Option<PathBuf>,
}

impl PortalConfig {
    /// Load configuration from defaults and the environment
    pub fn from_env() -> Result<Self, PortalError> {
        let settings = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080_i64)?
            .set_default("session.cookie_name", "PORTALSESSID")?
            .set_default("session.ttl_seconds", 7200_i64)?
            .set_default("session.secure_cookie", false)?
            .set_default("rate_limit.enabled", true)?
            .set_default("rate_limit.max_attempts", 60_i64)?
            .set_default("rate_limit.window_seconds", 60_i64)?
            .set_default("maintenance.retry_after_seconds", 3600_i64)?
            .set_default("settings.cache_ttl_seconds", 5_i64)?
            .set_default("security.trust_proxy_headers", false)?
            .set_default("security.max_body_bytes", 1_048_576_i64)?
            .add_source(
                Environment::with_prefix("PORTAL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            session: SessionConfig {
                cookie_name: "PORTALSESSID".to_string(),
                ttl_seconds: 7200,
                secure_cookie: false,
            },
            rate_limit: RateLimiterConfig::default(),
            maintenance: MaintenanceConfig {
                retry_after_seconds: 3600,
            },
            settings: SettingsConfig {
                cache_ttl_seconds: 5,
            },
            security: SecurityConfig {
                trust_proxy_headers: false,
                max_body_bytes: 1_048_576,
            },
            permissions_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const OVERRIDES: [(&str, &str); 5] = [
        ("PORTAL__RATE_LIMIT__MAX_ATTEMPTS", "5"),
        ("PORTAL__SETTINGS__CACHE_TTL_SECONDS", "30"),
        ("PORTAL__SECURITY__TRUST_PROXY_HEADERS", "true"),
        ("PORTAL__SESSION__COOKIE_NAME", "portal_sid"),
        ("PORTAL__PERMISSIONS_FILE", "/etc/portal/permissions.json"),
    ];

    fn clear_overrides() {
        for (key, _) in OVERRIDES {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults_match_built_in_config() {
        clear_overrides();

        let config = PortalConfig::from_env().unwrap();
        let defaults = PortalConfig::default();

        assert_eq!(config.server.port, defaults.server.port);
        assert_eq!(config.session.cookie_name, "PORTALSESSID");
        assert_eq!(config.rate_limit.max_attempts, 60);
        assert_eq!(config.rate_limit.window_seconds, 60);
        assert_eq!(config.maintenance.retry_after_seconds, 3600);
        assert_eq!(config.settings.cache_ttl_seconds, 5);
        assert!(!config.security.trust_proxy_headers);
        assert!(config.permissions_file.is_none());
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        for (key, value) in OVERRIDES {
            unsafe {
                env::set_var(key, value);
            }
        }

        let config = PortalConfig::from_env();
        clear_overrides();
        let config = config.unwrap();

        assert_eq!(config.rate_limit.max_attempts, 5);
        assert_eq!(config.settings.cache_ttl_seconds, 30);
        assert!(config.security.trust_proxy_headers);
        assert_eq!(config.session.cookie_name, "portal_sid");
        assert_eq!(
            config.permissions_file,
            Some(PathBuf::from("/etc/portal/permissions.json"))
        );
    }

    #[test]
    fn test_bind_address() {
        assert_eq!(PortalConfig::default().bind_address(), "0.0.0.0:8080");
    }
}
