//! Fixed-window rate limiting per client IP

use async_trait::async_trait;
use axum::{
    Json,
    http::{StatusCode, header},
    response::IntoResponse,
};
use common::{CacheResult, CounterStore, MemoryCounterStore};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use super::{Gate, GateContext, Outcome};

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    /// Requests allowed per window
    pub max_attempts: u64,
    /// Window length in seconds
    pub window_seconds: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 60,
            window_seconds: 60,
        }
    }
}

/// Counts requests per IP in a shared store, falling back to process memory.
///
/// Counter failures never block a request.
#[derive(Clone)]
pub struct RateLimitGate {
    config: RateLimiterConfig,
    primary: Option<Arc<dyn CounterStore>>,
    fallback: MemoryCounterStore,
}

impl RateLimitGate {
    pub fn new(config: RateLimiterConfig, primary: Option<Arc<dyn CounterStore>>) -> Self {
        Self {
            config,
            primary,
            fallback: MemoryCounterStore::new(),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// The in-process store, for periodic purging
    pub fn fallback_store(&self) -> &MemoryCounterStore {
        &self.fallback
    }

    fn key(client_ip: &str) -> String {
        format!("rate_limit:{}", client_ip)
    }

    async fn check(&self, store: &dyn CounterStore, key: &str) -> CacheResult<bool> {
        let current = store.current(key).await?.unwrap_or(0);
        if current >= self.config.max_attempts {
            return Ok(false);
        }
        store.increment(key, self.config.window_seconds).await?;
        Ok(true)
    }

    /// Check if a client IP may make another request in the current window
    pub async fn is_allowed(&self, client_ip: &str) -> bool {
        let key = Self::key(client_ip);

        if let Some(primary) = &self.primary {
            match self.check(primary.as_ref(), &key).await {
                Ok(allowed) => return allowed,
                Err(e) => error!("Rate limit store failed, using in-process counters: {}", e),
            }
        }

        match self.check(&self.fallback, &key).await {
            Ok(allowed) => allowed,
            Err(e) => {
                error!("In-process rate limit check failed, allowing request: {}", e);
                true
            }
        }
    }
}

#[async_trait]
impl Gate for RateLimitGate {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, ctx: &GateContext) -> Outcome {
        let ip = &ctx.request.client_ip;
        if self.is_allowed(ip).await {
            return Outcome::Continue;
        }

        warn!(
            ip = %ip,
            uri = %ctx.request.uri,
            max_attempts = self.config.max_attempts,
            window_seconds = self.config.window_seconds,
            "Rate limit exceeded"
        );

        let body = Json(json!({
            "error": "Too many requests. Please try again later.",
        }));
        Outcome::Halt(
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, self.config.window_seconds.to_string())],
                body,
            )
                .into_response(),
        )
    }
}
