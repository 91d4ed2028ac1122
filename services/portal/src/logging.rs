//! Tracing setup and request logging
//!
//! The log filter is installed behind a reload handle so the settings page
//! can switch debug verbosity on and off without a restart.

use anyhow::Result;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

pub const PRODUCTION_FILTER: &str = "info";
pub const DEBUG_FILTER: &str = "debug,hyper=info,sqlx=warn,tower=info,h2=info";

pub fn filter_directives(debug: bool) -> &'static str {
    if debug { DEBUG_FILTER } else { PRODUCTION_FILTER }
}

/// Handle for changing the active log filter
#[derive(Clone, Default)]
pub struct LogControl {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl LogControl {
    /// A control that changes nothing, for tests and embedded use
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn set_debug(&self, enabled: bool) {
        let Some(handle) = &self.handle else {
            return;
        };

        match handle.reload(EnvFilter::new(filter_directives(enabled))) {
            Ok(()) => info!(debug_mode = enabled, "Log filter updated"),
            Err(e) => error!("Failed to update log filter: {}", e),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, takes precedence over the debug setting at startup.
pub fn init_tracing(debug: bool) -> Result<LogControl> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(debug)));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(LogControl {
        handle: Some(handle),
    })
}

pub async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let page = crate::pages::Page::from_uri(req.uri());
    let request_id = uuid::Uuid::new_v4().to_string();

    let response = next.run(req).await;
    let latency = start.elapsed();
    let status = response.status();

    match status.as_u16() {
        500..=599 => error!(
            request_id = %request_id,
            method = %method,
            path = %path,
            page = %page,
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            "Server error"
        ),
        400..=499 => warn!(
            request_id = %request_id,
            method = %method,
            path = %path,
            page = %page,
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            "Client error"
        ),
        _ => info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            page = %page,
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            "Request completed"
        ),
    }

    response
}
