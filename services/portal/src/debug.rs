//! Debug mode
//!
//! With the `debug_mode` setting on, server errors that carry an
//! [`ErrorReport`] are shown to the client: the report is parked in the
//! session and the browser is sent to the debug error page, or the report is
//! rendered inline when there is no session. HTML responses also get a small
//! timing panel. With the setting off, responses pass through untouched.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Response},
};
use std::any::Any;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::PortalError;
use crate::gates::found;
use crate::models::ErrorReport;
use crate::session::Session;
use crate::settings::{DEBUG_MODE, SettingsStore};
use crate::views;

pub const DEBUG_ERROR_ROUTE: &str = "/index.php?page=debug_error";

pub async fn debug_layer(
    State(settings): State<SettingsStore>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let session = req.extensions().get::<Session>().cloned();
    let uri = req.uri().to_string();

    let response = next.run(req).await;

    if !settings.flag(DEBUG_MODE).await {
        return response;
    }

    if response.status().is_server_error() {
        if let Some(report) = response.extensions().get::<ErrorReport>().cloned() {
            let report = match report.uri {
                Some(_) => report,
                None => report.with_uri(uri),
            };
            return surface_report(session, report).await;
        }
    }

    if is_html(&response) {
        return append_panel(response, started).await;
    }

    response
}

async fn surface_report(session: Option<Session>, report: ErrorReport) -> Response {
    match session {
        Some(session) => {
            debug!(reference = %report.reference, "Redirecting to debug error page");
            session.update(|data| data.error_report = Some(report)).await;
            found(DEBUG_ERROR_ROUTE)
        }
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(views::error_report_page(&report)),
        )
            .into_response(),
    }
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"))
}

async fn append_panel(response: Response, started: Instant) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to buffer response for the debug panel: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    let mut html = bytes.to_vec();
    html.extend_from_slice(views::debug_panel(elapsed_ms, bytes.len()).as_bytes());

    parts.headers.remove(header::CONTENT_LENGTH);
    if let Ok(length) = HeaderValue::from_str(&html.len().to_string()) {
        parts.headers.insert(header::CONTENT_LENGTH, length);
    }
    Response::from_parts(parts, Body::from(html))
}

/// `CatchPanicLayer` handler: a panic becomes a 500 carrying an [`ErrorReport`]
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    PortalError::Internal(format!("handler panicked: {}", message)).into_response()
}
