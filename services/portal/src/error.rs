//! Custom error types for the portal service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorReport;

/// Custom error type for the portal service
#[derive(Error, Debug)]
pub enum PortalError {
    /// Bad request with message
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Request body too large")]
    PayloadTooLarge,

    /// Internal server error with details for the log
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl PortalError {
    pub fn status(&self) -> StatusCode {
        match self {
            PortalError::BadRequest(_) => StatusCode::BAD_REQUEST,
            PortalError::NotFound => StatusCode::NOT_FOUND,
            PortalError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            PortalError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            PortalError::Internal(_) | PortalError::Config(_) | PortalError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PortalError::BadRequest(_) => "bad_request",
            PortalError::NotFound => "not_found",
            PortalError::MethodNotAllowed => "method_not_allowed",
            PortalError::PayloadTooLarge => "payload_too_large",
            PortalError::Internal(_) => "internal",
            PortalError::Config(_) => "config",
            PortalError::Unexpected(_) => "unexpected",
        }
    }
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = self.status();

        if !status.is_server_error() {
            let message = match &self {
                PortalError::BadRequest(msg) => msg.clone(),
                other => other.to_string(),
            };
            return (status, Json(json!({ "error": message }))).into_response();
        }

        // Details stay in the log and the report; the client only sees a reference
        let report = ErrorReport::new(self.kind(), DisplayChain(&self).to_string());
        error!(reference = %report.reference, kind = %report.kind, "{}", report.message);

        let body = Json(json!({
            "error": "Internal server error",
            "reference": report.reference,
        }));
        let mut response = (status, body).into_response();
        response.extensions_mut().insert(report);
        response
    }
}

/// Formats an error including the context chain of wrapped `anyhow` errors
struct DisplayChain<'a>(&'a PortalError);

impl std::fmt::Display for DisplayChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            PortalError::Unexpected(inner) => write!(f, "{:#}", inner),
            other => write!(f, "{}", other),
        }
    }
}

/// Type alias for portal results
pub type PortalResult<T> = Result<T, PortalError>;
