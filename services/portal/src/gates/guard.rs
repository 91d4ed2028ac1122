//! Middleware running the gate chains in front of every page

use axum::{
    Form, Json,
    body::{Body, Bytes},
    extract::{ConnectInfo, FromRequest, Request, State},
    http::{HeaderMap, Method, header, request::Parts},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::debug;

use super::{CsrfGate, GateContext, Outcome, RequestInfo};
use crate::error::PortalError;
use crate::pages::Page;
use crate::session::Session;
use crate::state::AppState;

/// Resolves the principal and page, decodes the body once, then runs the
/// global chain and the page's access chain.
///
/// On success the [`GateContext`] and [`Page`] are placed in the request
/// extensions for the page handlers.
pub async fn guard(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, PortalError> {
    let Some(session) = req.extensions().get::<Session>().cloned() else {
        return Err(PortalError::Internal(
            "request reached the gates without a session".to_string(),
        ));
    };

    let principal = state.auth.principal(&session).await;
    let page = Page::from_uri(req.uri());

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, state.config.security.max_body_bytes)
        .await
        .map_err(|e| {
            debug!("Failed to buffer request body: {}", e);
            PortalError::PayloadTooLarge
        })?;

    let mut request = RequestInfo::new(parts.method.clone(), parts.uri.clone());
    request.headers = parts.headers.clone();
    request.client_ip = client_ip(&parts, state.config.security.trust_proxy_headers);
    if !CsrfGate::is_safe_method(&parts.method) && !bytes.is_empty() {
        decode_body(&mut request, &bytes).await;
    }

    let ctx = GateContext {
        request,
        session,
        principal,
    };

    if let Outcome::Halt(response) = state.gates.run(page.access(), &ctx).await {
        return Ok(response);
    }

    let mut req = Request::from_parts(parts, Body::from(bytes));
    req.extensions_mut().insert(page);
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Peer address, or the hop the trusted proxy appended to `X-Forwarded-For`
pub fn client_ip(parts: &Parts, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(forwarded) = forwarded_for(&parts.headers) {
            return forwarded;
        }
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rightmost hop; everything left of it is whatever the client sent
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .last()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
}

/// Decode form or JSON fields; undecodable bodies leave both empty
async fn decode_body(request: &mut RequestInfo, bytes: &Bytes) {
    let Some(content_type) = content_type(&request.headers).map(str::to_string) else {
        return;
    };

    let replay = match Request::builder()
        .method(Method::POST)
        .header(header::CONTENT_TYPE, &content_type)
        .body(Body::from(bytes.clone()))
    {
        Ok(replay) => replay,
        Err(e) => {
            debug!("Failed to rebuild request for body decoding: {}", e);
            return;
        }
    };

    if content_type.starts_with("application/x-www-form-urlencoded") {
        match Form::<HashMap<String, String>>::from_request(replay, &()).await {
            Ok(Form(fields)) => request.form = fields,
            Err(e) => debug!("Ignoring undecodable form body: {}", e),
        }
    } else if content_type.starts_with("application/json") {
        match Json::<Value>::from_request(replay, &()).await {
            Ok(Json(value)) => request.json = Some(value),
            Err(e) => debug!("Ignoring undecodable JSON body: {}", e),
        }
    }
}
