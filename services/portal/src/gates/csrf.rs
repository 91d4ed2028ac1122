//! CSRF gate for state-changing requests

use async_trait::async_trait;
use axum::{
    Json,
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use super::{Gate, GateContext, Outcome, RequestInfo};
use crate::csrf::{CSRF_FORM_FIELD, CSRF_HEADERS, TokenManager};
use crate::flash::FlashMessages;

pub const CSRF_FAILURE_MESSAGE: &str =
    "Your session has expired or the form was tampered with. Please try again.";

#[derive(Debug, Clone, Default)]
pub struct CsrfGate;

impl CsrfGate {
    pub fn is_safe_method(method: &Method) -> bool {
        matches!(
            *method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
        )
    }

    /// Submitted token: JSON field, then form field, then the headers.
    ///
    /// An empty value at one source falls through to the next.
    pub fn candidate_token(request: &RequestInfo) -> Option<String> {
        let from_json = request
            .json
            .as_ref()
            .and_then(|body| body.get(CSRF_FORM_FIELD))
            .and_then(|v| v.as_str())
            .filter(non_empty);

        from_json
            .or_else(|| {
                request
                    .form
                    .get(CSRF_FORM_FIELD)
                    .map(String::as_str)
                    .filter(non_empty)
            })
            .or_else(|| {
                CSRF_HEADERS
                    .iter()
                    .find_map(|name| request.header(name).filter(non_empty))
            })
            .map(str::to_string)
    }

    /// `403` with the failure message, as JSON for scripted clients
    pub fn rejection() -> Response {
        let body = Json(json!({ "errors": [CSRF_FAILURE_MESSAGE] }));
        (StatusCode::FORBIDDEN, body).into_response()
    }
}

fn non_empty(token: &&str) -> bool {
    !token.is_empty()
}

#[async_trait]
impl Gate for CsrfGate {
    fn name(&self) -> &'static str {
        "csrf"
    }

    async fn handle(&self, ctx: &GateContext) -> Outcome {
        let request = &ctx.request;
        if Self::is_safe_method(&request.method) {
            return Outcome::Continue;
        }

        if let Some(candidate) = Self::candidate_token(request) {
            if TokenManager::verify(&ctx.session, None, &candidate).await {
                debug!("CSRF token accepted");
                return Outcome::Continue;
            }
        }

        let session_id = ctx.session.id().await;
        warn!(
            target: "security",
            ip = %request.client_ip,
            user_agent = request.header(header::USER_AGENT.as_str()).unwrap_or("-"),
            uri = %request.uri,
            referer = request.header(header::REFERER.as_str()).unwrap_or("-"),
            session_id = %session_id,
            method = %request.method,
            "CSRF token validation failed"
        );

        TokenManager::regenerate(&ctx.session, None).await;
        FlashMessages::add_error(&ctx.session, CSRF_FAILURE_MESSAGE).await;

        Outcome::Halt(Self::rejection())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::testing::*;
    use crate::principal::Principal;
    use axum::http::HeaderValue;

    async fn post_context() -> (GateContext, String) {
        let ctx = context(Method::POST, "/index.php?page=tickets", Principal::anonymous());
        let token = TokenManager::token(&ctx.session, None).await;
        (ctx, token)
    }

    #[tokio::test]
    async fn test_safe_methods_bypass_regardless_of_token() {
        for method in [Method::GET, Method::HEAD, Method::OPTIONS] {
            let mut ctx = context(method, "/index.php", Principal::anonymous());
            assert!(CsrfGate.handle(&ctx).await.is_continue());

            ctx.request.form.insert(CSRF_FORM_FIELD.into(), "garbage".into());
            assert!(CsrfGate.handle(&ctx).await.is_continue());
        }
    }

    #[tokio::test]
    async fn test_form_token_accepted() {
        let (mut ctx, token) = post_context().await;
        ctx.request.form.insert(CSRF_FORM_FIELD.into(), token.clone());

        assert!(CsrfGate.handle(&ctx).await.is_continue());
        assert_eq!(TokenManager::token(&ctx.session, None).await, token);
    }

    #[tokio::test]
    async fn test_header_tokens_accepted() {
        for name in ["x-csrf-token", "x-xsrf-token"] {
            let (mut ctx, token) = post_context().await;
            ctx.request
                .headers
                .insert(name, HeaderValue::from_str(&token).unwrap());
            assert!(CsrfGate.handle(&ctx).await.is_continue(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_json_field_takes_precedence() {
        let (mut ctx, token) = post_context().await;
        ctx.request.json = Some(json!({ "csrf_token": token }));
        ctx.request.form.insert(CSRF_FORM_FIELD.into(), "stale".into());

        assert!(CsrfGate.handle(&ctx).await.is_continue());
    }

    #[tokio::test]
    async fn test_empty_values_fall_through_to_later_sources() {
        let (mut ctx, token) = post_context().await;
        ctx.request.json = Some(json!({ "csrf_token": "" }));
        ctx.request.form.insert(CSRF_FORM_FIELD.into(), String::new());
        ctx.request
            .headers
            .insert("x-csrf-token", HeaderValue::from_static(""));
        ctx.request
            .headers
            .insert("x-xsrf-token", HeaderValue::from_str(&token).unwrap());

        assert_eq!(CsrfGate::candidate_token(&ctx.request), Some(token.clone()));
        assert!(CsrfGate.handle(&ctx).await.is_continue());
        assert_eq!(TokenManager::token(&ctx.session, None).await, token);
    }

    #[tokio::test]
    async fn test_wrong_token_is_rejected_and_rotated() {
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            let (mut ctx, token) = post_context().await;
            ctx.request.method = method;
            ctx.request.form.insert(CSRF_FORM_FIELD.into(), "0".repeat(64));

            let outcome = CsrfGate.handle(&ctx).await;

            assert_eq!(status(&outcome), Some(StatusCode::FORBIDDEN));
            let rotated = TokenManager::token(&ctx.session, None).await;
            assert_ne!(rotated, token);
            assert_eq!(rotated.len(), 64);
        }
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected_and_rotated() {
        let (ctx, token) = post_context().await;

        let outcome = CsrfGate.handle(&ctx).await;

        assert_eq!(status(&outcome), Some(StatusCode::FORBIDDEN));
        assert_ne!(TokenManager::token(&ctx.session, None).await, token);
        let flash = ctx.session.snapshot().await.flash;
        assert_eq!(flash[0].text, CSRF_FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn test_session_without_token_rejects_post() {
        let mut ctx = context(Method::POST, "/index.php", Principal::anonymous());
        ctx.request.form.insert(CSRF_FORM_FIELD.into(), String::new());

        let outcome = CsrfGate.handle(&ctx).await;
        assert_eq!(status(&outcome), Some(StatusCode::FORBIDDEN));
        assert!(ctx.session.snapshot().await.csrf_tokens.contains_key("csrf_token"));
    }

    #[tokio::test]
    async fn test_namespaced_token_does_not_pass_global_check() {
        let (mut ctx, _) = post_context().await;
        let scoped = TokenManager::token(&ctx.session, Some("edit_user_1")).await;
        ctx.request.form.insert(CSRF_FORM_FIELD.into(), scoped);

        let outcome = CsrfGate.handle(&ctx).await;
        assert_eq!(status(&outcome), Some(StatusCode::FORBIDDEN));
    }
}
