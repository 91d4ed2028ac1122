//! Request gates
//!
//! Every gate answers one question about a request and returns an
//! [`Outcome`]: `Continue` lets the next gate (and finally the page handler)
//! run, `Halt` ends the request with the given response. Gates are grouped
//! into [`GateChain`]s and the [`GateSet`] picks the chains for a page.

use async_trait::async_trait;
use axum::{
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::pages::Access;
use crate::principal::Principal;
use crate::session::Session;

pub mod auth;
pub mod csrf;
pub mod guard;
pub mod maintenance;
pub mod rate_limit;
pub mod role;

pub use auth::AuthGate;
pub use csrf::CsrfGate;
pub use guard::guard;
pub use maintenance::MaintenanceGate;
pub use rate_limit::RateLimitGate;
pub use role::{Authorizer, RoleGate};

pub const LOGIN_ROUTE: &str = "/index.php?page=login";
pub const DASHBOARD_ROUTE: &str = "/index.php?page=dashboard";
pub const HOME_ROUTE: &str = "/index.php";

/// Result of a gate check
pub enum Outcome {
    Continue,
    Halt(Response),
}

impl Outcome {
    pub fn is_continue(&self) -> bool {
        matches!(self, Outcome::Continue)
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Continue => f.write_str("Continue"),
            Outcome::Halt(response) => write!(f, "Halt({})", response.status()),
        }
    }
}

/// What the gates may inspect about the incoming request
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub client_ip: String,
    /// Decoded `application/x-www-form-urlencoded` body fields
    pub form: HashMap<String, String>,
    /// Decoded JSON body, when the request carried one
    pub json: Option<serde_json::Value>,
}

impl RequestInfo {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            client_ip: "unknown".to_string(),
            form: HashMap::new(),
            json: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        query_params(&self.uri).remove(name)
    }

    /// Path plus query string, as it should be replayed after login
    pub fn path_and_query(&self) -> String {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| self.uri.path().to_string())
    }
}

/// Query parameters of a URI; an unparsable query reads as empty
pub fn query_params(uri: &Uri) -> HashMap<String, String> {
    axum::extract::Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|q| q.0)
        .unwrap_or_default()
}

/// Per-request state shared by every gate in the chain
#[derive(Debug, Clone)]
pub struct GateContext {
    pub request: RequestInfo,
    pub session: Session,
    pub principal: Principal,
}

#[async_trait]
pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &GateContext) -> Outcome;
}

/// Ordered gates; the first `Halt` wins
#[derive(Clone, Default)]
pub struct GateChain {
    gates: Vec<Arc<dyn Gate>>,
}

impl GateChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gate: impl Gate + 'static) -> Self {
        self.gates.push(Arc::new(gate));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|g| g.name()).collect()
    }

    pub async fn run(&self, ctx: &GateContext) -> Outcome {
        for gate in &self.gates {
            if let Outcome::Halt(response) = gate.handle(ctx).await {
                debug!(
                    gate = gate.name(),
                    status = response.status().as_u16(),
                    "Request halted"
                );
                return Outcome::Halt(response);
            }
        }
        Outcome::Continue
    }
}

/// Chains applied to every request plus one chain per access level
#[derive(Clone, Default)]
pub struct GateSet {
    pub global: GateChain,
    pub authenticated: GateChain,
    pub client_area: GateChain,
    pub admin_only: GateChain,
}

impl GateSet {
    pub fn chain_for(&self, access: Access) -> Option<&GateChain> {
        match access {
            Access::Public => None,
            Access::Authenticated => Some(&self.authenticated),
            Access::ClientArea => Some(&self.client_area),
            Access::AdminOnly => Some(&self.admin_only),
        }
    }

    pub async fn run(&self, access: Access, ctx: &GateContext) -> Outcome {
        if let Outcome::Halt(response) = self.global.run(ctx).await {
            return Outcome::Halt(response);
        }
        match self.chain_for(access) {
            Some(chain) => chain.run(ctx).await,
            None => Outcome::Continue,
        }
    }
}

/// `302 Found` redirect
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn context(method: Method, uri: &str, principal: Principal) -> GateContext {
        GateContext {
            request: RequestInfo::new(method, uri.parse().expect("valid test uri")),
            session: Session::fresh(),
            principal,
        }
    }

    pub fn location(outcome: &Outcome) -> Option<String> {
        match outcome {
            Outcome::Halt(response) => response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            Outcome::Continue => None,
        }
    }

    pub fn status(outcome: &Outcome) -> Option<StatusCode> {
        match outcome {
            Outcome::Halt(response) => Some(response.status()),
            Outcome::Continue => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
        halt: bool,
    }

    #[async_trait]
    impl Gate for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _ctx: &GateContext) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.halt {
                Outcome::Halt(StatusCode::IM_A_TEAPOT.into_response())
            } else {
                Outcome::Continue
            }
        }
    }

    #[tokio::test]
    async fn test_first_halt_stops_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = GateChain::new()
            .with(Counting {
                calls: calls.clone(),
                halt: false,
            })
            .with(Counting {
                calls: calls.clone(),
                halt: true,
            })
            .with(Counting {
                calls: calls.clone(),
                halt: false,
            });

        let ctx = context(Method::GET, "/index.php", Principal::anonymous());
        let outcome = chain.run(&ctx).await;

        assert_eq!(status(&outcome), Some(StatusCode::IM_A_TEAPOT));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_public_pages_only_run_global_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let set = GateSet {
            global: GateChain::new().with(Counting {
                calls: calls.clone(),
                halt: false,
            }),
            authenticated: GateChain::new().with(Counting {
                calls: calls.clone(),
                halt: true,
            }),
            ..Default::default()
        };

        let ctx = context(Method::GET, "/index.php", Principal::anonymous());
        assert!(set.run(Access::Public, &ctx).await.is_continue());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!set.run(Access::Authenticated, &ctx).await.is_continue());
    }

    #[test]
    fn test_request_info_helpers() {
        let info = RequestInfo::new(
            Method::GET,
            "/index.php?page=profile&user_id=4".parse().unwrap(),
        );
        assert_eq!(info.query_param("page").as_deref(), Some("profile"));
        assert_eq!(info.query_param("missing"), None);
        assert_eq!(info.path_and_query(), "/index.php?page=profile&user_id=4");
    }

    #[test]
    fn test_found_redirect() {
        let response = found(LOGIN_ROUTE);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/index.php?page=login"
        );
    }
}
