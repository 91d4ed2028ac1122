//! Maintenance mode gate
//!
//! While `maintenance_mode` is on, only administrators get through. Admin
//! detection is layered because sessions from older releases mark admins in
//! several ways:
//!
//! 1. the principal's role is admin;
//! 2. a legacy session marker claims admin (unverified, see DESIGN.md);
//! 3. a verdict cached in the session by an earlier database check;
//! 4. a database lookup of the session user, cached back into the session.

use async_trait::async_trait;
use axum::{
    http::{StatusCode, header},
    response::{Html, IntoResponse},
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{Gate, GateContext, Outcome, RequestInfo};
use crate::principal::AdminClaim;
use crate::repositories::UserDirectory;
use crate::settings::{MAINTENANCE_MODE, SettingsStore};
use crate::views;

#[derive(Clone)]
pub struct MaintenanceGate {
    settings: SettingsStore,
    users: Arc<dyn UserDirectory>,
    retry_after_seconds: u64,
}

impl MaintenanceGate {
    pub fn new(
        settings: SettingsStore,
        users: Arc<dyn UserDirectory>,
        retry_after_seconds: u64,
    ) -> Self {
        Self {
            settings,
            users,
            retry_after_seconds,
        }
    }

    /// `page=login&maintenance=1`, the form administrators sign in with
    pub fn is_maintenance_login(request: &RequestInfo) -> bool {
        let params = super::query_params(&request.uri);
        params.get("page").map(String::as_str) == Some("login")
            && params.get("maintenance").map(String::as_str) == Some("1")
    }

    pub async fn is_admin(&self, ctx: &GateContext) -> bool {
        let principal = &ctx.principal;
        if principal.is_admin() {
            return true;
        }

        if principal.admin_claim == AdminClaim::Legacy {
            warn!(
                user_id = principal.id,
                "Honoring legacy admin session marker during maintenance"
            );
            return true;
        }

        let Some(user_id) = principal.id.filter(|_| principal.is_authenticated()) else {
            return false;
        };

        if let Some(verdict) = ctx.session.read(|data| data.admin_verified).await {
            return verdict;
        }

        match self.users.find_by_id(user_id).await {
            Ok(user) => {
                let verdict = user.is_some_and(|u| u.is_active_admin());
                ctx.session
                    .update(|data| data.admin_verified = Some(verdict))
                    .await;
                debug!(user_id, verdict, "Cached maintenance admin check");
                verdict
            }
            Err(e) => {
                error!(user_id, "Admin lookup failed during maintenance: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Gate for MaintenanceGate {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    async fn handle(&self, ctx: &GateContext) -> Outcome {
        if !self.settings.flag(MAINTENANCE_MODE).await {
            return Outcome::Continue;
        }

        if Self::is_maintenance_login(&ctx.request) || self.is_admin(ctx).await {
            return Outcome::Continue;
        }

        info!(ip = %ctx.request.client_ip, uri = %ctx.request.uri, "Request refused during maintenance");

        Outcome::Halt(
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, self.retry_after_seconds.to_string())],
                Html(views::maintenance_page(self.retry_after_seconds)),
            )
                .into_response(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::testing::*;
    use crate::models::{Role, User};
    use crate::principal::Principal;
    use crate::repositories::{MemorySettings, MemoryUserDirectory};
    use crate::settings::DEFAULT_CACHE_TTL;
    use axum::http::Method;
    use chrono::Utc;
    use serde_json::json;

    fn setup(maintenance: &str) -> (MaintenanceGate, MemoryUserDirectory) {
        let settings = SettingsStore::new(
            Arc::new(MemorySettings::new().with(MAINTENANCE_MODE, maintenance)),
            DEFAULT_CACHE_TTL,
        );
        let users = MemoryUserDirectory::new();
        (
            MaintenanceGate::new(settings, Arc::new(users.clone()), 3600),
            users,
        )
    }

    fn user(id: i64, role: &str) -> User {
        User {
            id,
            username: format!("user{id}"),
            email: format!("user{id}@example.com"),
            password_hash: String::new(),
            role: role.into(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_off_always_continues() {
        let (gate, _) = setup("0");
        let ctx = context(Method::GET, "/index.php", Principal::anonymous());
        assert!(gate.handle(&ctx).await.is_continue());
    }

    #[tokio::test]
    async fn test_non_admin_gets_503_with_retry_after() {
        let (gate, users) = setup("1");
        users.insert(user(4, "client")).await;
        let ctx = context(Method::GET, "/index.php", Principal::user(4, Role::Client));

        let outcome = gate.handle(&ctx).await;

        assert_eq!(status(&outcome), Some(StatusCode::SERVICE_UNAVAILABLE));
        let Outcome::Halt(response) = outcome else {
            unreachable!()
        };
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "3600");
    }

    #[tokio::test]
    async fn test_anonymous_gets_503() {
        let (gate, _) = setup("1");
        let ctx = context(Method::GET, "/index.php?page=home", Principal::anonymous());
        assert_eq!(
            status(&gate.handle(&ctx).await),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
    }

    #[tokio::test]
    async fn test_maintenance_login_form_is_reachable() {
        let (gate, _) = setup("1");
        let ctx = context(
            Method::GET,
            "/index.php?page=login&maintenance=1",
            Principal::anonymous(),
        );
        assert!(gate.handle(&ctx).await.is_continue());

        let plain_login = context(Method::GET, "/index.php?page=login", Principal::anonymous());
        assert!(!gate.handle(&plain_login).await.is_continue());
    }

    #[tokio::test]
    async fn test_admin_role_passes() {
        let (gate, _) = setup("1");
        let ctx = context(Method::GET, "/index.php", Principal::user(1, Role::Admin));
        assert!(gate.handle(&ctx).await.is_continue());
    }

    #[tokio::test]
    async fn test_legacy_admin_marker_passes() {
        let (gate, users) = setup("1");
        let mut principal = Principal::user(8, Role::Client);
        principal.admin_claim = AdminClaim::Legacy;
        let ctx = context(Method::GET, "/index.php", principal);
        ctx.session
            .update(|d| {
                d.legacy_flags.insert("is_admin".into(), json!(true));
            })
            .await;

        assert!(gate.handle(&ctx).await.is_continue());
        assert_eq!(users.lookups(), 0);
    }

    #[tokio::test]
    async fn test_database_verdict_is_cached_in_session() {
        let (gate, users) = setup("1");
        // Session says client, database says admin (role changed since login)
        users.insert(user(2, "admin")).await;
        let ctx = context(Method::GET, "/index.php", Principal::user(2, Role::Client));

        assert!(gate.handle(&ctx).await.is_continue());
        assert!(gate.handle(&ctx).await.is_continue());
        assert_eq!(users.lookups(), 1);
        assert_eq!(ctx.session.snapshot().await.admin_verified, Some(true));
    }

    #[tokio::test]
    async fn test_negative_verdict_is_cached_too() {
        let (gate, users) = setup("1");
        users.insert(user(5, "employee")).await;
        let ctx = context(Method::GET, "/index.php", Principal::user(5, Role::Employee));

        assert!(!gate.handle(&ctx).await.is_continue());
        assert!(!gate.handle(&ctx).await.is_continue());
        assert_eq!(users.lookups(), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_denies_without_caching() {
        let (gate, users) = setup("1");
        users.insert(user(2, "admin")).await;
        users.set_unavailable(true);
        let ctx = context(Method::GET, "/index.php", Principal::user(2, Role::Client));

        assert!(!gate.handle(&ctx).await.is_continue());
        assert_eq!(ctx.session.snapshot().await.admin_verified, None);

        users.set_unavailable(false);
        assert!(gate.handle(&ctx).await.is_continue());
    }

    #[tokio::test]
    async fn test_inactive_admin_is_refused() {
        let (gate, users) = setup("1");
        let mut disabled = user(6, "admin");
        disabled.is_active = false;
        users.insert(disabled).await;
        let ctx = context(Method::GET, "/index.php", Principal::user(6, Role::Guest));

        assert!(!gate.handle(&ctx).await.is_continue());
    }
}
