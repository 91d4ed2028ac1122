//! Role and permission authorization
//!
//! [`Authorizer`] holds the decisions (`require_role`, `require_minimum_role`,
//! `require_permission`, `require_own_resource_or_admin`); [`RoleGate`] runs
//! one of them as part of a gate chain. Every denial queues a flash error and
//! redirects: to the login page when nobody is logged in, to the dashboard
//! otherwise.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, warn};

use super::{DASHBOARD_ROUTE, Gate, GateContext, LOGIN_ROUTE, Outcome, found};
use crate::flash::FlashMessages;
use crate::models::Role;
use crate::permissions::PermissionTable;
use crate::principal::Principal;
use crate::repositories::GrantStore;
use crate::session::Session;

pub const FORBIDDEN_MESSAGE: &str = "You do not have permission to access this page.";

#[derive(Clone)]
pub struct Authorizer {
    grants: Arc<dyn GrantStore>,
    table: Arc<PermissionTable>,
}

impl Authorizer {
    pub fn new(grants: Arc<dyn GrantStore>, table: PermissionTable) -> Self {
        Self {
            grants,
            table: Arc::new(table),
        }
    }

    /// Role is one of `allowed`
    pub fn has_any_role(principal: &Principal, allowed: &[Role]) -> bool {
        principal.is_authenticated() && allowed.contains(&principal.role)
    }

    /// Role ranks at or above `minimum`; an unrecognized `minimum` never passes
    pub fn meets_minimum_role(principal: &Principal, minimum: &str) -> bool {
        match minimum.parse::<Role>() {
            Ok(minimum) => principal.role.at_least(minimum),
            Err(e) => {
                warn!("Minimum role check against {}", e);
                false
            }
        }
    }

    pub fn owns_or_admin(principal: &Principal, owner_id: i64) -> bool {
        principal.is_admin()
            || (principal.is_authenticated() && principal.id == Some(owner_id))
    }

    /// Admins pass; then explicit grants; then the static table
    pub async fn is_permitted(&self, principal: &Principal, resource: &str, action: &str) -> bool {
        if principal.is_admin() {
            return true;
        }

        if let Some(user_id) = principal.id.filter(|_| principal.is_authenticated()) {
            match self.grants.has_explicit_grant(user_id, resource, action).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => error!(
                    user_id,
                    resource, action, "Permission grant lookup failed: {}", e
                ),
            }
        }

        self.table.allows(principal.role, resource, action)
    }

    pub async fn require_role(
        &self,
        session: &Session,
        principal: &Principal,
        allowed: &[Role],
    ) -> Outcome {
        if Self::has_any_role(principal, allowed) {
            return Outcome::Continue;
        }
        deny(session, principal).await
    }

    pub async fn require_minimum_role(
        &self,
        session: &Session,
        principal: &Principal,
        minimum: &str,
    ) -> Outcome {
        if principal.is_authenticated() && Self::meets_minimum_role(principal, minimum) {
            return Outcome::Continue;
        }
        deny(session, principal).await
    }

    pub async fn require_permission(
        &self,
        session: &Session,
        principal: &Principal,
        resource: &str,
        action: &str,
    ) -> Outcome {
        if self.is_permitted(principal, resource, action).await {
            return Outcome::Continue;
        }
        deny(session, principal).await
    }

    pub async fn require_own_resource_or_admin(
        &self,
        session: &Session,
        principal: &Principal,
        owner_id: i64,
    ) -> Outcome {
        if Self::owns_or_admin(principal, owner_id) {
            return Outcome::Continue;
        }
        deny(session, principal).await
    }
}

async fn deny(session: &Session, principal: &Principal) -> Outcome {
    if principal.is_authenticated() {
        warn!(
            user_id = principal.id,
            role = %principal.role,
            "Authorization denied"
        );
        FlashMessages::add_error(session, FORBIDDEN_MESSAGE).await;
        Outcome::Halt(found(DASHBOARD_ROUTE))
    } else {
        FlashMessages::add_error(session, super::auth::LOGIN_REQUIRED_MESSAGE).await;
        Outcome::Halt(found(LOGIN_ROUTE))
    }
}

/// What a [`RoleGate`] checks
#[derive(Debug, Clone)]
pub enum Requirement {
    AnyRole(Vec<Role>),
    MinimumRole(String),
    Permission { resource: String, action: String },
}

/// Gate form of the [`Authorizer`] checks
pub struct RoleGate {
    authorizer: Authorizer,
    requirement: Requirement,
}

impl RoleGate {
    pub fn new(authorizer: Authorizer, requirement: Requirement) -> Self {
        Self {
            authorizer,
            requirement,
        }
    }

    pub fn admin_only(authorizer: Authorizer) -> Self {
        Self::new(authorizer, Requirement::AnyRole(vec![Role::Admin]))
    }

    pub fn client_area(authorizer: Authorizer) -> Self {
        Self::new(
            authorizer,
            Requirement::MinimumRole(Role::Client.as_str().to_string()),
        )
    }

    pub fn permission(authorizer: Authorizer, resource: &str, action: &str) -> Self {
        Self::new(
            authorizer,
            Requirement::Permission {
                resource: resource.to_string(),
                action: action.to_string(),
            },
        )
    }
}

#[async_trait]
impl Gate for RoleGate {
    fn name(&self) -> &'static str {
        match self.requirement {
            Requirement::AnyRole(_) => "role",
            Requirement::MinimumRole(_) => "minimum_role",
            Requirement::Permission { .. } => "permission",
        }
    }

    async fn handle(&self, ctx: &GateContext) -> Outcome {
        let (session, principal) = (&ctx.session, &ctx.principal);
        match &self.requirement {
            Requirement::AnyRole(allowed) => {
                self.authorizer.require_role(session, principal, allowed).await
            }
            Requirement::MinimumRole(minimum) => {
                self.authorizer
                    .require_minimum_role(session, principal, minimum)
                    .await
            }
            Requirement::Permission { resource, action } => {
                self.authorizer
                    .require_permission(session, principal, resource, action)
                    .await
            }
        }
    }
}
