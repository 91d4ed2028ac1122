//! The authenticated principal of a request
//!
//! [`SessionAuthenticator`] turns the session into a normalized [`Principal`]
//! once per request. Admin markers left in the session by older releases are
//! reported separately as an [`AdminClaim`] and are never promoted to the
//! admin role; only the maintenance gate gives them weight.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Role, User};
use crate::repositories::UserDirectory;
use crate::session::Session;

/// Session keys under which older releases recorded "is admin"
pub const LEGACY_ADMIN_FLAGS: [&str; 6] = [
    "is_admin",
    "admin",
    "isAdmin",
    "user_type",
    "role",
    "user_role_legacy",
];

/// Whether the session carries an unverified admin marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminClaim {
    None,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Option<i64>,
    pub role: Role,
    pub authenticated: bool,
    pub admin_claim: AdminClaim,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            id: None,
            role: Role::Guest,
            authenticated: false,
            admin_claim: AdminClaim::None,
        }
    }

    pub fn user(id: i64, role: Role) -> Self {
        Self {
            id: Some(id),
            role,
            authenticated: true,
            admin_claim: AdminClaim::None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.authenticated && self.role == role
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    pub fn current_user_id(&self) -> Option<i64> {
        self.id
    }

    pub fn current_user_role(&self) -> Role {
        self.role
    }
}

/// Resolves who is making the request
#[async_trait]
pub trait AuthenticationService: Send + Sync {
    async fn principal(&self, session: &Session) -> Principal;

    /// Full user record of the logged-in, active user
    async fn current_user(&self, session: &Session) -> Result<Option<User>>;
}

/// Authentication backed by session state and the user directory
#[derive(Clone)]
pub struct SessionAuthenticator {
    users: Arc<dyn UserDirectory>,
}

impl SessionAuthenticator {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl AuthenticationService for SessionAuthenticator {
    async fn principal(&self, session: &Session) -> Principal {
        session
            .read(|data| {
                let admin_claim = if legacy_admin_claim(&data.legacy_flags) {
                    AdminClaim::Legacy
                } else {
                    AdminClaim::None
                };

                match data.user_id {
                    Some(id) => Principal {
                        id: Some(id),
                        // Unknown role names rank as guest
                        role: data
                            .user_role
                            .as_deref()
                            .and_then(|r| r.parse().ok())
                            .unwrap_or(Role::Guest),
                        authenticated: true,
                        admin_claim,
                    },
                    None => Principal {
                        admin_claim,
                        ..Principal::anonymous()
                    },
                }
            })
            .await
    }

    async fn current_user(&self, session: &Session) -> Result<Option<User>> {
        let Some(id) = session.read(|data| data.user_id).await else {
            return Ok(None);
        };
        let user = self.users.find_by_id(id).await?;
        Ok(user.filter(|u| u.is_active))
    }
}

/// True when any legacy key holds an admin marker
pub fn legacy_admin_claim(flags: &HashMap<String, Value>) -> bool {
    LEGACY_ADMIN_FLAGS
        .iter()
        .filter_map(|key| flags.get(*key))
        .any(is_admin_marker)
}

fn is_admin_marker(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "admin"
        ),
        _ => false,
    }
}
