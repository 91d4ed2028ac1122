//! User model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::Role;

/// User entity as stored in the `users` table
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Parsed role; unknown role names rank as guest
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::Guest)
    }

    pub fn is_active_admin(&self) -> bool {
        self.is_active && self.role() == Role::Admin
    }
}
