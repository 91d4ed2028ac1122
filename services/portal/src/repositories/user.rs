//! User repository for database operations

use anyhow::Result;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::models::User;

/// Read access to portal users
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn find_by_username_or_email(&self, username_or_email: &str) -> Result<Option<User>>;

    /// Returns false when no such user exists
    async fn update_email(&self, id: i64, email: &str) -> Result<bool>;
}

/// Explicit permission grants: user → role assignment → role permission
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn has_explicit_grant(&self, user_id: i64, resource: &str, action: &str)
    -> Result<bool>;
}

/// PostgreSQL-backed user repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, role, is_active, created_at";

#[async_trait]
impl UserDirectory for UserRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        debug!("Finding user by ID: {}", id);

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_username_or_email(&self, username_or_email: &str) -> Result<Option<User>> {
        debug!("Finding user by username or email: {}", username_or_email);

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE username = $1 OR email = $1",
            USER_COLUMNS
        ))
        .bind(username_or_email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn update_email(&self, id: i64, email: &str) -> Result<bool> {
        debug!("Updating email of user {}", id);

        let result = sqlx::query("UPDATE users SET email = $1 WHERE id = $2")
            .bind(email)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl GrantStore for UserRepository {
    async fn has_explicit_grant(
        &self,
        user_id: i64,
        resource: &str,
        action: &str,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM user_roles ur
                JOIN role_permissions rp ON rp.role_id = ur.role_id
                JOIN permissions p ON p.id = rp.permission_id
                WHERE ur.user_id = $1 AND p.resource = $2 AND p.action = $3
            ) AS granted
            "#,
        )
        .bind(user_id)
        .bind(resource)
        .bind(action)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("granted"))
    }
}

/// Hash a password with Argon2 and a random salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();
    Ok(hash)
}

/// Verify a user's password
pub fn verify_password(user: &User, password: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;

    let result = Argon2::default().verify_password(password.as_bytes(), &parsed_hash);

    Ok(result.is_ok())
}
