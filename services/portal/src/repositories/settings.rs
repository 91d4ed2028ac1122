//! Persistent portal settings (`settings` table)

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

/// Key/value settings storage
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Option<String>>;

    async fn store(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct SettingsRepository {
    pool: PgPool,
}

impl SettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsSource for SettingsRepository {
    async fn fetch(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT setting_value FROM settings WHERE setting_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("setting_value")))
    }

    async fn store(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (setting_key, setting_value)
            VALUES ($1, $2)
            ON CONFLICT (setting_key) DO UPDATE SET setting_value = EXCLUDED.setting_value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
