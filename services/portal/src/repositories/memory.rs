//! In-memory repositories for local runs and tests

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{GrantStore, SettingsSource, UserDirectory};
use crate::models::User;

/// User directory held in memory
#[derive(Clone, Default)]
pub struct MemoryUserDirectory {
    users: Arc<RwLock<HashMap<i64, User>>>,
    grants: Arc<RwLock<HashSet<(i64, String, String)>>>,
    unavailable: Arc<AtomicBool>,
    lookups: Arc<AtomicUsize>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }

    pub async fn grant(&self, user_id: i64, resource: &str, action: &str) {
        self.grants
            .write()
            .await
            .insert((user_id, resource.to_string(), action.to_string()));
    }

    /// Make every lookup fail, as an unreachable database would
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of user lookups served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("user directory unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_username_or_email(&self, username_or_email: &str) -> Result<Option<User>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.username == username_or_email || u.email == username_or_email)
            .cloned())
    }

    async fn update_email(&self, id: i64, email: &str) -> Result<bool> {
        self.check_available()?;
        match self.users.write().await.get_mut(&id) {
            Some(user) => {
                user.email = email.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl GrantStore for MemoryUserDirectory {
    async fn has_explicit_grant(
        &self,
        user_id: i64,
        resource: &str,
        action: &str,
    ) -> Result<bool> {
        self.check_available()?;
        Ok(self
            .grants
            .read()
            .await
            .contains(&(user_id, resource.to_string(), action.to_string())))
    }
}

/// Settings held in memory
#[derive(Clone, Default)]
pub struct MemorySettings {
    values: Arc<RwLock<HashMap<String, String>>>,
    fetches: Arc<AtomicUsize>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        if let Ok(mut values) = self.values.try_write() {
            values.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Number of reads that reached this source
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettingsSource for MemorySettings {
    async fn fetch(&self, key: &str) -> Result<Option<String>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn store(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
