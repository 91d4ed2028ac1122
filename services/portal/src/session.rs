//! Session management
//!
//! A [`Session`] is created by [`session_layer`] at the start of every
//! request, placed in the request extensions for gates and handlers, and
//! persisted to the [`SessionStore`] once the response has been produced.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use common::RedisPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::csrf::random_token;
use crate::models::SessionData;

/// Storage for serialized session state
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<SessionData>>;

    async fn save(&self, id: &str, data: &SessionData, ttl_seconds: u64) -> Result<()>;

    async fn destroy(&self, id: &str) -> Result<()>;
}

/// Sessions stored in Redis as JSON under `session:<id>`
#[derive(Clone)]
pub struct RedisSessionStore {
    redis_pool: RedisPool,
}

impl RedisSessionStore {
    pub fn new(redis_pool: RedisPool) -> Self {
        Self { redis_pool }
    }

    fn key(id: &str) -> String {
        format!("session:{}", id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionData>> {
        match self.redis_pool.get(&Self::key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, id: &str, data: &SessionData, ttl_seconds: u64) -> Result<()> {
        let raw = serde_json::to_string(data)?;
        self.redis_pool
            .set(&Self::key(id), &raw, Some(ttl_seconds))
            .await?;
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        self.redis_pool.delete(&Self::key(id)).await?;
        Ok(())
    }
}

/// Sessions kept in process memory
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    entries: Arc<Mutex<HashMap<String, (SessionData, Instant)>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionData>> {
        let mut entries = self.entries.lock().await;
        match entries.get(id) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(id);
                Ok(None)
            }
            Some((data, _)) => Ok(Some(data.clone())),
            None => Ok(None),
        }
    }

    async fn save(&self, id: &str, data: &SessionData, ttl_seconds: u64) -> Result<()> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_seconds);
        self.entries
            .lock()
            .await
            .insert(id.to_string(), (data.clone(), expires_at));
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        self.entries.lock().await.remove(id);
        Ok(())
    }
}

#[derive(Debug)]
struct SessionState {
    id: String,
    data: SessionData,
    is_new: bool,
    dirty: bool,
    destroyed: bool,
    previous_id: Option<String>,
}

/// Handle to the current request's session.
///
/// Cloning shares the same state.
#[derive(Clone, Debug)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

impl Session {
    /// A brand new, empty session with a random id
    pub fn fresh() -> Self {
        Self::from_state(random_token(), SessionData::default(), true)
    }

    fn existing(id: String, data: SessionData) -> Self {
        Self::from_state(id, data, false)
    }

    fn from_state(id: String, data: SessionData, is_new: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                id,
                data,
                is_new,
                dirty: false,
                destroyed: false,
                previous_id: None,
            })),
        }
    }

    pub async fn id(&self) -> String {
        self.inner.lock().await.id.clone()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&SessionData) -> R) -> R {
        let state = self.inner.lock().await;
        f(&state.data)
    }

    pub async fn update<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let mut state = self.inner.lock().await;
        state.dirty = true;
        f(&mut state.data)
    }

    pub async fn snapshot(&self) -> SessionData {
        self.inner.lock().await.data.clone()
    }

    /// Issue a new id for the same data; the old id is removed on persist
    pub async fn regenerate_id(&self) {
        let mut state = self.inner.lock().await;
        let old = std::mem::replace(&mut state.id, random_token());
        if !state.is_new && state.previous_id.is_none() {
            state.previous_id = Some(old);
        }
        state.is_new = true;
        state.dirty = true;
    }

    /// Drop all data and end the session
    pub async fn destroy(&self) {
        let mut state = self.inner.lock().await;
        state.data = SessionData::default();
        state.destroyed = true;
    }

    pub async fn is_destroyed(&self) -> bool {
        self.inner.lock().await.destroyed
    }
}

/// What the response must do with the session cookie
#[derive(Debug, PartialEq, Eq)]
pub enum CookieUpdate {
    Set(String),
    Remove,
    Keep,
}

/// Loads and persists sessions and builds the session cookie
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cookie_name: String,
    ttl_seconds: u64,
    secure_cookie: bool,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cookie_name: impl Into<String>,
        ttl_seconds: u64,
        secure_cookie: bool,
    ) -> Self {
        Self {
            store,
            cookie_name: cookie_name.into(),
            ttl_seconds,
            secure_cookie,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Resume the session named by the cookie, or start a new one.
    ///
    /// A store failure starts a new session rather than failing the request.
    pub async fn start(&self, cookie_id: Option<&str>) -> Session {
        let Some(id) = cookie_id.filter(|id| is_well_formed_id(id)) else {
            return Session::fresh();
        };

        match self.store.load(id).await {
            Ok(Some(data)) => Session::existing(id.to_string(), data),
            Ok(None) => {
                debug!("Session cookie refers to an unknown or expired session");
                Session::fresh()
            }
            Err(e) => {
                error!("Failed to load session: {}", e);
                Session::fresh()
            }
        }
    }

    /// Write the session back and report the cookie change to make
    pub async fn persist(&self, session: &Session) -> CookieUpdate {
        let state = session.inner.lock().await;

        if let Some(previous) = &state.previous_id {
            if let Err(e) = self.store.destroy(previous).await {
                error!("Failed to remove rotated session: {}", e);
            }
        }

        if state.destroyed {
            if !state.is_new {
                if let Err(e) = self.store.destroy(&state.id).await {
                    error!("Failed to destroy session: {}", e);
                }
                info!("Session destroyed");
            }
            return CookieUpdate::Remove;
        }

        // New sessions are only stored once something was written to them;
        // existing ones are re-saved to slide their expiry.
        if state.is_new && !state.dirty {
            return CookieUpdate::Keep;
        }

        if let Err(e) = self.store.save(&state.id, &state.data, self.ttl_seconds).await {
            error!("Failed to save session: {}", e);
            return CookieUpdate::Keep;
        }

        if state.is_new {
            CookieUpdate::Set(state.id.clone())
        } else {
            CookieUpdate::Keep
        }
    }

    fn cookie(&self, id: String) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), id))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure_cookie)
            .build()
    }

    fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), "")).path("/").build()
    }
}

fn is_well_formed_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Middleware attaching a [`Session`] to the request and persisting it afterwards
pub async fn session_layer(
    State(manager): State<SessionManager>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let cookie_id = jar
        .get(manager.cookie_name())
        .map(|cookie| cookie.value().to_string());
    let session = manager.start(cookie_id.as_deref()).await;
    req.extensions_mut().insert(session.clone());

    let response = next.run(req).await;

    match manager.persist(&session).await {
        CookieUpdate::Set(id) => (jar.add(manager.cookie(id)), response).into_response(),
        CookieUpdate::Remove => (jar.remove(manager.removal_cookie()), response).into_response(),
        CookieUpdate::Keep => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(store: &MemorySessionStore) -> SessionManager {
        SessionManager::new(Arc::new(store.clone()), "PORTALSESSID", 3600, false)
    }

    #[tokio::test]
    async fn test_untouched_new_session_is_not_stored() {
        let store = MemorySessionStore::new();
        let manager = manager(&store);

        let session = manager.start(None).await;
        assert_eq!(manager.persist(&session).await, CookieUpdate::Keep);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_written_session_round_trips() {
        let store = MemorySessionStore::new();
        let manager = manager(&store);

        let session = manager.start(None).await;
        session.update(|data| data.user_id = Some(42)).await;
        let id = match manager.persist(&session).await {
            CookieUpdate::Set(id) => id,
            other => panic!("expected a cookie, got {:?}", other),
        };

        let resumed = manager.start(Some(&id)).await;
        assert_eq!(resumed.id().await, id);
        assert_eq!(resumed.read(|data| data.user_id).await, Some(42));
        assert_eq!(manager.persist(&resumed).await, CookieUpdate::Keep);
    }

    #[tokio::test]
    async fn test_malformed_cookie_starts_fresh_session() {
        let store = MemorySessionStore::new();
        let manager = manager(&store);

        let session = manager.start(Some("../../etc/passwd")).await;
        assert_ne!(session.id().await, "../../etc/passwd");
        assert_eq!(session.read(|data| data.clone()).await, SessionData::default());
    }

    #[tokio::test]
    async fn test_regenerated_id_replaces_old_entry() {
        let store = MemorySessionStore::new();
        let manager = manager(&store);

        let session = manager.start(None).await;
        session.update(|data| data.user_id = Some(7)).await;
        let CookieUpdate::Set(old_id) = manager.persist(&session).await else {
            panic!("expected a cookie");
        };

        let resumed = manager.start(Some(&old_id)).await;
        resumed.regenerate_id().await;
        let CookieUpdate::Set(new_id) = manager.persist(&resumed).await else {
            panic!("expected a new cookie");
        };

        assert_ne!(old_id, new_id);
        assert!(store.load(&old_id).await.unwrap().is_none());
        assert_eq!(
            store.load(&new_id).await.unwrap().and_then(|d| d.user_id),
            Some(7)
        );
    }

    #[tokio::test]
    async fn test_destroy_removes_entry_and_cookie() {
        let store = MemorySessionStore::new();
        let manager = manager(&store);

        let session = manager.start(None).await;
        session.update(|data| data.user_id = Some(1)).await;
        let CookieUpdate::Set(id) = manager.persist(&session).await else {
            panic!("expected a cookie");
        };

        let resumed = manager.start(Some(&id)).await;
        resumed.destroy().await;
        assert_eq!(manager.persist(&resumed).await, CookieUpdate::Remove);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_expires_entries() {
        let store = MemorySessionStore::new();
        store.save("abc", &SessionData::default(), 10).await.unwrap();
        assert!(store.load("abc").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.load("abc").await.unwrap().is_none());
    }
}
