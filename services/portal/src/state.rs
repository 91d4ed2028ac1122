//! Application state shared across handlers

use common::{CounterStore, RedisPool};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PortalConfig;
use crate::gates::{
    AuthGate, Authorizer, CsrfGate, GateChain, GateSet, MaintenanceGate, RateLimitGate, RoleGate,
};
use crate::logging::LogControl;
use crate::permissions::PermissionTable;
use crate::principal::{AuthenticationService, SessionAuthenticator};
use crate::repositories::{
    GrantStore, MemorySettings, MemoryUserDirectory, SettingsSource, UserDirectory,
};
use crate::session::{MemorySessionStore, SessionManager, SessionStore};
use crate::settings::SettingsStore;

/// Backends the portal talks to
pub struct Collaborators {
    pub users: Arc<dyn UserDirectory>,
    pub grants: Arc<dyn GrantStore>,
    pub settings: Arc<dyn SettingsSource>,
    pub sessions: Arc<dyn SessionStore>,
    /// Shared rate-limit counters; `None` keeps counting in process memory
    pub counters: Option<Arc<dyn CounterStore>>,
    pub permissions: PermissionTable,
}

impl Collaborators {
    /// Everything in process memory
    pub fn in_memory(
        users: MemoryUserDirectory,
        settings: MemorySettings,
        permissions: PermissionTable,
    ) -> Self {
        Self {
            users: Arc::new(users.clone()),
            grants: Arc::new(users),
            settings: Arc::new(settings),
            sessions: Arc::new(MemorySessionStore::new()),
            counters: None,
            permissions,
        }
    }
}

/// Database and cache handles, reported on by `/health`
#[derive(Clone)]
pub struct Infrastructure {
    pub db_pool: PgPool,
    pub redis_pool: RedisPool,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PortalConfig>,
    pub sessions: SessionManager,
    pub auth: Arc<dyn AuthenticationService>,
    pub users: Arc<dyn UserDirectory>,
    pub authorizer: Authorizer,
    pub settings: SettingsStore,
    pub gates: GateSet,
    pub rate_limiter: Option<RateLimitGate>,
    pub log_control: LogControl,
    pub infrastructure: Option<Infrastructure>,
}

impl AppState {
    pub fn new(config: PortalConfig, parts: Collaborators, log_control: LogControl) -> Self {
        let sessions = SessionManager::new(
            parts.sessions,
            config.session.cookie_name.clone(),
            config.session.ttl_seconds,
            config.session.secure_cookie,
        );
        let settings = SettingsStore::new(
            parts.settings,
            Duration::from_secs(config.settings.cache_ttl_seconds),
        );
        let authorizer = Authorizer::new(parts.grants, parts.permissions);
        let auth: Arc<dyn AuthenticationService> =
            Arc::new(SessionAuthenticator::new(parts.users.clone()));

        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| RateLimitGate::new(config.rate_limit.clone(), parts.counters));

        let mut global = GateChain::new().with(MaintenanceGate::new(
            settings.clone(),
            parts.users.clone(),
            config.maintenance.retry_after_seconds,
        ));
        if let Some(limiter) = &rate_limiter {
            global = global.with(limiter.clone());
        }
        let global = global.with(CsrfGate);

        let gates = GateSet {
            global,
            authenticated: GateChain::new().with(AuthGate),
            client_area: GateChain::new()
                .with(AuthGate)
                .with(RoleGate::client_area(authorizer.clone())),
            admin_only: GateChain::new()
                .with(AuthGate)
                .with(RoleGate::admin_only(authorizer.clone())),
        };

        Self {
            config: Arc::new(config),
            sessions,
            auth,
            users: parts.users,
            authorizer,
            settings,
            gates,
            rate_limiter,
            log_control,
            infrastructure: None,
        }
    }

    pub fn with_infrastructure(mut self, infrastructure: Infrastructure) -> Self {
        self.infrastructure = Some(infrastructure);
        self
    }
}
